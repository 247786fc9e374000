//! Stateless tree-based broadcast encryption engines.
//!
//! Two constructions share the [`bes_core::KeyTree`] arena:
//! - [`Csm`], the complete subtree method, which disables the ancestor keys
//!   of every revoked leaf and covers the allowed users with maximal clean
//!   subtrees.
//! - [`Sdm`], the subset difference method, which derives subset keys from
//!   node labels on demand and covers the allowed users with subtree
//!   differences.
//!
//! Both engines persist to a fixed binary record tagged with the scheme
//! name; [`BroadcastTree`] dispatches on that tag when the scheme is only
//! known at runtime.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod bundle;
mod csm;
mod record;
mod scheme;
mod sdm;
mod subset;

pub use bundle::{CoverElement, CoverHeader, UserBundle, UserSecrets};
pub use csm::Csm;
pub use scheme::{BroadcastTree, Scheme, TAG_LEN};
pub use sdm::{Sdm, ALL_USERS_KEY_BYTES};
pub use subset::{IndexedKey, KeySubset, SubsetKey, SubsetLabel};
