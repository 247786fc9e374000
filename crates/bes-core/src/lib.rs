//! Key tree primitives shared by the tree-based broadcast encryption schemes.
//!
//! This crate provides:
//! - Heap-order index arithmetic for complete binary trees.
//! - The [`KeyTree`] arena of node keys with its per-user revocation bitmap.
//! - The AES-CTR label derivation step used by the subset difference method.
//!
//! Randomness is consumed only when a tree is built; every other operation
//! is a deterministic in-memory walk.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod bitmap;
mod config;
pub mod drbg;
mod dump;
mod error;
pub mod index;
mod key;
mod tree;

pub use crate::bitmap::Bitmap;
pub use crate::config::{KeyLength, TreeConfig, MAX_DEPTH};
pub use crate::drbg::{derive_triplet, Triplet};
pub use crate::dump::TreeDump;
pub use crate::error::{Error, Result};
pub use crate::index::Branch;
pub use crate::key::NodeKey;
pub use crate::tree::KeyTree;
