//! Receiver-side session key recovery.
//!
//! A receiver holds the [`UserBundle`] issued at enrollment. When a
//! broadcast arrives it scans the [`CoverHeader`] for the element that
//! contains its leaf and recovers that element's key from its own secrets,
//! without contacting the center.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

use bes_core::{derive_triplet, drbg, index, NodeKey, TreeConfig};
use bes_schemes::{
    CoverElement, CoverHeader, IndexedKey, KeySubset, Scheme, SubsetLabel, UserBundle,
    UserSecrets,
};
use thiserror::Error;
use tracing::debug;

/// The error type for session key recovery.
#[derive(Debug, Error)]
pub enum ReceiveError {
    /// Header and bundle come from different schemes.
    #[error("header uses {header} but the bundle was issued for {bundle}")]
    SchemeMismatch {
        /// Scheme of the header.
        header: Scheme,
        /// Scheme of the bundle.
        bundle: Scheme,
    },
    /// Header and bundle come from trees of different heights.
    #[error("header is for depth {header} but the bundle was issued for depth {bundle}")]
    DepthMismatch {
        /// Depth in the header.
        header: usize,
        /// Depth in the bundle.
        bundle: usize,
    },
    /// The bundle describes a tree or user that cannot exist.
    #[error("invalid bundle: {0}")]
    InvalidBundle(String),
    /// The header names a node outside the tree.
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    /// No cover element contains the user: it has been revoked.
    #[error("user {0} is not covered by this broadcast")]
    NotCovered(usize),
    /// The bundle lacks the secret needed for the covering element.
    #[error("bundle holds no secret for cover element {0:?}")]
    MissingSecret(CoverElement),
    /// Label derivation failed.
    #[error(transparent)]
    Derivation(#[from] bes_core::Error),
}

/// Key recovered for one broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionKey {
    /// Position of the covering element in the header.
    pub position: usize,
    /// The covering element.
    pub element: CoverElement,
    /// Its key.
    pub key: NodeKey,
}

/// Finds the cover element containing the bundle's user and recovers its key.
pub fn session_key(bundle: &UserBundle, header: &CoverHeader) -> Result<SessionKey, ReceiveError> {
    let config = TreeConfig::with_key_length(bundle.depth, bundle.key_length)
        .map_err(|err| ReceiveError::InvalidBundle(err.to_string()))?;
    if bundle.user >= config.users() {
        return Err(ReceiveError::InvalidBundle(format!(
            "user {} outside a tree of {} users",
            bundle.user,
            config.users()
        )));
    }
    if header.scheme != bundle.scheme() {
        return Err(ReceiveError::SchemeMismatch {
            header: header.scheme,
            bundle: bundle.scheme(),
        });
    }
    if header.depth != bundle.depth {
        return Err(ReceiveError::DepthMismatch {
            header: header.depth,
            bundle: bundle.depth,
        });
    }

    if let Some(element) = header.elements.iter().find(|e| !fits(e, config.nodes())) {
        return Err(ReceiveError::InvalidHeader(format!(
            "{element:?} outside a tree of {} nodes",
            config.nodes()
        )));
    }

    let leaf = index::leaf(bundle.depth, bundle.user);
    let (position, element) = header
        .elements
        .iter()
        .enumerate()
        .find(|(_, element)| match element {
            CoverElement::Node(node) => index::is_ancestor_or_self(*node, leaf),
            CoverElement::Subset(subset) => subset.contains_user(bundle.depth, bundle.user),
        })
        .ok_or(ReceiveError::NotCovered(bundle.user))?;

    let key = match (&bundle.secrets, element) {
        (UserSecrets::Csm(keys), CoverElement::Node(node)) => node_key(keys, *node),
        (UserSecrets::Sdm(labels), CoverElement::Subset(subset)) => subset_key(labels, subset)?,
        _ => None,
    }
    .ok_or(ReceiveError::MissingSecret(*element))?;

    debug!(user = bundle.user, position, "recovered session key");
    Ok(SessionKey {
        position,
        element: *element,
        key,
    })
}

fn fits(element: &CoverElement, nodes: usize) -> bool {
    match element {
        CoverElement::Node(node) => *node < nodes,
        CoverElement::Subset(subset) => subset.high < nodes && subset.low < nodes,
    }
}

fn node_key(keys: &[IndexedKey], node: usize) -> Option<NodeKey> {
    keys.iter().find(|k| k.node == node).map(|k| k.key.clone())
}

/// Uses the provisioned `(high, j)` with `j` an ancestor of `subset.low`,
/// deriving down from `j` when the two differ.
fn subset_key(
    labels: &[SubsetLabel],
    subset: &KeySubset,
) -> Result<Option<NodeKey>, ReceiveError> {
    if let Some(exact) = labels.iter().find(|s| s.subset == *subset) {
        return Ok(Some(exact.key.clone()));
    }
    let Some(secret) = labels.iter().find(|s| {
        s.subset.high == subset.high
            && !s.subset.is_whole_subtree()
            && index::is_ancestor_or_self(s.subset.low, subset.low)
    }) else {
        return Ok(None);
    };
    let Some(label) = &secret.label else {
        return Ok(None);
    };
    let path = index::branches_between(secret.subset.low, subset.low);
    let label = drbg::descend(label.as_bytes(), path)?;
    Ok(Some(derive_triplet(label.as_bytes())?.subset_key()))
}
