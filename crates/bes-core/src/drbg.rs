//! Label derivation on top of an AES-CTR keystream.
//!
//! The subset difference scheme never stores derived labels: every label
//! below a subtree root is recomputed by feeding the parent label to
//! [`derive_triplet`], which splits `3L` keystream bytes into the left child
//! label, the node's subset key and the right child label.

use aes::{Aes128, Aes192, Aes256};
use ctr::cipher::{KeyIvInit, StreamCipher};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};
use crate::index::Branch;
use crate::key::NodeKey;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes192Ctr = ctr::Ctr128BE<Aes192>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

const IV: [u8; 16] = [0u8; 16];

/// Fills `out` with the keystream of AES-CTR keyed by `key` (zero IV).
///
/// `key` must be 16, 24 or 32 bytes long.
pub fn expand(key: &[u8], out: &mut [u8]) -> Result<()> {
    out.fill(0);
    match key.len() {
        16 => Aes128Ctr::new_from_slices(key, &IV)
            .map_err(|_| invalid_key(key.len()))?
            .apply_keystream(out),
        24 => Aes192Ctr::new_from_slices(key, &IV)
            .map_err(|_| invalid_key(key.len()))?
            .apply_keystream(out),
        32 => Aes256Ctr::new_from_slices(key, &IV)
            .map_err(|_| invalid_key(key.len()))?
            .apply_keystream(out),
        other => return Err(invalid_key(other)),
    }
    Ok(())
}

fn invalid_key(len: usize) -> Error {
    Error::InvalidConfiguration(format!("DRBG key must be 16, 24 or 32 bytes, got {len}"))
}

/// Output of one derivation step: `left || mid || right`, each `L` bytes.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Triplet {
    bytes: Vec<u8>,
    segment: usize,
}

impl Triplet {
    /// Label propagated to the left child.
    pub fn left(&self) -> &[u8] {
        &self.bytes[..self.segment]
    }

    /// Key of the subset ending at the current node.
    pub fn mid(&self) -> &[u8] {
        &self.bytes[self.segment..2 * self.segment]
    }

    /// Label propagated to the right child.
    pub fn right(&self) -> &[u8] {
        &self.bytes[2 * self.segment..]
    }

    /// Label propagated towards `branch`.
    pub fn child_label(&self, branch: Branch) -> NodeKey {
        match branch {
            Branch::Left => NodeKey::from_slice(self.left()),
            Branch::Right => NodeKey::from_slice(self.right()),
        }
    }

    /// The middle segment as an owned key.
    pub fn subset_key(&self) -> NodeKey {
        NodeKey::from_slice(self.mid())
    }
}

/// Derives `(left, mid, right)` from `label`.
///
/// Deterministic: the same label always yields the same triplet.
pub fn derive_triplet(label: &[u8]) -> Result<Triplet> {
    let mut bytes = vec![0u8; label.len() * 3];
    expand(label, &mut bytes)?;
    Ok(Triplet {
        bytes,
        segment: label.len(),
    })
}

/// Follows `path` from `label`, returning the label of the final node.
pub fn descend(label: &[u8], path: impl IntoIterator<Item = Branch>) -> Result<NodeKey> {
    let mut current = NodeKey::from_slice(label);
    for branch in path {
        current = derive_triplet(current.as_bytes())?.child_label(branch);
    }
    Ok(current)
}
