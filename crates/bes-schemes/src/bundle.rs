//! Provisioning bundles and broadcast headers.

use bes_core::{KeyLength, KeyTree};
use serde::{Deserialize, Serialize};

use crate::scheme::Scheme;
use crate::subset::{IndexedKey, KeySubset, SubsetKey, SubsetLabel};

/// Secrets delivered to one user at enrollment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserSecrets {
    /// Node keys on the user's leaf-to-root path.
    Csm(Vec<IndexedKey>),
    /// Subset labels and keys hanging off the user's path.
    Sdm(Vec<SubsetLabel>),
}

/// Everything a receiver keeps to recover future session keys.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBundle {
    /// User the bundle was issued to.
    pub user: usize,
    /// Height of the issuing tree.
    pub depth: usize,
    /// Node key size of the issuing tree.
    pub key_length: KeyLength,
    /// Scheme-specific secrets.
    pub secrets: UserSecrets,
}

impl UserBundle {
    /// Scheme the bundle belongs to.
    pub fn scheme(&self) -> Scheme {
        match self.secrets {
            UserSecrets::Csm(_) => Scheme::Csm,
            UserSecrets::Sdm(_) => Scheme::Sdm,
        }
    }

    /// Serializes the bundle with `bincode`.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserializes a bundle with `bincode`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

/// One element of a broadcast cover, without key material.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoverElement {
    /// Complete subtree rooted at a node.
    Node(usize),
    /// Subset difference.
    Subset(KeySubset),
}

/// Identifiers of the cover a sender would place in a broadcast header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverHeader {
    /// Scheme the cover was computed with.
    pub scheme: Scheme,
    /// Height of the tree.
    pub depth: usize,
    /// Cover elements in emission order.
    pub elements: Vec<CoverElement>,
}

impl CoverHeader {
    /// Header for a complete subtree cover.
    pub fn from_nodes(tree: &KeyTree, cover: &[IndexedKey]) -> Self {
        Self {
            scheme: Scheme::Csm,
            depth: tree.depth(),
            elements: cover.iter().map(|e| CoverElement::Node(e.node)).collect(),
        }
    }

    /// Header for a subset difference cover.
    pub fn from_subsets(tree: &KeyTree, cover: &[SubsetKey]) -> Self {
        Self {
            scheme: Scheme::Sdm,
            depth: tree.depth(),
            elements: cover.iter().map(|e| CoverElement::Subset(e.subset)).collect(),
        }
    }

    /// Serializes the header with `bincode`.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserializes a header with `bincode`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Csm, Sdm};

    #[test]
    fn bundles_serialize_roundtrip() {
        let csm = Csm::new(3, 192).unwrap();
        let bundle = csm.bundle(6).unwrap();
        let decoded = UserBundle::from_bytes(&bundle.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, bundle);
        assert_eq!(decoded.scheme(), Scheme::Csm);

        let sdm = Sdm::new(3, 256).unwrap();
        let bundle = sdm.bundle(1).unwrap();
        let decoded = UserBundle::from_bytes(&bundle.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.scheme(), Scheme::Sdm);
        assert_eq!(decoded.key_length, KeyLength::Aes256);
    }

    #[test]
    fn headers_carry_identifiers_only() {
        let mut sdm = Sdm::new(2, 128).unwrap();
        sdm.deny(0).unwrap();
        sdm.deny(3).unwrap();
        let header = CoverHeader::from_subsets(sdm.tree(), &sdm.allowed_cover().unwrap());
        assert_eq!(
            header.elements,
            vec![
                CoverElement::Subset(KeySubset::new(1, 3)),
                CoverElement::Subset(KeySubset::new(2, 6)),
            ]
        );
        let decoded = CoverHeader::from_bytes(&header.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn garbage_is_not_a_bundle() {
        assert!(UserBundle::from_bytes(&[0xff; 3]).is_err());
    }
}
