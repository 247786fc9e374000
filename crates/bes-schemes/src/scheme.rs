//! Scheme identifiers and a facade over both engines.

use core::fmt;
use core::str::FromStr;
use std::io::{Read, Write};

use bes_core::{Error, KeyTree, Result, TreeConfig};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::bundle::{CoverHeader, UserBundle};
use crate::csm::Csm;
use crate::record;
use crate::sdm::Sdm;

/// Width of the scheme tag at the start of every record.
pub const TAG_LEN: usize = 20;

/// Broadcast encryption scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scheme {
    /// Complete subtree method.
    Csm,
    /// Subset difference method.
    Sdm,
}

impl Scheme {
    /// Tag text written at the start of a record.
    pub const fn tag(self) -> &'static str {
        match self {
            Scheme::Csm => "CSM_BES_scheme",
            Scheme::Sdm => "SDM_BES_scheme",
        }
    }

    /// Tag padded with NUL bytes to [`TAG_LEN`].
    pub fn tag_bytes(self) -> [u8; TAG_LEN] {
        let mut out = [0u8; TAG_LEN];
        let tag = self.tag().as_bytes();
        out[..tag.len()].copy_from_slice(tag);
        out
    }

    /// Recognises a NUL- or space-padded tag.
    pub fn from_tag(bytes: &[u8]) -> Option<Self> {
        let end = bytes
            .iter()
            .rposition(|&b| b != 0 && b != b' ')
            .map_or(0, |last| last + 1);
        [Scheme::Csm, Scheme::Sdm]
            .into_iter()
            .find(|scheme| scheme.tag().as_bytes() == &bytes[..end])
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scheme::Csm => "csm",
            Scheme::Sdm => "sdm",
        })
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "csm" => Ok(Scheme::Csm),
            "sdm" => Ok(Scheme::Sdm),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown scheme {other:?} (expected csm or sdm)"
            ))),
        }
    }
}

/// Either engine, selected at runtime.
#[derive(Debug)]
pub enum BroadcastTree {
    /// Complete subtree method.
    Csm(Csm),
    /// Subset difference method.
    Sdm(Sdm),
}

impl BroadcastTree {
    /// Builds a tree for `scheme` with keys from the OS random source.
    pub fn new(scheme: Scheme, depth: usize, key_bits: usize) -> Result<Self> {
        Ok(match scheme {
            Scheme::Csm => BroadcastTree::Csm(Csm::new(depth, key_bits)?),
            Scheme::Sdm => BroadcastTree::Sdm(Sdm::new(depth, key_bits)?),
        })
    }

    /// Builds a tree for `scheme` with keys drawn from `rng`.
    pub fn generate<R: RngCore + CryptoRng>(
        scheme: Scheme,
        config: TreeConfig,
        rng: &mut R,
    ) -> Result<Self> {
        Ok(match scheme {
            Scheme::Csm => BroadcastTree::Csm(Csm::generate(config, rng)?),
            Scheme::Sdm => BroadcastTree::Sdm(Sdm::generate(config, rng)?),
        })
    }

    /// Scheme of the wrapped engine.
    pub fn scheme(&self) -> Scheme {
        match self {
            BroadcastTree::Csm(_) => Scheme::Csm,
            BroadcastTree::Sdm(_) => Scheme::Sdm,
        }
    }

    /// Underlying key tree.
    pub fn tree(&self) -> &KeyTree {
        match self {
            BroadcastTree::Csm(csm) => csm.tree(),
            BroadcastTree::Sdm(sdm) => sdm.tree(),
        }
    }

    /// Revokes `user`.
    pub fn deny(&mut self, user: usize) -> Result<()> {
        match self {
            BroadcastTree::Csm(csm) => csm.deny(user),
            BroadcastTree::Sdm(sdm) => sdm.deny(user),
        }
    }

    /// Provisioning bundle for `user`.
    pub fn provision(&self, user: usize) -> Result<UserBundle> {
        match self {
            BroadcastTree::Csm(csm) => csm.bundle(user),
            BroadcastTree::Sdm(sdm) => sdm.bundle(user),
        }
    }

    /// Identifiers of the current cover.
    pub fn cover_header(&self) -> Result<CoverHeader> {
        Ok(match self {
            BroadcastTree::Csm(csm) => CoverHeader::from_nodes(self.tree(), &csm.allowed_cover()),
            BroadcastTree::Sdm(sdm) => CoverHeader::from_subsets(self.tree(), &sdm.allowed_cover()?),
        })
    }

    /// Writes the engine's record.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        match self {
            BroadcastTree::Csm(csm) => csm.save(writer),
            BroadcastTree::Sdm(sdm) => sdm.save(writer),
        }
    }

    /// Reads a record of either engine, dispatching on its tag.
    pub fn load<R: Read>(reader: &mut R) -> Result<Self> {
        let bytes = record::read_all(reader)?;
        let tag = bytes.get(..TAG_LEN).and_then(Scheme::from_tag);
        match tag {
            Some(Scheme::Csm) => Ok(BroadcastTree::Csm(Csm::from_bytes(&bytes)?)),
            Some(Scheme::Sdm) => Ok(BroadcastTree::Sdm(Sdm::from_bytes(&bytes)?)),
            None => Err(Error::FormatMismatch(
                "record does not start with a known scheme tag".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_padded_and_recognised() {
        let bytes = Scheme::Sdm.tag_bytes();
        assert_eq!(&bytes[..14], b"SDM_BES_scheme");
        assert_eq!(Scheme::from_tag(&bytes), Some(Scheme::Sdm));

        let mut spaced = *b"CSM_BES_scheme      ";
        assert_eq!(Scheme::from_tag(&spaced), Some(Scheme::Csm));
        spaced[0] = b'X';
        assert_eq!(Scheme::from_tag(&spaced), None);
        assert_eq!(Scheme::from_tag(&[0u8; TAG_LEN]), None);
    }

    #[test]
    fn parses_scheme_names() {
        assert_eq!("CSM".parse::<Scheme>().unwrap(), Scheme::Csm);
        assert_eq!("sdm".parse::<Scheme>().unwrap(), Scheme::Sdm);
        assert!("lkh".parse::<Scheme>().is_err());
    }

    #[test]
    fn facade_round_trips_both_engines() {
        for scheme in [Scheme::Csm, Scheme::Sdm] {
            let mut tree = BroadcastTree::new(scheme, 3, 128).unwrap();
            tree.deny(2).unwrap();
            let mut bytes = Vec::new();
            tree.save(&mut bytes).unwrap();
            let loaded = BroadcastTree::load(&mut bytes.as_slice()).unwrap();
            assert_eq!(loaded.scheme(), scheme);
            assert!(loaded.tree() == tree.tree());
            assert_eq!(loaded.cover_header().unwrap(), tree.cover_header().unwrap());
        }
    }

    #[test]
    fn facade_rejects_unknown_records() {
        let garbage = vec![0xffu8; 64];
        assert!(matches!(
            BroadcastTree::load(&mut garbage.as_slice()),
            Err(Error::FormatMismatch(_))
        ));
        assert!(matches!(
            BroadcastTree::load(&mut &b"short"[..]),
            Err(Error::FormatMismatch(_))
        ));
    }
}
