//! Tree shape parameters.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Deepest tree accepted by [`TreeConfig::new`]; keeps `2^(depth+1) - 1` node
/// buffers addressable without overflow.
pub const MAX_DEPTH: usize = 24;

/// Node key sizes supported by the label derivation cipher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyLength {
    /// 128-bit keys.
    Aes128,
    /// 192-bit keys.
    Aes192,
    /// 256-bit keys.
    Aes256,
}

impl KeyLength {
    /// Every supported length, shortest first.
    pub const ALL: [KeyLength; 3] = [KeyLength::Aes128, KeyLength::Aes192, KeyLength::Aes256];

    /// Key size in bits.
    pub const fn bits(self) -> usize {
        match self {
            KeyLength::Aes128 => 128,
            KeyLength::Aes192 => 192,
            KeyLength::Aes256 => 256,
        }
    }

    /// Key size in bytes.
    pub const fn bytes(self) -> usize {
        self.bits() / 8
    }
}

impl TryFrom<usize> for KeyLength {
    type Error = Error;

    fn try_from(bits: usize) -> Result<Self> {
        match bits {
            128 => Ok(KeyLength::Aes128),
            192 => Ok(KeyLength::Aes192),
            256 => Ok(KeyLength::Aes256),
            other => Err(Error::InvalidConfiguration(format!(
                "unsupported key length {other} bits (expected 128, 192 or 256)"
            ))),
        }
    }
}

impl fmt::Display for KeyLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bits", self.bits())
    }
}

/// Validated shape of a key tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TreeConfig {
    depth: usize,
    key_length: KeyLength,
}

impl TreeConfig {
    /// Validates `depth` and `key_bits`.
    pub fn new(depth: usize, key_bits: usize) -> Result<Self> {
        let key_length = KeyLength::try_from(key_bits)?;
        Self::with_key_length(depth, key_length)
    }

    /// Validates `depth` for an already typed key length.
    pub fn with_key_length(depth: usize, key_length: KeyLength) -> Result<Self> {
        if depth > MAX_DEPTH {
            return Err(Error::InvalidConfiguration(format!(
                "tree depth {depth} exceeds the maximum of {MAX_DEPTH}"
            )));
        }
        Ok(Self { depth, key_length })
    }

    /// Height of the tree.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Size of every node key.
    pub fn key_length(&self) -> KeyLength {
        self.key_length
    }

    /// Number of users, `2^depth`.
    pub fn users(&self) -> usize {
        1 << self.depth
    }

    /// Number of nodes, `2^(depth+1) - 1`.
    pub fn nodes(&self) -> usize {
        (1 << (self.depth + 1)) - 1
    }
}
