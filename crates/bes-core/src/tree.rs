//! Complete binary key tree with per-user revocation state.

use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use tracing::debug;
use zeroize::Zeroize;

use crate::bitmap::Bitmap;
use crate::config::{KeyLength, TreeConfig};
use crate::dump::TreeDump;
use crate::error::{Error, Result};
use crate::index;
use crate::key::NodeKey;

/// Node keys of a complete binary tree plus the revocation bitmap of its
/// leaves.
///
/// Node keys live in a single arena of `nodes * key_bytes` bytes in heap
/// order and are never regenerated after construction. The arena is zeroized
/// on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyTree {
    config: TreeConfig,
    allowed_users: Bitmap,
    arena: Vec<u8>,
}

impl KeyTree {
    /// Builds a tree of height `depth` with `key_bits`-bit node keys drawn
    /// from the operating system's secure random source.
    pub fn new(depth: usize, key_bits: usize) -> Result<Self> {
        Self::generate(TreeConfig::new(depth, key_bits)?, &mut OsRng)
    }

    /// Builds a tree whose node keys are drawn from `rng`.
    pub fn generate<R: RngCore + CryptoRng>(config: TreeConfig, rng: &mut R) -> Result<Self> {
        let key_bytes = config.key_length().bytes();
        let mut arena = vec![0u8; config.nodes() * key_bytes];
        for node in arena.chunks_exact_mut(key_bytes) {
            rng.try_fill_bytes(node)?;
        }
        debug!(
            depth = config.depth(),
            key_bits = config.key_length().bits(),
            nodes = config.nodes(),
            "generated key tree"
        );
        Ok(Self {
            config,
            allowed_users: Bitmap::filled(config.users(), true),
            arena,
        })
    }

    /// Reassembles a tree from persisted parts.
    ///
    /// Fails with [`Error::FormatMismatch`] when the bitmap or arena sizes do
    /// not match `config`.
    pub fn from_parts(config: TreeConfig, allowed_users: Bitmap, arena: Vec<u8>) -> Result<Self> {
        if allowed_users.len() != config.users() {
            return Err(Error::FormatMismatch(format!(
                "user bitmap holds {} users, depth {} needs {}",
                allowed_users.len(),
                config.depth(),
                config.users()
            )));
        }
        let expected = config.nodes() * config.key_length().bytes();
        if arena.len() != expected {
            return Err(Error::FormatMismatch(format!(
                "node key area is {} bytes, expected {expected}",
                arena.len()
            )));
        }
        Ok(Self {
            config,
            allowed_users,
            arena,
        })
    }

    /// Shape of the tree.
    pub fn config(&self) -> TreeConfig {
        self.config
    }

    /// Height of the tree.
    pub fn depth(&self) -> usize {
        self.config.depth()
    }

    /// Number of users (leaves).
    pub fn users(&self) -> usize {
        self.config.users()
    }

    /// Number of nodes.
    pub fn nodes(&self) -> usize {
        self.config.nodes()
    }

    /// Size of every node key.
    pub fn key_length(&self) -> KeyLength {
        self.config.key_length()
    }

    /// Stored key of `node`.
    ///
    /// # Panics
    /// If `node` is outside the tree.
    pub fn node_key(&self, node: usize) -> &[u8] {
        assert!(node < self.nodes(), "node {node} outside tree of {} nodes", self.nodes());
        let len = self.config.key_length().bytes();
        &self.arena[node * len..(node + 1) * len]
    }

    /// Owned copy of the stored key of `node`.
    pub fn copy_node_key(&self, node: usize) -> NodeKey {
        NodeKey::from_slice(self.node_key(node))
    }

    /// The whole key arena in heap order.
    pub fn arena(&self) -> &[u8] {
        &self.arena
    }

    /// Fails with [`Error::InvalidUserId`] unless `user < users()`.
    pub fn check_user(&self, user: usize) -> Result<()> {
        if user >= self.users() {
            return Err(Error::InvalidUserId {
                user,
                users: self.users(),
            });
        }
        Ok(())
    }

    /// Leaf node of `user`.
    pub fn leaf(&self, user: usize) -> Result<usize> {
        self.check_user(user)?;
        Ok(index::leaf(self.depth(), user))
    }

    /// Whether `user` may still receive broadcasts.
    pub fn is_allowed(&self, user: usize) -> Result<bool> {
        self.check_user(user)?;
        Ok(self.allowed_users.get(user))
    }

    /// Revocation bitmap, one flag per user, set while allowed.
    pub fn allowed_users(&self) -> &Bitmap {
        &self.allowed_users
    }

    /// Number of revoked users.
    pub fn revoked_count(&self) -> usize {
        self.allowed_users.count_zeros()
    }

    /// Ids of revoked users in ascending order.
    pub fn revoked_users(&self) -> impl Iterator<Item = usize> + '_ {
        self.allowed_users.zeros()
    }

    /// Revokes `user`. Returns `false` if the user was already revoked.
    pub fn deny(&mut self, user: usize) -> Result<bool> {
        self.check_user(user)?;
        let was_allowed = self.allowed_users.get(user);
        self.allowed_users.set(user, false);
        Ok(was_allowed)
    }

    /// Debugging snapshot of every node key and the revoked users.
    ///
    /// Not part of any protocol; meant for printing only.
    pub fn dump(&self) -> TreeDump {
        TreeDump::new(self)
    }
}

impl Drop for KeyTree {
    fn drop(&mut self) {
        self.arena.zeroize();
    }
}

impl core::fmt::Debug for KeyTree {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyTree")
            .field("depth", &self.depth())
            .field("key_length", &self.key_length())
            .field("revoked", &self.revoked_count())
            .field("arena", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    struct FailingRng;

    impl RngCore for FailingRng {
        fn next_u32(&mut self) -> u32 {
            0
        }
        fn next_u64(&mut self) -> u64 {
            0
        }
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0)
        }
        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> core::result::Result<(), rand::Error> {
            Err(rand::Error::new("entropy source offline"))
        }
    }

    impl CryptoRng for FailingRng {}

    #[test]
    fn fresh_trees_have_distinct_keys_of_correct_length() {
        let mut rng = ChaCha20Rng::from_seed([1u8; 32]);
        for depth in 1..=6 {
            for len in KeyLength::ALL {
                let config = TreeConfig::with_key_length(depth, len).unwrap();
                let tree = KeyTree::generate(config, &mut rng).unwrap();
                assert_eq!(tree.nodes(), (1 << (depth + 1)) - 1);
                assert_eq!(tree.arena().len(), tree.nodes() * len.bytes());
                let keys: HashSet<&[u8]> = (0..tree.nodes()).map(|i| tree.node_key(i)).collect();
                assert_eq!(keys.len(), tree.nodes());
                assert!(keys.iter().all(|k| k.len() == len.bytes()));
                assert_eq!(tree.revoked_count(), 0);
                assert!((0..tree.users()).all(|u| tree.is_allowed(u).unwrap()));
            }
        }
    }

    #[test]
    fn os_random_trees_do_not_collide() {
        let a = KeyTree::new(4, 128).unwrap();
        let b = KeyTree::new(4, 128).unwrap();
        let keys: HashSet<&[u8]> = (0..a.nodes())
            .map(|i| a.node_key(i))
            .chain((0..b.nodes()).map(|i| b.node_key(i)))
            .collect();
        assert_eq!(keys.len(), a.nodes() + b.nodes());
    }

    #[test]
    fn rejects_unsupported_key_length() {
        assert!(matches!(
            KeyTree::new(3, 100),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn surfaces_random_source_failure() {
        let config = TreeConfig::new(2, 128).unwrap();
        assert!(matches!(
            KeyTree::generate(config, &mut FailingRng),
            Err(Error::RandomSourceUnavailable(_))
        ));
    }

    #[test]
    fn deny_is_idempotent_and_bounds_checked() {
        let mut tree = KeyTree::new(3, 128).unwrap();
        assert!(tree.deny(5).unwrap());
        assert!(!tree.deny(5).unwrap());
        assert_eq!(tree.revoked_users().collect::<Vec<_>>(), vec![5]);

        let before = tree.clone();
        assert!(matches!(
            tree.deny(8),
            Err(Error::InvalidUserId { user: 8, users: 8 })
        ));
        assert!(tree == before);
    }

    #[test]
    fn single_node_tree() {
        let mut tree = KeyTree::new(0, 256).unwrap();
        assert_eq!((tree.users(), tree.nodes()), (1, 1));
        assert_eq!(tree.leaf(0).unwrap(), 0);
        tree.deny(0).unwrap();
        assert!(!tree.is_allowed(0).unwrap());
    }

    #[test]
    fn from_parts_checks_sizes() {
        let tree = KeyTree::new(2, 128).unwrap();
        let rebuilt = KeyTree::from_parts(
            tree.config(),
            tree.allowed_users().clone(),
            tree.arena().to_vec(),
        )
        .unwrap();
        assert!(rebuilt == tree);
        assert!(matches!(
            KeyTree::from_parts(tree.config(), Bitmap::filled(3, true), tree.arena().to_vec()),
            Err(Error::FormatMismatch(_))
        ));
        assert!(matches!(
            KeyTree::from_parts(tree.config(), tree.allowed_users().clone(), vec![0u8; 5]),
            Err(Error::FormatMismatch(_))
        ));
    }
}
