//! Complete subtree method.
//!
//! Revoking a user disables every key on the path from its leaf to the root.
//! The cover is the set of maximal subtrees whose root key is still enabled.

use std::io::{Read, Write};

use bes_core::{index, Bitmap, Error, KeyTree, Result, TreeConfig};
use rand::{CryptoRng, RngCore};
use tracing::debug;

use crate::bundle::{UserBundle, UserSecrets};
use crate::record::{self, RecordReader};
use crate::scheme::Scheme;
use crate::subset::IndexedKey;

/// Complete subtree broadcast encryption engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Csm {
    tree: KeyTree,
    allowed_keys: Bitmap,
}

impl Csm {
    /// Builds an engine with keys from the OS random source.
    pub fn new(depth: usize, key_bits: usize) -> Result<Self> {
        Ok(Self::from_tree(KeyTree::new(depth, key_bits)?))
    }

    /// Builds an engine with keys drawn from `rng`.
    pub fn generate<R: RngCore + CryptoRng>(config: TreeConfig, rng: &mut R) -> Result<Self> {
        Ok(Self::from_tree(KeyTree::generate(config, rng)?))
    }

    fn from_tree(tree: KeyTree) -> Self {
        let allowed_keys = Bitmap::filled(tree.nodes(), true);
        Self { tree, allowed_keys }
    }

    /// Underlying key tree.
    pub fn tree(&self) -> &KeyTree {
        &self.tree
    }

    /// Per-node flags, set while the node key may appear in a cover.
    pub fn allowed_keys(&self) -> &Bitmap {
        &self.allowed_keys
    }

    /// Revokes `user` and disables every key on its path to the root.
    pub fn deny(&mut self, user: usize) -> Result<()> {
        let leaf = self.tree.leaf(user)?;
        self.tree.deny(user)?;
        for node in index::path_to_root(leaf) {
            self.allowed_keys.set(node, false);
        }
        debug!(user, revoked = self.tree.revoked_count(), "csm user denied");
        Ok(())
    }

    /// Keys `user` must hold, leaf first, root last (`depth + 1` entries).
    ///
    /// Independent of the current revocation state.
    pub fn keys_for_user(&self, user: usize) -> Result<Vec<IndexedKey>> {
        let leaf = self.tree.leaf(user)?;
        Ok(index::path_to_root(leaf)
            .into_iter()
            .map(|node| IndexedKey {
                node,
                key: self.tree.copy_node_key(node),
            })
            .collect())
    }

    /// Provisioning bundle for `user`.
    pub fn bundle(&self, user: usize) -> Result<UserBundle> {
        Ok(UserBundle {
            user,
            depth: self.tree.depth(),
            key_length: self.tree.key_length(),
            secrets: UserSecrets::Csm(self.keys_for_user(user)?),
        })
    }

    /// Minimal set of enabled node keys covering exactly the allowed users.
    pub fn allowed_cover(&self) -> Vec<IndexedKey> {
        let mut cover = Vec::new();
        self.collect_cover(0, &mut cover);
        debug!(
            revoked = self.tree.revoked_count(),
            cover = cover.len(),
            "csm cover computed"
        );
        cover
    }

    fn collect_cover(&self, node: usize, cover: &mut Vec<IndexedKey>) {
        if node >= self.tree.nodes() {
            return;
        }
        if self.allowed_keys.get(node) {
            cover.push(IndexedKey {
                node,
                key: self.tree.copy_node_key(node),
            });
        } else {
            self.collect_cover(index::left(node), cover);
            self.collect_cover(index::right(node), cover);
        }
    }

    /// Writes the `CSM_BES_scheme` record.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        record::write_header(writer, Scheme::Csm, &self.tree)?;
        record::write_bitmap(writer, &self.allowed_keys)?;
        record::write_node_keys(writer, &self.tree)
    }

    /// Serializes the record into a buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.save(&mut bytes).expect("writing into a Vec cannot fail");
        bytes
    }

    /// Parses a `CSM_BES_scheme` record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = RecordReader::new(bytes);
        let (config, users) = reader.header(Scheme::Csm)?;
        let allowed_keys = reader.bitmap(config.nodes(), "key bitmap")?;
        let arena = reader.node_keys(&config)?;
        reader.finish()?;

        let tree = KeyTree::from_parts(config, users, arena)?;
        for user in tree.revoked_users() {
            let leaf = index::leaf(tree.depth(), user);
            if index::path_to_root(leaf).into_iter().any(|n| allowed_keys.get(n)) {
                return Err(Error::FormatMismatch(format!(
                    "revoked user {user} still has enabled keys"
                )));
            }
        }
        for user in 0..tree.users() {
            if allowed_keys.get(index::leaf(tree.depth(), user)) != tree.allowed_users().get(user) {
                return Err(Error::FormatMismatch(format!(
                    "leaf flag of user {user} disagrees with the user bitmap"
                )));
            }
        }
        Ok(Self { tree, allowed_keys })
    }

    /// Reads a record from `reader`.
    pub fn load<R: Read>(reader: &mut R) -> Result<Self> {
        Self::from_bytes(&record::read_all(reader)?)
    }

    /// Replaces this engine's state with the record read from `reader`.
    ///
    /// On error the current state is left untouched.
    pub fn restore<R: Read>(&mut self, reader: &mut R) -> Result<()> {
        *self = Self::load(reader)?;
        Ok(())
    }
}
