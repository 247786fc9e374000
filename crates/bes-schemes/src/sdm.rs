//! Subset difference method.
//!
//! Only subtree roots hold stored labels. The label of a pair `(i, j)` with
//! `j` below `i` is obtained by chaining [`derive_triplet`] from the stored
//! key of `i` along the path to `j`, taking the left or right segment at
//! every step; the key of the subset `i \ j` is the middle segment of one
//! more derivation from that label.
//!
//! Revocation only flips the user's bit. The cover is computed on demand by
//! marking the Steiner tree of the revoked leaves bottom-up and emitting a
//! subset wherever a frontier of semi-operative nodes is consumed.

use std::io::{Read, Write};

use bes_core::{derive_triplet, index, Branch, KeyTree, NodeKey, Result, TreeConfig};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use tracing::{debug, trace};

use crate::bundle::{UserBundle, UserSecrets};
use crate::record::{self, RecordReader};
use crate::scheme::Scheme;
use crate::subset::{KeySubset, SubsetKey, SubsetLabel};

/// Size of the key used when nobody is revoked.
pub const ALL_USERS_KEY_BYTES: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mark {
    Operative,
    Denied,
    SemiOperative,
}

/// Subset difference broadcast encryption engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sdm {
    tree: KeyTree,
    all_users_key: NodeKey,
}

impl Sdm {
    /// Builds an engine with keys from the OS random source.
    pub fn new(depth: usize, key_bits: usize) -> Result<Self> {
        Self::generate(TreeConfig::new(depth, key_bits)?, &mut OsRng)
    }

    /// Builds an engine with keys drawn from `rng`.
    pub fn generate<R: RngCore + CryptoRng>(config: TreeConfig, rng: &mut R) -> Result<Self> {
        let tree = KeyTree::generate(config, rng)?;
        let mut all_users = vec![0u8; ALL_USERS_KEY_BYTES];
        rng.try_fill_bytes(&mut all_users)?;
        Ok(Self {
            tree,
            all_users_key: NodeKey::from(all_users),
        })
    }

    /// Underlying key tree.
    pub fn tree(&self) -> &KeyTree {
        &self.tree
    }

    /// Key handed out when no user is revoked.
    pub fn all_users_key(&self) -> &NodeKey {
        &self.all_users_key
    }

    /// Revokes `user`. Only the revocation bitmap changes.
    pub fn deny(&mut self, user: usize) -> Result<()> {
        self.tree.deny(user)?;
        debug!(user, revoked = self.tree.revoked_count(), "sdm user denied");
        Ok(())
    }

    /// Secrets `user` must hold: for each ancestor of its leaf (deepest
    /// first) and each step down towards the leaf, the label and key of the
    /// ancestor minus the branch not taken; then the all-users key.
    ///
    /// Yields `depth * (depth + 1) / 2 + 1` entries.
    pub fn keys_for_user(&self, user: usize) -> Result<Vec<SubsetLabel>> {
        let leaf = self.tree.leaf(user)?;
        let path = index::path_to_root(leaf);
        let mut secrets = Vec::with_capacity(path.len() * (path.len() - 1) / 2 + 1);

        for (height, &ancestor) in path.iter().enumerate().skip(1) {
            let mut label = self.tree.copy_node_key(ancestor);
            for &next in path[..height].iter().rev() {
                let taken = index::side(next);
                let triplet = derive_triplet(label.as_bytes())?;
                let off_path = triplet.child_label(taken.flip());
                let key = derive_triplet(off_path.as_bytes())?.subset_key();
                secrets.push(SubsetLabel {
                    subset: KeySubset::new(ancestor, index::sibling(next)),
                    label: Some(off_path),
                    key,
                });
                label = triplet.child_label(taken);
            }
        }
        secrets.push(SubsetLabel {
            subset: KeySubset::ALL_USERS,
            label: None,
            key: self.all_users_key.clone(),
        });
        Ok(secrets)
    }

    /// Provisioning bundle for `user`.
    pub fn bundle(&self, user: usize) -> Result<UserBundle> {
        Ok(UserBundle {
            user,
            depth: self.tree.depth(),
            key_length: self.tree.key_length(),
            secrets: UserSecrets::Sdm(self.keys_for_user(user)?),
        })
    }

    /// Disjoint subsets whose union is exactly the allowed users.
    pub fn allowed_cover(&self) -> Result<Vec<SubsetKey>> {
        if self.tree.revoked_count() == 0 {
            return Ok(vec![SubsetKey {
                subset: KeySubset::ALL_USERS,
                key: self.all_users_key.clone(),
            }]);
        }

        let depth = self.tree.depth();
        let mut marks = vec![Mark::Denied; self.tree.nodes()];
        for (user, allowed) in self.tree.allowed_users().iter().enumerate() {
            marks[index::leaf(depth, user)] = if allowed {
                Mark::Operative
            } else {
                Mark::Denied
            };
        }

        let mut cover = Vec::new();
        for level in (0..depth).rev() {
            for node in index::level_range(level) {
                let (left, right) = (index::left(node), index::right(node));
                let mark = match (marks[left], marks[right]) {
                    (Mark::Operative, Mark::Operative) => Mark::Operative,
                    (Mark::Denied, Mark::Denied) => Mark::Denied,
                    (Mark::Denied, Mark::Operative)
                    | (Mark::Operative, Mark::Denied)
                    | (Mark::SemiOperative, Mark::Operative)
                    | (Mark::Operative, Mark::SemiOperative) => Mark::SemiOperative,
                    (Mark::SemiOperative, Mark::Denied) => {
                        cover.push(self.resolve_subset(left, &marks)?);
                        Mark::Denied
                    }
                    (Mark::Denied, Mark::SemiOperative) => {
                        cover.push(self.resolve_subset(right, &marks)?);
                        Mark::Denied
                    }
                    (Mark::SemiOperative, Mark::SemiOperative) => {
                        cover.push(self.resolve_subset(left, &marks)?);
                        cover.push(self.resolve_subset(right, &marks)?);
                        Mark::Denied
                    }
                };
                marks[node] = mark;
            }
        }
        if marks[0] == Mark::SemiOperative {
            cover.push(self.resolve_subset(0, &marks)?);
        }

        debug!(
            revoked = self.tree.revoked_count(),
            cover = cover.len(),
            "sdm cover computed"
        );
        Ok(cover)
    }

    /// Walks from a semi-operative `frontier` down its chain of
    /// semi-operative nodes to the denied node closing it.
    fn resolve_subset(&self, frontier: usize, marks: &[Mark]) -> Result<SubsetKey> {
        let mut node = frontier;
        let mut label = self.tree.copy_node_key(frontier);
        while marks[node] != Mark::Denied {
            let branch = [Branch::Left, Branch::Right]
                .into_iter()
                .find(|&b| marks[index::child(node, b)] == Mark::SemiOperative)
                .or_else(|| {
                    [Branch::Left, Branch::Right]
                        .into_iter()
                        .find(|&b| marks[index::child(node, b)] == Mark::Denied)
                })
                .expect("a semi-operative node has a non-operative child");
            label = derive_triplet(label.as_bytes())?.child_label(branch);
            node = index::child(node, branch);
        }
        let subset = KeySubset::new(frontier, node);
        trace!(high = subset.high, low = subset.low, "resolved subset");
        Ok(SubsetKey {
            subset,
            key: derive_triplet(label.as_bytes())?.subset_key(),
        })
    }

    /// Writes the `SDM_BES_scheme` record, with the all-users key appended
    /// after the node keys.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        record::write_header(writer, Scheme::Sdm, &self.tree)?;
        record::write_node_keys(writer, &self.tree)?;
        writer.write_all(self.all_users_key.as_bytes())?;
        Ok(())
    }

    /// Serializes the record into a buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.save(&mut bytes).expect("writing into a Vec cannot fail");
        bytes
    }

    /// Parses an `SDM_BES_scheme` record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = RecordReader::new(bytes);
        let (config, users) = reader.header(Scheme::Sdm)?;
        let arena = reader.node_keys(&config)?;
        let all_users_key = NodeKey::from_slice(reader.raw(ALL_USERS_KEY_BYTES, "all-users key")?);
        reader.finish()?;
        Ok(Self {
            tree: KeyTree::from_parts(config, users, arena)?,
            all_users_key,
        })
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

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};

    use bes_core::{drbg, Error, KeyLength};
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    fn engine(depth: usize, seed: u8) -> Sdm {
        let config = TreeConfig::new(depth, 128).unwrap();
        Sdm::generate(config, &mut ChaCha20Rng::from_seed([seed; 32])).unwrap()
    }

    fn subset_key_by_hand(sdm: &Sdm, subset: KeySubset) -> NodeKey {
        let path = index::branches_between(subset.high, subset.low);
        let label = drbg::descend(sdm.tree().node_key(subset.high), path).unwrap();
        derive_triplet(label.as_bytes()).unwrap().subset_key()
    }

    #[test]
    fn unrevoked_cover_is_the_all_users_key() {
        let sdm = engine(4, 1);
        let cover = sdm.allowed_cover().unwrap();
        assert_eq!(cover.len(), 1);
        assert_eq!(cover[0].subset, KeySubset::ALL_USERS);
        assert_eq!(&cover[0].key, sdm.all_users_key());
        assert_eq!(sdm.all_users_key().len(), ALL_USERS_KEY_BYTES);
    }

    #[test]
    fn single_revocation_is_one_difference_from_the_root() {
        for depth in 1..=5 {
            let users = 1usize << depth;
            for user in [0, users / 2, users - 1] {
                let mut sdm = engine(depth, 2);
                sdm.deny(user).unwrap();
                let cover = sdm.allowed_cover().unwrap();
                assert_eq!(cover.len(), 1);
                let subset = cover[0].subset;
                assert_eq!(subset, KeySubset::new(0, index::leaf(depth, user)));
                let expected: Vec<usize> = (0..users).filter(|&u| u != user).collect();
                assert_eq!(subset.users(depth), expected);
                assert_eq!(cover[0].key, subset_key_by_hand(&sdm, subset));
            }
        }
    }

    #[test]
    fn sibling_revocations_close_at_their_father() {
        // depth 3: users 0 and 1 share father 3
        let mut sdm = engine(3, 3);
        sdm.deny(0).unwrap();
        sdm.deny(1).unwrap();
        let cover = sdm.allowed_cover().unwrap();
        assert_eq!(
            cover.iter().map(|e| e.subset).collect::<Vec<_>>(),
            vec![KeySubset::new(0, 3)]
        );
    }

    #[test]
    fn frontiers_meeting_emit_two_subsets() {
        // depth 2: users 0 and 3 revoked, both children of the root are semi-operative
        let mut sdm = engine(2, 4);
        sdm.deny(0).unwrap();
        sdm.deny(3).unwrap();
        let cover = sdm.allowed_cover().unwrap();
        let subsets: Vec<KeySubset> = cover.iter().map(|e| e.subset).collect();
        assert_eq!(subsets, vec![KeySubset::new(1, 3), KeySubset::new(2, 6)]);
        for entry in &cover {
            assert_eq!(entry.key, subset_key_by_hand(&sdm, entry.subset));
        }
    }

    #[test]
    fn revoking_everyone_empties_the_cover() {
        let mut sdm = engine(2, 5);
        for user in 0..4 {
            sdm.deny(user).unwrap();
        }
        assert!(sdm.allowed_cover().unwrap().is_empty());
    }

    #[test]
    fn depth_zero_tree() {
        let mut sdm = engine(0, 6);
        assert_eq!(sdm.allowed_cover().unwrap()[0].subset, KeySubset::ALL_USERS);
        let secrets = sdm.keys_for_user(0).unwrap();
        assert_eq!(secrets.len(), 1);
        assert_eq!(secrets[0].subset, KeySubset::ALL_USERS);
        sdm.deny(0).unwrap();
        assert!(sdm.allowed_cover().unwrap().is_empty());
    }

    #[test]
    fn provisioning_enumerates_every_hanging_subset() {
        let sdm = engine(3, 7);
        // user 5 sits at leaf 12, path 12 -> 5 -> 2 -> 0
        let secrets = sdm.keys_for_user(5).unwrap();
        assert_eq!(secrets.len(), 3 * 4 / 2 + 1);
        let subsets: Vec<KeySubset> = secrets.iter().map(|s| s.subset).collect();
        assert_eq!(
            subsets,
            vec![
                KeySubset::new(5, 11),
                KeySubset::new(2, 6),
                KeySubset::new(2, 11),
                KeySubset::new(0, 1),
                KeySubset::new(0, 6),
                KeySubset::new(0, 11),
                KeySubset::ALL_USERS,
            ]
        );
        for secret in &secrets[..6] {
            assert_eq!(secret.key, subset_key_by_hand(&sdm, secret.subset));
            let label = secret.label.as_ref().unwrap();
            assert_eq!(
                label,
                &drbg::descend(
                    sdm.tree().node_key(secret.subset.high),
                    index::branches_between(secret.subset.high, secret.subset.low)
                )
                .unwrap()
            );
            assert!(secret.subset.contains_user(3, 5));
        }
    }

    #[test]
    fn provisioning_ignores_revocation_state() {
        let mut sdm = engine(3, 8);
        let before = sdm.keys_for_user(2).unwrap();
        sdm.deny(2).unwrap();
        sdm.deny(6).unwrap();
        assert_eq!(sdm.keys_for_user(2).unwrap(), before);
    }

    #[test]
    fn out_of_range_users_are_rejected_without_mutation() {
        let mut sdm = engine(3, 9);
        let before = sdm.clone();
        assert!(matches!(sdm.deny(8), Err(Error::InvalidUserId { .. })));
        assert!(matches!(
            sdm.keys_for_user(8),
            Err(Error::InvalidUserId { .. })
        ));
        assert_eq!(sdm, before);
    }

    #[test]
    fn record_round_trip_for_every_key_length() {
        for len in KeyLength::ALL {
            let config = TreeConfig::with_key_length(4, len).unwrap();
            let mut sdm = Sdm::generate(config, &mut ChaCha20Rng::from_seed([10u8; 32])).unwrap();
            sdm.deny(9).unwrap();
            let bytes = sdm.to_bytes();
            assert_eq!(
                bytes.len(),
                20 + 8 + 8 + 8 + 2 + 31 * len.bytes() + ALL_USERS_KEY_BYTES
            );
            let mut target = engine(2, 11);
            target.restore(&mut bytes.as_slice()).unwrap();
            assert_eq!(target, sdm);
            assert_eq!(target.allowed_cover().unwrap(), sdm.allowed_cover().unwrap());
        }
    }

    #[test]
    fn to_bytes_matches_streamed_record() {
        let mut sdm = engine(3, 16);
        sdm.deny(6).unwrap();
        let mut streamed = Vec::new();
        sdm.save(&mut streamed).unwrap();
        assert_eq!(sdm.to_bytes(), streamed);
    }

    #[test]
    fn garbled_tag_leaves_target_unchanged() {
        let mut bytes = engine(3, 12).to_bytes();
        bytes[3] ^= 0x20;
        let mut target = engine(3, 13);
        let before = target.clone();
        assert!(matches!(
            target.restore(&mut bytes.as_slice()),
            Err(Error::FormatMismatch(_))
        ));
        assert_eq!(target, before);

        let truncated = engine(3, 14).to_bytes();
        assert!(matches!(
            target.restore(&mut &truncated[..truncated.len() - 1]),
            Err(Error::FormatMismatch(_))
        ));
        assert_eq!(target, before);
    }

    proptest! {
        #[test]
        fn cover_partitions_the_allowed_users(
            depth in 1usize..=6,
            picks in proptest::collection::vec(any::<usize>(), 1..24),
        ) {
            let mut sdm = engine(depth, 15);
            let users = sdm.tree().users();
            let revoked: BTreeSet<usize> = picks.into_iter().map(|p| p % users).collect();
            for &user in &revoked {
                sdm.deny(user).unwrap();
            }
            let cover = sdm.allowed_cover().unwrap();

            let mut owners: HashMap<usize, KeySubset> = HashMap::new();
            for entry in &cover {
                prop_assert!(!entry.subset.is_whole_subtree());
                prop_assert_eq!(&entry.key, &subset_key_by_hand(&sdm, entry.subset));
                for user in entry.subset.users(depth) {
                    prop_assert!(owners.insert(user, entry.subset).is_none());
                }
            }
            let covered: BTreeSet<usize> = owners.keys().copied().collect();
            let expected: BTreeSet<usize> = (0..users).filter(|u| !revoked.contains(u)).collect();
            prop_assert_eq!(covered, expected);
        }
    }
}
