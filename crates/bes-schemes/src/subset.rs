//! Cover and provisioning entries returned to callers.

use bes_core::index;
use bes_core::NodeKey;
use serde::{Deserialize, Serialize};

/// Subset-difference identifier: the leaves under `high` minus the leaves
/// under `low`, or the whole subtree under `high` when both are equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeySubset {
    /// Root of the enclosing subtree.
    pub high: usize,
    /// Root of the excluded subtree.
    pub low: usize,
}

impl KeySubset {
    /// Every user of the tree; addresses the all-users key.
    pub const ALL_USERS: KeySubset = KeySubset { high: 0, low: 0 };

    /// Creates the subset `high \ low`.
    pub const fn new(high: usize, low: usize) -> Self {
        Self { high, low }
    }

    /// Whether the subset is a whole subtree rather than a difference.
    pub const fn is_whole_subtree(&self) -> bool {
        self.high == self.low
    }

    /// Whether `user`'s leaf belongs to the subset in a tree of height `depth`.
    pub fn contains_user(&self, depth: usize, user: usize) -> bool {
        let leaf = index::leaf(depth, user);
        index::is_ancestor_or_self(self.high, leaf)
            && (self.is_whole_subtree() || !index::is_ancestor_or_self(self.low, leaf))
    }

    /// Users in the subset, ascending.
    pub fn users(&self, depth: usize) -> Vec<usize> {
        let all = index::users_under(depth, self.high);
        if self.is_whole_subtree() {
            return all.collect();
        }
        let excluded = index::users_under(depth, self.low);
        all.filter(|u| !excluded.contains(u)).collect()
    }
}

/// A node index with a copy of its key, as used by the complete subtree
/// method.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedKey {
    /// Heap index of the node.
    pub node: usize,
    /// Copy of the node key.
    pub key: NodeKey,
}

/// A subset-difference cover element with its key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsetKey {
    /// Subset the key is valid for.
    pub subset: KeySubset,
    /// Key of the subset.
    pub key: NodeKey,
}

/// Provisioned subset-difference secret held by a user.
///
/// `label` lets the holder derive the key of any subset `(high, j)` with `j`
/// below `subset.low`. The all-users entry carries no label.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsetLabel {
    /// Subset the key is valid for.
    pub subset: KeySubset,
    /// Label of `(subset.high, subset.low)`.
    pub label: Option<NodeKey>,
    /// Key of the subset.
    pub key: NodeKey,
}
