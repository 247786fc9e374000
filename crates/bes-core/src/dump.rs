//! Human-readable snapshot of a key tree, for debugging.

use core::fmt;

use crate::tree::KeyTree;

/// Printable copy of a tree's node keys and revoked users.
pub struct TreeDump {
    depth: usize,
    users: usize,
    nodes: Vec<String>,
    revoked: Vec<usize>,
}

impl TreeDump {
    pub(crate) fn new(tree: &KeyTree) -> Self {
        Self {
            depth: tree.depth(),
            users: tree.users(),
            nodes: (0..tree.nodes())
                .map(|i| hex::encode(tree.node_key(i)))
                .collect(),
            revoked: tree.revoked_users().collect(),
        }
    }

    /// Ids of revoked users.
    pub fn revoked(&self) -> &[usize] {
        &self.revoked
    }
}

impl fmt::Display for TreeDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "depth {} with {} users", self.depth, self.users)?;
        for (index, key) in self.nodes.iter().enumerate() {
            writeln!(f, "node {index:>5}: {key}")?;
        }
        if self.revoked.is_empty() {
            return writeln!(f, "no users revoked");
        }
        for user in &self.revoked {
            writeln!(
                f,
                "user {user} at leaf {} is revoked",
                user + self.users - 1
            )?;
        }
        Ok(())
    }
}
