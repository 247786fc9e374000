//! Heap-order index arithmetic for complete binary trees.
//!
//! Node 0 is the root; the children of `i` are `2i + 1` and `2i + 2`. In a
//! tree of depth `d` the leaf of user `k` sits at `2^d - 1 + k`.

use core::ops::Range;

use serde::{Deserialize, Serialize};

/// Direction taken when descending from a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Branch {
    /// Towards `2i + 1`.
    Left,
    /// Towards `2i + 2`.
    Right,
}

impl Branch {
    /// The other direction.
    pub const fn flip(self) -> Self {
        match self {
            Branch::Left => Branch::Right,
            Branch::Right => Branch::Left,
        }
    }
}

/// Parent of a non-root node.
#[inline]
pub const fn father(index: usize) -> usize {
    assert!(index > 0, "the root has no father");
    if index % 2 == 0 {
        (index - 1) / 2
    } else {
        index / 2
    }
}

/// Left child.
#[inline]
pub const fn left(index: usize) -> usize {
    index * 2 + 1
}

/// Right child.
#[inline]
pub const fn right(index: usize) -> usize {
    index * 2 + 2
}

/// Child of `index` in direction `branch`.
#[inline]
pub const fn child(index: usize, branch: Branch) -> usize {
    match branch {
        Branch::Left => left(index),
        Branch::Right => right(index),
    }
}

/// Which side of its father a non-root node hangs on.
#[inline]
pub const fn side(index: usize) -> Branch {
    assert!(index > 0, "the root has no side");
    if index % 2 == 1 {
        Branch::Left
    } else {
        Branch::Right
    }
}

/// Sibling of a non-root node.
#[inline]
pub const fn sibling(index: usize) -> usize {
    match side(index) {
        Branch::Left => index + 1,
        Branch::Right => index - 1,
    }
}

/// Level of a node, the root being level 0.
#[inline]
pub const fn level(index: usize) -> usize {
    (usize::BITS - 1 - (index + 1).leading_zeros()) as usize
}

/// Node indices on `level`.
#[inline]
pub const fn level_range(level: usize) -> Range<usize> {
    ((1 << level) - 1)..((1 << (level + 1)) - 1)
}

/// Leaf node of `user` in a tree of height `depth`.
#[inline]
pub const fn leaf(depth: usize, user: usize) -> usize {
    (1 << depth) - 1 + user
}

/// Whether `ancestor` lies on the path from `node` to the root (inclusive).
pub fn is_ancestor_or_self(ancestor: usize, mut node: usize) -> bool {
    while node > ancestor {
        node = father(node);
    }
    node == ancestor
}

/// Branches taken walking down from `ancestor` to `node`, top first.
///
/// Empty when `node == ancestor`.
pub fn branches_between(ancestor: usize, mut node: usize) -> Vec<Branch> {
    assert!(
        is_ancestor_or_self(ancestor, node),
        "{ancestor} is not an ancestor of {node}"
    );
    let mut branches = Vec::with_capacity(level(node) - level(ancestor));
    while node != ancestor {
        branches.push(side(node));
        node = father(node);
    }
    branches.reverse();
    branches
}

/// Users whose leaves hang below `node` in a tree of height `depth`.
pub fn users_under(depth: usize, node: usize) -> Range<usize> {
    let node_level = level(node);
    assert!(node_level <= depth, "node {node} is below the leaves");
    let span = 1 << (depth - node_level);
    let first_leaf = (node + 1) * span - 1;
    let first_user = first_leaf - ((1 << depth) - 1);
    first_user..first_user + span
}

/// Path from `node` up to the root, `node` first.
pub fn path_to_root(mut node: usize) -> Vec<usize> {
    let mut path = Vec::with_capacity(level(node) + 1);
    path.push(node);
    while node > 0 {
        node = father(node);
        path.push(node);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn father_inverts_children() {
        for i in 0..200 {
            assert_eq!(father(left(i)), i);
            assert_eq!(father(right(i)), i);
            assert_eq!(child(i, Branch::Left), left(i));
            assert_eq!(child(i, Branch::Right), right(i));
        }
    }

    #[test]
    fn sides_and_siblings() {
        assert_eq!(side(1), Branch::Left);
        assert_eq!(side(2), Branch::Right);
        assert_eq!(sibling(5), 6);
        assert_eq!(sibling(6), 5);
        assert_eq!(Branch::Left.flip(), Branch::Right);
    }

    #[test]
    fn levels_partition_the_heap() {
        assert_eq!(level(0), 0);
        assert_eq!(level(1), 1);
        assert_eq!(level(2), 1);
        assert_eq!(level(3), 2);
        assert_eq!(level(14), 3);
        assert_eq!(level_range(0), 0..1);
        assert_eq!(level_range(3), 7..15);
        for l in 0..6 {
            for i in level_range(l) {
                assert_eq!(level(i), l);
            }
        }
    }

    #[test]
    fn leaves_and_user_ranges() {
        assert_eq!(leaf(0, 0), 0);
        assert_eq!(leaf(3, 0), 7);
        assert_eq!(leaf(3, 7), 14);
        assert_eq!(users_under(3, 0), 0..8);
        assert_eq!(users_under(3, 2), 4..8);
        assert_eq!(users_under(3, 4), 2..4);
        assert_eq!(users_under(3, 11), 4..5);
        assert_eq!(users_under(0, 0), 0..1);
    }

    #[test]
    fn ancestry() {
        assert!(is_ancestor_or_self(0, 13));
        assert!(is_ancestor_or_self(2, 13));
        assert!(is_ancestor_or_self(13, 13));
        assert!(!is_ancestor_or_self(1, 13));
        assert!(!is_ancestor_or_self(13, 2));
        assert_eq!(path_to_root(11), vec![11, 5, 2, 0]);
        assert_eq!(branches_between(2, 11), vec![Branch::Left, Branch::Left]);
        assert_eq!(branches_between(0, 13), vec![Branch::Right, Branch::Right, Branch::Left]);
        assert!(branches_between(4, 4).is_empty());
        assert_eq!(path_to_root(0), vec![0]);
    }
}
