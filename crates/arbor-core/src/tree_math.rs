//! Index arithmetic over a complete binary tree stored as a flat array.
//!
//! Leaves sit at even indices, parents at odd ones. A tree with `n` leaves
//! (`n` a power of two) has `2n - 1` nodes and its root at `2^k - 1` where
//! `k = log2(n)`. Every function here is pure and allocation free except
//! the path builders.
//!
//! ```text
//!                    X(7)
//!            X(3)              X(11)
//!        X(1)    X(5)      X(9)    X(13)
//!       0   2   4   6     8   10  12   14
//! ```

use std::fmt;

/// Index of any node in the flat array.
pub type NodeIndex = u32;

/// Index of a leaf among the leaves (node index divided by two).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeafIndex(pub u32);

impl LeafIndex {
    /// Flat-array position of this leaf.
    pub fn node(self) -> NodeIndex {
        self.0 * 2
    }

    /// Leaf at a node position, `None` for parents.
    pub fn from_node(node: NodeIndex) -> Option<Self> {
        (node % 2 == 0).then_some(Self(node / 2))
    }
}

impl fmt::Display for LeafIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Height of a node above the leaves: the number of trailing one bits.
pub fn level(node: NodeIndex) -> u32 {
    node.trailing_ones()
}

/// True for leaf positions.
pub fn is_leaf(node: NodeIndex) -> bool {
    node % 2 == 0
}

/// Number of nodes in a tree with `leaves` leaves.
pub fn node_width(leaves: u32) -> u32 {
    if leaves == 0 { 0 } else { 2 * (leaves - 1) + 1 }
}

/// Root of a tree with `leaves` leaves.
///
/// # Invariants
///
/// `leaves` is a non-zero power of two.
pub fn root(leaves: u32) -> NodeIndex {
    debug_assert!(leaves.is_power_of_two(), "leaf count {leaves} is not a power of two");
    let width = node_width(leaves);
    (1 << width.ilog2()) - 1
}

/// Left child, `None` for leaves.
pub fn left(node: NodeIndex) -> Option<NodeIndex> {
    let k = level(node);
    (k > 0).then(|| node ^ (1 << (k - 1)))
}

/// Right child, `None` for leaves.
pub fn right(node: NodeIndex) -> Option<NodeIndex> {
    let k = level(node);
    (k > 0).then(|| node ^ (3 << (k - 1)))
}

/// Parent, `None` for the root.
pub fn parent(node: NodeIndex, leaves: u32) -> Option<NodeIndex> {
    if node == root(leaves) {
        return None;
    }
    let k = level(node);
    let b = (node >> (k + 1)) & 1;
    Some((node | (1 << k)) ^ (b << (k + 1)))
}

/// The other child of this node's parent, `None` for the root.
pub fn sibling(node: NodeIndex, leaves: u32) -> Option<NodeIndex> {
    let p = parent(node, leaves)?;
    if node < p { right(p) } else { left(p) }
}

/// Ancestors from the parent up to and including the root.
pub fn direct_path(node: NodeIndex, leaves: u32) -> Vec<NodeIndex> {
    let mut path = Vec::with_capacity(leaves.ilog2() as usize);
    let mut current = node;
    while let Some(p) = parent(current, leaves) {
        path.push(p);
        current = p;
    }
    path
}

/// Siblings of the node and of each ancestor below the root.
pub fn copath(node: NodeIndex, leaves: u32) -> Vec<NodeIndex> {
    let mut path = Vec::with_capacity(leaves.ilog2() as usize);
    let mut current = node;
    while let Some(s) = sibling(current, leaves) {
        path.push(s);
        current = parent(current, leaves).unwrap_or(current);
    }
    path
}

/// First and last node index covered by the subtree rooted at `node`.
pub fn subtree_span(node: NodeIndex) -> (NodeIndex, NodeIndex) {
    let half = (1u32 << level(node)) - 1;
    (node - half, node + half)
}

/// True if `node` lies in the subtree rooted at `ancestor` (inclusive).
pub fn is_in_subtree(ancestor: NodeIndex, node: NodeIndex) -> bool {
    let (lo, hi) = subtree_span(ancestor);
    (lo..=hi).contains(&node)
}

/// Lowest node whose subtree contains both `x` and `y`.
pub fn common_ancestor(x: NodeIndex, y: NodeIndex) -> NodeIndex {
    let (lx, ly) = (level(x) + 1, level(y) + 1);
    if lx <= ly && x >> ly == y >> ly {
        return y;
    }
    if ly <= lx && x >> lx == y >> lx {
        return x;
    }

    let (mut xn, mut yn, mut k) = (x, y, 0u32);
    while xn != yn {
        xn >>= 1;
        yn >>= 1;
        k += 1;
    }
    (xn << k) + (1 << (k - 1)) - 1
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn eight_leaf_tree_layout() {
        assert_eq!(root(8), 7);
        assert_eq!(root(1), 0);
        assert_eq!(root(2), 1);
        assert_eq!(node_width(8), 15);

        assert_eq!(left(7), Some(3));
        assert_eq!(right(7), Some(11));
        assert_eq!(left(0), None);
        assert_eq!(parent(5, 8), Some(3));
        assert_eq!(parent(7, 8), None);
        assert_eq!(sibling(4, 8), Some(6));
        assert_eq!(sibling(11, 8), Some(3));
    }

    #[test]
    fn paths_of_leaf_two() {
        assert_eq!(direct_path(2, 8), vec![1, 3, 7]);
        assert_eq!(copath(2, 8), vec![0, 5, 11]);
        assert_eq!(direct_path(0, 1), Vec::<u32>::new());
    }

    #[test]
    fn common_ancestors() {
        assert_eq!(common_ancestor(0, 2), 1);
        assert_eq!(common_ancestor(0, 14), 7);
        assert_eq!(common_ancestor(4, 6), 5);
        assert_eq!(common_ancestor(8, 8), 8);
        assert_eq!(common_ancestor(3, 2), 3);
    }

    #[test]
    fn leaf_index_conversion() {
        assert_eq!(LeafIndex(3).node(), 6);
        assert_eq!(LeafIndex::from_node(6), Some(LeafIndex(3)));
        assert_eq!(LeafIndex::from_node(5), None);
    }

    proptest! {
        #[test]
        fn children_point_back_to_parent(exp in 1u32..12, seed in any::<u32>()) {
            let leaves = 1u32 << exp;
            let node = seed % node_width(leaves);
            if let (Some(l), Some(r)) = (left(node), right(node)) {
                prop_assert_eq!(parent(l, leaves), Some(node));
                prop_assert_eq!(parent(r, leaves), Some(node));
                prop_assert_eq!(sibling(l, leaves), Some(r));
            }
        }

        #[test]
        fn direct_path_ends_at_root(exp in 0u32..12, seed in any::<u32>()) {
            let leaves = 1u32 << exp;
            let leaf = (seed % leaves) * 2;
            let path = direct_path(leaf, leaves);
            prop_assert_eq!(path.len() as u32, exp);
            prop_assert_eq!(copath(leaf, leaves).len(), path.len());
            if let Some(last) = path.last() {
                prop_assert_eq!(*last, root(leaves));
            }
            for ancestor in path {
                prop_assert!(is_in_subtree(ancestor, leaf));
            }
        }

        #[test]
        fn common_ancestor_contains_both(exp in 1u32..12, a in any::<u32>(), b in any::<u32>()) {
            let leaves = 1u32 << exp;
            let (x, y) = ((a % leaves) * 2, (b % leaves) * 2);
            let ancestor = common_ancestor(x, y);
            prop_assert!(is_in_subtree(ancestor, x));
            prop_assert!(is_in_subtree(ancestor, y));
        }
    }
}
