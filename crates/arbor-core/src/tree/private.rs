//! Private keys a member holds for its own leaf and direct path.

use std::collections::BTreeMap;

use arbor_crypto::HpkeSecretKey;

use super::RatchetTree;
use crate::tree_math::{self, LeafIndex, NodeIndex};

/// HPKE private keys for the member's leaf and the parents it knows.
///
/// # Invariants
///
/// After [`TreePrivate::purge`] only keys for non-blank nodes on the
/// member's own leaf and direct path remain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreePrivate {
    leaf: LeafIndex,
    keys: BTreeMap<NodeIndex, HpkeSecretKey>,
}

impl TreePrivate {
    /// Private state holding only the leaf key.
    pub fn new(leaf: LeafIndex, leaf_key: HpkeSecretKey) -> Self {
        let mut keys = BTreeMap::new();
        keys.insert(leaf.node(), leaf_key);
        Self { leaf, keys }
    }

    /// Own leaf index.
    pub fn leaf_index(&self) -> LeafIndex {
        self.leaf
    }

    /// Key for a node, if held.
    pub fn key(&self, node: NodeIndex) -> Option<&HpkeSecretKey> {
        self.keys.get(&node)
    }

    /// Nodes a key is held for, ascending.
    pub fn nodes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.keys.keys().copied()
    }

    /// Install keys; new keys replace old ones for the same node.
    pub fn merge(&mut self, keys: impl IntoIterator<Item = (NodeIndex, HpkeSecretKey)>) {
        self.keys.extend(keys);
    }

    /// Drop keys for blank nodes and for nodes off the direct path.
    pub fn purge(&mut self, tree: &RatchetTree) {
        let own = self.leaf.node();
        let path = tree_math::direct_path(own, tree.leaf_count());
        self.keys
            .retain(|node, _| (*node == own || path.contains(node)) && !tree.is_blank(*node));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::test_support::leaf;

    #[test]
    fn purge_keeps_only_occupied_direct_path() {
        let mut tree = RatchetTree::new(leaf(0));
        tree.add_leaf(leaf(1));
        tree.add_leaf(leaf(2));

        let mut private = TreePrivate::new(LeafIndex(0), HpkeSecretKey::new(vec![1; 32]));
        private.merge([
            (1, HpkeSecretKey::new(vec![2; 32])),
            (5, HpkeSecretKey::new(vec![3; 32])),
        ]);
        private.purge(&tree);

        // node 1 is blank, node 5 is off the path
        assert_eq!(private.nodes().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn merge_replaces_existing_key() {
        let mut private = TreePrivate::new(LeafIndex(1), HpkeSecretKey::new(vec![1; 32]));
        private.merge([(2, HpkeSecretKey::new(vec![9; 32]))]);
        assert_eq!(private.key(2).unwrap().as_bytes(), &[9; 32]);
    }
}
