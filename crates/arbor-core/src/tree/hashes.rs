//! Tree hash and parent hash (RFC 9420 sections 7.8 and 7.9).
//!
//! Subtree hashes are computed bottom-up one level at a time over the span of
//! the subtree, so cost is linear in the subtree width and stack use is
//! constant.

use arbor_crypto::CipherSuiteProvider;
use arbor_proto::{Node, ParentNode, codec::write_vl};
use tls_codec::Serialize;

use super::RatchetTree;
use crate::{
    error::{MlsError, VerificationError},
    tree_math::{self, LeafIndex, NodeIndex},
};

const LEAF_NODE_TYPE: u8 = 1;
const PARENT_NODE_TYPE: u8 = 2;

impl RatchetTree {
    /// Root tree hash.
    pub fn tree_hash(&self, crypto: &dyn CipherSuiteProvider) -> Result<Vec<u8>, MlsError> {
        self.subtree_hash(crypto, tree_math::root(self.leaf_count()), &[])
    }

    /// Tree hash of the subtree at `node`, treating the `excluded` leaves as
    /// blank and removing them from every `unmerged_leaves` list.
    pub fn subtree_hash(
        &self,
        crypto: &dyn CipherSuiteProvider,
        node: NodeIndex,
        excluded: &[u32],
    ) -> Result<Vec<u8>, MlsError> {
        let (lo, hi) = tree_math::subtree_span(node);
        let mut hashes: Vec<Vec<u8>> = vec![Vec::new(); (hi - lo + 1) as usize];

        for current in (lo..=hi).step_by(2) {
            let leaf_index = LeafIndex::from_node(current)
                .ok_or_else(|| MlsError::Internal("odd index in leaf pass".to_string()))?;
            let leaf = self.leaf(leaf_index).filter(|_| !excluded.contains(&leaf_index.0));

            let mut input = Vec::with_capacity(64);
            LEAF_NODE_TYPE.tls_serialize(&mut input)?;
            leaf_index.0.tls_serialize(&mut input)?;
            match leaf {
                Some(leaf) => {
                    1u8.tls_serialize(&mut input)?;
                    leaf.tls_serialize(&mut input)?;
                },
                None => {
                    0u8.tls_serialize(&mut input)?;
                },
            }
            hashes[(current - lo) as usize] = crypto.hash(&input)?;
        }

        for level in 1..=tree_math::level(node) {
            let first = lo + (1 << level) - 1;
            for current in (first..=hi).step_by(1 << (level + 1)) {
                let (Some(left), Some(right)) = (tree_math::left(current), tree_math::right(current))
                else {
                    return Err(MlsError::Internal(format!("node {current} has no children")));
                };

                let parent = self.parent_node(current).map(|parent| ParentNode {
                    unmerged_leaves: parent
                        .unmerged_leaves
                        .iter()
                        .copied()
                        .filter(|leaf| !excluded.contains(leaf))
                        .collect(),
                    ..parent.clone()
                });

                let mut input = Vec::with_capacity(128);
                PARENT_NODE_TYPE.tls_serialize(&mut input)?;
                parent.tls_serialize(&mut input)?;
                write_vl(&hashes[(left - lo) as usize], &mut input)?;
                write_vl(&hashes[(right - lo) as usize], &mut input)?;
                hashes[(current - lo) as usize] = crypto.hash(&input)?;
            }
        }

        Ok(std::mem::take(&mut hashes[(node - lo) as usize]))
    }

    /// `Hash(ParentHashInput)` of `parent` as seen from its child opposite
    /// `copath_child`.
    pub fn parent_hash(
        &self,
        crypto: &dyn CipherSuiteProvider,
        parent: NodeIndex,
        copath_child: NodeIndex,
    ) -> Result<Vec<u8>, MlsError> {
        let node = self
            .parent_node(parent)
            .ok_or_else(|| MlsError::Internal(format!("parent hash over blank node {parent}")))?;
        let sibling_hash = self.subtree_hash(crypto, copath_child, &node.unmerged_leaves)?;

        let mut input = Vec::with_capacity(128);
        node.encryption_key.tls_serialize(&mut input)?;
        node.parent_hash.tls_serialize(&mut input)?;
        write_vl(&sibling_hash, &mut input)?;
        Ok(crypto.hash(&input)?)
    }

    /// Set parent hashes along a freshly installed path, top-down, and return
    /// the value the leaf must carry.
    ///
    /// `path` is the filtered direct path (parent, copath child) from the leaf
    /// upward; every parent in it must be non-blank.
    pub(crate) fn set_path_parent_hashes(
        &mut self,
        crypto: &dyn CipherSuiteProvider,
        path: &[(NodeIndex, NodeIndex)],
    ) -> Result<Vec<u8>, MlsError> {
        let mut above = Vec::new();
        for (parent, copath_child) in path.iter().rev() {
            let node = self
                .parent_node_mut(*parent)
                .ok_or_else(|| MlsError::Internal(format!("path node {parent} is blank")))?;
            node.parent_hash = above.into();
            above = self.parent_hash(crypto, *parent, *copath_child)?;
        }
        Ok(above)
    }

    /// Check that every non-blank parent is covered by a parent hash chain
    /// that ends at a commit-sourced leaf.
    pub fn verify_parent_hashes(&self, crypto: &dyn CipherSuiteProvider) -> Result<(), MlsError> {
        let leaves = self.leaf_count();
        let mut covered = vec![false; self.width()];

        for (index, slot) in self.nodes.iter().enumerate() {
            let Some(node) = slot else { continue };
            let claimed: &[u8] = match node {
                Node::Leaf(leaf) => match leaf.parent_hash() {
                    Some(hash) => hash,
                    None => continue,
                },
                Node::Parent(parent) => parent.parent_hash.as_slice(),
            };
            if claimed.is_empty() {
                continue;
            }

            let index = index as NodeIndex;
            let mut child = index;
            let Some(ancestor) = tree_math::direct_path(index, leaves).into_iter().find(|p| {
                let found = !self.is_blank(*p);
                if !found {
                    child = *p;
                }
                found
            }) else {
                continue;
            };
            let Some(copath_child) = tree_math::sibling(child, leaves) else { continue };

            if self.chain_links(index, ancestor, child)?
                && self.parent_hash(crypto, ancestor, copath_child)? == claimed
            {
                covered[ancestor as usize] = true;
            }
        }

        let all_covered = self
            .nodes
            .iter()
            .enumerate()
            .all(|(index, node)| !matches!(node, Some(Node::Parent(_))) || covered[index]);
        if all_covered { Ok(()) } else { Err(VerificationError::ParentHash.into()) }
    }

    /// `node` is in the resolution of `child` (the child of `ancestor` on
    /// its side) and the rest of that resolution is exactly the leaves
    /// unmerged at `ancestor` below `child`.
    fn chain_links(
        &self,
        node: NodeIndex,
        ancestor: NodeIndex,
        child: NodeIndex,
    ) -> Result<bool, MlsError> {
        let parent = self
            .parent_node(ancestor)
            .ok_or_else(|| MlsError::Internal(format!("ancestor {ancestor} is blank")))?;

        let mut resolution = self.resolution(child);
        let Some(position) = resolution.iter().position(|n| *n == node) else {
            return Ok(false);
        };
        resolution.remove(position);
        resolution.sort_unstable();

        let mut unmerged: Vec<NodeIndex> = parent
            .unmerged_leaves
            .iter()
            .map(|leaf| LeafIndex(*leaf).node())
            .filter(|leaf| tree_math::is_in_subtree(child, *leaf))
            .collect();
        unmerged.sort_unstable();
        Ok(resolution == unmerged)
    }
}

#[cfg(test)]
mod tests {
    use arbor_crypto::{CipherSuite, HpkePublicKey, RustCryptoProvider};
    use arbor_proto::LeafNodeSource;
    use tls_codec::VLBytes;

    use super::*;
    use crate::tree::test_support::leaf;

    fn provider() -> RustCryptoProvider {
        RustCryptoProvider::new(CipherSuite::Curve25519Aes128).unwrap()
    }

    fn four_member_tree() -> RatchetTree {
        let mut tree = RatchetTree::new(leaf(0));
        for seed in 1..4 {
            tree.add_leaf(leaf(seed));
        }
        tree
    }

    fn parent(seed: u8) -> Node {
        Node::Parent(ParentNode {
            encryption_key: HpkePublicKey::new(vec![seed; 32]),
            parent_hash: VLBytes::new(vec![]),
            unmerged_leaves: vec![],
        })
    }

    /// Install a path for `leaf_index` the way a committer does.
    fn commit_path(tree: &mut RatchetTree, leaf_index: LeafIndex, seed: u8) {
        let crypto = provider();
        let path = tree.filtered_direct_path(leaf_index);
        for (offset, (node, _)) in path.iter().enumerate() {
            tree.set_node(*node, Some(parent(seed + offset as u8)));
        }
        let leaf_hash = tree.set_path_parent_hashes(&crypto, &path).unwrap();
        let mut committed = tree.leaf(leaf_index).unwrap().clone();
        committed.leaf_node_source = LeafNodeSource::Commit(leaf_hash);
        tree.set_node(leaf_index.node(), Some(Node::Leaf(committed)));
    }

    #[test]
    fn tree_hash_changes_with_any_leaf() {
        let crypto = provider();
        let tree = four_member_tree();
        let before = tree.tree_hash(&crypto).unwrap();
        assert_eq!(before.len(), 32);

        let mut changed = tree.clone();
        changed.update_leaf(LeafIndex(3), leaf(42)).unwrap();
        assert_ne!(changed.tree_hash(&crypto).unwrap(), before);
    }

    #[test]
    fn excluding_leaf_equals_blanking_it() {
        let crypto = provider();
        let tree = four_member_tree();
        let mut blanked = tree.clone();
        blanked.set_node(LeafIndex(1).node(), None);

        assert_eq!(
            tree.subtree_hash(&crypto, 1, &[1]).unwrap(),
            blanked.subtree_hash(&crypto, 1, &[]).unwrap()
        );
    }

    #[test]
    fn committed_path_verifies() {
        let crypto = provider();
        let mut tree = four_member_tree();
        commit_path(&mut tree, LeafIndex(0), 100);
        tree.verify_parent_hashes(&crypto).unwrap();

        // a later add leaves the chain intact through unmerged leaves
        tree.remove_leaf(LeafIndex(3)).unwrap();
        commit_path(&mut tree, LeafIndex(2), 120);
        tree.add_leaf(leaf(50));
        tree.verify_parent_hashes(&crypto).unwrap();
    }

    #[test]
    fn tampered_parent_breaks_chain() {
        let crypto = provider();
        let mut tree = four_member_tree();
        commit_path(&mut tree, LeafIndex(1), 100);
        tree.parent_node_mut(3).unwrap().encryption_key = HpkePublicKey::new(vec![1; 32]);
        assert!(matches!(
            tree.verify_parent_hashes(&crypto),
            Err(MlsError::Verification(VerificationError::ParentHash))
        ));
    }

    #[test]
    fn unchained_parent_is_rejected() {
        let crypto = provider();
        let mut tree = four_member_tree();
        tree.set_node(5, Some(parent(90)));
        assert!(tree.verify_parent_hashes(&crypto).is_err());
    }

    #[test]
    fn hashing_large_tree_is_iterative() {
        let crypto = provider();
        let mut tree = RatchetTree::new(leaf(0));
        for i in 1..4096u32 {
            let mut next = leaf(0);
            next.encryption_key = HpkePublicKey::new(i.to_be_bytes().to_vec());
            tree.add_leaf(next);
        }
        assert_eq!(tree.tree_hash(&crypto).unwrap().len(), 32);
    }
}
