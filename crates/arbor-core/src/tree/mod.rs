//! Ratchet tree: public key material of every member and subtree.
//!
//! The tree is a flat `Vec<Option<Node>>` laid out per [`tree_math`]. Leaves
//! hold member [`LeafNode`]s, parents hold a subtree HPKE key, the parent
//! hash chaining it to the commit that set it, and the leaves added below it
//! since (`unmerged_leaves`).
//!
//! # Invariants
//!
//! - `nodes.len()` is `2^d - 1` with `d >= 0`; leaves at even indices,
//!   parents at odd ones.
//! - Every `unmerged_leaves` entry is an occupied leaf below its parent.
//! - HPKE keys are unique across nodes, signature keys across leaves.
//!
//! Resolution and hashing never recurse, so tree depth is bounded only by
//! the `u32` leaf index.
//!
//! [`tree_math`]: crate::tree_math

mod hashes;
mod private;
mod validation;

use arbor_crypto::{HpkePublicKey, SignaturePublicKey};
use arbor_proto::{LeafNode, Node, ParentNode};
pub use private::TreePrivate;
pub(crate) use validation::{LeafCheck, meets_required_capabilities, validate_leaf};

use crate::{
    error::{MlsError, ValidationError},
    tree_math::{self, LeafIndex, NodeIndex},
};

/// Public state of the group's ratchet tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatchetTree {
    nodes: Vec<Option<Node>>,
}

impl RatchetTree {
    /// One-member tree.
    pub fn new(leaf: LeafNode) -> Self {
        Self { nodes: vec![Some(Node::Leaf(leaf))] }
    }

    /// Import a tree received on the wire (trailing blanks stripped).
    ///
    /// Re-extends to the full width and checks the structural invariants.
    /// Hash checks need a provider and are done separately.
    pub fn from_wire(nodes: Vec<Option<Node>>) -> Result<Self, MlsError> {
        match nodes.last() {
            None => return Err(ValidationError::EmptyTree.into()),
            Some(None) => return Err(ValidationError::TrailingBlankNode.into()),
            Some(Some(_)) => {},
        }
        if nodes.len() % 2 == 0 {
            return Err(ValidationError::TrailingParentNode(nodes.len() as u32).into());
        }

        let leaves = nodes.len().div_ceil(2).next_power_of_two();
        let width = 2 * leaves - 1;
        let mut nodes = nodes;
        nodes.resize(width, None);

        let tree = Self { nodes };
        tree.validate_structure()?;
        Ok(tree)
    }

    /// Wire form: the node array with trailing blanks removed.
    pub fn to_wire(&self) -> Vec<Option<Node>> {
        let used = self.nodes.iter().rposition(Option::is_some).map_or(0, |last| last + 1);
        self.nodes[..used].to_vec()
    }

    /// Number of leaf positions (a power of two).
    pub fn leaf_count(&self) -> u32 {
        self.nodes.len().div_ceil(2) as u32
    }

    /// Number of node positions.
    pub fn width(&self) -> usize {
        self.nodes.len()
    }

    /// Node at a flat index.
    pub fn node(&self, index: NodeIndex) -> Option<&Node> {
        self.nodes.get(index as usize).and_then(Option::as_ref)
    }

    /// True if the position is blank or out of range.
    pub fn is_blank(&self, index: NodeIndex) -> bool {
        self.node(index).is_none()
    }

    /// Leaf at a leaf index.
    pub fn leaf(&self, index: LeafIndex) -> Option<&LeafNode> {
        self.node(index.node()).and_then(Node::as_leaf)
    }

    /// Parent at a flat index.
    pub fn parent_node(&self, index: NodeIndex) -> Option<&ParentNode> {
        self.node(index).and_then(Node::as_parent)
    }

    /// Occupied leaves in index order.
    pub fn members(&self) -> impl Iterator<Item = (LeafIndex, &LeafNode)> + '_ {
        self.nodes.iter().step_by(2).enumerate().filter_map(|(i, node)| {
            node.as_ref().and_then(Node::as_leaf).map(|leaf| (LeafIndex(i as u32), leaf))
        })
    }

    /// Number of occupied leaves.
    pub fn member_count(&self) -> usize {
        self.members().count()
    }

    /// Leaf holding a signature key.
    pub fn find_signature_key(&self, key: &SignaturePublicKey) -> Option<LeafIndex> {
        self.members().find(|(_, leaf)| &leaf.signature_key == key).map(|(index, _)| index)
    }

    /// True if any node carries this HPKE key.
    pub fn contains_encryption_key(&self, key: &HpkePublicKey) -> bool {
        self.nodes.iter().flatten().any(|node| node.encryption_key() == key)
    }

    /// Index the next added leaf will occupy.
    pub fn free_leaf(&self) -> LeafIndex {
        (0..self.leaf_count())
            .map(LeafIndex)
            .find(|i| self.is_blank(i.node()))
            .unwrap_or(LeafIndex(self.leaf_count()))
    }

    /// Place a leaf at the leftmost blank position, doubling the tree when
    /// it is full, and mark it unmerged at every non-blank ancestor.
    pub fn add_leaf(&mut self, leaf: LeafNode) -> LeafIndex {
        let index = self.free_leaf();
        if index.0 == self.leaf_count() {
            let width = 2 * (2 * self.leaf_count() as usize) - 1;
            self.nodes.resize(width, None);
        }

        self.nodes[index.node() as usize] = Some(Node::Leaf(leaf));
        for ancestor in tree_math::direct_path(index.node(), self.leaf_count()) {
            if let Some(Node::Parent(parent)) = &mut self.nodes[ancestor as usize] {
                if let Err(pos) = parent.unmerged_leaves.binary_search(&index.0) {
                    parent.unmerged_leaves.insert(pos, index.0);
                }
            }
        }
        index
    }

    /// Replace an occupied leaf and blank its direct path.
    pub fn update_leaf(&mut self, index: LeafIndex, leaf: LeafNode) -> Result<(), MlsError> {
        self.require_member(index)?;
        self.nodes[index.node() as usize] = Some(Node::Leaf(leaf));
        self.blank_direct_path(index);
        Ok(())
    }

    /// Blank a leaf and its direct path, then drop the right half of the
    /// tree while it holds no members.
    pub fn remove_leaf(&mut self, index: LeafIndex) -> Result<(), MlsError> {
        self.require_member(index)?;
        self.nodes[index.node() as usize] = None;
        self.blank_direct_path(index);
        self.truncate();
        Ok(())
    }

    fn truncate(&mut self) {
        while self.leaf_count() > 1 {
            let half = self.leaf_count() as usize;
            if self.nodes[half..].iter().any(Option::is_some) {
                break;
            }
            self.nodes.truncate(half - 1);
        }
    }

    /// Blank every ancestor of a leaf.
    pub fn blank_direct_path(&mut self, index: LeafIndex) {
        for ancestor in tree_math::direct_path(index.node(), self.leaf_count()) {
            self.nodes[ancestor as usize] = None;
        }
    }

    pub(crate) fn set_node(&mut self, index: NodeIndex, node: Option<Node>) {
        self.nodes[index as usize] = node;
    }

    pub(crate) fn parent_node_mut(&mut self, index: NodeIndex) -> Option<&mut ParentNode> {
        match self.nodes.get_mut(index as usize) {
            Some(Some(Node::Parent(parent))) => Some(parent),
            _ => None,
        }
    }

    fn require_member(&self, index: LeafIndex) -> Result<(), MlsError> {
        if index.0 >= self.leaf_count() {
            return Err(ValidationError::LeafOutOfRange(index.0).into());
        }
        if self.leaf(index).is_none() {
            return Err(ValidationError::BlankLeaf(index.0).into());
        }
        Ok(())
    }

    /// Minimal set of non-blank nodes covering every member below `index`.
    ///
    /// A non-blank node contributes itself followed by its unmerged leaves;
    /// a blank parent contributes the resolutions of its children, left
    /// first.
    pub fn resolution(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let mut out = Vec::new();
        let mut stack = vec![index];
        while let Some(current) = stack.pop() {
            match self.node(current) {
                Some(Node::Parent(parent)) => {
                    out.push(current);
                    out.extend(parent.unmerged_leaves.iter().map(|leaf| LeafIndex(*leaf).node()));
                },
                Some(Node::Leaf(_)) => out.push(current),
                None => {
                    if let (Some(left), Some(right)) =
                        (tree_math::left(current), tree_math::right(current))
                    {
                        stack.push(right);
                        stack.push(left);
                    }
                },
            }
        }
        out
    }

    /// Direct path of a leaf without the nodes whose copath child has an
    /// empty resolution, each paired with that copath child.
    pub fn filtered_direct_path(&self, index: LeafIndex) -> Vec<(NodeIndex, NodeIndex)> {
        let leaves = self.leaf_count();
        tree_math::direct_path(index.node(), leaves)
            .into_iter()
            .zip(tree_math::copath(index.node(), leaves))
            .filter(|(_, copath_child)| !self.resolution(*copath_child).is_empty())
            .collect()
    }
}
