//! Ratchet tree nodes as they appear on the wire.
//!
//! The wire form of a tree is `optional<Node> ratchet_tree<V>` in flat array
//! order, with trailing blanks stripped. Re-extending to full width and all
//! structural checks live in the core crate.

use std::io::{Read, Write};

use arbor_crypto::HpkePublicKey;
use tls_codec::{Deserialize, Serialize, Size, TlsDeserialize, TlsSerialize, TlsSize, VLBytes};

use crate::leaf_node::LeafNode;

/// Interior node of the ratchet tree.
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct ParentNode {
    /// HPKE key shared by the subtree
    pub encryption_key: HpkePublicKey,
    /// Hash of the parent above at the time this key was set
    pub parent_hash: VLBytes,
    /// Leaves added below since this key was set, ascending
    pub unmerged_leaves: Vec<u32>,
}

/// A non-blank node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Leaf (even index)
    Leaf(LeafNode),
    /// Parent (odd index)
    Parent(ParentNode),
}

impl Node {
    /// HPKE key of either node kind.
    pub fn encryption_key(&self) -> &HpkePublicKey {
        match self {
            Self::Leaf(leaf) => &leaf.encryption_key,
            Self::Parent(parent) => &parent.encryption_key,
        }
    }

    /// Leaf contents, if this is a leaf.
    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match self {
            Self::Leaf(leaf) => Some(leaf),
            Self::Parent(_) => None,
        }
    }

    /// Parent contents, if this is a parent.
    pub fn as_parent(&self) -> Option<&ParentNode> {
        match self {
            Self::Parent(parent) => Some(parent),
            Self::Leaf(_) => None,
        }
    }
}

impl Size for Node {
    fn tls_serialized_len(&self) -> usize {
        1 + match self {
            Self::Leaf(leaf) => leaf.tls_serialized_len(),
            Self::Parent(parent) => parent.tls_serialized_len(),
        }
    }
}

impl Serialize for Node {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
        match self {
            Self::Leaf(leaf) => Ok(1u8.tls_serialize(writer)? + leaf.tls_serialize(writer)?),
            Self::Parent(parent) => Ok(2u8.tls_serialize(writer)? + parent.tls_serialize(writer)?),
        }
    }
}

impl Deserialize for Node {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
        match u8::tls_deserialize(bytes)? {
            1 => Ok(Self::Leaf(LeafNode::tls_deserialize(bytes)?)),
            2 => Ok(Self::Parent(ParentNode::tls_deserialize(bytes)?)),
            other => Err(tls_codec::Error::UnknownValue(u64::from(other))),
        }
    }
}
