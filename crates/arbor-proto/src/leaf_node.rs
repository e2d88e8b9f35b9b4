//! Leaf nodes (RFC 9420 section 7.2).

use std::io::{Read, Write};

use arbor_crypto::{HpkePublicKey, SignaturePublicKey};
use tls_codec::{Deserialize, Serialize, Size, TlsDeserialize, TlsSerialize, TlsSize, VLBytes};

use crate::{
    codec::{read_vl, vl_len, write_vl},
    credential::{Credential, CredentialType},
    extensions::{ExtensionList, ExtensionType},
    message::ProtocolVersion,
    proposals::ProposalType,
};

/// What a client supports. Cipher suites stay raw `u16` so unknown (GREASE)
/// values survive decoding.
#[derive(Debug, Clone, PartialEq, Eq, Default, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct Capabilities {
    /// Protocol versions
    pub versions: Vec<ProtocolVersion>,
    /// Cipher suite identifiers
    pub cipher_suites: Vec<u16>,
    /// Non-default extension types
    pub extensions: Vec<ExtensionType>,
    /// Non-default proposal types
    pub proposals: Vec<ProposalType>,
    /// Credential types
    pub credentials: Vec<CredentialType>,
}

/// Validity window of a key package, in seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct Lifetime {
    /// First valid second
    pub not_before: u64,
    /// Last valid second
    pub not_after: u64,
}

impl Lifetime {
    /// True if `now` is inside the window (inclusive).
    pub fn contains(&self, now: u64) -> bool {
        self.not_before <= now && now <= self.not_after
    }
}

/// Why a leaf node was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafNodeSource {
    /// Part of a key package
    KeyPackage(Lifetime),
    /// Sent in an Update proposal
    Update,
    /// Sent in a commit's update path, carrying the parent-hash chain
    Commit(Vec<u8>),
}

impl LeafNodeSource {
    fn tag(&self) -> u8 {
        match self {
            Self::KeyPackage(_) => 1,
            Self::Update => 2,
            Self::Commit(_) => 3,
        }
    }
}

impl Size for LeafNodeSource {
    fn tls_serialized_len(&self) -> usize {
        1 + match self {
            Self::KeyPackage(lifetime) => lifetime.tls_serialized_len(),
            Self::Update => 0,
            Self::Commit(parent_hash) => vl_len(parent_hash),
        }
    }
}

impl Serialize for LeafNodeSource {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
        let written = self.tag().tls_serialize(writer)?;
        Ok(written
            + match self {
                Self::KeyPackage(lifetime) => lifetime.tls_serialize(writer)?,
                Self::Update => 0,
                Self::Commit(parent_hash) => write_vl(parent_hash, writer)?,
            })
    }
}

impl Deserialize for LeafNodeSource {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
        match u8::tls_deserialize(bytes)? {
            1 => Ok(Self::KeyPackage(Lifetime::tls_deserialize(bytes)?)),
            2 => Ok(Self::Update),
            3 => Ok(Self::Commit(read_vl(bytes)?)),
            other => Err(tls_codec::Error::UnknownValue(u64::from(other))),
        }
    }
}

/// A member's leaf in the ratchet tree.
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct LeafNode {
    /// HPKE key path secrets are encrypted to
    pub encryption_key: HpkePublicKey,
    /// Key this member signs with
    pub signature_key: SignaturePublicKey,
    /// Identity binding for `signature_key`
    pub credential: Credential,
    /// Supported versions, suites and types
    pub capabilities: Capabilities,
    /// Provenance of this leaf
    pub leaf_node_source: LeafNodeSource,
    /// Leaf extensions
    pub extensions: ExtensionList,
    /// `SignWithLabel(., "LeafNodeTBS", LeafNodeTBS)`
    pub signature: VLBytes,
}

impl LeafNode {
    /// Encoded `LeafNodeTBS`.
    ///
    /// Update and commit sourced leaves are bound to a group and position;
    /// `group` must be `Some((group_id, leaf_index))` for them and is ignored
    /// for key package leaves.
    pub fn to_be_signed(&self, group: Option<(&[u8], u32)>) -> Result<Vec<u8>, tls_codec::Error> {
        let mut out = Vec::with_capacity(self.tls_serialized_len() + 16);
        self.encryption_key.tls_serialize(&mut out)?;
        self.signature_key.tls_serialize(&mut out)?;
        self.credential.tls_serialize(&mut out)?;
        self.capabilities.tls_serialize(&mut out)?;
        self.leaf_node_source.tls_serialize(&mut out)?;
        self.extensions.tls_serialize(&mut out)?;

        match (&self.leaf_node_source, group) {
            (LeafNodeSource::KeyPackage(_), _) => {},
            (LeafNodeSource::Update | LeafNodeSource::Commit(_), Some((group_id, leaf_index))) => {
                write_vl(group_id, &mut out)?;
                leaf_index.tls_serialize(&mut out)?;
            },
            (LeafNodeSource::Update | LeafNodeSource::Commit(_), None) => {
                return Err(tls_codec::Error::EncodingError(
                    "leaf node source requires group binding".to_string(),
                ));
            },
        }
        Ok(out)
    }

    /// Parent hash carried by a commit-sourced leaf.
    pub fn parent_hash(&self) -> Option<&[u8]> {
        match &self.leaf_node_source {
            LeafNodeSource::Commit(hash) => Some(hash),
            LeafNodeSource::KeyPackage(_) | LeafNodeSource::Update => None,
        }
    }
}
