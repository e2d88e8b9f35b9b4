//! Extensions (RFC 9420 section 13).
//!
//! Known extension types decode into typed variants; anything else is kept as
//! [`Extension::Custom`] so it survives a decode/encode round trip unchanged.
//!
//! # Invariants
//!
//! - An [`ExtensionList`] never needs to be unique on decode, but callers that
//!   validate a leaf, key package or group context reject duplicates via
//!   [`ExtensionList::has_duplicates`].

use std::io::{Read, Write};

use arbor_crypto::{HpkePublicKey, SignaturePublicKey};
use tls_codec::{Deserialize, Serialize, Size, TlsDeserialize, TlsSerialize, TlsSize, VLBytes};

use crate::{
    codec::{read_vl, u16_newtype_codec, vl_header_len, vl_len, write_vl},
    credential::{Credential, CredentialType},
    proposals::ProposalType,
    tree::Node,
};

/// Extension type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtensionType(pub u16);

impl ExtensionType {
    /// `application_id`
    pub const APPLICATION_ID: Self = Self(0x0001);
    /// `ratchet_tree`
    pub const RATCHET_TREE: Self = Self(0x0002);
    /// `required_capabilities`
    pub const REQUIRED_CAPABILITIES: Self = Self(0x0003);
    /// `external_pub`
    pub const EXTERNAL_PUB: Self = Self(0x0004);
    /// `external_senders`
    pub const EXTERNAL_SENDERS: Self = Self(0x0005);

    /// True for the types every implementation understands and which need
    /// not be listed in capabilities.
    pub fn is_default(self) -> bool {
        (0x0001..=0x0005).contains(&self.0)
    }
}

u16_newtype_codec!(ExtensionType);

/// Capabilities every member must advertise.
#[derive(Debug, Clone, PartialEq, Eq, Default, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct RequiredCapabilities {
    /// Required extension types
    pub extension_types: Vec<ExtensionType>,
    /// Required proposal types
    pub proposal_types: Vec<ProposalType>,
    /// Required credential types
    pub credential_types: Vec<CredentialType>,
}

/// A party allowed to send proposals without being a member.
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct ExternalSender {
    /// Key the external sender signs with
    pub signature_key: SignaturePublicKey,
    /// Credential of the external sender
    pub credential: Credential,
}

/// A single extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extension {
    /// Application-chosen identifier for a leaf
    ApplicationId(Vec<u8>),
    /// Full ratchet tree, shipped in `GroupInfo`
    RatchetTree(Vec<Option<Node>>),
    /// Capabilities all members must support
    RequiredCapabilities(RequiredCapabilities),
    /// HPKE key for external commits
    ExternalPub(HpkePublicKey),
    /// Parties allowed to send external proposals
    ExternalSenders(Vec<ExternalSender>),
    /// Any other extension, kept verbatim
    Custom {
        /// Extension type
        extension_type: ExtensionType,
        /// Raw `extension_data`
        data: Vec<u8>,
    },
}

impl Extension {
    /// Wire type of this extension.
    pub fn extension_type(&self) -> ExtensionType {
        match self {
            Self::ApplicationId(_) => ExtensionType::APPLICATION_ID,
            Self::RatchetTree(_) => ExtensionType::RATCHET_TREE,
            Self::RequiredCapabilities(_) => ExtensionType::REQUIRED_CAPABILITIES,
            Self::ExternalPub(_) => ExtensionType::EXTERNAL_PUB,
            Self::ExternalSenders(_) => ExtensionType::EXTERNAL_SENDERS,
            Self::Custom { extension_type, .. } => *extension_type,
        }
    }

    fn body_len(&self) -> usize {
        match self {
            Self::ApplicationId(id) => vl_len(id),
            Self::RatchetTree(nodes) => nodes.tls_serialized_len(),
            Self::RequiredCapabilities(caps) => caps.tls_serialized_len(),
            Self::ExternalPub(key) => key.tls_serialized_len(),
            Self::ExternalSenders(senders) => senders.tls_serialized_len(),
            Self::Custom { data, .. } => data.len(),
        }
    }

    fn body(&self) -> Result<Vec<u8>, tls_codec::Error> {
        match self {
            Self::ApplicationId(id) => {
                let mut out = Vec::with_capacity(vl_len(id));
                write_vl(id, &mut out)?;
                Ok(out)
            },
            Self::RatchetTree(nodes) => nodes.tls_serialize_detached(),
            Self::RequiredCapabilities(caps) => caps.tls_serialize_detached(),
            Self::ExternalPub(key) => key.tls_serialize_detached(),
            Self::ExternalSenders(senders) => senders.tls_serialize_detached(),
            Self::Custom { data, .. } => Ok(data.clone()),
        }
    }
}

impl Size for Extension {
    fn tls_serialized_len(&self) -> usize {
        let body = self.body_len();
        2 + vl_header_len(body) + body
    }
}

impl Serialize for Extension {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
        let written = self.extension_type().tls_serialize(writer)?;
        Ok(written + write_vl(&self.body()?, writer)?)
    }
}

impl Deserialize for Extension {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
        let extension_type = ExtensionType::tls_deserialize(bytes)?;
        let data = read_vl(bytes)?;
        let body = data.as_slice();

        Ok(match extension_type {
            ExtensionType::APPLICATION_ID => {
                Self::ApplicationId(VLBytes::tls_deserialize_exact(body)?.as_slice().to_vec())
            },
            ExtensionType::RATCHET_TREE => {
                Self::RatchetTree(Vec::<Option<Node>>::tls_deserialize_exact(body)?)
            },
            ExtensionType::REQUIRED_CAPABILITIES => {
                Self::RequiredCapabilities(RequiredCapabilities::tls_deserialize_exact(body)?)
            },
            ExtensionType::EXTERNAL_PUB => {
                Self::ExternalPub(HpkePublicKey::tls_deserialize_exact(body)?)
            },
            ExtensionType::EXTERNAL_SENDERS => {
                Self::ExternalSenders(Vec::<ExternalSender>::tls_deserialize_exact(body)?)
            },
            other => Self::Custom { extension_type: other, data },
        })
    }
}

/// Ordered list of extensions as carried by leaves, key packages, group
/// contexts and group infos.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtensionList(pub Vec<Extension>);

impl ExtensionList {
    /// Empty list.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// First extension of the given type.
    pub fn find(&self, extension_type: ExtensionType) -> Option<&Extension> {
        self.0.iter().find(|ext| ext.extension_type() == extension_type)
    }

    /// True if an extension of the given type is present.
    pub fn contains(&self, extension_type: ExtensionType) -> bool {
        self.find(extension_type).is_some()
    }

    /// Insert, replacing any existing extension of the same type.
    pub fn set(&mut self, extension: Extension) {
        let extension_type = extension.extension_type();
        self.0.retain(|ext| ext.extension_type() != extension_type);
        self.0.push(extension);
    }

    /// Remove every extension of the given type.
    pub fn remove(&mut self, extension_type: ExtensionType) {
        self.0.retain(|ext| ext.extension_type() != extension_type);
    }

    /// Types present, in order.
    pub fn types(&self) -> impl Iterator<Item = ExtensionType> + '_ {
        self.0.iter().map(Extension::extension_type)
    }

    /// True if any type appears twice.
    pub fn has_duplicates(&self) -> bool {
        let mut seen: Vec<ExtensionType> = Vec::with_capacity(self.0.len());
        for extension_type in self.types() {
            if seen.contains(&extension_type) {
                return true;
            }
            seen.push(extension_type);
        }
        false
    }

    /// Ratchet tree carried in a `GroupInfo`.
    pub fn ratchet_tree(&self) -> Option<&[Option<Node>]> {
        match self.find(ExtensionType::RATCHET_TREE) {
            Some(Extension::RatchetTree(nodes)) => Some(nodes),
            _ => None,
        }
    }

    /// Required capabilities of a group context.
    pub fn required_capabilities(&self) -> Option<&RequiredCapabilities> {
        match self.find(ExtensionType::REQUIRED_CAPABILITIES) {
            Some(Extension::RequiredCapabilities(caps)) => Some(caps),
            _ => None,
        }
    }

    /// External HPKE key of a `GroupInfo`.
    pub fn external_pub(&self) -> Option<&HpkePublicKey> {
        match self.find(ExtensionType::EXTERNAL_PUB) {
            Some(Extension::ExternalPub(key)) => Some(key),
            _ => None,
        }
    }

    /// External senders of a group context.
    pub fn external_senders(&self) -> &[ExternalSender] {
        match self.find(ExtensionType::EXTERNAL_SENDERS) {
            Some(Extension::ExternalSenders(senders)) => senders,
            _ => &[],
        }
    }

    /// Application id of a leaf.
    pub fn application_id(&self) -> Option<&[u8]> {
        match self.find(ExtensionType::APPLICATION_ID) {
            Some(Extension::ApplicationId(id)) => Some(id),
            _ => None,
        }
    }
}

impl From<Vec<Extension>> for ExtensionList {
    fn from(extensions: Vec<Extension>) -> Self {
        Self(extensions)
    }
}

impl Size for ExtensionList {
    fn tls_serialized_len(&self) -> usize {
        self.0.tls_serialized_len()
    }
}

impl Serialize for ExtensionList {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
        self.0.tls_serialize(writer)
    }
}

impl Deserialize for ExtensionList {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
        Vec::<Extension>::tls_deserialize(bytes).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(extension: &Extension) -> Extension {
        let bytes = extension.tls_serialize_detached().unwrap();
        assert_eq!(bytes.len(), extension.tls_serialized_len());
        Extension::tls_deserialize_exact(bytes.as_slice()).unwrap()
    }

    #[test]
    fn application_id_is_nested_vector() {
        let extension = Extension::ApplicationId(b"id".to_vec());
        let bytes = extension.tls_serialize_detached().unwrap();
        // type, extension_data length, application_id length, id
        assert_eq!(bytes, vec![0x00, 0x01, 3, 2, b'i', b'd']);
        assert_eq!(round_trip(&extension), extension);
    }

    #[test]
    fn required_capabilities_round_trip() {
        let extension = Extension::RequiredCapabilities(RequiredCapabilities {
            extension_types: vec![ExtensionType(0x0A0A)],
            proposal_types: vec![ProposalType(0x0B0B)],
            credential_types: vec![CredentialType::BASIC],
        });
        assert_eq!(round_trip(&extension), extension);
    }

    #[test]
    fn unknown_extension_is_preserved() {
        let extension =
            Extension::Custom { extension_type: ExtensionType(0xFF00), data: vec![1, 2, 3] };
        assert_eq!(round_trip(&extension), extension);
        assert!(!ExtensionType(0xFF00).is_default());
    }

    #[test]
    fn list_set_replaces_same_type() {
        let mut list = ExtensionList::new();
        list.set(Extension::ApplicationId(vec![1]));
        list.set(Extension::ApplicationId(vec![2]));
        assert_eq!(list.0.len(), 1);
        assert_eq!(list.application_id(), Some(&[2u8][..]));
        assert!(!list.has_duplicates());

        list.0.push(Extension::ApplicationId(vec![3]));
        assert!(list.has_duplicates());
    }
}
