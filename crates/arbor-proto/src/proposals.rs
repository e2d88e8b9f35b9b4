//! Proposals (RFC 9420 section 12.1).

use std::io::{Read, Write};

use arbor_crypto::CipherSuite;
use tls_codec::{Deserialize, Serialize, Size, TlsDeserialize, TlsSerialize, TlsSize, VLBytes};

use crate::{
    codec::{opaque_newtype_codec, read_vl, u16_newtype_codec, vl_len, write_vl},
    extensions::ExtensionList,
    key_package::KeyPackage,
    leaf_node::LeafNode,
    message::ProtocolVersion,
};

/// Proposal type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProposalType(pub u16);

impl ProposalType {
    /// `add`
    pub const ADD: Self = Self(0x0001);
    /// `update`
    pub const UPDATE: Self = Self(0x0002);
    /// `remove`
    pub const REMOVE: Self = Self(0x0003);
    /// `psk`
    pub const PSK: Self = Self(0x0004);
    /// `reinit`
    pub const REINIT: Self = Self(0x0005);
    /// `external_init`
    pub const EXTERNAL_INIT: Self = Self(0x0006);
    /// `group_context_extensions`
    pub const GROUP_CONTEXT_EXTENSIONS: Self = Self(0x0007);

    /// True for the types every implementation supports.
    pub fn is_default(self) -> bool {
        (0x0001..=0x0007).contains(&self.0)
    }
}

u16_newtype_codec!(ProposalType);

/// Add a member from its key package.
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct Add {
    /// Joiner's key package
    pub key_package: KeyPackage,
}

/// Replace the sender's own leaf.
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct Update {
    /// New leaf (source `update`)
    pub leaf_node: LeafNode,
}

/// Remove the member at a leaf index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct Remove {
    /// Leaf index to remove
    pub removed: u32,
}

/// Inject a pre-shared key into the next epoch.
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct PreSharedKey {
    /// Which PSK
    pub psk: PreSharedKeyId,
}

/// Close this group and restart it with new parameters.
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct ReInit {
    /// Successor group id
    pub group_id: VLBytes,
    /// Successor protocol version
    pub version: ProtocolVersion,
    /// Successor cipher suite
    pub cipher_suite: CipherSuite,
    /// Successor group context extensions
    pub extensions: ExtensionList,
}

/// KEM output an external joiner uses to derive the init secret.
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct ExternalInit {
    /// HPKE encapsulation against `external_pub`
    pub kem_output: VLBytes,
}

/// Replace the group context extensions.
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct GroupContextExtensions {
    /// New extension list
    pub extensions: ExtensionList,
}

/// Usage of a resumption PSK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResumptionPskUsage {
    /// Injected into a later epoch of the same group
    Application,
    /// Binds a reinitialized group to its predecessor
    Reinit,
    /// Binds a branched group to its parent
    Branch,
}

impl Size for ResumptionPskUsage {
    fn tls_serialized_len(&self) -> usize {
        1
    }
}

impl Serialize for ResumptionPskUsage {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
        let value: u8 = match self {
            Self::Application => 1,
            Self::Reinit => 2,
            Self::Branch => 3,
        };
        value.tls_serialize(writer)
    }
}

impl Deserialize for ResumptionPskUsage {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
        match u8::tls_deserialize(bytes)? {
            1 => Ok(Self::Application),
            2 => Ok(Self::Reinit),
            3 => Ok(Self::Branch),
            other => Err(tls_codec::Error::UnknownValue(u64::from(other))),
        }
    }
}

/// PSK source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Psk {
    /// Distributed out of band
    External {
        /// Application-chosen identifier
        psk_id: Vec<u8>,
    },
    /// Resumption secret of an earlier epoch
    Resumption {
        /// Why it is injected
        usage: ResumptionPskUsage,
        /// Group the secret came from
        psk_group_id: Vec<u8>,
        /// Epoch the secret came from
        psk_epoch: u64,
    },
}

impl Size for Psk {
    fn tls_serialized_len(&self) -> usize {
        1 + match self {
            Self::External { psk_id } => vl_len(psk_id),
            Self::Resumption { psk_group_id, .. } => 1 + vl_len(psk_group_id) + 8,
        }
    }
}

impl Serialize for Psk {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
        match self {
            Self::External { psk_id } => Ok(1u8.tls_serialize(writer)? + write_vl(psk_id, writer)?),
            Self::Resumption { usage, psk_group_id, psk_epoch } => Ok(2u8.tls_serialize(writer)?
                + usage.tls_serialize(writer)?
                + write_vl(psk_group_id, writer)?
                + psk_epoch.tls_serialize(writer)?),
        }
    }
}

impl Deserialize for Psk {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
        match u8::tls_deserialize(bytes)? {
            1 => Ok(Self::External { psk_id: read_vl(bytes)? }),
            2 => Ok(Self::Resumption {
                usage: ResumptionPskUsage::tls_deserialize(bytes)?,
                psk_group_id: read_vl(bytes)?,
                psk_epoch: u64::tls_deserialize(bytes)?,
            }),
            other => Err(tls_codec::Error::UnknownValue(u64::from(other))),
        }
    }
}

/// Identifies a PSK plus a fresh nonce.
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct PreSharedKeyId {
    /// Which secret
    pub psk: Psk,
    /// `Nh` random bytes chosen by the proposer
    pub psk_nonce: VLBytes,
}

/// Proposal body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proposal {
    /// `add`
    Add(Add),
    /// `update`
    Update(Update),
    /// `remove`
    Remove(Remove),
    /// `psk`
    PreSharedKey(PreSharedKey),
    /// `reinit`
    ReInit(ReInit),
    /// `external_init`
    ExternalInit(ExternalInit),
    /// `group_context_extensions`
    GroupContextExtensions(GroupContextExtensions),
    /// Application-defined proposal; body carried as `opaque<V>`
    Custom {
        /// Non-default proposal type
        proposal_type: ProposalType,
        /// Opaque body
        data: Vec<u8>,
    },
}

impl Proposal {
    /// Wire type of this proposal.
    pub fn proposal_type(&self) -> ProposalType {
        match self {
            Self::Add(_) => ProposalType::ADD,
            Self::Update(_) => ProposalType::UPDATE,
            Self::Remove(_) => ProposalType::REMOVE,
            Self::PreSharedKey(_) => ProposalType::PSK,
            Self::ReInit(_) => ProposalType::REINIT,
            Self::ExternalInit(_) => ProposalType::EXTERNAL_INIT,
            Self::GroupContextExtensions(_) => ProposalType::GROUP_CONTEXT_EXTENSIONS,
            Self::Custom { proposal_type, .. } => *proposal_type,
        }
    }

    /// True if committing this proposal forces an update path.
    pub fn requires_path(&self) -> bool {
        match self {
            Self::Update(_)
            | Self::Remove(_)
            | Self::ExternalInit(_)
            | Self::GroupContextExtensions(_) => true,
            Self::Add(_) | Self::PreSharedKey(_) | Self::ReInit(_) => false,
            Self::Custom { .. } => true,
        }
    }
}

impl Size for Proposal {
    fn tls_serialized_len(&self) -> usize {
        2 + match self {
            Self::Add(add) => add.tls_serialized_len(),
            Self::Update(update) => update.tls_serialized_len(),
            Self::Remove(remove) => remove.tls_serialized_len(),
            Self::PreSharedKey(psk) => psk.tls_serialized_len(),
            Self::ReInit(reinit) => reinit.tls_serialized_len(),
            Self::ExternalInit(init) => init.tls_serialized_len(),
            Self::GroupContextExtensions(gce) => gce.tls_serialized_len(),
            Self::Custom { data, .. } => vl_len(data),
        }
    }
}

impl Serialize for Proposal {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
        let written = self.proposal_type().tls_serialize(writer)?;
        Ok(written
            + match self {
                Self::Add(add) => add.tls_serialize(writer)?,
                Self::Update(update) => update.tls_serialize(writer)?,
                Self::Remove(remove) => remove.tls_serialize(writer)?,
                Self::PreSharedKey(psk) => psk.tls_serialize(writer)?,
                Self::ReInit(reinit) => reinit.tls_serialize(writer)?,
                Self::ExternalInit(init) => init.tls_serialize(writer)?,
                Self::GroupContextExtensions(gce) => gce.tls_serialize(writer)?,
                Self::Custom { data, .. } => write_vl(data, writer)?,
            })
    }
}

impl Deserialize for Proposal {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
        let proposal_type = ProposalType::tls_deserialize(bytes)?;
        Ok(match proposal_type {
            ProposalType::ADD => Self::Add(Add::tls_deserialize(bytes)?),
            ProposalType::UPDATE => Self::Update(Update::tls_deserialize(bytes)?),
            ProposalType::REMOVE => Self::Remove(Remove::tls_deserialize(bytes)?),
            ProposalType::PSK => Self::PreSharedKey(PreSharedKey::tls_deserialize(bytes)?),
            ProposalType::REINIT => Self::ReInit(ReInit::tls_deserialize(bytes)?),
            ProposalType::EXTERNAL_INIT => Self::ExternalInit(ExternalInit::tls_deserialize(bytes)?),
            ProposalType::GROUP_CONTEXT_EXTENSIONS => {
                Self::GroupContextExtensions(GroupContextExtensions::tls_deserialize(bytes)?)
            },
            other => Self::Custom { proposal_type: other, data: read_vl(bytes)? },
        })
    }
}

/// `RefHash("MLS 1.0 Proposal Reference", AuthenticatedContent)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProposalRef(pub Vec<u8>);

opaque_newtype_codec!(ProposalRef);

/// A proposal inside a commit: inline or by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalOrRef {
    /// Proposal carried in the commit itself
    Proposal(Proposal),
    /// Reference to a proposal sent earlier in this epoch
    Reference(ProposalRef),
}

impl Size for ProposalOrRef {
    fn tls_serialized_len(&self) -> usize {
        1 + match self {
            Self::Proposal(proposal) => proposal.tls_serialized_len(),
            Self::Reference(reference) => reference.tls_serialized_len(),
        }
    }
}

impl Serialize for ProposalOrRef {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
        match self {
            Self::Proposal(proposal) => {
                Ok(1u8.tls_serialize(writer)? + proposal.tls_serialize(writer)?)
            },
            Self::Reference(reference) => {
                Ok(2u8.tls_serialize(writer)? + reference.tls_serialize(writer)?)
            },
        }
    }
}

impl Deserialize for ProposalOrRef {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
        match u8::tls_deserialize(bytes)? {
            1 => Ok(Self::Proposal(Proposal::tls_deserialize(bytes)?)),
            2 => Ok(Self::Reference(ProposalRef::tls_deserialize(bytes)?)),
            other => Err(tls_codec::Error::UnknownValue(u64::from(other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(proposal: &Proposal) {
        let bytes = proposal.tls_serialize_detached().unwrap();
        assert_eq!(bytes.len(), proposal.tls_serialized_len());
        assert_eq!(&Proposal::tls_deserialize_exact(bytes.as_slice()).unwrap(), proposal);
    }

    #[test]
    fn remove_encoding() {
        let proposal = Proposal::Remove(Remove { removed: 5 });
        let bytes = proposal.tls_serialize_detached().unwrap();
        assert_eq!(bytes, vec![0x00, 0x03, 0, 0, 0, 5]);
        round_trip(&proposal);
    }

    #[test]
    fn psk_proposals_round_trip() {
        round_trip(&Proposal::PreSharedKey(PreSharedKey {
            psk: PreSharedKeyId {
                psk: Psk::External { psk_id: b"ext".to_vec() },
                psk_nonce: VLBytes::new(vec![1; 32]),
            },
        }));
        round_trip(&Proposal::PreSharedKey(PreSharedKey {
            psk: PreSharedKeyId {
                psk: Psk::Resumption {
                    usage: ResumptionPskUsage::Branch,
                    psk_group_id: b"g".to_vec(),
                    psk_epoch: 9,
                },
                psk_nonce: VLBytes::new(vec![2; 32]),
            },
        }));
    }

    #[test]
    fn reinit_and_custom_round_trip() {
        round_trip(&Proposal::ReInit(ReInit {
            group_id: VLBytes::new(b"next".to_vec()),
            version: ProtocolVersion::MLS_10,
            cipher_suite: CipherSuite::Curve25519ChaCha,
            extensions: ExtensionList::new(),
        }));
        round_trip(&Proposal::Custom { proposal_type: ProposalType(0xF001), data: vec![1, 2] });
    }

    #[test]
    fn reference_round_trips() {
        let value = ProposalOrRef::Reference(ProposalRef(vec![7; 32]));
        let bytes = value.tls_serialize_detached().unwrap();
        assert_eq!(bytes[0], 2);
        assert_eq!(ProposalOrRef::tls_deserialize_exact(bytes.as_slice()).unwrap(), value);
    }

    #[test]
    fn path_requirement_per_type() {
        assert!(Proposal::Remove(Remove { removed: 1 }).requires_path());
        assert!(
            Proposal::ExternalInit(ExternalInit { kem_output: VLBytes::new(vec![]) })
                .requires_path()
        );
        assert!(
            !Proposal::PreSharedKey(PreSharedKey {
                psk: PreSharedKeyId {
                    psk: Psk::External { psk_id: vec![1] },
                    psk_nonce: VLBytes::new(vec![0; 32]),
                },
            })
            .requires_path()
        );
    }
}
