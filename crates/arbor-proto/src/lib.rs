//! Arbor wire protocol
//!
//! Every structure MLS puts on the wire, with its RFC 9420 presentation
//! language encoding. Plain structs use the `tls_codec` derives; unions
//! whose body depends on an earlier field are encoded by hand.
//!
//! # Architecture
//!
//! ```text
//! MlsMessage { version, wire_format, body }
//!   ├─ PublicMessage  = FramedContent + FramedContentAuthData + membership_tag
//!   ├─ PrivateMessage = cleartext routing fields + sealed sender data + sealed content
//!   ├─ Welcome        = EncryptedGroupSecrets[] + sealed GroupInfo
//!   ├─ GroupInfo      = GroupContext + extensions + confirmation tag + signature
//!   └─ KeyPackage     = init key + LeafNode + signature
//! ```
//!
//! # Invariants
//!
//! - Decoding never accepts trailing bytes at the top level
//!   ([`codec::decode`]).
//! - Unknown enum tags are rejected except where MLS defines an open
//!   registry (credentials, extensions, proposals), which decode into a
//!   `Custom` variant and re-encode byte for byte.
//!
//! This crate performs no cryptography. Signatures, MACs and ciphertexts are
//! opaque bytes here; `arbor-core` produces and checks them.

#![forbid(unsafe_code)]

pub mod codec;
pub mod commit;
pub mod credential;
pub mod extensions;
pub mod framing;
pub mod group_info;
pub mod key_package;
pub mod leaf_node;
pub mod message;
pub mod proposals;
pub mod tree;
pub mod welcome;

pub use commit::{Commit, UpdatePath, UpdatePathNode};
pub use credential::{Credential, CredentialType};
pub use extensions::{Extension, ExtensionList, ExtensionType, ExternalSender, RequiredCapabilities};
pub use framing::{
    AuthenticatedContent, Content, ContentType, FramedContent, FramedContentAuthData,
    PrivateContentAad, PrivateMessage, PublicMessage, Sender, SenderData, SenderDataAad,
};
pub use group_info::{GroupContext, GroupInfo};
pub use key_package::{KeyPackage, KeyPackageRef};
pub use leaf_node::{Capabilities, LeafNode, LeafNodeSource, Lifetime};
pub use message::{MlsMessage, MlsMessageBody, ProtocolVersion, WireFormat};
pub use proposals::{
    Add, ExternalInit, GroupContextExtensions, PreSharedKey, PreSharedKeyId, Proposal,
    ProposalOrRef, ProposalRef, ProposalType, Psk, ReInit, Remove, ResumptionPskUsage, Update,
};
pub use tree::{Node, ParentNode};
pub use welcome::{EncryptedGroupSecrets, GroupSecrets, PathSecret, Welcome};

/// Codec error type shared by every structure in this crate.
pub type CodecError = tls_codec::Error;
