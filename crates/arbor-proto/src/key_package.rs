//! Key packages (RFC 9420 section 10).

use arbor_crypto::{CipherSuite, HpkePublicKey};
use tls_codec::{Serialize, Size, TlsDeserialize, TlsSerialize, TlsSize, VLBytes};

use crate::{
    codec::opaque_newtype_codec, extensions::ExtensionList, leaf_node::LeafNode,
    message::ProtocolVersion,
};

/// Signed, pre-published bundle that lets others add a client to a group.
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct KeyPackage {
    /// Protocol version
    pub version: ProtocolVersion,
    /// Suite the keys belong to
    pub cipher_suite: CipherSuite,
    /// HPKE key the Welcome is encrypted to
    pub init_key: HpkePublicKey,
    /// Leaf the client will occupy
    pub leaf_node: LeafNode,
    /// Key package extensions
    pub extensions: ExtensionList,
    /// `SignWithLabel(., "KeyPackageTBS", KeyPackageTBS)`
    pub signature: VLBytes,
}

impl KeyPackage {
    /// Encoded `KeyPackageTBS` (every field except the signature).
    pub fn to_be_signed(&self) -> Result<Vec<u8>, tls_codec::Error> {
        let mut out = Vec::with_capacity(self.tls_serialized_len());
        self.version.tls_serialize(&mut out)?;
        self.cipher_suite.tls_serialize(&mut out)?;
        self.init_key.tls_serialize(&mut out)?;
        self.leaf_node.tls_serialize(&mut out)?;
        self.extensions.tls_serialize(&mut out)?;
        Ok(out)
    }
}

/// `RefHash("MLS 1.0 KeyPackage Reference", KeyPackage)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyPackageRef(pub Vec<u8>);

opaque_newtype_codec!(KeyPackageRef);
