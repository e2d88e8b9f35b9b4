//! Group context and group info (RFC 9420 sections 8.1 and 12.4.3).

use arbor_crypto::CipherSuite;
use tls_codec::{Serialize, Size, TlsDeserialize, TlsSerialize, TlsSize, VLBytes};

use crate::{extensions::ExtensionList, message::ProtocolVersion};

/// Summary of the group state every member agrees on in an epoch.
///
/// # Invariants
///
/// - `epoch` increases by exactly one per accepted commit.
/// - `tree_hash` and `confirmed_transcript_hash` bind the context to the
///   exact tree and message history of the epoch.
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct GroupContext {
    /// Protocol version
    pub version: ProtocolVersion,
    /// Group cipher suite
    pub cipher_suite: CipherSuite,
    /// Application-chosen group identifier
    pub group_id: VLBytes,
    /// Epoch counter
    pub epoch: u64,
    /// Root tree hash of the ratchet tree
    pub tree_hash: VLBytes,
    /// Hash over every commit up to this epoch
    pub confirmed_transcript_hash: VLBytes,
    /// Group context extensions
    pub extensions: ExtensionList,
}

/// Signed description of a group, used by joiners.
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct GroupInfo {
    /// Context of the epoch being joined
    pub group_context: GroupContext,
    /// Group info extensions (`ratchet_tree`, `external_pub`)
    pub extensions: ExtensionList,
    /// Confirmation tag of the commit that created the epoch
    pub confirmation_tag: VLBytes,
    /// Leaf index of the signer
    pub signer: u32,
    /// `SignWithLabel(., "GroupInfoTBS", GroupInfoTBS)`
    pub signature: VLBytes,
}

impl GroupInfo {
    /// Encoded `GroupInfoTBS` (every field except the signature).
    pub fn to_be_signed(&self) -> Result<Vec<u8>, tls_codec::Error> {
        let mut out = Vec::with_capacity(self.tls_serialized_len());
        self.group_context.tls_serialize(&mut out)?;
        self.extensions.tls_serialize(&mut out)?;
        self.confirmation_tag.tls_serialize(&mut out)?;
        self.signer.tls_serialize(&mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use tls_codec::Deserialize;

    use super::*;

    #[test]
    fn group_context_round_trips() {
        let context = GroupContext {
            version: ProtocolVersion::MLS_10,
            cipher_suite: CipherSuite::Curve25519Aes128,
            group_id: VLBytes::new(b"group1".to_vec()),
            epoch: 7,
            tree_hash: VLBytes::new(vec![1; 32]),
            confirmed_transcript_hash: VLBytes::new(vec![2; 32]),
            extensions: ExtensionList::new(),
        };
        let bytes = context.tls_serialize_detached().unwrap();
        assert_eq!(&bytes[..4], &[0x00, 0x01, 0x00, 0x01]);
        assert_eq!(GroupContext::tls_deserialize_exact(bytes.as_slice()).unwrap(), context);
    }
}
