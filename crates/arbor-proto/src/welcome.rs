//! Welcome messages (RFC 9420 section 12.4.3.1).

use arbor_crypto::{CipherSuite, HpkeCiphertext, Secret};
use tls_codec::{TlsDeserialize, TlsSerialize, TlsSize, VLBytes};

use crate::{key_package::KeyPackageRef, proposals::PreSharedKeyId};

/// Path secret for the joiner's lowest common ancestor with the committer.
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct PathSecret {
    /// The secret
    pub path_secret: Secret,
}

/// Secrets a joiner needs to enter the new epoch.
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct GroupSecrets {
    /// Joiner secret of the new epoch
    pub joiner_secret: Secret,
    /// Present when the commit carried a path
    pub path_secret: Option<PathSecret>,
    /// PSKs injected into the epoch
    pub psks: Vec<PreSharedKeyId>,
}

/// `GroupSecrets` sealed to one joiner's init key.
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct EncryptedGroupSecrets {
    /// Which key package this entry is for
    pub new_member: KeyPackageRef,
    /// `EncryptWithLabel(init_key, "Welcome", encrypted_group_info, GroupSecrets)`
    pub encrypted_group_secrets: HpkeCiphertext,
}

/// Bootstrap message for members added by a commit.
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct Welcome {
    /// Group cipher suite
    pub cipher_suite: CipherSuite,
    /// One entry per joiner
    pub secrets: Vec<EncryptedGroupSecrets>,
    /// `GroupInfo` sealed with the welcome key and nonce
    pub encrypted_group_info: VLBytes,
}
