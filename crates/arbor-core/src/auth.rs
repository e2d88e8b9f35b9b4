//! Credential authentication hook.

use std::collections::HashMap;

use arbor_crypto::SignaturePublicKey;
use arbor_proto::Credential;

/// Decides whether a credential may be bound to a signature key.
///
/// Consulted for every leaf that enters the tree: key package leaves, update
/// leaves, commit leaves and every leaf of an imported tree.
pub trait AuthenticationService {
    /// True if `credential` is acceptable for `signature_key`.
    fn validate_credential(&self, credential: &Credential, signature_key: &SignaturePublicKey)
    -> bool;
}

/// Accepts basic credentials.
///
/// Identities can be pinned to a key; a pinned identity presented with any
/// other key is rejected. Unpinned identities are accepted as they are.
#[derive(Debug, Clone, Default)]
pub struct BasicAuthenticationService {
    pinned: HashMap<Vec<u8>, SignaturePublicKey>,
}

impl BasicAuthenticationService {
    /// Service with no pinned identities.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin `identity` to `signature_key`.
    pub fn pin(&mut self, identity: impl Into<Vec<u8>>, signature_key: SignaturePublicKey) {
        self.pinned.insert(identity.into(), signature_key);
    }
}

impl AuthenticationService for BasicAuthenticationService {
    fn validate_credential(
        &self,
        credential: &Credential,
        signature_key: &SignaturePublicKey,
    ) -> bool {
        let Some(identity) = credential.identity() else { return false };
        self.pinned.get(identity).is_none_or(|pinned| pinned == signature_key)
    }
}
