//! Pre-shared key lookup.

use std::collections::{HashMap, VecDeque};

use arbor_crypto::Secret;
use arbor_proto::{PreSharedKeyId, Psk};

use crate::{
    error::{MlsError, ValidationError},
    group::Context,
};

/// Source of PSK values referenced by `psk` proposals and Welcome messages.
///
/// Resumption PSKs of the group's own past epochs are resolved from client
/// state first; the index is only asked for secrets the state does not hold.
pub trait PskIndex {
    /// External PSK by id.
    fn external(&self, psk_id: &[u8]) -> Option<Secret>;

    /// Resumption PSK of another group or of an epoch the state no longer
    /// retains.
    fn resumption(&self, _group_id: &[u8], _epoch: u64) -> Option<Secret> {
        None
    }
}

/// Index holding nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPsks;

impl PskIndex for NoPsks {
    fn external(&self, _psk_id: &[u8]) -> Option<Secret> {
        None
    }
}

/// In-memory PSK store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPskStore {
    external: HashMap<Vec<u8>, Secret>,
    resumption: HashMap<(Vec<u8>, u64), Secret>,
}

impl InMemoryPskStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an external PSK.
    pub fn insert_external(&mut self, psk_id: impl Into<Vec<u8>>, secret: Secret) {
        self.external.insert(psk_id.into(), secret);
    }

    /// Register a resumption PSK.
    pub fn insert_resumption(&mut self, group_id: impl Into<Vec<u8>>, epoch: u64, secret: Secret) {
        self.resumption.insert((group_id.into(), epoch), secret);
    }
}

impl PskIndex for InMemoryPskStore {
    fn external(&self, psk_id: &[u8]) -> Option<Secret> {
        self.external.get(psk_id).cloned()
    }

    fn resumption(&self, group_id: &[u8], epoch: u64) -> Option<Secret> {
        self.resumption.get(&(group_id.to_vec(), epoch)).cloned()
    }
}

/// Resumption PSKs a client kept from epochs it took part in, oldest first.
///
/// Bounded by `max_resumption_psks`; the oldest entry is dropped first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumptionPsks {
    entries: VecDeque<(Vec<u8>, u64, Secret)>,
}

impl ResumptionPsks {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `secret` for `(group_id, epoch)`, evicting beyond `limit`.
    pub fn insert(&mut self, group_id: &[u8], epoch: u64, secret: Secret, limit: usize) {
        self.entries.retain(|(id, e, _)| !(id == group_id && *e == epoch));
        self.entries.push_back((group_id.to_vec(), epoch, secret));
        while self.entries.len() > limit {
            self.entries.pop_front();
        }
    }

    /// Secret for `(group_id, epoch)`, if still held.
    pub fn get(&self, group_id: &[u8], epoch: u64) -> Option<&Secret> {
        self.entries
            .iter()
            .find(|(id, e, _)| id == group_id && *e == epoch)
            .map(|(_, _, secret)| secret)
    }

    /// Number of retained secrets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Look up the secret for a PSK id.
///
/// Resumption PSKs are taken from `retained` first and from the index
/// otherwise. The nonce must be `Nh` bytes long.
pub(crate) fn resolve_psk(
    ctx: &Context<'_>,
    id: &PreSharedKeyId,
    retained: &ResumptionPsks,
) -> Result<Secret, MlsError> {
    if id.psk_nonce.as_slice().len() != ctx.crypto.kdf_extract_size() {
        return Err(ValidationError::InvalidPsk.into());
    }
    let secret = match &id.psk {
        Psk::External { psk_id } => ctx.psks.external(psk_id),
        Psk::Resumption { psk_group_id, psk_epoch, .. } => retained
            .get(psk_group_id, *psk_epoch)
            .cloned()
            .or_else(|| ctx.psks.resumption(psk_group_id, *psk_epoch)),
    };
    secret.ok_or_else(|| ValidationError::PskUnavailable.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_returns_registered_secrets() {
        let mut store = InMemoryPskStore::new();
        store.insert_external(b"ext".to_vec(), Secret::new(vec![1; 32]));
        store.insert_resumption(b"g".to_vec(), 4, Secret::new(vec![2; 32]));

        assert_eq!(store.external(b"ext"), Some(Secret::new(vec![1; 32])));
        assert_eq!(store.resumption(b"g", 4), Some(Secret::new(vec![2; 32])));
        assert!(store.external(b"missing").is_none());
        assert!(store.resumption(b"g", 5).is_none());
        assert!(NoPsks.external(b"ext").is_none());
    }

    #[test]
    fn retained_resumption_psks_are_bounded() {
        let mut retained = ResumptionPsks::new();
        for epoch in 0..5 {
            retained.insert(b"g", epoch, Secret::new(vec![epoch as u8; 32]), 3);
        }
        assert_eq!(retained.len(), 3);
        assert!(retained.get(b"g", 1).is_none());
        assert_eq!(retained.get(b"g", 4), Some(&Secret::new(vec![4; 32])));
    }

    #[test]
    fn resolution_prefers_retained_then_index() {
        use arbor_crypto::{CipherSuite, RustCryptoProvider};
        use arbor_proto::ResumptionPskUsage;
        use tls_codec::VLBytes;

        use crate::{auth::BasicAuthenticationService, config::ClientConfig};

        let crypto = RustCryptoProvider::new(CipherSuite::Curve25519Aes128).unwrap();
        let auth = BasicAuthenticationService::new();
        let config = ClientConfig::default();
        let mut store = InMemoryPskStore::new();
        store.insert_external(b"ext".to_vec(), Secret::new(vec![7; 32]));
        store.insert_resumption(b"g".to_vec(), 1, Secret::new(vec![8; 32]));
        let ctx = Context::new(&crypto, &auth, &config).with_psks(&store);

        let mut retained = ResumptionPsks::new();
        retained.insert(b"g", 1, Secret::new(vec![9; 32]), 4);

        let resumption = PreSharedKeyId {
            psk: Psk::Resumption {
                usage: ResumptionPskUsage::Application,
                psk_group_id: b"g".to_vec(),
                psk_epoch: 1,
            },
            psk_nonce: VLBytes::new(vec![0; 32]),
        };
        assert_eq!(resolve_psk(&ctx, &resumption, &retained).unwrap(), Secret::new(vec![9; 32]));
        assert_eq!(
            resolve_psk(&ctx, &resumption, &ResumptionPsks::new()).unwrap(),
            Secret::new(vec![8; 32])
        );

        let short_nonce = PreSharedKeyId {
            psk: Psk::External { psk_id: b"ext".to_vec() },
            psk_nonce: VLBytes::new(vec![0; 4]),
        };
        assert!(matches!(
            resolve_psk(&ctx, &short_nonce, &retained),
            Err(MlsError::Validation(ValidationError::InvalidPsk))
        ));

        let missing = PreSharedKeyId {
            psk: Psk::External { psk_id: b"missing".to_vec() },
            psk_nonce: VLBytes::new(vec![0; 32]),
        };
        assert!(matches!(
            resolve_psk(&ctx, &missing, &retained),
            Err(MlsError::Validation(ValidationError::PskUnavailable))
        ));
    }
}
