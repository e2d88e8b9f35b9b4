//! Crypto provider traits.
//!
//! The protocol core only ever talks to primitives through these traits. Each
//! provider instance is bound to exactly one [`CipherSuite`]; all sizes and
//! algorithms follow from it. Every trait is object safe so the core can hold
//! a `&dyn CipherSuiteProvider`.

use crate::{
    cipher_suite::CipherSuite,
    error::CryptoError,
    secret::{
        HpkeCiphertext, HpkePublicKey, HpkeSecretKey, Secret, SignaturePublicKey,
        SignatureSecretKey,
    },
};

/// Hashing and MAC.
pub trait HashProvider {
    /// Digest of `data`.
    fn hash(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// HMAC of `data` under `key`.
    fn mac(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Constant-time MAC check.
    ///
    /// Returns [`CryptoError::InvalidMac`] on mismatch.
    fn verify_mac(&self, key: &[u8], data: &[u8], tag: &[u8]) -> Result<(), CryptoError>;
}

/// HKDF extract and expand.
pub trait KdfProvider {
    /// `HKDF-Extract(salt, ikm)`.
    fn kdf_extract(&self, salt: &[u8], ikm: &[u8]) -> Result<Secret, CryptoError>;

    /// `HKDF-Expand(prk, info, len)`.
    fn kdf_expand(&self, prk: &[u8], info: &[u8], len: usize) -> Result<Secret, CryptoError>;

    /// Output length of extract (`Nh`).
    fn kdf_extract_size(&self) -> usize;
}

/// Authenticated encryption with associated data.
pub trait AeadProvider {
    /// Seal `plaintext`, returning ciphertext with the tag appended.
    fn aead_seal(
        &self,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Open `ciphertext`. Returns [`CryptoError::AeadOpenFailed`] on tag
    /// mismatch.
    fn aead_open(
        &self,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Key length (`Nk`).
    fn aead_key_size(&self) -> usize;

    /// Nonce length (`Nn`).
    fn aead_nonce_size(&self) -> usize;
}

/// HPKE key pair.
#[derive(Debug, Clone)]
pub struct HpkeKeyPair {
    /// Private half
    pub secret: HpkeSecretKey,
    /// Public half
    pub public: HpkePublicKey,
}

/// Output of a sender-side HPKE export.
#[derive(Debug, Clone)]
pub struct HpkeExport {
    /// Encapsulated key to send to the receiver
    pub kem_output: Vec<u8>,
    /// Exported secret
    pub secret: Secret,
}

/// HPKE (RFC 9180) base mode.
pub trait HpkeProvider {
    /// Single-shot seal to `public_key`.
    fn hpke_seal(
        &self,
        public_key: &HpkePublicKey,
        info: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<HpkeCiphertext, CryptoError>;

    /// Single-shot open with `secret_key`.
    fn hpke_open(
        &self,
        secret_key: &HpkeSecretKey,
        ciphertext: &HpkeCiphertext,
        info: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Fresh random key pair.
    fn kem_generate(&self) -> Result<HpkeKeyPair, CryptoError>;

    /// Deterministic key pair from input keying material (`DeriveKeyPair`).
    fn kem_derive(&self, ikm: &[u8]) -> Result<HpkeKeyPair, CryptoError>;

    /// Public key for a private key.
    fn kem_public_key(&self, secret_key: &HpkeSecretKey) -> Result<HpkePublicKey, CryptoError>;

    /// Sender-side secret export (`SetupBaseS` + `Export`).
    fn hpke_export_sender(
        &self,
        public_key: &HpkePublicKey,
        info: &[u8],
        exporter_context: &[u8],
        len: usize,
    ) -> Result<HpkeExport, CryptoError>;

    /// Receiver-side secret export (`SetupBaseR` + `Export`).
    fn hpke_export_receiver(
        &self,
        secret_key: &HpkeSecretKey,
        kem_output: &[u8],
        info: &[u8],
        exporter_context: &[u8],
        len: usize,
    ) -> Result<Secret, CryptoError>;
}

/// Digital signatures.
pub trait SignatureProvider {
    /// Fresh signing key pair.
    fn signature_key_generate(
        &self,
    ) -> Result<(SignatureSecretKey, SignaturePublicKey), CryptoError>;

    /// Verification key for a signing key.
    fn signature_public_key(
        &self,
        secret_key: &SignatureSecretKey,
    ) -> Result<SignaturePublicKey, CryptoError>;

    /// Sign `data`.
    fn sign(&self, secret_key: &SignatureSecretKey, data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Verify `signature` over `data`.
    ///
    /// Returns [`CryptoError::InvalidSignature`] on mismatch.
    fn verify(
        &self,
        public_key: &SignaturePublicKey,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), CryptoError>;
}

/// Randomness and wall-clock time.
pub trait RandomProvider {
    /// Fill `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Seconds since the Unix epoch.
    fn unix_time(&self) -> u64;

    /// `len` fresh random bytes.
    fn random_vec(&self, len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        self.random_bytes(&mut bytes);
        bytes
    }
}

/// Everything the protocol needs for one cipher suite.
pub trait CipherSuiteProvider:
    HashProvider + KdfProvider + AeadProvider + HpkeProvider + SignatureProvider + RandomProvider
{
    /// Suite this provider implements.
    fn cipher_suite(&self) -> CipherSuite;
}
