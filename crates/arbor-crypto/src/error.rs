//! Error types for cryptographic operations

use thiserror::Error;

/// Errors from the crypto provider and labeled operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// The provider does not implement this cipher suite
    #[error("unsupported cipher suite: {0:#06x}")]
    UnsupportedCipherSuite(u16),

    /// Key material had the wrong length or encoding
    #[error("invalid {kind} key: {reason}")]
    InvalidKey {
        /// Which kind of key was rejected
        kind: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// AEAD open failed (tag mismatch or wrong key)
    #[error("AEAD decryption failed")]
    AeadOpenFailed,

    /// AEAD input sizes were wrong
    #[error("AEAD input rejected: {0}")]
    AeadInput(String),

    /// HPKE setup, seal, open or export failed
    #[error("HPKE operation failed: {0}")]
    Hpke(String),

    /// Signature did not verify
    #[error("signature verification failed")]
    InvalidSignature,

    /// MAC did not verify
    #[error("MAC verification failed")]
    InvalidMac,

    /// KDF was asked for more output than it can produce
    #[error("KDF output length {requested} exceeds limit")]
    KdfOutputLength {
        /// Requested output length
        requested: usize,
    },

    /// Labeled input could not be encoded
    #[error("encoding labeled input failed: {0}")]
    Encoding(String),

    /// Entropy source failed
    #[error("randomness unavailable: {0}")]
    Randomness(String),
}

impl From<tls_codec::Error> for CryptoError {
    fn from(err: tls_codec::Error) -> Self {
        Self::Encoding(err.to_string())
    }
}

impl CryptoError {
    /// Returns true if this error means authenticated data was rejected.
    ///
    /// These indicate tampering or a key mismatch and are never retried.
    pub fn is_verification_failure(&self) -> bool {
        matches!(self, Self::AeadOpenFailed | Self::InvalidSignature | Self::InvalidMac)
    }
}
