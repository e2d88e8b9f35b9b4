//! Arbor cryptographic primitives
//!
//! Cipher suites, the provider traits through which the MLS core reaches every
//! primitive, a RustCrypto-backed provider, and the labeled operations of
//! RFC 9420 section 5.
//!
//! # Layering
//!
//! ```text
//! arbor-core (TreeKEM, key schedule, secret tree, framing)
//!        │
//!        ▼
//! labeled ops: ExpandWithLabel, SignWithLabel, EncryptWithLabel, RefHash
//!        │
//!        ▼
//! CipherSuiteProvider (hash, KDF, AEAD, HPKE, signature, randomness)
//!        │
//!        ▼
//! RustCryptoProvider: sha2, hmac, hkdf, aes-gcm, chacha20poly1305, hpke,
//!                     ed25519-dalek
//! ```
//!
//! # Security
//!
//! - Private keys and secrets live in zeroize-on-drop containers and never
//!   print through `Debug`.
//! - Randomness comes from an [`Environment`]; production uses the OS RNG,
//!   tests use a seeded ChaCha20 stream so group histories replay exactly.
//! - MAC and signature checks return errors, never booleans, so a failed
//!   check cannot be silently ignored.

#![forbid(unsafe_code)]

pub mod cipher_suite;
pub mod env;
pub mod error;
pub mod labeled;
pub mod provider;
pub mod rust_crypto;
pub mod secret;

pub use cipher_suite::{AeadAlgorithm, CipherSuite, HashAlgorithm, KemAlgorithm, SignatureAlgorithm};
pub use env::{Environment, EnvironmentRng, SystemEnv};
pub use error::CryptoError;
pub use provider::{
    AeadProvider, CipherSuiteProvider, HashProvider, HpkeExport, HpkeKeyPair, HpkeProvider,
    KdfProvider, RandomProvider, SignatureProvider,
};
pub use rust_crypto::RustCryptoProvider;
pub use secret::{
    HpkeCiphertext, HpkePublicKey, HpkeSecretKey, Secret, SignaturePublicKey, SignatureSecretKey,
};
