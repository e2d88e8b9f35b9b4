//! Cipher suite registry.
//!
//! Every MLS cipher suite fixes one KEM, one AEAD, one hash and one signature
//! scheme. The suite identifier is what travels on the wire; the algorithm
//! breakdown drives the provider.

use std::io::{Read, Write};

use tls_codec::{Deserialize, Serialize, Size};

/// KEM algorithms referenced by cipher suites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KemAlgorithm {
    /// DHKEM(X25519, HKDF-SHA256)
    X25519,
    /// DHKEM(P-256, HKDF-SHA256)
    P256,
    /// DHKEM(P-384, HKDF-SHA384)
    P384,
    /// DHKEM(P-521, HKDF-SHA512)
    P521,
    /// DHKEM(X448, HKDF-SHA512)
    X448,
    /// ML-KEM-768
    MlKem768,
    /// ML-KEM-1024
    MlKem1024,
    /// X-Wing hybrid (X25519 + ML-KEM-768)
    XWing,
}

/// AEAD algorithms referenced by cipher suites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AeadAlgorithm {
    /// AES-128-GCM
    Aes128Gcm,
    /// AES-256-GCM
    Aes256Gcm,
    /// ChaCha20-Poly1305
    ChaCha20Poly1305,
}

impl AeadAlgorithm {
    /// Key length in bytes (`Nk`).
    pub fn key_size(self) -> usize {
        match self {
            Self::Aes128Gcm => 16,
            Self::Aes256Gcm | Self::ChaCha20Poly1305 => 32,
        }
    }

    /// Nonce length in bytes (`Nn`).
    pub fn nonce_size(self) -> usize {
        12
    }

    /// Authentication tag length in bytes.
    pub fn tag_size(self) -> usize {
        16
    }
}

/// Hash algorithms referenced by cipher suites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// SHA-256
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl HashAlgorithm {
    /// Digest length in bytes (`Nh`).
    pub fn digest_size(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }
}

/// Signature algorithms referenced by cipher suites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    /// Ed25519
    Ed25519,
    /// ECDSA over P-256 with SHA-256
    EcdsaP256,
    /// ECDSA over P-384 with SHA-384
    EcdsaP384,
    /// ECDSA over P-521 with SHA-512
    EcdsaP521,
    /// Ed448
    Ed448,
    /// ML-DSA-87
    MlDsa87,
}

/// MLS cipher suites (RFC 9420 section 17.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum CipherSuite {
    /// `MLS_128_DHKEMX25519_AES128GCM_SHA256_Ed25519`
    Curve25519Aes128 = 0x0001,
    /// `MLS_128_DHKEMP256_AES128GCM_SHA256_P256`
    P256Aes128 = 0x0002,
    /// `MLS_128_DHKEMX25519_CHACHA20POLY1305_SHA256_Ed25519`
    Curve25519ChaCha = 0x0003,
    /// `MLS_256_DHKEMX448_AES256GCM_SHA512_Ed448`
    Curve448Aes256 = 0x0004,
    /// `MLS_256_DHKEMP521_AES256GCM_SHA512_P521`
    P521Aes256 = 0x0005,
    /// `MLS_256_DHKEMX448_CHACHA20POLY1305_SHA512_Ed448`
    Curve448ChaCha = 0x0006,
    /// `MLS_256_DHKEMP384_AES256GCM_SHA384_P384`
    P384Aes256 = 0x0007,
}

impl CipherSuite {
    /// All registered suites, in identifier order.
    pub const ALL: [Self; 7] = [
        Self::Curve25519Aes128,
        Self::P256Aes128,
        Self::Curve25519ChaCha,
        Self::Curve448Aes256,
        Self::P521Aes256,
        Self::Curve448ChaCha,
        Self::P384Aes256,
    ];

    /// Wire identifier.
    pub fn id(self) -> u16 {
        self as u16
    }

    /// KEM used for HPKE in this suite.
    pub fn kem(self) -> KemAlgorithm {
        match self {
            Self::Curve25519Aes128 | Self::Curve25519ChaCha => KemAlgorithm::X25519,
            Self::P256Aes128 => KemAlgorithm::P256,
            Self::Curve448Aes256 | Self::Curve448ChaCha => KemAlgorithm::X448,
            Self::P521Aes256 => KemAlgorithm::P521,
            Self::P384Aes256 => KemAlgorithm::P384,
        }
    }

    /// AEAD used for message protection and HPKE.
    pub fn aead(self) -> AeadAlgorithm {
        match self {
            Self::Curve25519Aes128 | Self::P256Aes128 => AeadAlgorithm::Aes128Gcm,
            Self::Curve25519ChaCha | Self::Curve448ChaCha => AeadAlgorithm::ChaCha20Poly1305,
            Self::Curve448Aes256 | Self::P521Aes256 | Self::P384Aes256 => AeadAlgorithm::Aes256Gcm,
        }
    }

    /// Hash used for KDF, MAC and transcript hashing.
    pub fn hash(self) -> HashAlgorithm {
        match self {
            Self::Curve25519Aes128 | Self::P256Aes128 | Self::Curve25519ChaCha => {
                HashAlgorithm::Sha256
            },
            Self::P384Aes256 => HashAlgorithm::Sha384,
            Self::Curve448Aes256 | Self::P521Aes256 | Self::Curve448ChaCha => {
                HashAlgorithm::Sha512
            },
        }
    }

    /// Signature scheme for leaf credentials.
    pub fn signature(self) -> SignatureAlgorithm {
        match self {
            Self::Curve25519Aes128 | Self::Curve25519ChaCha => SignatureAlgorithm::Ed25519,
            Self::P256Aes128 => SignatureAlgorithm::EcdsaP256,
            Self::Curve448Aes256 | Self::Curve448ChaCha => SignatureAlgorithm::Ed448,
            Self::P521Aes256 => SignatureAlgorithm::EcdsaP521,
            Self::P384Aes256 => SignatureAlgorithm::EcdsaP384,
        }
    }
}

impl From<CipherSuite> for u16 {
    fn from(suite: CipherSuite) -> Self {
        suite.id()
    }
}

impl TryFrom<u16> for CipherSuite {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::ALL.into_iter().find(|suite| suite.id() == value).ok_or(value)
    }
}

impl Size for CipherSuite {
    fn tls_serialized_len(&self) -> usize {
        2
    }
}

impl Serialize for CipherSuite {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
        self.id().tls_serialize(writer)
    }
}

impl Deserialize for CipherSuite {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
        let value = u16::tls_deserialize(bytes)?;
        Self::try_from(value).map_err(|unknown| tls_codec::Error::UnknownValue(u64::from(unknown)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_round_trip() {
        for suite in CipherSuite::ALL {
            assert_eq!(CipherSuite::try_from(suite.id()), Ok(suite));
        }
        assert_eq!(CipherSuite::try_from(0x0a0a), Err(0x0a0a));
    }

    #[test]
    fn curve25519_suites_share_kem_and_signature() {
        for suite in [CipherSuite::Curve25519Aes128, CipherSuite::Curve25519ChaCha] {
            assert_eq!(suite.kem(), KemAlgorithm::X25519);
            assert_eq!(suite.signature(), SignatureAlgorithm::Ed25519);
            assert_eq!(suite.hash().digest_size(), 32);
        }
        assert_eq!(CipherSuite::Curve25519Aes128.aead().key_size(), 16);
        assert_eq!(CipherSuite::Curve25519ChaCha.aead().key_size(), 32);
    }

    #[test]
    fn wire_encoding_is_two_bytes_big_endian() {
        let bytes = CipherSuite::Curve25519ChaCha.tls_serialize_detached().unwrap();
        assert_eq!(bytes, vec![0x00, 0x03]);

        let decoded = CipherSuite::tls_deserialize_exact(&bytes).unwrap();
        assert_eq!(decoded, CipherSuite::Curve25519ChaCha);
    }

    #[test]
    fn unknown_identifier_is_rejected_on_decode() {
        let result = CipherSuite::tls_deserialize_exact([0xffu8, 0xff].as_slice());
        assert!(matches!(result, Err(tls_codec::Error::UnknownValue(0xffff))));
    }
}
