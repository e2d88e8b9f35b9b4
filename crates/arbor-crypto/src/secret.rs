//! Key and secret containers.
//!
//! Private material zeroizes on drop. Public keys are opaque byte strings that
//! encode as MLS variable-length vectors.

use std::{
    fmt,
    io::{Read, Write},
};

use tls_codec::{
    Deserialize, Serialize, Size, TlsDeserialize, TlsSerialize, TlsSize, VLByteSlice, VLBytes,
};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Secret byte string (KDF output, path secret, epoch secret, ...).
///
/// Zeroized when dropped. `Debug` never prints the contents.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Secret(Vec<u8>);

impl Secret {
    /// Wrap existing bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// All-zero secret of `len` bytes (the default commit and PSK secret).
    pub fn zero(len: usize) -> Self {
        Self(vec![0u8; len])
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the secret holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Secret {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([REDACTED; {}])", self.0.len())
    }
}

impl Size for Secret {
    fn tls_serialized_len(&self) -> usize {
        VLByteSlice(&self.0).tls_serialized_len()
    }
}

impl Serialize for Secret {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
        VLByteSlice(&self.0).tls_serialize(writer)
    }
}

impl Deserialize for Secret {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
        let mut value = VLBytes::tls_deserialize(bytes)?;
        let secret = Self(value.as_slice().to_vec());
        value.zeroize();
        Ok(secret)
    }
}

/// HPKE private key. Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct HpkeSecretKey(Vec<u8>);

impl HpkeSecretKey {
    /// Wrap a serialized private key.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Serialized private key.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for HpkeSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HpkeSecretKey([REDACTED])")
    }
}

/// Signature private key. Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SignatureSecretKey(Vec<u8>);

impl SignatureSecretKey {
    /// Wrap a serialized private key.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Serialized private key.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SignatureSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SignatureSecretKey([REDACTED])")
    }
}

macro_rules! public_key_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Vec<u8>);

        impl $name {
            /// Wrap a serialized public key.
            pub fn new(bytes: Vec<u8>) -> Self {
                Self(bytes)
            }

            /// Serialized public key.
            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<Vec<u8>> for $name {
            fn from(bytes: Vec<u8>) -> Self {
                Self(bytes)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(", stringify!($name))?;
                for byte in self.0.iter().take(8) {
                    write!(f, "{byte:02x}")?;
                }
                f.write_str("..)")
            }
        }

        impl Size for $name {
            fn tls_serialized_len(&self) -> usize {
                VLByteSlice(&self.0).tls_serialized_len()
            }
        }

        impl Serialize for $name {
            fn tls_serialize<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
                VLByteSlice(&self.0).tls_serialize(writer)
            }
        }

        impl Deserialize for $name {
            fn tls_deserialize<R: Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
                VLBytes::tls_deserialize(bytes).map(|value| Self(value.as_slice().to_vec()))
            }
        }
    };
}

public_key_type!(
    /// HPKE public key (leaf encryption key, parent node key, init key).
    HpkePublicKey
);

public_key_type!(
    /// Signature verification key.
    SignaturePublicKey
);

/// HPKE ciphertext: KEM output plus AEAD ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct HpkeCiphertext {
    /// Encapsulated key
    pub kem_output: VLBytes,
    /// Sealed payload
    pub ciphertext: VLBytes,
}
