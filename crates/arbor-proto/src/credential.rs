//! Credentials (RFC 9420 section 5.3).
//!
//! A credential binds an identity to a signature key. The core never
//! interprets credentials itself; it hands them to the authentication service.

use std::io::{Read, Write};

use tls_codec::{Deserialize, Serialize, Size};

use crate::codec::{read_vl, u16_newtype_codec, vl_len, write_vl};

/// Credential type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CredentialType(pub u16);

impl CredentialType {
    /// Raw identity bytes
    pub const BASIC: Self = Self(0x0001);
    /// X.509 certificate chain
    pub const X509: Self = Self(0x0002);
}

u16_newtype_codec!(CredentialType);

/// A member credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Credential {
    /// Opaque identity, authenticated out of band
    Basic {
        /// Identity bytes
        identity: Vec<u8>,
    },
    /// DER certificate chain, leaf first
    X509 {
        /// Certificates
        certificates: Vec<Vec<u8>>,
    },
    /// Application-defined credential
    Custom {
        /// Registered or private-use type
        credential_type: CredentialType,
        /// Opaque credential body
        data: Vec<u8>,
    },
}

impl Credential {
    /// Basic credential for `identity`.
    pub fn basic(identity: impl Into<Vec<u8>>) -> Self {
        Self::Basic { identity: identity.into() }
    }

    /// Wire type of this credential.
    pub fn credential_type(&self) -> CredentialType {
        match self {
            Self::Basic { .. } => CredentialType::BASIC,
            Self::X509 { .. } => CredentialType::X509,
            Self::Custom { credential_type, .. } => *credential_type,
        }
    }

    /// Identity bytes of a basic credential.
    pub fn identity(&self) -> Option<&[u8]> {
        match self {
            Self::Basic { identity } => Some(identity),
            Self::X509 { .. } | Self::Custom { .. } => None,
        }
    }
}

fn certificates_len(certificates: &[Vec<u8>]) -> usize {
    certificates.iter().map(|cert| vl_len(cert)).sum()
}

impl Size for Credential {
    fn tls_serialized_len(&self) -> usize {
        2 + match self {
            Self::Basic { identity } => vl_len(identity),
            Self::X509 { certificates } => {
                let body = certificates_len(certificates);
                crate::codec::vl_header_len(body) + body
            },
            Self::Custom { data, .. } => vl_len(data),
        }
    }
}

impl Serialize for Credential {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
        let mut written = self.credential_type().tls_serialize(writer)?;
        written += match self {
            Self::Basic { identity } => write_vl(identity, writer)?,
            Self::X509 { certificates } => {
                let mut body = Vec::with_capacity(certificates_len(certificates));
                for cert in certificates {
                    write_vl(cert, &mut body)?;
                }
                write_vl(&body, writer)?
            },
            Self::Custom { data, .. } => write_vl(data, writer)?,
        };
        Ok(written)
    }
}

impl Deserialize for Credential {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
        let credential_type = CredentialType::tls_deserialize(bytes)?;
        match credential_type {
            CredentialType::BASIC => Ok(Self::Basic { identity: read_vl(bytes)? }),
            CredentialType::X509 => {
                let body = read_vl(bytes)?;
                let mut cursor = body.as_slice();
                let mut certificates = Vec::new();
                while !cursor.is_empty() {
                    certificates.push(read_vl(&mut cursor)?);
                }
                Ok(Self::X509 { certificates })
            },
            other => Ok(Self::Custom { credential_type: other, data: read_vl(bytes)? }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_credential_encoding() {
        let credential = Credential::basic(b"alice".to_vec());
        let bytes = credential.tls_serialize_detached().unwrap();
        assert_eq!(hex::encode(&bytes), "000105616c696365");
        assert_eq!(bytes.len(), credential.tls_serialized_len());

        let decoded = Credential::tls_deserialize_exact(bytes.as_slice()).unwrap();
        assert_eq!(decoded, credential);
        assert_eq!(decoded.identity(), Some(&b"alice"[..]));
    }

    #[test]
    fn x509_chain_round_trips() {
        let credential = Credential::X509 { certificates: vec![vec![1; 10], vec![2; 70]] };
        let bytes = credential.tls_serialize_detached().unwrap();
        assert_eq!(bytes.len(), credential.tls_serialized_len());
        assert_eq!(Credential::tls_deserialize_exact(bytes.as_slice()).unwrap(), credential);
    }

    #[test]
    fn unknown_type_decodes_as_custom() {
        let bytes = [0xF0, 0x00, 2, 9, 9];
        let decoded = Credential::tls_deserialize_exact(bytes.as_slice()).unwrap();
        assert_eq!(
            decoded,
            Credential::Custom { credential_type: CredentialType(0xF000), data: vec![9, 9] }
        );
    }
}
