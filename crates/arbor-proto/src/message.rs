//! Top-level MLS message envelope (RFC 9420 section 6).

use std::io::{Read, Write};

use tls_codec::{Deserialize, Serialize, Size};

use crate::{
    codec::u16_newtype_codec,
    framing::{PrivateMessage, PublicMessage},
    group_info::GroupInfo,
    key_package::KeyPackage,
    welcome::Welcome,
};

/// Protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolVersion(pub u16);

impl ProtocolVersion {
    /// `mls10`
    pub const MLS_10: Self = Self(1);
}

u16_newtype_codec!(ProtocolVersion);

/// How a message body is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireFormat {
    /// Signed plaintext
    PublicMessage,
    /// Encrypted
    PrivateMessage,
    /// Welcome
    Welcome,
    /// Group info
    GroupInfo,
    /// Key package
    KeyPackage,
}

impl WireFormat {
    fn to_u16(self) -> u16 {
        match self {
            Self::PublicMessage => 1,
            Self::PrivateMessage => 2,
            Self::Welcome => 3,
            Self::GroupInfo => 4,
            Self::KeyPackage => 5,
        }
    }
}

impl Size for WireFormat {
    fn tls_serialized_len(&self) -> usize {
        2
    }
}

impl Serialize for WireFormat {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
        self.to_u16().tls_serialize(writer)
    }
}

impl Deserialize for WireFormat {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
        match u16::tls_deserialize(bytes)? {
            1 => Ok(Self::PublicMessage),
            2 => Ok(Self::PrivateMessage),
            3 => Ok(Self::Welcome),
            4 => Ok(Self::GroupInfo),
            5 => Ok(Self::KeyPackage),
            other => Err(tls_codec::Error::UnknownValue(u64::from(other))),
        }
    }
}

/// Body of an [`MlsMessage`], selected by wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MlsMessageBody {
    /// Signed handshake or application content
    PublicMessage(PublicMessage),
    /// Encrypted content
    PrivateMessage(PrivateMessage),
    /// Welcome for new members
    Welcome(Welcome),
    /// Signed group info
    GroupInfo(GroupInfo),
    /// Key package
    KeyPackage(KeyPackage),
}

impl MlsMessageBody {
    /// Wire format of this body.
    pub fn wire_format(&self) -> WireFormat {
        match self {
            Self::PublicMessage(_) => WireFormat::PublicMessage,
            Self::PrivateMessage(_) => WireFormat::PrivateMessage,
            Self::Welcome(_) => WireFormat::Welcome,
            Self::GroupInfo(_) => WireFormat::GroupInfo,
            Self::KeyPackage(_) => WireFormat::KeyPackage,
        }
    }
}

/// Any MLS message as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MlsMessage {
    /// Protocol version
    pub version: ProtocolVersion,
    /// Message body
    pub body: MlsMessageBody,
}

impl MlsMessage {
    /// Wrap `body` in an `mls10` envelope.
    pub fn new(body: MlsMessageBody) -> Self {
        Self { version: ProtocolVersion::MLS_10, body }
    }

    /// Wire format of the body.
    pub fn wire_format(&self) -> WireFormat {
        self.body.wire_format()
    }

    /// Group id and epoch for framed messages, `None` otherwise.
    pub fn group_epoch(&self) -> Option<(&[u8], u64)> {
        match &self.body {
            MlsMessageBody::PublicMessage(message) => {
                Some((message.content.group_id.as_slice(), message.content.epoch))
            },
            MlsMessageBody::PrivateMessage(message) => {
                Some((message.group_id.as_slice(), message.epoch))
            },
            _ => None,
        }
    }
}

impl Size for MlsMessage {
    fn tls_serialized_len(&self) -> usize {
        let body = match &self.body {
            MlsMessageBody::PublicMessage(message) => message.tls_serialized_len(),
            MlsMessageBody::PrivateMessage(message) => message.tls_serialized_len(),
            MlsMessageBody::Welcome(welcome) => welcome.tls_serialized_len(),
            MlsMessageBody::GroupInfo(info) => info.tls_serialized_len(),
            MlsMessageBody::KeyPackage(key_package) => key_package.tls_serialized_len(),
        };
        4 + body
    }
}

impl Serialize for MlsMessage {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
        let header = self.version.tls_serialize(writer)? + self.wire_format().tls_serialize(writer)?;
        let body = match &self.body {
            MlsMessageBody::PublicMessage(message) => message.tls_serialize(writer)?,
            MlsMessageBody::PrivateMessage(message) => message.tls_serialize(writer)?,
            MlsMessageBody::Welcome(welcome) => welcome.tls_serialize(writer)?,
            MlsMessageBody::GroupInfo(info) => info.tls_serialize(writer)?,
            MlsMessageBody::KeyPackage(key_package) => key_package.tls_serialize(writer)?,
        };
        Ok(header + body)
    }
}

impl Deserialize for MlsMessage {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
        let version = ProtocolVersion::tls_deserialize(bytes)?;
        let body = match WireFormat::tls_deserialize(bytes)? {
            WireFormat::PublicMessage => {
                MlsMessageBody::PublicMessage(PublicMessage::tls_deserialize(bytes)?)
            },
            WireFormat::PrivateMessage => {
                MlsMessageBody::PrivateMessage(PrivateMessage::tls_deserialize(bytes)?)
            },
            WireFormat::Welcome => MlsMessageBody::Welcome(Welcome::tls_deserialize(bytes)?),
            WireFormat::GroupInfo => MlsMessageBody::GroupInfo(GroupInfo::tls_deserialize(bytes)?),
            WireFormat::KeyPackage => {
                MlsMessageBody::KeyPackage(KeyPackage::tls_deserialize(bytes)?)
            },
        };
        Ok(Self { version, body })
    }
}

#[cfg(test)]
mod tests {
    use tls_codec::VLBytes;

    use super::*;
    use crate::framing::ContentType;

    #[test]
    fn private_message_envelope_round_trips() {
        let message = MlsMessage::new(MlsMessageBody::PrivateMessage(PrivateMessage {
            group_id: VLBytes::new(b"group1".to_vec()),
            epoch: 2,
            content_type: ContentType::Application,
            authenticated_data: VLBytes::new(vec![]),
            encrypted_sender_data: VLBytes::new(vec![1; 28]),
            ciphertext: VLBytes::new(vec![2; 40]),
        }));
        let bytes = message.tls_serialize_detached().unwrap();
        assert_eq!(&bytes[..4], &[0, 1, 0, 2]);
        assert_eq!(bytes.len(), message.tls_serialized_len());

        let decoded = MlsMessage::tls_deserialize_exact(bytes.as_slice()).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.group_epoch(), Some((&b"group1"[..], 2)));
    }

    #[test]
    fn unknown_wire_format_is_rejected() {
        let bytes: &[u8] = &[0, 1, 0, 9];
        assert!(matches!(
            MlsMessage::tls_deserialize_exact(bytes),
            Err(tls_codec::Error::UnknownValue(9))
        ));
    }
}
