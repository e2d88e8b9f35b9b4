//! Message framing (RFC 9420 section 6).
//!
//! Handshake and application content travels either as a signed
//! [`PublicMessage`] or an encrypted [`PrivateMessage`]. Several structures
//! here carry bodies selected by an earlier field (`content_type`,
//! `sender_type`) and are encoded by hand.

use std::io::{Read, Write};

use tls_codec::{Deserialize, Serialize, Size, TlsDeserialize, TlsSerialize, TlsSize, VLBytes};

use crate::{
    codec::{read_vl, vl_len, write_vl},
    commit::Commit,
    group_info::GroupContext,
    message::{ProtocolVersion, WireFormat},
    proposals::Proposal,
};

/// Kind of framed content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    /// Application data
    Application,
    /// A proposal
    Proposal,
    /// A commit
    Commit,
}

impl ContentType {
    fn to_u8(self) -> u8 {
        match self {
            Self::Application => 1,
            Self::Proposal => 2,
            Self::Commit => 3,
        }
    }
}

impl Size for ContentType {
    fn tls_serialized_len(&self) -> usize {
        1
    }
}

impl Serialize for ContentType {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
        self.to_u8().tls_serialize(writer)
    }
}

impl Deserialize for ContentType {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
        match u8::tls_deserialize(bytes)? {
            1 => Ok(Self::Application),
            2 => Ok(Self::Proposal),
            3 => Ok(Self::Commit),
            other => Err(tls_codec::Error::UnknownValue(u64::from(other))),
        }
    }
}

/// Who sent a piece of framed content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sender {
    /// Current member at a leaf index
    Member(u32),
    /// Entry in the `external_senders` extension
    External(u32),
    /// Non-member proposing to add itself
    NewMemberProposal,
    /// Non-member joining through an external commit
    NewMemberCommit,
}

impl Sender {
    /// True for senders whose signature covers the group context.
    pub fn binds_group_context(self) -> bool {
        matches!(self, Self::Member(_) | Self::NewMemberCommit)
    }
}

impl Size for Sender {
    fn tls_serialized_len(&self) -> usize {
        match self {
            Self::Member(_) | Self::External(_) => 5,
            Self::NewMemberProposal | Self::NewMemberCommit => 1,
        }
    }
}

impl Serialize for Sender {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
        match self {
            Self::Member(leaf) => Ok(1u8.tls_serialize(writer)? + leaf.tls_serialize(writer)?),
            Self::External(index) => Ok(2u8.tls_serialize(writer)? + index.tls_serialize(writer)?),
            Self::NewMemberProposal => 3u8.tls_serialize(writer),
            Self::NewMemberCommit => 4u8.tls_serialize(writer),
        }
    }
}

impl Deserialize for Sender {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
        match u8::tls_deserialize(bytes)? {
            1 => Ok(Self::Member(u32::tls_deserialize(bytes)?)),
            2 => Ok(Self::External(u32::tls_deserialize(bytes)?)),
            3 => Ok(Self::NewMemberProposal),
            4 => Ok(Self::NewMemberCommit),
            other => Err(tls_codec::Error::UnknownValue(u64::from(other))),
        }
    }
}

/// Body of framed content, selected by content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// Application data
    Application(Vec<u8>),
    /// A proposal
    Proposal(Proposal),
    /// A commit
    Commit(Commit),
}

impl Content {
    /// Content type of this body.
    pub fn content_type(&self) -> ContentType {
        match self {
            Self::Application(_) => ContentType::Application,
            Self::Proposal(_) => ContentType::Proposal,
            Self::Commit(_) => ContentType::Commit,
        }
    }

    fn body_len(&self) -> usize {
        match self {
            Self::Application(data) => vl_len(data),
            Self::Proposal(proposal) => proposal.tls_serialized_len(),
            Self::Commit(commit) => commit.tls_serialized_len(),
        }
    }

    /// Write the body without its content type.
    fn write_body<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
        match self {
            Self::Application(data) => write_vl(data, writer),
            Self::Proposal(proposal) => proposal.tls_serialize(writer),
            Self::Commit(commit) => commit.tls_serialize(writer),
        }
    }

    /// Read a body whose content type is already known.
    fn read_body<R: Read>(
        content_type: ContentType,
        bytes: &mut R,
    ) -> Result<Self, tls_codec::Error> {
        match content_type {
            ContentType::Application => Ok(Self::Application(read_vl(bytes)?)),
            ContentType::Proposal => Ok(Self::Proposal(Proposal::tls_deserialize(bytes)?)),
            ContentType::Commit => Ok(Self::Commit(Commit::tls_deserialize(bytes)?)),
        }
    }
}

/// Content plus the framing every message carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedContent {
    /// Group the content belongs to
    pub group_id: Vec<u8>,
    /// Epoch the content was sent in
    pub epoch: u64,
    /// Sender
    pub sender: Sender,
    /// Application-supplied authenticated data
    pub authenticated_data: Vec<u8>,
    /// Body
    pub content: Content,
}

impl FramedContent {
    /// Content type of the body.
    pub fn content_type(&self) -> ContentType {
        self.content.content_type()
    }
}

impl Size for FramedContent {
    fn tls_serialized_len(&self) -> usize {
        vl_len(&self.group_id)
            + 8
            + self.sender.tls_serialized_len()
            + vl_len(&self.authenticated_data)
            + 1
            + self.content.body_len()
    }
}

impl Serialize for FramedContent {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
        Ok(write_vl(&self.group_id, writer)?
            + self.epoch.tls_serialize(writer)?
            + self.sender.tls_serialize(writer)?
            + write_vl(&self.authenticated_data, writer)?
            + self.content_type().tls_serialize(writer)?
            + self.content.write_body(writer)?)
    }
}

impl Deserialize for FramedContent {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
        let group_id = read_vl(bytes)?;
        let epoch = u64::tls_deserialize(bytes)?;
        let sender = Sender::tls_deserialize(bytes)?;
        let authenticated_data = read_vl(bytes)?;
        let content_type = ContentType::tls_deserialize(bytes)?;
        let content = Content::read_body(content_type, bytes)?;
        Ok(Self { group_id, epoch, sender, authenticated_data, content })
    }
}

/// Signature and, for commits, confirmation tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedContentAuthData {
    /// `SignWithLabel(., "FramedContentTBS", FramedContentTBS)`
    pub signature: Vec<u8>,
    /// Present exactly when the content is a commit
    pub confirmation_tag: Option<Vec<u8>>,
}

impl FramedContentAuthData {
    /// Encoded length for content of `content_type`.
    pub fn serialized_len(&self, content_type: ContentType) -> usize {
        let tag = match (content_type, &self.confirmation_tag) {
            (ContentType::Commit, Some(tag)) => vl_len(tag),
            (ContentType::Commit, None) => 1,
            _ => 0,
        };
        vl_len(&self.signature) + tag
    }

    /// Write for content of `content_type`.
    pub fn write<W: Write>(
        &self,
        content_type: ContentType,
        writer: &mut W,
    ) -> Result<usize, tls_codec::Error> {
        let mut written = write_vl(&self.signature, writer)?;
        if content_type == ContentType::Commit {
            let tag = self.confirmation_tag.as_deref().ok_or_else(|| {
                tls_codec::Error::EncodingError("commit without confirmation tag".to_string())
            })?;
            written += write_vl(tag, writer)?;
        }
        Ok(written)
    }

    /// Read for content of `content_type`.
    pub fn read<R: Read>(content_type: ContentType, bytes: &mut R) -> Result<Self, tls_codec::Error> {
        let signature = read_vl(bytes)?;
        let confirmation_tag =
            if content_type == ContentType::Commit { Some(read_vl(bytes)?) } else { None };
        Ok(Self { signature, confirmation_tag })
    }
}

/// Framed content with its authentication data and wire format.
///
/// This is the unit proposal references and transcript hashes are computed
/// over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedContent {
    /// How the content was (or will be) sent
    pub wire_format: WireFormat,
    /// The content
    pub content: FramedContent,
    /// Signature and confirmation tag
    pub auth: FramedContentAuthData,
}

impl Size for AuthenticatedContent {
    fn tls_serialized_len(&self) -> usize {
        2 + self.content.tls_serialized_len()
            + self.auth.serialized_len(self.content.content_type())
    }
}

impl Serialize for AuthenticatedContent {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
        Ok(self.wire_format.tls_serialize(writer)?
            + self.content.tls_serialize(writer)?
            + self.auth.write(self.content.content_type(), writer)?)
    }
}

impl Deserialize for AuthenticatedContent {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
        let wire_format = WireFormat::tls_deserialize(bytes)?;
        let content = FramedContent::tls_deserialize(bytes)?;
        let auth = FramedContentAuthData::read(content.content_type(), bytes)?;
        Ok(Self { wire_format, content, auth })
    }
}

/// Encoded `FramedContentTBS`.
///
/// `context` must be present for member and new-member-commit senders.
pub fn framed_content_tbs(
    wire_format: WireFormat,
    content: &FramedContent,
    context: Option<&GroupContext>,
) -> Result<Vec<u8>, tls_codec::Error> {
    let mut out = Vec::with_capacity(content.tls_serialized_len() + 128);
    ProtocolVersion::MLS_10.tls_serialize(&mut out)?;
    wire_format.tls_serialize(&mut out)?;
    content.tls_serialize(&mut out)?;
    if content.sender.binds_group_context() {
        let context = context.ok_or_else(|| {
            tls_codec::Error::EncodingError("sender requires group context".to_string())
        })?;
        context.tls_serialize(&mut out)?;
    }
    Ok(out)
}

/// Encoded `AuthenticatedContentTBM`: the TBS followed by the auth data.
pub fn authenticated_content_tbm(
    content: &AuthenticatedContent,
    context: &GroupContext,
) -> Result<Vec<u8>, tls_codec::Error> {
    let mut out = framed_content_tbs(content.wire_format, &content.content, Some(context))?;
    content.auth.write(content.content.content_type(), &mut out)?;
    Ok(out)
}

/// Encoded `ConfirmedTranscriptHashInput` of a commit.
pub fn confirmed_transcript_hash_input(
    content: &AuthenticatedContent,
) -> Result<Vec<u8>, tls_codec::Error> {
    let mut out = Vec::with_capacity(content.tls_serialized_len());
    content.wire_format.tls_serialize(&mut out)?;
    content.content.tls_serialize(&mut out)?;
    write_vl(&content.auth.signature, &mut out)?;
    Ok(out)
}

/// Signed (and for members, MACed) handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicMessage {
    /// The content
    pub content: FramedContent,
    /// Signature and confirmation tag
    pub auth: FramedContentAuthData,
    /// `MAC(membership_key, AuthenticatedContentTBM)`; present exactly for
    /// member senders
    pub membership_tag: Option<Vec<u8>>,
}

impl Size for PublicMessage {
    fn tls_serialized_len(&self) -> usize {
        let tag = match (&self.content.sender, &self.membership_tag) {
            (Sender::Member(_), Some(tag)) => vl_len(tag),
            (Sender::Member(_), None) => 1,
            _ => 0,
        };
        self.content.tls_serialized_len()
            + self.auth.serialized_len(self.content.content_type())
            + tag
    }
}

impl Serialize for PublicMessage {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
        let mut written = self.content.tls_serialize(writer)?;
        written += self.auth.write(self.content.content_type(), writer)?;
        if let Sender::Member(_) = self.content.sender {
            let tag = self.membership_tag.as_deref().ok_or_else(|| {
                tls_codec::Error::EncodingError("member message without membership tag".to_string())
            })?;
            written += write_vl(tag, writer)?;
        }
        Ok(written)
    }
}

impl Deserialize for PublicMessage {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
        let content = FramedContent::tls_deserialize(bytes)?;
        let auth = FramedContentAuthData::read(content.content_type(), bytes)?;
        let membership_tag = match content.sender {
            Sender::Member(_) => Some(read_vl(bytes)?),
            _ => None,
        };
        Ok(Self { content, auth, membership_tag })
    }
}

/// Encrypted message.
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct PrivateMessage {
    /// Group id (in clear)
    pub group_id: VLBytes,
    /// Epoch (in clear)
    pub epoch: u64,
    /// Content type (in clear)
    pub content_type: ContentType,
    /// Authenticated data (in clear)
    pub authenticated_data: VLBytes,
    /// Sealed [`SenderData`]
    pub encrypted_sender_data: VLBytes,
    /// Sealed `PrivateMessageContent`
    pub ciphertext: VLBytes,
}

/// Sender, generation and reuse guard of a private message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderData {
    /// Sender's leaf index
    pub leaf_index: u32,
    /// Secret tree generation used for the content key
    pub generation: u32,
    /// Random bytes XORed into the content nonce
    pub reuse_guard: [u8; 4],
}

impl Size for SenderData {
    fn tls_serialized_len(&self) -> usize {
        12
    }
}

impl Serialize for SenderData {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
        let written = self.leaf_index.tls_serialize(writer)? + self.generation.tls_serialize(writer)?;
        writer.write_all(&self.reuse_guard)?;
        Ok(written + 4)
    }
}

impl Deserialize for SenderData {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
        let leaf_index = u32::tls_deserialize(bytes)?;
        let generation = u32::tls_deserialize(bytes)?;
        let mut reuse_guard = [0u8; 4];
        bytes.read_exact(&mut reuse_guard).map_err(|_| tls_codec::Error::EndOfStream)?;
        Ok(Self { leaf_index, generation, reuse_guard })
    }
}

/// AAD for the sender data AEAD.
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct SenderDataAad {
    /// Group id
    pub group_id: VLBytes,
    /// Epoch
    pub epoch: u64,
    /// Content type
    pub content_type: ContentType,
}

/// AAD for the content AEAD.
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct PrivateContentAad {
    /// Group id
    pub group_id: VLBytes,
    /// Epoch
    pub epoch: u64,
    /// Content type
    pub content_type: ContentType,
    /// Authenticated data
    pub authenticated_data: VLBytes,
}

/// Encode `PrivateMessageContent`: body, auth data, then `padding` zero bytes.
pub fn encode_private_content(
    content: &Content,
    auth: &FramedContentAuthData,
    padding: usize,
) -> Result<Vec<u8>, tls_codec::Error> {
    let content_type = content.content_type();
    let mut out =
        Vec::with_capacity(content.body_len() + auth.serialized_len(content_type) + padding);
    content.write_body(&mut out)?;
    auth.write(content_type, &mut out)?;
    out.resize(out.len() + padding, 0);
    Ok(out)
}

/// Decode `PrivateMessageContent`, requiring all padding bytes to be zero.
pub fn decode_private_content(
    content_type: ContentType,
    bytes: &[u8],
) -> Result<(Content, FramedContentAuthData), tls_codec::Error> {
    let mut cursor = bytes;
    let content = Content::read_body(content_type, &mut cursor)?;
    let auth = FramedContentAuthData::read(content_type, &mut cursor)?;
    if cursor.iter().any(|byte| *byte != 0) {
        return Err(tls_codec::Error::DecodingError("non-zero padding".to_string()));
    }
    Ok((content, auth))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposals::Remove;

    fn commit_content(sender: Sender) -> FramedContent {
        FramedContent {
            group_id: b"group1".to_vec(),
            epoch: 3,
            sender,
            authenticated_data: vec![],
            content: Content::Commit(Commit::default()),
        }
    }

    #[test]
    fn public_commit_round_trips_with_tags() {
        let message = PublicMessage {
            content: commit_content(Sender::Member(1)),
            auth: FramedContentAuthData {
                signature: vec![1; 64],
                confirmation_tag: Some(vec![2; 32]),
            },
            membership_tag: Some(vec![3; 32]),
        };
        let bytes = message.tls_serialize_detached().unwrap();
        assert_eq!(bytes.len(), message.tls_serialized_len());
        assert_eq!(PublicMessage::tls_deserialize_exact(bytes.as_slice()).unwrap(), message);
    }

    #[test]
    fn new_member_commit_has_no_membership_tag() {
        let message = PublicMessage {
            content: commit_content(Sender::NewMemberCommit),
            auth: FramedContentAuthData {
                signature: vec![1; 64],
                confirmation_tag: Some(vec![2; 32]),
            },
            membership_tag: None,
        };
        let bytes = message.tls_serialize_detached().unwrap();
        assert_eq!(PublicMessage::tls_deserialize_exact(bytes.as_slice()).unwrap(), message);
    }

    #[test]
    fn commit_without_confirmation_tag_does_not_encode() {
        let message = PublicMessage {
            content: commit_content(Sender::Member(0)),
            auth: FramedContentAuthData { signature: vec![1; 64], confirmation_tag: None },
            membership_tag: Some(vec![0; 32]),
        };
        assert!(message.tls_serialize_detached().is_err());
    }

    #[test]
    fn private_content_padding_must_be_zero() {
        let content = Content::Proposal(Proposal::Remove(Remove { removed: 1 }));
        let auth = FramedContentAuthData { signature: vec![9; 64], confirmation_tag: None };

        let mut bytes = encode_private_content(&content, &auth, 16).unwrap();
        let (decoded, decoded_auth) =
            decode_private_content(ContentType::Proposal, &bytes).unwrap();
        assert_eq!(decoded, content);
        assert_eq!(decoded_auth, auth);

        let last = bytes.len() - 1;
        bytes[last] = 1;
        assert!(decode_private_content(ContentType::Proposal, &bytes).is_err());
    }

    #[test]
    fn sender_data_is_twelve_bytes() {
        let data = SenderData { leaf_index: 1, generation: 2, reuse_guard: [9, 8, 7, 6] };
        let bytes = data.tls_serialize_detached().unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 1, 0, 0, 0, 2, 9, 8, 7, 6]);
        assert_eq!(SenderData::tls_deserialize_exact(bytes.as_slice()).unwrap(), data);
    }

    #[test]
    fn tbs_requires_context_for_members() {
        let content = commit_content(Sender::Member(0));
        assert!(framed_content_tbs(WireFormat::PublicMessage, &content, None).is_err());

        let external = FramedContent {
            sender: Sender::External(0),
            content: Content::Proposal(Proposal::Remove(Remove { removed: 0 })),
            ..commit_content(Sender::External(0))
        };
        assert!(framed_content_tbs(WireFormat::PublicMessage, &external, None).is_ok());
    }
}
