//! Signing, MACing and encrypting framed content (RFC 9420 section 6).

use arbor_crypto::{CipherSuiteProvider, Secret, SignaturePublicKey, SignatureSecretKey, labeled};
use arbor_proto::{
    AuthenticatedContent, ContentType, FramedContent, FramedContentAuthData, GroupContext,
    PrivateContentAad, PrivateMessage, PublicMessage, Sender, SenderData, SenderDataAad,
    WireFormat, codec, framing,
};
use tls_codec::VLBytes;

use crate::{
    config::ClientConfig,
    error::{MlsError, ValidationError, VerificationError},
    secret_tree::{RatchetType, RatchetWindow, SecretTree},
    tree_math::LeafIndex,
};

const FRAMED_CONTENT_LABEL: &str = "FramedContentTBS";

/// Sign `content` for sending as `wire_format`.
///
/// `context` is required for member and new-member-commit senders. The
/// confirmation tag of a commit is filled in by the caller once the new
/// epoch is known.
pub fn sign_content(
    crypto: &dyn CipherSuiteProvider,
    signer: &SignatureSecretKey,
    wire_format: WireFormat,
    content: FramedContent,
    context: Option<&GroupContext>,
) -> Result<AuthenticatedContent, MlsError> {
    let tbs = framing::framed_content_tbs(wire_format, &content, context)?;
    let signature = labeled::sign_with_label(crypto, signer, FRAMED_CONTENT_LABEL, &tbs)?;
    Ok(AuthenticatedContent {
        wire_format,
        content,
        auth: FramedContentAuthData { signature, confirmation_tag: None },
    })
}

/// Verify the signature of received content.
pub fn verify_content_signature(
    crypto: &dyn CipherSuiteProvider,
    signature_key: &SignaturePublicKey,
    content: &AuthenticatedContent,
    context: Option<&GroupContext>,
) -> Result<(), MlsError> {
    let tbs = framing::framed_content_tbs(content.wire_format, &content.content, context)?;
    labeled::verify_with_label(
        crypto,
        signature_key,
        FRAMED_CONTENT_LABEL,
        &tbs,
        &content.auth.signature,
    )
    .map_err(|_| VerificationError::Signature.into())
}

/// Wrap signed content as a `PublicMessage`, adding the membership tag for
/// member senders.
pub fn to_public_message(
    crypto: &dyn CipherSuiteProvider,
    membership_key: &Secret,
    content: AuthenticatedContent,
    context: &GroupContext,
) -> Result<PublicMessage, MlsError> {
    let membership_tag = match content.content.sender {
        Sender::Member(_) => {
            let tbm = framing::authenticated_content_tbm(&content, context)?;
            Some(crypto.mac(membership_key.as_bytes(), &tbm)?)
        },
        Sender::External(_) | Sender::NewMemberProposal | Sender::NewMemberCommit => None,
    };
    Ok(PublicMessage { content: content.content, auth: content.auth, membership_tag })
}

/// Check the membership tag of a received `PublicMessage` and unwrap it.
pub fn from_public_message(
    crypto: &dyn CipherSuiteProvider,
    membership_key: &Secret,
    message: PublicMessage,
    context: &GroupContext,
) -> Result<AuthenticatedContent, MlsError> {
    let content = AuthenticatedContent {
        wire_format: WireFormat::PublicMessage,
        content: message.content,
        auth: message.auth,
    };
    if let Sender::Member(_) = content.content.sender {
        let tag = message.membership_tag.ok_or(VerificationError::MembershipTag)?;
        let tbm = framing::authenticated_content_tbm(&content, context)?;
        crypto
            .verify_mac(membership_key.as_bytes(), &tbm, &tag)
            .map_err(|_| VerificationError::MembershipTag)?;
    }
    Ok(content)
}

fn sender_data_key_nonce(
    crypto: &dyn CipherSuiteProvider,
    sender_data_secret: &Secret,
    ciphertext: &[u8],
) -> Result<(Secret, Secret), MlsError> {
    let sample = &ciphertext[..ciphertext.len().min(crypto.kdf_extract_size())];
    let key =
        labeled::expand_with_label(crypto, sender_data_secret, "key", sample, crypto.aead_key_size())?;
    let nonce = labeled::expand_with_label(
        crypto,
        sender_data_secret,
        "nonce",
        sample,
        crypto.aead_nonce_size(),
    )?;
    Ok((key, nonce))
}

fn apply_reuse_guard(nonce: &Secret, reuse_guard: [u8; 4]) -> Vec<u8> {
    let mut guarded = nonce.as_bytes().to_vec();
    for (byte, guard) in guarded.iter_mut().zip(reuse_guard) {
        *byte ^= guard;
    }
    guarded
}

/// Encrypt signed content from a member as a `PrivateMessage`.
///
/// Consumes one generation of the sender's ratchet in `secret_tree`.
pub fn encrypt_private(
    crypto: &dyn CipherSuiteProvider,
    secret_tree: &mut SecretTree,
    sender_data_secret: &Secret,
    content: &AuthenticatedContent,
    config: &ClientConfig,
) -> Result<PrivateMessage, MlsError> {
    let Sender::Member(leaf_index) = content.content.sender else {
        return Err(ValidationError::InvalidSenderType.into());
    };
    let content_type = content.content.content_type();
    let step = secret_tree.next_key(crypto, LeafIndex(leaf_index), RatchetType::from(content_type))?;

    let mut reuse_guard = [0u8; 4];
    crypto.random_bytes(&mut reuse_guard);

    let group_id = VLBytes::new(content.content.group_id.clone());
    let authenticated_data = VLBytes::new(content.content.authenticated_data.clone());
    let aad = codec::encode(&PrivateContentAad {
        group_id: group_id.clone(),
        epoch: content.content.epoch,
        content_type,
        authenticated_data: authenticated_data.clone(),
    })?;
    let mut plaintext =
        framing::encode_private_content(&content.content.content, &content.auth, 0)?;
    plaintext.resize(plaintext.len() + config.padding_for(plaintext.len()), 0);
    let ciphertext = crypto.aead_seal(
        step.key.key.as_bytes(),
        &apply_reuse_guard(&step.key.nonce, reuse_guard),
        &aad,
        &plaintext,
    )?;

    let sender_data = SenderData { leaf_index, generation: step.key.generation, reuse_guard };
    let sender_aad = codec::encode(&SenderDataAad {
        group_id: group_id.clone(),
        epoch: content.content.epoch,
        content_type,
    })?;
    let (key, nonce) = sender_data_key_nonce(crypto, sender_data_secret, &ciphertext)?;
    let encrypted_sender_data = crypto.aead_seal(
        key.as_bytes(),
        nonce.as_bytes(),
        &sender_aad,
        &codec::encode(&sender_data)?,
    )?;

    Ok(PrivateMessage {
        group_id,
        epoch: content.content.epoch,
        content_type,
        authenticated_data,
        encrypted_sender_data: encrypted_sender_data.into(),
        ciphertext: ciphertext.into(),
    })
}

/// Decrypt a `PrivateMessage` into unverified content.
///
/// The signature still has to be checked against the sender's leaf.
pub fn decrypt_private(
    crypto: &dyn CipherSuiteProvider,
    secret_tree: &mut SecretTree,
    window: RatchetWindow,
    sender_data_secret: &Secret,
    message: &PrivateMessage,
) -> Result<AuthenticatedContent, MlsError> {
    let sender_aad = codec::encode(&SenderDataAad {
        group_id: message.group_id.clone(),
        epoch: message.epoch,
        content_type: message.content_type,
    })?;
    let (key, nonce) =
        sender_data_key_nonce(crypto, sender_data_secret, message.ciphertext.as_slice())?;
    let sender_data = crypto
        .aead_open(
            key.as_bytes(),
            nonce.as_bytes(),
            &sender_aad,
            message.encrypted_sender_data.as_slice(),
        )
        .map_err(MlsError::from_open)?;
    let sender_data: SenderData = codec::decode(&sender_data)?;

    let ratchet_key = secret_tree.key_for_generation(
        crypto,
        window,
        LeafIndex(sender_data.leaf_index),
        RatchetType::from(message.content_type),
        sender_data.generation,
    )?;

    let aad = codec::encode(&PrivateContentAad {
        group_id: message.group_id.clone(),
        epoch: message.epoch,
        content_type: message.content_type,
        authenticated_data: message.authenticated_data.clone(),
    })?;
    let plaintext = crypto
        .aead_open(
            ratchet_key.key.as_bytes(),
            &apply_reuse_guard(&ratchet_key.nonce, sender_data.reuse_guard),
            &aad,
            message.ciphertext.as_slice(),
        )
        .map_err(MlsError::from_open)?;
    let (content, auth) = framing::decode_private_content(message.content_type, &plaintext)?;

    Ok(AuthenticatedContent {
        wire_format: WireFormat::PrivateMessage,
        content: FramedContent {
            group_id: message.group_id.as_slice().to_vec(),
            epoch: message.epoch,
            sender: Sender::Member(sender_data.leaf_index),
            authenticated_data: message.authenticated_data.as_slice().to_vec(),
            content,
        },
        auth,
    })
}

/// True if `content_type` may arrive as a `PublicMessage`.
pub(crate) fn allowed_in_public(content_type: ContentType) -> bool {
    content_type != ContentType::Application
}
