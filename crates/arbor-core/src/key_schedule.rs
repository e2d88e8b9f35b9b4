//! Key schedule, PSK injection and transcript hashes (RFC 9420 section 8).
//!
//! ```text
//!             init_secret[n-1]
//!                   │
//! commit_secret ──► Extract ──► ExpandWithLabel(., "joiner", GroupContext[n])
//!                                   │
//!                               joiner_secret
//!                                   │
//!    psk_secret ──────────────► Extract
//!                                   │
//!                             member secret ──► DeriveSecret(., "welcome")
//!                                   │
//!                  ExpandWithLabel(., "epoch", GroupContext[n])
//!                                   │
//!                              epoch_secret ──► nine DeriveSecret outputs
//! ```
//!
//! # Security
//!
//! Every intermediate secret is a [`Secret`] and zeroizes on drop. The
//! schedule keeps only the nine derived secrets; the joiner, member and epoch
//! secrets are dropped as soon as they have been expanded.

use arbor_crypto::{CipherSuiteProvider, HpkeKeyPair, HpkePublicKey, HpkeSecretKey, Secret, labeled};
use arbor_proto::{AuthenticatedContent, GroupContext, PreSharedKeyId, codec, framing};
use tls_codec::Serialize;

use crate::error::{MlsError, VerificationError};

const EXTERNAL_INIT_CONTEXT: &[u8] = b"MLS 1.0 external init secret";

/// Secrets derived from one epoch secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchedule {
    pub(crate) sender_data_secret: Secret,
    pub(crate) encryption_secret: Secret,
    pub(crate) exporter_secret: Secret,
    pub(crate) external_secret: Secret,
    pub(crate) confirmation_key: Secret,
    pub(crate) membership_key: Secret,
    pub(crate) resumption_psk: Secret,
    pub(crate) epoch_authenticator: Secret,
    pub(crate) init_secret: Secret,
}

/// Output of running the schedule from a joiner secret.
#[derive(Debug)]
pub struct EpochKeys {
    /// Secrets of the new epoch
    pub schedule: KeySchedule,
    /// Secret protecting the Welcome for this epoch
    pub welcome_secret: Secret,
}

impl KeySchedule {
    /// Expand an epoch secret into the nine epoch secrets.
    pub fn from_epoch_secret(
        crypto: &dyn CipherSuiteProvider,
        epoch_secret: &Secret,
    ) -> Result<Self, MlsError> {
        let derive = |label: &str| labeled::derive_secret(crypto, epoch_secret, label);
        Ok(Self {
            sender_data_secret: derive("sender data")?,
            encryption_secret: derive("encryption")?,
            exporter_secret: derive("exporter")?,
            external_secret: derive("external")?,
            confirmation_key: derive("confirm")?,
            membership_key: derive("membership")?,
            resumption_psk: derive("resumption")?,
            epoch_authenticator: derive("authentication")?,
            init_secret: derive("init")?,
        })
    }

    /// Run the schedule from a joiner secret and the PSK secret.
    pub fn from_joiner(
        crypto: &dyn CipherSuiteProvider,
        joiner_secret: &Secret,
        psk_secret: &Secret,
        context: &GroupContext,
    ) -> Result<EpochKeys, MlsError> {
        let member = member_secret(crypto, joiner_secret, psk_secret)?;
        let welcome_secret = labeled::derive_secret(crypto, &member, "welcome")?;
        let epoch_secret = labeled::expand_with_label(
            crypto,
            &member,
            "epoch",
            &codec::encode(context)?,
            crypto.kdf_extract_size(),
        )?;
        Ok(EpochKeys { schedule: Self::from_epoch_secret(crypto, &epoch_secret)?, welcome_secret })
    }

    /// Full epoch transition: joiner secret from the previous init secret
    /// and the commit secret, then [`KeySchedule::from_joiner`].
    pub fn next_epoch(
        crypto: &dyn CipherSuiteProvider,
        init_secret: &Secret,
        commit_secret: &Secret,
        psk_secret: &Secret,
        context: &GroupContext,
    ) -> Result<(EpochKeys, Secret), MlsError> {
        let joiner = joiner_secret(crypto, init_secret, commit_secret, context)?;
        let keys = Self::from_joiner(crypto, &joiner, psk_secret, context)?;
        Ok((keys, joiner))
    }

    /// `epoch_authenticator` of this epoch.
    pub fn epoch_authenticator(&self) -> &Secret {
        &self.epoch_authenticator
    }

    /// `resumption_psk` of this epoch.
    pub fn resumption_psk(&self) -> &Secret {
        &self.resumption_psk
    }

    /// `MLS-Exporter(label, context, length)`.
    pub fn export(
        &self,
        crypto: &dyn CipherSuiteProvider,
        label: &str,
        context: &[u8],
        length: usize,
    ) -> Result<Secret, MlsError> {
        let derived = labeled::derive_secret(crypto, &self.exporter_secret, label)?;
        let context_hash = crypto.hash(context)?;
        Ok(labeled::expand_with_label(crypto, &derived, "exported", &context_hash, length)?)
    }

    /// HPKE key pair external joiners encrypt to.
    pub fn external_key_pair(
        &self,
        crypto: &dyn CipherSuiteProvider,
    ) -> Result<HpkeKeyPair, MlsError> {
        Ok(crypto.kem_derive(self.external_secret.as_bytes())?)
    }

    /// `MAC(confirmation_key, confirmed_transcript_hash)`.
    pub fn confirmation_tag(
        &self,
        crypto: &dyn CipherSuiteProvider,
        confirmed_transcript_hash: &[u8],
    ) -> Result<Vec<u8>, MlsError> {
        Ok(crypto.mac(self.confirmation_key.as_bytes(), confirmed_transcript_hash)?)
    }

    /// Constant-time check of a received confirmation tag.
    pub fn verify_confirmation_tag(
        &self,
        crypto: &dyn CipherSuiteProvider,
        confirmed_transcript_hash: &[u8],
        tag: &[u8],
    ) -> Result<(), MlsError> {
        crypto
            .verify_mac(self.confirmation_key.as_bytes(), confirmed_transcript_hash, tag)
            .map_err(|_| VerificationError::ConfirmationTag.into())
    }
}

/// `ExpandWithLabel(Extract(init_secret, commit_secret), "joiner", context, Nh)`.
pub fn joiner_secret(
    crypto: &dyn CipherSuiteProvider,
    init_secret: &Secret,
    commit_secret: &Secret,
    context: &GroupContext,
) -> Result<Secret, MlsError> {
    let prk = crypto.kdf_extract(init_secret.as_bytes(), commit_secret.as_bytes())?;
    Ok(labeled::expand_with_label(
        crypto,
        &prk,
        "joiner",
        &codec::encode(context)?,
        crypto.kdf_extract_size(),
    )?)
}

fn member_secret(
    crypto: &dyn CipherSuiteProvider,
    joiner_secret: &Secret,
    psk_secret: &Secret,
) -> Result<Secret, MlsError> {
    Ok(crypto.kdf_extract(joiner_secret.as_bytes(), psk_secret.as_bytes())?)
}

/// `DeriveSecret(Extract(joiner_secret, psk_secret), "welcome")`, which a
/// joiner needs before it has seen the group context.
pub fn welcome_secret(
    crypto: &dyn CipherSuiteProvider,
    joiner_secret: &Secret,
    psk_secret: &Secret,
) -> Result<Secret, MlsError> {
    let member = member_secret(crypto, joiner_secret, psk_secret)?;
    Ok(labeled::derive_secret(crypto, &member, "welcome")?)
}

/// AEAD key and nonce protecting the `GroupInfo` of a Welcome.
pub fn welcome_key_nonce(
    crypto: &dyn CipherSuiteProvider,
    welcome_secret: &Secret,
) -> Result<(Secret, Secret), MlsError> {
    let key = labeled::expand_with_label(crypto, welcome_secret, "key", &[], crypto.aead_key_size())?;
    let nonce =
        labeled::expand_with_label(crypto, welcome_secret, "nonce", &[], crypto.aead_nonce_size())?;
    Ok((key, nonce))
}

/// Fold PSKs into `psk_secret`, in proposal order.
///
/// No PSKs gives `Nh` zero bytes.
pub fn psk_secret(
    crypto: &dyn CipherSuiteProvider,
    psks: &[(PreSharedKeyId, Secret)],
) -> Result<Secret, MlsError> {
    let nh = crypto.kdf_extract_size();
    let count = u16::try_from(psks.len())
        .map_err(|_| MlsError::Internal(format!("{} PSKs exceed u16", psks.len())))?;
    let zero = Secret::zero(nh);

    let mut secret = Secret::zero(nh);
    for (index, (id, psk)) in (0u16..).zip(psks) {
        let extracted = crypto.kdf_extract(zero.as_bytes(), psk.as_bytes())?;

        let mut label = codec::encode(id)?;
        index.tls_serialize(&mut label)?;
        count.tls_serialize(&mut label)?;

        let input = labeled::expand_with_label(crypto, &extracted, "derived psk", &label, nh)?;
        secret = crypto.kdf_extract(input.as_bytes(), secret.as_bytes())?;
    }
    Ok(secret)
}

/// Sender side of `external_init`: returns the KEM output to publish and
/// the init secret to use in place of the group's.
pub fn external_init_sender(
    crypto: &dyn CipherSuiteProvider,
    external_pub: &HpkePublicKey,
) -> Result<(Vec<u8>, Secret), MlsError> {
    let export = crypto.hpke_export_sender(
        external_pub,
        &[],
        EXTERNAL_INIT_CONTEXT,
        crypto.kdf_extract_size(),
    )?;
    Ok((export.kem_output, export.secret))
}

/// Receiver side of `external_init`.
pub fn external_init_receiver(
    crypto: &dyn CipherSuiteProvider,
    external_secret_key: &HpkeSecretKey,
    kem_output: &[u8],
) -> Result<Secret, MlsError> {
    Ok(crypto.hpke_export_receiver(
        external_secret_key,
        kem_output,
        &[],
        EXTERNAL_INIT_CONTEXT,
        crypto.kdf_extract_size(),
    )?)
}

/// `Hash(interim_transcript_hash || ConfirmedTranscriptHashInput)`.
pub fn confirmed_transcript_hash(
    crypto: &dyn CipherSuiteProvider,
    interim_transcript_hash: &[u8],
    commit: &AuthenticatedContent,
) -> Result<Vec<u8>, MlsError> {
    let mut input = interim_transcript_hash.to_vec();
    input.extend(framing::confirmed_transcript_hash_input(commit)?);
    Ok(crypto.hash(&input)?)
}

/// `Hash(confirmed_transcript_hash || InterimTranscriptHashInput)`.
pub fn interim_transcript_hash(
    crypto: &dyn CipherSuiteProvider,
    confirmed_transcript_hash: &[u8],
    confirmation_tag: &[u8],
) -> Result<Vec<u8>, MlsError> {
    let mut input = confirmed_transcript_hash.to_vec();
    codec::write_vl(confirmation_tag, &mut input)?;
    Ok(crypto.hash(&input)?)
}
