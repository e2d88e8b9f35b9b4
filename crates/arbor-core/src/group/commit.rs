//! Creating proposals and commits.

use arbor_crypto::{CipherSuite, Secret, SignatureSecretKey, labeled};
use arbor_proto::{
    Add, AuthenticatedContent, Commit, Content, EncryptedGroupSecrets, ExtensionList,
    FramedContent, GroupContext, GroupContextExtensions, GroupSecrets, KeyPackage, LeafNodeSource,
    MlsMessage, MlsMessageBody, PathSecret, PreSharedKey, PreSharedKeyId, Proposal, ProposalOrRef,
    ProtocolVersion, Psk, PublicMessage, ReInit, Remove, Sender, Update, Welcome, WireFormat,
    codec,
};
use tls_codec::VLBytes;
use tracing::info;

use super::{
    ClientState, Context, EpochTransition, PendingUpdate,
    proposals::{
        AppliedProposals, CachedProposal, Committer, ResolvedProposal, apply_proposals,
        cache_proposal, check_proposal_sender, proposal_ref,
    },
};
use crate::{
    error::MlsError,
    key_package::{SigningIdentity, key_package_ref, sign_leaf},
    key_schedule::{self, KeySchedule},
    message_protection::{encrypt_private, sign_content, to_public_message},
    secret_tree::SecretTree,
    tree::TreePrivate,
    tree_math::LeafIndex,
    treekem::{PathUpdate, create_update_path},
};

pub(crate) const WELCOME_LABEL: &str = "Welcome";

/// What to put into a commit besides the cached proposals.
#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    /// Proposals to commit by value
    pub proposals: Vec<Proposal>,
    /// Include an update path even if no proposal requires one
    pub force_path: bool,
    /// Application data bound to the commit's signature
    pub authenticated_data: Vec<u8>,
    /// Also return a signed `GroupInfo` of the new epoch
    pub group_info: bool,
}

/// Messages produced by a commit.
#[derive(Debug, Clone)]
pub struct CommitOutput {
    /// The commit, for every current member
    pub commit: MlsMessage,
    /// Welcome for the members the commit adds
    pub welcome: Option<MlsMessage>,
    /// `GroupInfo` of the new epoch, when requested
    pub group_info: Option<MlsMessage>,
}

/// A signed commit and what the Welcome for it needs.
pub(crate) struct SealedCommit {
    pub(crate) content: AuthenticatedContent,
    pub(crate) joiner_secret: Secret,
    pub(crate) welcome_secret: Secret,
    pub(crate) path: Option<PathUpdate>,
    pub(crate) applied: AppliedProposals,
}

/// Inputs of [`seal_commit`] that describe the epoch being left.
pub(crate) struct CommitBase<'a> {
    pub(crate) context: &'a GroupContext,
    pub(crate) interim_transcript_hash: &'a [u8],
    pub(crate) init_secret: &'a Secret,
    pub(crate) private: TreePrivate,
}

/// Run the commit half of the epoch transition: update path, signature,
/// transcript hash, key schedule and confirmation tag.
///
/// `applied.tree` must already hold the committer's leaf at `sender_leaf`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn seal_commit(
    ctx: &Context<'_>,
    base: CommitBase<'_>,
    sender: Sender,
    sender_leaf: LeafIndex,
    identity: &SigningIdentity,
    applied: AppliedProposals,
    proposals: Vec<ProposalOrRef>,
    options: &CommitOptions,
    wire_format: WireFormat,
) -> Result<(SealedCommit, EpochTransition), MlsError> {
    let crypto = ctx.crypto;
    let mut tree = applied.tree.clone();
    let mut context = GroupContext {
        epoch: base.context.epoch + 1,
        tree_hash: VLBytes::new(Vec::new()),
        extensions: applied.extensions.clone(),
        ..base.context.clone()
    };

    let path = if applied.path_required || options.force_path {
        let excluded = applied.joiner_leaves();
        Some(create_update_path(crypto, &mut tree, sender_leaf, identity, &mut context, &excluded)?)
    } else {
        context.tree_hash = tree.tree_hash(crypto)?.into();
        None
    };
    let commit_secret = match &path {
        Some(path) => path.commit_secret.clone(),
        None => Secret::zero(crypto.kdf_extract_size()),
    };

    let content = FramedContent {
        group_id: base.context.group_id.as_slice().to_vec(),
        epoch: base.context.epoch,
        sender,
        authenticated_data: options.authenticated_data.clone(),
        content: Content::Commit(Commit {
            proposals,
            path: path.as_ref().map(|path| path.update_path.clone()),
        }),
    };
    let mut content =
        sign_content(crypto, identity.signer(), wire_format, content, Some(base.context))?;

    let confirmed = key_schedule::confirmed_transcript_hash(
        crypto,
        base.interim_transcript_hash,
        &content,
    )?;
    context.confirmed_transcript_hash = confirmed.clone().into();

    let psk_secret = key_schedule::psk_secret(crypto, &applied.psks)?;
    let (keys, joiner_secret) =
        KeySchedule::next_epoch(crypto, base.init_secret, &commit_secret, &psk_secret, &context)?;
    let confirmation_tag = keys.schedule.confirmation_tag(crypto, &confirmed)?;
    content.auth.confirmation_tag = Some(confirmation_tag.clone());

    let mut private = base.private;
    if let Some(path) = &path {
        private.merge(path.private_keys.iter().map(|(node, key)| (*node, key.clone())));
    }

    let transition = EpochTransition {
        context,
        tree,
        schedule: keys.schedule,
        private,
        confirmation_tag,
        reinit: applied.reinit.clone(),
    };
    Ok((
        SealedCommit {
            content,
            joiner_secret,
            welcome_secret: keys.welcome_secret,
            path,
            applied,
        },
        transition,
    ))
}

/// Build the Welcome for the joiners of a sealed commit. `next` is the
/// committer's state in the new epoch.
pub(crate) fn build_welcome(
    ctx: &Context<'_>,
    next: &ClientState,
    sealed: &SealedCommit,
) -> Result<Option<MlsMessage>, MlsError> {
    if sealed.applied.joiners.is_empty() {
        return Ok(None);
    }
    let crypto = ctx.crypto;

    let group_info = next.group_info(ctx, ctx.config.ratchet_tree_extension)?;
    let (key, nonce) = key_schedule::welcome_key_nonce(crypto, &sealed.welcome_secret)?;
    let encrypted_group_info =
        crypto.aead_seal(key.as_bytes(), nonce.as_bytes(), &[], &codec::encode(&group_info)?)?;

    let psks: Vec<PreSharedKeyId> = sealed.applied.psks.iter().map(|(id, _)| id.clone()).collect();
    let mut secrets = Vec::with_capacity(sealed.applied.joiners.len());
    for (leaf, key_package) in &sealed.applied.joiners {
        let path_secret = sealed
            .path
            .as_ref()
            .and_then(|path| path.path_secret_for(*leaf))
            .map(|secret| PathSecret { path_secret: secret.clone() });
        let group_secrets = GroupSecrets {
            joiner_secret: sealed.joiner_secret.clone(),
            path_secret,
            psks: psks.clone(),
        };
        secrets.push(EncryptedGroupSecrets {
            new_member: key_package_ref(crypto, key_package)?,
            encrypted_group_secrets: labeled::encrypt_with_label(
                crypto,
                &key_package.init_key,
                WELCOME_LABEL,
                &encrypted_group_info,
                &codec::encode(&group_secrets)?,
            )?,
        });
    }

    Ok(Some(MlsMessage::new(MlsMessageBody::Welcome(Welcome {
        cipher_suite: next.context.cipher_suite,
        secrets,
        encrypted_group_info: encrypted_group_info.into(),
    }))))
}

impl ClientState {
    fn handshake_wire_format(ctx: &Context<'_>) -> WireFormat {
        if ctx.config.encrypt_handshake {
            WireFormat::PrivateMessage
        } else {
            WireFormat::PublicMessage
        }
    }

    fn framed(&self, content: Content, authenticated_data: Vec<u8>) -> FramedContent {
        FramedContent {
            group_id: self.group_id().to_vec(),
            epoch: self.epoch(),
            sender: Sender::Member(self.own_leaf().0),
            authenticated_data,
            content,
        }
    }

    /// Wrap signed content for the wire with this epoch's keys.
    pub(crate) fn protect(
        &self,
        ctx: &Context<'_>,
        secret_tree: &mut SecretTree,
        content: AuthenticatedContent,
    ) -> Result<MlsMessage, MlsError> {
        let body = match content.wire_format {
            WireFormat::PrivateMessage => MlsMessageBody::PrivateMessage(encrypt_private(
                ctx.crypto,
                secret_tree,
                &self.schedule.sender_data_secret,
                &content,
                ctx.config,
            )?),
            _ => MlsMessageBody::PublicMessage(to_public_message(
                ctx.crypto,
                &self.schedule.membership_key,
                content,
                &self.context,
            )?),
        };
        Ok(MlsMessage::new(body))
    }

    /// Encrypt application data for the group.
    pub fn create_application_message(
        &self,
        ctx: &Context<'_>,
        data: &[u8],
        authenticated_data: &[u8],
    ) -> Result<(Self, MlsMessage), MlsError> {
        self.require_active("create_application_message")?;
        self.check_provider(ctx)?;

        let content = sign_content(
            ctx.crypto,
            self.identity.signer(),
            WireFormat::PrivateMessage,
            self.framed(Content::Application(data.to_vec()), authenticated_data.to_vec()),
            Some(&self.context),
        )?;
        let mut next = self.clone();
        let message = self.protect(ctx, &mut next.secret_tree, content)?;
        Ok((next, message))
    }

    /// Send `proposal` to the group and cache it for the next commit.
    pub fn create_proposal(
        &self,
        ctx: &Context<'_>,
        proposal: Proposal,
    ) -> Result<(Self, MlsMessage), MlsError> {
        self.require_active("create_proposal")?;
        self.check_provider(ctx)?;
        let sender = Sender::Member(self.own_leaf().0);
        check_proposal_sender(&sender, &proposal)?;

        let content = sign_content(
            ctx.crypto,
            self.identity.signer(),
            Self::handshake_wire_format(ctx),
            self.framed(Content::Proposal(proposal.clone()), Vec::new()),
            Some(&self.context),
        )?;
        let reference = proposal_ref(ctx.crypto, &content)?;

        let mut next = self.clone();
        let message = self.protect(ctx, &mut next.secret_tree, content)?;
        cache_proposal(&mut next.proposals, reference, proposal, sender);
        Ok((next, message))
    }

    /// Propose adding the owner of `key_package`.
    pub fn propose_add(
        &self,
        ctx: &Context<'_>,
        key_package: KeyPackage,
    ) -> Result<(Self, MlsMessage), MlsError> {
        self.create_proposal(ctx, Proposal::Add(Add { key_package }))
    }

    /// Propose removing the member at `leaf`.
    pub fn propose_remove(
        &self,
        ctx: &Context<'_>,
        leaf: LeafIndex,
    ) -> Result<(Self, MlsMessage), MlsError> {
        self.create_proposal(ctx, Proposal::Remove(Remove { removed: leaf.0 }))
    }

    /// Propose a fresh encryption key for this member's leaf.
    ///
    /// The private key is kept until a commit applies the update or the
    /// epoch ends.
    pub fn propose_update(&self, ctx: &Context<'_>) -> Result<(Self, MlsMessage), MlsError> {
        self.require_active("propose_update")?;
        let own = self.own_leaf();
        let mut leaf = self
            .tree
            .leaf(own)
            .cloned()
            .ok_or_else(|| MlsError::Internal(format!("own leaf {} is blank", own.0)))?;
        let keys = ctx.crypto.kem_generate()?;
        leaf.encryption_key = keys.public.clone();
        leaf.leaf_node_source = LeafNodeSource::Update;
        sign_leaf(ctx.crypto, &mut leaf, self.identity.signer(), Some((self.group_id(), own.0)))?;

        let (mut next, message) =
            self.create_proposal(ctx, Proposal::Update(Update { leaf_node: leaf }))?;
        next.pending_updates.push(PendingUpdate { encryption_key: keys.public, secret: keys.secret });
        Ok((next, message))
    }

    /// Propose injecting the external PSK `psk_id`.
    pub fn propose_external_psk(
        &self,
        ctx: &Context<'_>,
        psk_id: Vec<u8>,
    ) -> Result<(Self, MlsMessage), MlsError> {
        let psk = PreSharedKeyId {
            psk: Psk::External { psk_id },
            psk_nonce: ctx.crypto.random_vec(ctx.crypto.kdf_extract_size()).into(),
        };
        self.create_proposal(ctx, Proposal::PreSharedKey(PreSharedKey { psk }))
    }

    /// Propose replacing the group context extensions.
    pub fn propose_group_context_extensions(
        &self,
        ctx: &Context<'_>,
        extensions: ExtensionList,
    ) -> Result<(Self, MlsMessage), MlsError> {
        self.create_proposal(
            ctx,
            Proposal::GroupContextExtensions(GroupContextExtensions { extensions }),
        )
    }

    /// Propose reinitializing the group under new parameters.
    pub fn propose_reinit(
        &self,
        ctx: &Context<'_>,
        group_id: Vec<u8>,
        cipher_suite: CipherSuite,
        extensions: ExtensionList,
    ) -> Result<(Self, MlsMessage), MlsError> {
        self.create_proposal(
            ctx,
            Proposal::ReInit(ReInit {
                group_id: group_id.into(),
                version: ProtocolVersion::MLS_10,
                cipher_suite,
                extensions,
            }),
        )
    }

    /// Commit every cached proposal plus `options.proposals` and move to
    /// the next epoch.
    ///
    /// Cached updates from this member and removals of this member are
    /// skipped; a committer cannot apply either to itself.
    pub fn create_commit(
        &self,
        ctx: &Context<'_>,
        options: CommitOptions,
    ) -> Result<(Self, CommitOutput), MlsError> {
        self.require_active("create_commit")?;
        self.check_provider(ctx)?;
        let own = self.own_leaf();
        let sender = Sender::Member(own.0);

        let mut entries = Vec::new();
        let mut resolved = Vec::new();
        for (reference, cached) in &self.proposals {
            if !committable_by(cached, own) {
                continue;
            }
            entries.push(ProposalOrRef::Reference(reference.clone()));
            resolved.push(ResolvedProposal { proposal: cached.proposal.clone(), sender: cached.sender });
        }
        for proposal in &options.proposals {
            entries.push(ProposalOrRef::Proposal(proposal.clone()));
            resolved.push(ResolvedProposal { proposal: proposal.clone(), sender });
        }

        let applied = apply_proposals(
            ctx,
            &self.context,
            &self.tree,
            Committer::Member(own),
            &resolved,
            &self.resumption_psks,
        )?;
        let (sealed, transition) = seal_commit(
            ctx,
            CommitBase {
                context: &self.context,
                interim_transcript_hash: &self.interim_transcript_hash,
                init_secret: &self.schedule.init_secret,
                private: self.private.clone(),
            },
            sender,
            own,
            &self.identity,
            applied,
            entries,
            &options,
            Self::handshake_wire_format(ctx),
        )?;

        let mut secret_tree = self.secret_tree.clone();
        let commit = self.protect(ctx, &mut secret_tree, sealed.content.clone())?;
        let next = self.advance(ctx, secret_tree, transition)?;

        let welcome = build_welcome(ctx, &next, &sealed)?;
        let group_info = if options.group_info {
            Some(next.export_group_info(ctx, ctx.config.ratchet_tree_extension)?)
        } else {
            None
        };
        info!(
            epoch = next.epoch(),
            added = sealed.applied.joiners.len(),
            removed = sealed.applied.removed.len(),
            path = sealed.path.is_some(),
            "created commit"
        );

        Ok((next, CommitOutput { commit, welcome, group_info }))
    }
}

fn committable_by(cached: &CachedProposal, committer: LeafIndex) -> bool {
    match (&cached.proposal, cached.sender) {
        (Proposal::Update(_), Sender::Member(leaf)) => leaf != committer.0,
        (Proposal::Remove(remove), _) => remove.removed != committer.0,
        _ => true,
    }
}

/// Proposal from an entry of the group's `external_senders` extension.
pub fn external_sender_proposal(
    ctx: &Context<'_>,
    signer: &SignatureSecretKey,
    sender_index: u32,
    group_id: &[u8],
    epoch: u64,
    proposal: Proposal,
) -> Result<MlsMessage, MlsError> {
    let sender = Sender::External(sender_index);
    check_proposal_sender(&sender, &proposal)?;
    unbound_proposal(ctx, signer, sender, group_id, epoch, proposal)
}

/// Proposal by which a non-member asks to be added with its own key
/// package.
pub fn new_member_proposal(
    ctx: &Context<'_>,
    signer: &SignatureSecretKey,
    group_id: &[u8],
    epoch: u64,
    key_package: KeyPackage,
) -> Result<MlsMessage, MlsError> {
    unbound_proposal(
        ctx,
        signer,
        Sender::NewMemberProposal,
        group_id,
        epoch,
        Proposal::Add(Add { key_package }),
    )
}

fn unbound_proposal(
    ctx: &Context<'_>,
    signer: &SignatureSecretKey,
    sender: Sender,
    group_id: &[u8],
    epoch: u64,
    proposal: Proposal,
) -> Result<MlsMessage, MlsError> {
    let content = FramedContent {
        group_id: group_id.to_vec(),
        epoch,
        sender,
        authenticated_data: Vec::new(),
        content: Content::Proposal(proposal),
    };
    let content = sign_content(ctx.crypto, signer, WireFormat::PublicMessage, content, None)?;
    Ok(MlsMessage::new(MlsMessageBody::PublicMessage(PublicMessage {
        content: content.content,
        auth: content.auth,
        membership_tag: None,
    })))
}
