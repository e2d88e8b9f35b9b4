//! Processing received messages.
//!
//! Checks run in a fixed order so the cheapest rejection wins: routing
//! (group, epoch, wire format), then decryption or membership tag, then the
//! sender's signature, then content rules. Nothing is adopted until the last
//! check has passed.

use arbor_crypto::{Secret, SignaturePublicKey};
use arbor_proto::{
    AuthenticatedContent, Commit, Content, ContentType, GroupContext, MlsMessage, MlsMessageBody,
    PrivateMessage, Proposal, ProposalRef, ReInit, Sender,
};
use tracing::{info, warn};

use super::{
    ClientState, Context, EpochTransition, GroupStatus,
    proposals::{
        Committer, apply_proposals, cache_proposal, check_proposal_sender, proposal_ref,
        resolve_proposals,
    },
};
use crate::{
    error::{MlsError, UsageError, ValidationError, VerificationError},
    key_package::validate_key_package,
    key_schedule::{self, KeySchedule},
    message_protection::{
        allowed_in_public, decrypt_private, from_public_message, verify_content_signature,
    },
    secret_tree::SecretTree,
    tree::{LeafCheck, validate_leaf},
    tree_math::LeafIndex,
    treekem::{apply_joiner_path, apply_update_path, decrypt_path_secret},
};

/// What a processed message turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessedMessage {
    /// Decrypted application data
    Application {
        /// Sending member
        sender: LeafIndex,
        /// Plaintext
        data: Vec<u8>,
        /// Authenticated but unencrypted data
        authenticated_data: Vec<u8>,
        /// Epoch the message was sent in
        epoch: u64,
    },
    /// A proposal, now cached for the next commit
    Proposal {
        /// Who proposed it
        sender: Sender,
        /// The proposal
        proposal: Proposal,
        /// Reference commits use to include it
        reference: ProposalRef,
    },
    /// A commit; the returned state is in the new epoch
    Commit(CommitSummary),
}

/// Effect of an applied commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    /// Committer
    pub sender: Sender,
    /// Epoch entered
    pub epoch: u64,
    /// Leaves of members added through Add proposals
    pub added: Vec<LeafIndex>,
    /// Leaf of a member that joined through this external commit
    pub joined: Option<LeafIndex>,
    /// Removed leaves
    pub removed: Vec<LeafIndex>,
    /// Leaves whose Update proposals were applied
    pub updated: Vec<LeafIndex>,
    /// Committed reinit, if any
    pub reinit: Option<ReInit>,
    /// Status after the commit
    pub status: GroupStatus,
}

fn content_type(message: &MlsMessage) -> Result<ContentType, MlsError> {
    match &message.body {
        MlsMessageBody::PublicMessage(message) => Ok(message.content.content_type()),
        MlsMessageBody::PrivateMessage(message) => Ok(message.content_type),
        _ => Err(UsageError::UnexpectedWireFormat(message.wire_format()).into()),
    }
}

impl ClientState {
    /// Process a `PublicMessage` or `PrivateMessage` addressed to this group.
    ///
    /// Application messages from up to `max_past_epochs` earlier epochs are
    /// still decrypted; past-epoch handshake messages are rejected.
    pub fn process_message(
        &self,
        ctx: &Context<'_>,
        message: &MlsMessage,
    ) -> Result<(Self, ProcessedMessage), MlsError> {
        self.check_provider(ctx)?;
        let content_type = content_type(message)?;
        match self.status {
            GroupStatus::RemovedFromGroup => return Err(self.invalid_state("process_message").into()),
            GroupStatus::SuspendedPendingReinit if content_type != ContentType::Application => {
                return Err(self.invalid_state("process handshake message").into());
            },
            GroupStatus::Active | GroupStatus::SuspendedPendingReinit => {},
        }

        let (group_id, epoch) = message
            .group_epoch()
            .ok_or(UsageError::UnexpectedWireFormat(message.wire_format()))?;
        if group_id != self.group_id() {
            return Err(ValidationError::WrongGroup.into());
        }

        match &message.body {
            MlsMessageBody::PublicMessage(public) => {
                if !allowed_in_public(content_type) {
                    return Err(ValidationError::UnencryptedApplicationMessage.into());
                }
                self.check_current_epoch(epoch)?;
                let content = from_public_message(
                    ctx.crypto,
                    &self.schedule.membership_key,
                    public.clone(),
                    &self.context,
                )?;
                self.process_content(ctx, self.secret_tree.clone(), content)
            },
            MlsMessageBody::PrivateMessage(private) if epoch < self.epoch() => {
                if content_type != ContentType::Application {
                    return Err(ValidationError::HandshakeFromPastEpoch.into());
                }
                self.process_past_application(ctx, private)
            },
            MlsMessageBody::PrivateMessage(private) => {
                self.check_current_epoch(epoch)?;
                let mut secret_tree = self.secret_tree.clone();
                let content = decrypt_private(
                    ctx.crypto,
                    &mut secret_tree,
                    ctx.ratchet_window(),
                    &self.schedule.sender_data_secret,
                    private,
                )?;
                self.process_content(ctx, secret_tree, content)
            },
            _ => Err(UsageError::UnexpectedWireFormat(message.wire_format()).into()),
        }
    }

    fn check_current_epoch(&self, epoch: u64) -> Result<(), MlsError> {
        if epoch == self.epoch() {
            Ok(())
        } else if epoch < self.epoch() {
            Err(ValidationError::HandshakeFromPastEpoch.into())
        } else {
            Err(ValidationError::WrongEpoch { expected: self.epoch(), actual: epoch }.into())
        }
    }

    fn process_past_application(
        &self,
        ctx: &Context<'_>,
        message: &PrivateMessage,
    ) -> Result<(Self, ProcessedMessage), MlsError> {
        let epoch = message.epoch;
        let mut history = self.history.clone();
        let record = history.get_mut(epoch).ok_or(ValidationError::EpochNotRetained(epoch))?;

        let content = decrypt_private(
            ctx.crypto,
            &mut record.secret_tree,
            ctx.ratchet_window(),
            &record.sender_data_secret,
            message,
        )
        .inspect_err(|err| warn!(epoch, %err, "failed to decrypt message from retained epoch"))?;

        let Sender::Member(leaf) = content.content.sender else {
            return Err(ValidationError::InvalidSenderType.into());
        };
        let signature_key = record
            .tree
            .leaf(LeafIndex(leaf))
            .map(|leaf| leaf.signature_key.clone())
            .ok_or(ValidationError::UnknownSender(leaf))?;
        verify_content_signature(ctx.crypto, &signature_key, &content, Some(&record.context))?;

        let Content::Application(data) = content.content.content else {
            return Err(ValidationError::HandshakeFromPastEpoch.into());
        };
        let mut next = self.clone();
        next.history = history;
        Ok((
            next,
            ProcessedMessage::Application {
                sender: LeafIndex(leaf),
                data,
                authenticated_data: content.content.authenticated_data,
                epoch,
            },
        ))
    }

    /// Signature key the sender of `content` signs with in this epoch.
    fn sender_key(&self, content: &AuthenticatedContent) -> Result<SignaturePublicKey, MlsError> {
        match content.content.sender {
            Sender::Member(leaf) => self
                .tree
                .leaf(LeafIndex(leaf))
                .map(|leaf| leaf.signature_key.clone())
                .ok_or_else(|| ValidationError::UnknownSender(leaf).into()),
            Sender::External(index) => usize::try_from(index)
                .ok()
                .and_then(|index| self.context.extensions.external_senders().get(index))
                .map(|sender| sender.signature_key.clone())
                .ok_or_else(|| ValidationError::UnknownSender(index).into()),
            Sender::NewMemberProposal => match &content.content.content {
                Content::Proposal(Proposal::Add(add)) => {
                    Ok(add.key_package.leaf_node.signature_key.clone())
                },
                _ => Err(ValidationError::InvalidSenderType.into()),
            },
            Sender::NewMemberCommit => match &content.content.content {
                Content::Commit(Commit { path: Some(path), .. }) => {
                    Ok(path.leaf_node.signature_key.clone())
                },
                Content::Commit(_) => Err(ValidationError::PathRequired.into()),
                _ => Err(ValidationError::InvalidSenderType.into()),
            },
        }
    }

    fn process_content(
        &self,
        ctx: &Context<'_>,
        secret_tree: SecretTree,
        content: AuthenticatedContent,
    ) -> Result<(Self, ProcessedMessage), MlsError> {
        let sender = content.content.sender;
        if sender == Sender::Member(self.own_leaf().0) {
            return Err(ValidationError::OwnMessage.into());
        }
        let signature_key = self.sender_key(&content)?;
        let bound = sender.binds_group_context().then_some(&self.context);
        verify_content_signature(ctx.crypto, &signature_key, &content, bound)?;

        match &content.content.content {
            Content::Application(data) => {
                let Sender::Member(leaf) = sender else {
                    return Err(ValidationError::InvalidSenderType.into());
                };
                let mut next = self.clone();
                next.secret_tree = secret_tree;
                Ok((
                    next,
                    ProcessedMessage::Application {
                        sender: LeafIndex(leaf),
                        data: data.clone(),
                        authenticated_data: content.content.authenticated_data.clone(),
                        epoch: self.epoch(),
                    },
                ))
            },
            Content::Proposal(proposal) => {
                self.process_proposal(ctx, secret_tree, &content, proposal.clone())
            },
            Content::Commit(commit) => self.process_commit(ctx, secret_tree, &content, commit),
        }
    }

    fn process_proposal(
        &self,
        ctx: &Context<'_>,
        secret_tree: SecretTree,
        content: &AuthenticatedContent,
        proposal: Proposal,
    ) -> Result<(Self, ProcessedMessage), MlsError> {
        let sender = content.content.sender;
        check_proposal_sender(&sender, &proposal)?;
        match (&proposal, sender) {
            (Proposal::Update(update), Sender::Member(leaf)) => validate_leaf(
                ctx,
                &self.tree,
                &update.leaf_node,
                &LeafCheck::update(self.group_id(), LeafIndex(leaf), &self.context.extensions),
            )?,
            (Proposal::Add(add), _) => {
                validate_key_package(ctx, &add.key_package, &self.tree, &self.context.extensions)?;
            },
            _ => {},
        }
        if !ctx.review.review_proposal(&sender, &proposal) {
            warn!(
                proposal_type = proposal.proposal_type().0,
                ?sender,
                "proposal rejected by review"
            );
            return Err(ValidationError::RejectedByReview.into());
        }

        let reference = proposal_ref(ctx.crypto, content)?;
        let mut next = self.clone();
        next.secret_tree = secret_tree;
        cache_proposal(&mut next.proposals, reference.clone(), proposal.clone(), sender);
        Ok((next, ProcessedMessage::Proposal { sender, proposal, reference }))
    }

    fn process_commit(
        &self,
        ctx: &Context<'_>,
        secret_tree: SecretTree,
        content: &AuthenticatedContent,
        commit: &Commit,
    ) -> Result<(Self, ProcessedMessage), MlsError> {
        let crypto = ctx.crypto;
        let sender = content.content.sender;
        let confirmation_tag =
            content.auth.confirmation_tag.clone().ok_or(VerificationError::ConfirmationTag)?;

        let committer = match (sender, &commit.path) {
            (Sender::Member(leaf), _) => Committer::Member(LeafIndex(leaf)),
            (Sender::NewMemberCommit, Some(path)) => Committer::External(&path.leaf_node),
            (Sender::NewMemberCommit, None) => return Err(ValidationError::PathRequired.into()),
            (Sender::External(_) | Sender::NewMemberProposal, _) => {
                return Err(ValidationError::InvalidSenderType.into());
            },
        };
        let resolved = resolve_proposals(commit, sender, &self.proposals)?;
        let proposals: Vec<Proposal> = resolved.iter().map(|r| r.proposal.clone()).collect();
        if !ctx.review.review_commit(&sender, &proposals) {
            warn!(?sender, proposals = proposals.len(), "commit rejected by review");
            return Err(ValidationError::RejectedByReview.into());
        }

        let applied = apply_proposals(
            ctx,
            &self.context,
            &self.tree,
            committer,
            &resolved,
            &self.resumption_psks,
        )?;
        if applied.path_required && commit.path.is_none() {
            return Err(ValidationError::PathRequired.into());
        }
        let own = self.own_leaf();

        if applied.removed.contains(&own) {
            let mut next = self.clone();
            next.status = GroupStatus::RemovedFromGroup;
            next.proposals.clear();
            next.pending_updates.clear();
            info!(epoch = self.epoch(), leaf = own.0, ?sender, "removed from group");
            return Ok((
                next,
                ProcessedMessage::Commit(CommitSummary {
                    sender,
                    epoch: self.epoch() + 1,
                    added: applied.joiner_leaves(),
                    joined: None,
                    removed: applied.removed,
                    updated: applied.updated,
                    reinit: None,
                    status: GroupStatus::RemovedFromGroup,
                }),
            ));
        }

        let mut private = self.private.clone();
        if applied.updated.contains(&own) {
            let installed = applied.tree.leaf(own).map(|leaf| &leaf.encryption_key);
            let pending = self
                .pending_updates
                .iter()
                .find(|pending| Some(&pending.encryption_key) == installed)
                .ok_or_else(|| MlsError::Internal("own update committed without its key".into()))?;
            private.merge([(own.node(), pending.secret.clone())]);
        }

        let mut tree = applied.tree.clone();
        let mut context = GroupContext {
            epoch: self.epoch() + 1,
            extensions: applied.extensions.clone(),
            ..self.context.clone()
        };
        let excluded = applied.joiner_leaves();
        let group_id = self.group_id();
        let mut joined = None;

        let (path_keys, commit_secret) = match (&commit.path, committer) {
            (Some(path), committer) => {
                let filtered = match committer {
                    Committer::Member(leaf) => apply_update_path(
                        ctx,
                        &mut tree,
                        leaf,
                        path,
                        group_id,
                        &applied.extensions,
                        &excluded,
                    )?,
                    Committer::External(_) => {
                        let (leaf, filtered) =
                            apply_joiner_path(ctx, &mut tree, path, group_id, &applied.extensions)?;
                        joined = Some(leaf);
                        filtered
                    },
                };
                context.tree_hash = tree.tree_hash(crypto)?.into();
                decrypt_path_secret(crypto, &tree, &private, path, &filtered, &excluded, &context)?
            },
            (None, _) => {
                context.tree_hash = tree.tree_hash(crypto)?.into();
                (Vec::new(), Secret::zero(crypto.kdf_extract_size()))
            },
        };

        let confirmed =
            key_schedule::confirmed_transcript_hash(crypto, &self.interim_transcript_hash, content)?;
        context.confirmed_transcript_hash = confirmed.clone().into();

        let init_secret = match &applied.external_init {
            Some(kem_output) => key_schedule::external_init_receiver(
                crypto,
                &self.schedule.external_key_pair(crypto)?.secret,
                kem_output,
            )?,
            None => self.schedule.init_secret.clone(),
        };
        let psk_secret = key_schedule::psk_secret(crypto, &applied.psks)?;
        let (keys, _) =
            KeySchedule::next_epoch(crypto, &init_secret, &commit_secret, &psk_secret, &context)?;
        keys.schedule.verify_confirmation_tag(crypto, &confirmed, &confirmation_tag)?;
        private.merge(path_keys);

        let next = self.advance(
            ctx,
            secret_tree,
            EpochTransition {
                context,
                tree,
                schedule: keys.schedule,
                private,
                confirmation_tag,
                reinit: applied.reinit.clone(),
            },
        )?;
        let summary = CommitSummary {
            sender,
            epoch: next.epoch(),
            added: applied.joiner_leaves(),
            joined,
            removed: applied.removed,
            updated: applied.updated,
            reinit: applied.reinit,
            status: next.status,
        };
        Ok((next, ProcessedMessage::Commit(summary)))
    }
}
