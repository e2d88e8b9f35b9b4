//! Group state machine (RFC 9420 section 12).
//!
//! [`ClientState`] is one member's view of one epoch of one group. Every
//! operation borrows the state immutably and returns a fresh state together
//! with its output, so a failed operation leaves the caller's state exactly
//! as it was.
//!
//! ```text
//!              create_group / join_group / join_group_external
//!                                  │
//!                                  ▼
//!   ┌──────── create_commit / process_message(commit) ────────┐
//!   │                              │                          │
//!   ▼                              ▼                          ▼
//! Active ──(reinit committed)──► SuspendedPendingReinit    RemovedFromGroup
//!                                  │
//!                   reinit_create_new_group / join_group_from_reinit
//! ```
//!
//! # Invariants
//!
//! - `context.epoch` increases by exactly one per accepted commit.
//! - `context.tree_hash` is the tree hash of `tree`.
//! - `private` holds keys only for non-blank nodes on the member's own
//!   direct path.
//! - The proposal cache and pending own updates are emptied by every epoch
//!   transition.

mod commit;
mod history;
mod join;
mod process;
mod proposals;
mod resumption;

use std::{collections::BTreeMap, sync::Arc};

use arbor_crypto::{
    CipherSuite, CipherSuiteProvider, HpkePublicKey, HpkeSecretKey, Secret, SignaturePublicKey,
};
use arbor_proto::{Credential, GroupContext, Proposal, ProposalRef, ReInit, Sender};
use tracing::info;

pub use self::{
    commit::{CommitOptions, CommitOutput, external_sender_proposal, new_member_proposal},
    join::ExternalJoinOptions,
    process::{CommitSummary, ProcessedMessage},
};
pub(crate) use self::{history::EpochHistory, proposals::CachedProposal};
use crate::{
    auth::AuthenticationService,
    config::ClientConfig,
    error::{MlsError, UsageError},
    key_package::SigningIdentity,
    key_schedule::{self, KeySchedule},
    psk::{NoPsks, PskIndex, ResumptionPsks},
    secret_tree::{RatchetWindow, SecretTree},
    tree::{RatchetTree, TreePrivate},
    tree_math::LeafIndex,
};

/// Everything an operation needs besides the state itself.
///
/// There is no global state; each call receives its collaborators here.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    /// Cipher suite provider; must match the group's suite
    pub crypto: &'a dyn CipherSuiteProvider,
    /// Credential validation
    pub auth: &'a dyn AuthenticationService,
    /// External and foreign resumption PSKs
    pub psks: &'a dyn PskIndex,
    /// Limits and policy
    pub config: &'a ClientConfig,
    /// Application veto over incoming proposals and commits
    pub review: &'a dyn MessageReview,
}

impl<'a> Context<'a> {
    /// Context without PSKs that accepts every well-formed message.
    pub fn new(
        crypto: &'a dyn CipherSuiteProvider,
        auth: &'a dyn AuthenticationService,
        config: &'a ClientConfig,
    ) -> Self {
        Self { crypto, auth, psks: &NoPsks, config, review: &AcceptAll }
    }

    /// Use `psks` for PSK lookups.
    #[must_use]
    pub fn with_psks(self, psks: &'a dyn PskIndex) -> Self {
        Self { psks, ..self }
    }

    /// Consult `review` for incoming proposals and commits.
    #[must_use]
    pub fn with_review(self, review: &'a dyn MessageReview) -> Self {
        Self { review, ..self }
    }

    pub(crate) fn ratchet_window(&self) -> RatchetWindow {
        RatchetWindow {
            max_forward: self.config.max_forward_ratchet,
            tolerance: self.config.out_of_order_tolerance,
        }
    }
}

impl std::fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("cipher_suite", &self.crypto.cipher_suite())
            .field("config", self.config)
            .finish_non_exhaustive()
    }
}

/// Application hook consulted before an incoming proposal is cached or an
/// incoming commit is applied.
///
/// Runs after every protocol check, so only well-formed, authenticated
/// messages reach it. Returning `false` fails the message with
/// [`ValidationError::RejectedByReview`](crate::error::ValidationError::RejectedByReview).
pub trait MessageReview {
    /// Accept a standalone proposal.
    fn review_proposal(&self, _sender: &Sender, _proposal: &Proposal) -> bool {
        true
    }

    /// Accept a commit covering `proposals`.
    fn review_commit(&self, _sender: &Sender, _proposals: &[Proposal]) -> bool {
        true
    }
}

/// Review hook that accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl MessageReview for AcceptAll {}

/// Lifecycle of a member's view of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupStatus {
    /// Normal operation
    Active,
    /// A reinit was committed; only the successor group can be created or
    /// joined
    SuspendedPendingReinit,
    /// This member was removed; terminal
    RemovedFromGroup,
}

/// One entry of the roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Leaf position
    pub index: LeafIndex,
    /// Presented credential
    pub credential: Credential,
    /// Leaf signature key
    pub signature_key: SignaturePublicKey,
}

/// Private key of an Update this member proposed, installed if a commit
/// applies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingUpdate {
    pub(crate) encryption_key: HpkePublicKey,
    pub(crate) secret: HpkeSecretKey,
}

/// One member's state in one epoch of a group.
#[derive(Debug, Clone)]
pub struct ClientState {
    pub(crate) context: GroupContext,
    pub(crate) tree: Arc<RatchetTree>,
    pub(crate) secret_tree: SecretTree,
    pub(crate) schedule: KeySchedule,
    pub(crate) private: TreePrivate,
    pub(crate) proposals: BTreeMap<ProposalRef, CachedProposal>,
    pub(crate) interim_transcript_hash: Vec<u8>,
    pub(crate) confirmation_tag: Vec<u8>,
    pub(crate) identity: SigningIdentity,
    pub(crate) status: GroupStatus,
    pub(crate) pending_updates: Vec<PendingUpdate>,
    pub(crate) pending_reinit: Option<ReInit>,
    pub(crate) history: EpochHistory,
    pub(crate) resumption_psks: ResumptionPsks,
}

/// Result of running the proposal pipeline and key schedule for a commit,
/// ready to become the next state.
pub(crate) struct EpochTransition {
    pub(crate) context: GroupContext,
    pub(crate) tree: RatchetTree,
    pub(crate) schedule: KeySchedule,
    pub(crate) private: TreePrivate,
    pub(crate) confirmation_tag: Vec<u8>,
    pub(crate) reinit: Option<ReInit>,
}

impl ClientState {
    /// Group identifier.
    pub fn group_id(&self) -> &[u8] {
        self.context.group_id.as_slice()
    }

    /// Current epoch.
    pub fn epoch(&self) -> u64 {
        self.context.epoch
    }

    /// Group cipher suite.
    pub fn cipher_suite(&self) -> CipherSuite {
        self.context.cipher_suite
    }

    /// Group context of the current epoch.
    pub fn context(&self) -> &GroupContext {
        &self.context
    }

    /// Public ratchet tree of the current epoch.
    pub fn tree(&self) -> &RatchetTree {
        &self.tree
    }

    /// This member's leaf.
    pub fn own_leaf(&self) -> LeafIndex {
        self.private.leaf_index()
    }

    /// This member's credential and signing key.
    pub fn identity(&self) -> &SigningIdentity {
        &self.identity
    }

    /// Lifecycle status.
    pub fn status(&self) -> GroupStatus {
        self.status
    }

    /// Committed reinit waiting for its successor group.
    pub fn pending_reinit(&self) -> Option<&ReInit> {
        self.pending_reinit.as_ref()
    }

    /// `epoch_authenticator` of the current epoch. Members that agree on it
    /// agree on the whole epoch.
    pub fn epoch_authenticator(&self) -> &Secret {
        self.schedule.epoch_authenticator()
    }

    /// References of proposals cached for the next commit.
    pub fn pending_proposals(&self) -> impl Iterator<Item = &ProposalRef> + '_ {
        self.proposals.keys()
    }

    /// Retained resumption PSKs.
    pub fn resumption_psks(&self) -> &ResumptionPsks {
        &self.resumption_psks
    }

    /// Current members, in leaf order.
    pub fn roster(&self) -> Vec<Member> {
        self.tree
            .members()
            .map(|(index, leaf)| Member {
                index,
                credential: leaf.credential.clone(),
                signature_key: leaf.signature_key.clone(),
            })
            .collect()
    }

    /// Member at `index`, if the leaf is occupied.
    pub fn member(&self, index: LeafIndex) -> Option<Member> {
        self.tree.leaf(index).map(|leaf| Member {
            index,
            credential: leaf.credential.clone(),
            signature_key: leaf.signature_key.clone(),
        })
    }

    /// `MLS-Exporter(label, context, length)` of the current epoch.
    pub fn export_secret(
        &self,
        ctx: &Context<'_>,
        label: &str,
        context: &[u8],
        length: usize,
    ) -> Result<Secret, MlsError> {
        self.check_provider(ctx)?;
        if self.status == GroupStatus::RemovedFromGroup {
            return Err(self.invalid_state("export_secret").into());
        }
        self.schedule.export(ctx.crypto, label, context, length)
    }

    pub(crate) fn invalid_state(&self, operation: &'static str) -> UsageError {
        UsageError::InvalidState { state: self.status, operation }
    }

    pub(crate) fn require_active(&self, operation: &'static str) -> Result<(), MlsError> {
        if self.status == GroupStatus::Active {
            Ok(())
        } else {
            Err(self.invalid_state(operation).into())
        }
    }

    pub(crate) fn check_provider(&self, ctx: &Context<'_>) -> Result<(), MlsError> {
        let actual = ctx.crypto.cipher_suite();
        if actual == self.context.cipher_suite {
            Ok(())
        } else {
            Err(UsageError::CipherSuiteMismatch {
                expected: self.context.cipher_suite.id(),
                actual: actual.id(),
            }
            .into())
        }
    }

    /// Build the state of the next epoch.
    ///
    /// `secret_tree` is this epoch's secret tree as left by the operation
    /// (sending a private commit consumes a generation); it moves into the
    /// history ring together with the rest of this epoch's receive material.
    pub(crate) fn advance(
        &self,
        ctx: &Context<'_>,
        secret_tree: SecretTree,
        next: EpochTransition,
    ) -> Result<Self, MlsError> {
        let mut history = self.history.clone();
        history.push(self.receive_material(secret_tree), ctx.config.max_past_epochs);
        Self::build(ctx, self.identity.clone(), next, history, self.resumption_psks.clone())
    }

    /// State of a member entering a group: the creator, a Welcome joiner or
    /// an external committer.
    pub(crate) fn enter(
        ctx: &Context<'_>,
        identity: SigningIdentity,
        next: EpochTransition,
    ) -> Result<Self, MlsError> {
        Self::build(ctx, identity, next, EpochHistory::default(), ResumptionPsks::new())
    }

    fn build(
        ctx: &Context<'_>,
        identity: SigningIdentity,
        next: EpochTransition,
        history: EpochHistory,
        mut resumption_psks: ResumptionPsks,
    ) -> Result<Self, MlsError> {
        let interim_transcript_hash = key_schedule::interim_transcript_hash(
            ctx.crypto,
            next.context.confirmed_transcript_hash.as_slice(),
            &next.confirmation_tag,
        )?;

        resumption_psks.insert(
            next.context.group_id.as_slice(),
            next.context.epoch,
            next.schedule.resumption_psk.clone(),
            ctx.config.max_resumption_psks,
        );

        let mut private = next.private;
        private.purge(&next.tree);

        let status =
            if next.reinit.is_some() { GroupStatus::SuspendedPendingReinit } else { GroupStatus::Active };
        info!(
            epoch = next.context.epoch,
            members = next.tree.member_count(),
            ?status,
            "epoch transition"
        );

        Ok(Self {
            secret_tree: SecretTree::new(
                next.schedule.encryption_secret.clone(),
                next.tree.leaf_count(),
            ),
            context: next.context,
            tree: Arc::new(next.tree),
            schedule: next.schedule,
            private,
            proposals: BTreeMap::new(),
            interim_transcript_hash,
            confirmation_tag: next.confirmation_tag,
            identity,
            status,
            pending_updates: Vec::new(),
            pending_reinit: next.reinit,
            history,
            resumption_psks,
        })
    }

    fn receive_material(&self, secret_tree: SecretTree) -> history::EpochRecord {
        history::EpochRecord {
            context: self.context.clone(),
            tree: Arc::clone(&self.tree),
            secret_tree,
            sender_data_secret: self.schedule.sender_data_secret.clone(),
        }
    }
}
