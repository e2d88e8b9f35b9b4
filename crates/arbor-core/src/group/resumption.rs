//! Reinitialization and branching (RFC 9420 section 11.2 and 11.3).
//!
//! Both start a new group whose first epoch is keyed with a resumption PSK
//! of the old group, so members of the new group prove they held the old
//! group's state.
//!
//! ```text
//! old group ── reinit commit ──► SuspendedPendingReinit
//!                                   │ resumption_psk(epoch n)
//!                                   ▼
//!                       new group, epoch 1 (psk usage = reinit)
//! ```

use arbor_crypto::CipherSuite;
use arbor_proto::{
    Add, ExtensionList, KeyPackage, MlsMessage, Node, PreSharedKey, PreSharedKeyId, Proposal,
    ProtocolVersion, Psk, ReInit, ResumptionPskUsage,
};
use tracing::info;

use super::{ClientState, CommitOptions, CommitOutput, Context, GroupStatus};
use crate::{
    error::{MlsError, UsageError, ValidationError},
    key_package::{KeyPackageBundle, SigningIdentity},
};

impl ClientState {
    /// Commit a reinit to new parameters. The group is suspended once the
    /// commit is applied.
    pub fn reinit_group(
        &self,
        ctx: &Context<'_>,
        group_id: Vec<u8>,
        cipher_suite: CipherSuite,
        extensions: ExtensionList,
    ) -> Result<(Self, CommitOutput), MlsError> {
        let reinit = ReInit {
            group_id: group_id.into(),
            version: ProtocolVersion::MLS_10,
            cipher_suite,
            extensions,
        };
        self.create_commit(
            ctx,
            CommitOptions { proposals: vec![Proposal::ReInit(reinit)], ..CommitOptions::default() },
        )
    }

    /// Create the successor of a suspended group and add `key_packages` to
    /// it. `ctx` must use the reinit's cipher suite.
    pub fn reinit_create_new_group(
        &self,
        ctx: &Context<'_>,
        identity: SigningIdentity,
        key_packages: Vec<KeyPackage>,
    ) -> Result<(Self, CommitOutput), MlsError> {
        let reinit = self.suspended_reinit("reinit_create_new_group")?;
        let actual = ctx.crypto.cipher_suite();
        if actual != reinit.cipher_suite {
            return Err(UsageError::CipherSuiteMismatch {
                expected: reinit.cipher_suite.id(),
                actual: actual.id(),
            }
            .into());
        }
        let (state, output) = self.resume(
            ctx,
            reinit.group_id.as_slice().to_vec(),
            identity,
            reinit.extensions.clone(),
            key_packages,
            ResumptionPskUsage::Reinit,
        )?;
        info!(
            old_group = ?self.group_id(),
            new_group = ?state.group_id(),
            suite = ?state.cipher_suite(),
            "reinitialized group"
        );
        Ok((state, output))
    }

    /// Start a new group with `key_packages` (a subset of the current
    /// members), bound to this group's current epoch.
    pub fn branch_group(
        &self,
        ctx: &Context<'_>,
        group_id: Vec<u8>,
        key_packages: Vec<KeyPackage>,
    ) -> Result<(Self, CommitOutput), MlsError> {
        self.require_active("branch_group")?;
        self.check_provider(ctx)?;
        let (state, output) = self.resume(
            ctx,
            group_id,
            self.identity.clone(),
            self.context.extensions.clone(),
            key_packages,
            ResumptionPskUsage::Branch,
        )?;
        info!(old_group = ?self.group_id(), new_group = ?state.group_id(), "branched group");
        Ok((state, output))
    }

    fn resume(
        &self,
        ctx: &Context<'_>,
        group_id: Vec<u8>,
        identity: SigningIdentity,
        extensions: ExtensionList,
        key_packages: Vec<KeyPackage>,
        usage: ResumptionPskUsage,
    ) -> Result<(Self, CommitOutput), MlsError> {
        let mut state = Self::create_group(ctx, group_id, identity, extensions)?;
        state.resumption_psks.insert(
            self.group_id(),
            self.epoch(),
            self.schedule.resumption_psk.clone(),
            ctx.config.max_resumption_psks,
        );

        let psk = PreSharedKeyId {
            psk: Psk::Resumption {
                usage,
                psk_group_id: self.group_id().to_vec(),
                psk_epoch: self.epoch(),
            },
            psk_nonce: ctx.crypto.random_vec(ctx.crypto.kdf_extract_size()).into(),
        };
        let mut proposals: Vec<Proposal> = key_packages
            .into_iter()
            .map(|key_package| Proposal::Add(Add { key_package }))
            .collect();
        proposals.push(Proposal::PreSharedKey(PreSharedKey { psk }));

        state.create_commit(ctx, CommitOptions { proposals, ..CommitOptions::default() })
    }

    /// Join the successor of this suspended group from its Welcome.
    pub fn join_group_from_reinit(
        &self,
        ctx: &Context<'_>,
        welcome: &MlsMessage,
        bundle: &KeyPackageBundle,
        ratchet_tree: Option<Vec<Option<Node>>>,
    ) -> Result<Self, MlsError> {
        let reinit = self.suspended_reinit("join_group_from_reinit")?;
        let state = self.join_resumed(ctx, welcome, bundle, ratchet_tree, ResumptionPskUsage::Reinit)?;

        let context = state.context();
        if context.group_id != reinit.group_id
            || context.cipher_suite != reinit.cipher_suite
            || context.version != reinit.version
            || context.extensions != reinit.extensions
        {
            return Err(ValidationError::ReInitMismatch.into());
        }
        Ok(state)
    }

    /// Join a branch of this group from its Welcome.
    pub fn join_group_from_branch(
        &self,
        ctx: &Context<'_>,
        welcome: &MlsMessage,
        bundle: &KeyPackageBundle,
        ratchet_tree: Option<Vec<Option<Node>>>,
    ) -> Result<Self, MlsError> {
        self.require_active("join_group_from_branch")?;
        self.join_resumed(ctx, welcome, bundle, ratchet_tree, ResumptionPskUsage::Branch)
    }

    fn join_resumed(
        &self,
        ctx: &Context<'_>,
        welcome: &MlsMessage,
        bundle: &KeyPackageBundle,
        ratchet_tree: Option<Vec<Option<Node>>>,
        usage: ResumptionPskUsage,
    ) -> Result<Self, MlsError> {
        let (state, psks) = Self::join_with(ctx, welcome, bundle, ratchet_tree, &self.resumption_psks)?;

        let mut resumption = psks.iter().filter_map(|id| match &id.psk {
            Psk::Resumption { usage, psk_group_id, psk_epoch } => {
                Some((*usage, psk_group_id.as_slice(), *psk_epoch))
            },
            Psk::External { .. } => None,
        });
        let expected = (usage, self.group_id(), self.epoch());
        match (resumption.next(), resumption.next()) {
            (Some(found), None) if found == expected => Ok(state),
            _ => Err(ValidationError::InvalidResumptionPsk.into()),
        }
    }

    fn suspended_reinit(&self, operation: &'static str) -> Result<&ReInit, MlsError> {
        match (&self.status, &self.pending_reinit) {
            (GroupStatus::SuspendedPendingReinit, Some(reinit)) => Ok(reinit),
            _ => Err(self.invalid_state(operation).into()),
        }
    }
}
