//! Entering a group: creation, Welcome, external commit, and the
//! `GroupInfo` that makes the latter two possible.

use arbor_crypto::{Secret, labeled};
use arbor_proto::{
    Extension, ExtensionList, ExternalInit, GroupContext, GroupInfo, GroupSecrets,
    MlsMessage, MlsMessageBody, Node, PreSharedKeyId, Proposal, ProposalOrRef, ProtocolVersion,
    PublicMessage, Remove, Sender, Welcome, WireFormat, codec,
};
use tls_codec::VLBytes;
use tracing::{debug, info};

use super::{
    ClientState, Context, EpochTransition,
    commit::{CommitBase, CommitOptions, WELCOME_LABEL, seal_commit},
    proposals::{Committer, ResolvedProposal, apply_proposals, validate_group_extensions},
};
use crate::{
    error::{MlsError, UsageError, ValidationError, VerificationError},
    key_package::{KeyPackageBundle, SigningIdentity},
    key_schedule::{self, KeySchedule},
    psk::{ResumptionPsks, resolve_psk},
    tree::{LeafCheck, RatchetTree, TreePrivate, validate_leaf},
    tree_math::{self, LeafIndex},
    treekem::derive_path_keys,
};

const GROUP_INFO_LABEL: &str = "GroupInfoTBS";

/// Options for [`ClientState::join_group_external`].
#[derive(Debug, Clone, Default)]
pub struct ExternalJoinOptions {
    /// Remove the joiner's previous leaf (same identity) in the same commit
    pub resync: bool,
    /// Application data bound to the commit's signature
    pub authenticated_data: Vec<u8>,
    /// Ratchet tree, when the `GroupInfo` does not carry one
    pub ratchet_tree: Option<Vec<Option<Node>>>,
}

fn check_suite(ctx: &Context<'_>, group_suite: arbor_crypto::CipherSuite) -> Result<(), MlsError> {
    let actual = ctx.crypto.cipher_suite();
    if actual == group_suite {
        Ok(())
    } else {
        Err(UsageError::CipherSuiteMismatch { expected: group_suite.id(), actual: actual.id() }
            .into())
    }
}

/// Check the tree a joiner is handed against the group context it belongs
/// to: structure, tree hash, parent hashes and every leaf.
fn import_tree(
    ctx: &Context<'_>,
    context: &GroupContext,
    nodes: Vec<Option<Node>>,
) -> Result<RatchetTree, MlsError> {
    let tree = RatchetTree::from_wire(nodes)?;
    if tree.tree_hash(ctx.crypto)? != context.tree_hash.as_slice() {
        return Err(VerificationError::TreeHash.into());
    }
    tree.verify_parent_hashes(ctx.crypto)?;
    let group_id = context.group_id.as_slice();
    for (index, leaf) in tree.members() {
        validate_leaf(ctx, &tree, leaf, &LeafCheck::imported(group_id, index, &context.extensions))?;
    }
    Ok(tree)
}

fn verify_group_info(
    ctx: &Context<'_>,
    group_info: &GroupInfo,
    tree: &RatchetTree,
) -> Result<(), MlsError> {
    let signer = tree
        .leaf(LeafIndex(group_info.signer))
        .ok_or(ValidationError::UnknownSender(group_info.signer))?;
    labeled::verify_with_label(
        ctx.crypto,
        &signer.signature_key,
        GROUP_INFO_LABEL,
        &group_info.to_be_signed()?,
        group_info.signature.as_slice(),
    )
    .map_err(|_| VerificationError::Signature.into())
}

fn tree_nodes(
    group_info: &GroupInfo,
    supplied: Option<Vec<Option<Node>>>,
) -> Result<Vec<Option<Node>>, MlsError> {
    group_info
        .extensions
        .ratchet_tree()
        .map(<[Option<Node>]>::to_vec)
        .or(supplied)
        .ok_or_else(|| ValidationError::MissingRatchetTree.into())
}

impl ClientState {
    /// Create a one-member group at epoch 0.
    pub fn create_group(
        ctx: &Context<'_>,
        group_id: Vec<u8>,
        identity: SigningIdentity,
        extensions: ExtensionList,
    ) -> Result<Self, MlsError> {
        if group_id.is_empty() {
            return Err(UsageError::InvalidArgument("group id is empty").into());
        }
        let crypto = ctx.crypto;
        let bundle = KeyPackageBundle::generate(ctx, identity)?;
        let tree = RatchetTree::new(bundle.key_package.leaf_node.clone());
        validate_group_extensions(&tree, &extensions)?;

        let context = GroupContext {
            version: ProtocolVersion::MLS_10,
            cipher_suite: crypto.cipher_suite(),
            group_id: group_id.into(),
            epoch: 0,
            tree_hash: tree.tree_hash(crypto)?.into(),
            confirmed_transcript_hash: VLBytes::new(Vec::new()),
            extensions,
        };
        let epoch_secret = Secret::new(crypto.random_vec(crypto.kdf_extract_size()));
        let schedule = KeySchedule::from_epoch_secret(crypto, &epoch_secret)?;
        let confirmation_tag = schedule.confirmation_tag(crypto, &[])?;

        let state = Self::enter(
            ctx,
            bundle.identity,
            EpochTransition {
                private: TreePrivate::new(LeafIndex(0), bundle.encryption_secret),
                context,
                tree,
                schedule,
                confirmation_tag,
                reinit: None,
            },
        )?;
        info!(group_id = ?state.group_id(), suite = ?state.cipher_suite(), "created group");
        Ok(state)
    }

    /// Join from a Welcome addressed to `bundle`.
    ///
    /// `ratchet_tree` is only consulted when the `GroupInfo` carries no
    /// `ratchet_tree` extension.
    pub fn join_group(
        ctx: &Context<'_>,
        welcome: &MlsMessage,
        bundle: &KeyPackageBundle,
        ratchet_tree: Option<Vec<Option<Node>>>,
    ) -> Result<Self, MlsError> {
        let (state, _) = Self::join_with(ctx, welcome, bundle, ratchet_tree, &ResumptionPsks::new())?;
        Ok(state)
    }

    /// Shared Welcome processing. `retained` resolves resumption PSKs of a
    /// predecessor group. Returns the PSKs the epoch was keyed with.
    pub(crate) fn join_with(
        ctx: &Context<'_>,
        welcome: &MlsMessage,
        bundle: &KeyPackageBundle,
        ratchet_tree: Option<Vec<Option<Node>>>,
        retained: &ResumptionPsks,
    ) -> Result<(Self, Vec<PreSharedKeyId>), MlsError> {
        let MlsMessageBody::Welcome(welcome) = &welcome.body else {
            return Err(UsageError::UnexpectedWireFormat(welcome.wire_format()).into());
        };
        let crypto = ctx.crypto;
        check_suite(ctx, welcome.cipher_suite)?;

        let group_secrets = open_group_secrets(ctx, welcome, bundle)?;
        let psks = group_secrets
            .psks
            .iter()
            .map(|id| Ok((id.clone(), resolve_psk(ctx, id, retained)?)))
            .collect::<Result<Vec<_>, MlsError>>()?;
        let psk_secret = key_schedule::psk_secret(crypto, &psks)?;

        let welcome_secret =
            key_schedule::welcome_secret(crypto, &group_secrets.joiner_secret, &psk_secret)?;
        let (key, nonce) = key_schedule::welcome_key_nonce(crypto, &welcome_secret)?;
        let group_info = crypto
            .aead_open(key.as_bytes(), nonce.as_bytes(), &[], welcome.encrypted_group_info.as_slice())
            .map_err(MlsError::from_open)?;
        let group_info: GroupInfo = codec::decode(&group_info)?;
        let context = &group_info.group_context;
        check_suite(ctx, context.cipher_suite)?;
        if context.extensions.has_duplicates() {
            return Err(ValidationError::DuplicateExtension.into());
        }

        let tree = import_tree(ctx, context, tree_nodes(&group_info, ratchet_tree)?)?;
        verify_group_info(ctx, &group_info, &tree)?;

        let own_leaf = &bundle.key_package.leaf_node;
        let own = tree
            .members()
            .find(|(_, leaf)| {
                leaf.encryption_key == own_leaf.encryption_key
                    && leaf.signature_key == own_leaf.signature_key
            })
            .map(|(index, _)| index)
            .ok_or(ValidationError::OwnLeafNotFound)?;

        let keys =
            KeySchedule::from_joiner(crypto, &group_secrets.joiner_secret, &psk_secret, context)?;
        keys.schedule.verify_confirmation_tag(
            crypto,
            context.confirmed_transcript_hash.as_slice(),
            group_info.confirmation_tag.as_slice(),
        )?;

        let mut private = TreePrivate::new(own, bundle.encryption_secret.clone());
        if let Some(path_secret) = group_secrets.path_secret {
            let ancestor =
                tree_math::common_ancestor(own.node(), LeafIndex(group_info.signer).node());
            let (path_keys, _) = derive_path_keys(crypto, &tree, ancestor, path_secret.path_secret)?;
            private.merge(path_keys);
        }

        let state = Self::enter(
            ctx,
            bundle.identity.clone(),
            EpochTransition {
                context: group_info.group_context.clone(),
                tree,
                schedule: keys.schedule,
                private,
                confirmation_tag: group_info.confirmation_tag.as_slice().to_vec(),
                reinit: None,
            },
        )?;
        info!(
            group_id = ?state.group_id(),
            epoch = state.epoch(),
            leaf = own.0,
            "joined group from welcome"
        );
        Ok((state, group_secrets.psks))
    }

    /// Join through an external commit against a published `GroupInfo`.
    ///
    /// Returns the new member's state and the commit, which the existing
    /// members must process.
    pub fn join_group_external(
        ctx: &Context<'_>,
        group_info: &MlsMessage,
        identity: SigningIdentity,
        options: ExternalJoinOptions,
    ) -> Result<(Self, MlsMessage), MlsError> {
        let MlsMessageBody::GroupInfo(group_info) = &group_info.body else {
            return Err(UsageError::UnexpectedWireFormat(group_info.wire_format()).into());
        };
        let crypto = ctx.crypto;
        let context = &group_info.group_context;
        check_suite(ctx, context.cipher_suite)?;

        let tree = import_tree(ctx, context, tree_nodes(group_info, options.ratchet_tree)?)?;
        verify_group_info(ctx, group_info, &tree)?;
        let external_pub =
            group_info.extensions.external_pub().ok_or(ValidationError::MissingExternalPub)?;
        let (kem_output, init_secret) = key_schedule::external_init_sender(crypto, external_pub)?;

        let bundle = KeyPackageBundle::generate(ctx, identity)?;
        let leaf = bundle.key_package.leaf_node.clone();

        let mut proposals = vec![Proposal::ExternalInit(ExternalInit { kem_output: kem_output.into() })];
        if options.resync {
            let previous = tree
                .members()
                .find(|(_, member)| member.credential.identity() == leaf.credential.identity())
                .map(|(index, _)| index)
                .ok_or(UsageError::InvalidArgument("no earlier leaf to resync"))?;
            proposals.push(Proposal::Remove(Remove { removed: previous.0 }));
        }
        let resolved: Vec<ResolvedProposal> = proposals
            .iter()
            .map(|proposal| ResolvedProposal {
                proposal: proposal.clone(),
                sender: Sender::NewMemberCommit,
            })
            .collect();

        let mut applied = apply_proposals(
            ctx,
            context,
            &tree,
            Committer::External(&leaf),
            &resolved,
            &ResumptionPsks::new(),
        )?;
        validate_leaf(ctx, &applied.tree, &leaf, &LeafCheck::key_package(&applied.extensions))?;
        let own = applied.tree.add_leaf(leaf);

        let interim = key_schedule::interim_transcript_hash(
            crypto,
            context.confirmed_transcript_hash.as_slice(),
            group_info.confirmation_tag.as_slice(),
        )?;
        let (sealed, transition) = seal_commit(
            ctx,
            CommitBase {
                context,
                interim_transcript_hash: &interim,
                init_secret: &init_secret,
                private: TreePrivate::new(own, bundle.encryption_secret.clone()),
            },
            Sender::NewMemberCommit,
            own,
            &bundle.identity,
            applied,
            proposals.into_iter().map(ProposalOrRef::Proposal).collect(),
            &CommitOptions { authenticated_data: options.authenticated_data, ..CommitOptions::default() },
            WireFormat::PublicMessage,
        )?;

        let commit = MlsMessage::new(MlsMessageBody::PublicMessage(PublicMessage {
            content: sealed.content.content,
            auth: sealed.content.auth,
            membership_tag: None,
        }));
        let state = Self::enter(ctx, bundle.identity, transition)?;
        info!(
            group_id = ?state.group_id(),
            epoch = state.epoch(),
            leaf = own.0,
            resync = options.resync,
            "joined group by external commit"
        );
        Ok((state, commit))
    }

    /// Signed `GroupInfo` of the current epoch, with `external_pub` and,
    /// if asked, the ratchet tree.
    pub(crate) fn group_info(
        &self,
        ctx: &Context<'_>,
        with_ratchet_tree: bool,
    ) -> Result<GroupInfo, MlsError> {
        let crypto = ctx.crypto;
        let mut extensions = ExtensionList::new();
        extensions.set(Extension::ExternalPub(self.schedule.external_key_pair(crypto)?.public));
        if with_ratchet_tree {
            extensions.set(Extension::RatchetTree(self.tree.to_wire()));
        }

        let mut group_info = GroupInfo {
            group_context: self.context.clone(),
            extensions,
            confirmation_tag: self.confirmation_tag.clone().into(),
            signer: self.own_leaf().0,
            signature: VLBytes::new(Vec::new()),
        };
        group_info.signature = labeled::sign_with_label(
            crypto,
            self.identity.signer(),
            GROUP_INFO_LABEL,
            &group_info.to_be_signed()?,
        )?
        .into();
        Ok(group_info)
    }

    /// Publishable `GroupInfo` for external joiners.
    pub fn export_group_info(
        &self,
        ctx: &Context<'_>,
        with_ratchet_tree: bool,
    ) -> Result<MlsMessage, MlsError> {
        self.require_active("export_group_info")?;
        self.check_provider(ctx)?;
        let group_info = self.group_info(ctx, with_ratchet_tree)?;
        debug!(epoch = self.epoch(), with_ratchet_tree, "exported group info");
        Ok(MlsMessage::new(MlsMessageBody::GroupInfo(group_info)))
    }
}

fn open_group_secrets(
    ctx: &Context<'_>,
    welcome: &Welcome,
    bundle: &KeyPackageBundle,
) -> Result<GroupSecrets, MlsError> {
    let reference = bundle.reference(ctx.crypto)?;
    let entry = welcome
        .secrets
        .iter()
        .find(|entry| entry.new_member == reference)
        .ok_or(ValidationError::NoMatchingKeyPackage)?;
    let plaintext = labeled::decrypt_with_label(
        ctx.crypto,
        &bundle.init_secret,
        WELCOME_LABEL,
        welcome.encrypted_group_info.as_slice(),
        &entry.encrypted_group_secrets,
    )
    .map_err(MlsError::from_open)?;
    Ok(codec::decode(&plaintext)?)
}
