//! Proposal validation and application (RFC 9420 sections 12.1 and 12.2).
//!
//! Every commit, sent or received, runs through [`apply_proposals`]:
//! sender checks, list-level rules, then tree mutations in the fixed order
//! group context extensions, remove, update, add. The candidate tree it
//! returns is only adopted once the whole commit has been verified.

use std::collections::BTreeMap;

use arbor_crypto::{CipherSuiteProvider, Secret, labeled};
use arbor_proto::{
    AuthenticatedContent, Commit, ExtensionList, GroupContext, KeyPackage, LeafNode,
    PreSharedKeyId, Proposal, ProposalOrRef, ProposalRef, ProposalType, Psk, ReInit,
    ResumptionPskUsage, Sender, codec,
};
use tracing::debug;

use super::Context;
use crate::{
    error::{MlsError, ValidationError},
    key_package::validate_key_package,
    psk::{ResumptionPsks, resolve_psk},
    tree::{LeafCheck, RatchetTree, meets_required_capabilities, validate_leaf},
    tree_math::LeafIndex,
};

const PROPOSAL_REF_LABEL: &str = "MLS 1.0 Proposal Reference";

/// A proposal received or sent in the current epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CachedProposal {
    pub(crate) proposal: Proposal,
    pub(crate) sender: Sender,
}

/// `RefHash("MLS 1.0 Proposal Reference", AuthenticatedContent)`.
pub(crate) fn proposal_ref(
    crypto: &dyn CipherSuiteProvider,
    content: &AuthenticatedContent,
) -> Result<ProposalRef, MlsError> {
    let encoded = codec::encode(content)?;
    Ok(ProposalRef(labeled::ref_hash(crypto, PROPOSAL_REF_LABEL, &encoded)?))
}

/// Cache a proposal under its reference.
pub(crate) fn cache_proposal(
    cache: &mut BTreeMap<ProposalRef, CachedProposal>,
    reference: ProposalRef,
    proposal: Proposal,
    sender: Sender,
) {
    debug!(
        proposal_type = proposal.proposal_type().0,
        ?sender,
        cached = cache.len() + 1,
        "cached proposal"
    );
    cache.insert(reference, CachedProposal { proposal, sender });
}

/// Proposal of a commit with the sender it is attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedProposal {
    pub(crate) proposal: Proposal,
    pub(crate) sender: Sender,
}

/// Who is committing.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Committer<'a> {
    /// Current member at a leaf
    Member(LeafIndex),
    /// New member joining with this leaf through an external commit
    External(&'a LeafNode),
}

impl Committer<'_> {
    pub(crate) fn sender(&self) -> Sender {
        match self {
            Self::Member(index) => Sender::Member(index.0),
            Self::External(_) => Sender::NewMemberCommit,
        }
    }
}

/// Look up by-reference proposals; inline ones are attributed to the
/// committer.
pub(crate) fn resolve_proposals(
    commit: &Commit,
    committer: Sender,
    cache: &BTreeMap<ProposalRef, CachedProposal>,
) -> Result<Vec<ResolvedProposal>, MlsError> {
    commit
        .proposals
        .iter()
        .map(|entry| match entry {
            ProposalOrRef::Proposal(proposal) => {
                Ok(ResolvedProposal { proposal: proposal.clone(), sender: committer })
            },
            ProposalOrRef::Reference(reference) => cache
                .get(reference)
                .map(|cached| ResolvedProposal {
                    proposal: cached.proposal.clone(),
                    sender: cached.sender,
                })
                .ok_or_else(|| ValidationError::UnknownProposalRef.into()),
        })
        .collect()
}

/// Check that `sender` may send `proposal`.
pub(crate) fn check_proposal_sender(sender: &Sender, proposal: &Proposal) -> Result<(), MlsError> {
    let allowed = match (sender, proposal) {
        (Sender::Member(_), Proposal::ExternalInit(_)) => false,
        (Sender::Member(_), _) => true,
        (
            Sender::External(_),
            Proposal::Add(_)
            | Proposal::Remove(_)
            | Proposal::PreSharedKey(_)
            | Proposal::ReInit(_)
            | Proposal::GroupContextExtensions(_)
            | Proposal::Custom { .. },
        ) => true,
        (Sender::NewMemberProposal, Proposal::Add(_)) => true,
        (
            Sender::NewMemberCommit,
            Proposal::ExternalInit(_) | Proposal::Remove(_) | Proposal::PreSharedKey(_),
        ) => true,
        _ => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(ValidationError::InvalidProposalSender(proposal.proposal_type().0).into())
    }
}

/// Check every member supports a new set of group context extensions.
pub(crate) fn validate_group_extensions(
    tree: &RatchetTree,
    extensions: &ExtensionList,
) -> Result<(), MlsError> {
    if extensions.has_duplicates() {
        return Err(ValidationError::DuplicateExtension.into());
    }
    for (_, leaf) in tree.members() {
        for extension_type in extensions.types() {
            if !extension_type.is_default()
                && !leaf.capabilities.extensions.contains(&extension_type)
            {
                return Err(ValidationError::UnsupportedExtension(extension_type.0).into());
            }
        }
        if let Some(required) = extensions.required_capabilities() {
            if !meets_required_capabilities(&leaf.capabilities, required) {
                return Err(ValidationError::MissingRequiredCapability.into());
            }
        }
    }
    Ok(())
}

/// Outcome of applying a proposal list to the current epoch.
#[derive(Debug)]
pub(crate) struct AppliedProposals {
    /// Tree after every mutation, before any update path
    pub(crate) tree: RatchetTree,
    /// Group context extensions of the next epoch
    pub(crate) extensions: ExtensionList,
    /// Added members and where they landed
    pub(crate) joiners: Vec<(LeafIndex, KeyPackage)>,
    /// PSKs to inject, in proposal order
    pub(crate) psks: Vec<(PreSharedKeyId, Secret)>,
    pub(crate) removed: Vec<LeafIndex>,
    pub(crate) updated: Vec<LeafIndex>,
    pub(crate) reinit: Option<ReInit>,
    /// KEM output of the external commit's `external_init`
    pub(crate) external_init: Option<Vec<u8>>,
    /// The commit must carry an update path
    pub(crate) path_required: bool,
}

impl AppliedProposals {
    pub(crate) fn joiner_leaves(&self) -> Vec<LeafIndex> {
        self.joiners.iter().map(|(index, _)| *index).collect()
    }
}

#[derive(Default)]
struct Sorted<'p> {
    extensions: Option<&'p ExtensionList>,
    removes: Vec<LeafIndex>,
    updates: Vec<(LeafIndex, &'p LeafNode)>,
    adds: Vec<&'p KeyPackage>,
    psks: Vec<&'p PreSharedKeyId>,
    reinit: Option<&'p ReInit>,
    external_init: Option<&'p [u8]>,
    custom: Vec<ProposalType>,
}

fn sort(proposals: &[ResolvedProposal]) -> Result<Sorted<'_>, MlsError> {
    let mut sorted = Sorted::default();
    for resolved in proposals {
        check_proposal_sender(&resolved.sender, &resolved.proposal)?;
        match &resolved.proposal {
            Proposal::GroupContextExtensions(gce) => {
                if sorted.extensions.replace(&gce.extensions).is_some() {
                    return Err(ValidationError::MultipleGroupContextExtensions.into());
                }
            },
            Proposal::Remove(remove) => sorted.removes.push(LeafIndex(remove.removed)),
            Proposal::Update(update) => {
                let Sender::Member(leaf) = resolved.sender else {
                    return Err(ValidationError::InvalidProposalSender(ProposalType::UPDATE.0).into());
                };
                sorted.updates.push((LeafIndex(leaf), &update.leaf_node));
            },
            Proposal::Add(add) => sorted.adds.push(&add.key_package),
            Proposal::PreSharedKey(psk) => sorted.psks.push(&psk.psk),
            Proposal::ReInit(reinit) => sorted.reinit = Some(reinit),
            Proposal::ExternalInit(init) => {
                if sorted.external_init.replace(init.kem_output.as_slice()).is_some() {
                    return Err(ValidationError::MultipleExternalInit.into());
                }
            },
            Proposal::Custom { proposal_type, .. } => sorted.custom.push(*proposal_type),
        }
    }
    Ok(sorted)
}

fn check_external_commit(
    tree: &RatchetTree,
    joiner: &LeafNode,
    proposals: &[ResolvedProposal],
    sorted: &Sorted<'_>,
) -> Result<(), MlsError> {
    if sorted.external_init.is_none() {
        return Err(ValidationError::MissingExternalInit.into());
    }
    if sorted.removes.len() > 1 {
        return Err(ValidationError::ExternalCommitMultipleRemoves.into());
    }
    for resolved in proposals {
        match resolved.proposal {
            Proposal::ExternalInit(_) | Proposal::Remove(_) | Proposal::PreSharedKey(_) => {},
            ref other => {
                return Err(
                    ValidationError::NotAllowedInExternalCommit(other.proposal_type().0).into()
                );
            },
        }
    }
    for removed in &sorted.removes {
        let leaf = tree.leaf(*removed).ok_or(ValidationError::BlankLeaf(removed.0))?;
        if leaf.credential.identity() != joiner.credential.identity() {
            return Err(ValidationError::ExternalRemoveIdentityMismatch.into());
        }
    }
    Ok(())
}

fn check_psks(context: &GroupContext, psks: &[&PreSharedKeyId]) -> Result<(), MlsError> {
    for (position, id) in psks.iter().enumerate() {
        if psks[..position].iter().any(|earlier| earlier.psk == id.psk) {
            return Err(ValidationError::DuplicatePsk.into());
        }
        if let Psk::Resumption { usage, .. } = &id.psk {
            // reinit and branch PSKs only bind the first epoch of a new group
            if *usage != ResumptionPskUsage::Application && context.epoch != 0 {
                return Err(ValidationError::InvalidPsk.into());
            }
        }
    }
    Ok(())
}

/// Validate `proposals` against the epoch described by `context` and `tree`
/// and apply them to a copy of `tree`.
pub(crate) fn apply_proposals(
    ctx: &Context<'_>,
    context: &GroupContext,
    tree: &RatchetTree,
    committer: Committer<'_>,
    proposals: &[ResolvedProposal],
    retained: &ResumptionPsks,
) -> Result<AppliedProposals, MlsError> {
    let sorted = sort(proposals)?;

    match committer {
        Committer::External(joiner) => check_external_commit(tree, joiner, proposals, &sorted)?,
        Committer::Member(_) => {
            if sorted.external_init.is_some() {
                return Err(ValidationError::ExternalInitInMemberCommit.into());
            }
        },
    }
    if sorted.reinit.is_some() && proposals.len() > 1 {
        return Err(ValidationError::ReInitNotAlone.into());
    }

    let committer_leaf = match committer {
        Committer::Member(index) => Some(index),
        Committer::External(_) => None,
    };
    for (position, (leaf, _)) in sorted.updates.iter().enumerate() {
        if Some(*leaf) == committer_leaf {
            return Err(ValidationError::CommitterUpdate.into());
        }
        if sorted.updates[..position].iter().any(|(earlier, _)| earlier == leaf) {
            return Err(ValidationError::DuplicateUpdate(leaf.0).into());
        }
    }
    for (position, removed) in sorted.removes.iter().enumerate() {
        if Some(*removed) == committer_leaf {
            return Err(ValidationError::CommitterRemoved.into());
        }
        if sorted.removes[..position].contains(removed) {
            return Err(ValidationError::DuplicateRemove(removed.0).into());
        }
        if sorted.updates.iter().any(|(updated, _)| updated == removed) {
            return Err(ValidationError::UpdateAndRemove(removed.0).into());
        }
    }
    check_psks(context, &sorted.psks)?;

    for proposal_type in &sorted.custom {
        if tree.members().any(|(_, leaf)| !leaf.capabilities.proposals.contains(proposal_type)) {
            return Err(ValidationError::UnsupportedProposal(proposal_type.0).into());
        }
    }

    let extensions = sorted.extensions.cloned().unwrap_or_else(|| context.extensions.clone());
    let group_id = context.group_id.as_slice();
    let mut next = tree.clone();

    for removed in &sorted.removes {
        next.remove_leaf(*removed)?;
    }
    for (leaf, leaf_node) in &sorted.updates {
        validate_leaf(ctx, &next, leaf_node, &LeafCheck::update(group_id, *leaf, &extensions))?;
        next.update_leaf(*leaf, (*leaf_node).clone())?;
    }

    let mut joiners: Vec<(LeafIndex, KeyPackage)> = Vec::with_capacity(sorted.adds.len());
    for key_package in &sorted.adds {
        let signature_key = &key_package.leaf_node.signature_key;
        if joiners.iter().any(|(_, added)| &added.leaf_node.signature_key == signature_key) {
            return Err(ValidationError::DuplicateAdd.into());
        }
        if next.find_signature_key(signature_key).is_some() {
            return Err(ValidationError::AddExistingMember.into());
        }
        validate_key_package(ctx, key_package, &next, &extensions)?;
        let index = next.add_leaf(key_package.leaf_node.clone());
        joiners.push((index, (*key_package).clone()));
    }

    if sorted.extensions.is_some() {
        validate_group_extensions(&next, &extensions)?;
    }

    let psks = sorted
        .psks
        .iter()
        .map(|id| Ok(((*id).clone(), resolve_psk(ctx, id, retained)?)))
        .collect::<Result<Vec<_>, MlsError>>()?;

    let path_required = matches!(committer, Committer::External(_))
        || proposals.is_empty()
        || proposals.iter().any(|resolved| resolved.proposal.requires_path());

    Ok(AppliedProposals {
        tree: next,
        extensions,
        joiners,
        psks,
        removed: sorted.removes,
        updated: sorted.updates.iter().map(|(leaf, _)| *leaf).collect(),
        reinit: sorted.reinit.cloned(),
        external_init: sorted.external_init.map(<[u8]>::to_vec),
        path_required,
    })
}

#[cfg(test)]
mod tests {
    use arbor_crypto::{CipherSuite, RustCryptoProvider};
    use arbor_proto::{
        ExternalInit, GroupContextExtensions, ProtocolVersion, Remove, Update,
    };
    use tls_codec::VLBytes;

    use super::*;
    use crate::{auth::BasicAuthenticationService, config::ClientConfig, tree::test_support::leaf};

    struct Fixture {
        crypto: RustCryptoProvider,
        auth: BasicAuthenticationService,
        config: ClientConfig,
        context: GroupContext,
        tree: RatchetTree,
    }

    fn fixture() -> Fixture {
        let mut tree = RatchetTree::new(leaf(0));
        for seed in 1..4 {
            tree.add_leaf(leaf(seed));
        }
        Fixture {
            crypto: RustCryptoProvider::new(CipherSuite::Curve25519Aes128).unwrap(),
            auth: BasicAuthenticationService::new(),
            config: ClientConfig::default(),
            context: GroupContext {
                version: ProtocolVersion::MLS_10,
                cipher_suite: CipherSuite::Curve25519Aes128,
                group_id: VLBytes::new(b"group1".to_vec()),
                epoch: 3,
                tree_hash: VLBytes::new(Vec::new()),
                confirmed_transcript_hash: VLBytes::new(Vec::new()),
                extensions: ExtensionList::new(),
            },
            tree,
        }
    }

    fn by_member(leaf: u32, proposal: Proposal) -> ResolvedProposal {
        ResolvedProposal { proposal, sender: Sender::Member(leaf) }
    }

    fn remove(leaf: u32) -> Proposal {
        Proposal::Remove(Remove { removed: leaf })
    }

    fn apply(
        f: &Fixture,
        committer: Committer<'_>,
        proposals: &[ResolvedProposal],
    ) -> Result<AppliedProposals, MlsError> {
        let ctx = Context::new(&f.crypto, &f.auth, &f.config);
        apply_proposals(&ctx, &f.context, &f.tree, committer, proposals, &ResumptionPsks::new())
    }

    #[test]
    fn removes_apply_and_require_path() {
        let f = fixture();
        let applied =
            apply(&f, Committer::Member(LeafIndex(0)), &[by_member(0, remove(3))]).unwrap();
        assert_eq!(applied.removed, vec![LeafIndex(3)]);
        assert_eq!(applied.tree.member_count(), 3);
        assert!(applied.path_required);
        assert_eq!(f.tree.member_count(), 4, "input tree is untouched");
    }

    #[test]
    fn empty_commit_requires_path() {
        let f = fixture();
        let applied = apply(&f, Committer::Member(LeafIndex(0)), &[]).unwrap();
        assert!(applied.path_required);
        assert_eq!(applied.tree, f.tree);
    }

    #[test]
    fn double_remove_is_rejected() {
        let f = fixture();
        let result = apply(
            &f,
            Committer::Member(LeafIndex(0)),
            &[by_member(0, remove(2)), by_member(1, remove(2))],
        );
        assert!(matches!(result, Err(MlsError::Validation(ValidationError::DuplicateRemove(2)))));
    }

    #[test]
    fn committer_cannot_remove_itself() {
        let f = fixture();
        let result = apply(&f, Committer::Member(LeafIndex(1)), &[by_member(2, remove(1))]);
        assert!(matches!(result, Err(MlsError::Validation(ValidationError::CommitterRemoved))));
    }

    #[test]
    fn committer_cannot_commit_own_update() {
        let f = fixture();
        let update = Proposal::Update(Update { leaf_node: leaf(9) });
        let result = apply(&f, Committer::Member(LeafIndex(1)), &[by_member(1, update)]);
        assert!(matches!(result, Err(MlsError::Validation(ValidationError::CommitterUpdate))));
    }

    #[test]
    fn update_and_remove_of_one_leaf_is_rejected() {
        let f = fixture();
        let update = Proposal::Update(Update { leaf_node: leaf(9) });
        let result = apply(
            &f,
            Committer::Member(LeafIndex(0)),
            &[by_member(2, update), by_member(0, remove(2))],
        );
        assert!(matches!(result, Err(MlsError::Validation(ValidationError::UpdateAndRemove(2)))));
    }

    #[test]
    fn double_update_is_rejected() {
        let f = fixture();
        let first = Proposal::Update(Update { leaf_node: leaf(8) });
        let second = Proposal::Update(Update { leaf_node: leaf(9) });
        let result = apply(
            &f,
            Committer::Member(LeafIndex(0)),
            &[by_member(2, first), by_member(2, second)],
        );
        assert!(matches!(result, Err(MlsError::Validation(ValidationError::DuplicateUpdate(2)))));
    }

    #[test]
    fn removing_a_blank_leaf_is_rejected() {
        let f = fixture();
        let result = apply(&f, Committer::Member(LeafIndex(0)), &[by_member(0, remove(7))]);
        assert!(matches!(result, Err(MlsError::Validation(ValidationError::LeafOutOfRange(7)))));
    }

    #[test]
    fn reinit_must_be_alone() {
        let f = fixture();
        let reinit = Proposal::ReInit(ReInit {
            group_id: VLBytes::new(b"group2".to_vec()),
            version: ProtocolVersion::MLS_10,
            cipher_suite: CipherSuite::Curve25519Aes128,
            extensions: ExtensionList::new(),
        });
        let result = apply(
            &f,
            Committer::Member(LeafIndex(0)),
            &[by_member(0, reinit), by_member(0, remove(2))],
        );
        assert!(matches!(result, Err(MlsError::Validation(ValidationError::ReInitNotAlone))));
    }

    #[test]
    fn external_init_needs_external_committer() {
        let f = fixture();
        let init = ResolvedProposal {
            proposal: Proposal::ExternalInit(ExternalInit { kem_output: VLBytes::new(vec![1]) }),
            sender: Sender::NewMemberCommit,
        };
        let result = apply(&f, Committer::Member(LeafIndex(0)), &[init]);
        assert!(matches!(
            result,
            Err(MlsError::Validation(ValidationError::ExternalInitInMemberCommit))
        ));
    }

    #[test]
    fn external_commit_rules() {
        let f = fixture();
        let joiner = leaf(3);
        let external = |proposal| ResolvedProposal { proposal, sender: Sender::NewMemberCommit };
        let init = || external(Proposal::ExternalInit(ExternalInit { kem_output: VLBytes::new(vec![1]) }));

        assert!(matches!(
            apply(&f, Committer::External(&joiner), &[]),
            Err(MlsError::Validation(ValidationError::MissingExternalInit))
        ));
        assert!(matches!(
            apply(&f, Committer::External(&joiner), &[init(), init()]),
            Err(MlsError::Validation(ValidationError::MultipleExternalInit))
        ));
        assert!(matches!(
            apply(&f, Committer::External(&joiner), &[init(), external(remove(1))]),
            Err(MlsError::Validation(ValidationError::ExternalRemoveIdentityMismatch))
        ));

        let resync = apply(&f, Committer::External(&joiner), &[init(), external(remove(3))]).unwrap();
        assert_eq!(resync.removed, vec![LeafIndex(3)]);
        assert_eq!(resync.external_init, Some(vec![1]));
        assert!(resync.path_required);
    }

    #[test]
    fn multiple_group_context_extensions_are_rejected() {
        let f = fixture();
        let gce = || {
            by_member(
                0,
                Proposal::GroupContextExtensions(GroupContextExtensions {
                    extensions: ExtensionList::new(),
                }),
            )
        };
        let result = apply(&f, Committer::Member(LeafIndex(0)), &[gce(), gce()]);
        assert!(matches!(
            result,
            Err(MlsError::Validation(ValidationError::MultipleGroupContextExtensions))
        ));
    }

    #[test]
    fn unsupported_custom_proposal_is_rejected() {
        let f = fixture();
        let custom = Proposal::Custom { proposal_type: ProposalType(0xff00), data: vec![] };
        let result = apply(&f, Committer::Member(LeafIndex(0)), &[by_member(0, custom)]);
        assert!(matches!(
            result,
            Err(MlsError::Validation(ValidationError::UnsupportedProposal(0xff00)))
        ));
    }

    #[test]
    fn unknown_reference_is_fatal() {
        let commit = Commit {
            proposals: vec![ProposalOrRef::Reference(ProposalRef(vec![1; 32]))],
            path: None,
        };
        assert!(matches!(
            resolve_proposals(&commit, Sender::Member(0), &BTreeMap::new()),
            Err(MlsError::Validation(ValidationError::UnknownProposalRef))
        ));
    }

    #[test]
    fn external_senders_cannot_propose_updates() {
        let update = Proposal::Update(Update { leaf_node: leaf(1) });
        assert!(check_proposal_sender(&Sender::External(0), &update).is_err());
        assert!(check_proposal_sender(&Sender::External(0), &remove(1)).is_ok());
        assert!(check_proposal_sender(&Sender::NewMemberProposal, &remove(1)).is_err());
    }
}
