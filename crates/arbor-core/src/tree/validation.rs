//! Structural tree checks and leaf node validation (RFC 9420 section 7.3).

use std::collections::HashSet;

use arbor_crypto::labeled;
use arbor_proto::{
    Capabilities, CredentialType, ExtensionList, LeafNode, LeafNodeSource, Node, ProtocolVersion,
    RequiredCapabilities,
};

use super::RatchetTree;
use crate::{
    error::{MlsError, ValidationError, VerificationError},
    group::Context,
    tree_math::{self, LeafIndex},
};

const LEAF_NODE_LABEL: &str = "LeafNodeTBS";

impl RatchetTree {
    /// Width, node kinds, key uniqueness and unmerged leaves.
    pub(crate) fn validate_structure(&self) -> Result<(), MlsError> {
        let width = self.nodes.len();
        if !(width + 1).is_power_of_two() {
            return Err(ValidationError::InvalidTreeWidth(width).into());
        }

        for (index, node) in self.nodes.iter().enumerate() {
            let wrong_kind = match node {
                Some(Node::Leaf(_)) => index % 2 == 1,
                Some(Node::Parent(_)) => index % 2 == 0,
                None => false,
            };
            if wrong_kind {
                return Err(ValidationError::WrongNodeKind(index as u32).into());
            }
        }

        if self.member_count() == 0 {
            return Err(ValidationError::EmptyTree.into());
        }

        let mut encryption_keys = HashSet::new();
        for node in self.nodes.iter().flatten() {
            if !encryption_keys.insert(node.encryption_key()) {
                return Err(ValidationError::DuplicateEncryptionKey.into());
            }
        }

        let mut signature_keys = HashSet::new();
        for (_, leaf) in self.members() {
            if !signature_keys.insert(&leaf.signature_key) {
                return Err(ValidationError::DuplicateSignatureKey.into());
            }
        }

        for (index, node) in self.nodes.iter().enumerate() {
            let Some(Node::Parent(parent)) = node else { continue };
            let index = index as u32;
            let mut seen = HashSet::new();
            for leaf in &parent.unmerged_leaves {
                let valid = seen.insert(*leaf)
                    && tree_math::is_in_subtree(index, LeafIndex(*leaf).node())
                    && self.leaf(LeafIndex(*leaf)).is_some();
                if !valid {
                    return Err(
                        ValidationError::InvalidUnmergedLeaf { parent: index, leaf: *leaf }.into()
                    );
                }
            }
        }

        Ok(())
    }
}

/// Where a leaf node is expected to come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SourceKind {
    KeyPackage,
    Update,
    Commit,
}

/// What to check a leaf node against.
pub(crate) struct LeafCheck<'a> {
    /// Required source, `None` to accept whatever the leaf carries
    source: Option<SourceKind>,
    /// Group id and position for update and commit leaves
    group: Option<(&'a [u8], LeafIndex)>,
    /// Group context extensions the leaf must support
    extensions: &'a ExtensionList,
    /// The leaf already sits in `tree` (imported tree)
    in_tree: bool,
    /// Leaf it replaces, if any
    replacing: Option<LeafIndex>,
}

impl<'a> LeafCheck<'a> {
    /// Leaf inside a key package being added.
    pub(crate) fn key_package(extensions: &'a ExtensionList) -> Self {
        Self {
            source: Some(SourceKind::KeyPackage),
            group: None,
            extensions,
            in_tree: false,
            replacing: None,
        }
    }

    /// Leaf of an update proposal from `index`.
    pub(crate) fn update(group_id: &'a [u8], index: LeafIndex, extensions: &'a ExtensionList) -> Self {
        Self {
            source: Some(SourceKind::Update),
            group: Some((group_id, index)),
            extensions,
            in_tree: false,
            replacing: Some(index),
        }
    }

    /// Leaf of an update path committed from `index`.
    pub(crate) fn commit(group_id: &'a [u8], index: LeafIndex, extensions: &'a ExtensionList) -> Self {
        Self {
            source: Some(SourceKind::Commit),
            group: Some((group_id, index)),
            extensions,
            in_tree: false,
            replacing: Some(index),
        }
    }

    /// Leaf found at `index` of a tree being imported.
    pub(crate) fn imported(group_id: &'a [u8], index: LeafIndex, extensions: &'a ExtensionList) -> Self {
        Self { source: None, group: Some((group_id, index)), extensions, in_tree: true, replacing: Some(index) }
    }
}

fn source_kind(source: &LeafNodeSource) -> SourceKind {
    match source {
        LeafNodeSource::KeyPackage(_) => SourceKind::KeyPackage,
        LeafNodeSource::Update => SourceKind::Update,
        LeafNodeSource::Commit(_) => SourceKind::Commit,
    }
}

fn supports_credential(leaf: &LeafNode, credential_type: CredentialType) -> bool {
    leaf.capabilities.credentials.contains(&credential_type)
}

/// True if `capabilities` cover everything `required` lists.
pub(crate) fn meets_required_capabilities(
    capabilities: &Capabilities,
    required: &RequiredCapabilities,
) -> bool {
    let extensions_ok =
        required.extension_types.iter().all(|t| t.is_default() || capabilities.extensions.contains(t));
    let proposals_ok =
        required.proposal_types.iter().all(|t| t.is_default() || capabilities.proposals.contains(t));
    let credentials_ok =
        required.credential_types.iter().all(|t| capabilities.credentials.contains(t));
    extensions_ok && proposals_ok && credentials_ok
}

/// Validate a leaf node against the group and the tree it joins.
pub(crate) fn validate_leaf(
    ctx: &Context<'_>,
    tree: &RatchetTree,
    leaf: &LeafNode,
    check: &LeafCheck<'_>,
) -> Result<(), MlsError> {
    let source = source_kind(&leaf.leaf_node_source);
    if check.source.is_some_and(|expected| expected != source) {
        return Err(ValidationError::UnexpectedLeafSource.into());
    }

    let binding = match source {
        SourceKind::KeyPackage => None,
        SourceKind::Update | SourceKind::Commit => {
            Some(check.group.ok_or(ValidationError::UnexpectedLeafSource)?)
        },
    };
    let tbs = leaf.to_be_signed(binding.map(|(group_id, index)| (group_id, index.0)))?;
    labeled::verify_with_label(
        ctx.crypto,
        &leaf.signature_key,
        LEAF_NODE_LABEL,
        &tbs,
        leaf.signature.as_slice(),
    )
    .map_err(|_| VerificationError::Signature)?;

    if !ctx.auth.validate_credential(&leaf.credential, &leaf.signature_key) {
        return Err(ValidationError::CredentialRejected.into());
    }

    if let LeafNodeSource::KeyPackage(lifetime) = &leaf.leaf_node_source {
        if !check.in_tree && ctx.config.validate_lifetimes && !lifetime.contains(ctx.crypto.unix_time())
        {
            return Err(ValidationError::LifetimeExpired.into());
        }
    }

    let capabilities = &leaf.capabilities;
    if !capabilities.versions.contains(&ProtocolVersion::MLS_10)
        || !capabilities.cipher_suites.contains(&ctx.crypto.cipher_suite().id())
    {
        return Err(ValidationError::UnsupportedGroupParameters.into());
    }

    if let Some(required) = check.extensions.required_capabilities() {
        if !meets_required_capabilities(capabilities, required) {
            return Err(ValidationError::MissingRequiredCapability.into());
        }
    }

    for extension_type in check.extensions.types() {
        if !extension_type.is_default() && !capabilities.extensions.contains(&extension_type) {
            return Err(ValidationError::UnsupportedExtension(extension_type.0).into());
        }
    }

    if leaf.extensions.has_duplicates() {
        return Err(ValidationError::DuplicateExtension.into());
    }
    for extension_type in leaf.extensions.types() {
        if !extension_type.is_default() && !capabilities.extensions.contains(&extension_type) {
            return Err(ValidationError::UnsupportedExtension(extension_type.0).into());
        }
    }

    let credential_type = leaf.credential.credential_type();
    if !supports_credential(leaf, credential_type) {
        return Err(ValidationError::UnsupportedCredential(credential_type.0).into());
    }
    for (index, member) in tree.members() {
        if Some(index) == check.replacing {
            continue;
        }
        let member_type = member.credential.credential_type();
        if !supports_credential(member, credential_type) || !supports_credential(leaf, member_type)
        {
            return Err(ValidationError::UnsupportedCredential(credential_type.0).into());
        }
    }

    if !check.in_tree {
        if tree.contains_encryption_key(&leaf.encryption_key) {
            return Err(ValidationError::DuplicateEncryptionKey.into());
        }
        let signature_owner = tree.find_signature_key(&leaf.signature_key);
        if signature_owner.is_some() && signature_owner != check.replacing {
            return Err(ValidationError::DuplicateSignatureKey.into());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use arbor_crypto::HpkePublicKey;
    use arbor_proto::ParentNode;
    use tls_codec::VLBytes;

    use super::*;
    use crate::tree::test_support::leaf;

    #[test]
    fn duplicate_encryption_key_is_rejected() {
        let mut tree = RatchetTree::new(leaf(0));
        let mut twin = leaf(1);
        twin.encryption_key = leaf(0).encryption_key;
        tree.add_leaf(twin);
        assert!(matches!(
            tree.validate_structure(),
            Err(MlsError::Validation(ValidationError::DuplicateEncryptionKey))
        ));
    }

    #[test]
    fn duplicate_signature_key_is_rejected() {
        let mut tree = RatchetTree::new(leaf(0));
        let mut twin = leaf(1);
        twin.signature_key = leaf(0).signature_key;
        tree.add_leaf(twin);
        assert!(matches!(
            tree.validate_structure(),
            Err(MlsError::Validation(ValidationError::DuplicateSignatureKey))
        ));
    }

    #[test]
    fn unmerged_leaf_outside_subtree_is_rejected() {
        let mut tree = RatchetTree::new(leaf(0));
        for seed in 1..4 {
            tree.add_leaf(leaf(seed));
        }
        tree.set_node(
            1,
            Some(Node::Parent(ParentNode {
                encryption_key: HpkePublicKey::new(vec![99; 32]),
                parent_hash: VLBytes::new(vec![]),
                unmerged_leaves: vec![3],
            })),
        );
        assert!(matches!(
            tree.validate_structure(),
            Err(MlsError::Validation(ValidationError::InvalidUnmergedLeaf { parent: 1, leaf: 3 }))
        ));
    }

    #[test]
    fn blank_only_tree_is_empty() {
        let mut tree = RatchetTree::new(leaf(0));
        tree.add_leaf(leaf(1));
        tree.set_node(0, None);
        tree.set_node(2, None);
        assert!(matches!(
            tree.validate_structure(),
            Err(MlsError::Validation(ValidationError::EmptyTree))
        ));
    }
}
