//! TreeKEM update paths (RFC 9420 sections 7.4 to 7.6 and 12.4.2).
//!
//! The committer re-keys every node on its filtered direct path from a fresh
//! random path secret and encrypts each node's path secret to the copath
//! resolution below it. Every receiver can decrypt exactly one of those
//! ciphertexts and derives the rest of the path upward from it.
//!
//! # Invariants
//!
//! - After an update path is applied, every node on the sender's direct path
//!   is either blank or holds a key from the path, and the leaf's parent hash
//!   matches the chain over the installed nodes.
//! - `commit_secret = DeriveSecret(root path secret, "path")` is identical for
//!   the committer and every receiver.
//!
//! # Security
//!
//! Path secrets are never stored; only the HPKE private keys derived from them
//! survive, inside [`TreePrivate`](crate::tree::TreePrivate).

use std::collections::HashSet;

use arbor_crypto::{CipherSuiteProvider, HpkeSecretKey, Secret, labeled};
use arbor_proto::{
    ExtensionList, GroupContext, LeafNodeSource, Node, ParentNode, UpdatePath, UpdatePathNode,
    codec,
};
use tls_codec::VLBytes;

use crate::{
    error::{MlsError, ValidationError, VerificationError},
    group::Context,
    key_package::{SigningIdentity, sign_leaf},
    tree::{LeafCheck, RatchetTree, validate_leaf},
    tree_math::{self, LeafIndex, NodeIndex},
};

const UPDATE_PATH_LABEL: &str = "UpdatePathNode";

/// Everything the committer learns from generating an update path.
#[derive(Debug)]
pub struct PathUpdate {
    /// Path to put into the commit
    pub update_path: UpdatePath,
    /// `(parent, copath child, path secret)` for each filtered direct path
    /// node, leaf to root
    pub path_secrets: Vec<(NodeIndex, NodeIndex, Secret)>,
    /// Secret fed into the key schedule
    pub commit_secret: Secret,
    /// New private keys for the leaf and every path node
    pub private_keys: Vec<(NodeIndex, HpkeSecretKey)>,
}

impl PathUpdate {
    /// Path secret a new member at `joiner` needs: the one for the lowest
    /// path node whose copath subtree contains the joiner.
    pub fn path_secret_for(&self, joiner: LeafIndex) -> Option<&Secret> {
        self.path_secrets
            .iter()
            .find(|(_, copath_child, _)| tree_math::is_in_subtree(*copath_child, joiner.node()))
            .map(|(_, _, secret)| secret)
    }
}

fn derive_node_keys(
    crypto: &dyn CipherSuiteProvider,
    path_secret: &Secret,
) -> Result<arbor_crypto::HpkeKeyPair, MlsError> {
    let node_secret = labeled::derive_secret(crypto, path_secret, "node")?;
    Ok(crypto.kem_derive(node_secret.as_bytes())?)
}

fn next_path_secret(crypto: &dyn CipherSuiteProvider, secret: &Secret) -> Result<Secret, MlsError> {
    Ok(labeled::derive_secret(crypto, secret, "path")?)
}

/// Copath resolution of `copath_child` without the `excluded` leaves.
fn recipients(tree: &RatchetTree, copath_child: NodeIndex, excluded: &[LeafIndex]) -> Vec<NodeIndex> {
    let excluded: HashSet<NodeIndex> = excluded.iter().map(|leaf| leaf.node()).collect();
    tree.resolution(copath_child).into_iter().filter(|node| !excluded.contains(node)).collect()
}

/// Re-key the committer's direct path in `tree`.
///
/// `context` is the provisional group context of the next epoch; its tree
/// hash is updated to cover the new path before path secrets are encrypted
/// under it. `excluded` lists leaves added by the same commit, which learn
/// their path secret from the Welcome instead.
pub fn create_update_path(
    crypto: &dyn CipherSuiteProvider,
    tree: &mut RatchetTree,
    sender: LeafIndex,
    identity: &SigningIdentity,
    context: &mut GroupContext,
    excluded: &[LeafIndex],
) -> Result<PathUpdate, MlsError> {
    let mut leaf = tree.leaf(sender).cloned().ok_or(ValidationError::BlankLeaf(sender.0))?;
    let leaf_keys = crypto.kem_generate()?;

    tree.blank_direct_path(sender);
    let path = tree.filtered_direct_path(sender);

    let mut secret = Secret::new(crypto.random_vec(crypto.kdf_extract_size()));
    let mut path_secrets = Vec::with_capacity(path.len());
    let mut private_keys = Vec::with_capacity(path.len() + 1);
    private_keys.push((sender.node(), leaf_keys.secret));

    for (index, (parent, copath_child)) in path.iter().enumerate() {
        if index > 0 {
            secret = next_path_secret(crypto, &secret)?;
        }
        let keys = derive_node_keys(crypto, &secret)?;
        tree.set_node(
            *parent,
            Some(Node::Parent(ParentNode {
                encryption_key: keys.public,
                parent_hash: VLBytes::new(Vec::new()),
                unmerged_leaves: Vec::new(),
            })),
        );
        private_keys.push((*parent, keys.secret));
        path_secrets.push((*parent, *copath_child, secret.clone()));
    }
    let commit_secret = next_path_secret(crypto, &secret)?;

    let leaf_parent_hash = tree.set_path_parent_hashes(crypto, &path)?;
    leaf.encryption_key = leaf_keys.public;
    leaf.signature_key = identity.signature_key.clone();
    leaf.credential = identity.credential.clone();
    leaf.leaf_node_source = LeafNodeSource::Commit(leaf_parent_hash);
    sign_leaf(crypto, &mut leaf, identity.signer(), Some((context.group_id.as_slice(), sender.0)))?;
    tree.set_node(sender.node(), Some(Node::Leaf(leaf.clone())));

    context.tree_hash = tree.tree_hash(crypto)?.into();
    let encoded_context = codec::encode(context)?;

    let mut nodes = Vec::with_capacity(path.len());
    for (parent, copath_child, path_secret) in &path_secrets {
        let encryption_key = tree
            .parent_node(*parent)
            .map(|node| node.encryption_key.clone())
            .ok_or_else(|| MlsError::Internal(format!("path node {parent} is blank")))?;

        let mut encrypted_path_secret = Vec::new();
        for recipient in recipients(tree, *copath_child, excluded) {
            let public_key = tree
                .node(recipient)
                .map(Node::encryption_key)
                .ok_or_else(|| MlsError::Internal(format!("resolution node {recipient} is blank")))?;
            encrypted_path_secret.push(labeled::encrypt_with_label(
                crypto,
                public_key,
                UPDATE_PATH_LABEL,
                &encoded_context,
                path_secret.as_bytes(),
            )?);
        }
        nodes.push(UpdatePathNode { encryption_key, encrypted_path_secret });
    }

    Ok(PathUpdate {
        update_path: UpdatePath { leaf_node: leaf, nodes },
        path_secrets,
        commit_secret,
        private_keys,
    })
}

fn check_path_keys(tree: &RatchetTree, path: &UpdatePath) -> Result<(), MlsError> {
    let mut path_keys = HashSet::new();
    for node in &path.nodes {
        if tree.contains_encryption_key(&node.encryption_key)
            || node.encryption_key == path.leaf_node.encryption_key
            || !path_keys.insert(&node.encryption_key)
        {
            return Err(ValidationError::PathKeyCollision.into());
        }
    }
    Ok(())
}

/// Install a received update path into `tree` and check its public parts.
///
/// Returns the sender's filtered direct path, which
/// [`decrypt_path_secret`] needs.
pub(crate) fn apply_update_path(
    ctx: &Context<'_>,
    tree: &mut RatchetTree,
    sender: LeafIndex,
    path: &UpdatePath,
    group_id: &[u8],
    extensions: &ExtensionList,
    excluded: &[LeafIndex],
) -> Result<Vec<(NodeIndex, NodeIndex)>, MlsError> {
    let old_leaf = tree.leaf(sender).ok_or(ValidationError::BlankLeaf(sender.0))?;
    if old_leaf.encryption_key == path.leaf_node.encryption_key {
        return Err(ValidationError::LeafKeyNotChanged.into());
    }
    check_path_keys(tree, path)?;
    validate_leaf(ctx, tree, &path.leaf_node, &LeafCheck::commit(group_id, sender, extensions))?;

    install_path(ctx.crypto, tree, sender, path, excluded)
}

/// Install the update path of an external commit, whose sender enters the
/// tree at the leftmost free leaf.
pub(crate) fn apply_joiner_path(
    ctx: &Context<'_>,
    tree: &mut RatchetTree,
    path: &UpdatePath,
    group_id: &[u8],
    extensions: &ExtensionList,
) -> Result<(LeafIndex, Vec<(NodeIndex, NodeIndex)>), MlsError> {
    check_path_keys(tree, path)?;
    let sender = tree.free_leaf();
    validate_leaf(ctx, tree, &path.leaf_node, &LeafCheck::commit(group_id, sender, extensions))?;
    tree.add_leaf(path.leaf_node.clone());

    let filtered = install_path(ctx.crypto, tree, sender, path, &[])?;
    Ok((sender, filtered))
}

fn install_path(
    crypto: &dyn CipherSuiteProvider,
    tree: &mut RatchetTree,
    sender: LeafIndex,
    path: &UpdatePath,
    excluded: &[LeafIndex],
) -> Result<Vec<(NodeIndex, NodeIndex)>, MlsError> {
    tree.blank_direct_path(sender);
    let filtered = tree.filtered_direct_path(sender);
    if filtered.len() != path.nodes.len() {
        return Err(ValidationError::PathLengthMismatch {
            expected: filtered.len(),
            actual: path.nodes.len(),
        }
        .into());
    }

    for ((parent, copath_child), node) in filtered.iter().zip(&path.nodes) {
        let expected = recipients(tree, *copath_child, excluded).len();
        if node.encrypted_path_secret.len() != expected {
            return Err(ValidationError::PathCiphertextCount {
                node: *parent,
                expected,
                actual: node.encrypted_path_secret.len(),
            }
            .into());
        }
        tree.set_node(
            *parent,
            Some(Node::Parent(ParentNode {
                encryption_key: node.encryption_key.clone(),
                parent_hash: VLBytes::new(Vec::new()),
                unmerged_leaves: Vec::new(),
            })),
        );
    }

    let leaf_parent_hash = tree.set_path_parent_hashes(crypto, &filtered)?;
    if path.leaf_node.parent_hash() != Some(leaf_parent_hash.as_slice()) {
        return Err(VerificationError::ParentHash.into());
    }
    tree.set_node(sender.node(), Some(Node::Leaf(path.leaf_node.clone())));

    Ok(filtered)
}

/// Derive private keys upward from `start`, which `path_secret` belongs to,
/// checking each against the public key in `tree`.
///
/// Walks the non-blank ancestors of `start`, which after a commit are
/// exactly the remaining nodes of the committer's filtered direct path.
/// Returns the keys and the commit secret.
pub fn derive_path_keys(
    crypto: &dyn CipherSuiteProvider,
    tree: &RatchetTree,
    start: NodeIndex,
    path_secret: Secret,
) -> Result<(Vec<(NodeIndex, HpkeSecretKey)>, Secret), MlsError> {
    let mut nodes = vec![start];
    nodes.extend(
        tree_math::direct_path(start, tree.leaf_count())
            .into_iter()
            .filter(|node| !tree.is_blank(*node)),
    );

    let mut secret = path_secret;
    let mut keys = Vec::with_capacity(nodes.len());
    for (index, node) in nodes.iter().enumerate() {
        if index > 0 {
            secret = next_path_secret(crypto, &secret)?;
        }
        let derived = derive_node_keys(crypto, &secret)?;
        let published = tree
            .parent_node(*node)
            .ok_or_else(|| MlsError::Internal(format!("path node {node} is blank")))?;
        if published.encryption_key != derived.public {
            return Err(ValidationError::PathPublicKeyMismatch.into());
        }
        keys.push((*node, derived.secret));
    }

    Ok((keys, next_path_secret(crypto, &secret)?))
}

/// Decrypt this member's path secret from an applied update path.
///
/// `context` is the provisional group context (new tree hash) the committer
/// encrypted under.
pub(crate) fn decrypt_path_secret(
    crypto: &dyn CipherSuiteProvider,
    tree: &RatchetTree,
    private: &crate::tree::TreePrivate,
    path: &UpdatePath,
    filtered: &[(NodeIndex, NodeIndex)],
    excluded: &[LeafIndex],
    context: &GroupContext,
) -> Result<(Vec<(NodeIndex, HpkeSecretKey)>, Secret), MlsError> {
    let own = private.leaf_index().node();
    let (position, (parent, copath_child)) = filtered
        .iter()
        .enumerate()
        .find(|(_, (_, copath_child))| tree_math::is_in_subtree(*copath_child, own))
        .ok_or(ValidationError::NoPathOverlap)?;

    let resolution = recipients(tree, *copath_child, excluded);
    let (slot, key) = resolution
        .iter()
        .enumerate()
        .find_map(|(slot, node)| private.key(*node).map(|key| (slot, key)))
        .ok_or(ValidationError::NoPathOverlap)?;

    let ciphertext = path
        .nodes
        .get(position)
        .and_then(|node| node.encrypted_path_secret.get(slot))
        .ok_or(ValidationError::NoPathOverlap)?;
    let path_secret = labeled::decrypt_with_label(
        crypto,
        key,
        UPDATE_PATH_LABEL,
        &codec::encode(context)?,
        ciphertext,
    )
    .map_err(MlsError::from_open)?;

    derive_path_keys(crypto, tree, *parent, Secret::new(path_secret))
}
