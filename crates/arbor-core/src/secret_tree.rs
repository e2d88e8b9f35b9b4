//! Secret tree and per-sender hash ratchets (RFC 9420 section 9).
//!
//! The tree starts as a single root secret (the epoch's `encryption_secret`)
//! and is expanded lazily: the first time a sender's leaf is needed, every
//! secret from the lowest held ancestor down to the leaf is derived and the
//! consumed parent secrets are deleted.
//!
//! # Security
//!
//! - A consumed node secret is removed from the map (and zeroized on drop)
//!   before the derived children are stored.
//! - Ratchet secrets move forward only. A generation behind the current one
//!   is served solely from the bounded `unused` cache, and each cached key is
//!   removed on first use.

use std::collections::BTreeMap;

use arbor_crypto::{CipherSuiteProvider, Secret, labeled};
use arbor_proto::ContentType;
use tracing::debug;

use crate::{
    error::{MlsError, ValidationError},
    tree_math::{self, LeafIndex, NodeIndex},
};

/// Which of a sender's two ratchets to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatchetType {
    /// Proposals and commits
    Handshake,
    /// Application data
    Application,
}

impl From<ContentType> for RatchetType {
    fn from(content_type: ContentType) -> Self {
        match content_type {
            ContentType::Application => Self::Application,
            ContentType::Proposal | ContentType::Commit => Self::Handshake,
        }
    }
}

/// AEAD key and nonce for one generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatchetKey {
    /// AEAD key (`Nk` bytes)
    pub key: Secret,
    /// AEAD nonce before the reuse guard is applied (`Nn` bytes)
    pub nonce: Secret,
    /// Generation the key belongs to
    pub generation: u32,
}

/// Result of consuming the next generation of a ratchet.
#[derive(Debug)]
pub struct RatchetStep {
    /// Key material for this generation
    pub key: RatchetKey,
    /// Tree nodes whose secrets were erased to reach the leaf
    pub erased: Vec<NodeIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HashRatchet {
    secret: Secret,
    generation: u32,
    unused: BTreeMap<u32, RatchetKey>,
}

impl HashRatchet {
    fn new(secret: Secret) -> Self {
        Self { secret, generation: 0, unused: BTreeMap::new() }
    }

    /// Derive the key for the current generation and step the secret.
    fn advance(&mut self, crypto: &dyn CipherSuiteProvider) -> Result<RatchetKey, MlsError> {
        let generation = self.generation;
        let next = generation.checked_add(1).ok_or(ValidationError::GenerationExhausted)?;

        let key = labeled::derive_tree_secret(
            crypto,
            &self.secret,
            "key",
            generation,
            crypto.aead_key_size(),
        )?;
        let nonce = labeled::derive_tree_secret(
            crypto,
            &self.secret,
            "nonce",
            generation,
            crypto.aead_nonce_size(),
        )?;
        self.secret = labeled::derive_tree_secret(
            crypto,
            &self.secret,
            "secret",
            generation,
            crypto.kdf_extract_size(),
        )?;
        self.generation = next;

        Ok(RatchetKey { key, nonce, generation })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LeafRatchets {
    handshake: HashRatchet,
    application: HashRatchet,
}

impl LeafRatchets {
    fn get_mut(&mut self, ratchet_type: RatchetType) -> &mut HashRatchet {
        match ratchet_type {
            RatchetType::Handshake => &mut self.handshake,
            RatchetType::Application => &mut self.application,
        }
    }
}

/// Window limits for out-of-order delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatchetWindow {
    /// Largest forward jump accepted
    pub max_forward: u32,
    /// Skipped keys retained per ratchet
    pub tolerance: u32,
}

/// Secret tree of one epoch.
///
/// # Invariants
///
/// - A node index is present in `nodes` only while none of its descendants'
///   leaves have been materialized through it.
/// - A leaf present in `leaves` has no secret left in `nodes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretTree {
    leaf_count: u32,
    nodes: BTreeMap<NodeIndex, Secret>,
    leaves: BTreeMap<u32, LeafRatchets>,
}

impl SecretTree {
    /// Tree rooted at `encryption_secret` for a group of `leaf_count` leaves.
    pub fn new(encryption_secret: Secret, leaf_count: u32) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(tree_math::root(leaf_count), encryption_secret);
        Self { leaf_count, nodes, leaves: BTreeMap::new() }
    }

    /// Number of leaves the tree was built for.
    pub fn leaf_count(&self) -> u32 {
        self.leaf_count
    }

    /// Node secrets still held (excluding materialized leaf ratchets).
    pub fn held_nodes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.nodes.keys().copied()
    }

    /// Current generation of a ratchet, if the leaf has been materialized.
    pub fn generation(&self, leaf: LeafIndex, ratchet_type: RatchetType) -> Option<u32> {
        self.leaves.get(&leaf.0).map(|ratchets| match ratchet_type {
            RatchetType::Handshake => ratchets.handshake.generation,
            RatchetType::Application => ratchets.application.generation,
        })
    }

    /// Derive the leaf's ratchets if needed, erasing consumed ancestors.
    fn materialize(
        &mut self,
        crypto: &dyn CipherSuiteProvider,
        leaf: LeafIndex,
    ) -> Result<Vec<NodeIndex>, MlsError> {
        if self.leaves.contains_key(&leaf.0) {
            return Ok(Vec::new());
        }
        if leaf.0 >= self.leaf_count {
            return Err(ValidationError::SecretTreeLeafUnavailable(leaf.0).into());
        }

        let target = leaf.node();
        let mut path = vec![target];
        path.extend(tree_math::direct_path(target, self.leaf_count));
        let start = path
            .iter()
            .position(|node| self.nodes.contains_key(node))
            .ok_or(ValidationError::SecretTreeLeafUnavailable(leaf.0))?;

        let mut erased = Vec::with_capacity(start + 1);
        let mut current = path[start];
        let mut secret = self
            .nodes
            .remove(&current)
            .ok_or_else(|| MlsError::Internal(format!("secret for node {current} vanished")))?;
        erased.push(current);

        let nh = crypto.kdf_extract_size();
        while current != target {
            let (Some(left), Some(right)) = (tree_math::left(current), tree_math::right(current))
            else {
                return Err(MlsError::Internal(format!("node {current} has no children")));
            };
            let left_secret = labeled::expand_with_label(crypto, &secret, "tree", b"left", nh)?;
            let right_secret = labeled::expand_with_label(crypto, &secret, "tree", b"right", nh)?;

            if tree_math::is_in_subtree(left, target) {
                self.nodes.insert(right, right_secret);
                current = left;
                secret = left_secret;
            } else {
                self.nodes.insert(left, left_secret);
                current = right;
                secret = right_secret;
            }
            erased.push(current);
        }

        let handshake = labeled::expand_with_label(crypto, &secret, "handshake", &[], nh)?;
        let application = labeled::expand_with_label(crypto, &secret, "application", &[], nh)?;
        self.leaves.insert(
            leaf.0,
            LeafRatchets {
                handshake: HashRatchet::new(handshake),
                application: HashRatchet::new(application),
            },
        );

        debug!(leaf = leaf.0, erased = erased.len(), "materialized secret tree leaf");
        Ok(erased)
    }

    fn ratchet(
        &mut self,
        crypto: &dyn CipherSuiteProvider,
        leaf: LeafIndex,
        ratchet_type: RatchetType,
    ) -> Result<(&mut HashRatchet, Vec<NodeIndex>), MlsError> {
        let erased = self.materialize(crypto, leaf)?;
        let ratchets = self
            .leaves
            .get_mut(&leaf.0)
            .ok_or(ValidationError::SecretTreeLeafUnavailable(leaf.0))?;
        Ok((ratchets.get_mut(ratchet_type), erased))
    }

    /// Consume the next generation of a sender's ratchet.
    pub fn next_key(
        &mut self,
        crypto: &dyn CipherSuiteProvider,
        leaf: LeafIndex,
        ratchet_type: RatchetType,
    ) -> Result<RatchetStep, MlsError> {
        let (ratchet, erased) = self.ratchet(crypto, leaf, ratchet_type)?;
        let key = ratchet.advance(crypto)?;
        Ok(RatchetStep { key, erased })
    }

    /// Key for a specific generation, for received messages.
    ///
    /// Generations ahead of the ratchet are reached by stepping forward and
    /// caching the skipped keys; generations behind it must still be cached.
    /// Either way the returned key is no longer available afterwards.
    pub fn key_for_generation(
        &mut self,
        crypto: &dyn CipherSuiteProvider,
        window: RatchetWindow,
        leaf: LeafIndex,
        ratchet_type: RatchetType,
        generation: u32,
    ) -> Result<RatchetKey, MlsError> {
        let (ratchet, _) = self.ratchet(crypto, leaf, ratchet_type)?;

        if generation < ratchet.generation {
            return ratchet
                .unused
                .remove(&generation)
                .ok_or_else(|| ValidationError::GenerationTooOld { generation }.into());
        }

        if generation - ratchet.generation > window.max_forward {
            return Err(ValidationError::GenerationTooFarAhead {
                generation,
                current: ratchet.generation,
            }
            .into());
        }

        while ratchet.generation < generation {
            let skipped = ratchet.advance(crypto)?;
            ratchet.unused.insert(skipped.generation, skipped);
        }
        while ratchet.unused.len() > window.tolerance as usize {
            ratchet.unused.pop_first();
        }

        ratchet.advance(crypto)
    }
}
