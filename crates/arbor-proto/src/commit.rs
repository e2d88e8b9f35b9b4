//! Commits and update paths (RFC 9420 section 12.4).

use arbor_crypto::{HpkeCiphertext, HpkePublicKey};
use tls_codec::{TlsDeserialize, TlsSerialize, TlsSize};

use crate::{leaf_node::LeafNode, proposals::ProposalOrRef};

/// One node of an update path.
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct UpdatePathNode {
    /// New public key of this parent
    pub encryption_key: HpkePublicKey,
    /// Path secret, encrypted once per member of the copath resolution
    pub encrypted_path_secret: Vec<HpkeCiphertext>,
}

/// New leaf plus one entry per filtered direct path node, leaf to root.
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct UpdatePath {
    /// Committer's new leaf (source `commit`)
    pub leaf_node: LeafNode,
    /// Re-keyed parents
    pub nodes: Vec<UpdatePathNode>,
}

/// Proposals being applied plus an optional path update.
#[derive(Debug, Clone, PartialEq, Eq, Default, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct Commit {
    /// Inline proposals and references, in commit order
    pub proposals: Vec<ProposalOrRef>,
    /// Present when the committer re-keys its direct path
    pub path: Option<UpdatePath>,
}

#[cfg(test)]
mod tests {
    use tls_codec::{Deserialize, Serialize};

    use super::*;
    use crate::proposals::{Proposal, ProposalRef, Remove};

    #[test]
    fn empty_commit_is_two_bytes() {
        let bytes = Commit::default().tls_serialize_detached().unwrap();
        // empty proposal vector, absent path
        assert_eq!(bytes, vec![0, 0]);
    }

    #[test]
    fn commit_with_mixed_proposals_round_trips() {
        let commit = Commit {
            proposals: vec![
                ProposalOrRef::Proposal(Proposal::Remove(Remove { removed: 2 })),
                ProposalOrRef::Reference(ProposalRef(vec![1; 32])),
            ],
            path: None,
        };
        let bytes = commit.tls_serialize_detached().unwrap();
        assert_eq!(Commit::tls_deserialize_exact(bytes.as_slice()).unwrap(), commit);
    }
}
