//! Error types for the MLS group core.
//!
//! Every failure aborts the operation that raised it; the caller's
//! [`ClientState`](crate::ClientState) is borrowed immutably and stays valid.
//! Errors are grouped by who is at fault:
//!
//! - [`ValidationError`]: the peer broke a protocol rule
//! - [`VerificationError`]: authenticated data did not check out
//! - [`UsageError`]: the caller broke an API contract
//! - codec, internal and provider failures

use arbor_crypto::CryptoError;
use arbor_proto::WireFormat;
use thiserror::Error;

use crate::group::GroupStatus;

/// Broad category of an [`MlsError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Structural or protocol-rule violation
    Validation,
    /// Signature, MAC, hash or AEAD mismatch
    Verification,
    /// Malformed wire input
    Codec,
    /// API contract violation by the caller
    Usage,
    /// Broken internal invariant
    Internal,
    /// Crypto provider failure
    Crypto,
}

/// Top-level error of every group operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MlsError {
    /// Protocol rule violated
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Authenticated data rejected
    #[error("verification failed: {0}")]
    Verification(#[from] VerificationError),

    /// Wire input could not be decoded
    #[error("codec error: {0}")]
    Codec(String),

    /// Caller misuse
    #[error("usage error: {0}")]
    Usage(#[from] UsageError),

    /// Internal invariant violated
    #[error("internal error: {0}")]
    Internal(String),

    /// Crypto provider failure
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl MlsError {
    /// Category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Verification(_) => ErrorCategory::Verification,
            Self::Codec(_) => ErrorCategory::Codec,
            Self::Usage(_) => ErrorCategory::Usage,
            Self::Internal(_) => ErrorCategory::Internal,
            Self::Crypto(_) => ErrorCategory::Crypto,
        }
    }

    /// Failed AEAD or HPKE open. A tag mismatch is a verification failure;
    /// anything else stays a provider error.
    pub(crate) fn from_open(err: CryptoError) -> Self {
        match err {
            CryptoError::AeadOpenFailed => VerificationError::AeadTag.into(),
            other => Self::Crypto(other),
        }
    }
}

impl From<tls_codec::Error> for MlsError {
    fn from(err: tls_codec::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

/// A peer (or imported state) broke a protocol rule.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Ratchet tree width is not `2^d - 1`
    #[error("ratchet tree width {0} is not 2^d - 1")]
    InvalidTreeWidth(usize),

    /// Ratchet tree on the wire ends with a blank node
    #[error("ratchet tree ends with a blank node")]
    TrailingBlankNode,

    /// Ratchet tree on the wire ends at a parent position
    #[error("ratchet tree of {0} nodes ends at a parent position")]
    TrailingParentNode(u32),

    /// Ratchet tree holds no members
    #[error("ratchet tree is empty")]
    EmptyTree,

    /// A leaf sits at a parent position or the other way around
    #[error("wrong node kind at index {0}")]
    WrongNodeKind(u32),

    /// Two nodes share an HPKE key
    #[error("duplicate encryption key in tree")]
    DuplicateEncryptionKey,

    /// Two leaves share a signature key
    #[error("duplicate signature key in tree")]
    DuplicateSignatureKey,

    /// Unmerged leaf is blank, not below the parent, or out of order
    #[error("invalid unmerged leaf {leaf} at parent {parent}")]
    InvalidUnmergedLeaf {
        /// Parent node index
        parent: u32,
        /// Offending leaf index
        leaf: u32,
    },

    /// Leaf index beyond the tree
    #[error("leaf {0} out of range")]
    LeafOutOfRange(u32),

    /// Operation targets an unoccupied leaf
    #[error("leaf {0} is blank")]
    BlankLeaf(u32),

    /// Leaf node source does not fit where the leaf appears
    #[error("unexpected leaf node source")]
    UnexpectedLeafSource,

    /// Leaf or key package outside its lifetime
    #[error("lifetime does not cover current time")]
    LifetimeExpired,

    /// Extension list contains a type twice
    #[error("duplicate extension type")]
    DuplicateExtension,

    /// Extension type not supported by a member
    #[error("extension type {0:#06x} not supported")]
    UnsupportedExtension(u16),

    /// Proposal type not supported by a member
    #[error("proposal type {0:#06x} not supported")]
    UnsupportedProposal(u16),

    /// Credential type not supported by a member
    #[error("credential type {0:#06x} not supported")]
    UnsupportedCredential(u16),

    /// Leaf lacks a capability the group requires
    #[error("leaf does not meet required capabilities")]
    MissingRequiredCapability,

    /// Leaf does not list the group cipher suite or version
    #[error("leaf does not support the group cipher suite or version")]
    UnsupportedGroupParameters,

    /// The authentication service rejected a credential
    #[error("credential rejected by authentication service")]
    CredentialRejected,

    /// Key package for another protocol version
    #[error("key package version {0} not supported")]
    KeyPackageVersion(u16),

    /// Key package for another cipher suite
    #[error("key package cipher suite {0:#06x} does not match group")]
    KeyPackageCipherSuite(u16),

    /// Key package reuses its leaf encryption key as init key
    #[error("key package init key equals leaf encryption key")]
    InitKeyReuse,

    /// Number of update path nodes differs from the filtered direct path
    #[error("update path has {actual} nodes, expected {expected}")]
    PathLengthMismatch {
        /// Filtered direct path length
        expected: usize,
        /// Nodes in the update path
        actual: usize,
    },

    /// Ciphertext count differs from the copath resolution size
    #[error("update path node {node} has {actual} ciphertexts, expected {expected}")]
    PathCiphertextCount {
        /// Parent node index
        node: u32,
        /// Resolution size
        expected: usize,
        /// Ciphertexts present
        actual: usize,
    },

    /// Committer kept its old leaf encryption key
    #[error("commit leaf reuses the previous encryption key")]
    LeafKeyNotChanged,

    /// Update path key already present in the tree
    #[error("update path public key already in tree")]
    PathKeyCollision,

    /// Derived path key differs from the one the committer published
    #[error("derived path public key does not match update path")]
    PathPublicKeyMismatch,

    /// None of our private keys can decrypt the update path
    #[error("no private key overlaps the update path")]
    NoPathOverlap,

    /// Proposals require a path but the commit has none
    #[error("commit requires an update path")]
    PathRequired,

    /// Requested generation was already consumed or evicted
    #[error("generation {generation} is no longer available")]
    GenerationTooOld {
        /// Requested generation
        generation: u32,
    },

    /// Requested generation is beyond the forward ratchet limit
    #[error("generation {generation} too far ahead of {current}")]
    GenerationTooFarAhead {
        /// Requested generation
        generation: u32,
        /// Current generation
        current: u32,
    },

    /// Ratchet reached the last generation
    #[error("ratchet generation exhausted")]
    GenerationExhausted,

    /// Secret tree no longer holds secrets for this leaf
    #[error("secret tree leaf {0} unavailable")]
    SecretTreeLeafUnavailable(u32),

    /// Commit references a proposal we never received
    #[error("unknown proposal reference")]
    UnknownProposalRef,

    /// External commit carries more than one `external_init`
    #[error("multiple external_init proposals")]
    MultipleExternalInit,

    /// External commit carries more than one `remove`
    #[error("external commit removes more than one member")]
    ExternalCommitMultipleRemoves,

    /// Proposal type forbidden in an external commit
    #[error("proposal type {0:#06x} not allowed in external commit")]
    NotAllowedInExternalCommit(u16),

    /// `external_init` in a member commit
    #[error("external_init outside an external commit")]
    ExternalInitInMemberCommit,

    /// External commit without `external_init`
    #[error("external commit lacks external_init")]
    MissingExternalInit,

    /// External commit removes a leaf of another identity
    #[error("external commit removes a different identity")]
    ExternalRemoveIdentityMismatch,

    /// `reinit` combined with other proposals
    #[error("reinit must be the only proposal")]
    ReInitNotAlone,

    /// Committer updates its own leaf through a proposal
    #[error("committer may not include its own update")]
    CommitterUpdate,

    /// Committer removes itself
    #[error("committer may not remove itself")]
    CommitterRemoved,

    /// The same leaf is removed twice
    #[error("leaf {0} removed twice")]
    DuplicateRemove(u32),

    /// The same leaf is updated twice
    #[error("leaf {0} updated twice")]
    DuplicateUpdate(u32),

    /// The same leaf is updated and removed
    #[error("leaf {0} updated and removed")]
    UpdateAndRemove(u32),

    /// The same member is added twice
    #[error("member added twice")]
    DuplicateAdd,

    /// Added member is already in the group
    #[error("added member already in group")]
    AddExistingMember,

    /// The same PSK is injected twice
    #[error("duplicate pre-shared key")]
    DuplicatePsk,

    /// PSK secret is not available
    #[error("pre-shared key not available")]
    PskUnavailable,

    /// PSK nonce has the wrong length or usage is not allowed here
    #[error("invalid pre-shared key proposal")]
    InvalidPsk,

    /// More than one `group_context_extensions`
    #[error("multiple group_context_extensions proposals")]
    MultipleGroupContextExtensions,

    /// Proposal type not allowed from this sender type
    #[error("proposal type {0:#06x} not allowed from this sender")]
    InvalidProposalSender(u16),

    /// Message for another group
    #[error("message for a different group")]
    WrongGroup,

    /// Message for another epoch
    #[error("message for epoch {actual}, current epoch {expected}")]
    WrongEpoch {
        /// Current epoch
        expected: u64,
        /// Epoch in the message
        actual: u64,
    },

    /// Message from an epoch no longer retained
    #[error("epoch {0} is no longer retained")]
    EpochNotRetained(u64),

    /// Handshake message from a past epoch
    #[error("handshake message from a past epoch")]
    HandshakeFromPastEpoch,

    /// Sender leaf or external sender index unknown
    #[error("unknown sender {0}")]
    UnknownSender(u32),

    /// Sender type not allowed for this content or wire format
    #[error("sender type not allowed here")]
    InvalidSenderType,

    /// Application data in a public message
    #[error("application data must be encrypted")]
    UnencryptedApplicationMessage,

    /// Message sent by this client
    #[error("cannot process own message")]
    OwnMessage,

    /// No Welcome entry matches our key package
    #[error("welcome is not addressed to this key package")]
    NoMatchingKeyPackage,

    /// Neither the extension nor the caller supplied a ratchet tree
    #[error("ratchet tree missing")]
    MissingRatchetTree,

    /// Group info lacks `external_pub`
    #[error("group info lacks external_pub")]
    MissingExternalPub,

    /// Our key package leaf is not in the joined tree
    #[error("own leaf not found in tree")]
    OwnLeafNotFound,

    /// Resumption PSK of a reinit or branch does not match
    #[error("resumption pre-shared key does not bind the expected group")]
    InvalidResumptionPsk,

    /// New group parameters differ from the committed reinit
    #[error("group parameters do not match the reinit proposal")]
    ReInitMismatch,

    /// The message review hook declined the message
    #[error("rejected by message review")]
    RejectedByReview,
}

/// Authenticated data failed a cryptographic check.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationError {
    /// Signature mismatch
    #[error("signature")]
    Signature,
    /// Membership tag mismatch
    #[error("membership tag")]
    MembershipTag,
    /// Confirmation tag mismatch
    #[error("confirmation tag")]
    ConfirmationTag,
    /// Parent hash chain broken
    #[error("parent hash")]
    ParentHash,
    /// Tree hash differs from the group context
    #[error("tree hash")]
    TreeHash,
    /// AEAD tag mismatch
    #[error("AEAD tag")]
    AeadTag,
}

/// The caller violated an API contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    /// Operation not allowed in the current group status
    #[error("cannot {operation} while group is {state:?}")]
    InvalidState {
        /// Status when the call was made
        state: GroupStatus,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Provider suite differs from the group suite
    #[error("provider cipher suite {actual:#06x} does not match {expected:#06x}")]
    CipherSuiteMismatch {
        /// Suite of the group or message
        expected: u16,
        /// Suite of the provider
        actual: u16,
    },

    /// Message type cannot be processed by this operation
    #[error("unexpected wire format {0:?}")]
    UnexpectedWireFormat(WireFormat),

    /// Argument rejected before any protocol work
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories() {
        assert_eq!(
            MlsError::from(ValidationError::DuplicateAdd).category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            MlsError::from(VerificationError::ConfirmationTag).category(),
            ErrorCategory::Verification
        );
        assert_eq!(
            MlsError::from(tls_codec::Error::EndOfStream).category(),
            ErrorCategory::Codec
        );
        assert_eq!(MlsError::from(CryptoError::InvalidMac).category(), ErrorCategory::Crypto);
        assert_eq!(
            MlsError::from(UsageError::InvalidArgument("x")).category(),
            ErrorCategory::Usage
        );
    }

    #[test]
    fn display_includes_context() {
        let err = MlsError::from(ValidationError::WrongEpoch { expected: 2, actual: 1 });
        assert_eq!(err.to_string(), "validation failed: message for epoch 1, current epoch 2");

        let err = MlsError::from(UsageError::InvalidState {
            state: GroupStatus::RemovedFromGroup,
            operation: "create_commit",
        });
        assert!(err.to_string().contains("create_commit"));
    }
}
