//! Arbor MLS core
//!
//! The group side of MLS (RFC 9420): ratchet tree, TreeKEM, secret tree,
//! key schedule, message protection and the epoch state machine.
//!
//! # Architecture
//!
//! The core is Sans-IO. Every operation takes an immutable
//! [`ClientState`] plus a [`Context`] and returns a fresh state together with
//! the messages to send; the caller owns storage and transport.
//!
//! ```text
//!                    ┌────────────────────────────┐
//!  MlsMessage ──────►│ ClientState::process_message│──► (ClientState, ProcessedMessage)
//!                    └────────────────────────────┘
//!                    ┌────────────────────────────┐
//!  CommitOptions ───►│ ClientState::create_commit │──► (ClientState, CommitOutput)
//!                    └────────────────────────────┘
//!                                 │
//!         tree · treekem · key_schedule · secret_tree · message_protection
//!                                 │
//!                   arbor-crypto (CipherSuiteProvider)
//! ```
//!
//! # Components
//!
//! - [`group`]: [`ClientState`] and every group operation
//! - [`tree`] and [`treekem`]: public ratchet tree, hashes, update paths
//! - [`key_schedule`] and [`secret_tree`]: epoch secrets and message keys
//! - [`message_protection`]: public and private message framing
//! - [`key_package`]: identities and key packages
//!
//! # Security
//!
//! - A failed operation never touches the caller's state.
//! - Consumed ratchet secrets are deleted immediately; past epochs keep only
//!   receive material, bounded by [`ClientConfig::max_past_epochs`].

#![forbid(unsafe_code)]

pub mod auth;
pub mod config;
pub mod error;
pub mod group;
pub mod key_package;
pub mod key_schedule;
pub mod message_protection;
pub mod psk;
pub mod secret_tree;
pub mod tree;
pub mod tree_math;
pub mod treekem;

pub use auth::{AuthenticationService, BasicAuthenticationService};
pub use config::ClientConfig;
pub use error::{ErrorCategory, MlsError, UsageError, ValidationError, VerificationError};
pub use group::{
    AcceptAll, ClientState, CommitOptions, CommitOutput, CommitSummary, Context,
    ExternalJoinOptions, GroupStatus, Member, MessageReview, ProcessedMessage,
    external_sender_proposal, new_member_proposal,
};
pub use key_package::{KeyPackageBundle, KeyPackageOptions, SigningIdentity};
pub use psk::{InMemoryPskStore, NoPsks, PskIndex, ResumptionPsks};
pub use tree::RatchetTree;
pub use tree_math::LeafIndex;
