//! Tests for joins that bypass a Welcome from a member and for groups that
//! continue an earlier one.
//!
//! These tests verify critical invariants:
//! - An external committer lands in the same epoch as the members
//! - Proposals from external senders and prospective members are honored
//! - Reinit and branch successors are bound to the old group's epoch
//! - External PSKs must be known to every member

mod common;

use arbor_core::{
    CommitOptions, ExternalJoinOptions, GroupStatus, InMemoryPskStore, LeafIndex, MlsError,
    ProcessedMessage, UsageError, ValidationError, external_sender_proposal, new_member_proposal,
};
use arbor_crypto::{CipherSuite, Secret};
use arbor_proto::{Extension, ExtensionList, ExternalSender, Proposal, Remove, Sender};
use common::{World, application_data, assert_agree};

/// INVARIANT: An external joiner and the existing members agree on the new
/// epoch, and the joiner can message them.
#[test]
fn external_join_via_group_info() {
    let world = World::new(20);
    let ctx = world.ctx();

    let alice = world.create_group(b"group1", "alice");
    let group_info = alice.export_group_info(&ctx, true).expect("group info export should succeed");

    let (bob, commit) = arbor_core::ClientState::join_group_external(
        &ctx,
        &group_info,
        world.identity("bob"),
        ExternalJoinOptions::default(),
    )
    .expect("external join should succeed");
    assert_eq!(bob.epoch(), 1);
    assert_eq!(bob.own_leaf(), LeafIndex(1));

    let (alice, processed) = world.deliver(&alice, &commit);
    let ProcessedMessage::Commit(summary) = processed else {
        panic!("expected a commit, got {processed:?}");
    };
    assert_eq!(summary.sender, Sender::NewMemberCommit);
    assert_eq!(summary.joined, Some(LeafIndex(1)));
    assert_agree(&[&alice, &bob]);

    let (_bob, message) = world.send(&bob, b"knock knock");
    let (_alice, processed) = world.deliver(&alice, &message);
    assert_eq!(application_data(&processed), b"knock knock");
}

/// INVARIANT: A group info without the tree needs the tree out of band.
#[test]
fn external_join_needs_a_tree() {
    let world = World::new(21);
    let ctx = world.ctx();

    let alice = world.create_group(b"group1", "alice");
    let group_info = alice.export_group_info(&ctx, false).expect("group info export should succeed");

    let result = arbor_core::ClientState::join_group_external(
        &ctx,
        &group_info,
        world.identity("bob"),
        ExternalJoinOptions::default(),
    );
    assert!(matches!(result, Err(MlsError::Validation(ValidationError::MissingRatchetTree))));

    let options =
        ExternalJoinOptions { ratchet_tree: Some(alice.tree().to_wire()), ..Default::default() };
    let (bob, commit) =
        arbor_core::ClientState::join_group_external(&ctx, &group_info, world.identity("bob"), options)
            .expect("external join with a supplied tree should succeed");
    let (alice, _) = world.deliver(&alice, &commit);
    assert_agree(&[&alice, &bob]);
}

/// INVARIANT: A resync replaces the member's old leaf in the same commit.
#[test]
fn external_resync_replaces_old_leaf() {
    let world = World::new(22);
    let ctx = world.ctx();

    let alice = world.create_group(b"group1", "alice");
    let (alice, mut joiners, _) =
        world.add_members(&alice, &[world.bundle("bob"), world.bundle("charlie")]);
    let charlie = joiners.remove(1);
    let bob = joiners.remove(0);

    // Bob lost his state and rejoins with the same identity
    let group_info = alice.export_group_info(&ctx, true).expect("group info export should succeed");
    let options = ExternalJoinOptions { resync: true, ..Default::default() };
    let (bob_again, commit) =
        arbor_core::ClientState::join_group_external(&ctx, &group_info, bob.identity().clone(), options)
            .expect("resync should succeed");

    let (alice, processed) = world.deliver(&alice, &commit);
    let ProcessedMessage::Commit(summary) = processed else {
        panic!("expected a commit, got {processed:?}");
    };
    assert_eq!(summary.removed, vec![LeafIndex(1)]);
    assert_eq!(summary.joined, Some(LeafIndex(1)));
    let (charlie, _) = world.deliver(&charlie, &commit);
    assert_agree(&[&alice, &bob_again, &charlie]);
    assert_eq!(alice.roster().len(), 3);
}

/// INVARIANT: A proposal signed by a configured external sender is cached
/// and committed like a member's.
#[test]
fn external_sender_proposal_is_committed() {
    let world = World::new(23);
    let ctx = world.ctx();
    let server = world.identity("server");

    let mut extensions = ExtensionList::new();
    extensions.set(Extension::ExternalSenders(vec![ExternalSender {
        signature_key: server.signature_key.clone(),
        credential: server.credential.clone(),
    }]));
    let alice =
        arbor_core::ClientState::create_group(&ctx, b"group1".to_vec(), world.identity("alice"), extensions)
            .expect("group creation should succeed");
    let (alice, mut joiners, _) =
        world.add_members(&alice, &[world.bundle("bob"), world.bundle("charlie")]);
    let bob = joiners.remove(0);

    let proposal = external_sender_proposal(
        &ctx,
        server.signer(),
        0,
        alice.group_id(),
        alice.epoch(),
        Proposal::Remove(Remove { removed: 2 }),
    )
    .expect("external proposal should be signed");

    let (alice, processed) = world.deliver(&alice, &proposal);
    assert!(matches!(processed, ProcessedMessage::Proposal { sender: Sender::External(0), .. }));
    let (bob, _) = world.deliver(&bob, &proposal);

    let (alice, output) = world.commit(&alice, CommitOptions::default()).expect("commit should succeed");
    let (bob, _) = world.deliver(&bob, &output.commit);
    assert_agree(&[&alice, &bob]);
    assert!(alice.member(LeafIndex(2)).is_none());

    // An unknown external sender index is rejected
    let proposal = external_sender_proposal(
        &ctx,
        server.signer(),
        3,
        alice.group_id(),
        alice.epoch(),
        Proposal::Remove(Remove { removed: 1 }),
    )
    .expect("external proposal should be signed");
    assert!(alice.process_message(&ctx, &proposal).is_err());
}

/// INVARIANT: A prospective member can ask to be added; the committed Add
/// produces a Welcome for it.
#[test]
fn new_member_proposal_is_committed() {
    let world = World::new(24);
    let ctx = world.ctx();

    let alice = world.create_group(b"group1", "alice");
    let charlie = world.bundle("charlie");
    let proposal = new_member_proposal(
        &ctx,
        charlie.identity.signer(),
        alice.group_id(),
        alice.epoch(),
        charlie.key_package.clone(),
    )
    .expect("new member proposal should be signed");

    let (alice, processed) = world.deliver(&alice, &proposal);
    assert!(matches!(processed, ProcessedMessage::Proposal { sender: Sender::NewMemberProposal, .. }));

    let (alice, output) = world.commit(&alice, CommitOptions::default()).expect("commit should succeed");
    let welcome = output.welcome.expect("committed Add produces a Welcome");
    let charlie = arbor_core::ClientState::join_group(&ctx, &welcome, &charlie, None)
        .expect("joining from the Welcome should succeed");
    assert_agree(&[&alice, &charlie]);
}

/// INVARIANT: A reinit suspends the old group; the successor carries the
/// reinit's parameters and is keyed by the old group's resumption secret.
#[test]
fn reinit_moves_members_to_successor() {
    let world = World::new(25);
    let ctx = world.ctx();

    let alice = world.create_group(b"group1", "alice");
    let (alice, mut joiners, _) = world.add_members(&alice, &[world.bundle("bob")]);
    let bob = joiners.remove(0);

    let (alice, output) = alice
        .reinit_group(&ctx, b"group2".to_vec(), CipherSuite::Curve25519Aes128, ExtensionList::new())
        .expect("reinit commit should succeed");
    assert_eq!(alice.status(), GroupStatus::SuspendedPendingReinit);

    let (bob, processed) = world.deliver(&bob, &output.commit);
    let ProcessedMessage::Commit(summary) = processed else {
        panic!("expected a commit, got {processed:?}");
    };
    assert!(summary.reinit.is_some());
    assert_eq!(bob.status(), GroupStatus::SuspendedPendingReinit);

    // INVARIANT: A suspended group sends nothing
    assert!(matches!(
        bob.create_application_message(&ctx, b"hello?", b""),
        Err(MlsError::Usage(UsageError::InvalidState { .. }))
    ));

    let bob_bundle = world.bundle_for(bob.identity().clone());
    let (alice_next, output) = alice
        .reinit_create_new_group(&ctx, alice.identity().clone(), vec![bob_bundle.key_package.clone()])
        .expect("successor group should be created");
    let welcome = output.welcome.expect("successor commit adds bob");

    let bob_next = bob
        .join_group_from_reinit(&ctx, &welcome, &bob_bundle, None)
        .expect("joining the successor should succeed");
    assert_eq!(bob_next.group_id(), b"group2");
    assert_eq!(bob_next.epoch(), 1);
    assert_eq!(bob_next.status(), GroupStatus::Active);
    assert_agree(&[&alice_next, &bob_next]);
}

/// INVARIANT: Only a suspended group can create its successor.
#[test]
fn reinit_requires_suspension() {
    let world = World::new(26);
    let ctx = world.ctx();
    let alice = world.create_group(b"group1", "alice");

    let result = alice.reinit_create_new_group(&ctx, alice.identity().clone(), Vec::new());
    assert!(matches!(result, Err(MlsError::Usage(UsageError::InvalidState { .. }))));
}

/// INVARIANT: A branch is joinable from the parent group, and only from it.
#[test]
fn branch_binds_parent_epoch() {
    let world = World::new(27);
    let ctx = world.ctx();

    let alice = world.create_group(b"group1", "alice");
    let (alice, mut joiners, _) =
        world.add_members(&alice, &[world.bundle("bob"), world.bundle("charlie")]);
    let bob = joiners.remove(0);

    let bob_bundle = world.bundle_for(bob.identity().clone());
    let (branch, output) = alice
        .branch_group(&ctx, b"side".to_vec(), vec![bob_bundle.key_package.clone()])
        .expect("branch should succeed");
    let welcome = output.welcome.expect("branch commit adds bob");
    assert_eq!(alice.status(), GroupStatus::Active, "the parent stays active");

    // Without the parent's resumption secret the Welcome cannot be opened
    let result = arbor_core::ClientState::join_group(&ctx, &welcome, &bob_bundle, None);
    assert!(matches!(result, Err(MlsError::Validation(ValidationError::PskUnavailable))));

    let bob_branch = bob
        .join_group_from_branch(&ctx, &welcome, &bob_bundle, None)
        .expect("joining the branch should succeed");
    assert_agree(&[&branch, &bob_branch]);
    assert_eq!(bob_branch.roster().len(), 2);
}

/// INVARIANT: A committed external PSK is mixed into the key schedule of
/// every member that holds it.
#[test]
fn external_psk_is_injected() {
    let world = World::new(28);
    let mut store = InMemoryPskStore::new();
    store.insert_external(b"shared".to_vec(), Secret::new(vec![42; 32]));
    let ctx = world.ctx().with_psks(&store);

    let alice = world.create_group(b"group1", "alice");
    let (alice, mut joiners, _) = world.add_members(&alice, &[world.bundle("bob")]);
    let bob = joiners.remove(0);

    let (alice, proposal) =
        alice.propose_external_psk(&ctx, b"shared".to_vec()).expect("psk proposal should succeed");
    let (bob, _) = bob.process_message(&ctx, &proposal).expect("proposal should be accepted");

    let (alice, output) = alice.create_commit(&ctx, CommitOptions::default()).expect("commit should succeed");

    // A member without the PSK cannot follow
    assert!(matches!(
        bob.process_message(&world.ctx(), &output.commit),
        Err(MlsError::Validation(ValidationError::PskUnavailable))
    ));

    let (bob, _) = bob.process_message(&ctx, &output.commit).expect("commit should be accepted");
    assert_agree(&[&alice, &bob]);
}
