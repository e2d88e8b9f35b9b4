//! Tests for application message delivery.
//!
//! These tests verify critical invariants:
//! - Messages decrypt regardless of arrival order within the tolerance
//! - A message key is usable exactly once
//! - Keys of dropped epochs are gone (forward secrecy)
//! - Application data is never accepted unencrypted

mod common;

use arbor_core::{ClientConfig, ClientState, CommitOptions, LeafIndex, MlsError, ValidationError};
use arbor_proto::{
    Content, FramedContent, FramedContentAuthData, MlsMessage, MlsMessageBody, PublicMessage,
    Sender,
};
use common::{World, application_data};

fn pair(world: &World) -> (ClientState, ClientState) {
    let alice = world.create_group(b"group1", "alice");
    let (alice, mut joiners, _) = world.add_members(&alice, &[world.bundle("bob")]);
    (alice, joiners.remove(0))
}

fn burst(world: &World, mut sender: ClientState, count: usize) -> (ClientState, Vec<MlsMessage>) {
    let mut messages = Vec::with_capacity(count);
    for i in 0..count {
        let (next, message) = world.send(&sender, format!("message {i}").as_bytes());
        sender = next;
        messages.push(message);
    }
    (sender, messages)
}

/// INVARIANT: Reordered delivery yields exactly the plaintexts that in-order
/// delivery yields.
#[test]
fn out_of_order_delivery() {
    let world = World::new(10);
    let (alice, bob) = pair(&world);
    let (_alice, messages) = burst(&world, alice, 10);

    let mut in_order = bob.clone();
    for (i, message) in messages.iter().enumerate() {
        let (next, processed) = world.deliver(&in_order, message);
        assert_eq!(application_data(&processed), format!("message {i}").as_bytes());
        in_order = next;
    }

    let mut reversed = bob;
    for (i, message) in messages.iter().enumerate().rev() {
        let (next, processed) = world.deliver(&reversed, message);
        assert_eq!(
            application_data(&processed),
            format!("message {i}").as_bytes(),
            "message {i} should decrypt out of order"
        );
        reversed = next;
    }
}

/// INVARIANT: A replayed message and a message older than the skipped-key
/// window both fail as too old.
#[test]
fn message_keys_are_single_use() {
    let config = ClientConfig { out_of_order_tolerance: 2, ..ClientConfig::default() };
    let world = World::with_config(11, config);
    let (alice, bob) = pair(&world);
    let (_alice, messages) = burst(&world, alice, 10);

    let (bob, _) = world.deliver(&bob, &messages[9]);

    let replay = bob.process_message(&world.ctx(), &messages[9]);
    assert!(matches!(
        replay,
        Err(MlsError::Validation(ValidationError::GenerationTooOld { generation: 9 }))
    ));

    let evicted = bob.process_message(&world.ctx(), &messages[0]);
    assert!(matches!(
        evicted,
        Err(MlsError::Validation(ValidationError::GenerationTooOld { generation: 0 }))
    ));

    // Generations within the tolerance are still cached
    let (_bob, processed) = world.deliver(&bob, &messages[8]);
    assert_eq!(application_data(&processed), b"message 8");
}

/// INVARIANT: A receiver refuses to ratchet further ahead than configured.
#[test]
fn forward_ratchet_is_bounded() {
    let config = ClientConfig { max_forward_ratchet: 5, ..ClientConfig::default() };
    let world = World::with_config(12, config);
    let (alice, bob) = pair(&world);
    let (_alice, messages) = burst(&world, alice, 8);

    let result = bob.process_message(&world.ctx(), &messages[7]);
    assert!(matches!(
        result,
        Err(MlsError::Validation(ValidationError::GenerationTooFarAhead { generation: 7, current: 0 }))
    ));
    let (_bob, processed) = world.deliver(&bob, &messages[5]);
    assert_eq!(application_data(&processed), b"message 5");
}

/// INVARIANT: Application messages from retained epochs still decrypt after
/// a commit; once the epoch is dropped they cannot.
#[test]
fn past_epoch_application_messages() {
    let world = World::new(13);
    let (alice, bob) = pair(&world);
    let (alice, late) = world.send(&alice, b"sent in epoch 1");

    let (bob, output) = world.commit(&bob, CommitOptions::default()).expect("commit should succeed");
    let (_alice, _) = world.deliver(&alice, &output.commit);
    assert_eq!(bob.epoch(), 2);

    let (bob, processed) = world.deliver(&bob, &late);
    assert_eq!(application_data(&processed), b"sent in epoch 1");
    assert!(matches!(
        processed,
        arbor_core::ProcessedMessage::Application { epoch: 1, sender: LeafIndex(0), .. }
    ));

    // Retained material is consumed like current-epoch keys
    let replay = bob.process_message(&world.ctx(), &late);
    assert!(matches!(
        replay,
        Err(MlsError::Validation(ValidationError::GenerationTooOld { generation: 0 }))
    ));
}

/// INVARIANT: With no retained epochs, a commit deletes every key of the
/// previous epoch.
#[test]
fn dropped_epochs_cannot_decrypt() {
    let config = ClientConfig { max_past_epochs: 0, ..ClientConfig::default() };
    let world = World::with_config(14, config);
    let (alice, bob) = pair(&world);
    let (alice, late) = world.send(&alice, b"sent in epoch 1");

    let (bob, output) = world.commit(&bob, CommitOptions::default()).expect("commit should succeed");
    let (_alice, _) = world.deliver(&alice, &output.commit);

    let result = bob.process_message(&world.ctx(), &late);
    assert!(matches!(result, Err(MlsError::Validation(ValidationError::EpochNotRetained(1)))));
}

/// INVARIANT: Handshake messages are accepted only in their own epoch.
#[test]
fn handshake_epoch_checks() {
    let world = World::new(15);
    let alice = world.create_group(b"group1", "alice");
    let (alice, mut joiners, _) =
        world.add_members(&alice, &[world.bundle("bob"), world.bundle("charlie")]);
    let charlie = joiners.remove(1);
    let bob = joiners.remove(0);

    let (alice, first) = world.commit(&alice, CommitOptions::default()).expect("commit should succeed");
    let (_alice, second) = world.commit(&alice, CommitOptions::default()).expect("commit should succeed");

    // Bob skipped the first commit
    let result = bob.process_message(&world.ctx(), &second.commit);
    assert!(matches!(
        result,
        Err(MlsError::Validation(ValidationError::WrongEpoch { expected: 1, actual: 2 }))
    ));

    // Charlie saw both and then the first one again
    let (charlie, _) = world.deliver(&charlie, &first.commit);
    let (charlie, _) = world.deliver(&charlie, &second.commit);
    let result = charlie.process_message(&world.ctx(), &first.commit);
    assert!(matches!(result, Err(MlsError::Validation(ValidationError::HandshakeFromPastEpoch))));
}

/// INVARIANT: A member never processes its own handshake message.
#[test]
fn own_commit_is_rejected() {
    let world = World::new(16);
    let (alice, _bob) = pair(&world);

    let (_next, output) = world.commit(&alice, CommitOptions::default()).expect("commit should succeed");
    let result = alice.process_message(&world.ctx(), &output.commit);
    assert!(matches!(result, Err(MlsError::Validation(ValidationError::OwnMessage))));
}

/// INVARIANT: Application data in a `PublicMessage` is rejected before any
/// other processing.
#[test]
fn unencrypted_application_message_is_rejected() {
    let world = World::new(17);
    let (_alice, bob) = pair(&world);

    let forged = MlsMessage::new(MlsMessageBody::PublicMessage(PublicMessage {
        content: FramedContent {
            group_id: bob.group_id().to_vec(),
            epoch: bob.epoch(),
            sender: Sender::Member(0),
            authenticated_data: Vec::new(),
            content: Content::Application(b"in the clear".to_vec()),
        },
        auth: FramedContentAuthData { signature: vec![0; 64], confirmation_tag: None },
        membership_tag: Some(vec![0; 32]),
    }));
    let result = bob.process_message(&world.ctx(), &forged);
    assert!(matches!(
        result,
        Err(MlsError::Validation(ValidationError::UnencryptedApplicationMessage))
    ));
}

/// INVARIANT: Padding changes the ciphertext length, never the plaintext.
#[test]
fn padded_messages_round_trip() {
    let config = ClientConfig { padding_block: 64, ..ClientConfig::default() };
    let world = World::with_config(18, config);
    let (alice, bob) = pair(&world);

    let (alice, short) = world.send(&alice, b"x");
    let (_alice, longer) = world.send(&alice, &[7; 40]);
    let MlsMessageBody::PrivateMessage(short_body) = &short.body else {
        panic!("application messages are private");
    };
    let MlsMessageBody::PrivateMessage(longer_body) = &longer.body else {
        panic!("application messages are private");
    };
    assert_eq!(
        short_body.ciphertext.as_slice().len(),
        longer_body.ciphertext.as_slice().len(),
        "both fit one padding block"
    );

    let (bob, processed) = world.deliver(&bob, &short);
    assert_eq!(application_data(&processed), b"x");
    let (_bob, processed) = world.deliver(&bob, &longer);
    assert_eq!(application_data(&processed), &[7; 40]);
}

/// INVARIANT: A message for another group is rejected.
#[test]
fn foreign_group_message_is_rejected() {
    let world = World::new(19);
    let (alice, _bob) = pair(&world);
    let other = world.create_group(b"group2", "mallory");

    let (_alice, message) = world.send(&alice, b"hello");
    let result = other.process_message(&world.ctx(), &message);
    assert!(matches!(result, Err(MlsError::Validation(ValidationError::WrongGroup))));
}
