//! Fuzz target for secret tree ratchets
//!
//! A sender and a receiver share one encryption secret. The sender produces
//! keys in order; the receiver consumes them in a fuzzer-chosen order.
//!
//! # Invariants
//!
//! - Receiver keys equal sender keys for every accepted generation
//! - A consumed generation is never handed out twice
//! - Out-of-range leaves and generations fail without panicking

#![no_main]

use std::collections::BTreeSet;

use arbitrary::Arbitrary;
use arbor_core::{
    LeafIndex,
    secret_tree::{RatchetType, RatchetWindow, SecretTree},
};
use arbor_crypto::{CipherSuite, RustCryptoProvider, Secret};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    secret: [u8; 32],
    leaf_count: u8,
    sends: u8,
    receives: Vec<Receive>,
}

#[derive(Debug, Clone, Arbitrary)]
struct Receive {
    leaf: u8,
    generation: u16,
    handshake: bool,
}

const WINDOW: RatchetWindow = RatchetWindow { max_forward: 64, tolerance: 8 };

fuzz_target!(|scenario: Scenario| {
    let Ok(crypto) = RustCryptoProvider::new(CipherSuite::Curve25519Aes128) else {
        return;
    };
    let leaf_count = u32::from(scenario.leaf_count.max(1)).next_power_of_two();
    let secret = Secret::new(scenario.secret.to_vec());
    let mut sender = SecretTree::new(secret.clone(), leaf_count);
    let mut receiver = SecretTree::new(secret, leaf_count);

    let mut sent = Vec::new();
    for _ in 0..scenario.sends.min(32) {
        let step = sender
            .next_key(&crypto, LeafIndex(0), RatchetType::Application)
            .expect("leaf 0 always exists");
        sent.push(step.key);
    }

    let mut consumed = BTreeSet::new();
    for receive in scenario.receives.iter().take(64) {
        let leaf = LeafIndex(u32::from(receive.leaf));
        let ratchet_type =
            if receive.handshake { RatchetType::Handshake } else { RatchetType::Application };
        let generation = u32::from(receive.generation);
        let result = receiver.key_for_generation(&crypto, WINDOW, leaf, ratchet_type, generation);

        if leaf.0 >= leaf_count {
            assert!(result.is_err(), "leaf outside the tree must be rejected");
            continue;
        }
        let Ok(key) = result else { continue };
        assert_eq!(key.generation, generation);
        assert!(
            consumed.insert((leaf.0, receive.handshake, generation)),
            "generation {generation} handed out twice"
        );
        if leaf.0 == 0 && !receive.handshake {
            if let Some(expected) = sent.get(generation as usize) {
                assert_eq!(&key.key, &expected.key, "receiver and sender disagree");
                assert_eq!(&key.nonce, &expected.nonce, "receiver and sender disagree");
            }
        }
    }
});
