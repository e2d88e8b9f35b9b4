//! Fuzz target for `MlsMessage` decoding
//!
//! Arbitrary bytes are decoded as a top-level MLS message.
//!
//! # Invariants
//!
//! - Decoding never panics; malformed input is an error
//! - Anything that decodes re-encodes to the exact input bytes

#![no_main]

use arbor_proto::{MlsMessage, codec};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(message) = codec::decode::<MlsMessage>(data) else {
        return;
    };
    let encoded = codec::encode(&message).expect("decoded message must re-encode");
    assert_eq!(encoded, data, "encoding must be canonical");
});
