//! Property-based tests for the byte-string codec and wire frames.
//!
//! Uses proptest to verify:
//! 1. Any byte sequence survives `encode` → `decode`.
//! 2. Encoded text has exactly one character per byte.
//! 3. Random text never panics `wire::decode` (returns `Err` gracefully).
//! 4. Any `cipher` frame survives a JSON text round trip.

use proptest::prelude::*;
use psst_proto::codec;
use psst_proto::wire::{self, WireMessage};

proptest! {
    #[test]
    fn codec_round_trips_any_bytes(bytes in prop::collection::vec(any::<u8>(), 0..4096)) {
        let text = codec::encode(&bytes);
        prop_assert_eq!(codec::decode(&text).unwrap(), bytes);
    }

    #[test]
    fn codec_is_one_char_per_byte(bytes in prop::collection::vec(any::<u8>(), 0..1024)) {
        prop_assert_eq!(codec::encode(&bytes).chars().count(), bytes.len());
    }

    #[test]
    fn wire_decode_never_panics(text in ".{0,256}") {
        let _ = wire::decode(&text);
    }

    #[test]
    fn cipher_frame_round_trips(bytes in prop::collection::vec(any::<u8>(), 0..2048)) {
        let text = wire::encode(&WireMessage::cipher(&bytes)).unwrap();
        let decoded = wire::decode(&text).unwrap();
        let WireMessage::Cipher { payload } = decoded else {
            return Err(TestCaseError::fail("expected cipher frame"));
        };
        prop_assert_eq!(codec::decode(&payload).unwrap(), bytes);
    }
}

#[test]
fn codec_handles_large_input() {
    let bytes: Vec<u8> = (0..=255u8).cycle().take(1 << 20).collect();
    assert_eq!(codec::decode(&codec::encode(&bytes)).unwrap(), bytes);
}
