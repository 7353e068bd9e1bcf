//! Property-based tests for sealing text with RSA-OAEP.
//!
//! Uses proptest to verify:
//! 1. Any text survives export → import → seal → open.
//! 2. Sealed output is always a whole number of 256-byte blocks.
//! 3. Arbitrary bytes never panic `open` (returns `Err` gracefully).
//!
//! A single keypair is shared across cases; generating 2048-bit keys per
//! case would dominate the run time.

use std::sync::LazyLock;

use proptest::prelude::*;
use psst::crypto::keys::{CIPHERTEXT_BLOCK, Keypair, MAX_PLAINTEXT_BLOCK, PeerKey};
use psst::crypto::{open, seal};

static KEYPAIR: LazyLock<Keypair> =
    LazyLock::new(|| Keypair::generate().expect("generate test keypair"));

fn imported_peer() -> PeerKey {
    PeerKey::import(&KEYPAIR.export_public()).expect("import own public key")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn seal_open_round_trips_any_text(text in any::<String>()) {
        let sealed = seal(&imported_peer(), &text).unwrap();
        prop_assert_eq!(open(&KEYPAIR, &sealed).unwrap(), text);
    }

    #[test]
    fn sealed_length_is_whole_blocks(text in "\\PC{0,600}") {
        let sealed = seal(&imported_peer(), &text).unwrap();
        prop_assert!(!sealed.is_empty());
        prop_assert_eq!(sealed.len() % CIPHERTEXT_BLOCK, 0);
    }

    #[test]
    fn open_never_panics_on_junk(bytes in prop::collection::vec(any::<u8>(), 0..1024)) {
        let _ = open(&KEYPAIR, &bytes);
    }
}

#[test]
fn text_at_block_boundaries_round_trips() {
    let peer = imported_peer();
    for len in [
        MAX_PLAINTEXT_BLOCK - 1,
        MAX_PLAINTEXT_BLOCK,
        MAX_PLAINTEXT_BLOCK + 1,
        3 * MAX_PLAINTEXT_BLOCK,
    ] {
        let text = "x".repeat(len);
        let sealed = seal(&peer, &text).unwrap();
        assert_eq!(sealed.len(), len.div_ceil(MAX_PLAINTEXT_BLOCK) * CIPHERTEXT_BLOCK);
        assert_eq!(open(&KEYPAIR, &sealed).unwrap(), text);
    }
}

#[test]
fn escaped_characters_count_against_the_block_limit() {
    // Each space percent-encodes to three bytes.
    let text = " ".repeat(MAX_PLAINTEXT_BLOCK);
    let sealed = seal(&imported_peer(), &text).unwrap();
    assert_eq!(sealed.len(), 3 * CIPHERTEXT_BLOCK);
    assert_eq!(open(&KEYPAIR, &sealed).unwrap(), text);
}
