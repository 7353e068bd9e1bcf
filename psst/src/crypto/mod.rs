//! End-to-end encryption for `Psst`.
//!
//! Text is sealed for the partner with RSA-OAEP/SHA-256 under the partner's
//! public key and opened with this session's private key. [`seal`] and
//! [`open`] are the **only** places plaintext is handled; everything handed
//! to the transport has already been sealed.
//!
//! Sealing percent-encodes the text first (the same character set
//! `encodeURI` escapes), splits the encoded text into blocks of at most
//! [`keys::MAX_PLAINTEXT_BLOCK`] bytes, and concatenates the fixed-size
//! ciphertext blocks. Opening reverses each step.

pub mod agent;
pub mod keys;

use percent_encoding::{AsciiSet, CONTROLS, percent_decode, utf8_percent_encode};
use rand_core::{OsRng, RngCore};
use zeroize::Zeroizing;

use keys::{CIPHERTEXT_BLOCK, Keypair, MAX_PLAINTEXT_BLOCK, PeerKey};

/// Characters escaped before encryption, matching `encodeURI`.
const URI_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CryptoError {
    /// The platform cannot provide the primitives encryption needs.
    #[error("cryptography unavailable: {0}")]
    Unavailable(String),

    /// Keypair generation failed.
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// A received public key could not be imported.
    #[error("invalid public key: {0}")]
    InvalidKey(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed (ciphertext not produced for this key, or corrupted).
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// The blocking task running a crypto operation panicked or was cancelled.
    #[error("crypto worker failed: {0}")]
    WorkerFailed(String),
}

/// Check, once at startup, whether encryption can work on this platform.
///
/// Key generation and OAEP padding both draw from the OS RNG; without it
/// the client must fall back to a crypto-disabled mode.
#[must_use]
pub fn has_crypto_support() -> bool {
    let mut probe = [0u8; 16];
    match OsRng.try_fill_bytes(&mut probe) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "OS random number generator unavailable");
            false
        }
    }
}

/// Seal text for the partner.
///
/// # Errors
///
/// Returns [`CryptoError::EncryptionFailed`] if any block fails to encrypt.
pub fn seal(peer: &PeerKey, plaintext: &str) -> Result<Vec<u8>, CryptoError> {
    let encoded = Zeroizing::new(utf8_percent_encode(plaintext, URI_ENCODE_SET).to_string());
    let bytes = encoded.as_bytes();

    if bytes.is_empty() {
        return peer.encrypt_block(&[]);
    }

    let mut sealed =
        Vec::with_capacity(bytes.len().div_ceil(MAX_PLAINTEXT_BLOCK) * CIPHERTEXT_BLOCK);
    for chunk in bytes.chunks(MAX_PLAINTEXT_BLOCK) {
        sealed.extend_from_slice(&peer.encrypt_block(chunk)?);
    }
    Ok(sealed)
}

/// Open ciphertext sealed for this keypair.
///
/// # Errors
///
/// Returns [`CryptoError::DecryptionFailed`] if the ciphertext is not a
/// whole number of blocks, a block does not decrypt under this key, or the
/// recovered text is not valid percent-encoded UTF-8.
pub fn open(keypair: &Keypair, ciphertext: &[u8]) -> Result<String, CryptoError> {
    if ciphertext.is_empty() || ciphertext.len() % CIPHERTEXT_BLOCK != 0 {
        return Err(CryptoError::DecryptionFailed(format!(
            "ciphertext length {} is not a multiple of {CIPHERTEXT_BLOCK}",
            ciphertext.len()
        )));
    }

    let mut encoded = Zeroizing::new(Vec::with_capacity(
        ciphertext.len() / CIPHERTEXT_BLOCK * MAX_PLAINTEXT_BLOCK,
    ));
    for block in ciphertext.chunks(CIPHERTEXT_BLOCK) {
        encoded.extend_from_slice(&keypair.decrypt_block(block)?);
    }

    percent_decode(&encoded)
        .decode_utf8()
        .map(std::borrow::Cow::into_owned)
        .map_err(|e| CryptoError::DecryptionFailed(format!("plaintext is not UTF-8: {e}")))
}

/// One keypair shared by every unit test; 2048-bit generation is slow.
#[cfg(test)]
pub(crate) fn test_keypair() -> Keypair {
    use std::sync::LazyLock;

    static KEYPAIR: LazyLock<Keypair> =
        LazyLock::new(|| Keypair::generate().unwrap());
    KEYPAIR.clone()
}

/// A second shared keypair, for tests that need two distinct parties.
#[cfg(test)]
pub(crate) fn other_test_keypair() -> Keypair {
    use std::sync::LazyLock;

    static KEYPAIR: LazyLock<Keypair> =
        LazyLock::new(|| Keypair::generate().unwrap());
    KEYPAIR.clone()
}
