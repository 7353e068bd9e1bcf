//! Byte-string transport encoding for the `Psst` wire format.
//!
//! Ciphertext is raw bytes, but frames are JSON text. The byte-string codec
//! maps every byte `0..=255` to the Unicode scalar with the same value, so a
//! ciphertext survives a trip through a JSON string unchanged. This is a
//! one-byte-per-character mapping, not a UTF-8 transform: text that contains
//! multi-byte characters must be percent-encoded before it is treated as
//! bytes.

/// Error type for byte-string decoding.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    /// The text contains a character outside the single-byte range.
    #[error("character {ch:?} at index {index} is not a single byte")]
    OutOfRange {
        /// The offending character.
        ch: char,
        /// Character index within the input.
        index: usize,
    },
}

/// Encodes bytes as a byte-string, one character per byte.
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    bytes.iter().copied().map(char::from).collect()
}

/// Decodes a byte-string produced by [`encode`] back into bytes.
///
/// # Errors
///
/// Returns [`CodecError::OutOfRange`] if any character is above `U+00FF`.
pub fn decode(text: &str) -> Result<Vec<u8>, CodecError> {
    text.chars()
        .enumerate()
        .map(|(index, ch)| u8::try_from(ch).map_err(|_| CodecError::OutOfRange { ch, index }))
        .collect()
}
