//! Room identifiers.
//!
//! A [`RoomId`] is the short token two peers use to rendezvous at the relay.
//! The initiator generates one, shares it inside a link, and the joiner
//! presents the same token in its `join` frame.

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

/// Maximum length of a room identifier in characters.
pub const MAX_ROOM_ID_LEN: usize = 64;

/// Number of random bytes behind a generated room identifier (8 characters).
const GENERATED_ROOM_BYTES: usize = 6;

/// Reasons a room identifier is refused.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RoomIdError {
    /// The identifier is empty.
    #[error("room id is empty")]
    Empty,
    /// The identifier is longer than [`MAX_ROOM_ID_LEN`].
    #[error("room id too long ({len} chars, max {MAX_ROOM_ID_LEN})")]
    TooLong {
        /// Actual length in characters.
        len: usize,
    },
    /// The identifier contains a character outside `[A-Za-z0-9_-]`.
    #[error("room id contains invalid character {0:?}")]
    InvalidChar(char),
}

/// Opaque, URL-safe room token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Generate a fresh random room identifier from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; GENERATED_ROOM_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Validate and wrap a room identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RoomIdError`] if the identifier is empty, too long, or
    /// contains characters outside the URL-safe alphabet.
    pub fn parse(raw: &str) -> Result<Self, RoomIdError> {
        if raw.is_empty() {
            return Err(RoomIdError::Empty);
        }
        let len = raw.chars().count();
        if len > MAX_ROOM_ID_LEN {
            return Err(RoomIdError::TooLong { len });
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(RoomIdError::InvalidChar(bad));
        }
        Ok(Self(raw.to_string()))
    }

    /// Return the string form of this room identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomId {
    type Err = RoomIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RoomId {
    type Error = RoomIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}
