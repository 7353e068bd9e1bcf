//! Wire frames exchanged between `Psst` clients and the relay.
//!
//! Every frame is one WebSocket text frame. Tagged frames are JSON objects
//! with a `type` discriminator; the dead-peer sentinel is the bare JSON string
//! `"DEAD"`. After a connection has joined a room the relay forwards frames
//! verbatim, so only the client ever decodes `key` and `cipher` frames.

use serde::{Deserialize, Serialize};

use crate::codec;

/// The literal frame the relay sends when a forward to the peer failed.
pub const DEAD_SENTINEL: &str = "\"DEAD\"";

/// JWK key type for RSA keys.
pub const JWK_KTY_RSA: &str = "RSA";

/// JWK algorithm name for RSA-OAEP with SHA-256.
pub const JWK_ALG_RSA_OAEP_256: &str = "RSA-OAEP-256";

/// Errors produced while decoding or encoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The frame is not valid JSON or has an unknown tag.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Exported public key, in JSON Web Key form.
///
/// Only public parameters exist on this type, so a serialized blob can never
/// carry private key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyBlob {
    /// Key type, always `"RSA"` for keys this crate produces.
    pub kty: String,
    /// Algorithm, `"RSA-OAEP-256"`.
    pub alg: String,
    /// Modulus, base64url without padding.
    pub n: String,
    /// Public exponent, base64url without padding.
    pub e: String,
    /// Whether the key is extractable.
    #[serde(default = "default_ext")]
    pub ext: bool,
    /// Permitted operations.
    #[serde(default)]
    pub key_ops: Vec<String>,
}

const fn default_ext() -> bool {
    true
}

/// Why the relay refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The room already holds two connections.
    RoomFull,
    /// The room id is malformed, or the room has already been used.
    InvalidRoom,
    /// The relay has reached its room limit.
    ServerFull,
    /// The frame exceeds the relay's size limit.
    FrameTooLarge,
    /// Too many frames are held for a peer that has not joined yet.
    PendingFull,
    /// The first frame on a connection was not `join`.
    ProtocolViolation,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RoomFull => "room is full",
            Self::InvalidRoom => "invalid room",
            Self::ServerFull => "relay is full",
            Self::FrameTooLarge => "frame too large",
            Self::PendingFull => "too many frames held for absent peer",
            Self::ProtocolViolation => "protocol violation",
        };
        f.write_str(s)
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Client asks the relay to attach this connection to a room.
    Join {
        /// Room identifier (validated by the relay).
        room: String,
    },
    /// Relay confirms the join; the channel is ready.
    Joined {
        /// The room that was joined.
        room: String,
    },
    /// Handshake: a peer publishes its exported public key.
    Key {
        /// The exported public key.
        key: PublicKeyBlob,
    },
    /// The sender is composing a message. Carries no content.
    Typing,
    /// Opaque ciphertext, byte-string encoded.
    Cipher {
        /// Ciphertext encoded with [`codec::encode`].
        payload: String,
    },
    /// Relay refuses a request.
    Error {
        /// Why the request was refused.
        reason: RejectReason,
    },
    /// The relay could not forward the previous frame to the peer.
    #[serde(skip)]
    DeadPeer,
}

impl WireMessage {
    /// Build a `cipher` frame from raw ciphertext bytes.
    #[must_use]
    pub fn cipher(ciphertext: &[u8]) -> Self {
        Self::Cipher {
            payload: codec::encode(ciphertext),
        }
    }

    /// Short tag name, for logging.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Joined { .. } => "joined",
            Self::Key { .. } => "key",
            Self::Typing => "typing",
            Self::Cipher { .. } => "cipher",
            Self::Error { .. } => "error",
            Self::DeadPeer => "DEAD",
        }
    }
}

/// Encode a frame as JSON text.
///
/// # Errors
///
/// Returns [`WireError::Malformed`] if JSON serialization fails.
pub fn encode(msg: &WireMessage) -> Result<String, WireError> {
    match msg {
        WireMessage::DeadPeer => Ok(DEAD_SENTINEL.to_string()),
        other => Ok(serde_json::to_string(other)?),
    }
}

/// Decode one text frame.
///
/// # Errors
///
/// Returns [`WireError::Malformed`] if the text is neither the dead-peer
/// sentinel nor a known tagged record.
pub fn decode(text: &str) -> Result<WireMessage, WireError> {
    if text.trim() == DEAD_SENTINEL {
        return Ok(WireMessage::DeadPeer);
    }
    Ok(serde_json::from_str(text)?)
}

/// Outer tag of a frame, ignoring every other field.
#[derive(Deserialize)]
struct TagOnly<'a> {
    #[serde(rename = "type", borrow)]
    kind: std::borrow::Cow<'a, str>,
}

/// Whether a joined connection is barred from sending `text` to its peer.
///
/// `join`, `joined`, `error` and the dead-peer sentinel only ever come from
/// the relay. Only the outer tag is read; other fields are never interpreted.
#[must_use]
pub fn is_reserved(text: &str) -> bool {
    if text.trim() == DEAD_SENTINEL {
        return true;
    }
    serde_json::from_str::<TagOnly<'_>>(text)
        .is_ok_and(|t| matches!(t.kind.as_ref(), "join" | "joined" | "error"))
}
