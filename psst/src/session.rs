//! Client-side chat session.
//!
//! [`ChatSession`] owns one keypair, at most one partner key and one
//! [`Channel`], and walks them through
//! `Idle → KeyGenerating → AwaitingConnection → Connected(NoPeerKey) →
//! Connected(PeerKeyKnown) → Closed`.
//!
//! The session is driven through `&mut self`, so no two state changes ever
//! overlap. A driver loop typically selects between user input and
//! [`ChatSession::recv`] (cancel-safe), then feeds whatever arrived to
//! [`ChatSession::handle`]:
//!
//! ```rust,no_run
//! # use psst::session::ChatSession;
//! # use psst::transport::loopback::LoopbackChannel;
//! # async fn drive(mut session: ChatSession<LoopbackChannel>) {
//! while let Some(event) = session.next_event().await {
//!     println!("{event:?}");
//! }
//! # }
//! ```

use std::fmt;

use psst_proto::codec;
use psst_proto::wire::{RejectReason, WireMessage};

use crate::crypto::CryptoError;
use crate::crypto::agent::KeyAgent;
use crate::crypto::keys::PeerKey;
use crate::transport::{Channel, TransportError};

/// Progress of the key handshake on an open channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// Own key published, partner key not yet received.
    NoPeerKey,
    /// Partner key imported; messages can be sent.
    PeerKeyKnown,
}

/// Lifecycle state of a [`ChatSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing has happened yet.
    Idle,
    /// The keypair is being generated.
    KeyGenerating,
    /// Keypair ready, waiting for a channel.
    AwaitingConnection,
    /// Channel open.
    Connected(Handshake),
    /// Terminal. See [`ChatSession::close_reason`].
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::KeyGenerating => write!(f, "generating keys"),
            Self::AwaitingConnection => write!(f, "awaiting connection"),
            Self::Connected(Handshake::NoPeerKey) => write!(f, "waiting for partner"),
            Self::Connected(Handshake::PeerKeyKnown) => write!(f, "secure"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Why a session closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The platform cannot encrypt; no protocol activity took place.
    CryptoUnavailable,
    /// The channel closed or failed.
    ConnectionLost,
    /// The relay reported that the partner is gone.
    DeadPeer,
    /// The local user left.
    Left,
    /// The relay refused the session.
    Rejected(RejectReason),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CryptoUnavailable => write!(f, "encryption is not available"),
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::DeadPeer => write!(f, "partner disconnected"),
            Self::Left => write!(f, "left the room"),
            Self::Rejected(reason) => write!(f, "rejected by relay: {reason}"),
        }
    }
}

/// Something the user should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The partner's key was imported; the channel is now end-to-end secure.
    HandshakeComplete {
        /// Fingerprint of the partner's public key.
        fingerprint: String,
    },
    /// A decrypted message from the partner.
    Message {
        /// Plaintext.
        text: String,
    },
    /// The partner is composing a message.
    Typing,
    /// A `cipher` frame arrived that this keypair could not open.
    Undecryptable,
    /// The partner's `key` frame could not be imported.
    KeyRejected {
        /// What was wrong with it.
        error: CryptoError,
    },
    /// The relay refused a frame; the session stays open.
    Rejected(RejectReason),
    /// The session closed.
    Closed(CloseReason),
}

/// Errors returned by [`ChatSession`] operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The partner's key is not known yet; retry after the handshake.
    #[error("secure channel not established yet")]
    NotReady,

    /// The session is closed.
    #[error("session is closed")]
    Closed,

    /// The operation is not valid in the current state.
    #[error("invalid in state {0}")]
    InvalidState(SessionState),

    /// A crypto operation failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The channel failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// One end of a two-party encrypted conversation.
pub struct ChatSession<C: Channel> {
    state: SessionState,
    agent: Option<KeyAgent>,
    peer: Option<PeerKey>,
    channel: Option<C>,
    close_reason: Option<CloseReason>,
}

impl<C: Channel> Default for ChatSession<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Channel> ChatSession<C> {
    /// A fresh session in [`SessionState::Idle`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: SessionState::Idle,
            agent: None,
            peer: None,
            channel: None,
            close_reason: None,
        }
    }

    /// A session whose keypair already exists, in
    /// [`SessionState::AwaitingConnection`].
    #[must_use]
    pub const fn with_agent(agent: KeyAgent) -> Self {
        Self {
            state: SessionState::AwaitingConnection,
            agent: Some(agent),
            peer: None,
            channel: None,
            close_reason: None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Why the session closed, once it has.
    #[must_use]
    pub const fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    /// Fingerprint of this session's own public key.
    #[must_use]
    pub fn local_fingerprint(&self) -> Option<String> {
        self.agent.as_ref().map(KeyAgent::fingerprint)
    }

    /// Fingerprint of the partner's public key, once known.
    #[must_use]
    pub fn peer_fingerprint(&self) -> Option<String> {
        self.peer.as_ref().map(PeerKey::fingerprint)
    }

    /// Generate this session's keypair.
    ///
    /// `crypto_supported` is the startup capability check
    /// ([`has_crypto_support`](crate::crypto::has_crypto_support)). Without
    /// it the session closes with [`CloseReason::CryptoUnavailable`].
    /// Other generation failures return the session to `Idle` so the caller
    /// may retry.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidState`] unless the session is `Idle`.
    /// - [`SessionError::Crypto`] if generation fails.
    pub async fn generate_keys(&mut self, crypto_supported: bool) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::InvalidState(self.state));
        }
        if !crypto_supported {
            self.close(CloseReason::CryptoUnavailable).await;
            return Err(CryptoError::Unavailable("no secure random source".to_string()).into());
        }

        self.state = SessionState::KeyGenerating;
        match KeyAgent::generate().await {
            Ok(agent) => {
                tracing::info!(fingerprint = %agent.fingerprint(), "session keypair ready");
                self.agent = Some(agent);
                self.state = SessionState::AwaitingConnection;
                Ok(())
            }
            Err(CryptoError::Unavailable(msg)) => {
                tracing::error!(error = %msg, "cryptography unavailable");
                self.close(CloseReason::CryptoUnavailable).await;
                Err(CryptoError::Unavailable(msg).into())
            }
            Err(e) => {
                tracing::warn!(error = %e, "key generation failed");
                self.state = SessionState::Idle;
                Err(e.into())
            }
        }
    }

    /// Attach an open channel and publish this session's public key on it.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidState`] unless the session is
    ///   `AwaitingConnection`.
    /// - [`SessionError::Transport`] if the key frame cannot be sent; the
    ///   session is then closed with [`CloseReason::ConnectionLost`].
    pub async fn attach(&mut self, channel: C) -> Result<(), SessionError> {
        let Some(agent) = self.agent.as_ref() else {
            return Err(SessionError::InvalidState(self.state));
        };
        if self.state != SessionState::AwaitingConnection {
            return Err(SessionError::InvalidState(self.state));
        }

        let key = WireMessage::Key {
            key: agent.export_public_key(),
        };
        let channel = self.channel.insert(channel);
        if let Err(e) = channel.send(&key).await {
            tracing::warn!(error = %e, "failed to publish public key");
            self.close(CloseReason::ConnectionLost).await;
            return Err(e.into());
        }

        tracing::debug!("public key published");
        self.state = SessionState::Connected(Handshake::NoPeerKey);
        Ok(())
    }

    /// Encrypt `text` for the partner and send it.
    ///
    /// Messages are sent in call order: each call finishes encrypting and
    /// writing before it returns.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotReady`] before the partner's key is known.
    /// - [`SessionError::Closed`] once the session has closed.
    /// - [`SessionError::Crypto`] if encryption fails.
    /// - [`SessionError::Transport`] if the channel fails; the session is
    ///   then closed with [`CloseReason::ConnectionLost`].
    pub async fn send_text(&mut self, text: &str) -> Result<(), SessionError> {
        match self.state {
            SessionState::Closed => return Err(SessionError::Closed),
            SessionState::Connected(Handshake::PeerKeyKnown) => {}
            _ => return Err(SessionError::NotReady),
        }
        let (Some(agent), Some(peer), Some(channel)) =
            (self.agent.as_ref(), self.peer.as_ref(), self.channel.as_mut())
        else {
            return Err(SessionError::NotReady);
        };

        let sealed = agent.encrypt(peer, text).await.inspect_err(|e| {
            tracing::warn!(error = %e, "encryption failed");
        })?;
        let frame = WireMessage::cipher(&sealed);

        if let Err(e) = channel.send(&frame).await {
            self.close(CloseReason::ConnectionLost).await;
            return Err(e.into());
        }
        tracing::debug!(len = sealed.len(), "message sent");
        Ok(())
    }

    /// Tell the partner that a message is being composed.
    ///
    /// The notice carries no content and is not encrypted.
    ///
    /// # Errors
    ///
    /// Same conditions as [`send_text`](Self::send_text), minus encryption.
    pub async fn send_typing(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Closed => return Err(SessionError::Closed),
            SessionState::Connected(Handshake::PeerKeyKnown) => {}
            _ => return Err(SessionError::NotReady),
        }
        let Some(channel) = self.channel.as_mut() else {
            return Err(SessionError::NotReady);
        };
        if let Err(e) = channel.send(&WireMessage::Typing).await {
            self.close(CloseReason::ConnectionLost).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Wait for the next inbound frame.
    ///
    /// Cancel-safe. Pass the result to [`handle`](Self::handle).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if there is no open
    /// channel, or whatever the channel reports.
    pub async fn recv(&mut self) -> Result<WireMessage, TransportError> {
        match self.channel.as_mut() {
            Some(channel) if self.state != SessionState::Closed => channel.recv().await,
            _ => Err(TransportError::ConnectionClosed),
        }
    }

    /// Apply one inbound frame, or the channel failure that replaced it.
    ///
    /// Frames are dispatched by tag. Returns the event to show the user, if
    /// any.
    pub async fn handle(
        &mut self,
        inbound: Result<WireMessage, TransportError>,
    ) -> Option<SessionEvent> {
        if self.state == SessionState::Closed {
            return None;
        }

        let frame = match inbound {
            Ok(frame) => frame,
            Err(e) => {
                tracing::info!(error = %e, "channel closed");
                return Some(self.close(CloseReason::ConnectionLost).await);
            }
        };

        match frame {
            WireMessage::Key { key } => {
                if self.peer.is_some() {
                    tracing::debug!("ignoring repeated key frame");
                    return None;
                }
                match PeerKey::import(&key) {
                    Ok(peer) => {
                        let fingerprint = peer.fingerprint();
                        tracing::info!(peer = %fingerprint, "partner key imported");
                        self.peer = Some(peer);
                        self.state = SessionState::Connected(Handshake::PeerKeyKnown);
                        Some(SessionEvent::HandshakeComplete { fingerprint })
                    }
                    Err(error) => {
                        tracing::warn!(%error, "partner key rejected");
                        Some(SessionEvent::KeyRejected { error })
                    }
                }
            }
            WireMessage::Cipher { payload } => Some(self.open(&payload).await),
            WireMessage::Typing => Some(SessionEvent::Typing),
            WireMessage::DeadPeer => {
                tracing::info!("relay reports partner gone");
                Some(self.close(CloseReason::DeadPeer).await)
            }
            WireMessage::Error { reason } => match reason {
                RejectReason::FrameTooLarge | RejectReason::PendingFull => {
                    tracing::warn!(%reason, "relay dropped a frame");
                    Some(SessionEvent::Rejected(reason))
                }
                _ => {
                    tracing::warn!(%reason, "relay rejected session");
                    Some(self.close(CloseReason::Rejected(reason)).await)
                }
            },
            other @ (WireMessage::Join { .. } | WireMessage::Joined { .. }) => {
                tracing::debug!(tag = other.tag(), "ignoring unexpected frame");
                None
            }
        }
    }

    /// Wait for and apply frames until one produces an event.
    ///
    /// Returns `None` once the session is closed and its closing event has
    /// been delivered.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        while self.state != SessionState::Closed {
            let inbound = self.recv().await;
            if let Some(event) = self.handle(inbound).await {
                return Some(event);
            }
        }
        None
    }

    /// Leave the room and close the channel. Idempotent.
    pub async fn leave(&mut self) {
        if self.state != SessionState::Closed {
            self.close(CloseReason::Left).await;
        }
    }

    async fn open(&self, payload: &str) -> SessionEvent {
        let Some(agent) = self.agent.as_ref() else {
            return SessionEvent::Undecryptable;
        };
        let ciphertext = match codec::decode(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, len = payload.len(), "cipher payload not byte-encoded");
                return SessionEvent::Undecryptable;
            }
        };
        let len = ciphertext.len();
        match agent.decrypt(ciphertext).await {
            Ok(text) => SessionEvent::Message { text },
            Err(e) => {
                tracing::warn!(error = %e, len, "dropping undecryptable message");
                SessionEvent::Undecryptable
            }
        }
    }

    async fn close(&mut self, reason: CloseReason) -> SessionEvent {
        self.state = SessionState::Closed;
        self.close_reason = Some(reason);
        if let Some(channel) = self.channel.as_mut() {
            channel.close().await;
        }
        tracing::info!(%reason, "session closed");
        SessionEvent::Closed(reason)
    }
}

impl<C: Channel> fmt::Debug for ChatSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatSession")
            .field("state", &self.state)
            .field("local", &self.local_fingerprint())
            .field("peer", &self.peer_fingerprint())
            .field("close_reason", &self.close_reason)
            .finish_non_exhaustive()
    }
}
