//! Transport layer abstraction for `Psst`.
//!
//! A [`Channel`] carries [`WireMessage`] frames between this client and the
//! relay room it has joined. Implementations:
//! - [`ws::WsChannel`]: WebSocket connection to a relay server
//! - [`loopback::LoopbackChannel`]: in-process pair for testing
//!
//! Channels never see plaintext. By the time a frame reaches
//! [`Channel::send`] its `cipher` payload is already sealed for the partner.

pub mod loopback;
pub mod ws;

use std::future::Future;
use std::time::Duration;

use psst_proto::wire::{RejectReason, WireError, WireMessage};

/// Default timeout for connecting to the relay server.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for the relay's `joined` acknowledgement.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default capacity of the inbound frame queue.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Connecting or joining did not finish in time.
    #[error("transport operation timed out")]
    Timeout,

    /// The relay could not be reached.
    #[error("relay {0} is unreachable")]
    Unreachable(String),

    /// The relay refused the join.
    #[error("relay rejected join: {0}")]
    Rejected(RejectReason),

    /// A frame could not be encoded.
    #[error("frame encoding failed: {0}")]
    Encode(#[from] WireError),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection settings for opening a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Timeout for the WebSocket connect.
    pub connect_timeout: Duration,
    /// Timeout for the `joined` acknowledgement.
    pub join_timeout: Duration,
    /// Capacity of the inbound frame queue.
    pub capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// A bidirectional, ordered frame channel to one room.
///
/// A channel is ready as soon as it exists: constructors resolve only after
/// the relay has acknowledged the join. There is no reconnection; once
/// [`recv`](Channel::recv) reports [`TransportError::ConnectionClosed`] the
/// channel is spent.
pub trait Channel: Send {
    /// Transmit one frame.
    ///
    /// Returns once the frame has been handed to the connection. There is
    /// no application-level acknowledgement.
    fn send(
        &mut self,
        msg: &WireMessage,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receive the next inbound frame, in arrival order.
    ///
    /// Cancel-safe: dropping the future before it completes loses no frame,
    /// so callers may use it inside `tokio::select!`.
    fn recv(&mut self) -> impl Future<Output = Result<WireMessage, TransportError>> + Send;

    /// Close the channel. Idempotent.
    fn close(&mut self) -> impl Future<Output = ()> + Send;

    /// Whether the underlying connection is still open.
    fn is_open(&self) -> bool;
}
