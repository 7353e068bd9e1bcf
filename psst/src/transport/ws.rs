//! WebSocket channel to a `Psst` relay.
//!
//! [`WsChannel::open`] connects, sends `join`, and resolves only once the
//! relay answers `joined`. After that, a background reader task decodes
//! inbound text frames into a queue that [`Channel::recv`] drains in arrival
//! order. Malformed frames are logged and skipped; the connection stays up.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use psst_proto::room::RoomId;
use psst_proto::wire::{self, WireMessage};

use super::{Channel, ChannelConfig, TransportError};

/// Write half of a client WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Read half of a client WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// A joined WebSocket connection to one relay room.
pub struct WsChannel {
    /// The room this connection is attached to.
    room: RoomId,
    /// Write half of the WebSocket connection.
    ws_sender: WsSender,
    /// Frames decoded by the background reader task.
    incoming: mpsc::Receiver<WireMessage>,
    /// Cleared when the connection closes or errors.
    open: Arc<AtomicBool>,
    /// Background reader task.
    reader: tokio::task::JoinHandle<()>,
}

impl WsChannel {
    /// Connect to `relay_url` and join `room`.
    ///
    /// 1. Establishes the WebSocket connection (`connect_timeout`)
    /// 2. Sends `join{room}`
    /// 3. Waits for `joined` (`join_timeout`)
    /// 4. Spawns the reader task
    ///
    /// # Errors
    ///
    /// - [`TransportError::Timeout`] if connecting or joining times out.
    /// - [`TransportError::Unreachable`] if the relay refuses the connection.
    /// - [`TransportError::Rejected`] if the relay answers with an `error`
    ///   frame (for example `room_full`).
    /// - [`TransportError::ConnectionClosed`] if the relay hangs up first.
    pub async fn open(
        relay_url: &str,
        room: &RoomId,
        config: &ChannelConfig,
    ) -> Result<Self, TransportError> {
        let (ws_stream, _response) =
            tokio::time::timeout(config.connect_timeout, connect_async(relay_url))
                .await
                .map_err(|_| {
                    tracing::warn!(url = relay_url, "relay connect timed out");
                    TransportError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(url = relay_url, error = %e, "relay connect failed");
                    map_ws_connect_error(relay_url, e)
                })?;

        let (mut ws_sender, mut ws_reader) = ws_stream.split();

        let join = wire::encode(&WireMessage::Join {
            room: room.as_str().to_owned(),
        })?;
        ws_sender
            .send(Message::Text(join.into()))
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "failed to send join");
                TransportError::Io(std::io::Error::other(format!("failed to send join: {e}")))
            })?;

        tokio::time::timeout(config.join_timeout, await_joined(&mut ws_reader, room))
            .await
            .map_err(|_| {
                tracing::warn!(url = relay_url, room = %room, "join acknowledgement timed out");
                TransportError::Timeout
            })??;

        tracing::info!(url = relay_url, room = %room, "joined relay room");

        let (tx, rx) = mpsc::channel(config.capacity);
        let open = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(reader_loop(ws_reader, tx, Arc::clone(&open)));

        Ok(Self {
            room: room.clone(),
            ws_sender,
            incoming: rx,
            open,
            reader,
        })
    }

    /// The room this channel joined.
    #[must_use]
    pub const fn room(&self) -> &RoomId {
        &self.room
    }
}

impl Channel for WsChannel {
    async fn send(&mut self, msg: &WireMessage) -> Result<(), TransportError> {
        if !self.open.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectionClosed);
        }

        let text = wire::encode(msg)?;
        let len = text.len();
        self.ws_sender
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "relay send failed");
                self.open.store(false, Ordering::Relaxed);
                TransportError::ConnectionClosed
            })?;

        tracing::trace!(tag = msg.tag(), len, "frame sent");
        Ok(())
    }

    async fn recv(&mut self) -> Result<WireMessage, TransportError> {
        self.incoming
            .recv()
            .await
            .ok_or(TransportError::ConnectionClosed)
    }

    async fn close(&mut self) {
        if self.open.swap(false, Ordering::Relaxed) {
            let _ = self.ws_sender.close().await;
            tracing::debug!(room = %self.room, "channel closed");
        }
        self.reader.abort();
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl std::fmt::Debug for WsChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsChannel")
            .field("room", &self.room)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// Read frames until the relay acknowledges or refuses the join.
async fn await_joined(ws_reader: &mut WsReader, room: &RoomId) -> Result<(), TransportError> {
    loop {
        match ws_reader.next().await {
            Some(Ok(Message::Text(text))) => match wire::decode(text.as_str()) {
                Ok(WireMessage::Joined { room: joined }) if joined == room.as_str() => {
                    return Ok(());
                }
                Ok(WireMessage::Error { reason }) => {
                    tracing::warn!(room = %room, %reason, "relay rejected join");
                    return Err(TransportError::Rejected(reason));
                }
                Ok(other) => {
                    tracing::warn!(tag = other.tag(), "unexpected frame while joining");
                    return Err(TransportError::Io(std::io::Error::other(
                        "unexpected frame while joining",
                    )));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "malformed join response");
                    return Err(TransportError::Io(std::io::Error::other(format!(
                        "malformed join response: {e}"
                    ))));
                }
            },
            Some(Ok(Message::Close(_))) | None => {
                tracing::warn!("relay closed connection while joining");
                return Err(TransportError::ConnectionClosed);
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(error = %e, "WebSocket error while joining");
                return Err(TransportError::Io(std::io::Error::other(format!(
                    "WebSocket error while joining: {e}"
                ))));
            }
        }
    }
}

/// Decode inbound text frames into `tx` until the connection ends.
async fn reader_loop(
    mut ws_reader: WsReader,
    tx: mpsc::Sender<WireMessage>,
    open: Arc<AtomicBool>,
) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match wire::decode(text.as_str()) {
                Ok(msg) => {
                    tracing::trace!(tag = msg.tag(), len = text.as_str().len(), "frame received");
                    if tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        len = text.as_str().len(),
                        "malformed frame, skipping"
                    );
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("relay closed the connection");
                break;
            }
            Ok(Message::Binary(data)) => {
                tracing::debug!(len = data.len(), "ignoring binary frame");
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Err(e) => {
                tracing::warn!(error = %e, "relay read error");
                break;
            }
        }
    }
    open.store(false, Ordering::Relaxed);
    tracing::debug!("relay reader task exiting");
}

/// Map a `tokio_tungstenite` connection error to a [`TransportError`].
fn map_ws_connect_error(url: &str, err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::AddrNotAvailable
            ) {
                TransportError::Unreachable(url.to_owned())
            } else {
                TransportError::Io(io_err)
            }
        }
        WsError::Http(response) => TransportError::Io(std::io::Error::other(format!(
            "relay HTTP error: status {}",
            response.status()
        ))),
        WsError::Url(e) => TransportError::Unreachable(format!("{url}: {e}")),
        other => TransportError::Io(std::io::Error::other(format!(
            "relay connection error: {other}"
        ))),
    }
}
