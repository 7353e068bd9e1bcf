//! Relay server core: shared state, WebSocket handler and frame forwarding.
//!
//! Each connection must open with a `join` frame naming its room. Once
//! joined, every text frame it sends is forwarded verbatim to the other
//! connection in the same room, except frames only the relay may send
//! (`join`, `joined`, `error`, `"DEAD"`), which earn the sender a
//! `protocol_violation`. Beyond that outer tag the relay never parses
//! forwarded frames, so key blobs and ciphertext pass through untouched. When the peer is gone
//! the sender gets the `"DEAD"` sentinel instead; the surviving peer is
//! never told proactively that its partner left.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use psst_proto::room::RoomId;
use psst_proto::wire::{self, DEAD_SENTINEL, RejectReason, WireMessage};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::rooms::{ConnId, ForwardOutcome, RoomRegistry};

/// Default maximum accepted text frame size in bytes (64 KB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Shared relay server state.
pub struct RelayState {
    /// Live rooms.
    pub rooms: RoomRegistry,
    /// Maximum accepted text frame size in bytes.
    max_frame_size: usize,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates relay state with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rooms: RoomRegistry::new(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Creates relay state from a resolved configuration.
    #[must_use]
    pub fn with_config(config: &RelayConfig) -> Self {
        Self {
            rooms: RoomRegistry::with_limits(config.max_rooms, config.max_pending_frames),
            max_frame_size: config.max_frame_size,
        }
    }
}

/// Handles an upgraded WebSocket connection.
///
/// The connection lifecycle:
/// 1. Wait for a `join` frame and validate the room id.
/// 2. Attach to the room; the `joined` ack and any held frames are queued.
/// 3. Forward every peer frame to the peer, answering `"DEAD"` when the
///    peer is gone.
/// 4. On disconnect, leave the room.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let conn: ConnId = Uuid::now_v7();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let room = match wait_for_join(&mut ws_receiver).await {
        Some(Ok(room)) => room,
        Some(Err(reason)) => {
            tracing::warn!(conn = %conn, reason = %reason, "rejecting connection before join");
            reject(&mut ws_sender, reason).await;
            return;
        }
        None => {
            tracing::debug!(conn = %conn, "connection closed before join");
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let greeting = match wire::encode(&WireMessage::Joined {
        room: room.to_string(),
    }) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(conn = %conn, error = %e, "failed to encode joined ack");
            return;
        }
    };

    let session = match state.rooms.join(&room, conn, tx.clone(), greeting) {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(conn = %conn, room = %room, error = %e, "join refused");
            reject(&mut ws_sender, e.reason()).await;
            return;
        }
    };
    tracing::info!(conn = %conn, room = %room, "connection joined room");

    // Writer task: drains this connection's channel onto the socket.
    let writer_conn = conn;
    let mut write_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                tracing::debug!(conn = %writer_conn, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let reader_session = Arc::clone(&session);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if text.len() > reader_state.max_frame_size {
                        tracing::warn!(
                            conn = %conn,
                            size = text.len(),
                            max = reader_state.max_frame_size,
                            "frame exceeds size limit"
                        );
                        send_reject(&tx, RejectReason::FrameTooLarge);
                        continue;
                    }
                    if wire::is_reserved(text.as_str()) {
                        tracing::warn!(conn = %conn, "peer sent a relay-only frame, not forwarded");
                        send_reject(&tx, RejectReason::ProtocolViolation);
                        continue;
                    }
                    let size = text.len();
                    let outcome = reader_session.lock().forward(conn, text.as_str().to_owned());
                    match outcome {
                        ForwardOutcome::Delivered => {
                            tracing::trace!(conn = %conn, size, "frame forwarded");
                        }
                        ForwardOutcome::Held => {
                            tracing::debug!(conn = %conn, size, "peer not joined yet, frame held");
                        }
                        ForwardOutcome::PendingFull => {
                            tracing::warn!(conn = %conn, "hold queue full, frame dropped");
                            send_reject(&tx, RejectReason::PendingFull);
                        }
                        ForwardOutcome::DeadPeer => {
                            tracing::info!(conn = %conn, "peer gone, answering with dead sentinel");
                            let _ = tx.send(DEAD_SENTINEL.to_string());
                        }
                    }
                }
                Message::Close(_) => {
                    tracing::debug!(conn = %conn, "received close frame");
                    break;
                }
                Message::Binary(_) => {
                    tracing::debug!(conn = %conn, "ignoring binary frame");
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.rooms.leave(&room, &session, conn);
    tracing::info!(conn = %conn, room = %room, "connection left room");
}

/// Waits for the first frame, expecting `join` with a valid room id.
///
/// Returns `None` if the connection closes first.
async fn wait_for_join(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<Result<RoomId, RejectReason>> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                return Some(match wire::decode(text.as_str()) {
                    Ok(WireMessage::Join { room }) => {
                        RoomId::parse(&room).map_err(|e| {
                            tracing::warn!(error = %e, "join with invalid room id");
                            RejectReason::InvalidRoom
                        })
                    }
                    Ok(other) => {
                        tracing::warn!(tag = other.tag(), "expected join, got different frame");
                        Err(RejectReason::ProtocolViolation)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to decode join frame");
                        Err(RejectReason::ProtocolViolation)
                    }
                });
            }
            Message::Close(_) => return None,
            Message::Binary(_) => return Some(Err(RejectReason::ProtocolViolation)),
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
    None
}

/// Queues an error frame on a joined connection's writer.
fn send_reject(tx: &mpsc::UnboundedSender<String>, reason: RejectReason) {
    if let Ok(text) = wire::encode(&WireMessage::Error { reason }) {
        let _ = tx.send(text);
    }
}

/// Sends an error frame directly on the socket, then closes it.
async fn reject(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    reason: RejectReason,
) {
    if let Ok(text) = wire::encode(&WireMessage::Error { reason }) {
        let _ = ws_sender.send(Message::Text(text.into())).await;
    }
    let _ = ws_sender.send(Message::Close(None)).await;
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
