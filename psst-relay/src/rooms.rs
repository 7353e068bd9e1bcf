//! Room registry for the relay server.
//!
//! A [`RelaySession`] pairs at most two connections under one [`RoomId`].
//! The [`RoomRegistry`] maps room ids to sessions; its lock is only taken
//! while a connection joins or leaves. Forwarding locks the one session
//! involved, so traffic in one room never waits on another room.
//!
//! Sessions are ephemeral: created by the first join, dropped when the last
//! connection leaves, and lost on relay restart.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use psst_proto::room::RoomId;
use psst_proto::wire::RejectReason;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Default maximum number of live rooms.
pub const DEFAULT_MAX_ROOMS: usize = 10_000;

/// Default number of frames held for a peer that has not joined yet.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 32;

/// Connections allowed per room.
pub const ROOM_CAPACITY: usize = 2;

/// Identifier of one relay connection.
pub type ConnId = Uuid;

/// Channel feeding a connection's WebSocket writer task with text frames.
pub type FrameSender = mpsc::UnboundedSender<String>;

/// Errors that can occur when joining a room.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum JoinError {
    /// The room already holds two connections.
    #[error("room is full")]
    RoomFull,
    /// The room was paired once and one side has left; it cannot be rejoined.
    #[error("room has already been used")]
    RoomSpent,
    /// The registry holds its maximum number of rooms.
    #[error("room registry is full (max {0} rooms)")]
    CapacityReached(usize),
}

impl JoinError {
    /// The rejection reason sent to the client.
    #[must_use]
    pub const fn reason(&self) -> RejectReason {
        match self {
            Self::RoomFull => RejectReason::RoomFull,
            Self::RoomSpent => RejectReason::InvalidRoom,
            Self::CapacityReached(_) => RejectReason::ServerFull,
        }
    }
}

/// Result of forwarding one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// The frame was queued on the peer's writer.
    Delivered,
    /// No peer has joined yet; the frame is held for it.
    Held,
    /// The hold queue is full; the frame was dropped.
    PendingFull,
    /// The peer is gone; the sender must be told with the dead-peer sentinel.
    DeadPeer,
}

#[derive(Debug)]
struct Member {
    conn: ConnId,
    tx: FrameSender,
}

/// Pairing of up to two connections sharing a room id.
#[derive(Debug)]
pub struct RelaySession {
    members: Vec<Member>,
    /// Set once two connections have been in the room together.
    paired: bool,
    /// Frames sent before the second connection arrived.
    pending: VecDeque<String>,
    max_pending: usize,
}

impl RelaySession {
    fn new(max_pending: usize) -> Self {
        Self {
            members: Vec::with_capacity(ROOM_CAPACITY),
            paired: false,
            pending: VecDeque::new(),
            max_pending,
        }
    }

    /// Number of live connections in this session.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Forward a frame from `from` to the other member, verbatim.
    ///
    /// A peer whose writer has shut down is removed from the session and the
    /// outcome is [`ForwardOutcome::DeadPeer`].
    pub fn forward(&mut self, from: ConnId, frame: String) -> ForwardOutcome {
        let Some(index) = self.members.iter().position(|m| m.conn != from) else {
            if self.paired {
                return ForwardOutcome::DeadPeer;
            }
            if self.pending.len() >= self.max_pending {
                return ForwardOutcome::PendingFull;
            }
            self.pending.push_back(frame);
            return ForwardOutcome::Held;
        };

        if self.members[index].tx.send(frame).is_err() {
            self.members.swap_remove(index);
            return ForwardOutcome::DeadPeer;
        }
        ForwardOutcome::Delivered
    }
}

/// Handle to a joined session, returned by [`RoomRegistry::join`].
pub type SessionHandle = Arc<Mutex<RelaySession>>;

/// In-memory map of live rooms.
pub struct RoomRegistry {
    rooms: Mutex<HashMap<RoomId, SessionHandle>>,
    max_rooms: usize,
    max_pending: usize,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    /// Creates an empty registry with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_ROOMS, DEFAULT_MAX_PENDING_FRAMES)
    }

    /// Creates an empty registry with custom limits.
    #[must_use]
    pub fn with_limits(max_rooms: usize, max_pending: usize) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            max_rooms,
            max_pending,
        }
    }

    /// Attach a connection to a room.
    ///
    /// `greeting` is queued on `tx` first, followed by any frames held for
    /// the joiner, all before another member can forward to it.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::RoomFull`] if two connections are present,
    /// [`JoinError::RoomSpent`] if the room was already used, and
    /// [`JoinError::CapacityReached`] if a new room cannot be created.
    pub fn join(
        &self,
        room: &RoomId,
        conn: ConnId,
        tx: FrameSender,
        greeting: String,
    ) -> Result<SessionHandle, JoinError> {
        let mut rooms = self.rooms.lock();
        let session = if let Some(existing) = rooms.get(room) {
            Arc::clone(existing)
        } else {
            if rooms.len() >= self.max_rooms {
                return Err(JoinError::CapacityReached(self.max_rooms));
            }
            let created = Arc::new(Mutex::new(RelaySession::new(self.max_pending)));
            rooms.insert(room.clone(), Arc::clone(&created));
            created
        };

        let mut guard = session.lock();
        if guard.members.len() >= ROOM_CAPACITY {
            return Err(JoinError::RoomFull);
        }
        if guard.paired {
            return Err(JoinError::RoomSpent);
        }

        // A closed writer here only means the joiner is already gone; its
        // handler will leave the room right after.
        let _ = tx.send(greeting);
        for held in guard.pending.drain(..) {
            let _ = tx.send(held);
        }
        guard.members.push(Member { conn, tx });
        if guard.members.len() == ROOM_CAPACITY {
            guard.paired = true;
        }
        drop(guard);
        drop(rooms);

        Ok(session)
    }

    /// Detach a connection from its room, discarding the room if empty.
    pub fn leave(&self, room: &RoomId, session: &SessionHandle, conn: ConnId) {
        let mut rooms = self.rooms.lock();
        let mut guard = session.lock();
        guard.members.retain(|m| m.conn != conn);
        let empty = guard.members.is_empty();
        drop(guard);

        if empty
            && rooms
                .get(room)
                .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            rooms.remove(room);
        }
    }

    /// Number of live rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.lock().len()
    }

    /// Number of live connections in a room (0 if the room does not exist).
    #[must_use]
    pub fn member_count(&self, room: &RoomId) -> usize {
        let session = self.rooms.lock().get(room).cloned();
        session.map_or(0, |s| s.lock().member_count())
    }
}
