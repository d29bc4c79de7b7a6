//! Room registry and fan-out to the other members of a note room.
//!
//! Every live connection registers once and receives a bounded outbound
//! queue. Rooms are keyed by note id and hold only connection ids; a room
//! exists while it has at least one member.
//!
//! Delivery is best-effort: if a member's queue is full the frame is
//! dropped for that member and counted. Frames from one sender reach each
//! receiver in send order.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use notes_core::NoteId;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Identifies one transport connection for its lifetime.
pub type ConnectionId = Uuid;

/// A pre-encoded text frame, shared by every receiver of one broadcast.
pub type Frame = Arc<str>;

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_rooms: usize,
    pub active_connections: usize,
}

/// Counters updated on the send path without taking the registry lock
/// for writing.
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("Connection {0} is not registered")]
    UnknownConnection(ConnectionId),
    #[error("Connection already joined the maximum of {0} rooms")]
    TooManyRooms(usize),
}

/// Members of one note room.
#[derive(Debug, Default)]
pub struct BroadcastGroup {
    members: HashSet<ConnectionId>,
}

impl BroadcastGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, conn: &ConnectionId) -> bool {
        self.members.contains(conn)
    }
}

struct ConnectionEntry {
    outbound: mpsc::Sender<Frame>,
    rooms: HashSet<NoteId>,
}

#[derive(Default)]
struct Registry {
    rooms: HashMap<NoteId, BroadcastGroup>,
    connections: HashMap<ConnectionId, ConnectionEntry>,
}

impl Registry {
    fn remove_member(&mut self, conn: &ConnectionId, note: &NoteId) -> bool {
        let Some(group) = self.rooms.get_mut(note) else {
            return false;
        };
        let removed = group.members.remove(conn);
        if group.is_empty() {
            self.rooms.remove(note);
            log::debug!("Room {note} removed (empty)");
        }
        removed
    }
}

/// Maps note ids to rooms and connection ids to their outbound queues.
pub struct RoomManager {
    registry: RwLock<Registry>,
    capacity: usize,
    max_rooms_per_connection: usize,
    stats: AtomicBroadcastStats,
}

impl RoomManager {
    /// `capacity` is the outbound queue length of each connection.
    pub fn new(capacity: usize) -> Self {
        Self::with_room_limit(capacity, usize::MAX)
    }

    pub fn with_room_limit(capacity: usize, max_rooms_per_connection: usize) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            capacity: capacity.max(1),
            max_rooms_per_connection,
            stats: AtomicBroadcastStats::new(),
        }
    }

    /// Register a connection and hand back the receiving end of its queue.
    ///
    /// Registering an id twice replaces the previous queue.
    pub async fn register(&self, conn: ConnectionId) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut registry = self.registry.write().await;
        let entry = ConnectionEntry {
            outbound: tx,
            rooms: HashSet::new(),
        };
        if let Some(old) = registry.connections.insert(conn, entry) {
            for note in old.rooms {
                registry.remove_member(&conn, &note);
            }
        }
        rx
    }

    /// Add `conn` to the room for `note`. Returns `false` if it was already
    /// a member.
    pub async fn join(&self, conn: ConnectionId, note: &NoteId) -> Result<bool, RoomError> {
        let mut registry = self.registry.write().await;
        let entry = registry
            .connections
            .get_mut(&conn)
            .ok_or(RoomError::UnknownConnection(conn))?;
        if entry.rooms.contains(note) {
            return Ok(false);
        }
        if entry.rooms.len() >= self.max_rooms_per_connection {
            return Err(RoomError::TooManyRooms(self.max_rooms_per_connection));
        }
        entry.rooms.insert(note.clone());
        let group = registry.rooms.entry(note.clone()).or_default();
        group.members.insert(conn);
        log::debug!("Connection {conn} joined room {note} ({} members)", group.len());
        Ok(true)
    }

    /// Remove `conn` from the room for `note`. Returns `false` if it was not
    /// a member.
    pub async fn leave(&self, conn: ConnectionId, note: &NoteId) -> bool {
        let mut registry = self.registry.write().await;
        if let Some(entry) = registry.connections.get_mut(&conn) {
            entry.rooms.remove(note);
        }
        let removed = registry.remove_member(&conn, note);
        if removed {
            log::debug!("Connection {conn} left room {note}");
        }
        removed
    }

    /// Forget a connection and remove it from every room it joined.
    ///
    /// Returns the rooms it was a member of.
    pub async fn disconnect(&self, conn: ConnectionId) -> Vec<NoteId> {
        let mut registry = self.registry.write().await;
        let Some(entry) = registry.connections.remove(&conn) else {
            return Vec::new();
        };
        let rooms: Vec<NoteId> = entry.rooms.into_iter().collect();
        for note in &rooms {
            registry.remove_member(&conn, note);
        }
        rooms
    }

    /// Queue `frame` for every member of `note` except `sender`.
    ///
    /// Returns the number of connections the frame was queued for.
    pub async fn broadcast(&self, sender: ConnectionId, note: &NoteId, frame: Frame) -> usize {
        let registry = self.registry.read().await;
        let Some(group) = registry.rooms.get(note) else {
            return 0;
        };

        let mut delivered = 0;
        let mut dropped = 0;
        for member in group.members.iter().filter(|m| **m != sender) {
            let Some(entry) = registry.connections.get(member) else {
                continue;
            };
            match entry.outbound.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::warn!("Outbound queue full for {member}, dropping frame for room {note}");
                    dropped += 1;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    log::debug!("Outbound queue closed for {member}");
                    dropped += 1;
                }
            }
        }

        self.stats
            .messages_sent
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.stats
            .messages_dropped
            .fetch_add(dropped, Ordering::Relaxed);
        delivered
    }

    /// Current members of the room for `note`.
    pub async fn members(&self, note: &NoteId) -> HashSet<ConnectionId> {
        self.registry
            .read()
            .await
            .rooms
            .get(note)
            .map(|g| g.members.clone())
            .unwrap_or_default()
    }

    /// Rooms `conn` is currently a member of.
    pub async fn rooms_of(&self, conn: &ConnectionId) -> HashSet<NoteId> {
        self.registry
            .read()
            .await
            .connections
            .get(conn)
            .map(|e| e.rooms.clone())
            .unwrap_or_default()
    }

    pub async fn room_count(&self) -> usize {
        self.registry.read().await.rooms.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.connections.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn stats(&self) -> BroadcastStats {
        let registry = self.registry.read().await;
        BroadcastStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.stats.messages_dropped.load(Ordering::Relaxed),
            active_rooms: registry.rooms.len(),
            active_connections: registry.connections.len(),
        }
    }
}
