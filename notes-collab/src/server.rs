//! WebSocket relay server.
//!
//! ```text
//! Client A ──┐                        ┌──► Client B
//!             ├── RoomManager (noteId) ┤
//! Client C ──┘                        └──► Client D
//! ```
//!
//! One task per connection. Each task registers an outbound queue with the
//! [`RoomManager`], then multiplexes incoming frames and queued outbound
//! frames until the socket closes. Leaving every room on exit is done by
//! the task itself, so clients never need to send `leave-note` before
//! dropping.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{ConnectionId, RoomManager};
use crate::presence::relay_editing;
use crate::protocol::ClientEvent;
use crate::relay::relay_note_update;

pub type ServerResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Outbound queue length per connection
    pub broadcast_capacity: usize,
    /// Rooms a single connection may be joined to at once
    pub max_rooms_per_connection: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5000".to_string(),
            broadcast_capacity: 256,
            max_rooms_per_connection: 64,
        }
    }
}

impl ServerConfig {
    /// Read overrides from the process environment.
    ///
    /// `NOTES_BIND_ADDR` wins over `PORT`; `PORT` alone binds all
    /// interfaces.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(addr) = lookup("NOTES_BIND_ADDR") {
            config.bind_addr = addr;
        } else if let Some(port) = lookup("PORT").and_then(|p| p.parse::<u16>().ok()) {
            config.bind_addr = format!("0.0.0.0:{port}");
        }
        if let Some(cap) = lookup("NOTES_BROADCAST_CAPACITY").and_then(|c| c.parse().ok()) {
            config.broadcast_capacity = cap;
        }
        if let Some(max) = lookup("NOTES_MAX_ROOMS_PER_CONNECTION").and_then(|m| m.parse().ok()) {
            config.max_rooms_per_connection = max;
        }
        config
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_frames: u64,
    pub malformed_frames: u64,
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    rooms: Arc<RoomManager>,
    stats: Arc<RwLock<ServerStats>>,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Self {
        let rooms = Arc::new(RoomManager::with_room_limit(
            config.broadcast_capacity,
            config.max_rooms_per_connection,
        ));
        Self {
            config,
            rooms,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> ServerResult<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> ServerResult<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let rooms = self.rooms.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, rooms, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        rooms: Arc<RoomManager>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> ServerResult<()> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let conn = Uuid::new_v4();
        let mut outbound = rooms.register(conn).await;
        log::info!("WebSocket connection {conn} established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let result: ServerResult<()> = loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_frame(&rooms, &stats, conn, text.as_str()).await;
                        }
                        Some(Ok(Message::Binary(_))) => {
                            log::warn!("Ignoring binary frame from {addr}");
                            stats.write().await.malformed_frames += 1;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = ws_sender.send(Message::Pong(data)).await {
                                break Err(e.into());
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection {conn} closed from {addr}");
                            break Ok(());
                        }
                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break Err(e.into());
                        }
                        Some(Ok(_)) => {}
                    }
                }

                frame = outbound.recv() => {
                    match frame {
                        Some(frame) => {
                            if let Err(e) = ws_sender.send(Message::text(frame.to_string())).await {
                                break Err(e.into());
                            }
                        }
                        // Re-registered elsewhere; nothing more will arrive.
                        None => break Ok(()),
                    }
                }
            }
        };

        let left = rooms.disconnect(conn).await;
        if !left.is_empty() {
            log::info!("Connection {conn} left {} rooms on disconnect", left.len());
        }
        stats.write().await.active_connections -= 1;

        result
    }

    async fn handle_frame(
        rooms: &RoomManager,
        stats: &RwLock<ServerStats>,
        conn: ConnectionId,
        text: &str,
    ) {
        stats.write().await.total_frames += 1;

        let event = match ClientEvent::decode(text) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("Dropping malformed frame from {conn}: {e}");
                stats.write().await.malformed_frames += 1;
                return;
            }
        };
        log::trace!("{} from {conn}", event.name());

        match event {
            ClientEvent::JoinNote(note) => {
                if let Err(e) = rooms.join(conn, &note).await {
                    log::warn!("Join of {note} by {conn} refused: {e}");
                }
            }
            ClientEvent::LeaveNote(note) => {
                rooms.leave(conn, &note).await;
            }
            ClientEvent::NoteUpdate(update) => {
                if let Err(e) = relay_note_update(rooms, conn, update).await {
                    log::error!("Failed to relay note-update from {conn}: {e}");
                }
            }
            ClientEvent::Editing(signal) => {
                if let Err(e) = relay_editing(rooms, conn, signal).await {
                    log::error!("Failed to relay editing from {conn}: {e}");
                }
            }
        }
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn room_manager(&self) -> &Arc<RoomManager> {
        &self.rooms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:5000");
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.max_rooms_per_connection, 64);
    }

    #[test]
    fn test_config_from_lookup() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PORT", "6000"),
            ("NOTES_BROADCAST_CAPACITY", "32"),
            ("NOTES_MAX_ROOMS_PER_CONNECTION", "8"),
        ]);
        let config = ServerConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.bind_addr, "0.0.0.0:6000");
        assert_eq!(config.broadcast_capacity, 32);
        assert_eq!(config.max_rooms_per_connection, 8);
    }

    #[test]
    fn test_bind_addr_beats_port() {
        let env: HashMap<&str, &str> =
            HashMap::from([("PORT", "6000"), ("NOTES_BIND_ADDR", "127.0.0.1:7000")]);
        let config = ServerConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.bind_addr, "127.0.0.1:7000");
    }

    #[test]
    fn test_config_has_no_storage_setting() {
        // The relay holds no notes; a storage path in the environment is
        // left to whatever hosts the note service.
        let config = ServerConfig::from_lookup(|k| match k {
            "NOTES_STORAGE_PATH" => Some("/tmp/notes".into()),
            _ => None,
        });
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_config_ignores_garbage() {
        let config = ServerConfig::from_lookup(|k| match k {
            "PORT" => Some("not-a-port".into()),
            "NOTES_BROADCAST_CAPACITY" => Some("-1".into()),
            _ => None,
        });
        assert_eq!(config, ServerConfig::default());
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = RelayServer::with_defaults();
        assert_eq!(server.stats().await, ServerStats::default());
        assert_eq!(server.room_manager().room_count().await, 0);
    }

    #[tokio::test]
    async fn test_handle_frame_routes_join_and_leave() {
        let server = RelayServer::with_defaults();
        let conn = Uuid::new_v4();
        let _rx = server.rooms.register(conn).await;

        RelayServer::handle_frame(
            &server.rooms,
            &server.stats,
            conn,
            r#"{"event":"join-note","data":"n1"}"#,
        )
        .await;
        assert_eq!(server.rooms.rooms_of(&conn).await.len(), 1);

        RelayServer::handle_frame(
            &server.rooms,
            &server.stats,
            conn,
            r#"{"event":"leave-note","data":"n1"}"#,
        )
        .await;
        assert!(server.rooms.rooms_of(&conn).await.is_empty());
        assert_eq!(server.stats().await.total_frames, 2);
    }

    #[tokio::test]
    async fn test_handle_frame_counts_malformed() {
        let server = RelayServer::with_defaults();
        let conn = Uuid::new_v4();
        RelayServer::handle_frame(&server.rooms, &server.stats, conn, "{oops").await;
        let stats = server.stats().await;
        assert_eq!(stats.total_frames, 1);
        assert_eq!(stats.malformed_frames, 1);
    }
}
