//! WebSocket relay client.
//!
//! Provides:
//! - Connection lifecycle with automatic reconnect
//! - Re-joining every room after a reconnect
//! - Fire-and-forget emission behind [`RelayEmitter`]
//! - Incoming relay traffic as [`RelayEvent`]s
//!
//! Dropping a [`RelayClient`] aborts its background task, which closes the
//! socket on every exit path.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use notes_core::{NoteId, UserRef};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::protocol::{
    ClientEvent, EditingSignal, NoteUpdate, ProtocolError, ServerEvent, Updates,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `ws://host:port` of the relay server
    pub server_url: String,
    /// Pause between reconnect attempts
    pub reconnect_delay: Duration,
    /// Frames buffered for the writer before emits are dropped
    pub outgoing_capacity: usize,
    /// Events buffered for the application
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:5000".to_string(),
            reconnect_delay: Duration::from_secs(1),
            outgoing_capacity: 256,
            event_capacity: 256,
        }
    }
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }
}

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events emitted by the relay client.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Connected,
    Disconnected,
    /// A peer's in-progress edit
    NoteUpdated(Updates),
    /// A peer started (`Some`) or stopped (`None`) typing
    UserEditing(Option<UserRef>),
}

/// Outbound side of the relay channel.
///
/// Calls never block and never fail from the caller's point of view; a
/// message that cannot be sent is logged and dropped.
pub trait RelayEmitter: Send + Sync {
    fn join_note(&self, note: &NoteId);
    fn leave_note(&self, note: &NoteId);
    fn note_update(&self, note: &NoteId, updates: Updates);
    fn editing(&self, note: &NoteId, user: Option<UserRef>);
}

struct Shared {
    config: ClientConfig,
    state: RwLock<ConnectionState>,
    outgoing: Mutex<Option<mpsc::Sender<String>>>,
    joined: Mutex<HashSet<NoteId>>,
    closed: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn state(&self) -> ConnectionState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: ClientEvent) {
        if self.state() != ConnectionState::Connected {
            log::debug!("Not connected, dropping {}", event.name());
            return;
        }
        let frame = match event.encode() {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("Failed to encode {}: {e}", event.name());
                return;
            }
        };
        if let Some(tx) = lock(&self.outgoing).as_ref() {
            if let Err(e) = tx.try_send(frame) {
                log::warn!("Dropping {}: {e}", event.name());
            }
        }
    }
}

/// Connection lifecycle events never wait on the application; a full
/// event queue drops them.
fn publish_lifecycle(event_tx: &mpsc::Sender<RelayEvent>, event: RelayEvent) {
    if let Err(mpsc::error::TrySendError::Full(event)) = event_tx.try_send(event) {
        log::warn!("Event queue full, dropping {event:?}");
    }
}

/// The relay client.
pub struct RelayClient {
    shared: Arc<Shared>,
    event_rx: Option<mpsc::Receiver<RelayEvent>>,
    supervisor: Option<JoinHandle<()>>,
}

impl RelayClient {
    /// Connect to the server. Fails only if the first attempt fails;
    /// later drops are retried in the background.
    pub async fn connect(config: ClientConfig) -> Result<Self, ProtocolError> {
        let shared = Arc::new(Shared {
            config,
            state: RwLock::new(ConnectionState::Connecting),
            outgoing: Mutex::new(None),
            joined: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        });

        let ws = match Self::open(&shared.config.server_url).await {
            Ok(ws) => ws,
            Err(e) => {
                shared.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let (event_tx, event_rx) = mpsc::channel(shared.config.event_capacity);
        let supervisor = tokio::spawn(Self::supervise(shared.clone(), event_tx, ws));

        Ok(Self {
            shared,
            event_rx: Some(event_rx),
            supervisor: Some(supervisor),
        })
    }

    async fn open(url: &str) -> Result<WsStream, ProtocolError> {
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;
        Ok(ws)
    }

    async fn supervise(shared: Arc<Shared>, event_tx: mpsc::Sender<RelayEvent>, mut ws: WsStream) {
        loop {
            Self::run_connection(&shared, &event_tx, ws).await;

            shared.set_state(ConnectionState::Disconnected);
            publish_lifecycle(&event_tx, RelayEvent::Disconnected);
            if shared.closed.load(Ordering::SeqCst) {
                return;
            }

            shared.set_state(ConnectionState::Reconnecting);
            ws = loop {
                tokio::time::sleep(shared.config.reconnect_delay).await;
                if shared.closed.load(Ordering::SeqCst) {
                    return;
                }
                match Self::open(&shared.config.server_url).await {
                    Ok(ws) => break ws,
                    Err(e) => log::warn!("Reconnect to {} failed: {e}", shared.config.server_url),
                }
            };
            log::info!("Reconnected to {}", shared.config.server_url);
        }
    }

    async fn run_connection(shared: &Shared, event_tx: &mpsc::Sender<RelayEvent>, ws: WsStream) {
        let (mut writer, mut reader) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(shared.config.outgoing_capacity);

        // Rooms joined before a reconnect are joined again first.
        let rejoin: Vec<NoteId> = lock(&shared.joined).iter().cloned().collect();
        for note in rejoin {
            if let Ok(frame) = ClientEvent::JoinNote(note).encode() {
                let _ = out_tx.try_send(frame);
            }
        }
        {
            let mut outgoing = lock(&shared.outgoing);
            if shared.closed.load(Ordering::SeqCst) {
                return;
            }
            *outgoing = Some(out_tx);
        }

        // Writer task: drains the outgoing queue independently of how fast
        // the application reads incoming events.
        let mut writer_task = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = writer.send(Message::text(frame)).await {
                    log::warn!("Relay write failed: {e}");
                    return;
                }
            }
            let _ = writer.send(Message::Close(None)).await;
        });

        shared.set_state(ConnectionState::Connected);
        publish_lifecycle(event_tx, RelayEvent::Connected);

        // Reader: may wait on a slow event consumer without stalling writes.
        let read_loop = async {
            while let Some(msg) = reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let event = match ServerEvent::decode(text.as_str()) {
                            Ok(ServerEvent::NoteUpdated(updates)) => RelayEvent::NoteUpdated(updates),
                            Ok(ServerEvent::UserEditing(editing)) => RelayEvent::UserEditing(editing.user),
                            Err(e) => {
                                log::warn!("Ignoring relay frame: {e}");
                                continue;
                            }
                        };
                        if event_tx.send(event).await.is_err() {
                            log::debug!("Event receiver dropped, discarding relay traffic");
                        }
                    }
                    Ok(Message::Close(_)) => return,
                    Err(e) => {
                        log::warn!("Relay read failed: {e}");
                        return;
                    }
                    Ok(_) => {}
                }
            }
        };

        tokio::select! {
            _ = &mut writer_task => {}
            _ = read_loop => writer_task.abort(),
        }

        *lock(&shared.outgoing) = None;
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<RelayEvent>> {
        self.event_rx.take()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Rooms that will be re-joined after a reconnect.
    pub fn joined_notes(&self) -> HashSet<NoteId> {
        lock(&self.shared.joined).clone()
    }

    pub fn server_url(&self) -> &str {
        &self.shared.config.server_url
    }

    /// Send a close frame and wait for the background task to finish.
    pub async fn close(mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        lock(&self.shared.outgoing).take();
        if let Some(handle) = self.supervisor.take() {
            let _ = handle.await;
        }
    }
}

impl RelayEmitter for RelayClient {
    fn join_note(&self, note: &NoteId) {
        lock(&self.shared.joined).insert(note.clone());
        self.shared.emit(ClientEvent::JoinNote(note.clone()));
    }

    fn leave_note(&self, note: &NoteId) {
        lock(&self.shared.joined).remove(note);
        self.shared.emit(ClientEvent::LeaveNote(note.clone()));
    }

    fn note_update(&self, note: &NoteId, updates: Updates) {
        self.shared.emit(ClientEvent::NoteUpdate(NoteUpdate {
            note_id: note.clone(),
            updates,
        }));
    }

    fn editing(&self, note: &NoteId, user: Option<UserRef>) {
        self.shared.emit(ClientEvent::Editing(EditingSignal {
            note_id: note.clone(),
            user,
        }));
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        if let Some(handle) = self.supervisor.take() {
            handle.abort();
        }
    }
}

/// In-memory emitter that records every call.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingEmitter {
    pub(crate) sent: Mutex<Vec<ClientEvent>>,
}

#[cfg(test)]
impl RecordingEmitter {
    pub(crate) fn events(&self) -> Vec<ClientEvent> {
        lock(&self.sent).clone()
    }
}

#[cfg(test)]
impl RelayEmitter for RecordingEmitter {
    fn join_note(&self, note: &NoteId) {
        lock(&self.sent).push(ClientEvent::JoinNote(note.clone()));
    }

    fn leave_note(&self, note: &NoteId) {
        lock(&self.sent).push(ClientEvent::LeaveNote(note.clone()));
    }

    fn note_update(&self, note: &NoteId, updates: Updates) {
        lock(&self.sent).push(ClientEvent::NoteUpdate(NoteUpdate {
            note_id: note.clone(),
            updates,
        }));
    }

    fn editing(&self, note: &NoteId, user: Option<UserRef>) {
        lock(&self.sent).push(ClientEvent::Editing(EditingSignal {
            note_id: note.clone(),
            user,
        }));
    }
}
