//! # notes-collab: Real-time relay and editing layer for collaborative notes
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   JSON events    ┌──────────────┐
//! │ RelayClient  │ ◄──────────────► │ RelayServer  │
//! │ (per editor) │   over WebSocket │ (stateless)  │
//! └──────┬───────┘                  └──────┬───────┘
//!        │                                 │
//!        ▼                                 ▼
//! ┌──────────────┐                  ┌──────────────┐
//! │ EditorSession│                  │ RoomManager  │
//! │ + Autosave   │                  │ (per noteId) │
//! └──────┬───────┘                  └──────────────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │ NoteService  │ ──► MemoryStore / RocksNoteStore
//! └──────────────┘
//! ```
//!
//! The relay never touches note storage. Clients persist through the
//! note service and use the relay only to tell each other what changed.
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire events (`join-note`, `note-update`, ...)
//! - [`broadcast`]: room membership and fan-out with backpressure
//! - [`relay`]: `note-update` forwarding and remote merge
//! - [`presence`]: `editing` forwarding and typing indicators
//! - [`server`]: WebSocket relay server
//! - [`client`]: reconnecting relay client
//! - [`autosave`]: debounced create-then-update persistence
//! - [`editor`]: one open note, tying the above together
//! - [`storage`]: RocksDB note store

pub mod autosave;
pub mod broadcast;
pub mod client;
pub mod editor;
pub mod presence;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod storage;

// Re-exports for convenience
pub use autosave::{
    AutosaveConfig, AutosaveSession, Debouncer, EditorEvent, NotePersistence, SaveAction,
    SavePhase, SaveState, ServicePersistence,
};
pub use broadcast::{BroadcastGroup, BroadcastStats, ConnectionId, RoomError, RoomManager};
pub use client::{ClientConfig, ConnectionState, RelayClient, RelayEmitter, RelayEvent};
pub use editor::EditorSession;
pub use presence::{PresenceTracker, TypingIndicator, TypingLabel, TypingRole, TYPING_TIMEOUT};
pub use protocol::{
    ClientEvent, EditingSignal, NoteUpdate, ProtocolError, ServerEvent, UserEditing, Updates,
};
pub use relay::merge_updates;
pub use server::{RelayServer, ServerConfig, ServerStats};
pub use storage::{RocksNoteStore, StoreConfig, StoreError};
