//! # notes-core: Note model, access rules and persistence contract
//!
//! Everything the real-time layer needs to know about a note without
//! touching a socket:
//!
//! - [`model`]: `Note`, `User`, `NoteDraft` and their JSON shapes
//! - [`error`]: request error taxonomy with HTTP status mapping
//! - [`access`]: who may read, write or delete a note
//! - [`store`]: the `NoteStore` contract and an in-memory implementation
//! - [`service`]: validated, authorized note operations (the HTTP surface)

pub mod access;
pub mod error;
pub mod model;
pub mod service;
pub mod store;

pub use access::{can_delete, can_read, can_write};
pub use error::{NotesError, NotesResult};
pub use model::{
    now_millis, Note, NoteDraft, NoteField, NoteId, NotePatch, User, UserId, UserRef,
};
pub use service::{NoteService, DEFAULT_PAGE_SIZE};
pub use store::{MemoryStore, NoteStore};
