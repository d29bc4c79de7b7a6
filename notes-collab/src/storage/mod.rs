//! Durable note storage.
//!
//! ```text
//! NoteService ──► dyn NoteStore ──┬── MemoryStore     (notes-core, tests)
//!                                 └── RocksNoteStore  (RocksDB)
//! ```

pub mod rocks;

pub use rocks::{RocksNoteStore, StoreConfig, StoreError};
