//! RocksDB-backed note store.
//!
//! Column families:
//! - `notes` : note documents keyed by note id (bincode, LZ4 compressed)
//! - `users` : user records keyed by user id (bincode, LZ4 compressed)
//! - `emails`: normalized email → user id index
//!
//! Read-modify-write operations (update, collaborator changes, user
//! registration) are serialized by a store-wide write lock, so a
//! collaborator append never loses a concurrent one.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use notes_core::store::{normalize_email, select_page};
use notes_core::{
    now_millis, Note, NoteDraft, NoteId, NotePatch, NoteStore, NotesError, NotesResult, User,
    UserId,
};
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamily, ColumnFamilyDescriptor, DBCompressionType,
    DBWithThreadMode, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

const CF_NOTES: &str = "notes";
const CF_USERS: &str = "users";
const CF_EMAILS: &str = "emails";

const COLUMN_FAMILIES: &[&str] = &[CF_NOTES, CF_USERS, CF_EMAILS];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("notes_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
        }
    }
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Small caches for tests.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
        }
    }
}

/// Storage errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Compression error: {0}")]
    Compression(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<StoreError> for NotesError {
    fn from(e: StoreError) -> Self {
        NotesError::Storage(e.to_string())
    }
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    let bytes = bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(lz4_flex::compress_prepend_size(&bytes))
}

fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let raw = lz4_flex::decompress_size_prepended(bytes)
        .map_err(|e| StoreError::Compression(e.to_string()))?;
    let (value, _) = bincode::serde::decode_from_slice(&raw, bincode::config::standard())
        .map_err(|e| StoreError::Deserialization(e.to_string()))?;
    Ok(value)
}

/// Durable [`NoteStore`] on RocksDB.
pub struct RocksNoteStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Guards read-modify-write sequences; holds the last issued timestamp.
    write_lock: Mutex<u64>,
}

impl RocksNoteStore {
    /// Open the store, creating the database and column families if needed.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;
        log::info!("Opened note store at {}", config.path.display());

        Ok(Self {
            db,
            config,
            write_lock: Mutex::new(0),
        })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);

        match name {
            // Values are already LZ4 compressed.
            CF_NOTES | CF_USERS => opts.set_compression_type(DBCompressionType::None),
            CF_EMAILS => {
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.optimize_for_point_lookup((config.block_cache_size / (1024 * 1024)).max(1) as u64);
            }
            _ => {}
        }

        opts
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }

    fn write_opts(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.config.sync_writes);
        opts
    }

    fn lock(&self) -> MutexGuard<'_, u64> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Strictly increasing timestamp; caller holds the write lock.
    fn stamp(last: &mut u64) -> u64 {
        let now = now_millis().max(*last + 1);
        *last = now;
        now
    }

    fn get_value<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>, StoreError> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_note(&self, note: &Note) -> Result<(), StoreError> {
        let cf = self.cf(CF_NOTES)?;
        self.db
            .put_cf_opt(cf, note.id.as_str().as_bytes(), encode_value(note)?, &self.write_opts())?;
        Ok(())
    }

    fn load_note(&self, id: &NoteId) -> Result<Option<Note>, StoreError> {
        self.get_value(CF_NOTES, id.as_str().as_bytes())
    }

    fn all_notes(&self) -> Result<Vec<Note>, StoreError> {
        let cf = self.cf(CF_NOTES)?;
        let mut notes = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            notes.push(decode_value(&value)?);
        }
        Ok(notes)
    }

    pub fn note_count(&self) -> Result<usize, StoreError> {
        let cf = self.cf(CF_NOTES)?;
        let mut count = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }
}

impl NoteStore for RocksNoteStore {
    fn create_note(&self, owner: &UserId, draft: NoteDraft) -> NotesResult<Note> {
        let mut last = self.lock();
        let now = Self::stamp(&mut last);
        let note = Note::from_draft(NoteId::generate(), owner.clone(), draft, now);
        self.put_note(&note)?;
        Ok(note)
    }

    fn get_note(&self, id: &NoteId) -> NotesResult<Option<Note>> {
        Ok(self.load_note(id)?)
    }

    fn update_note(&self, id: &NoteId, patch: &NotePatch) -> NotesResult<Option<Note>> {
        let mut last = self.lock();
        let Some(mut note) = self.load_note(id)? else {
            return Ok(None);
        };
        note.apply_patch(patch, Self::stamp(&mut last));
        self.put_note(&note)?;
        Ok(Some(note))
    }

    fn delete_note(&self, id: &NoteId) -> NotesResult<bool> {
        let _guard = self.lock();
        if self.load_note(id)?.is_none() {
            return Ok(false);
        }
        let cf = self.cf(CF_NOTES)?;
        self.db
            .delete_cf_opt(cf, id.as_str().as_bytes(), &self.write_opts())
            .map_err(StoreError::from)?;
        Ok(true)
    }

    fn list_notes_for(
        &self,
        user: &UserId,
        page: usize,
        page_size: usize,
    ) -> NotesResult<Vec<Note>> {
        let visible = self
            .all_notes()?
            .into_iter()
            .filter(|n| n.is_owner(user) || n.is_collaborator(user))
            .collect();
        Ok(select_page(visible, page, page_size))
    }

    fn add_collaborator(&self, id: &NoteId, user: &UserId) -> NotesResult<Option<Note>> {
        let mut last = self.lock();
        let Some(mut note) = self.load_note(id)? else {
            return Ok(None);
        };
        if !note.push_collaborator(user.clone()) {
            return Ok(None);
        }
        note.updated_at = Self::stamp(&mut last);

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_NOTES)?, note.id.as_str().as_bytes(), encode_value(&note)?);
        self.db
            .write_opt(batch, &self.write_opts())
            .map_err(StoreError::from)?;
        Ok(Some(note))
    }

    fn remove_collaborator(&self, id: &NoteId, user: &UserId) -> NotesResult<Option<Note>> {
        let mut last = self.lock();
        let Some(mut note) = self.load_note(id)? else {
            return Ok(None);
        };
        note.collaborators.retain(|c| c != user);
        note.updated_at = Self::stamp(&mut last);
        self.put_note(&note)?;
        Ok(Some(note))
    }

    fn insert_user(&self, mut user: User) -> NotesResult<User> {
        let _guard = self.lock();
        user.email = normalize_email(&user.email);
        let cf_emails = self.cf(CF_EMAILS)?;
        if self
            .db
            .get_cf(cf_emails, user.email.as_bytes())
            .map_err(StoreError::from)?
            .is_some()
        {
            return Err(NotesError::validation("Email already registered"));
        }

        // User record and email index land together or not at all.
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_USERS)?, user.id.as_str().as_bytes(), encode_value(&user)?);
        batch.put_cf(cf_emails, user.email.as_bytes(), user.id.as_str().as_bytes());
        self.db
            .write_opt(batch, &self.write_opts())
            .map_err(StoreError::from)?;
        Ok(user)
    }

    fn find_user_by_email(&self, email: &str) -> NotesResult<Option<User>> {
        let cf_emails = self.cf(CF_EMAILS)?;
        let id = self
            .db
            .get_cf(cf_emails, normalize_email(email).as_bytes())
            .map_err(StoreError::from)?;
        match id {
            Some(id) => Ok(self.get_value(CF_USERS, &id)?),
            None => Ok(None),
        }
    }

    fn get_user(&self, id: &UserId) -> NotesResult<Option<User>> {
        Ok(self.get_value(CF_USERS, id.as_str().as_bytes())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, RocksNoteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksNoteStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
        (dir, store)
    }

    fn draft(title: &str, content: &str) -> NoteDraft {
        NoteDraft {
            title: title.into(),
            content: content.into(),
            is_public: false,
            tags: vec!["work".into()],
        }
    }

    #[test]
    fn test_value_codec_compresses() {
        let note = Note::from_draft(
            NoteId::new("n1"),
            UserId::new("u1"),
            draft("T", &"abc".repeat(500)),
            1,
        );
        let bytes = encode_value(&note).unwrap();
        assert!(bytes.len() < 1500);
        let decoded: Note = decode_value(&bytes).unwrap();
        assert_eq!(decoded, note);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = decode_value::<Note>(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, StoreError::Compression(_)));
    }

    #[test]
    fn test_create_update_delete() {
        let (_dir, store) = open_temp();
        let owner = UserId::new("alice");
        let note = store.create_note(&owner, draft("Draft", "")).unwrap();

        let patch = NotePatch {
            content: Some("Hello".into()),
            ..NotePatch::default()
        };
        let updated = store.update_note(&note.id, &patch).unwrap().unwrap();
        assert_eq!(updated.content, "Hello");
        assert_eq!(updated.title, "Draft");
        assert!(updated.updated_at > note.updated_at);

        assert!(store.delete_note(&note.id).unwrap());
        assert!(!store.delete_note(&note.id).unwrap());
        assert!(store.update_note(&note.id, &patch).unwrap().is_none());
    }

    #[test]
    fn test_notes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let id = {
            let store = RocksNoteStore::open(StoreConfig::for_testing(&path)).unwrap();
            store
                .create_note(&UserId::new("alice"), draft("Persisted", "body"))
                .unwrap()
                .id
        };

        let store = RocksNoteStore::open(StoreConfig::for_testing(&path)).unwrap();
        let note = store.get_note(&id).unwrap().unwrap();
        assert_eq!(note.title, "Persisted");
        assert_eq!(note.tags, vec!["work".to_string()]);
        assert_eq!(store.note_count().unwrap(), 1);
    }

    #[test]
    fn test_collaborator_append_once() {
        let (_dir, store) = open_temp();
        let note = store.create_note(&UserId::new("alice"), draft("n", "")).unwrap();
        let bob = UserId::new("bob");

        assert!(store.add_collaborator(&note.id, &bob).unwrap().is_some());
        assert!(store.add_collaborator(&note.id, &bob).unwrap().is_none());
        assert!(store
            .add_collaborator(&NoteId::new("missing"), &bob)
            .unwrap()
            .is_none());
        assert_eq!(store.get_note(&note.id).unwrap().unwrap().collaborators, vec![bob.clone()]);

        let removed = store.remove_collaborator(&note.id, &bob).unwrap().unwrap();
        assert!(removed.collaborators.is_empty());
    }

    #[test]
    fn test_concurrent_collaborator_appends_are_kept() {
        let (_dir, store) = open_temp();
        let note = store.create_note(&UserId::new("alice"), draft("n", "")).unwrap();

        std::thread::scope(|s| {
            for i in 0..8 {
                let store = &store;
                let id = note.id.clone();
                s.spawn(move || {
                    store
                        .add_collaborator(&id, &UserId::new(format!("user{i}")))
                        .unwrap();
                });
            }
        });

        let note = store.get_note(&note.id).unwrap().unwrap();
        assert_eq!(note.collaborators.len(), 8);
    }

    #[test]
    fn test_list_for_user() {
        let (_dir, store) = open_temp();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let mine = store.create_note(&alice, draft("mine", "")).unwrap();
        let shared = store.create_note(&bob, draft("shared", "")).unwrap();
        store.create_note(&bob, draft("bob only", "")).unwrap();
        store.add_collaborator(&shared.id, &alice).unwrap();

        let notes = store.list_notes_for(&alice, 0, 10).unwrap();
        let ids: Vec<&NoteId> = notes.iter().map(|n| &n.id).collect();
        assert_eq!(ids, vec![&shared.id, &mine.id]);
        assert_eq!(store.list_notes_for(&alice, 1, 1).unwrap()[0].id, mine.id);
    }

    #[test]
    fn test_user_directory() {
        let (_dir, store) = open_temp();
        let bob = store.insert_user(User::new("Bob", " Bob@Example.com ")).unwrap();
        assert_eq!(bob.email, "bob@example.com");

        let found = store.find_user_by_email("BOB@example.com").unwrap().unwrap();
        assert_eq!(found, bob);
        assert_eq!(store.get_user(&bob.id).unwrap().unwrap().name, "Bob");
        assert!(store.find_user_by_email("nobody@example.com").unwrap().is_none());

        let err = store.insert_user(User::new("Bob 2", "bob@example.com")).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
