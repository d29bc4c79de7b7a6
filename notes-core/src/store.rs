//! Persistence contract for notes and the user directory.
//!
//! The document database is an external collaborator; the real-time layer
//! only relies on this trait. [`MemoryStore`] is the process-local
//! implementation used by tests and single-node deployments.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{NotesError, NotesResult};
use crate::model::{now_millis, Note, NoteDraft, NoteId, NotePatch, User, UserId};

/// Durable storage for notes and users.
///
/// `None` / `false` results mean "not found"; authorization is the caller's
/// job and never shows up here.
pub trait NoteStore: Send + Sync {
    /// Persist a new note owned by `owner` and return it with its id.
    fn create_note(&self, owner: &UserId, draft: NoteDraft) -> NotesResult<Note>;

    fn get_note(&self, id: &NoteId) -> NotesResult<Option<Note>>;

    fn update_note(&self, id: &NoteId, patch: &NotePatch) -> NotesResult<Option<Note>>;

    fn delete_note(&self, id: &NoteId) -> NotesResult<bool>;

    /// Notes owned by or shared with `user`, newest first.
    fn list_notes_for(&self, user: &UserId, page: usize, page_size: usize)
        -> NotesResult<Vec<Note>>;

    /// Atomically append `user` to the collaborator set.
    ///
    /// Returns `None` if the note is missing or `user` is already listed.
    fn add_collaborator(&self, id: &NoteId, user: &UserId) -> NotesResult<Option<Note>>;

    /// Returns `None` if the note is missing.
    fn remove_collaborator(&self, id: &NoteId, user: &UserId) -> NotesResult<Option<Note>>;

    /// Register a user. Fails with a validation error if the email is taken.
    fn insert_user(&self, user: User) -> NotesResult<User>;

    fn find_user_by_email(&self, email: &str) -> NotesResult<Option<User>>;

    fn get_user(&self, id: &UserId) -> NotesResult<Option<User>>;
}

/// Emails are matched case-insensitively.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Sort newest first and cut out one page.
pub fn select_page(mut notes: Vec<Note>, page: usize, page_size: usize) -> Vec<Note> {
    notes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    notes
        .into_iter()
        .skip(page.saturating_mul(page_size))
        .take(page_size)
        .collect()
}

#[derive(Default)]
struct MemoryInner {
    notes: HashMap<NoteId, Note>,
    users: HashMap<UserId, User>,
    last_stamp: u64,
}

impl MemoryInner {
    /// Strictly increasing timestamps so creation order is total.
    fn stamp(&mut self) -> u64 {
        let now = now_millis().max(self.last_stamp + 1);
        self.last_stamp = now;
        now
    }
}

/// `RwLock<HashMap>` backed store.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_count(&self) -> usize {
        self.inner.read().map(|i| i.notes.len()).unwrap_or(0)
    }

    fn read(&self) -> NotesResult<std::sync::RwLockReadGuard<'_, MemoryInner>> {
        self.inner
            .read()
            .map_err(|e| NotesError::Storage(e.to_string()))
    }

    fn write(&self) -> NotesResult<std::sync::RwLockWriteGuard<'_, MemoryInner>> {
        self.inner
            .write()
            .map_err(|e| NotesError::Storage(e.to_string()))
    }
}

impl NoteStore for MemoryStore {
    fn create_note(&self, owner: &UserId, draft: NoteDraft) -> NotesResult<Note> {
        let mut inner = self.write()?;
        let now = inner.stamp();
        let note = Note::from_draft(NoteId::generate(), owner.clone(), draft, now);
        inner.notes.insert(note.id.clone(), note.clone());
        Ok(note)
    }

    fn get_note(&self, id: &NoteId) -> NotesResult<Option<Note>> {
        Ok(self.read()?.notes.get(id).cloned())
    }

    fn update_note(&self, id: &NoteId, patch: &NotePatch) -> NotesResult<Option<Note>> {
        let mut inner = self.write()?;
        let now = inner.stamp();
        Ok(inner.notes.get_mut(id).map(|note| {
            note.apply_patch(patch, now);
            note.clone()
        }))
    }

    fn delete_note(&self, id: &NoteId) -> NotesResult<bool> {
        Ok(self.write()?.notes.remove(id).is_some())
    }

    fn list_notes_for(
        &self,
        user: &UserId,
        page: usize,
        page_size: usize,
    ) -> NotesResult<Vec<Note>> {
        let inner = self.read()?;
        let visible = inner
            .notes
            .values()
            .filter(|n| n.is_owner(user) || n.is_collaborator(user))
            .cloned()
            .collect();
        Ok(select_page(visible, page, page_size))
    }

    fn add_collaborator(&self, id: &NoteId, user: &UserId) -> NotesResult<Option<Note>> {
        let mut inner = self.write()?;
        let now = inner.stamp();
        let Some(note) = inner.notes.get_mut(id) else {
            return Ok(None);
        };
        if !note.push_collaborator(user.clone()) {
            return Ok(None);
        }
        note.updated_at = now;
        Ok(Some(note.clone()))
    }

    fn remove_collaborator(&self, id: &NoteId, user: &UserId) -> NotesResult<Option<Note>> {
        let mut inner = self.write()?;
        let now = inner.stamp();
        Ok(inner.notes.get_mut(id).map(|note| {
            note.collaborators.retain(|c| c != user);
            note.updated_at = now;
            note.clone()
        }))
    }

    fn insert_user(&self, mut user: User) -> NotesResult<User> {
        let mut inner = self.write()?;
        user.email = normalize_email(&user.email);
        if inner.users.values().any(|u| u.email == user.email) {
            return Err(NotesError::validation("Email already registered"));
        }
        inner.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    fn find_user_by_email(&self, email: &str) -> NotesResult<Option<User>> {
        let wanted = normalize_email(email);
        Ok(self
            .read()?
            .users
            .values()
            .find(|u| u.email == wanted)
            .cloned())
    }

    fn get_user(&self, id: &UserId) -> NotesResult<Option<User>> {
        Ok(self.read()?.users.get(id).cloned())
    }
}
