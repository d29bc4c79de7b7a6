//! Validated, authorized note operations.
//!
//! One method per HTTP route the web client calls. Path and body values
//! arrive as raw strings and are validated here; the requester is `None`
//! when the request carried no valid session.

use std::sync::Arc;

use crate::access::{can_delete, can_read, can_write};
use crate::error::{NotesError, NotesResult};
use crate::model::{Note, NoteDraft, NoteId, NotePatch, User, UserId};
use crate::store::NoteStore;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;
pub const MAX_TITLE_CHARS: usize = 200;

const SHARE_FAILED: &str =
    "Failed to add collaborator. The user must exist and not already be a collaborator.";

#[derive(Clone)]
pub struct NoteService {
    store: Arc<dyn NoteStore>,
}

impl NoteService {
    pub fn new(store: Arc<dyn NoteStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn NoteStore> {
        &self.store
    }

    /// Register a user in the directory. Credentials live elsewhere.
    pub fn register_user(&self, name: &str, email: &str) -> NotesResult<User> {
        let name = name.trim();
        let len = name.chars().count();
        if !(2..=50).contains(&len) {
            return Err(NotesError::validation("Name must be 2 to 50 characters"));
        }
        validate_email(email)?;
        let user = self.store.insert_user(User::new(name, email))?;
        log::info!("Registered user {}", user.id);
        Ok(user)
    }

    pub fn create(&self, requester: Option<&UserId>, draft: NoteDraft) -> NotesResult<Note> {
        let user = authenticated(requester)?;
        validate_title(&draft.title)?;
        let note = self.store.create_note(user, draft)?;
        log::info!("Note {} created by {}", note.id, user);
        Ok(note)
    }

    pub fn get(&self, requester: Option<&UserId>, note_id: &str) -> NotesResult<Note> {
        let user = authenticated(requester)?;
        let id = parse_note_id(note_id)?;
        match self.store.get_note(&id)? {
            Some(note) if can_read(&note, user) => Ok(note),
            _ => Err(NotesError::note_not_found()),
        }
    }

    /// Notes owned by or shared with the requester. `page` is zero based.
    pub fn list(
        &self,
        requester: Option<&UserId>,
        page: Option<usize>,
        page_size: Option<usize>,
    ) -> NotesResult<Vec<Note>> {
        let user = authenticated(requester)?;
        let page_size = match page_size {
            None | Some(0) => DEFAULT_PAGE_SIZE,
            Some(n) => n.min(MAX_PAGE_SIZE),
        };
        let notes = self
            .store
            .list_notes_for(user, page.unwrap_or(0), page_size)?;
        log::debug!("Listed {} notes for {}", notes.len(), user);
        Ok(notes)
    }

    pub fn update(
        &self,
        requester: Option<&UserId>,
        note_id: &str,
        patch: NotePatch,
    ) -> NotesResult<Note> {
        let user = authenticated(requester)?;
        let id = parse_note_id(note_id)?;
        if let Some(title) = &patch.title {
            validate_title(title)?;
        }
        let note = self
            .store
            .get_note(&id)?
            .ok_or_else(NotesError::note_not_found)?;
        if !can_write(&note, user) {
            log::warn!("User {user} may not update note {id}");
            return Err(NotesError::Forbidden(
                "Not authorized to update this note".into(),
            ));
        }
        let updated = self
            .store
            .update_note(&id, &patch)?
            .ok_or_else(NotesError::note_not_found)?;
        log::debug!("Note {id} updated by {user}");
        Ok(updated)
    }

    pub fn delete(&self, requester: Option<&UserId>, note_id: &str) -> NotesResult<()> {
        let user = authenticated(requester)?;
        let id = parse_note_id(note_id)?;
        let note = self
            .store
            .get_note(&id)?
            .ok_or_else(NotesError::note_not_found)?;
        if !can_delete(&note, user) {
            return Err(NotesError::Forbidden(
                "Not authorized to delete this note".into(),
            ));
        }
        if !self.store.delete_note(&id)? {
            return Err(NotesError::note_not_found());
        }
        log::info!("Note {id} deleted by {user}");
        Ok(())
    }

    /// Share a note with the user registered under `email`.
    ///
    /// Returns `Ok(None)` when the note or the user does not exist, or the
    /// user already collaborates. Any authenticated requester may share a
    /// note it can address by id; ownership is not checked.
    pub fn add_collaborator(
        &self,
        requester: Option<&UserId>,
        note_id: &str,
        email: &str,
    ) -> NotesResult<Option<Note>> {
        let user = authenticated(requester)?;
        let id = parse_note_id(note_id)?;
        if email.trim().is_empty() {
            return Err(NotesError::validation("Email is required"));
        }
        if self.store.get_note(&id)?.is_none() {
            return Ok(None);
        }
        let Some(collaborator) = self.store.find_user_by_email(email)? else {
            log::debug!("No user registered as {email}");
            return Ok(None);
        };
        let note = self.store.add_collaborator(&id, &collaborator.id)?;
        if note.is_some() {
            log::info!("{} added {} to note {id}", user, collaborator.id);
        }
        Ok(note)
    }

    /// `add_collaborator` followed by the collaborator listing, with the
    /// silent failure turned into a 400.
    pub fn share(
        &self,
        requester: Option<&UserId>,
        note_id: &str,
        email: &str,
    ) -> NotesResult<Vec<User>> {
        match self.add_collaborator(requester, note_id, email)? {
            Some(note) => self.resolve_users(&note.collaborators),
            None => Err(NotesError::validation(SHARE_FAILED)),
        }
    }

    /// Owner only. Returns `Ok(None)` if the note is missing or the
    /// requester does not own it.
    pub fn remove_collaborator(
        &self,
        requester: Option<&UserId>,
        note_id: &str,
        collaborator_id: &str,
    ) -> NotesResult<Option<Note>> {
        let user = authenticated(requester)?;
        let id = parse_note_id(note_id)?;
        if collaborator_id.is_empty() || collaborator_id == "undefined" {
            return Err(NotesError::validation("Invalid collaborator ID"));
        }
        match self.store.get_note(&id)? {
            Some(note) if note.is_owner(user) => self
                .store
                .remove_collaborator(&id, &UserId::new(collaborator_id)),
            _ => Ok(None),
        }
    }

    /// Collaborators with names and emails. Open to any authenticated user.
    pub fn list_collaborators(
        &self,
        requester: Option<&UserId>,
        note_id: &str,
    ) -> NotesResult<Vec<User>> {
        authenticated(requester)?;
        let id = parse_note_id(note_id)?;
        let note = self
            .store
            .get_note(&id)?
            .ok_or_else(NotesError::note_not_found)?;
        self.resolve_users(&note.collaborators)
    }

    fn resolve_users(&self, ids: &[UserId]) -> NotesResult<Vec<User>> {
        let mut users = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(user) = self.store.get_user(id)? {
                users.push(user);
            }
        }
        Ok(users)
    }
}

fn authenticated(requester: Option<&UserId>) -> NotesResult<&UserId> {
    requester.ok_or(NotesError::Unauthenticated)
}

fn parse_note_id(raw: &str) -> NotesResult<NoteId> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "undefined" {
        return Err(NotesError::validation("Invalid note ID"));
    }
    Ok(NoteId::new(raw))
}

fn validate_title(title: &str) -> NotesResult<()> {
    if title.trim().chars().count() > MAX_TITLE_CHARS {
        return Err(NotesError::validation(format!(
            "Title must be at most {MAX_TITLE_CHARS} characters"
        )));
    }
    Ok(())
}

fn validate_email(email: &str) -> NotesResult<()> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(NotesError::validation("Please provide a valid email")),
    }
}
