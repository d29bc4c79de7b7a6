//! Note and user records.
//!
//! Field names on the wire follow the JSON documents the web client already
//! speaks: `_id`, `isPublic`, `createdAt`, `updatedAt`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Milliseconds since the unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Identifier of a persisted note. Also names the relay room for that note.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(String);

impl NoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier (32 lowercase hex chars).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NoteId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identity carried in presence signals: `{"_id": ..., "name": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    #[serde(rename = "_id")]
    pub id: UserId,
    #[serde(default)]
    pub name: String,
}

impl UserRef {
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A registered user as exposed to other users (no credentials).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub name: String,
    pub email: String,
}

impl User {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: UserId::generate(),
            name: name.into(),
            email: email.into(),
        }
    }

    pub fn to_ref(&self) -> UserRef {
        UserRef {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

/// The durable note document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    #[serde(rename = "_id")]
    pub id: NoteId,
    pub title: String,
    pub content: String,
    pub is_public: bool,
    /// Owner. Never changes after creation.
    pub user: UserId,
    /// Explicit collaborators, insertion ordered, no duplicates.
    pub collaborators: Vec<UserId>,
    pub tags: Vec<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Note {
    /// Build a new note owned by `owner` from editor state.
    pub fn from_draft(id: NoteId, owner: UserId, draft: NoteDraft, now: u64) -> Self {
        Self {
            id,
            title: draft.title.trim().to_string(),
            content: draft.content,
            is_public: draft.is_public,
            user: owner,
            collaborators: Vec::new(),
            tags: clean_tags(draft.tags),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owner(&self, user: &UserId) -> bool {
        &self.user == user
    }

    pub fn is_collaborator(&self, user: &UserId) -> bool {
        self.collaborators.iter().any(|c| c == user)
    }

    /// Apply a partial update. Fields absent from the patch are untouched.
    pub fn apply_patch(&mut self, patch: &NotePatch, now: u64) {
        if let Some(title) = &patch.title {
            self.title = title.trim().to_string();
        }
        if let Some(content) = &patch.content {
            self.content = content.clone();
        }
        if let Some(is_public) = patch.is_public {
            self.is_public = is_public;
        }
        if let Some(tags) = &patch.tags {
            self.tags = clean_tags(tags.clone());
        }
        self.updated_at = now.max(self.updated_at);
    }

    /// Append a collaborator. Returns `false` when already present.
    pub fn push_collaborator(&mut self, user: UserId) -> bool {
        if self.is_collaborator(&user) {
            return false;
        }
        self.collaborators.push(user);
        true
    }
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Local editing state of one editor session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteDraft {
    pub title: String,
    pub content: String,
    pub is_public: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Default for NoteDraft {
    fn default() -> Self {
        Self {
            title: String::new(),
            content: String::new(),
            is_public: true,
            tags: Vec::new(),
        }
    }
}

impl NoteDraft {
    pub fn from_note(note: &Note) -> Self {
        Self {
            title: note.title.clone(),
            content: note.content.clone(),
            is_public: note.is_public,
            tags: note.tags.clone(),
        }
    }

    /// Replace one field.
    pub fn apply(&mut self, field: NoteField) {
        match field {
            NoteField::Title(title) => self.title = title,
            NoteField::Content(content) => self.content = content,
            NoteField::IsPublic(is_public) => self.is_public = is_public,
            NoteField::Tags(tags) => self.tags = tags,
        }
    }

    /// The whole draft as a relay `updates` object.
    pub fn to_updates(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("title".into(), Value::String(self.title.clone()));
        map.insert("content".into(), Value::String(self.content.clone()));
        map.insert("isPublic".into(), Value::Bool(self.is_public));
        map.insert(
            "tags".into(),
            Value::Array(self.tags.iter().cloned().map(Value::String).collect()),
        );
        map
    }
}

/// A single edited field.
#[derive(Debug, Clone, PartialEq)]
pub enum NoteField {
    Title(String),
    Content(String),
    IsPublic(bool),
    Tags(Vec<String>),
}

impl NoteField {
    /// Wire name of the field.
    pub fn name(&self) -> &'static str {
        match self {
            NoteField::Title(_) => "title",
            NoteField::Content(_) => "content",
            NoteField::IsPublic(_) => "isPublic",
            NoteField::Tags(_) => "tags",
        }
    }

    /// Tags typed as a comma separated list.
    pub fn tags_from_input(raw: &str) -> Self {
        NoteField::Tags(raw.split(',').map(|t| t.trim().to_string()).collect())
    }
}

/// Partial update sent to the store. `None` leaves the field as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl From<NoteDraft> for NotePatch {
    fn from(draft: NoteDraft) -> Self {
        Self {
            title: Some(draft.title),
            content: Some(draft.content),
            is_public: Some(draft.is_public),
            tags: Some(draft.tags),
        }
    }
}

impl NotePatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.is_public.is_none()
            && self.tags.is_none()
    }
}
