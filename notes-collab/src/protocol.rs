//! Wire protocol for the relay channel.
//!
//! Every WebSocket text frame carries one JSON envelope:
//!
//! ```text
//! {"event": "<name>", "data": <payload>}
//! ```
//!
//! | Event        | Direction     | data                                   |
//! |--------------|---------------|----------------------------------------|
//! | join-note    | client→server | `"noteId"`                             |
//! | leave-note   | client→server | `"noteId"`                             |
//! | note-update  | client→server | `{"noteId": "...", "updates": {...}}`  |
//! | editing      | client→server | `{"noteId": "...", "user": {..}/null}` |
//! | note-updated | server→peers  | the `updates` object, verbatim         |
//! | user-editing | server→peers  | `{"user": {"_id", "name"} / null}`     |

use notes_core::{NoteId, UserRef};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Partial note fields, keyed by their JSON names.
pub type Updates = Map<String, Value>;

/// Events a client sends to the relay server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinNote(NoteId),
    LeaveNote(NoteId),
    NoteUpdate(NoteUpdate),
    Editing(EditingSignal),
}

/// Events the relay server forwards to the other members of a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    NoteUpdated(Updates),
    UserEditing(UserEditing),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteUpdate {
    pub note_id: NoteId,
    #[serde(default)]
    pub updates: Updates,
}

/// Presence signal. `user: None` means "stopped typing".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditingSignal {
    pub note_id: NoteId,
    #[serde(default)]
    pub user: Option<UserRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEditing {
    #[serde(default)]
    pub user: Option<UserRef>,
}

impl ClientEvent {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        encode_frame(self)
    }

    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        decode_frame(frame)
    }

    /// Event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinNote(_) => "join-note",
            ClientEvent::LeaveNote(_) => "leave-note",
            ClientEvent::NoteUpdate(_) => "note-update",
            ClientEvent::Editing(_) => "editing",
        }
    }
}

impl ServerEvent {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        encode_frame(self)
    }

    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        decode_frame(frame)
    }
}

fn encode_frame<T: Serialize>(event: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(event).map_err(|e| ProtocolError::Serialization(e.to_string()))
}

fn decode_frame<T: DeserializeOwned>(frame: &str) -> Result<T, ProtocolError> {
    serde_json::from_str(frame).map_err(|e| ProtocolError::Deserialization(e.to_string()))
}

/// Protocol and transport errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<ProtocolError> for notes_core::NotesError {
    fn from(e: ProtocolError) -> Self {
        notes_core::NotesError::Transient(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_note_wire_format() {
        let frame = ClientEvent::JoinNote(NoteId::new("n1")).encode().unwrap();
        assert_eq!(frame, r#"{"event":"join-note","data":"n1"}"#);
    }

    #[test]
    fn test_decode_note_update() {
        let frame = r#"{"event":"note-update","data":{"noteId":"n1","updates":{"content":"Hello"}}}"#;
        match ClientEvent::decode(frame).unwrap() {
            ClientEvent::NoteUpdate(update) => {
                assert_eq!(update.note_id, NoteId::new("n1"));
                assert_eq!(update.updates["content"], "Hello");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_editing_with_null_user() {
        let frame = r#"{"event":"editing","data":{"noteId":"n1","user":null}}"#;
        let event = ClientEvent::decode(frame).unwrap();
        assert_eq!(
            event,
            ClientEvent::Editing(EditingSignal {
                note_id: NoteId::new("n1"),
                user: None,
            })
        );
        assert_eq!(event.name(), "editing");
    }

    #[test]
    fn test_user_editing_wire_format() {
        let event = ServerEvent::UserEditing(UserEditing {
            user: Some(UserRef::new("u1", "Alice")),
        });
        let value: Value = serde_json::from_str(&event.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"event": "user-editing", "data": {"user": {"_id": "u1", "name": "Alice"}}})
        );

        let stopped = ServerEvent::UserEditing(UserEditing { user: None });
        let value: Value = serde_json::from_str(&stopped.encode().unwrap()).unwrap();
        assert_eq!(value["data"]["user"], Value::Null);
    }

    #[test]
    fn test_note_updated_carries_updates_verbatim() {
        let mut updates = Updates::new();
        updates.insert("content".into(), json!("Hello"));
        updates.insert("customField".into(), json!({"nested": [1, 2]}));
        let frame = ServerEvent::NoteUpdated(updates.clone()).encode().unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "note-updated");
        assert_eq!(value["data"], Value::Object(updates));
    }

    #[test]
    fn test_malformed_frames_rejected() {
        for frame in [
            "not json",
            r#"{"event":"unknown","data":1}"#,
            r#"{"event":"join-note"}"#,
            r#"{"event":"note-update","data":{"updates":{}}}"#,
        ] {
            let err = ClientEvent::decode(frame).unwrap_err();
            assert!(matches!(err, ProtocolError::Deserialization(_)), "{frame}");
        }
    }

    #[test]
    fn test_protocol_error_maps_to_transient() {
        let err: notes_core::NotesError = ProtocolError::ConnectionClosed.into();
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.to_string(), "Transient failure: Connection closed");
    }
}
