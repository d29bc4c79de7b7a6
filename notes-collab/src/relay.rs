//! Live update relay.
//!
//! In-progress edits travel through the relay ahead of the durable write so
//! peers see them sooner. The store stays the source of truth: there is no
//! acknowledgment, retry or sequencing, and the last frame a client
//! receives for a field wins until the next fetch.

use notes_core::NoteDraft;
use serde_json::Value;

use crate::broadcast::{ConnectionId, Frame, RoomManager};
use crate::protocol::{NoteUpdate, ProtocolError, ServerEvent, Updates};

/// Forward `note-update` as `note-updated` to every other member of the
/// room. The `updates` object is passed through untouched.
pub async fn relay_note_update(
    rooms: &RoomManager,
    sender: ConnectionId,
    update: NoteUpdate,
) -> Result<usize, ProtocolError> {
    let NoteUpdate { note_id, updates } = update;
    let frame: Frame = ServerEvent::NoteUpdated(updates).encode()?.into();
    let delivered = rooms.broadcast(sender, &note_id, frame).await;
    log::debug!("note-update from {sender} in room {note_id} reached {delivered} peers");
    Ok(delivered)
}

/// Shallow merge of a `note-updated` payload into local editing state.
///
/// Known fields are replaced wholesale; unknown fields and values of the
/// wrong JSON type are skipped. Returns the number of fields applied.
pub fn merge_updates(draft: &mut NoteDraft, updates: &Updates) -> usize {
    let mut applied = 0;
    for (key, value) in updates {
        let ok = match (key.as_str(), value) {
            ("title", Value::String(s)) => {
                draft.title = s.clone();
                true
            }
            ("content", Value::String(s)) => {
                draft.content = s.clone();
                true
            }
            ("isPublic", Value::Bool(b)) => {
                draft.is_public = *b;
                true
            }
            ("tags", Value::Array(items)) => match string_array(items) {
                Some(tags) => {
                    draft.tags = tags;
                    true
                }
                None => false,
            },
            _ => false,
        };
        if ok {
            applied += 1;
        } else {
            log::debug!("Ignoring relayed field {key}");
        }
    }
    applied
}

fn string_array(items: &[Value]) -> Option<Vec<String>> {
    items
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}
