//! Note access rules.
//!
//! | Operation | Owner | Collaborator | Anyone (public note) |
//! |-----------|-------|--------------|----------------------|
//! | read      | yes   | yes          | yes                  |
//! | write     | yes   | yes          | no                   |
//! | delete    | yes   | no           | no                   |
//!
//! Adding collaborators is intentionally not gated here; see
//! [`NoteService::add_collaborator`](crate::service::NoteService::add_collaborator).

use crate::model::{Note, UserId};

pub fn can_read(note: &Note, user: &UserId) -> bool {
    note.is_public || note.is_owner(user) || note.is_collaborator(user)
}

pub fn can_write(note: &Note, user: &UserId) -> bool {
    note.is_owner(user) || note.is_collaborator(user)
}

pub fn can_delete(note: &Note, user: &UserId) -> bool {
    note.is_owner(user)
}
