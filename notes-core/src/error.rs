//! Error taxonomy shared by the note service and the persistence path.

use thiserror::Error;

/// Result alias for note operations.
pub type NotesResult<T> = Result<T, NotesError>;

/// Failures surfaced by note operations.
///
/// `NotFound` is also used for notes the requester may not see, so that
/// existence is never leaked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotesError {
    #[error("{0}")]
    Validation(String),

    #[error("Not authenticated")]
    Unauthenticated,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl NotesError {
    pub fn validation(msg: impl Into<String>) -> Self {
        NotesError::Validation(msg.into())
    }

    pub fn note_not_found() -> Self {
        NotesError::NotFound("Note not found".into())
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            NotesError::Validation(_) => 400,
            NotesError::Unauthenticated => 401,
            NotesError::Forbidden(_) => 403,
            NotesError::NotFound(_) => 404,
            NotesError::Transient(_) | NotesError::Storage(_) => 500,
        }
    }
}
