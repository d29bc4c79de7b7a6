//! "User is typing" presence.
//!
//! ```text
//! keystroke ──► TypingIndicator ──► editing {user}      ──► server
//!                    │ (2s quiet)                              │
//!                    └────────────► editing {user: null} ──►   │
//!                                                              ▼
//!                                   user-editing to every other member
//!                                                              │
//!                                                              ▼
//!                                    PresenceTracker (ignores self)
//! ```
//!
//! The server keeps no presence state and never expires a signal. A peer
//! that drops mid-edit leaves its indicator showing on the other clients
//! until someone else types; [`PresenceTracker::with_ttl`] opts into a
//! client-side expiry.

use std::fmt;
use std::time::Duration;

use notes_core::{UserId, UserRef};
use tokio::time::Instant;

use crate::broadcast::{ConnectionId, Frame, RoomManager};
use crate::protocol::{EditingSignal, ProtocolError, ServerEvent, UserEditing};

/// Quiet period after the last keystroke before "stopped" is sent.
pub const TYPING_TIMEOUT: Duration = Duration::from_millis(2000);

// ───────────────────────────────────────────────────────────────────
// Server side
// ───────────────────────────────────────────────────────────────────

/// Forward an `editing` signal as `user-editing` to every other member of
/// the note's room. Only the sending connection is excluded; other
/// connections of the same user still get it.
pub async fn relay_editing(
    rooms: &RoomManager,
    sender: ConnectionId,
    signal: EditingSignal,
) -> Result<usize, ProtocolError> {
    let frame: Frame = ServerEvent::UserEditing(UserEditing { user: signal.user })
        .encode()?
        .into();
    let delivered = rooms.broadcast(sender, &signal.note_id, frame).await;
    log::trace!("Presence from {sender} in room {} reached {delivered} peers", signal.note_id);
    Ok(delivered)
}

// ───────────────────────────────────────────────────────────────────
// Client side
// ───────────────────────────────────────────────────────────────────

/// Local "stopped typing" timer. Every keystroke re-arms it.
#[derive(Debug, Clone)]
pub struct TypingIndicator {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl Default for TypingIndicator {
    fn default() -> Self {
        Self::new(TYPING_TIMEOUT)
    }
}

impl TypingIndicator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    /// Record a keystroke at `now`.
    pub fn keystroke(&mut self, now: Instant) {
        self.deadline = Some(now + self.timeout);
    }

    /// Returns `true` exactly once when the quiet period has elapsed; the
    /// caller then sends `editing {user: null}`.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_typing(&self) -> bool {
        self.deadline.is_some()
    }

    /// Forget the pending "stopped" signal without sending it.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

/// Who the typing user is relative to the note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingRole {
    Owner,
    Collaborator,
    Other,
}

/// Text shown next to the editor while a peer is typing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingLabel {
    pub role: TypingRole,
    pub name: String,
}

impl fmt::Display for TypingLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self.role {
            TypingRole::Owner => "Owner",
            TypingRole::Collaborator => "Collaborator",
            TypingRole::Other => return f.write_str("A user is typing..."),
        };
        if self.name.is_empty() {
            write!(f, "{role} is typing...")
        } else {
            write!(f, "{} ({role}) is typing...", self.name)
        }
    }
}

/// Remote typing state as seen by one client.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    local_user: UserId,
    ttl: Option<Duration>,
    current: Option<(UserRef, Instant)>,
}

impl PresenceTracker {
    /// Signals are kept until replaced or cleared.
    pub fn new(local_user: UserId) -> Self {
        Self {
            local_user,
            ttl: None,
            current: None,
        }
    }

    /// Signals older than `ttl` are treated as "stopped".
    pub fn with_ttl(local_user: UserId, ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::new(local_user)
        }
    }

    /// Apply an incoming `user-editing` payload. Returns `false` when the
    /// signal came from the local user and was ignored.
    ///
    /// Ignoring it leaves another user's indicator in place; the web editor
    /// instead overwrote the indicator with the local user and hid it.
    pub fn apply(&mut self, user: Option<UserRef>, now: Instant) -> bool {
        match user {
            Some(user) if user.id == self.local_user => false,
            Some(user) => {
                self.current = Some((user, now));
                true
            }
            None => {
                self.current = None;
                true
            }
        }
    }

    pub fn typing_user(&self, now: Instant) -> Option<&UserRef> {
        let (user, seen) = self.current.as_ref()?;
        match self.ttl {
            Some(ttl) if now.duration_since(*seen) >= ttl => None,
            _ => Some(user),
        }
    }

    /// Label for the current typing user, owner first, then collaborators.
    pub fn label(
        &self,
        owner: Option<&UserId>,
        collaborators: &[UserId],
        now: Instant,
    ) -> Option<TypingLabel> {
        let user = self.typing_user(now)?;
        let role = if owner == Some(&user.id) {
            TypingRole::Owner
        } else if collaborators.contains(&user.id) {
            TypingRole::Collaborator
        } else {
            TypingRole::Other
        };
        Some(TypingLabel {
            role,
            name: user.name.clone(),
        })
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}
