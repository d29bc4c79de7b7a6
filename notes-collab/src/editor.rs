//! One open note editor.
//!
//! Ties local editing state to auto-save, typing presence and the relay.
//! The current user, the relay emitter and the persistence client are
//! passed in at construction; nothing is looked up globally.

use std::sync::Arc;

use notes_core::{Note, NoteDraft, NoteField, NoteId, NotesResult, UserId, UserRef};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::autosave::{AutosaveConfig, AutosaveSession, EditorEvent, NotePersistence, SaveState};
use crate::client::{RelayEmitter, RelayEvent};
use crate::presence::{PresenceTracker, TypingIndicator, TypingLabel};
use crate::relay::merge_updates;

pub struct EditorSession {
    user: UserRef,
    draft: NoteDraft,
    owner: Option<UserId>,
    collaborators: Vec<UserId>,
    autosave: AutosaveSession,
    typing: TypingIndicator,
    presence: PresenceTracker,
    relay: Option<Arc<dyn RelayEmitter>>,
    error: Option<String>,
}

impl EditorSession {
    /// Editor for a note that does not exist yet. The note is created by
    /// the first auto-save.
    pub fn new_note<P: NotePersistence>(
        user: UserRef,
        persistence: Arc<P>,
        relay: Option<Arc<dyn RelayEmitter>>,
        config: &AutosaveConfig,
    ) -> Self {
        let autosave = AutosaveSession::spawn(persistence, relay.clone(), config, SaveState::new());
        Self::assemble(user, NoteDraft::default(), None, Vec::new(), autosave, relay, config)
    }

    /// Editor for a persisted note. Joins the note's room right away.
    pub fn open<P: NotePersistence>(
        user: UserRef,
        note: &Note,
        persistence: Arc<P>,
        relay: Option<Arc<dyn RelayEmitter>>,
        config: &AutosaveConfig,
    ) -> Self {
        let autosave = AutosaveSession::spawn(
            persistence,
            relay.clone(),
            config,
            SaveState::existing(note.id.clone()),
        );
        if let Some(relay) = &relay {
            relay.join_note(&note.id);
        }
        Self::assemble(
            user,
            NoteDraft::from_note(note),
            Some(note.user.clone()),
            note.collaborators.clone(),
            autosave,
            relay,
            config,
        )
    }

    fn assemble(
        user: UserRef,
        draft: NoteDraft,
        owner: Option<UserId>,
        collaborators: Vec<UserId>,
        autosave: AutosaveSession,
        relay: Option<Arc<dyn RelayEmitter>>,
        config: &AutosaveConfig,
    ) -> Self {
        let presence = PresenceTracker::new(user.id.clone());
        Self {
            user,
            draft,
            owner,
            collaborators,
            autosave,
            typing: TypingIndicator::new(config.typing_timeout),
            presence,
            relay,
            error: None,
        }
    }

    /// Apply a local edit: schedule a save and, once the note has an id,
    /// tell the room about it.
    pub fn handle_change(&mut self, field: NoteField, now: Instant) {
        self.draft.apply(field);
        self.autosave.schedule(self.draft.clone());

        let (Some(relay), Some(id)) = (&self.relay, self.autosave.note_id()) else {
            return;
        };
        relay.editing(&id, Some(self.user.clone()));
        relay.note_update(&id, self.draft.to_updates());
        self.typing.keystroke(now);
    }

    /// Send "stopped typing" once the quiet period is over.
    pub fn tick(&mut self, now: Instant) {
        if !self.typing.poll(now) {
            return;
        }
        if let (Some(relay), Some(id)) = (&self.relay, self.autosave.note_id()) {
            relay.editing(&id, None);
        }
    }

    /// When [`tick`](Self::tick) next has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.typing.deadline()
    }

    /// Apply relay traffic from other clients.
    pub fn apply_remote(&mut self, event: RelayEvent, now: Instant) {
        match event {
            RelayEvent::NoteUpdated(updates) => {
                merge_updates(&mut self.draft, &updates);
            }
            RelayEvent::UserEditing(user) => {
                self.presence.apply(user, now);
            }
            RelayEvent::Connected => log::debug!("Relay connected"),
            RelayEvent::Disconnected => log::debug!("Relay disconnected"),
        }
    }

    /// Apply the outcome of a background save.
    pub fn handle_editor_event(&mut self, event: EditorEvent) {
        match event {
            EditorEvent::Created(note) | EditorEvent::Saved(note) => {
                self.owner = Some(note.user);
                self.collaborators = note.collaborators;
                self.error = None;
            }
            EditorEvent::SaveFailed(message) => self.error = Some(message),
        }
    }

    pub fn typing_label(&self, now: Instant) -> Option<TypingLabel> {
        self.presence
            .label(self.owner.as_ref(), &self.collaborators, now)
    }

    /// Explicit save. Errors are returned to the caller and also shown.
    pub async fn save_now(&mut self) -> NotesResult<Note> {
        match self.autosave.save_now(self.draft.clone()).await {
            Ok(note) => {
                self.error = None;
                Ok(note)
            }
            Err(e) => {
                self.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub fn set_collaborators(&mut self, collaborators: Vec<UserId>) {
        self.collaborators = collaborators;
    }

    pub fn take_editor_events(&mut self) -> Option<mpsc::UnboundedReceiver<EditorEvent>> {
        self.autosave.take_event_rx()
    }

    pub fn draft(&self) -> &NoteDraft {
        &self.draft
    }

    pub fn note_id(&self) -> Option<NoteId> {
        self.autosave.note_id()
    }

    pub fn save_state(&self) -> SaveState {
        self.autosave.state()
    }

    /// Last save error, cleared by the next successful save.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Leave the note's room and stop auto-saving. A pending debounced
    /// save is abandoned.
    pub fn close(self) {
        if let (Some(relay), Some(id)) = (&self.relay, self.autosave.note_id()) {
            relay.leave_note(&id);
        }
    }
}
