//! Debounced auto-save.
//!
//! Every edit schedules the full draft. A trailing-edge [`Debouncer`]
//! collapses bursts so only the last draft before a quiet window is
//! written. What a flush does depends on the session's [`SaveState`]:
//!
//! ```text
//!            flush / Create            create ok(id)
//!   NEW ───────────────────► CREATING ─────────────► HAS_ID ──┐
//!    ▲                         │  │                     ▲     │ flush / Update(id)
//!    └──── create failed ──────┘  └ flush / Drop        └─────┘
//! ```
//!
//! Persistence calls run concurrently on spawned tasks. Nothing cancels
//! them: closing a session abandons the timer, and results that arrive
//! afterwards are discarded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use notes_core::{Note, NoteDraft, NoteId, NotePatch, NoteService, NotesError, NotesResult, UserId};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::client::RelayEmitter;
use crate::presence::TYPING_TIMEOUT;

/// Message shown when a background save fails for a non-user reason.
pub const AUTOSAVE_FAILED: &str = "Failed to auto-save note";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutosaveConfig {
    /// Quiet window before a scheduled draft is written
    pub save_delay: Duration,
    /// Quiet window before "stopped typing" is sent
    pub typing_timeout: Duration,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            save_delay: Duration::from_millis(1000),
            typing_timeout: TYPING_TIMEOUT,
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Debounce
// ───────────────────────────────────────────────────────────────────

/// Trailing-edge debounce holding the most recent value.
#[derive(Debug, Clone)]
pub struct Debouncer<T> {
    window: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> Debouncer<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
        }
    }

    /// Replace the pending value and restart the window.
    pub fn push(&mut self, value: T, now: Instant) {
        self.pending = Some((value, now + self.window));
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, deadline)| *deadline)
    }

    /// The pending value, once its window has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match &self.pending {
            Some((_, deadline)) if now >= *deadline => self.pending.take().map(|(v, _)| v),
            _ => None,
        }
    }

    /// Drop the pending value without firing.
    pub fn cancel(&mut self) -> Option<T> {
        self.pending.take().map(|(v, _)| v)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

// ───────────────────────────────────────────────────────────────────
// Save state machine
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavePhase {
    New,
    Creating,
    HasId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveAction {
    Create,
    Update(NoteId),
    /// A create is in flight; the flushed draft is lost.
    Drop,
}

/// Pending-save state of one editor session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveState {
    pub note_id: Option<NoteId>,
    pub creating: bool,
    /// Updates issued and not yet finished. They may overlap.
    pub updates_in_flight: usize,
}

impl SaveState {
    /// Session for a note that has not been created yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Session editing an already persisted note.
    pub fn existing(note_id: NoteId) -> Self {
        Self {
            note_id: Some(note_id),
            ..Self::default()
        }
    }

    pub fn updating(&self) -> bool {
        self.updates_in_flight > 0
    }

    pub fn phase(&self) -> SavePhase {
        match (&self.note_id, self.creating) {
            (Some(_), _) => SavePhase::HasId,
            (None, true) => SavePhase::Creating,
            (None, false) => SavePhase::New,
        }
    }

    pub fn on_flush(self) -> (Self, SaveAction) {
        match self.phase() {
            SavePhase::New => (
                Self {
                    creating: true,
                    ..self
                },
                SaveAction::Create,
            ),
            SavePhase::Creating => (self, SaveAction::Drop),
            SavePhase::HasId => {
                let id = self.note_id.clone();
                let next = Self {
                    updates_in_flight: self.updates_in_flight + 1,
                    ..self
                };
                match id {
                    Some(id) => (next, SaveAction::Update(id)),
                    None => (next, SaveAction::Drop),
                }
            }
        }
    }

    pub fn on_create_succeeded(self, id: NoteId) -> Self {
        Self {
            note_id: Some(id),
            creating: false,
            ..self
        }
    }

    pub fn on_create_failed(self) -> Self {
        Self {
            creating: false,
            ..self
        }
    }

    pub fn on_update_finished(self) -> Self {
        Self {
            updates_in_flight: self.updates_in_flight.saturating_sub(1),
            ..self
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Persistence seam
// ───────────────────────────────────────────────────────────────────

/// Durable writes issued by an editor session.
pub trait NotePersistence: Send + Sync + 'static {
    fn create(&self, draft: NoteDraft) -> impl Future<Output = NotesResult<Note>> + Send;

    fn update(&self, id: NoteId, draft: NoteDraft)
        -> impl Future<Output = NotesResult<Note>> + Send;
}

/// In-process persistence through [`NoteService`], acting as one user.
#[derive(Clone)]
pub struct ServicePersistence {
    service: NoteService,
    user: UserId,
}

impl ServicePersistence {
    pub fn new(service: NoteService, user: UserId) -> Self {
        Self { service, user }
    }
}

impl NotePersistence for ServicePersistence {
    async fn create(&self, draft: NoteDraft) -> NotesResult<Note> {
        let service = self.service.clone();
        let user = self.user.clone();
        tokio::task::spawn_blocking(move || service.create(Some(&user), draft))
            .await
            .map_err(|e| NotesError::Transient(e.to_string()))?
    }

    async fn update(&self, id: NoteId, draft: NoteDraft) -> NotesResult<Note> {
        let service = self.service.clone();
        let user = self.user.clone();
        tokio::task::spawn_blocking(move || {
            service.update(Some(&user), id.as_str(), NotePatch::from(draft))
        })
        .await
        .map_err(|e| NotesError::Transient(e.to_string()))?
    }
}

// ───────────────────────────────────────────────────────────────────
// Session driver
// ───────────────────────────────────────────────────────────────────

/// Results of background saves, published to the editor.
#[derive(Debug, Clone, PartialEq)]
pub enum EditorEvent {
    Created(Note),
    Saved(Note),
    SaveFailed(String),
}

fn failure_message(err: &NotesError) -> String {
    match err {
        NotesError::Transient(_) | NotesError::Storage(_) => AUTOSAVE_FAILED.to_string(),
        other => other.to_string(),
    }
}

type Reply = oneshot::Sender<NotesResult<Note>>;

enum Command {
    Schedule(NoteDraft),
    SaveNow(NoteDraft, Reply),
}

enum Outcome {
    Created {
        result: NotesResult<Note>,
        reply: Option<Reply>,
    },
    Updated {
        id: NoteId,
        draft: NoteDraft,
        result: NotesResult<Note>,
        reply: Option<Reply>,
    },
}

struct Driver<P> {
    persistence: Arc<P>,
    relay: Option<Arc<dyn RelayEmitter>>,
    state: SaveState,
    debounce: Debouncer<NoteDraft>,
    state_tx: watch::Sender<SaveState>,
    events: mpsc::UnboundedSender<EditorEvent>,
    outcomes: mpsc::UnboundedSender<Outcome>,
}

impl<P: NotePersistence> Driver<P> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut outcomes: mpsc::UnboundedReceiver<Outcome>,
    ) {
        loop {
            let deadline = self.debounce.deadline();
            tokio::select! {
                cmd = commands.recv() => {
                    match cmd {
                        Some(Command::Schedule(draft)) => self.debounce.push(draft, Instant::now()),
                        Some(Command::SaveNow(draft, reply)) => {
                            self.debounce.cancel();
                            self.save_now(draft, reply);
                        }
                        None => break,
                    }
                }

                Some(outcome) = outcomes.recv() => self.on_outcome(outcome),

                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(draft) = self.debounce.poll(Instant::now()) {
                        self.flush(draft);
                    }
                }
            }
        }
        if self.debounce.is_pending() {
            log::debug!("Editor session closed with a pending save; abandoning it");
        }
    }

    fn set_state(&mut self, state: SaveState) {
        self.state = state;
        self.state_tx.send_replace(self.state.clone());
    }

    fn flush(&mut self, draft: NoteDraft) {
        let (next, action) = self.state.clone().on_flush();
        self.set_state(next);
        match action {
            SaveAction::Create => self.spawn_create(draft, None),
            SaveAction::Update(id) => self.spawn_update(id, draft, None),
            SaveAction::Drop => log::warn!("Create still in flight, dropping scheduled save"),
        }
    }

    fn save_now(&mut self, draft: NoteDraft, reply: Reply) {
        let (next, action) = self.state.clone().on_flush();
        match action {
            SaveAction::Create => {
                self.set_state(next);
                self.spawn_create(draft, Some(reply));
            }
            SaveAction::Update(id) => {
                self.set_state(next);
                self.spawn_update(id, draft, Some(reply));
            }
            SaveAction::Drop => {
                let _ = reply.send(Err(NotesError::Transient(
                    "Note is still being created".into(),
                )));
            }
        }
    }

    fn spawn_create(&self, draft: NoteDraft, reply: Option<Reply>) {
        let persistence = self.persistence.clone();
        let outcomes = self.outcomes.clone();
        tokio::spawn(async move {
            let result = persistence.create(draft).await;
            let _ = outcomes.send(Outcome::Created { result, reply });
        });
    }

    fn spawn_update(&self, id: NoteId, draft: NoteDraft, reply: Option<Reply>) {
        let persistence = self.persistence.clone();
        let outcomes = self.outcomes.clone();
        tokio::spawn(async move {
            let result = persistence.update(id.clone(), draft.clone()).await;
            let _ = outcomes.send(Outcome::Updated {
                id,
                draft,
                result,
                reply,
            });
        });
    }

    fn on_outcome(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Created { result, reply } => {
                match &result {
                    Ok(note) => {
                        let next = self.state.clone().on_create_succeeded(note.id.clone());
                        self.set_state(next);
                        log::info!("Created note {}", note.id);
                        if let Some(relay) = &self.relay {
                            relay.join_note(&note.id);
                        }
                        let _ = self.events.send(EditorEvent::Created(note.clone()));
                    }
                    Err(e) => {
                        let next = self.state.clone().on_create_failed();
                        self.set_state(next);
                        log::error!("Create failed: {e}");
                        if reply.is_none() {
                            let _ = self.events.send(EditorEvent::SaveFailed(failure_message(e)));
                        }
                    }
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            Outcome::Updated {
                id,
                draft,
                result,
                reply,
            } => {
                let next = self.state.clone().on_update_finished();
                self.set_state(next);
                match &result {
                    Ok(note) => {
                        if let Some(relay) = &self.relay {
                            relay.note_update(&id, draft.to_updates());
                        }
                        let _ = self.events.send(EditorEvent::Saved(note.clone()));
                    }
                    Err(e) => {
                        log::error!("Update of {id} failed: {e}");
                        if reply.is_none() {
                            let _ = self.events.send(EditorEvent::SaveFailed(failure_message(e)));
                        }
                    }
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
        }
    }
}

/// Handle to the auto-save task of one editor session.
///
/// Dropping the handle stops the task.
pub struct AutosaveSession {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SaveState>,
    events: Option<mpsc::UnboundedReceiver<EditorEvent>>,
    driver: JoinHandle<()>,
}

impl AutosaveSession {
    pub fn spawn<P: NotePersistence>(
        persistence: Arc<P>,
        relay: Option<Arc<dyn RelayEmitter>>,
        config: &AutosaveConfig,
        initial: SaveState,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(initial.clone());

        let driver = Driver {
            persistence,
            relay,
            state: initial,
            debounce: Debouncer::new(config.save_delay),
            state_tx,
            events: event_tx,
            outcomes: outcome_tx,
        };
        let driver = tokio::spawn(driver.run(cmd_rx, outcome_rx));

        Self {
            commands: cmd_tx,
            state: state_rx,
            events: Some(event_rx),
            driver,
        }
    }

    /// Schedule `draft` for the next debounced write.
    pub fn schedule(&self, draft: NoteDraft) {
        if self.commands.send(Command::Schedule(draft)).is_err() {
            log::warn!("Autosave task is gone, edit not scheduled");
        }
    }

    /// Write `draft` immediately, replacing any pending scheduled write.
    pub async fn save_now(&self, draft: NoteDraft) -> NotesResult<Note> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::SaveNow(draft, tx))
            .map_err(|_| NotesError::Transient("Editor session closed".into()))?;
        rx.await
            .map_err(|_| NotesError::Transient("Editor session closed".into()))?
    }

    pub fn state(&self) -> SaveState {
        self.state.borrow().clone()
    }

    pub fn note_id(&self) -> Option<NoteId> {
        self.state.borrow().note_id.clone()
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::UnboundedReceiver<EditorEvent>> {
        self.events.take()
    }
}

impl Drop for AutosaveSession {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
