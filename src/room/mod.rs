//! Room actor: the single authoritative owner of one room's state.
//!
//! DESIGN
//! ======
//! Each room runs as one tokio task holding the [`Document`], the
//! [`LockTable`], the [`PersistenceCoordinator`] and the AI executor. Every
//! request reaches it as a [`RoomCommand`] on an mpsc mailbox, so two
//! transactions can never interleave and no lock guards the state itself.
//!
//! The task hydrates from the [`SnapshotStore`] before it reads its mailbox;
//! commands that arrive meanwhile simply queue. Slow work never runs on the
//! actor: translator calls and snapshot writes are spawned and post their
//! result back as an internal command.
//!
//! Change fan-out rides the document's subscription. The callback pushes
//! each delta into an unbounded channel that the actor drains after every
//! step, turning deltas into `shape:changed` and `history:appended` frames
//! for every joined session and marking the coordinator dirty.
//!
//! LIFECYCLE
//! =========
//! 1. Spawned lazily by the registry on first join
//! 2. Hydrate, warm the idempotency cache, start serving
//! 3. Commit on the coordinator's deadlines; sweep expired leases
//! 4. With no sessions for `idle_evict` and nothing unsaved, deregister and stop
//!
//! ERROR HANDLING
//! ==============
//! A failed hydrate deregisters the room and drops the mailbox, so every
//! queued caller sees `RoomError::Unavailable` and the registry can respawn.
//! Permission problems on interactive edits are silent no-ops.

pub mod registry;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use rand::Rng;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ai::{AiCommand, AiExecutor, Begin, CanvasContext, RawToolCall, Translator, Viewport};
use crate::config::RoomConfig;
use crate::document::{
    Change, ChangeKind, Delta, Document, DocumentSnapshot, Field, FieldValue, HistoryEntry, Mutation, Op, Shape,
    ShapeId, Update,
};
use crate::error::{CommandError, RoomError};
use crate::frame::{Data, Frame, now_ms};
use crate::identity::Identity;
use crate::locks::{LockHolder, LockTable, SelectOutcome, SessionId};
use crate::persistence::{PersistenceCoordinator, SnapshotStore, StoreError};

pub use registry::RoomRegistry;

const MAILBOX_CAPACITY: usize = 256;

const PRESENCE_COLORS: [&str; 8] =
    ["#E53935", "#8E24AA", "#3949AB", "#039BE5", "#00897B", "#7CB342", "#FDD835", "#FB8C00"];

// =============================================================================
// COMMANDS
// =============================================================================

type Reply<T> = oneshot::Sender<Result<T, RoomError>>;

/// Interactive edit from a session.
#[derive(Debug, Clone)]
pub enum Edit {
    Create(Shape),
    Update { id: ShapeId, changes: Vec<(Field, FieldValue)> },
    Delete(Vec<ShapeId>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
    Applied(Vec<Change>),
    /// Read-only session, or a target locked by someone else.
    Ignored,
}

/// AI prompt as submitted by a session. A missing selection means the
/// session's current lock selection.
#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub command_id: String,
    pub prompt: String,
    pub selection: Option<Vec<ShapeId>>,
    pub viewport: Option<Viewport>,
}

/// Everything a session needs to render the room after joining.
#[derive(Debug, Clone, Serialize)]
pub struct JoinState {
    pub color: String,
    pub shapes: Vec<Shape>,
    pub locks: BTreeMap<ShapeId, LockHolder>,
    pub history: Vec<HistoryEntry>,
}

pub enum RoomCommand {
    Join {
        session_id: SessionId,
        identity: Identity,
        color: Option<String>,
        events: mpsc::Sender<Frame>,
        reply: Reply<JoinState>,
    },
    Leave {
        session_id: SessionId,
    },
    Select {
        session_id: SessionId,
        ids: Vec<ShapeId>,
        reply: Reply<SelectOutcome>,
    },
    Deselect {
        session_id: SessionId,
        ids: Option<Vec<ShapeId>>,
        reply: Reply<Vec<ShapeId>>,
    },
    Edit {
        session_id: SessionId,
        edit: Edit,
        reply: Reply<EditOutcome>,
    },
    Prompt {
        session_id: SessionId,
        request: PromptRequest,
        reply: Reply<HistoryEntry>,
    },
    History {
        reply: Reply<Vec<HistoryEntry>>,
    },
    Merge {
        session_id: SessionId,
        update: Update,
        reply: Reply<Delta>,
    },
    Snapshot {
        reply: Reply<DocumentSnapshot>,
    },
    /// Flush anything unsaved, then stop.
    Shutdown {
        reply: oneshot::Sender<()>,
    },
    // Internal: results of work spawned off the actor.
    Translated {
        command: AiCommand,
        outcome: Result<Vec<RawToolCall>, CommandError>,
    },
    CommitFinished {
        result: Result<(), StoreError>,
    },
}

// =============================================================================
// HANDLE
// =============================================================================

/// Cheap, cloneable address of a running room.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    room_id: String,
    tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// The actor has stopped and will not answer.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn same_room(&self, tx: &mpsc::Sender<RoomCommand>) -> bool {
        self.tx.same_channel(tx)
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> RoomCommand) -> Result<T, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| RoomError::Unavailable(format!("room {} is closed", self.room_id)))?;
        rx.await
            .map_err(|_| RoomError::Unavailable(format!("room {} stopped before replying", self.room_id)))?
    }

    /// # Errors
    ///
    /// `Unavailable` if the room could not be hydrated or has stopped.
    pub async fn join(
        &self,
        session_id: SessionId,
        identity: Identity,
        color: Option<String>,
        events: mpsc::Sender<Frame>,
    ) -> Result<JoinState, RoomError> {
        self.call(|reply| RoomCommand::Join { session_id, identity, color, events, reply }).await
    }

    pub async fn leave(&self, session_id: SessionId) {
        let _ = self.tx.send(RoomCommand::Leave { session_id }).await;
    }

    /// # Errors
    ///
    /// `Unavailable` if the room has stopped.
    pub async fn select(&self, session_id: SessionId, ids: Vec<ShapeId>) -> Result<SelectOutcome, RoomError> {
        self.call(|reply| RoomCommand::Select { session_id, ids, reply }).await
    }

    /// # Errors
    ///
    /// `Unavailable` if the room has stopped.
    pub async fn deselect(&self, session_id: SessionId, ids: Option<Vec<ShapeId>>) -> Result<Vec<ShapeId>, RoomError> {
        self.call(|reply| RoomCommand::Deselect { session_id, ids, reply }).await
    }

    /// # Errors
    ///
    /// `NotJoined` for an unknown session, `Document` when the edit itself
    /// is invalid, `Unavailable` if the room has stopped.
    pub async fn edit(&self, session_id: SessionId, edit: Edit) -> Result<EditOutcome, RoomError> {
        self.call(|reply| RoomCommand::Edit { session_id, edit, reply }).await
    }

    /// Run an AI prompt and wait for its history entry. Command failures are
    /// reported inside the entry, not as an error.
    ///
    /// # Errors
    ///
    /// `NotJoined` for an unknown session, `Unavailable` if the room has stopped.
    pub async fn prompt(&self, session_id: SessionId, request: PromptRequest) -> Result<HistoryEntry, RoomError> {
        self.call(|reply| RoomCommand::Prompt { session_id, request, reply }).await
    }

    /// # Errors
    ///
    /// `Unavailable` if the room has stopped.
    pub async fn history(&self) -> Result<Vec<HistoryEntry>, RoomError> {
        self.call(|reply| RoomCommand::History { reply }).await
    }

    /// Merge an update produced by a session's own replica of this room.
    ///
    /// # Errors
    ///
    /// `NotJoined` for an unknown session, `Permission` when the session is
    /// read-only or the update touches a shape locked by someone else or
    /// carries history entries, `Document` when the update itself is
    /// rejected, `Unavailable` if the room has stopped.
    pub async fn merge(&self, session_id: SessionId, update: Update) -> Result<Delta, RoomError> {
        self.call(|reply| RoomCommand::Merge { session_id, update, reply }).await
    }

    /// # Errors
    ///
    /// `Unavailable` if the room has stopped.
    pub async fn snapshot(&self) -> Result<DocumentSnapshot, RoomError> {
        self.call(|reply| RoomCommand::Snapshot { reply }).await
    }

    /// Ask the room to write out unsaved state and stop. Returns once it has.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(RoomCommand::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

// =============================================================================
// SPAWN
// =============================================================================

/// Collaborators shared by every room.
#[derive(Clone)]
pub struct RoomDeps {
    pub config: RoomConfig,
    pub store: Arc<dyn SnapshotStore>,
    pub translator: Arc<dyn Translator>,
}

/// Start a room task. The returned handle accepts commands immediately; they
/// are served once hydration finishes.
pub(crate) fn spawn(room_id: String, deps: RoomDeps, rooms: Option<registry::Rooms>) -> RoomHandle {
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    let handle = RoomHandle { room_id: room_id.clone(), tx: tx.clone() };
    tokio::spawn(async move {
        info!(%room_id, "room: spawned");
        let Some(room) = Room::hydrate(room_id, deps, tx, rooms).await else {
            return;
        };
        room.run(rx).await;
    });
    handle
}

// =============================================================================
// ACTOR
// =============================================================================

struct Session {
    identity: Identity,
    events: mpsc::Sender<Frame>,
}

struct Room {
    room_id: String,
    config: RoomConfig,
    doc: Document,
    locks: LockTable,
    persist: PersistenceCoordinator,
    ai: AiExecutor<Reply<HistoryEntry>>,
    sessions: HashMap<SessionId, Session>,
    store: Arc<dyn SnapshotStore>,
    translator: Arc<dyn Translator>,
    tx: mpsc::Sender<RoomCommand>,
    rooms: Option<registry::Rooms>,
    deltas: mpsc::UnboundedReceiver<Delta>,
    /// When the last session left, or when the room came up empty.
    empty_since: Option<Instant>,
    stop: Option<oneshot::Sender<()>>,
    final_commit: bool,
}

impl Room {
    async fn hydrate(
        room_id: String,
        deps: RoomDeps,
        tx: mpsc::Sender<RoomCommand>,
        rooms: Option<registry::Rooms>,
    ) -> Option<Self> {
        let RoomDeps { config, store, translator } = deps;
        let snapshot = match store.load(&room_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(%room_id, error = %e, "room: hydrate failed");
                if let Some(rooms) = &rooms {
                    registry::deregister(rooms, &room_id, &tx).await;
                }
                return None;
            }
        };

        let replica = Uuid::new_v4();
        let mut doc = match snapshot {
            Some(snapshot) => Document::from_snapshot(replica, snapshot, config.history_retention),
            None => Document::new(replica, config.history_retention),
        };
        let (delta_tx, deltas) = mpsc::unbounded_channel();
        doc.subscribe(move |delta| {
            let _ = delta_tx.send(delta.clone());
        });

        let mut ai = AiExecutor::new(config.ai, config.command_cache_capacity);
        ai.warm(&doc);
        info!(%room_id, shapes = doc.len(), history = doc.history().len(), "room: hydrated");

        Some(Self {
            room_id,
            locks: LockTable::new(config.lock_ttl),
            persist: PersistenceCoordinator::new(config.persist),
            config,
            doc,
            ai,
            sessions: HashMap::new(),
            store,
            translator,
            tx,
            rooms,
            deltas,
            empty_since: Some(Instant::now()),
            stop: None,
            final_commit: false,
        })
    }

    async fn run(mut self, mut rx: mpsc::Receiver<RoomCommand>) {
        let mut sweep = tokio::time::interval(self.config.lock_sweep);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let commit_at = self.persist.deadline();
            let evict_at = self.evict_deadline();
            tokio::select! {
                cmd = rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    self.handle(cmd, Instant::now());
                }
                () = sleep_until(commit_at) => {
                    let now = Instant::now();
                    if self.persist.poll(now) {
                        self.start_commit();
                    }
                }
                _ = sweep.tick() => self.sweep(Instant::now()),
                () = sleep_until(evict_at) => {
                    if self.evict_deadline().is_some() {
                        info!(room_id = %self.room_id, "room: evicting idle room");
                        break;
                    }
                }
            }
            self.flush_deltas(Instant::now());

            if self.advance_stop(Instant::now()) {
                break;
            }
        }

        if let Some(rooms) = &self.rooms {
            registry::deregister(rooms, &self.room_id, &self.tx).await;
        }
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        info!(room_id = %self.room_id, "room: stopped");
    }

    fn handle(&mut self, cmd: RoomCommand, now: Instant) {
        match cmd {
            RoomCommand::Join { session_id, identity, color, events, reply } => {
                let _ = reply.send(Ok(self.join(session_id, identity, color, events, now)));
            }
            RoomCommand::Leave { session_id } => self.leave(session_id),
            RoomCommand::Select { session_id, ids, reply } => {
                let _ = reply.send(Ok(self.select(session_id, &ids, now)));
            }
            RoomCommand::Deselect { session_id, ids, reply } => {
                let released = self.locks.deselect(session_id, ids.as_deref(), now);
                if !released.is_empty() {
                    self.broadcast_locks();
                }
                let _ = reply.send(Ok(released));
            }
            RoomCommand::Edit { session_id, edit, reply } => {
                let _ = reply.send(self.edit(session_id, edit, now));
            }
            RoomCommand::Prompt { session_id, request, reply } => self.prompt(session_id, request, reply, now),
            RoomCommand::History { reply } => {
                let _ = reply.send(Ok(self.doc.history().to_vec()));
            }
            RoomCommand::Merge { session_id, update, reply } => {
                let _ = reply.send(self.merge(session_id, &update, now));
            }
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(Ok(self.doc.snapshot()));
            }
            RoomCommand::Shutdown { reply } => {
                info!(room_id = %self.room_id, "room: shutdown requested");
                self.stop = Some(reply);
            }
            RoomCommand::Translated { command, outcome } => {
                let (entry, waiters) = self.ai.finish(&mut self.doc, &command, outcome, now_ms());
                for waiter in waiters {
                    let _ = waiter.send(Ok(entry.clone()));
                }
            }
            RoomCommand::CommitFinished { result } => match result {
                Ok(()) => {
                    debug!(room_id = %self.room_id, "room: commit ok");
                    self.persist.commit_succeeded();
                }
                Err(e) => {
                    warn!(room_id = %self.room_id, error = %e, "room: commit failed, will retry");
                    self.persist.commit_failed(now);
                }
            },
        }
    }

    // -------------------------------------------------------------------------
    // Sessions and locks
    // -------------------------------------------------------------------------

    fn join(
        &mut self,
        session_id: SessionId,
        identity: Identity,
        color: Option<String>,
        events: mpsc::Sender<Frame>,
        now: Instant,
    ) -> JoinState {
        let color = color
            .and_then(|c| crate::ai::validate::normalize_color(&c).ok())
            .unwrap_or_else(random_color);
        let holder = LockHolder {
            session_id,
            user_id: identity.user_id,
            user_name: identity.display_name.clone(),
            color: color.clone(),
        };
        self.locks.open_session(holder, identity.role, now);
        info!(
            room_id = %self.room_id,
            %session_id,
            user = %identity.display_name,
            role = ?identity.role,
            "room: session joined"
        );
        self.sessions.insert(session_id, Session { identity, events });
        self.empty_since = None;

        JoinState { color, shapes: self.doc.shapes(), locks: self.locks.view(), history: self.doc.history().to_vec() }
    }

    fn leave(&mut self, session_id: SessionId) {
        if self.sessions.remove(&session_id).is_none() {
            return;
        }
        let released = self.locks.release_session(session_id);
        info!(room_id = %self.room_id, %session_id, released = released.len(), "room: session left");
        if !released.is_empty() {
            self.broadcast_locks();
        }
        if self.sessions.is_empty() {
            self.empty_since = Some(Instant::now());
        }
    }

    fn select(&mut self, session_id: SessionId, ids: &[ShapeId], now: Instant) -> SelectOutcome {
        let live: Vec<ShapeId> = ids.iter().copied().filter(|id| self.doc.contains(*id)).collect();
        let outcome = self.locks.select(session_id, &live, now);
        match &outcome {
            SelectOutcome::Granted { acquired, released } => {
                if !acquired.is_empty() || !released.is_empty() {
                    self.broadcast_locks();
                }
            }
            SelectOutcome::Denied { shape_id, holder } => {
                info!(
                    room_id = %self.room_id,
                    %session_id,
                    %shape_id,
                    holder = %holder.user_name,
                    "room: lock denied"
                );
            }
            SelectOutcome::ReadOnly | SelectOutcome::UnknownSession => {}
        }
        outcome
    }

    fn sweep(&mut self, now: Instant) {
        let swept = self.locks.sweep_expired(now);
        if swept.is_empty() {
            return;
        }
        for (session_id, ids) in &swept {
            info!(room_id = %self.room_id, %session_id, released = ids.len(), "room: lease expired");
        }
        self.broadcast_locks();
    }

    // -------------------------------------------------------------------------
    // Edits
    // -------------------------------------------------------------------------

    fn edit(&mut self, session_id: SessionId, edit: Edit, now: Instant) -> Result<EditOutcome, RoomError> {
        let Some(user_id) = self.sessions.get(&session_id).map(|s| s.identity.user_id) else {
            return Err(RoomError::NotJoined);
        };
        self.locks.touch(session_id, now);

        // Repeated delete ids collapse to one delete each.
        let edit = match edit {
            Edit::Delete(ids) => {
                let mut seen = HashSet::new();
                Edit::Delete(ids.into_iter().filter(|id| seen.insert(*id)).collect())
            }
            other => other,
        };
        let targets: Vec<ShapeId> = match &edit {
            Edit::Create(_) => Vec::new(),
            Edit::Update { id, .. } => vec![*id],
            Edit::Delete(ids) => ids.clone(),
        };
        if let Err(denied) = self.locks.check_edit(session_id, &targets) {
            debug!(room_id = %self.room_id, %session_id, reason = %denied, "room: edit ignored");
            return Ok(EditOutcome::Ignored);
        }

        let mutations = match edit {
            Edit::Create(mut shape) => {
                shape.created_by = user_id.to_string();
                shape.ai_generated = false;
                shape.z_index = self.doc.next_z();
                vec![Mutation::Create(shape)]
            }
            Edit::Update { id, changes } => vec![Mutation::Update { id, changes }],
            Edit::Delete(ids) => ids.into_iter().map(Mutation::Delete).collect(),
        };
        let (delta, _) = self.doc.apply_transaction(mutations)?;
        Ok(EditOutcome::Applied(delta.changes))
    }

    /// Remote updates get the same gate as interactive edits. History is
    /// only ever written by this room's AI executor.
    fn merge(&mut self, session_id: SessionId, update: &Update, now: Instant) -> Result<Delta, RoomError> {
        if !self.sessions.contains_key(&session_id) {
            return Err(RoomError::NotJoined);
        }
        self.locks.touch(session_id, now);

        if update.ops.iter().any(|op| matches!(op, Op::History { .. })) {
            warn!(room_id = %self.room_id, %session_id, "room: merge refused, update carries history");
            return Err(RoomError::Permission("history entries cannot be merged from a session".into()));
        }
        let touched: Vec<ShapeId> = update.ops.iter().filter_map(Op::shape_id).collect();
        if let Err(denied) = self.locks.check_edit(session_id, &touched) {
            info!(room_id = %self.room_id, %session_id, reason = %denied, "room: merge refused");
            return Err(RoomError::Permission(denied.to_string()));
        }

        let delta = self.doc.apply_remote(update)?;
        debug!(room_id = %self.room_id, replica = %update.replica, changes = delta.changes.len(), "room: merged remote update");
        Ok(delta)
    }

    // -------------------------------------------------------------------------
    // AI
    // -------------------------------------------------------------------------

    fn prompt(&mut self, session_id: SessionId, request: PromptRequest, reply: Reply<HistoryEntry>, now: Instant) {
        let Some(user) = self.sessions.get(&session_id).map(|s| s.identity.clone()) else {
            let _ = reply.send(Err(RoomError::NotJoined));
            return;
        };
        self.locks.touch(session_id, now);

        let command = AiCommand {
            command_id: request.command_id,
            user,
            prompt: request.prompt,
            selection: request.selection.unwrap_or_else(|| self.locks.selection(session_id)),
            viewport: request.viewport,
        };
        match self.ai.begin(&mut self.doc, &command, reply, now_ms()) {
            Begin::Done(entry, reply) => {
                let _ = reply.send(Ok(entry));
            }
            Begin::Waiting => {}
            Begin::Dispatch(context) => self.dispatch(command, context),
        }
    }

    /// Call the translator off the actor under the hard command timeout.
    fn dispatch(&self, command: AiCommand, context: CanvasContext) {
        let translator = Arc::clone(&self.translator);
        let tx = self.tx.clone();
        let limit = self.config.ai.command_timeout;
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(limit, translator.translate(&command.prompt, &context)).await {
                Ok(result) => result,
                Err(_) => Err(CommandError::Timeout(format!("translator did not respond within {limit:?}"))),
            };
            let _ = tx.send(RoomCommand::Translated { command, outcome }).await;
        });
    }

    // -------------------------------------------------------------------------
    // Persistence and shutdown
    // -------------------------------------------------------------------------

    fn start_commit(&self) {
        let snapshot = self.doc.snapshot();
        let store = Arc::clone(&self.store);
        let tx = self.tx.clone();
        let room_id = self.room_id.clone();
        debug!(%room_id, records = snapshot.records.len(), "room: commit started");
        tokio::spawn(async move {
            let result = store.save(&room_id, &snapshot).await;
            let _ = tx.send(RoomCommand::CommitFinished { result }).await;
        });
    }

    /// Eviction is due only for an empty room with nothing pending.
    fn evict_deadline(&self) -> Option<Instant> {
        if !self.sessions.is_empty() || self.ai.in_flight() > 0 || !self.persist.is_settled() {
            return None;
        }
        self.empty_since.map(|since| since + self.config.idle_evict)
    }

    /// Drive a requested shutdown. True once the final write has finished,
    /// successfully or not.
    fn advance_stop(&mut self, now: Instant) -> bool {
        if self.stop.is_none() || self.persist.in_flight() {
            return false;
        }
        if self.persist.is_dirty() && !self.final_commit {
            self.final_commit = true;
            if self.persist.force(now) {
                self.start_commit();
            }
            return false;
        }
        if self.persist.is_dirty() {
            warn!(room_id = %self.room_id, "room: stopping with unsaved changes");
        }
        true
    }

    // -------------------------------------------------------------------------
    // Fan-out
    // -------------------------------------------------------------------------

    fn flush_deltas(&mut self, now: Instant) {
        while let Ok(delta) = self.deltas.try_recv() {
            self.persist.note_mutation(now);

            let mut shapes = Vec::new();
            let mut deleted = Vec::new();
            for change in &delta.changes {
                match change.kind {
                    ChangeKind::Deleted => deleted.push(change.id),
                    ChangeKind::Created | ChangeKind::Updated => shapes.extend(self.doc.shape(change.id)),
                }
            }
            if !shapes.is_empty() || !deleted.is_empty() {
                let mut data = Data::new();
                data.insert("origin".into(), serde_json::to_value(delta.origin).unwrap_or_default());
                data.insert("shapes".into(), serde_json::to_value(&shapes).unwrap_or_default());
                data.insert("deleted".into(), serde_json::to_value(&deleted).unwrap_or_default());
                self.broadcast(&Frame::push("shape:changed", data));
            }

            if !self.locks.forget_shapes(&deleted).is_empty() {
                self.broadcast_locks();
            }

            let entries: Vec<HistoryEntry> =
                delta.history.iter().filter_map(|id| self.doc.history().get(id).cloned()).collect();
            if !entries.is_empty() {
                let mut data = Data::new();
                data.insert("entries".into(), serde_json::to_value(&entries).unwrap_or_default());
                self.broadcast(&Frame::push("history:appended", data));
            }
        }
    }

    fn broadcast_locks(&self) {
        let mut data = Data::new();
        data.insert("locks".into(), serde_json::to_value(self.locks.view()).unwrap_or_default());
        self.broadcast(&Frame::push("lock:changed", data));
    }

    fn broadcast(&self, frame: &Frame) {
        let frame = frame.clone().with_room_id(self.room_id.clone());
        for (session_id, session) in &self.sessions {
            match session.events.try_send(frame.clone()) {
                Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(room_id = %self.room_id, %session_id, syscall = %frame.syscall, "room: session backlog full, dropping push");
                }
            }
        }
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn random_color() -> String {
    let i = rand::rng().random_range(0..PRESENCE_COLORS.len());
    PRESENCE_COLORS[i].to_owned()
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
