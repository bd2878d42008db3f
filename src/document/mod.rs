//! Document store: replicated shape map plus the AI command history log.
//!
//! DESIGN
//! ======
//! Each shape is a record of independently replicated fields. Every field is
//! a last-writer-wins register versioned by a Lamport [`Stamp`], so any two
//! replicas that have seen the same set of updates hold the same state no
//! matter the delivery order. Creation mints a fresh v4 id per shape, so
//! concurrent creates never collide. Deletion leaves a tombstone that absorbs
//! every later or concurrent field write (delete-wins) and keeps the id from
//! ever coming back.
//!
//! Local edits go through [`Document::apply_transaction`], which validates the
//! whole batch before touching state and notifies subscribers once with the
//! combined [`Delta`]. The [`Update`] it returns is what other replicas feed
//! to [`Document::apply_remote`].
//!
//! ERROR HANDLING
//! ==============
//! Validation happens up front. A transaction that fails validation leaves
//! the document untouched. Remote updates are checked the same way: a field
//! write of the wrong type or kind, or a stamp too far ahead of the local
//! clock, rejects the whole update. Ops that lose the merge, or target a
//! tombstone, are dropped silently.

pub mod clock;
pub mod history;
pub mod shape;

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::frame::ErrorCode;

pub use clock::{LamportClock, LwwRegister, Stamp};
pub use history::{HistoryEntry, HistoryLog};
pub use shape::{
    AI_ASSISTANT, Bounds, Field, FieldValue, Geometry, Shape, ShapeId, ShapeKind, Style, normalize_rotation,
};

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DocumentError {
    #[error("shape not found: {0}")]
    UnknownShape(ShapeId),
    #[error("shape id already in use: {0}")]
    DuplicateId(ShapeId),
    #[error("field {field:?} does not apply to a {kind}")]
    InvalidField { field: Field, kind: &'static str },
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("stamp {clock} is too far ahead of local clock {local}")]
    ClockSkew { clock: u64, local: u64 },
    #[error("local clock exhausted")]
    ClockExhausted,
}

impl ErrorCode for DocumentError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownShape(_) => "E_SHAPE_NOT_FOUND",
            Self::DuplicateId(_) => "E_DUPLICATE_ID",
            Self::InvalidField { .. } => "E_INVALID_FIELD",
            Self::InvalidValue(_) => "E_INVALID_VALUE",
            Self::ClockSkew { .. } => "E_CLOCK_SKEW",
            Self::ClockExhausted => "E_CLOCK_EXHAUSTED",
        }
    }
}

// =============================================================================
// MUTATIONS, OPS, DELTAS
// =============================================================================

/// One element of a local transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Create(Shape),
    Update { id: ShapeId, changes: Vec<(Field, FieldValue)> },
    Delete(ShapeId),
    RecordHistory(HistoryEntry),
}

impl Mutation {
    #[must_use]
    pub fn set(id: ShapeId, field: Field, value: FieldValue) -> Self {
        Self::Update { id, changes: vec![(field, value)] }
    }
}

/// Replicated operation. Ops carry their own stamps and are safe to apply in
/// any order and any number of times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Create { id: ShapeId, kind: ShapeKind, created_by: String, ai_generated: bool, stamp: Stamp },
    Set { id: ShapeId, field: Field, value: FieldValue, stamp: Stamp },
    Delete { id: ShapeId, stamp: Stamp },
    History { entry: HistoryEntry },
}

impl Op {
    /// Shape the op writes to; `None` for history entries.
    #[must_use]
    pub fn shape_id(&self) -> Option<ShapeId> {
        match self {
            Self::Create { id, .. } | Self::Set { id, .. } | Self::Delete { id, .. } => Some(*id),
            Self::History { .. } => None,
        }
    }
}

/// Batch of ops exchanged between replicas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub replica: Uuid,
    pub ops: Vec<Op>,
}

impl Update {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub id: ShapeId,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "replica", rename_all = "lowercase")]
pub enum Origin {
    Local,
    Remote(Uuid),
}

/// What one transaction or remote update changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub origin: Origin,
    pub changes: Vec<Change>,
    /// Command ids of newly appended history entries.
    pub history: Vec<String>,
}

impl Delta {
    fn new(origin: Origin) -> Self {
        Self { origin, changes: Vec::new(), history: Vec::new() }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.history.is_empty()
    }

    /// Fold one change into the delta, one entry per id. A delete overrides
    /// anything earlier and an update never downgrades a create.
    fn record(&mut self, id: ShapeId, kind: ChangeKind) {
        if let Some(existing) = self.changes.iter_mut().find(|c| c.id == id) {
            if kind != ChangeKind::Updated {
                existing.kind = kind;
            }
        } else {
            self.changes.push(Change { id, kind });
        }
    }
}

pub type SubscriptionId = u64;

type Subscriber = Box<dyn FnMut(&Delta) + Send>;

// =============================================================================
// RECORDS
// =============================================================================

/// Replicated state of one shape id. A record can exist before its create op
/// arrives (field writes delivered first) and outlives deletion as a
/// tombstone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShapeRecord {
    kind: Option<ShapeKind>,
    created: Option<Stamp>,
    #[serde(default)]
    created_by: String,
    #[serde(default)]
    ai_generated: bool,
    #[serde(default)]
    fields: BTreeMap<Field, LwwRegister<FieldValue>>,
    #[serde(default)]
    deleted: Option<Stamp>,
}

impl ShapeRecord {
    fn is_live(&self) -> bool {
        self.created.is_some() && self.kind.is_some() && self.deleted.is_none()
    }

    fn max_stamp(&self) -> Stamp {
        self.fields
            .values()
            .map(|r| r.stamp)
            .chain(self.created)
            .chain(self.deleted)
            .max()
            .unwrap_or(Stamp::ZERO)
    }

    fn materialize(&self, id: ShapeId) -> Option<Shape> {
        if !self.is_live() {
            return None;
        }
        let mut shape = Shape::blank(id, self.kind?);
        shape.created_by.clone_from(&self.created_by);
        shape.ai_generated = self.ai_generated;
        shape.created = self.created?;
        for (field, reg) in &self.fields {
            shape.set(*field, &reg.value);
        }
        Some(shape)
    }
}

/// Durable form of a document: every record including tombstones, the
/// retained history, and the clock position.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub clock: u64,
    pub records: HashMap<ShapeId, ShapeRecord>,
    pub history: Vec<HistoryEntry>,
}

// =============================================================================
// DOCUMENT
// =============================================================================

pub struct Document {
    clock: LamportClock,
    records: HashMap<ShapeId, ShapeRecord>,
    history: HistoryLog,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: SubscriptionId,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("replica", &self.clock.replica())
            .field("clock", &self.clock.counter())
            .field("records", &self.records.len())
            .field("history", &self.history.len())
            .finish_non_exhaustive()
    }
}

impl Document {
    #[must_use]
    pub fn new(replica: Uuid, history_capacity: usize) -> Self {
        Self {
            clock: LamportClock::new(replica),
            records: HashMap::new(),
            history: HistoryLog::new(history_capacity),
            subscribers: Vec::new(),
            next_subscription: 1,
        }
    }

    /// Rebuild a document from a snapshot. The clock resumes past every stamp
    /// in the snapshot so new local writes always win over persisted ones.
    #[must_use]
    pub fn from_snapshot(replica: Uuid, snapshot: DocumentSnapshot, history_capacity: usize) -> Self {
        let high = snapshot
            .records
            .values()
            .map(|r| r.max_stamp().clock)
            .max()
            .unwrap_or(0)
            .max(snapshot.clock);
        let mut history = HistoryLog::new(history_capacity);
        for entry in snapshot.history {
            history.append(entry);
        }
        Self {
            clock: LamportClock::resume(replica, high),
            records: snapshot.records,
            history,
            subscribers: Vec::new(),
            next_subscription: 1,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            clock: self.clock.counter(),
            records: self.records.clone(),
            history: self.history.to_vec(),
        }
    }

    #[must_use]
    pub fn replica(&self) -> Uuid {
        self.clock.replica()
    }

    /// Current Lamport counter. The next local write is stamped above it.
    #[must_use]
    pub fn clock(&self) -> u64 {
        self.clock.counter()
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Live shapes in paint order: by z-index, then creation.
    #[must_use]
    pub fn shapes(&self) -> Vec<Shape> {
        let mut shapes: Vec<Shape> = self.records.iter().filter_map(|(id, r)| r.materialize(*id)).collect();
        shapes.sort_by(|a, b| a.z_index.cmp(&b.z_index).then(a.created.cmp(&b.created)));
        shapes
    }

    #[must_use]
    pub fn shape(&self, id: ShapeId) -> Option<Shape> {
        self.records.get(&id).and_then(|r| r.materialize(id))
    }

    #[must_use]
    pub fn contains(&self, id: ShapeId) -> bool {
        self.records.get(&id).is_some_and(ShapeRecord::is_live)
    }

    #[must_use]
    pub fn is_tombstoned(&self, id: ShapeId) -> bool {
        self.records.get(&id).is_some_and(|r| r.deleted.is_some())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.values().filter(|r| r.is_live()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    /// z-index one above the current top shape.
    #[must_use]
    pub fn next_z(&self) -> i64 {
        self.shapes().iter().map(|s| s.z_index).max().map_or(0, |z| z + 1)
    }

    /// Full state as one update, for bootstrapping another replica.
    #[must_use]
    pub fn state_update(&self) -> Update {
        let mut ops = Vec::new();
        for (id, record) in &self.records {
            if let (Some(kind), Some(stamp)) = (record.kind, record.created) {
                ops.push(Op::Create {
                    id: *id,
                    kind,
                    created_by: record.created_by.clone(),
                    ai_generated: record.ai_generated,
                    stamp,
                });
            }
            if let Some(stamp) = record.deleted {
                ops.push(Op::Delete { id: *id, stamp });
                continue;
            }
            for (field, reg) in &record.fields {
                ops.push(Op::Set { id: *id, field: *field, value: reg.value.clone(), stamp: reg.stamp });
            }
        }
        ops.extend(self.history.iter().map(|entry| Op::History { entry: entry.clone() }));
        Update { replica: self.replica(), ops }
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Register a callback invoked with the delta of every non-empty local
    /// transaction or remote update.
    pub fn subscribe(&mut self, callback: impl FnMut(&Delta) + Send + 'static) -> SubscriptionId {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    fn notify(&mut self, delta: &Delta) {
        if delta.is_empty() {
            return;
        }
        for (_, callback) in &mut self.subscribers {
            callback(delta);
        }
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Apply a batch of mutations atomically.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure. Nothing is applied in that case.
    pub fn apply_transaction(&mut self, mutations: Vec<Mutation>) -> Result<(Delta, Update), DocumentError> {
        let mutations = self.validate(mutations)?;

        let mut ops = Vec::new();
        for mutation in mutations {
            match mutation {
                Mutation::Create(shape) => {
                    let stamp = self.tick()?;
                    ops.push(Op::Create {
                        id: shape.id,
                        kind: shape.kind(),
                        created_by: shape.created_by.clone(),
                        ai_generated: shape.ai_generated,
                        stamp,
                    });
                    for (field, value) in shape.fields() {
                        ops.push(Op::Set { id: shape.id, field, value, stamp });
                    }
                }
                Mutation::Update { id, changes } => {
                    for (field, value) in changes {
                        let stamp = self.tick()?;
                        ops.push(Op::Set { id, field, value, stamp });
                    }
                }
                Mutation::Delete(id) => {
                    let stamp = self.tick()?;
                    ops.push(Op::Delete { id, stamp });
                }
                Mutation::RecordHistory(entry) => ops.push(Op::History { entry }),
            }
        }

        let mut delta = Delta::new(Origin::Local);
        for op in &ops {
            self.integrate(op, &mut delta);
        }
        self.notify(&delta);
        Ok((delta, Update { replica: self.replica(), ops }))
    }

    /// Merge ops produced by another replica. The update is checked as a
    /// whole first; a rejected update changes nothing.
    ///
    /// # Errors
    ///
    /// `ClockSkew` for a stamp implausibly far ahead of the local clock,
    /// `InvalidValue` or `InvalidField` for a field write this document would
    /// refuse locally.
    pub fn apply_remote(&mut self, update: &Update) -> Result<Delta, DocumentError> {
        self.validate_remote(update)?;
        let mut delta = Delta::new(Origin::Remote(update.replica));
        for op in &update.ops {
            self.integrate(op, &mut delta);
        }
        self.notify(&delta);
        Ok(delta)
    }

    fn tick(&mut self) -> Result<Stamp, DocumentError> {
        self.clock.tick().ok_or(DocumentError::ClockExhausted)
    }

    fn validate_remote(&self, update: &Update) -> Result<(), DocumentError> {
        // Kinds declared by creates earlier in the same update.
        let mut declared: HashMap<ShapeId, ShapeKind> = HashMap::new();
        for op in &update.ops {
            let stamp = match op {
                Op::Create { id, kind, stamp, .. } => {
                    declared.entry(*id).or_insert(*kind);
                    *stamp
                }
                Op::Set { id, field, value, stamp } => {
                    field.check(value.clone()).map_err(DocumentError::InvalidValue)?;
                    let kind = declared.get(id).copied().or_else(|| self.records.get(id).and_then(|r| r.kind));
                    if let Some(kind) = kind.filter(|k| !field.applies_to(*k)) {
                        return Err(DocumentError::InvalidField { field: *field, kind: kind.as_str() });
                    }
                    *stamp
                }
                Op::Delete { stamp, .. } => *stamp,
                Op::History { .. } => continue,
            };
            if !self.clock.within_skew(stamp) {
                return Err(DocumentError::ClockSkew { clock: stamp.clock, local: self.clock.counter() });
            }
        }
        Ok(())
    }

    /// Check every mutation against the current state plus the effects of
    /// earlier mutations in the same batch. Values come back normalized.
    fn validate(&self, mutations: Vec<Mutation>) -> Result<Vec<Mutation>, DocumentError> {
        // id -> (kind, live) for ids touched earlier in this batch.
        let mut pending: HashMap<ShapeId, (ShapeKind, bool)> = HashMap::new();
        let mut seen_commands: HashSet<String> = HashSet::new();
        let mut out = Vec::with_capacity(mutations.len());

        let live_kind = |pending: &HashMap<ShapeId, (ShapeKind, bool)>, id: ShapeId| -> Option<ShapeKind> {
            match pending.get(&id) {
                Some((kind, true)) => Some(*kind),
                Some((_, false)) => None,
                None => self.records.get(&id).filter(|r| r.is_live()).and_then(|r| r.kind),
            }
        };

        for mutation in mutations {
            match mutation {
                Mutation::Create(mut shape) => {
                    if self.records.contains_key(&shape.id) || pending.contains_key(&shape.id) {
                        return Err(DocumentError::DuplicateId(shape.id));
                    }
                    for (field, value) in shape.fields() {
                        let value = field.check(value).map_err(DocumentError::InvalidValue)?;
                        shape.set(field, &value);
                    }
                    pending.insert(shape.id, (shape.kind(), true));
                    out.push(Mutation::Create(shape));
                }
                Mutation::Update { id, changes } => {
                    let kind = live_kind(&pending, id).ok_or(DocumentError::UnknownShape(id))?;
                    let mut checked = Vec::with_capacity(changes.len());
                    for (field, value) in changes {
                        if !field.applies_to(kind) {
                            return Err(DocumentError::InvalidField { field, kind: kind.as_str() });
                        }
                        checked.push((field, field.check(value).map_err(DocumentError::InvalidValue)?));
                    }
                    out.push(Mutation::Update { id, changes: checked });
                }
                Mutation::Delete(id) => {
                    let kind = live_kind(&pending, id).ok_or(DocumentError::UnknownShape(id))?;
                    pending.insert(id, (kind, false));
                    out.push(Mutation::Delete(id));
                }
                Mutation::RecordHistory(entry) => {
                    // Already-recorded commands are skipped, not rejected.
                    if !self.history.contains(&entry.command_id) && seen_commands.insert(entry.command_id.clone()) {
                        out.push(Mutation::RecordHistory(entry));
                    }
                }
            }
        }
        Ok(out)
    }

    /// Merge one op into the record map. Shared by local and remote paths.
    fn integrate(&mut self, op: &Op, delta: &mut Delta) {
        match op {
            Op::Create { id, kind, created_by, ai_generated, stamp } => {
                self.clock.observe(*stamp);
                let record = self.records.entry(*id).or_default();
                let was_live = record.is_live();
                // Ids are v4 so a second create is a redelivery. The earliest
                // create wins if two ever disagree.
                if record.created.is_none_or(|existing| *stamp < existing) {
                    record.kind = Some(*kind);
                    record.created = Some(*stamp);
                    record.created_by.clone_from(created_by);
                    record.ai_generated = *ai_generated;
                }
                if !was_live && record.is_live() {
                    delta.record(*id, ChangeKind::Created);
                }
            }
            Op::Set { id, field, value, stamp } => {
                self.clock.observe(*stamp);
                let record = self.records.entry(*id).or_default();
                if record.deleted.is_some() {
                    return;
                }
                let won = match record.fields.get_mut(field) {
                    Some(reg) => reg.merge(value.clone(), *stamp),
                    None => {
                        record.fields.insert(*field, LwwRegister::new(value.clone(), *stamp));
                        true
                    }
                };
                if won && record.is_live() {
                    delta.record(*id, ChangeKind::Updated);
                }
            }
            Op::Delete { id, stamp } => {
                self.clock.observe(*stamp);
                let record = self.records.entry(*id).or_default();
                let was_live = record.is_live();
                record.deleted = Some(record.deleted.map_or(*stamp, |d| d.max(*stamp)));
                // Field values are dead weight once tombstoned.
                record.fields.clear();
                if was_live {
                    delta.record(*id, ChangeKind::Deleted);
                }
            }
            Op::History { entry } => {
                if self.history.append(entry.clone()) {
                    delta.history.push(entry.command_id.clone());
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "document_test.rs"]
mod tests;
