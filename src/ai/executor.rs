//! AI command executor: prompt in, one atomic transaction and one history
//! entry out.
//!
//! DESIGN
//! ======
//! A command runs in two halves around the translator call, which is the
//! only point where the room can interleave other work. [`AiExecutor::begin`]
//! deduplicates by command id, gates on role and prompt length, and hands
//! back the canvas context to translate against. [`AiExecutor::finish`]
//! parses the raw calls and plans them against the document as it is at
//! that moment, so shapes deleted while the translator was busy are never
//! touched. The planned mutations and the history entry go through a single
//! `apply_transaction`.
//!
//! The executor is generic over the waiter type `W`. A duplicate command id
//! that arrives while the original is in flight queues its waiter, and every
//! queued waiter gets the one resulting entry.
//!
//! ERROR HANDLING
//! ==============
//! Batches are all-or-nothing. The first call that fails to parse, validate
//! or resolve aborts the plan; nothing is mutated and one failed entry is
//! recorded, prefixed with the position and name of the offending call.

use std::collections::HashMap;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cache::CommandCache;
use super::spatial::{self, CANVAS_HEIGHT, CANVAS_WIDTH, Position, Viewport, canvas_bounds, clamp_origin};
use super::tools::{
    ArrangeShapesArgs, CreateShapeArgs, DeleteShapeArgs, MoveShapeArgs, Placement, ResizeShapeArgs, RotateShapeArgs,
    ShapeRef, ToolCall, UpdateShapeStyleArgs,
};
use super::translator::{CanvasContext, RawToolCall};
use super::validate::{self, MIN_FONT_SIZE, MIN_LINEAR, MIN_RADIUS};
use crate::config::AiConfig;
use crate::document::shape::{DEFAULT_FILL, DEFAULT_FONT_SIZE, DEFAULT_STROKE, DEFAULT_STROKE_WIDTH};
use crate::document::{
    AI_ASSISTANT, Bounds, Document, Field, FieldValue, Geometry, HistoryEntry, Mutation, Shape, ShapeId, ShapeKind,
    Stamp, Style, normalize_rotation,
};
use crate::error::CommandError;
use crate::identity::Identity;

const DEFAULT_SIZE: f64 = 100.0;
const DEFAULT_RADIUS: f64 = 50.0;

/// One AI prompt submission.
#[derive(Debug, Clone)]
pub struct AiCommand {
    pub command_id: String,
    pub user: Identity,
    pub prompt: String,
    pub selection: Vec<ShapeId>,
    pub viewport: Option<Viewport>,
}

#[derive(Debug)]
pub enum Begin<W> {
    /// Already decided. The entry is the recorded (or cached) outcome.
    Done(HistoryEntry, W),
    /// The same command id is awaiting the translator; the waiter is queued.
    Waiting,
    /// Call the translator with this context, then [`AiExecutor::finish`].
    Dispatch(CanvasContext),
}

pub struct AiExecutor<W> {
    config: AiConfig,
    cache: CommandCache,
    in_flight: HashMap<String, Vec<W>>,
}

impl<W> AiExecutor<W> {
    #[must_use]
    pub fn new(config: AiConfig, cache_capacity: usize) -> Self {
        Self { config, cache: CommandCache::new(cache_capacity), in_flight: HashMap::new() }
    }

    /// Seed the idempotency cache from a hydrated document's history.
    pub fn warm(&mut self, doc: &Document) {
        self.cache.warm(doc.history().iter());
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Recorded outcome for a command id, from the cache or the retained log.
    #[must_use]
    pub fn lookup(&self, doc: &Document, command_id: &str) -> Option<HistoryEntry> {
        self.cache
            .get(command_id)
            .or_else(|| doc.history().get(command_id))
            .cloned()
    }

    pub fn begin(&mut self, doc: &mut Document, cmd: &AiCommand, waiter: W, now_ms: i64) -> Begin<W> {
        if let Some(entry) = self.lookup(doc, &cmd.command_id) {
            debug!(command_id = %cmd.command_id, "ai: duplicate command id, returning recorded entry");
            return Begin::Done(entry, waiter);
        }
        if let Some(waiters) = self.in_flight.get_mut(&cmd.command_id) {
            debug!(command_id = %cmd.command_id, "ai: duplicate command id while in flight");
            waiters.push(waiter);
            return Begin::Waiting;
        }

        info!(
            command_id = %cmd.command_id,
            user = %cmd.user.display_name,
            prompt_len = cmd.prompt.chars().count(),
            "ai: command received"
        );

        let gate = if cmd.user.role.can_edit() {
            validate::prompt(&cmd.prompt, self.config.max_prompt_chars)
        } else {
            Err(CommandError::Permission(format!("{} has read-only access", cmd.user.display_name)))
        };
        if let Err(err) = gate {
            let entry = self.record_failure(doc, cmd, &err, now_ms);
            return Begin::Done(entry, waiter);
        }

        self.in_flight.insert(cmd.command_id.clone(), vec![waiter]);
        let mut selection: Vec<ShapeId> = Vec::new();
        for id in &cmd.selection {
            if doc.contains(*id) && !selection.contains(id) {
                selection.push(*id);
            }
        }
        Begin::Dispatch(CanvasContext { shapes: doc.shapes(), selection, viewport: cmd.viewport })
    }

    /// Complete a dispatched command with the translator's outcome. Returns
    /// the recorded entry and every waiter queued on the command id.
    pub fn finish(
        &mut self,
        doc: &mut Document,
        cmd: &AiCommand,
        outcome: Result<Vec<RawToolCall>, CommandError>,
        now_ms: i64,
    ) -> (HistoryEntry, Vec<W>) {
        let waiters = self.in_flight.remove(&cmd.command_id).unwrap_or_default();

        // A replica may have merged this command's entry meanwhile.
        if let Some(entry) = self.lookup(doc, &cmd.command_id) {
            return (entry, waiters);
        }

        let planned = outcome.and_then(|calls| {
            info!(command_id = %cmd.command_id, calls = calls.len(), "ai: command translated");
            plan(doc, cmd, &calls)
        });

        let entry = match planned {
            Ok((mut mutations, affected)) => {
                let entry = new_entry(cmd, now_ms, Ok(affected));
                let count = mutations.len();
                mutations.push(Mutation::RecordHistory(entry.clone()));
                match doc.apply_transaction(mutations) {
                    Ok(_) => {
                        info!(
                            command_id = %cmd.command_id,
                            mutations = count,
                            affected = entry.affected_shape_ids.len(),
                            "ai: command applied"
                        );
                        self.cache.insert(entry.clone());
                        entry
                    }
                    Err(err) => self.record_failure(doc, cmd, &err.into(), now_ms),
                }
            }
            Err(err) => self.record_failure(doc, cmd, &err, now_ms),
        };
        (entry, waiters)
    }

    fn record_failure(&mut self, doc: &mut Document, cmd: &AiCommand, err: &CommandError, now_ms: i64) -> HistoryEntry {
        warn!(command_id = %cmd.command_id, error = %err, "ai: command failed");
        let entry = new_entry(cmd, now_ms, Err(err));
        if let Err(e) = doc.apply_transaction(vec![Mutation::RecordHistory(entry.clone())]) {
            warn!(command_id = %cmd.command_id, error = %e, "ai: failed to record history entry");
        }
        self.cache.insert(entry.clone());
        entry
    }
}

fn new_entry(cmd: &AiCommand, now_ms: i64, outcome: Result<Vec<ShapeId>, &CommandError>) -> HistoryEntry {
    let (success, affected_shape_ids, error) = match outcome {
        Ok(ids) => (true, ids, None),
        Err(err) => (false, Vec::new(), Some(err.to_string())),
    };
    HistoryEntry {
        command_id: cmd.command_id.clone(),
        user_id: cmd.user.user_id,
        user_name: cmd.user.display_name.clone(),
        timestamp: now_ms,
        prompt: cmd.prompt.clone(),
        success,
        affected_shape_ids,
        error,
    }
}

// =============================================================================
// PLANNING
// =============================================================================

/// Turn raw calls into mutations against the current document. Returns the
/// mutations and the affected ids in first-touch order.
///
/// # Errors
///
/// Returns the first failing call's error, annotated with its position.
pub fn plan(
    doc: &Document,
    cmd: &AiCommand,
    calls: &[RawToolCall],
) -> Result<(Vec<Mutation>, Vec<ShapeId>), CommandError> {
    if calls.is_empty() {
        return Err(CommandError::Validation("the prompt did not produce any canvas operations".into()));
    }
    let mut planner = Planner::new(doc, cmd);
    for (index, raw) in calls.iter().enumerate() {
        ToolCall::parse(&raw.name, &raw.input)
            .and_then(|call| planner.apply(call))
            .map_err(|e| e.at_call(index, &raw.name))?;
    }
    Ok((planner.mutations, planner.affected))
}

/// Working copy of the canvas that tool calls are applied to in order, so
/// later calls see the effects of earlier ones.
struct Planner {
    shapes: Vec<Shape>,
    selection: Vec<ShapeId>,
    viewport: Option<Viewport>,
    mutations: Vec<Mutation>,
    affected: Vec<ShapeId>,
    next_z: i64,
    /// Provisional creation stamps for new shapes. Only their order matters.
    next_stamp: u64,
    replica: Uuid,
}

impl Planner {
    fn new(doc: &Document, cmd: &AiCommand) -> Self {
        let shapes = doc.shapes();
        let mut selection: Vec<ShapeId> = Vec::new();
        for id in &cmd.selection {
            if shapes.iter().any(|s| s.id == *id) && !selection.contains(id) {
                selection.push(*id);
            }
        }
        Self {
            shapes,
            selection,
            viewport: cmd.viewport,
            mutations: Vec::new(),
            affected: Vec::new(),
            next_z: doc.next_z(),
            next_stamp: doc.clock() + 1,
            replica: doc.replica(),
        }
    }

    fn apply(&mut self, call: ToolCall) -> Result<(), CommandError> {
        match call {
            ToolCall::CreateShape(args) => self.create(&args),
            ToolCall::MoveShape(args) => self.move_shapes(&args),
            ToolCall::ResizeShape(args) => self.resize(&args),
            ToolCall::RotateShape(args) => self.rotate(&args),
            ToolCall::UpdateShapeStyle(args) => self.restyle(&args),
            ToolCall::DeleteShape(args) => self.delete(&args),
            ToolCall::ArrangeShapes(args) => self.arrange(&args),
            ToolCall::FindShapes(query) => {
                self.selection = self.matches(&query)?;
                Ok(())
            }
        }
    }

    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------

    fn get(&self, id: ShapeId) -> Option<&Shape> {
        self.shapes.iter().find(|s| s.id == id)
    }

    /// Every shape the reference matches, oldest first. May be empty.
    fn matches(&self, r: &ShapeRef) -> Result<Vec<ShapeId>, CommandError> {
        if let Some(id) = r.id {
            return Ok(self.get(id).map(|s| s.id).into_iter().collect());
        }
        let fill = r.fill.as_deref().map(validate::normalize_color).transpose()?;
        let text = r.text.as_ref().map(|t| t.to_lowercase());
        let from_selection = r.is_selection();

        let mut found: Vec<&Shape> = self
            .shapes
            .iter()
            .filter(|s| !from_selection || self.selection.contains(&s.id))
            .filter(|s| r.kind.is_none_or(|k| s.kind() == k))
            .filter(|s| fill.as_ref().is_none_or(|f| s.style.fill.eq_ignore_ascii_case(f)))
            .filter(|s| {
                text.as_ref().is_none_or(|needle| {
                    matches!(&s.geometry, Geometry::Text { text, .. } if text.to_lowercase().contains(needle.as_str()))
                })
            })
            .collect();
        found.sort_by(|a, b| a.created.cmp(&b.created).then(a.id.cmp(&b.id)));
        Ok(found.into_iter().map(|s| s.id).collect())
    }

    /// Resolve a reference that must match something. With `singular`, a
    /// query that matches several shapes picks the most recently created one
    /// unless it asks for `all`. Selection references always keep every
    /// selected shape.
    fn resolve(&self, r: &ShapeRef, singular: bool) -> Result<Vec<ShapeId>, CommandError> {
        let found = self.matches(r)?;
        let Some(newest) = found.last().copied() else {
            if r.is_selection() && !r.has_filters() && self.selection.is_empty() {
                return Err(CommandError::NotFound("nothing is selected".into()));
            }
            return Err(CommandError::NotFound(format!("no shape matches {}", r.describe())));
        };
        if singular && !r.all && !r.is_selection() {
            return Ok(vec![newest]);
        }
        Ok(found)
    }

    fn group_bounds(&self, ids: &[ShapeId]) -> Option<Bounds> {
        let mut iter = ids.iter().filter_map(|id| self.get(*id)).map(Shape::bounds);
        let first = iter.next()?;
        let (mut x0, mut y0) = (first.x, first.y);
        let (mut x1, mut y1) = (first.x + first.width, first.y + first.height);
        for b in iter {
            x0 = x0.min(b.x);
            y0 = y0.min(b.y);
            x1 = x1.max(b.x + b.width);
            y1 = y1.max(b.y + b.height);
        }
        Some(Bounds { x: x0, y: y0, width: x1 - x0, height: y1 - y0 })
    }

    fn place(&self, placement: &Placement, size: (f64, f64)) -> Result<(f64, f64), CommandError> {
        let anchor = match &placement.relative_to {
            Some(r) => {
                let ids = self.resolve(r, true)?;
                self.group_bounds(&ids)
            }
            None => None,
        };
        let frame = if placement.viewport {
            self.viewport
                .map(|v| v.bounds())
                .ok_or_else(|| CommandError::Validation("no viewport was supplied with the prompt".into()))?
        } else {
            canvas_bounds()
        };
        spatial::place(placement.position, anchor, frame, size)
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    fn touch(&mut self, id: ShapeId) {
        if !self.affected.contains(&id) {
            self.affected.push(id);
        }
    }

    fn write(&mut self, id: ShapeId, changes: Vec<(Field, FieldValue)>) {
        if changes.is_empty() {
            return;
        }
        if let Some(shape) = self.shapes.iter_mut().find(|s| s.id == id) {
            for (field, value) in &changes {
                shape.set(*field, value);
            }
        }
        self.mutations.push(Mutation::Update { id, changes });
        self.touch(id);
    }

    fn create(&mut self, args: &CreateShapeArgs) -> Result<(), CommandError> {
        let geometry = match args.kind {
            ShapeKind::Rectangle => Geometry::Rectangle {
                width: validate::dimension("width", args.width.unwrap_or(DEFAULT_SIZE), MIN_LINEAR)?,
                height: validate::dimension("height", args.height.unwrap_or(DEFAULT_SIZE), MIN_LINEAR)?,
            },
            ShapeKind::Circle => {
                let radius = args.radius.or(args.width.map(|w| w / 2.0)).unwrap_or(DEFAULT_RADIUS);
                Geometry::Circle { radius: validate::dimension("radius", radius, MIN_RADIUS)? }
            }
            ShapeKind::Text => Geometry::Text {
                text: validate::text(args.text.as_deref().unwrap_or_default())?,
                font_size: validate::dimension("fontSize", args.font_size.unwrap_or(DEFAULT_FONT_SIZE), MIN_FONT_SIZE)?,
            },
        };
        let (width, height) = geometry.extent();

        let (x, y) = match (&args.placement, args.x, args.y) {
            (Some(placement), _, _) => self.place(placement, (width, height))?,
            (None, None, None) => spatial::place(Position::Center, None, canvas_bounds(), (width, height))?,
            (None, x, y) => (validate::finite("x", x.unwrap_or(0.0))?, validate::finite("y", y.unwrap_or(0.0))?),
        };

        let style = Style {
            fill: args
                .fill
                .as_deref()
                .map(validate::normalize_color)
                .transpose()?
                .unwrap_or_else(|| DEFAULT_FILL.into()),
            stroke: args
                .stroke
                .as_deref()
                .map(validate::normalize_color)
                .transpose()?
                .unwrap_or_else(|| DEFAULT_STROKE.into()),
            stroke_width: args
                .stroke_width
                .map(validate::stroke_width)
                .transpose()?
                .unwrap_or(DEFAULT_STROKE_WIDTH),
        };
        let rotation = match args.rotation {
            Some(r) => normalize_rotation(validate::finite("rotation", r)?),
            None => 0.0,
        };

        let mut shape = Shape::new(
            geometry,
            clamp_origin(x, width, CANVAS_WIDTH),
            clamp_origin(y, height, CANVAS_HEIGHT),
        )
        .with_style(style)
        .with_creator(AI_ASSISTANT);
        shape.rotation = rotation;
        shape.ai_generated = true;
        shape.z_index = self.next_z;
        shape.created = Stamp { clock: self.next_stamp, replica: self.replica };
        self.next_z += 1;
        self.next_stamp += 1;

        // Later calls with no explicit target act on what was just made.
        self.selection = vec![shape.id];
        self.touch(shape.id);
        self.shapes.push(shape.clone());
        self.mutations.push(Mutation::Create(shape));
        Ok(())
    }

    /// Moves treat the targets as one group: the group's bounding box is
    /// placed, and every member keeps its offset inside it.
    fn move_shapes(&mut self, args: &MoveShapeArgs) -> Result<(), CommandError> {
        let ids = self.resolve(&args.target, true)?;
        let group = self
            .group_bounds(&ids)
            .ok_or_else(|| CommandError::NotFound(format!("no shape matches {}", args.target.describe())))?;

        let (x, y) = if let Some(placement) = &args.placement {
            self.place(placement, (group.width, group.height))?
        } else if args.x.is_some() || args.y.is_some() {
            (
                validate::finite("x", args.x.unwrap_or(group.x))?,
                validate::finite("y", args.y.unwrap_or(group.y))?,
            )
        } else if args.dx.is_some() || args.dy.is_some() {
            (
                group.x + validate::finite("dx", args.dx.unwrap_or(0.0))?,
                group.y + validate::finite("dy", args.dy.unwrap_or(0.0))?,
            )
        } else {
            return Err(CommandError::Validation("moveShape needs x/y, dx/dy or a placement".into()));
        };

        let shift_x = clamp_origin(x, group.width, CANVAS_WIDTH) - group.x;
        let shift_y = clamp_origin(y, group.height, CANVAS_HEIGHT) - group.y;
        for id in ids {
            let Some(b) = self.get(id).map(Shape::bounds) else { continue };
            self.write(
                id,
                vec![
                    (Field::X, FieldValue::Number(clamp_origin(b.x + shift_x, b.width, CANVAS_WIDTH))),
                    (Field::Y, FieldValue::Number(clamp_origin(b.y + shift_y, b.height, CANVAS_HEIGHT))),
                ],
            );
        }
        Ok(())
    }

    fn resize(&mut self, args: &ResizeShapeArgs) -> Result<(), CommandError> {
        let ids = self.resolve(&args.target, true)?;
        let scale = args.scale.map(validate::scale).transpose()?;
        let missing = |kind: &str| CommandError::Validation(format!("resizeShape needs a scale or new size for a {kind}"));

        for id in ids {
            let Some(geometry) = self.get(id).map(|s| s.geometry.clone()) else { continue };
            let changes = match geometry {
                Geometry::Rectangle { width, height } => {
                    let (w, h) = match scale {
                        Some(f) => (width * f, height * f),
                        None if args.width.is_some() || args.height.is_some() => {
                            (args.width.unwrap_or(width), args.height.unwrap_or(height))
                        }
                        None => return Err(missing("rectangle")),
                    };
                    vec![
                        (Field::Width, FieldValue::Number(validate::dimension("width", w, MIN_LINEAR)?)),
                        (Field::Height, FieldValue::Number(validate::dimension("height", h, MIN_LINEAR)?)),
                    ]
                }
                Geometry::Circle { radius } => {
                    let r = match scale {
                        Some(f) => radius * f,
                        None => args
                            .radius
                            .or(args.width.map(|w| w / 2.0))
                            .ok_or_else(|| missing("circle"))?,
                    };
                    vec![(Field::Radius, FieldValue::Number(validate::dimension("radius", r, MIN_RADIUS)?))]
                }
                Geometry::Text { font_size, .. } => {
                    let size = match scale {
                        Some(f) => font_size * f,
                        None => args.font_size.ok_or_else(|| missing("text"))?,
                    };
                    vec![(Field::FontSize, FieldValue::Number(validate::dimension("fontSize", size, MIN_FONT_SIZE)?))]
                }
            };
            self.write(id, changes);
        }
        Ok(())
    }

    fn rotate(&mut self, args: &RotateShapeArgs) -> Result<(), CommandError> {
        let degrees = validate::finite("degrees", args.degrees)?;
        for id in self.resolve(&args.target, true)? {
            let Some(current) = self.get(id).map(|s| s.rotation) else { continue };
            self.write(id, vec![(Field::Rotation, FieldValue::Number(normalize_rotation(current + degrees)))]);
        }
        Ok(())
    }

    fn restyle(&mut self, args: &UpdateShapeStyleArgs) -> Result<(), CommandError> {
        let mut changes = Vec::new();
        if let Some(fill) = &args.fill {
            changes.push((Field::Fill, FieldValue::Text(validate::normalize_color(fill)?)));
        }
        if let Some(stroke) = &args.stroke {
            changes.push((Field::Stroke, FieldValue::Text(validate::normalize_color(stroke)?)));
        }
        if let Some(width) = args.stroke_width {
            changes.push((Field::StrokeWidth, FieldValue::Number(validate::stroke_width(width)?)));
        }
        if changes.is_empty() {
            return Err(CommandError::Validation("updateShapeStyle needs at least one style field".into()));
        }
        for id in self.resolve(&args.target, true)? {
            self.write(id, changes.clone());
        }
        Ok(())
    }

    fn delete(&mut self, args: &DeleteShapeArgs) -> Result<(), CommandError> {
        for id in self.resolve(&args.target, true)? {
            self.shapes.retain(|s| s.id != id);
            self.selection.retain(|s| *s != id);
            self.mutations.push(Mutation::Delete(id));
            self.touch(id);
        }
        Ok(())
    }

    /// Without explicit targets, arranges the selection, or every shape when
    /// nothing is selected.
    fn arrange(&mut self, args: &ArrangeShapesArgs) -> Result<(), CommandError> {
        let ids: Vec<ShapeId> = match &args.targets {
            Some(refs) if !refs.is_empty() => {
                let mut ids = Vec::new();
                for r in refs {
                    for id in self.resolve(r, false)? {
                        if !ids.contains(&id) {
                            ids.push(id);
                        }
                    }
                }
                ids
            }
            _ if !self.selection.is_empty() => self.selection.clone(),
            _ => self.shapes.iter().map(|s| s.id).collect(),
        };
        if ids.is_empty() {
            return Err(CommandError::NotFound("there are no shapes to arrange".into()));
        }

        let spacing = validate::spacing(args.spacing)?;
        let members: Vec<Shape> = ids.iter().filter_map(|id| self.get(*id).cloned()).collect();
        for (id, x, y) in spatial::arrange(&members, args.layout, spacing, (args.rows, args.columns))? {
            self.write(id, vec![(Field::X, FieldValue::Number(x)), (Field::Y, FieldValue::Number(y))]);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "executor_test.rs"]
mod tests;
