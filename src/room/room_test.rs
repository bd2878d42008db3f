use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::*;
use crate::document::{ChangeKind, Geometry, Origin};
use crate::identity::Role;
use crate::persistence::MemorySnapshotStore;

// =========================================================================
// Helpers
// =========================================================================

/// Translator that replays scripted results, optionally after a delay.
struct ScriptedTranslator {
    responses: Mutex<Vec<Result<Vec<RawToolCall>, CommandError>>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedTranslator {
    fn new(responses: Vec<Result<Vec<RawToolCall>, CommandError>>) -> Arc<Self> {
        Self::slow(responses, Duration::ZERO)
    }

    fn slow(responses: Vec<Result<Vec<RawToolCall>, CommandError>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self { responses: Mutex::new(responses), delay, calls: AtomicUsize::new(0) })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Translator for ScriptedTranslator {
    async fn translate(&self, _prompt: &str, _context: &CanvasContext) -> Result<Vec<RawToolCall>, CommandError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut responses = self.responses.lock().expect("mock mutex should lock");
        if responses.is_empty() { Ok(Vec::new()) } else { responses.remove(0) }
    }
}

struct Fixture {
    registry: RoomRegistry,
    store: Arc<MemorySnapshotStore>,
    translator: Arc<ScriptedTranslator>,
}

fn fixture(translator: Arc<ScriptedTranslator>) -> Fixture {
    fixture_with(RoomConfig::default(), translator)
}

fn fixture_with(config: RoomConfig, translator: Arc<ScriptedTranslator>) -> Fixture {
    let store = Arc::new(MemorySnapshotStore::new());
    let deps = RoomDeps {
        config,
        store: store.clone(),
        translator: translator.clone(),
    };
    Fixture { registry: RoomRegistry::new(deps), store, translator }
}

fn identity(name: &str, role: Role) -> Identity {
    Identity { user_id: Uuid::new_v4(), display_name: name.into(), role }
}

struct Member {
    session_id: SessionId,
    user_id: Uuid,
    handle: RoomHandle,
    events: mpsc::Receiver<Frame>,
    state: JoinState,
}

async fn join(fx: &Fixture, room_id: &str, name: &str, role: Role) -> Member {
    let session_id = Uuid::new_v4();
    let who = identity(name, role);
    let user_id = who.user_id;
    let (tx, events) = mpsc::channel(64);
    let (handle, state) = fx.registry.join(room_id, session_id, who, None, tx).await.expect("join should succeed");
    Member { session_id, user_id, handle, events, state }
}

/// Round-trip through the mailbox so pushes from earlier commands are out.
async fn sync(handle: &RoomHandle) {
    handle.history().await.expect("room should answer");
}

fn drain(rx: &mut mpsc::Receiver<Frame>, syscall: &str) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        if frame.syscall == syscall {
            frames.push(frame);
        }
    }
    frames
}

async fn create(member: &Member, shape: Shape) -> ShapeId {
    let id = shape.id;
    let outcome = member.handle.edit(member.session_id, Edit::Create(shape)).await.unwrap();
    assert!(matches!(outcome, EditOutcome::Applied(_)), "{outcome:?}");
    id
}

fn prompt(command_id: &str, text: &str) -> PromptRequest {
    PromptRequest { command_id: command_id.into(), prompt: text.into(), selection: None, viewport: None }
}

fn create_rect_call() -> RawToolCall {
    RawToolCall::new(
        "createShape",
        json!({"type": "rectangle", "x": 100, "y": 100, "width": 100, "height": 100, "fill": "red"}),
    )
}

// =========================================================================
// Sync and locks
// =========================================================================

#[tokio::test(start_paused = true)]
async fn second_session_observes_identical_rectangle() {
    let fx = fixture(ScriptedTranslator::new(Vec::new()));
    let a = join(&fx, "r1", "ana", Role::Editor).await;
    let mut b = join(&fx, "r1", "ben", Role::Editor).await;

    let outcome = a.handle.edit(a.session_id, Edit::Create(Shape::rectangle(100.0, 100.0, 100.0, 100.0))).await.unwrap();
    let EditOutcome::Applied(changes) = outcome else { panic!("create should apply") };
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, ChangeKind::Created);
    sync(&a.handle).await;

    let pushes = drain(&mut b.events, "shape:changed");
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].room_id.as_deref(), Some("r1"));
    let shapes: Vec<Shape> = serde_json::from_value(pushes[0].data["shapes"].clone()).unwrap();
    assert_eq!(shapes.len(), 1);

    let seen = &shapes[0];
    assert_eq!(seen.id, changes[0].id);
    assert_eq!((seen.x, seen.y), (100.0, 100.0));
    assert_eq!(seen.geometry, Geometry::Rectangle { width: 100.0, height: 100.0 });
    assert_eq!(seen.created_by, a.user_id.to_string());
    assert!(!seen.ai_generated);
}

#[tokio::test(start_paused = true)]
async fn lock_hands_over_after_deselect() {
    let fx = fixture(ScriptedTranslator::new(Vec::new()));
    let a = join(&fx, "r1", "ana", Role::Editor).await;
    let b = join(&fx, "r1", "ben", Role::Editor).await;
    let r = create(&a, Shape::rectangle(0.0, 0.0, 50.0, 50.0)).await;

    let granted = a.handle.select(a.session_id, vec![r]).await.unwrap();
    assert!(matches!(granted, SelectOutcome::Granted { ref acquired, .. } if acquired == &vec![r]));

    match b.handle.select(b.session_id, vec![r]).await.unwrap() {
        SelectOutcome::Denied { shape_id, holder } => {
            assert_eq!(shape_id, r);
            assert_eq!(holder.user_name, "ana");
            assert_eq!(holder.color, a.state.color);
        }
        other => panic!("expected denial, got {other:?}"),
    }

    let edit = Edit::Update { id: r, changes: vec![(Field::X, FieldValue::Number(300.0))] };
    assert_eq!(b.handle.edit(b.session_id, edit).await.unwrap(), EditOutcome::Ignored);

    assert_eq!(a.handle.deselect(a.session_id, None).await.unwrap(), vec![r]);
    let granted = b.handle.select(b.session_id, vec![r]).await.unwrap();
    assert!(matches!(granted, SelectOutcome::Granted { ref acquired, .. } if acquired == &vec![r]));
}

#[tokio::test(start_paused = true)]
async fn viewer_actions_are_ignored_or_recorded_as_permission_failures() {
    let fx = fixture(ScriptedTranslator::new(vec![Ok(vec![create_rect_call()])]));
    let v = join(&fx, "r1", "vic", Role::Viewer).await;

    let outcome = v.handle.edit(v.session_id, Edit::Create(Shape::circle(0.0, 0.0, 10.0))).await.unwrap();
    assert_eq!(outcome, EditOutcome::Ignored);
    assert_eq!(v.handle.select(v.session_id, Vec::new()).await.unwrap(), SelectOutcome::ReadOnly);

    let entry = v.handle.prompt(v.session_id, prompt("c1", "draw a square")).await.unwrap();
    assert!(!entry.success);
    assert!(entry.error.as_deref().unwrap_or_default().contains("read-only"));
    assert_eq!(fx.translator.calls(), 0);
    assert!(v.handle.snapshot().await.unwrap().records.is_empty());
}

#[tokio::test(start_paused = true)]
async fn unknown_session_is_not_joined() {
    let fx = fixture(ScriptedTranslator::new(Vec::new()));
    let a = join(&fx, "r1", "ana", Role::Editor).await;
    let err = a.handle.edit(Uuid::new_v4(), Edit::Delete(Vec::new())).await.unwrap_err();
    assert!(matches!(err, RoomError::NotJoined));
}

#[tokio::test(start_paused = true)]
async fn deleting_a_selected_shape_releases_its_lock() {
    let fx = fixture(ScriptedTranslator::new(Vec::new()));
    let a = join(&fx, "r1", "ana", Role::Editor).await;
    let mut b = join(&fx, "r1", "ben", Role::Editor).await;
    let r = create(&a, Shape::rectangle(0.0, 0.0, 50.0, 50.0)).await;
    a.handle.select(a.session_id, vec![r]).await.unwrap();

    let outcome = a.handle.edit(a.session_id, Edit::Delete(vec![r])).await.unwrap();
    assert!(matches!(outcome, EditOutcome::Applied(ref c) if c[0].kind == ChangeKind::Deleted));
    sync(&a.handle).await;

    let locks = drain(&mut b.events, "lock:changed");
    let last = locks.last().expect("lock change pushed");
    assert_eq!(last.data["locks"], json!({}));
}

#[tokio::test(start_paused = true)]
async fn repeated_delete_ids_delete_once() {
    let fx = fixture(ScriptedTranslator::new(Vec::new()));
    let a = join(&fx, "r1", "ana", Role::Editor).await;
    let r = create(&a, Shape::rectangle(0.0, 0.0, 50.0, 50.0)).await;

    let outcome = a.handle.edit(a.session_id, Edit::Delete(vec![r, r])).await.unwrap();
    assert_eq!(outcome, EditOutcome::Applied(vec![Change { id: r, kind: ChangeKind::Deleted }]));
    let b = join(&fx, "r1", "ben", Role::Editor).await;
    assert!(b.state.shapes.is_empty());
}

#[tokio::test(start_paused = true)]
async fn idle_lease_expires_and_frees_locks() {
    let fx = fixture(ScriptedTranslator::new(Vec::new()));
    let a = join(&fx, "r1", "ana", Role::Editor).await;
    let b = join(&fx, "r1", "ben", Role::Editor).await;
    let r = create(&a, Shape::rectangle(0.0, 0.0, 50.0, 50.0)).await;
    a.handle.select(a.session_id, vec![r]).await.unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(matches!(b.handle.select(b.session_id, vec![r]).await.unwrap(), SelectOutcome::Denied { .. }));

    tokio::time::sleep(Duration::from_secs(22)).await;
    let granted = b.handle.select(b.session_id, vec![r]).await.unwrap();
    assert!(matches!(granted, SelectOutcome::Granted { ref acquired, .. } if acquired == &vec![r]));
}

#[tokio::test(start_paused = true)]
async fn remote_update_is_merged_and_pushed() {
    let fx = fixture(ScriptedTranslator::new(Vec::new()));
    let mut a = join(&fx, "r1", "ana", Role::Editor).await;

    let mut replica = Document::new(Uuid::new_v4(), 10);
    let shape = Shape::text(5.0, 5.0, "hi");
    let id = shape.id;
    let (_, update) = replica.apply_transaction(vec![Mutation::Create(shape)]).unwrap();

    let delta = a.handle.merge(a.session_id, update.clone()).await.unwrap();
    assert_eq!(delta.changes.len(), 1);
    assert!(matches!(delta.origin, Origin::Remote(r) if r == replica.replica()));
    // Redelivery is a no-op.
    assert!(a.handle.merge(a.session_id, update).await.unwrap().is_empty());
    sync(&a.handle).await;

    let pushes = drain(&mut a.events, "shape:changed");
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].data["shapes"][0]["id"], json!(id));
}

// =========================================================================
// Persistence
// =========================================================================

#[tokio::test(start_paused = true)]
async fn burst_then_quiet_commits_exactly_once() {
    let fx = fixture(ScriptedTranslator::new(Vec::new()));
    let a = join(&fx, "r1", "ana", Role::Editor).await;

    for i in 0..5 {
        create(&a, Shape::rectangle(f64::from(i) * 20.0, 0.0, 10.0, 10.0)).await;
        tokio::time::advance(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(fx.store.save_count(), 1);
    assert_eq!(fx.store.get("r1").unwrap().records.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn continuous_edits_commit_at_least_every_max_wait() {
    let fx = fixture(ScriptedTranslator::new(Vec::new()));
    let a = join(&fx, "r1", "ana", Role::Editor).await;
    let id = create(&a, Shape::rectangle(0.0, 0.0, 10.0, 10.0)).await;

    let start = Instant::now();
    let mut commits = Vec::new();
    let mut seen = fx.store.save_count();
    for step in 0..50 {
        let edit = Edit::Update { id, changes: vec![(Field::X, FieldValue::Number(f64::from(step)))] };
        a.handle.edit(a.session_id, edit).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        if fx.store.save_count() > seen {
            seen = fx.store.save_count();
            commits.push(start.elapsed());
        }
    }

    assert!(commits.len() >= 2, "commits at {commits:?}");
    assert!(commits[0] <= Duration::from_millis(2100), "commits at {commits:?}");
    for pair in commits.windows(2) {
        assert!(pair[1] - pair[0] <= Duration::from_millis(2100), "commits at {commits:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn hydrates_persisted_state_before_first_mutation() {
    let fx = fixture(ScriptedTranslator::new(Vec::new()));
    let mut seed = Document::new(Uuid::new_v4(), 10);
    let kept = Shape::rectangle(1.0, 2.0, 30.0, 40.0);
    let kept_id = kept.id;
    let gone = Shape::circle(0.0, 0.0, 10.0);
    let gone_id = gone.id;
    seed.apply_transaction(vec![Mutation::Create(kept), Mutation::Create(gone)]).unwrap();
    seed.apply_transaction(vec![Mutation::Delete(gone_id)]).unwrap();
    fx.store.put("r1", seed.snapshot());

    let a = join(&fx, "r1", "ana", Role::Editor).await;
    assert_eq!(a.state.shapes.len(), 1);
    assert_eq!(a.state.shapes[0].id, kept_id);

    let err = a
        .handle
        .edit(a.session_id, Edit::Update { id: gone_id, changes: vec![(Field::X, FieldValue::Number(5.0))] })
        .await
        .unwrap_err();
    assert!(matches!(err, RoomError::Document(_)));

    create(&a, Shape::rectangle(0.0, 0.0, 10.0, 10.0)).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    let saved = fx.store.get("r1").unwrap();
    assert_eq!(Document::from_snapshot(Uuid::new_v4(), saved, 10).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn empty_room_starts_blank_and_writes_nothing() {
    let fx = fixture(ScriptedTranslator::new(Vec::new()));
    let a = join(&fx, "fresh", "ana", Role::Editor).await;
    assert!(a.state.shapes.is_empty());
    assert!(a.state.history.is_empty());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(fx.store.save_count(), 0);
    assert!(fx.store.get("fresh").is_none());
}

#[tokio::test(start_paused = true)]
async fn failed_hydrate_is_unavailable_until_the_store_recovers() {
    let fx = fixture(ScriptedTranslator::new(Vec::new()));
    fx.store.set_fail_loads(true);
    let (tx, _rx) = mpsc::channel(8);
    let err = fx
        .registry
        .join("r1", Uuid::new_v4(), identity("ana", Role::Editor), None, tx)
        .await
        .unwrap_err();
    assert!(matches!(err, RoomError::Unavailable(_)));
    assert!(!fx.registry.contains("r1").await);

    fx.store.set_fail_loads(false);
    join(&fx, "r1", "ana", Role::Editor).await;
    assert!(fx.registry.contains("r1").await);
}

#[tokio::test(start_paused = true)]
async fn failed_commit_retries_with_current_state() {
    let fx = fixture(ScriptedTranslator::new(Vec::new()));
    let a = join(&fx, "r1", "ana", Role::Editor).await;
    fx.store.set_fail_saves(true);

    let first = create(&a, Shape::rectangle(0.0, 0.0, 10.0, 10.0)).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(fx.store.save_count(), 0);
    assert!(a.handle.snapshot().await.unwrap().records.contains_key(&first));

    let second = create(&a, Shape::rectangle(50.0, 0.0, 10.0, 10.0)).await;
    fx.store.set_fail_saves(false);
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(fx.store.save_count(), 1);
    let saved = fx.store.get("r1").unwrap();
    assert!(saved.records.contains_key(&first));
    assert!(saved.records.contains_key(&second));
}

#[tokio::test(start_paused = true)]
async fn idle_room_flushes_and_evicts_after_last_leave() {
    let fx = fixture(ScriptedTranslator::new(Vec::new()));
    let a = join(&fx, "r1", "ana", Role::Editor).await;
    let id = create(&a, Shape::rectangle(0.0, 0.0, 10.0, 10.0)).await;
    a.handle.leave(a.session_id).await;
    sync(&a.handle).await;

    tokio::time::sleep(Duration::from_secs(59)).await;
    assert!(fx.registry.contains("r1").await);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!fx.registry.contains("r1").await);
    assert!(fx.store.get("r1").unwrap().records.contains_key(&id));

    // Rejoining spawns a fresh actor hydrated from the store.
    let again = join(&fx, "r1", "ana", Role::Editor).await;
    assert_eq!(again.state.shapes.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_writes_unsaved_changes() {
    let fx = fixture(ScriptedTranslator::new(Vec::new()));
    let a = join(&fx, "r1", "ana", Role::Editor).await;
    let id = create(&a, Shape::rectangle(0.0, 0.0, 10.0, 10.0)).await;

    fx.registry.shutdown().await;

    assert_eq!(fx.store.save_count(), 1);
    assert!(fx.store.get("r1").unwrap().records.contains_key(&id));
    assert_eq!(fx.registry.room_count().await, 0);
    assert!(matches!(a.handle.history().await, Err(RoomError::Unavailable(_))));
}

#[tokio::test(start_paused = true)]
async fn persisted_history_keeps_only_the_newest_entries() {
    let config = RoomConfig { history_retention: 3, ..RoomConfig::default() };
    let fx = fixture_with(config, ScriptedTranslator::new(Vec::new()));
    let a = join(&fx, "r1", "ana", Role::Editor).await;
    for i in 1..=5 {
        a.handle.prompt(a.session_id, prompt(&format!("c{i}"), "do nothing")).await.unwrap();
    }

    fx.registry.shutdown().await;
    let persisted = fx.store.get("r1").expect("room was committed");
    let ids: Vec<&str> = persisted.history.iter().map(|e| e.command_id.as_str()).collect();
    assert_eq!(ids, vec!["c3", "c4", "c5"]);

    // A fresh room hydrates the same retained window.
    let b = join(&fx, "r1", "ben", Role::Editor).await;
    let ids: Vec<&str> = b.state.history.iter().map(|e| e.command_id.as_str()).collect();
    assert_eq!(ids, vec!["c3", "c4", "c5"]);
}

// =========================================================================
// AI
// =========================================================================

#[tokio::test(start_paused = true)]
async fn ai_prompt_is_applied_and_broadcast() {
    let fx = fixture(ScriptedTranslator::new(vec![Ok(vec![create_rect_call()])]));
    let a = join(&fx, "r1", "ana", Role::Editor).await;
    let mut b = join(&fx, "r1", "ben", Role::Editor).await;

    let entry = a
        .handle
        .prompt(a.session_id, prompt("c1", "Create a red rectangle at 100,100 with width 100 and height 100"))
        .await
        .unwrap();
    assert!(entry.success, "{entry:?}");
    assert_eq!(entry.affected_shape_ids.len(), 1);
    sync(&a.handle).await;

    let mut frames = Vec::new();
    while let Ok(frame) = b.events.try_recv() {
        frames.push(frame);
    }
    let changed = frames.iter().find(|f| f.syscall == "shape:changed").expect("shape push");
    let shapes: Vec<Shape> = serde_json::from_value(changed.data["shapes"].clone()).unwrap();
    assert_eq!(shapes[0].style.fill, "#FF0000");
    assert_eq!(shapes[0].created_by, crate::document::AI_ASSISTANT);
    assert!(shapes[0].ai_generated);

    let appended = frames.iter().find(|f| f.syscall == "history:appended").expect("history push");
    assert_eq!(appended.data["entries"][0]["command_id"], json!("c1"));
}

#[tokio::test(start_paused = true)]
async fn translator_timeout_records_failure_without_mutation() {
    let fx = fixture(ScriptedTranslator::slow(vec![Ok(vec![create_rect_call()])], Duration::from_secs(120)));
    let a = join(&fx, "r1", "ana", Role::Editor).await;

    let entry = a.handle.prompt(a.session_id, prompt("c1", "draw a square")).await.unwrap();
    assert!(!entry.success);
    assert!(entry.error.as_deref().unwrap_or_default().contains("did not respond"), "{entry:?}");
    assert!(a.handle.snapshot().await.unwrap().records.is_empty());
    assert_eq!(a.handle.history().await.unwrap(), vec![entry]);
}

#[tokio::test(start_paused = true)]
async fn resubmitted_command_id_returns_the_same_entry() {
    let fx = fixture(ScriptedTranslator::new(vec![Ok(vec![create_rect_call()]), Ok(vec![create_rect_call()])]));
    let a = join(&fx, "r1", "ana", Role::Editor).await;

    let first = a.handle.prompt(a.session_id, prompt("c1", "draw a square")).await.unwrap();
    let second = a.handle.prompt(a.session_id, prompt("c1", "draw a square")).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(fx.translator.calls(), 1);
    assert_eq!(a.handle.snapshot().await.unwrap().records.len(), 1);
    assert_eq!(a.handle.history().await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_duplicate_waits_for_the_original() {
    let fx = fixture(ScriptedTranslator::slow(vec![Ok(vec![create_rect_call()])], Duration::from_secs(1)));
    let a = join(&fx, "r1", "ana", Role::Editor).await;

    let (first, second) = tokio::join!(
        a.handle.prompt(a.session_id, prompt("c1", "draw a square")),
        a.handle.prompt(a.session_id, prompt("c1", "draw a square")),
    );

    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(fx.translator.calls(), 1);
    assert_eq!(a.handle.snapshot().await.unwrap().records.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn prompt_uses_the_sessions_selection_by_default() {
    let fx = fixture(ScriptedTranslator::new(vec![Ok(vec![RawToolCall::new(
        "updateShapeStyle",
        json!({"fill": "blue"}),
    )])]));
    let a = join(&fx, "r1", "ana", Role::Editor).await;
    let picked = create(&a, Shape::rectangle(0.0, 0.0, 20.0, 20.0)).await;
    let other = create(&a, Shape::rectangle(50.0, 0.0, 20.0, 20.0)).await;
    a.handle.select(a.session_id, vec![picked]).await.unwrap();

    let entry = a.handle.prompt(a.session_id, prompt("c1", "make it blue")).await.unwrap();
    assert!(entry.success, "{entry:?}");
    assert_eq!(entry.affected_shape_ids, vec![picked]);

    let snapshot = a.handle.snapshot().await.unwrap();
    let doc = Document::from_snapshot(Uuid::new_v4(), snapshot, 10);
    assert_eq!(doc.shape(picked).unwrap().style.fill, "#0000FF");
    assert_ne!(doc.shape(other).unwrap().style.fill, "#0000FF");
}
