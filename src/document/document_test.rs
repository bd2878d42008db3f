use std::sync::{Arc, Mutex};

use super::*;

fn replica() -> Document {
    Document::new(Uuid::new_v4(), 50)
}

fn entry(command_id: &str) -> HistoryEntry {
    HistoryEntry {
        command_id: command_id.into(),
        user_id: Uuid::new_v4(),
        user_name: "ana".into(),
        timestamp: 1_700_000_000_000,
        prompt: "make a box".into(),
        success: true,
        affected_shape_ids: Vec::new(),
        error: None,
    }
}

/// Create a rectangle on `a` and sync it to `b`.
fn seeded_pair() -> (Document, Document, ShapeId) {
    let mut a = replica();
    let mut b = replica();
    let rect = Shape::rectangle(100.0, 100.0, 100.0, 100.0);
    let id = rect.id;
    let (_, update) = a.apply_transaction(vec![Mutation::Create(rect)]).unwrap();
    b.apply_remote(&update).unwrap();
    (a, b, id)
}

// =============================================================================
// transactions
// =============================================================================

#[test]
fn create_shape_is_visible_with_created_delta() {
    let mut doc = replica();
    let shape = Shape::circle(10.0, 10.0, 20.0).with_creator("u1");
    let id = shape.id;
    let (delta, update) = doc.apply_transaction(vec![Mutation::Create(shape)]).unwrap();

    assert_eq!(delta.origin, Origin::Local);
    assert_eq!(delta.changes, vec![Change { id, kind: ChangeKind::Created }]);
    assert!(!update.is_empty());

    let stored = doc.shape(id).unwrap();
    assert_eq!(stored.kind(), ShapeKind::Circle);
    assert_eq!(stored.created_by, "u1");
    assert!(stored.created > Stamp::ZERO);
}

#[test]
fn failing_mutation_leaves_document_untouched() {
    let mut doc = replica();
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    doc.subscribe(move |_| *counter.lock().unwrap() += 1);

    let good = Shape::rectangle(0.0, 0.0, 50.0, 50.0);
    let missing = Uuid::new_v4();
    let result = doc.apply_transaction(vec![
        Mutation::Create(good.clone()),
        Mutation::Create(Shape::rectangle(10.0, 10.0, 20.0, 20.0)),
        Mutation::set(missing, Field::X, FieldValue::Number(1.0)),
    ]);

    assert_eq!(result.unwrap_err(), DocumentError::UnknownShape(missing));
    assert!(doc.is_empty());
    assert!(!doc.is_tombstoned(good.id));
    assert_eq!(*calls.lock().unwrap(), 0);
}

#[test]
fn update_can_target_shape_created_earlier_in_same_batch() {
    let mut doc = replica();
    let shape = Shape::rectangle(0.0, 0.0, 50.0, 50.0);
    let id = shape.id;
    let (delta, _) = doc
        .apply_transaction(vec![Mutation::Create(shape), Mutation::set(id, Field::Fill, FieldValue::Text("#FF0000".into()))])
        .unwrap();

    assert_eq!(delta.changes.len(), 1);
    assert_eq!(delta.changes[0].kind, ChangeKind::Created);
    assert_eq!(doc.shape(id).unwrap().style.fill, "#FF0000");
}

#[test]
fn update_rejects_fields_foreign_to_the_kind() {
    let mut doc = replica();
    let circle = Shape::circle(0.0, 0.0, 10.0);
    let id = circle.id;
    doc.apply_transaction(vec![Mutation::Create(circle)]).unwrap();

    let err = doc.apply_transaction(vec![Mutation::set(id, Field::Width, FieldValue::Number(5.0))]).unwrap_err();
    assert!(matches!(err, DocumentError::InvalidField { field: Field::Width, kind: "circle" }));

    let err = doc.apply_transaction(vec![Mutation::set(id, Field::Radius, FieldValue::Number(-5.0))]).unwrap_err();
    assert!(matches!(err, DocumentError::InvalidValue(_)));
}

#[test]
fn rotation_is_normalized_on_write() {
    let mut doc = replica();
    let shape = Shape::rectangle(0.0, 0.0, 50.0, 50.0);
    let id = shape.id;
    doc.apply_transaction(vec![Mutation::Create(shape)]).unwrap();
    doc.apply_transaction(vec![Mutation::set(id, Field::Rotation, FieldValue::Number(450.0))]).unwrap();
    assert!((doc.shape(id).unwrap().rotation - 90.0).abs() < f64::EPSILON);
}

#[test]
fn deleted_id_is_never_reused() {
    let mut doc = replica();
    let shape = Shape::rectangle(0.0, 0.0, 50.0, 50.0);
    let id = shape.id;
    doc.apply_transaction(vec![Mutation::Create(shape.clone())]).unwrap();
    doc.apply_transaction(vec![Mutation::Delete(id)]).unwrap();

    assert!(doc.is_tombstoned(id));
    assert_eq!(doc.apply_transaction(vec![Mutation::Create(shape)]).unwrap_err(), DocumentError::DuplicateId(id));
    assert_eq!(
        doc.apply_transaction(vec![Mutation::set(id, Field::X, FieldValue::Number(1.0))]).unwrap_err(),
        DocumentError::UnknownShape(id)
    );
}

#[test]
fn double_delete_in_one_batch_is_rejected() {
    let mut doc = replica();
    let shape = Shape::rectangle(0.0, 0.0, 50.0, 50.0);
    let id = shape.id;
    doc.apply_transaction(vec![Mutation::Create(shape)]).unwrap();
    let err = doc.apply_transaction(vec![Mutation::Delete(id), Mutation::Delete(id)]).unwrap_err();
    assert_eq!(err, DocumentError::UnknownShape(id));
    assert!(doc.contains(id));
}

#[test]
fn next_z_is_above_top_shape() {
    let mut doc = replica();
    assert_eq!(doc.next_z(), 0);
    let mut shape = Shape::rectangle(0.0, 0.0, 50.0, 50.0);
    shape.z_index = 7;
    doc.apply_transaction(vec![Mutation::Create(shape)]).unwrap();
    assert_eq!(doc.next_z(), 8);
}

// =============================================================================
// subscriptions
// =============================================================================

#[test]
fn subscriber_sees_one_delta_per_transaction() {
    let mut doc = replica();
    let seen: Arc<Mutex<Vec<Delta>>> = Arc::default();
    let sink = seen.clone();
    let sub = doc.subscribe(move |d| sink.lock().unwrap().push(d.clone()));

    let a = Shape::rectangle(0.0, 0.0, 20.0, 20.0);
    let b = Shape::text(0.0, 40.0, "hi");
    doc.apply_transaction(vec![Mutation::Create(a.clone()), Mutation::Create(b.clone())]).unwrap();
    doc.apply_transaction(vec![Mutation::Delete(a.id), Mutation::set(b.id, Field::X, FieldValue::Number(9.0))])
        .unwrap();

    {
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].changes.len(), 2);
        assert!(seen[1].changes.contains(&Change { id: a.id, kind: ChangeKind::Deleted }));
        assert!(seen[1].changes.contains(&Change { id: b.id, kind: ChangeKind::Updated }));
    }

    assert!(doc.unsubscribe(sub));
    assert!(!doc.unsubscribe(sub));
    doc.apply_transaction(vec![Mutation::Delete(b.id)]).unwrap();
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[test]
fn empty_remote_update_does_not_notify() {
    let (mut a, mut b, id) = seeded_pair();
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    b.subscribe(move |_| *counter.lock().unwrap() += 1);

    // Redelivery of an already-merged update changes nothing.
    let (_, update) = a.apply_transaction(vec![Mutation::set(id, Field::X, FieldValue::Number(5.0))]).unwrap();
    b.apply_remote(&update).unwrap();
    b.apply_remote(&update).unwrap();
    assert_eq!(*calls.lock().unwrap(), 1);
}

// =============================================================================
// merge semantics
// =============================================================================

#[test]
fn remote_replica_observes_identical_shape() {
    let (a, b, id) = seeded_pair();
    let shape = b.shape(id).unwrap();
    assert_eq!(Some(shape.clone()), a.shape(id));
    let bounds = shape.bounds();
    assert_eq!((bounds.x, bounds.y, bounds.width, bounds.height), (100.0, 100.0, 100.0, 100.0));
}

#[test]
fn disjoint_field_edits_converge_in_any_order() {
    let (mut a, mut b, id) = seeded_pair();
    let (_, from_a) = a.apply_transaction(vec![Mutation::set(id, Field::X, FieldValue::Number(300.0))]).unwrap();
    let (_, from_b) =
        b.apply_transaction(vec![Mutation::set(id, Field::Fill, FieldValue::Text("#00FF00".into()))]).unwrap();

    // a sees b's op after its own, b sees a's op after its own.
    a.apply_remote(&from_b).unwrap();
    b.apply_remote(&from_a).unwrap();

    let left = a.shape(id).unwrap();
    let right = b.shape(id).unwrap();
    assert_eq!(left, right);
    assert!((left.x - 300.0).abs() < f64::EPSILON);
    assert_eq!(left.style.fill, "#00FF00");
}

#[test]
fn same_field_conflict_has_one_winner_everywhere() {
    let (mut a, mut b, id) = seeded_pair();
    let (_, from_a) = a.apply_transaction(vec![Mutation::set(id, Field::X, FieldValue::Number(1.0))]).unwrap();
    let (_, from_b) = b.apply_transaction(vec![Mutation::set(id, Field::X, FieldValue::Number(2.0))]).unwrap();
    a.apply_remote(&from_b).unwrap();
    b.apply_remote(&from_a).unwrap();
    assert_eq!(a.shape(id), b.shape(id));
}

#[test]
fn concurrent_edit_and_delete_converge_to_deleted() {
    for edit_first in [true, false] {
        let (mut a, mut b, id) = seeded_pair();
        let mut c = replica();
        c.apply_remote(&a.state_update()).unwrap();

        let (_, edit) = a.apply_transaction(vec![Mutation::set(id, Field::X, FieldValue::Number(9.0))]).unwrap();
        let (_, delete) = b.apply_transaction(vec![Mutation::Delete(id)]).unwrap();
        if edit_first {
            c.apply_remote(&edit).unwrap();
            c.apply_remote(&delete).unwrap();
        } else {
            c.apply_remote(&delete).unwrap();
            c.apply_remote(&edit).unwrap();
        }
        a.apply_remote(&delete).unwrap();
        b.apply_remote(&edit).unwrap();

        for doc in [&a, &b, &c] {
            assert!(doc.shape(id).is_none());
            assert!(doc.is_tombstoned(id));
        }
    }
}

#[test]
fn concurrent_creates_yield_two_shapes() {
    let mut a = replica();
    let mut b = replica();
    let (_, from_a) = a.apply_transaction(vec![Mutation::Create(Shape::rectangle(0.0, 0.0, 20.0, 20.0))]).unwrap();
    let (_, from_b) = b.apply_transaction(vec![Mutation::Create(Shape::rectangle(0.0, 0.0, 20.0, 20.0))]).unwrap();
    a.apply_remote(&from_b).unwrap();
    b.apply_remote(&from_a).unwrap();
    assert_eq!(a.len(), 2);
    assert_eq!(a.shapes(), b.shapes());
}

#[test]
fn field_writes_arriving_before_create_are_kept() {
    let mut a = replica();
    let shape = Shape::rectangle(0.0, 0.0, 20.0, 20.0);
    let id = shape.id;
    let (_, create) = a.apply_transaction(vec![Mutation::Create(shape)]).unwrap();
    let (_, edit) = a.apply_transaction(vec![Mutation::set(id, Field::Y, FieldValue::Number(70.0))]).unwrap();

    let mut b = replica();
    let early = b.apply_remote(&edit).unwrap();
    assert!(early.changes.is_empty());
    assert!(!b.contains(id));

    let late = b.apply_remote(&create).unwrap();
    assert_eq!(late.changes, vec![Change { id, kind: ChangeKind::Created }]);
    assert!((b.shape(id).unwrap().y - 70.0).abs() < f64::EPSILON);
}

#[test]
fn history_entries_merge_once() {
    let mut a = replica();
    let (delta, update) = a.apply_transaction(vec![Mutation::RecordHistory(entry("cmd-1"))]).unwrap();
    assert_eq!(delta.history, vec!["cmd-1".to_string()]);

    let mut b = replica();
    assert_eq!(b.apply_remote(&update).unwrap().history.len(), 1);
    assert!(b.apply_remote(&update).unwrap().history.is_empty());
    assert_eq!(b.history().len(), 1);

    // Recording a known command again is a silent no-op.
    let (delta, update) = a.apply_transaction(vec![Mutation::RecordHistory(entry("cmd-1"))]).unwrap();
    assert!(delta.is_empty());
    assert!(update.is_empty());
}

// =============================================================================
// snapshots
// =============================================================================

#[test]
fn snapshot_round_trip_keeps_tombstones_and_clock() {
    let mut doc = replica();
    let keep = Shape::text(5.0, 5.0, "keep");
    let gone = Shape::rectangle(0.0, 0.0, 20.0, 20.0);
    doc.apply_transaction(vec![
        Mutation::Create(keep.clone()),
        Mutation::Create(gone.clone()),
        Mutation::RecordHistory(entry("cmd-1")),
    ])
    .unwrap();
    doc.apply_transaction(vec![Mutation::Delete(gone.id)]).unwrap();

    let json = serde_json::to_value(doc.snapshot()).unwrap();
    let snapshot: DocumentSnapshot = serde_json::from_value(json).unwrap();
    let mut restored = Document::from_snapshot(Uuid::new_v4(), snapshot, 50);

    assert_eq!(restored.shapes(), doc.shapes());
    assert!(restored.is_tombstoned(gone.id));
    assert!(restored.history().contains("cmd-1"));
    let gone_id = gone.id;
    assert_eq!(
        restored.apply_transaction(vec![Mutation::Create(gone)]).unwrap_err(),
        DocumentError::DuplicateId(gone_id)
    );
    assert!(restored.contains(keep.id));
}

#[test]
fn restored_clock_outranks_persisted_stamps() {
    let mut doc = replica();
    let shape = Shape::rectangle(0.0, 0.0, 20.0, 20.0);
    let id = shape.id;
    doc.apply_transaction(vec![Mutation::Create(shape)]).unwrap();
    let (_, stale) = doc.apply_transaction(vec![Mutation::set(id, Field::X, FieldValue::Number(1.0))]).unwrap();

    let mut restored = Document::from_snapshot(Uuid::new_v4(), doc.snapshot(), 50);
    restored.apply_transaction(vec![Mutation::set(id, Field::X, FieldValue::Number(2.0))]).unwrap();
    restored.apply_remote(&stale).unwrap();
    assert!((restored.shape(id).unwrap().x - 2.0).abs() < f64::EPSILON);
}

#[test]
fn state_update_bootstraps_a_fresh_replica() {
    let (mut a, _, id) = seeded_pair();
    let extra = Shape::circle(0.0, 0.0, 10.0);
    a.apply_transaction(vec![Mutation::Create(extra.clone()), Mutation::RecordHistory(entry("c"))]).unwrap();
    a.apply_transaction(vec![Mutation::Delete(extra.id)]).unwrap();

    let mut fresh = replica();
    fresh.apply_remote(&a.state_update()).unwrap();
    assert_eq!(fresh.shapes(), a.shapes());
    assert!(fresh.contains(id));
    assert!(fresh.is_tombstoned(extra.id));
    assert!(fresh.history().contains("c"));
}

#[test]
fn far_future_stamp_is_rejected_and_local_writes_keep_winning() {
    let (_, mut b, id) = seeded_pair();
    let hostile = Update {
        replica: Uuid::new_v4(),
        ops: vec![Op::Set {
            id,
            field: Field::X,
            value: FieldValue::Number(-1.0),
            stamp: Stamp { clock: u64::MAX, replica: Uuid::new_v4() },
        }],
    };
    let before = b.clock();
    assert!(matches!(b.apply_remote(&hostile), Err(DocumentError::ClockSkew { .. })));
    assert_eq!(b.clock(), before);

    b.apply_transaction(vec![Mutation::set(id, Field::X, FieldValue::Number(42.0))]).unwrap();
    assert!((b.shape(id).unwrap().x - 42.0).abs() < f64::EPSILON);
}

#[test]
fn exhausted_clock_fails_the_transaction_without_mutating() {
    let mut doc = replica();
    let shape = Shape::rectangle(0.0, 0.0, 20.0, 20.0);
    let id = shape.id;
    doc.apply_transaction(vec![Mutation::Create(shape)]).unwrap();

    let mut snapshot = doc.snapshot();
    snapshot.clock = u64::MAX;
    let mut restored = Document::from_snapshot(Uuid::new_v4(), snapshot, 50);
    assert_eq!(
        restored.apply_transaction(vec![Mutation::set(id, Field::X, FieldValue::Number(9.0))]).unwrap_err(),
        DocumentError::ClockExhausted
    );
    assert!(restored.shape(id).unwrap().x.abs() < f64::EPSILON);
}

#[test]
fn remote_writes_are_type_and_kind_checked_as_a_whole() {
    let (mut a, mut b, id) = seeded_pair();
    let stamp = Stamp { clock: a.clock() + 1, replica: a.replica() };

    // Radius on a rectangle, batched with an otherwise valid write.
    let wrong_kind = Update {
        replica: a.replica(),
        ops: vec![
            Op::Set { id, field: Field::X, value: FieldValue::Number(7.0), stamp },
            Op::Set { id, field: Field::Radius, value: FieldValue::Number(7.0), stamp },
        ],
    };
    assert!(matches!(b.apply_remote(&wrong_kind), Err(DocumentError::InvalidField { .. })));
    assert!((b.shape(id).unwrap().x - 100.0).abs() < f64::EPSILON);

    let wrong_type = Update {
        replica: a.replica(),
        ops: vec![Op::Set { id, field: Field::Fill, value: FieldValue::Number(1.0), stamp }],
    };
    assert!(matches!(b.apply_remote(&wrong_type), Err(DocumentError::InvalidValue(_))));

    // A kind declared by a create in the same update is honoured.
    let circle = Shape::circle(0.0, 0.0, 5.0);
    let (_, create) = a.apply_transaction(vec![Mutation::Create(circle.clone())]).unwrap();
    assert!(b.apply_remote(&create).is_ok());
    assert!(b.contains(circle.id));
}
