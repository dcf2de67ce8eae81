use super::*;
use crate::model::{ObjectKind, ObjectProps};

fn obj(x: f64, y: f64) -> BoardObject {
    BoardObject::new(x, y, 100.0, 100.0, ObjectProps::defaults(ObjectKind::Rectangle), None)
}

fn insert_ops(o: &BoardObject) -> Vec<DocOp> {
    vec![DocOp::Insert(Box::new(o.clone())), DocOp::OrderInsert(o.id, None)]
}

// =============================================================================
// TRANSACTIONS
// =============================================================================

#[test]
fn apply_insert_updates_map_and_order() {
    let mut doc = BoardDoc::new();
    let a = obj(0.0, 0.0);
    doc.apply(insert_ops(&a), Origin::Local);
    assert_eq!(doc.len(), 1);
    assert_eq!(doc.order(), &[a.id]);
    assert_eq!(doc.get(a.id).unwrap().id, a.id);
}

#[test]
fn order_insert_is_idempotent() {
    let mut doc = BoardDoc::new();
    let a = obj(0.0, 0.0);
    doc.apply(insert_ops(&a), Origin::Local);
    // Replaying the same ops (at-least-once hydration) must not duplicate
    // the id in the z-order.
    doc.apply(insert_ops(&a), Origin::Hydrate);
    assert_eq!(doc.order(), &[a.id]);
    assert_eq!(doc.len(), 1);
}

#[test]
fn update_round_trip_through_blob() {
    let mut source = BoardDoc::new();
    let a = obj(3.0, 4.0);
    let update = source.apply(insert_ops(&a), Origin::Local);

    let mut replica = BoardDoc::new();
    replica.apply_update(&update.data, Origin::Hydrate).unwrap();
    assert_eq!(replica.get(a.id), source.get(a.id));
    assert_eq!(replica.order(), source.order());
}

#[test]
fn ops_use_external_tags_on_the_wire() {
    let id = Uuid::new_v4();
    let v = serde_json::to_value(vec![DocOp::OrderRemove(id), DocOp::OrderInsert(id, None)])
        .unwrap();
    assert_eq!(
        v[0].get("order_remove").unwrap().as_str().unwrap(),
        id.to_string()
    );
    assert!(v[1].get("order_insert").unwrap().is_array());

    let restored: Vec<DocOp> = serde_json::from_value(v).unwrap();
    assert_eq!(restored[0], DocOp::OrderRemove(id));
}

#[test]
fn apply_update_rejects_garbage() {
    let mut doc = BoardDoc::new();
    assert!(doc.apply_update(b"not json", Origin::Hydrate).is_err());
}

#[test]
fn snapshot_round_trip() {
    let mut doc = BoardDoc::new();
    let a = obj(0.0, 0.0);
    let b = obj(10.0, 10.0);
    doc.apply(insert_ops(&a), Origin::Local);
    doc.apply(insert_ops(&b), Origin::Local);

    let blob = doc.encode_state();
    let mut restored = BoardDoc::new();
    restored.apply_snapshot(&blob).unwrap();
    assert_eq!(restored.len(), 2);
    assert_eq!(restored.order(), doc.order());
    assert_eq!(restored.get(b.id), doc.get(b.id));
}

// =============================================================================
// NATIVE UNDO SCOPE
// =============================================================================

#[test]
fn tracked_origin_captures_untracked_does_not() {
    let mut doc = BoardDoc::new();
    doc.apply(insert_ops(&obj(0.0, 0.0)), Origin::Local);
    assert_eq!(doc.undo_len(), 1);
    doc.stop_capturing();
    doc.apply(insert_ops(&obj(1.0, 1.0)), Origin::RemoteAi);
    doc.apply(insert_ops(&obj(2.0, 2.0)), Origin::Undo);
    doc.apply(insert_ops(&obj(3.0, 3.0)), Origin::Hydrate);
    assert_eq!(doc.undo_len(), 1);
}

#[test]
fn undo_reverses_and_redo_reapplies() {
    let mut doc = BoardDoc::new();
    let a = obj(0.0, 0.0);
    doc.apply(insert_ops(&a), Origin::Local);

    let update = doc.undo().unwrap();
    assert_eq!(update.origin, Origin::Undo);
    assert!(doc.is_empty());
    assert_eq!(doc.undo_len(), 0);
    assert_eq!(doc.redo_len(), 1);

    doc.redo().unwrap();
    assert_eq!(doc.get(a.id).unwrap().id, a.id);
    assert_eq!(doc.undo_len(), 1);
    assert_eq!(doc.redo_len(), 0);
}

#[test]
fn undo_on_empty_stack_is_none() {
    let mut doc = BoardDoc::new();
    assert!(doc.undo().is_none());
    assert!(doc.redo().is_none());
}

#[test]
fn edits_within_window_coalesce_into_one_step() {
    let mut doc = BoardDoc::new();
    let a = obj(0.0, 0.0);
    let b = obj(10.0, 10.0);
    doc.apply_at(insert_ops(&a), Origin::Local, 1_000);
    doc.apply_at(insert_ops(&b), Origin::Local, 1_200);
    assert_eq!(doc.undo_len(), 1);

    // One undo reverses both coalesced edits.
    doc.undo().unwrap();
    assert!(doc.is_empty());
}

#[test]
fn edits_outside_window_become_separate_steps() {
    let mut doc = BoardDoc::new();
    doc.apply_at(insert_ops(&obj(0.0, 0.0)), Origin::Local, 1_000);
    doc.apply_at(insert_ops(&obj(10.0, 10.0)), Origin::Local, 2_000);
    assert_eq!(doc.undo_len(), 2);
}

#[test]
fn stop_capturing_closes_the_window() {
    let mut doc = BoardDoc::new();
    doc.apply_at(insert_ops(&obj(0.0, 0.0)), Origin::Local, 1_000);
    doc.stop_capturing();
    doc.apply_at(insert_ops(&obj(10.0, 10.0)), Origin::Local, 1_001);
    assert_eq!(doc.undo_len(), 2);
}

#[test]
fn tracked_push_clears_native_redo() {
    let mut doc = BoardDoc::new();
    doc.apply_at(insert_ops(&obj(0.0, 0.0)), Origin::Local, 1_000);
    doc.undo().unwrap();
    assert_eq!(doc.redo_len(), 1);
    doc.apply_at(insert_ops(&obj(5.0, 5.0)), Origin::Local, 5_000);
    assert_eq!(doc.redo_len(), 0);
}

#[test]
fn evict_oldest_drops_the_bottom_step() {
    let mut doc = BoardDoc::new();
    let a = obj(0.0, 0.0);
    let b = obj(10.0, 10.0);
    doc.apply_at(insert_ops(&a), Origin::Local, 1_000);
    doc.apply_at(insert_ops(&b), Origin::Local, 10_000);
    assert_eq!(doc.undo_len(), 2);

    doc.evict_oldest_undo();
    assert_eq!(doc.undo_len(), 1);
    // The remaining step is the newer one: undoing removes b, not a.
    doc.undo().unwrap();
    assert!(doc.get(a.id).is_some());
    assert!(doc.get(b.id).is_none());
}

#[test]
fn undo_restores_replaced_content() {
    let mut doc = BoardDoc::new();
    let a = obj(0.0, 0.0);
    doc.apply_at(insert_ops(&a), Origin::Local, 1_000);

    let mut moved = a.clone();
    moved.x = 500.0;
    doc.apply_at(vec![DocOp::Replace(Box::new(moved))], Origin::Local, 10_000);
    assert!((doc.get(a.id).unwrap().x - 500.0).abs() < f64::EPSILON);

    doc.undo().unwrap();
    assert!((doc.get(a.id).unwrap().x).abs() < f64::EPSILON);
}
