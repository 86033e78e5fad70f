use cirrus_model::{Entity, FieldOperation, OperationError, OperationSet, Value};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn set(v: impl Into<Value>) -> FieldOperation {
    FieldOperation::set(v)
}

fn inc(n: i64) -> FieldOperation {
    FieldOperation::increment(n)
}

fn add_unique(values: &[&str]) -> FieldOperation {
    FieldOperation::add_unique(values.iter().map(|v| Value::from(*v)).collect())
}

fn remove(values: &[&str]) -> FieldOperation {
    FieldOperation::remove(values.iter().map(|v| Value::from(*v)).collect())
}

fn list(values: &[&str]) -> Value {
    Value::Array(values.iter().map(|v| Value::from(*v)).collect())
}

fn merge(op: &FieldOperation, previous: Option<&FieldOperation>) -> Result<FieldOperation, OperationError> {
    op.merge_with_previous(previous)
}

fn assert_invalid(op: &FieldOperation, previous: &FieldOperation) {
    let err = merge(op, Some(previous)).unwrap_err();
    assert!(
        matches!(err, OperationError::InvalidSequence { .. }),
        "{} after {} should be invalid, got {err:?}",
        op.name(),
        previous.name()
    );
}

fn all_previous() -> Vec<FieldOperation> {
    vec![
        set(list(&["a"])),
        FieldOperation::Delete,
        inc(3),
        add_unique(&["a"]),
        remove(&["a"]),
    ]
}

// ── Set and Delete absorb everything ─────────────────────────────

#[test]
fn set_wins_over_every_previous() {
    let op = set(7);
    assert_eq!(merge(&op, None).unwrap(), op);
    for previous in all_previous() {
        assert_eq!(merge(&op, Some(&previous)).unwrap(), op);
    }
}

#[test]
fn delete_wins_over_every_previous() {
    let op = FieldOperation::Delete;
    assert_eq!(merge(&op, None).unwrap(), op);
    for previous in all_previous() {
        assert_eq!(merge(&op, Some(&previous)).unwrap(), op);
    }
}

// ── Increment ────────────────────────────────────────────────────

#[test]
fn increment_row() {
    let op = inc(2);
    assert_eq!(merge(&op, None).unwrap(), inc(2));
    assert_eq!(merge(&op, Some(&set(5))).unwrap(), set(7));
    assert_eq!(merge(&op, Some(&FieldOperation::Delete)).unwrap(), set(2));
    assert_eq!(merge(&op, Some(&inc(3))).unwrap(), inc(5));
    assert_invalid(&op, &set("five"));
    assert_invalid(&op, &add_unique(&["a"]));
    assert_invalid(&op, &remove(&["a"]));
}

#[test]
fn increment_overflow_is_an_error() {
    let err = merge(&inc(1), Some(&inc(i64::MAX))).unwrap_err();
    assert!(matches!(err, OperationError::Numeric(_)));
}

#[test]
fn increment_widens_to_float() {
    let op = FieldOperation::increment(0.5);
    assert_eq!(merge(&op, Some(&set(1))).unwrap(), set(1.5));
}

// ── AddUnique ────────────────────────────────────────────────────

#[test]
fn add_unique_row() {
    let op = add_unique(&["b", "c"]);
    assert_eq!(merge(&op, None).unwrap(), op);
    assert_eq!(
        merge(&op, Some(&set(list(&["a", "b"])))).unwrap(),
        set(list(&["a", "b", "c"]))
    );
    assert_eq!(
        merge(&op, Some(&FieldOperation::Delete)).unwrap(),
        set(list(&["b", "c"]))
    );
    assert_invalid(&op, &inc(1));
    assert_eq!(
        merge(&op, Some(&add_unique(&["a", "b"]))).unwrap(),
        add_unique(&["a", "b", "c"])
    );
    assert_invalid(&op, &remove(&["a"]));
}

// ── Remove ───────────────────────────────────────────────────────

#[test]
fn remove_row() {
    let op = remove(&["b"]);
    assert_eq!(merge(&op, None).unwrap(), op);
    assert_eq!(
        merge(&op, Some(&set(list(&["a", "b", "c"])))).unwrap(),
        set(list(&["a", "c"]))
    );
    assert_invalid(&op, &inc(1));
    assert_invalid(&op, &add_unique(&["a"]));
    assert_eq!(
        merge(&op, Some(&remove(&["a", "b"]))).unwrap(),
        remove(&["a", "b"])
    );
    assert_eq!(
        merge(&remove(&["c"]), Some(&remove(&["a"]))).unwrap(),
        remove(&["a", "c"])
    );
}

#[test]
fn remove_after_delete_keeps_the_delete() {
    // Unlike AddUnique, a Remove queued after a Delete leaves the Delete as is.
    let merged = merge(&remove(&["a"]), Some(&FieldOperation::Delete)).unwrap();
    assert_eq!(merged, FieldOperation::Delete);
    let add = merge(&add_unique(&["a"]), Some(&FieldOperation::Delete)).unwrap();
    assert_eq!(add, set(list(&["a"])));
}

// ── Add ──────────────────────────────────────────────────────────

#[test]
fn add_row() {
    let op = FieldOperation::add(vec![Value::from("b")]);
    assert_eq!(merge(&op, None).unwrap(), op);
    assert_eq!(
        merge(&op, Some(&set(list(&["a", "b"])))).unwrap(),
        set(list(&["a", "b", "b"]))
    );
    assert_eq!(
        merge(&op, Some(&FieldOperation::Delete)).unwrap(),
        set(list(&["b"]))
    );
    assert_eq!(
        merge(&op, Some(&FieldOperation::add(vec![Value::from("a")]))).unwrap(),
        FieldOperation::add(vec![Value::from("a"), Value::from("b")])
    );
    assert_invalid(&op, &inc(1));
    assert_invalid(&op, &add_unique(&["a"]));
    assert_invalid(&op, &set(1));
}

// ── Relation ─────────────────────────────────────────────────────

fn saved(class_name: &str, id: &str) -> Entity {
    let entity = Entity::new(class_name);
    entity.set_object_id(Some(id.to_string()));
    entity
}

#[test]
fn relation_merge_cancels_opposites() {
    let (a, b, c) = (saved("P", "a"), saved("P", "b"), saved("P", "c"));
    let earlier = FieldOperation::relation(&[a.clone(), b.clone()], &[c.clone()]).unwrap();
    let later = FieldOperation::relation(&[c], &[a]).unwrap();

    let FieldOperation::Relation(merged) = merge(&later, Some(&earlier)).unwrap() else {
        panic!("expected a relation");
    };
    assert_eq!(merged.adds, vec!["c".to_string(), "b".to_string()]);
    assert_eq!(merged.removes, vec!["a".to_string()]);
    assert_eq!(merged.target_class.as_deref(), Some("P"));
}

#[test]
fn relation_merge_rejects_other_class_and_delete() {
    let p = FieldOperation::relation(&[saved("P", "a")], &[]).unwrap();
    let q = FieldOperation::relation(&[saved("Q", "a")], &[]).unwrap();
    assert!(matches!(
        merge(&p, Some(&q)).unwrap_err(),
        OperationError::RelationClassMismatch { .. }
    ));
    assert_invalid(&p, &FieldOperation::Delete);
    assert_invalid(&p, &set(1));
}

// ── Scenarios ────────────────────────────────────────────────────

#[test]
fn increment_then_set_is_set() {
    let entity = Entity::new("Game");
    entity.increment("score", 1).unwrap();
    entity.set("score", 10).unwrap();
    assert_eq!(entity.current_operations().get("score"), Some(&set(10)));
    assert_eq!(entity.get("score"), Some(Value::from(10)));
}

#[test]
fn adding_same_saved_reference_twice_keeps_one_entry() {
    let first = saved("Player", "p1");
    let second = saved("Player", "p1");
    let mut ops = OperationSet::new();
    ops.merge("team", &FieldOperation::add_unique(vec![Value::from(first)]))
        .unwrap();
    ops.merge("team", &FieldOperation::add_unique(vec![Value::from(second)]))
        .unwrap();
    let Some(FieldOperation::AddUnique(values)) = ops.get("team") else {
        panic!("expected AddUnique");
    };
    assert_eq!(values.len(), 1);
}

// ===== HELPER STRATEGIES =====

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z]{0,8}".prop_map(Value::from),
        prop::collection::vec("[a-z]{1,4}".prop_map(Value::from), 0..5).prop_map(Value::Array),
    ]
}

proptest! {
    #[test]
    fn set_apply_ignores_previous(old in arb_value(), new in arb_value()) {
        let op = FieldOperation::set(new.clone());
        prop_assert_eq!(op.apply(Some(&old), "k").unwrap(), Some(new.clone()));
        prop_assert_eq!(op.apply(None, "k").unwrap(), Some(new));
    }

    #[test]
    fn add_unique_is_idempotent(items in prop::collection::vec("[a-c]", 0..8)) {
        let values: Vec<Value> = items.iter().map(|s| Value::from(s.as_str())).collect();
        let op = FieldOperation::add_unique(values);
        let once = op.apply(None, "k").unwrap();
        let twice = op.apply(once.as_ref(), "k").unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn increments_merge_to_their_sum(a in -1_000_000i64..1_000_000, b in -1_000_000i64..1_000_000) {
        let merged = FieldOperation::increment(b)
            .merge_with_previous(Some(&FieldOperation::increment(a)))
            .unwrap();
        prop_assert_eq!(merged, FieldOperation::increment(a + b));
    }
}
