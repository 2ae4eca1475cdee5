#![forbid(unsafe_code)]

use remora_store::{Store, StoreError};
use serde_json::json;

fn seeded() -> Store {
    let store = Store::new();
    store.add(json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "uid": "a", "name": "web", "labels": { "app": "web" } },
        "status": { "ready": true }
    }));
    store.add(json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "uid": "b", "name": "db", "labels": { "app": "db" } },
        "status": { "ready": false }
    }));
    store
}

#[test]
fn path_predicate_tests_truthiness() {
    let store = seeded();
    let hit = store.find(&json!("status.ready")).unwrap().unwrap();
    assert_eq!(hit["metadata"]["uid"], "a");
    assert!(store.find(&json!("status.missing")).unwrap().is_none());
}

#[test]
fn pair_predicate_deep_compares_at_path() {
    let store = seeded();
    let hit = store.find(&json!(["metadata.labels.app", "db"])).unwrap().unwrap();
    assert_eq!(hit["metadata"]["uid"], "b");
    assert!(store.find(&json!(["metadata.labels.app", "cache"])).unwrap().is_none());
}

#[test]
fn mapping_predicate_matches_shallow_fields() {
    let store = seeded();
    let hit = store.find(&json!({"kind": "Pod", "apiVersion": "v1"})).unwrap();
    assert!(hit.is_some());
    assert!(store.find(&json!({"kind": "Service"})).unwrap().is_none());
}

#[test]
fn callable_predicate_scans_objects() {
    let store = seeded();
    let hit = store.find_by(|o| o["metadata"]["name"] == "db").unwrap();
    assert_eq!(hit["metadata"]["uid"], "b");
}

#[test]
fn unsupported_shapes_are_invalid() {
    let store = seeded();
    assert!(matches!(store.find(&json!(42)), Err(StoreError::InvalidPredicate(_))));
    assert!(matches!(store.find(&json!(true)), Err(StoreError::InvalidPredicate(_))));
    assert!(matches!(store.find(&json!(null)), Err(StoreError::InvalidPredicate(_))));
    assert!(matches!(store.find(&json!(["only-path"])), Err(StoreError::InvalidPredicate(_))));
    assert!(matches!(store.find(&json!([1, 2])), Err(StoreError::InvalidPredicate(_))));
}
