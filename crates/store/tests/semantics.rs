#![forbid(unsafe_code)]

use remora_core::KeyPath;
use remora_store::Store;
use serde_json::json;

fn obj(uid: &str, name: &str) -> serde_json::Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": { "uid": uid, "name": name }
    })
}

#[test]
fn add_is_idempotent_by_content() {
    let store = Store::new();
    store.add(obj("a", "one"));
    store.add(obj("a", "one"));
    assert_eq!(store.len(), 1);
    assert_eq!(store.list_keys(), vec!["a".to_string()]);
}

#[test]
fn add_then_delete_is_a_noop() {
    let store = Store::new();
    store.add(obj("a", "one"));
    store.delete(&obj("a", "one"));
    assert!(store.is_empty());
    assert!(!store.has_by_key("a"));
}

#[test]
fn delete_of_absent_key_is_silent() {
    let store = Store::new();
    store.delete(&obj("ghost", "none"));
    assert!(store.is_empty());
}

#[test]
fn update_overwrites_by_key() {
    let store = Store::new();
    store.add(obj("a", "before"));
    store.update(obj("a", "after"));
    assert_eq!(store.len(), 1);
    let got = store.get_by_key("a").unwrap();
    assert_eq!(got["metadata"]["name"], "after");
}

#[test]
fn replace_drops_every_prior_key() {
    let store = Store::new();
    store.add(obj("a", "one"));
    store.add(obj("b", "two"));
    store.replace(vec![obj("b", "two"), obj("c", "three")]);

    let mut keys = store.list_keys();
    keys.sort();
    assert_eq!(keys, vec!["b".to_string(), "c".to_string()]);
    assert!(!store.has_by_key("a"));
}

#[test]
fn lookup_surface_round_trips() {
    let store = Store::new();
    let o = obj("a", "one");
    store.add(o.clone());
    assert!(store.has(&o));
    assert_eq!(store.get(&o), Some(o.clone()));
    assert_eq!(store.list(), vec![o]);
}

#[test]
fn custom_key_path_is_honored() {
    let store = Store::with_key_path(KeyPath::new("metadata.name"));
    store.add(obj("a", "one"));
    assert!(store.has_by_key("one"));
    assert!(!store.has_by_key("a"));
}

#[test]
fn missing_key_path_collides_on_empty_key() {
    // Documented foot-gun: objects without a uid share the empty key.
    let store = Store::new();
    store.add(json!({"metadata": {"name": "first"}}));
    store.add(json!({"metadata": {"name": "second"}}));
    assert_eq!(store.len(), 1);
    assert_eq!(store.get_by_key("").unwrap()["metadata"]["name"], "second");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn synced_latch_fires_on_first_replace_and_never_reverts() {
    let store = std::sync::Arc::new(Store::new());
    assert!(!store.is_synced());

    let waiter = {
        let store = store.clone();
        tokio::spawn(async move { store.synced().await })
    };

    store.replace(vec![]);
    waiter.await.unwrap();
    assert!(store.is_synced());

    // Subsequent replaces re-fulfill at the same terminal value.
    store.replace(vec![obj("a", "one")]);
    assert!(store.is_synced());
    store.synced().await;
}
