//! Remora store: the keyed in-memory replica of one resource collection.

#![forbid(unsafe_code)]

use std::sync::RwLock;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::watch;

use remora_core::{path, KeyPath, Object, StoreSink};

/// Errors surfaced by the lookup API.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `find` was handed a predicate shape it does not understand.
    #[error("invalid predicate: expected path string, [path, value] pair or field mapping, got {0}")]
    InvalidPredicate(&'static str),
}

/// Key→object map mutated by exactly one reflector and read by anyone.
///
/// The synced latch flips on the first `replace` and never reverts; readers
/// can await it to know the initial LIST has landed.
pub struct Store {
    key_path: KeyPath,
    map: RwLock<FxHashMap<String, Object>>,
    synced_tx: watch::Sender<bool>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self::with_key_path(KeyPath::default())
    }

    pub fn with_key_path(key_path: KeyPath) -> Self {
        let (synced_tx, _) = watch::channel(false);
        Self { key_path, map: RwLock::new(FxHashMap::default()), synced_tx }
    }

    /// The key this store derives for `obj`.
    pub fn key_of(&self, obj: &Object) -> String {
        self.key_path.key_of(obj)
    }

    /// Insert or overwrite. `add` and `update` are deliberately the same
    /// operation: the server's ADDED/MODIFIED split is advisory.
    pub fn add(&self, obj: Object) {
        let key = self.key_of(&obj);
        self.map.write().unwrap().insert(key, obj);
    }

    pub fn update(&self, obj: Object) {
        self.add(obj);
    }

    /// Remove by the object's key; absent keys are a silent no-op.
    pub fn delete(&self, obj: &Object) {
        let key = self.key_of(obj);
        self.map.write().unwrap().remove(&key);
    }

    /// Swap the whole collection and fulfill the synced latch.
    pub fn replace(&self, items: Vec<Object>) {
        {
            let mut map = self.map.write().unwrap();
            map.clear();
            for obj in items {
                let key = self.key_path.key_of(&obj);
                map.insert(key, obj);
            }
        }
        // send_replace keeps re-fulfillment idempotent at the same value.
        self.synced_tx.send_replace(true);
    }

    pub fn get(&self, obj: &Object) -> Option<Object> {
        self.get_by_key(&self.key_of(obj))
    }

    pub fn get_by_key(&self, key: &str) -> Option<Object> {
        self.map.read().unwrap().get(key).cloned()
    }

    pub fn has(&self, obj: &Object) -> bool {
        self.has_by_key(&self.key_of(obj))
    }

    pub fn has_by_key(&self, key: &str) -> bool {
        self.map.read().unwrap().contains_key(key)
    }

    pub fn list(&self) -> Vec<Object> {
        self.map.read().unwrap().values().cloned().collect()
    }

    pub fn list_keys(&self) -> Vec<String> {
        self.map.read().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.map.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().unwrap().is_empty()
    }

    /// First object matching a data-shaped predicate:
    /// - a string is a dotted path tested for truthiness,
    /// - a two-element `[path, value]` array deep-compares the value at path,
    /// - an object is a shallow field match.
    ///
    /// Anything else is an invalid predicate. Scan order is unspecified.
    pub fn find(&self, predicate: &Value) -> Result<Option<Object>, StoreError> {
        match predicate {
            Value::String(p) => {
                Ok(self.find_by(|obj| path::lookup(obj, p).map(path::truthy).unwrap_or(false)))
            }
            Value::Array(pair) => {
                if pair.len() != 2 {
                    return Err(StoreError::InvalidPredicate("array"));
                }
                let p = pair[0].as_str().ok_or(StoreError::InvalidPredicate("array"))?;
                let want = &pair[1];
                Ok(self.find_by(|obj| path::lookup(obj, p) == Some(want)))
            }
            Value::Object(fields) => Ok(self.find_by(|obj| {
                fields.iter().all(|(k, want)| obj.get(k) == Some(want))
            })),
            Value::Null => Err(StoreError::InvalidPredicate("null")),
            Value::Bool(_) => Err(StoreError::InvalidPredicate("bool")),
            Value::Number(_) => Err(StoreError::InvalidPredicate("number")),
        }
    }

    /// First object satisfying an arbitrary closure.
    pub fn find_by(&self, pred: impl Fn(&Object) -> bool) -> Option<Object> {
        self.map.read().unwrap().values().find(|obj| pred(obj)).cloned()
    }

    /// Whether the first LIST has been applied.
    pub fn is_synced(&self) -> bool {
        *self.synced_tx.borrow()
    }

    /// Resolve once the first LIST has been applied; immediate if it already
    /// has.
    pub async fn synced(&self) {
        let mut rx = self.synced_tx.subscribe();
        // The sender lives inside self, so wait_for cannot fail here.
        let _ = rx.wait_for(|synced| *synced).await;
    }
}

impl StoreSink for Store {
    fn replace(&self, items: Vec<Object>) {
        Store::replace(self, items)
    }

    fn add(&self, obj: Object) {
        Store::add(self, obj)
    }

    fn update(&self, obj: Object) {
        Store::update(self, obj)
    }

    fn delete(&self, obj: Object) {
        Store::delete(self, &obj)
    }
}
