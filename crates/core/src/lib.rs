//! Remora core types – the shared data model for the cache pipeline.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod path;

/// A resource object as observed on the wire. Objects are opaque except for
/// the envelope fields (`apiVersion`, `kind`) and `metadata`.
pub type Object = Value;

/// Read `apiVersion` from an object envelope.
pub fn api_version(obj: &Object) -> Option<&str> {
    obj.get("apiVersion").and_then(Value::as_str)
}

/// Read `kind` from an object envelope.
pub fn kind(obj: &Object) -> Option<&str> {
    obj.get("kind").and_then(Value::as_str)
}

/// Read `metadata.resourceVersion`. The value is an opaque server token:
/// only meaningful to echo back, never to compare client-side.
pub fn resource_version(obj: &Object) -> Option<&str> {
    path::lookup(obj, "metadata.resourceVersion").and_then(Value::as_str)
}

/// Read `metadata.uid`.
pub fn uid(obj: &Object) -> Option<&str> {
    path::lookup(obj, "metadata.uid").and_then(Value::as_str)
}

/// Dotted key path used to derive store keys from objects.
///
/// Objects whose path resolves to nothing all map to the empty key and will
/// collide in the store; callers own uniqueness.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyPath(pub String);

impl Default for KeyPath {
    fn default() -> Self {
        Self("metadata.uid".to_string())
    }
}

impl KeyPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Derive the store key for an object.
    pub fn key_of(&self, obj: &Object) -> String {
        match path::lookup(obj, &self.0) {
            Some(Value::String(s)) => s.clone(),
            Some(v) => v.to_string(),
            None => String::new(),
        }
    }
}

/// Whether a resource collection lives at cluster scope or under namespaces.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Cluster,
    Namespaced,
}

/// Descriptor for one served resource type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceKind {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub scope: Scope,
}

impl ResourceKind {
    pub fn namespaced(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), kind: kind.into(), scope: Scope::Namespaced }
    }

    pub fn cluster(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), kind: kind.into(), scope: Scope::Cluster }
    }

    /// Key form, e.g. "v1/ConfigMap" or "cert-manager.io/v1/Certificate".
    pub fn gvk_key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }

    /// Wire `apiVersion` form, e.g. "v1" or "apps/v1".
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Whether an object's envelope names this resource type.
    pub fn matches(&self, obj: &Object) -> bool {
        api_version(obj) == Some(self.api_version().as_str()) && kind(obj) == Some(self.kind.as_str())
    }
}

/// Watch event types as the server spells them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Added,
    Modified,
    Deleted,
    Bookmark,
    Error,
}

/// One incremental change from a watch stream. For `Error` events the object
/// is a status payload, not a resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub object: Object,
}

impl WatchEvent {
    pub fn new(event_type: EventType, object: Object) -> Self {
        Self { event_type, object }
    }
}

/// List response metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListMeta {
    #[serde(rename = "resourceVersion", default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(rename = "continue", default, skip_serializing_if = "Option::is_none")]
    pub continue_token: Option<String>,
}

/// One page (or the whole) of a list response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectList {
    #[serde(default)]
    pub metadata: ListMeta,
    #[serde(default)]
    pub items: Vec<Object>,
}

/// Mutation sink driven by a Reflector. A plain store implements this
/// directly; the informer wraps a store with an event-emitting decorator.
pub trait StoreSink: Send + Sync {
    /// Swap the entire collection for `items`.
    fn replace(&self, items: Vec<Object>);
    fn add(&self, obj: Object);
    fn update(&self, obj: Object);
    fn delete(&self, obj: Object);
    /// Hint that a fresh LIST is about to happen. Default: ignored.
    fn set_refreshing(&self) {}
}

impl<T: StoreSink + ?Sized> StoreSink for std::sync::Arc<T> {
    fn replace(&self, items: Vec<Object>) {
        (**self).replace(items)
    }
    fn add(&self, obj: Object) {
        (**self).add(obj)
    }
    fn update(&self, obj: Object) {
        (**self).update(obj)
    }
    fn delete(&self, obj: Object) {
        (**self).delete(obj)
    }
    fn set_refreshing(&self) {
        (**self).set_refreshing()
    }
}

pub mod prelude {
    pub use super::{
        EventType, KeyPath, ListMeta, Object, ObjectList, ResourceKind, Scope, StoreSink, WatchEvent,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_of_uses_default_uid_path() {
        let obj = json!({"metadata": {"uid": "abc", "name": "x"}});
        assert_eq!(KeyPath::default().key_of(&obj), "abc");
    }

    #[test]
    fn key_of_missing_path_is_empty() {
        let obj = json!({"metadata": {"name": "x"}});
        assert_eq!(KeyPath::default().key_of(&obj), "");
    }

    #[test]
    fn kind_matching_reads_envelope() {
        let rk = ResourceKind::namespaced("", "v1", "ConfigMap");
        assert!(rk.matches(&json!({"apiVersion": "v1", "kind": "ConfigMap"})));
        assert!(!rk.matches(&json!({"apiVersion": "v1", "kind": "Secret"})));

        let grouped = ResourceKind::namespaced("apps", "v1", "Deployment");
        assert_eq!(grouped.api_version(), "apps/v1");
        assert_eq!(grouped.gvk_key(), "apps/v1/Deployment");
        assert!(grouped.matches(&json!({"apiVersion": "apps/v1", "kind": "Deployment"})));
    }

    #[test]
    fn watch_event_wire_names() {
        let ev: WatchEvent =
            serde_json::from_value(json!({"type": "ADDED", "object": {"kind": "X"}})).unwrap();
        assert_eq!(ev.event_type, EventType::Added);
        let s = serde_json::to_value(&WatchEvent::new(EventType::Bookmark, json!({}))).unwrap();
        assert_eq!(s["type"], "BOOKMARK");
    }
}
