//! Remora kubehub – discovery and the Kubernetes-backed ListWatcher.
//!
//! This is the in-repo supplier of the [`ListWatcher`] capability: it maps
//! the list/watch contract onto `kube::Api<DynamicObject>` so the sync loop
//! itself never sees HTTP.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::RwLock;

use async_stream::stream;
use async_trait::async_trait;
use futures::{pin_mut, StreamExt, TryStreamExt};
use kube::{
    api::{Api, ListParams, WatchEvent as KubeWatchEvent, WatchParams},
    core::{ApiResource, DynamicObject, ErrorResponse, GroupVersionKind},
    discovery::{Discovery, Scope as KubeScope},
    Client,
};
use once_cell::sync::Lazy;
use tracing::{debug, info};

use remora_core::{EventType, ListMeta, Object, ObjectList, ResourceKind, Scope, WatchEvent};
use remora_reflect::{ClassifyError, EventStream, ListOptions, ListWatcher, WatchOptions};

/// Errors from the Kubernetes capability, with the discriminators the sync
/// loop classifies by.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error(transparent)]
    Api(#[from] kube::Error),
    #[error("invalid gvk key: {0} (expect v1/Kind or group/v1/Kind)")]
    InvalidGvkKey(String),
    #[error("GVK not served: {0}")]
    NotServed(String),
    #[error("encoding object: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ClassifyError for HubError {
    fn is_expired(&self) -> bool {
        match self {
            HubError::Api(kube::Error::Api(er)) => {
                er.code == 410 || er.reason == "Expired" || er.message.to_ascii_lowercase().contains("expired")
            }
            _ => false,
        }
    }

    fn is_resource_version_too_large(&self) -> bool {
        match self {
            HubError::Api(kube::Error::Api(er)) => {
                er.message.to_ascii_lowercase().contains("too large resource version")
            }
            _ => false,
        }
    }

    fn is_connection_refused(&self) -> bool {
        match self {
            HubError::Api(e) => e.to_string().to_ascii_lowercase().contains("connection refused"),
            _ => false,
        }
    }
}

/// Parse "v1/Kind" or "group/v1/Kind".
pub fn parse_gvk_key(key: &str) -> Result<GroupVersionKind, HubError> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] => Ok(GroupVersionKind {
            group: String::new(),
            version: (*version).to_string(),
            kind: (*kind).to_string(),
        }),
        [group, version, kind] => Ok(GroupVersionKind {
            group: (*group).to_string(),
            version: (*version).to_string(),
            kind: (*kind).to_string(),
        }),
        _ => Err(HubError::InvalidGvkKey(key.to_string())),
    }
}

// Discovery cache: GVK key -> (ApiResource, namespaced)
static DISCOVERY_CACHE: Lazy<RwLock<HashMap<String, (ApiResource, bool)>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

fn gvk_to_key(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        format!("{}/{}", gvk.version, gvk.kind)
    } else {
        format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind)
    }
}

/// Resolve a GVK to its served ApiResource, running discovery on a cache
/// miss and remembering the answer process-wide.
pub async fn find_api_resource(
    client: Client,
    gvk: &GroupVersionKind,
) -> Result<(ApiResource, bool), HubError> {
    let key = gvk_to_key(gvk);
    if let Some(hit) = DISCOVERY_CACHE.read().unwrap().get(&key).cloned() {
        return Ok(hit);
    }
    debug!(gvk = %key, "discovery cache miss");
    let discovery = Discovery::new(client).run().await?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                let namespaced = matches!(caps.scope, KubeScope::Namespaced);
                DISCOVERY_CACHE.write().unwrap().insert(key, (ar.clone(), namespaced));
                return Ok((ar, namespaced));
            }
        }
    }
    Err(HubError::NotServed(key))
}

fn strip_managed_fields(v: &mut Object) {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
        }
    }
}

fn to_object<T: serde::Serialize>(value: &T) -> Result<Object, HubError> {
    let mut raw = serde_json::to_value(value)?;
    strip_managed_fields(&mut raw);
    Ok(raw)
}

fn convert(ev: KubeWatchEvent<DynamicObject>) -> Result<WatchEvent, HubError> {
    let (event_type, object) = match ev {
        KubeWatchEvent::Added(o) => (EventType::Added, to_object(&o)?),
        KubeWatchEvent::Modified(o) => (EventType::Modified, to_object(&o)?),
        KubeWatchEvent::Deleted(o) => (EventType::Deleted, to_object(&o)?),
        KubeWatchEvent::Bookmark(b) => (EventType::Bookmark, to_object(&b)?),
        KubeWatchEvent::Error(status) => (EventType::Error, to_object(&status)?),
    };
    Ok(WatchEvent::new(event_type, object))
}

/// List/watch capability for one GVK against a live API server.
pub struct KubeListWatcher {
    api: Api<DynamicObject>,
    descriptor: ResourceKind,
}

impl KubeListWatcher {
    /// Resolve `gvk_key` through discovery and bind the capability to
    /// `namespace` (cluster-wide when None or for cluster-scoped kinds).
    pub async fn new(client: Client, gvk_key: &str, namespace: Option<&str>) -> Result<Self, HubError> {
        let gvk = parse_gvk_key(gvk_key)?;
        let (ar, namespaced) = find_api_resource(client.clone(), &gvk).await?;
        let api: Api<DynamicObject> = if namespaced {
            match namespace {
                Some(ns) => Api::namespaced_with(client, ns, &ar),
                None => Api::all_with(client, &ar),
            }
        } else {
            Api::all_with(client, &ar)
        };
        let scope = if namespaced { Scope::Namespaced } else { Scope::Cluster };
        let descriptor = ResourceKind { group: gvk.group, version: gvk.version, kind: gvk.kind, scope };
        info!(gvk = %descriptor.gvk_key(), ns = ?namespace, "capability bound");
        Ok(Self { api, descriptor })
    }
}

#[async_trait]
impl ListWatcher for KubeListWatcher {
    type Error = HubError;

    fn descriptor(&self) -> &ResourceKind {
        &self.descriptor
    }

    async fn list(&self, opts: ListOptions) -> Result<ObjectList, HubError> {
        let mut lp = ListParams::default();
        if let Some(limit) = opts.limit {
            lp = lp.limit(limit);
        }
        if let Some(token) = &opts.continue_token {
            lp = lp.continue_token(token);
        }
        lp.resource_version = opts.resource_version.clone();

        let list = self.api.list(&lp).await?;
        let metadata = ListMeta {
            resource_version: list.metadata.resource_version.clone(),
            continue_token: list.metadata.continue_.clone(),
        };
        let items = list
            .items
            .iter()
            .map(to_object)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ObjectList { metadata, items })
    }

    async fn watch(&self, opts: WatchOptions) -> Result<EventStream<HubError>, HubError> {
        let api = self.api.clone();
        let mut wp = WatchParams::default().timeout(opts.timeout_seconds);
        wp.bookmarks = opts.allow_bookmarks;
        let rv = opts.resource_version.clone();

        // Open-failures surface as the stream's first item; the sync loop
        // classifies open and drain errors identically.
        let s = stream! {
            let inner = match api.watch(&wp, &rv).await {
                Ok(inner) => inner,
                Err(e) => {
                    yield Err(HubError::from(e));
                    return;
                }
            };
            pin_mut!(inner);
            loop {
                match inner.try_next().await {
                    Ok(Some(ev)) => yield convert(ev),
                    Ok(None) => return,
                    Err(e) => {
                        yield Err(HubError::from(e));
                        return;
                    }
                }
            }
        };
        Ok(s.boxed())
    }
}
