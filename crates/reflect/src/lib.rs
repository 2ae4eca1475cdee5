//! Remora reflect – the list-then-watch synchronization loop.
//!
//! A [`Reflector`] keeps a [`StoreSink`](remora_core::StoreSink) eventually
//! consistent with one server-side resource collection, obtained through a
//! caller-supplied [`ListWatcher`] capability. Everything transport-shaped
//! (HTTP, TLS, auth) lives behind that trait.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use futures::stream::BoxStream;

use remora_core::{ObjectList, ResourceKind, WatchEvent};

pub mod mock;
mod pager;
mod reflector;

pub use pager::{ListPager, PagedList, DEFAULT_PAGE_SIZE};
pub use reflector::{Reflector, ReflectorOptions};

/// Error discriminators the sync loop needs. The ListWatcher implementation
/// owns classification; the loop never parses error payloads itself.
pub trait ClassifyError: std::error::Error {
    /// The server compacted the requested resource version out of its log.
    fn is_expired(&self) -> bool {
        false
    }

    /// The requested resource version is ahead of the server's view.
    fn is_resource_version_too_large(&self) -> bool {
        false
    }

    /// The endpoint did not accept the connection at all.
    fn is_connection_refused(&self) -> bool {
        false
    }
}

/// Options forwarded to a single LIST call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// None asks for a consistent read from the authoritative store; "0"
    /// permits a stale read from the server's watch cache.
    pub resource_version: Option<String>,
    pub limit: Option<u32>,
    pub continue_token: Option<String>,
}

/// Options forwarded when opening a watch stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchOptions {
    pub resource_version: String,
    pub allow_bookmarks: bool,
    pub timeout_seconds: u32,
}

/// The lazy, finite sequence of watch events a server serves per connection.
pub type EventStream<E> = BoxStream<'static, Result<WatchEvent, E>>;

/// List/watch capability for exactly one resource type, supplied by the
/// caller. Implementations translate these calls onto their transport.
#[async_trait]
pub trait ListWatcher: Send + Sync {
    type Error: ClassifyError + Send + Sync + 'static;

    /// The resource type this capability serves.
    fn descriptor(&self) -> &ResourceKind;

    async fn list(&self, opts: ListOptions) -> Result<ObjectList, Self::Error>;

    async fn watch(&self, opts: WatchOptions) -> Result<EventStream<Self::Error>, Self::Error>;

    /// Force-close all in-flight I/O. Invoked on stop so pending list/watch
    /// futures resolve promptly; default does nothing.
    fn abort_inflight(&self) {}
}

#[async_trait]
impl<T: ListWatcher + ?Sized> ListWatcher for std::sync::Arc<T> {
    type Error = T::Error;

    fn descriptor(&self) -> &ResourceKind {
        (**self).descriptor()
    }

    async fn list(&self, opts: ListOptions) -> Result<ObjectList, Self::Error> {
        (**self).list(opts).await
    }

    async fn watch(&self, opts: WatchOptions) -> Result<EventStream<Self::Error>, Self::Error> {
        (**self).watch(opts).await
    }

    fn abort_inflight(&self) {
        (**self).abort_inflight()
    }
}

/// Failures `Reflector::list_and_watch` surfaces to the retry loop. Every
/// other failure path logs and returns normally; these two are thrown.
#[derive(Debug, thiserror::Error)]
pub enum ReflectError {
    #[error("watch stream served an ERROR event: {status}")]
    ServerStatus { status: serde_json::Value },

    #[error("very short watch: stream closed after {elapsed_ms} ms with no events")]
    VeryShortWatch { elapsed_ms: u128 },
}
