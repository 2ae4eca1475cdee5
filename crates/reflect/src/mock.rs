//! Scripted [`ListWatcher`] for tests: queue list replies and watch
//! connections, then assert on the recorded calls.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_stream::stream;
use futures::StreamExt;
use tokio::sync::watch;

use remora_core::{ObjectList, ResourceKind, WatchEvent};

use crate::{ClassifyError, EventStream, ListOptions, ListWatcher, WatchOptions};

/// Errors a scripted capability can produce, one per discriminator plus the
/// unclassified rest.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MockError {
    #[error("resource version expired")]
    Expired,
    #[error("resource version too large")]
    TooLargeResourceVersion,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("in-flight call aborted")]
    Aborted,
    #[error("{0}")]
    Other(String),
}

impl ClassifyError for MockError {
    fn is_expired(&self) -> bool {
        matches!(self, MockError::Expired)
    }

    fn is_resource_version_too_large(&self) -> bool {
        matches!(self, MockError::TooLargeResourceVersion)
    }

    fn is_connection_refused(&self) -> bool {
        matches!(self, MockError::ConnectionRefused)
    }
}

/// One scripted reply to `list`.
#[derive(Debug, Clone)]
pub enum ListScript {
    Ok(ObjectList),
    Err(MockError),
    /// Park the call until `abort_inflight`, then fail with `Aborted`.
    HangUntilAbort,
}

/// One step of a scripted watch connection.
#[derive(Debug, Clone)]
pub enum WatchStep {
    Event(WatchEvent),
    /// Terminal stream error; the stream ends after yielding it.
    Fail(MockError),
    /// Let time pass mid-stream (paused-clock friendly).
    Sleep(Duration),
}

/// One scripted reply to `watch`.
#[derive(Debug, Clone)]
pub enum WatchScript {
    /// Serve the steps, then close the stream.
    Stream(Vec<WatchStep>),
    /// Refuse to open.
    Err(MockError),
    /// A stream that stays silent until `abort_inflight`, then errors.
    HangUntilAbort,
}

/// Scripted ListWatcher. Scripts are consumed front to back; an exhausted
/// script parks the caller until abort so tests stay deterministic.
pub struct MockListWatcher {
    descriptor: ResourceKind,
    lists: Mutex<VecDeque<ListScript>>,
    watches: Mutex<VecDeque<WatchScript>>,
    list_calls: Mutex<Vec<ListOptions>>,
    watch_calls: Mutex<Vec<WatchOptions>>,
    abort_tx: watch::Sender<bool>,
}

impl MockListWatcher {
    pub fn new(descriptor: ResourceKind) -> Self {
        let (abort_tx, _) = watch::channel(false);
        Self {
            descriptor,
            lists: Mutex::new(VecDeque::new()),
            watches: Mutex::new(VecDeque::new()),
            list_calls: Mutex::new(Vec::new()),
            watch_calls: Mutex::new(Vec::new()),
            abort_tx,
        }
    }

    pub fn queue_list(&self, script: ListScript) {
        self.lists.lock().unwrap().push_back(script);
    }

    pub fn queue_watch(&self, script: WatchScript) {
        self.watches.lock().unwrap().push_back(script);
    }

    /// Every `list` call observed, in order.
    pub fn list_calls(&self) -> Vec<ListOptions> {
        self.list_calls.lock().unwrap().clone()
    }

    /// Every `watch` call observed, in order.
    pub fn watch_calls(&self) -> Vec<WatchOptions> {
        self.watch_calls.lock().unwrap().clone()
    }

    pub fn was_aborted(&self) -> bool {
        *self.abort_tx.borrow()
    }

    async fn wait_aborted(&self) {
        let mut rx = self.abort_tx.subscribe();
        let _ = rx.wait_for(|aborted| *aborted).await;
    }
}

#[async_trait::async_trait]
impl ListWatcher for MockListWatcher {
    type Error = MockError;

    fn descriptor(&self) -> &ResourceKind {
        &self.descriptor
    }

    async fn list(&self, opts: ListOptions) -> Result<ObjectList, MockError> {
        self.list_calls.lock().unwrap().push(opts);
        let script = self.lists.lock().unwrap().pop_front();
        match script {
            Some(ListScript::Ok(list)) => Ok(list),
            Some(ListScript::Err(e)) => Err(e),
            Some(ListScript::HangUntilAbort) | None => {
                self.wait_aborted().await;
                Err(MockError::Aborted)
            }
        }
    }

    async fn watch(&self, opts: WatchOptions) -> Result<EventStream<MockError>, MockError> {
        self.watch_calls.lock().unwrap().push(opts);
        let script = self.watches.lock().unwrap().pop_front();
        match script {
            Some(WatchScript::Err(e)) => Err(e),
            Some(WatchScript::Stream(steps)) => {
                let s = stream! {
                    for step in steps {
                        match step {
                            WatchStep::Sleep(d) => tokio::time::sleep(d).await,
                            WatchStep::Event(ev) => yield Ok(ev),
                            WatchStep::Fail(e) => {
                                yield Err(e);
                                return;
                            }
                        }
                    }
                };
                Ok(s.boxed())
            }
            Some(WatchScript::HangUntilAbort) | None => {
                let mut rx = self.abort_tx.subscribe();
                let s = stream! {
                    let _ = rx.wait_for(|aborted| *aborted).await;
                    yield Err(MockError::Aborted);
                };
                Ok(s.boxed())
            }
        }
    }

    fn abort_inflight(&self) {
        self.abort_tx.send_replace(true);
    }
}
