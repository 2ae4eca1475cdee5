//! Remora public façade: the informer.
//!
//! An [`Informer`] couples one [`Store`] with one
//! [`Reflector`](remora_reflect::Reflector) and mirrors every store mutation
//! to subscribers as a named event. Frontends depend on this crate; the
//! transport capability stays whatever [`ListWatcher`] the caller supplies.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};

use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use remora_core::{Object, StoreSink};
use remora_reflect::{ListWatcher, Reflector, ReflectorOptions};
use remora_store::Store;

/// Fallback capacity for subscriber channels; `REMORA_QUEUE_CAP` overrides.
const DEFAULT_QUEUE_CAP: usize = 2048;

fn default_queue_cap() -> usize {
    std::env::var("REMORA_QUEUE_CAP")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(DEFAULT_QUEUE_CAP)
}

/// A store mutation mirrored to subscribers. `Replace` fires once per sync
/// cycle, before any delta from the same cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Event {
    Replace(Vec<Object>),
    Add(Object),
    Update(Object),
    Delete(Object),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Replace(_) => "REPLACE",
            Event::Add(_) => "ADD",
            Event::Update(_) => "UPDATE",
            Event::Delete(_) => "DELETE",
        }
    }
}

/// StoreSink decorator: applies each mutation to the wrapped store, then
/// fans the same mutation out as an [`Event`].
///
/// Fan-out never blocks the sync loop: a full subscriber loses the event
/// (counted and logged), a closed subscriber is pruned.
pub struct EventedStore {
    store: Arc<Store>,
    subscribers: Mutex<Vec<mpsc::Sender<Event>>>,
}

impl EventedStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store, subscribers: Mutex::new(Vec::new()) }
    }

    fn attach(&self, cap: usize) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(cap);
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    fn publish(&self, event: Event) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                counter!("informer_events_dropped_total", 1u64);
                warn!(event = event.name(), "subscriber queue full; dropping event");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("pruning closed subscriber");
                false
            }
        });
    }
}

impl StoreSink for EventedStore {
    fn replace(&self, items: Vec<Object>) {
        self.store.replace(items.clone());
        self.publish(Event::Replace(items));
    }

    fn add(&self, obj: Object) {
        self.store.add(obj.clone());
        self.publish(Event::Add(obj));
    }

    fn update(&self, obj: Object) {
        self.store.update(obj.clone());
        self.publish(Event::Update(obj));
    }

    fn delete(&self, obj: Object) {
        self.store.delete(obj.clone());
        self.publish(Event::Delete(obj));
    }
}

/// Cancellation handle returned by [`Informer::run`]. Cancelling stops the
/// reflector (which force-closes in-flight I/O) and aborts the driver task.
pub struct CancelHandle {
    stop: Box<dyn Fn() + Send + Sync>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl CancelHandle {
    pub fn cancel(mut self) {
        (self.stop)();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Stop the reflector but let the driver task unwind on its own.
    pub fn stop(&self) {
        (self.stop)();
    }

    /// Wait for the driver task to finish after a stop.
    pub async fn join(mut self) {
        (self.stop)();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle").finish()
    }
}

/// One cached resource collection: store + reflector + event fan-out.
pub struct Informer<L: ListWatcher> {
    store: Arc<Store>,
    sink: Arc<EventedStore>,
    reflector: Arc<Reflector<L, Arc<EventedStore>>>,
}

impl<L: ListWatcher + 'static> Informer<L> {
    pub fn new(lw: L) -> Self {
        Self::with_store(lw, Arc::new(Store::new()), ReflectorOptions::default())
    }

    pub fn with_options(lw: L, opts: ReflectorOptions) -> Self {
        Self::with_store(lw, Arc::new(Store::new()), opts)
    }

    pub fn with_store(lw: L, store: Arc<Store>, opts: ReflectorOptions) -> Self {
        let sink = Arc::new(EventedStore::new(store.clone()));
        let reflector = Arc::new(Reflector::with_options(lw, sink.clone(), opts));
        Self { store, sink, reflector }
    }

    /// The replica this informer maintains.
    pub fn store(&self) -> Arc<Store> {
        self.store.clone()
    }

    pub fn is_synced(&self) -> bool {
        self.store.is_synced()
    }

    /// Resolves once the first LIST has been applied.
    pub async fn synced(&self) {
        self.store.synced().await
    }

    pub fn last_sync_resource_version(&self) -> String {
        self.reflector.last_sync_resource_version()
    }

    /// Receive every subsequent mutation as a named event. Events arrive in
    /// store order; a subscriber that cannot keep up loses events rather
    /// than stalling the sync loop.
    pub fn subscribe(&self) -> mpsc::Receiver<Event> {
        self.subscribe_with_capacity(default_queue_cap())
    }

    pub fn subscribe_with_capacity(&self, cap: usize) -> mpsc::Receiver<Event> {
        self.sink.attach(cap)
    }

    /// Spawn the sync loop. Call once; the returned handle is the only way
    /// to end the loop.
    pub fn run(&self) -> CancelHandle {
        let reflector = self.reflector.clone();
        info!(gvk = %reflector.descriptor().gvk_key(), "informer starting");
        let task = {
            let reflector = reflector.clone();
            tokio::spawn(async move { reflector.run().await })
        };
        CancelHandle {
            stop: Box::new(move || reflector.stop()),
            task: Some(task),
        }
    }
}
