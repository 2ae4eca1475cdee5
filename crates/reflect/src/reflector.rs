//! The list-then-watch loop that keeps a store consistent with the server.

use std::sync::{Mutex, RwLock};
use std::time::Duration;

use futures::StreamExt;
use metrics::counter;
use rand::{rng, Rng};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use remora_backoff::Backoff;
use remora_core::{EventType, StoreSink};

use crate::{ClassifyError, EventStream, ListPager, ReflectError, ListWatcher, WatchOptions};

/// Knobs for one reflector. The defaults mirror the canonical control loop:
/// five-minute jittered watches, one-second reconnect pauses.
pub struct ReflectorOptions {
    /// Page limit handed to the pager; zero disables paging outright.
    pub page_size: u32,
    /// Lower bound of the randomized per-watch server timeout.
    pub min_watch_timeout: Duration,
    /// Base pause before re-dialing a refused watch connection.
    pub reconnect_period: Duration,
    /// Restart pacing between sync cycles.
    pub backoff: Backoff,
}

impl Default for ReflectorOptions {
    fn default() -> Self {
        Self {
            page_size: crate::DEFAULT_PAGE_SIZE,
            min_watch_timeout: Duration::from_secs(300),
            reconnect_period: Duration::from_secs(1),
            backoff: Backoff::new(),
        }
    }
}

/// Uniform over [d, 2d).
fn randomize(d: Duration) -> Duration {
    d.mul_f64(1.0 + rng().random::<f64>())
}

/// What happened to a watch stream while draining it.
enum Drain<E> {
    /// Server closed the stream normally.
    Closed { events: u64, elapsed: Duration },
    /// The stream yielded a terminal transport error.
    StreamError(E),
    /// Cancellation observed; unwind without touching the store again.
    Stopped,
}

/// Mirrors one server-side resource collection into a [`StoreSink`].
///
/// Owns the resource-version cursor and the single in-flight list or watch;
/// `run` drives the loop until [`Reflector::stop`] fires.
pub struct Reflector<L: ListWatcher, S: StoreSink> {
    lw: L,
    sink: S,
    page_size: u32,
    min_watch_timeout: Duration,
    reconnect_period: Duration,
    backoff: Mutex<Backoff>,
    cursor: RwLock<String>,
    rv_unavailable: RwLock<bool>,
    paginated_result: RwLock<bool>,
    stop_tx: watch::Sender<bool>,
}

impl<L: ListWatcher, S: StoreSink> Reflector<L, S> {
    pub fn new(lw: L, sink: S) -> Self {
        Self::with_options(lw, sink, ReflectorOptions::default())
    }

    pub fn with_options(lw: L, sink: S, opts: ReflectorOptions) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            lw,
            sink,
            page_size: opts.page_size,
            min_watch_timeout: opts.min_watch_timeout,
            reconnect_period: opts.reconnect_period,
            backoff: Mutex::new(opts.backoff),
            cursor: RwLock::new(String::new()),
            rv_unavailable: RwLock::new(false),
            paginated_result: RwLock::new(false),
            stop_tx,
        }
    }

    /// The resource type this reflector mirrors.
    pub fn descriptor(&self) -> &remora_core::ResourceKind {
        self.lw.descriptor()
    }

    /// Most recent resource version observed from list metadata or watch
    /// events. Empty until the first successful list.
    pub fn last_sync_resource_version(&self) -> String {
        self.cursor.read().unwrap().clone()
    }

    /// Request cancellation: flips the stop flag, force-closes in-flight
    /// I/O, and disarms the backoff idle timer. Idempotent.
    pub fn stop(&self) {
        let was_stopped = self.stop_tx.send_replace(true);
        if was_stopped {
            return;
        }
        debug!(gvk = %self.lw.descriptor().gvk_key(), "reflector stop requested");
        self.lw.abort_inflight();
        self.backoff.lock().unwrap().clear_timeout();
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Drive list-then-watch cycles until stopped. Transient failures are
    /// logged and retried after a backoff delay; only cancellation ends the
    /// loop.
    pub async fn run(&self) {
        let gvk = self.lw.descriptor().gvk_key();
        info!(gvk = %gvk, "reflector starting");
        let mut stop_rx = self.stop_tx.subscribe();
        while !self.is_stopped() {
            if let Err(e) = self.list_and_watch(&mut stop_rx).await {
                warn!(gvk = %gvk, error = %e, "sync cycle failed");
            }
            if self.is_stopped() {
                break;
            }
            let delay = self.backoff.lock().unwrap().duration();
            counter!("watch_restarts_total", 1u64);
            debug!(gvk = %gvk, delay_ms = delay.as_millis() as u64, "sync cycle ended; backing off");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop_rx.wait_for(|stopped| *stopped) => break,
            }
        }
        info!(gvk = %gvk, "reflector stopped");
    }

    /// The relist resource version for the next LIST (see the cursor rules):
    /// unavailable flag forces a consistent read, an empty cursor permits
    /// the watch cache, anything else resumes at the cursor.
    fn relist_resource_version(&self) -> String {
        if *self.rv_unavailable.read().unwrap() {
            return String::new();
        }
        let cursor = self.cursor.read().unwrap();
        if cursor.is_empty() {
            return "0".to_string();
        }
        cursor.clone()
    }

    /// One LIST (with retry on expired RV) followed by as many watch
    /// connections as the server grants. Returns normally on most failures;
    /// throws only for server ERROR events and suspiciously short watches.
    async fn list_and_watch(&self, stop_rx: &mut watch::Receiver<bool>) -> Result<(), ReflectError> {
        let gvk = self.lw.descriptor().gvk_key();
        self.sink.set_refreshing();

        // LIST. Until pagination has been observed on an initial list, any
        // cursor-resuming relist steers the server to its watch cache by
        // asking for an unpaged response.
        let mut relist_rv = self.relist_resource_version();
        let paginated_before = *self.paginated_result.read().unwrap();
        let page_size = if !paginated_before && !relist_rv.is_empty() && relist_rv != "0" {
            0
        } else {
            self.page_size
        };
        let pager = ListPager::new(&self.lw).page_size(page_size);

        debug!(gvk = %gvk, rv = %relist_rv, page_size, "listing");
        let listed = match pager.list(&relist_rv).await {
            Ok(listed) => listed,
            Err(e) if e.is_expired() || e.is_resource_version_too_large() => {
                info!(gvk = %gvk, error = %e, "list resource version unusable; relisting from the authoritative store");
                *self.rv_unavailable.write().unwrap() = true;
                relist_rv = self.relist_resource_version();
                match pager.list(&relist_rv).await {
                    Ok(listed) => listed,
                    Err(e) => {
                        warn!(gvk = %gvk, error = %e, "list failed");
                        return Ok(());
                    }
                }
            }
            Err(e) => {
                warn!(gvk = %gvk, error = %e, "list failed");
                return Ok(());
            }
        };

        // LIST-SUCCESS. The pagination latch only considers initial lists
        // issued at RV "0"; an expired-recovery list never latches it.
        if relist_rv == "0" && listed.paginated {
            *self.paginated_result.write().unwrap() = true;
        }
        *self.rv_unavailable.write().unwrap() = false;
        if self.is_stopped() {
            return Ok(());
        }
        let item_count = listed.items.len();
        self.sink.replace(listed.items);
        *self.cursor.write().unwrap() = listed.resource_version;
        counter!("relist_total", 1u64);
        info!(gvk = %gvk, items = item_count, rv = %self.last_sync_resource_version(), "list applied");

        // WATCH loop: reconnect until an error path says to relist.
        loop {
            if self.is_stopped() {
                return Ok(());
            }
            let opts = WatchOptions {
                resource_version: self.last_sync_resource_version(),
                allow_bookmarks: true,
                timeout_seconds: randomize(self.min_watch_timeout).as_secs() as u32,
            };
            let stream = match self.lw.watch(opts).await {
                Ok(stream) => stream,
                Err(e) => {
                    if self.watch_error_wants_reconnect(&e).await {
                        continue;
                    }
                    return Ok(());
                }
            };

            match self.drain(stream, stop_rx).await? {
                Drain::Stopped => return Ok(()),
                Drain::Closed { events, elapsed } => {
                    if events == 0 && elapsed < Duration::from_secs(1) {
                        return Err(ReflectError::VeryShortWatch { elapsed_ms: elapsed.as_millis() });
                    }
                    debug!(gvk = %gvk, events, "watch stream closed; reconnecting");
                }
                Drain::StreamError(e) => {
                    if self.watch_error_wants_reconnect(&e).await {
                        continue;
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Classify a watch failure. Connection refusals are retried in place
    /// after a short jittered pause; an expired RV relists at the current
    /// cursor (a LIST at RV=X is at least as fresh as X), and anything else
    /// relists too.
    async fn watch_error_wants_reconnect(&self, e: &L::Error) -> bool {
        let gvk = self.lw.descriptor().gvk_key();
        counter!("watch_errors_total", 1u64);
        if e.is_connection_refused() {
            let pause = randomize(self.reconnect_period);
            warn!(gvk = %gvk, error = %e, pause_ms = pause.as_millis() as u64, "watch connection refused; retrying");
            let mut stop_rx = self.stop_tx.subscribe();
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = stop_rx.wait_for(|stopped| *stopped) => {}
            }
            !self.is_stopped()
        } else if e.is_expired() {
            info!(gvk = %gvk, error = %e, "watch resource version expired; relisting");
            false
        } else {
            warn!(gvk = %gvk, error = %e, "watch failed; relisting");
            false
        }
    }

    /// Apply a watch stream to the sink until it ends. Events for other
    /// resource types are dropped without advancing the cursor; ERROR events
    /// abort the whole cycle.
    async fn drain(
        &self,
        mut stream: EventStream<L::Error>,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> Result<Drain<L::Error>, ReflectError> {
        let desc = self.lw.descriptor();
        let started = Instant::now();
        let mut events: u64 = 0;

        loop {
            let next = tokio::select! {
                _ = stop_rx.wait_for(|stopped| *stopped) => return Ok(Drain::Stopped),
                next = stream.next() => next,
            };
            let event = match next {
                None => return Ok(Drain::Closed { events, elapsed: started.elapsed() }),
                Some(Err(e)) => return Ok(Drain::StreamError(e)),
                Some(Ok(event)) => event,
            };
            events += 1;

            if event.event_type == EventType::Error {
                return Err(ReflectError::ServerStatus { status: event.object });
            }
            if !desc.matches(&event.object) {
                warn!(
                    expected = %desc.gvk_key(),
                    api_version = remora_core::api_version(&event.object).unwrap_or(""),
                    kind = remora_core::kind(&event.object).unwrap_or(""),
                    "dropping watch event for unexpected type"
                );
                continue;
            }

            let rv = remora_core::resource_version(&event.object).map(str::to_string);
            if self.is_stopped() {
                return Ok(Drain::Stopped);
            }
            match event.event_type {
                EventType::Added => self.sink.add(event.object),
                EventType::Modified => self.sink.update(event.object),
                EventType::Deleted => self.sink.delete(event.object),
                EventType::Bookmark | EventType::Error => {}
            }
            match rv {
                Some(rv) => *self.cursor.write().unwrap() = rv,
                None => error!(gvk = %desc.gvk_key(), "watch event without a resourceVersion"),
            }
        }
    }
}
