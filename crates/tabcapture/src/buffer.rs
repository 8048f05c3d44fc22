//! Buffering and backpressure.
//!
//! The [`BufferController`] owns the in-memory event queue. Admission is
//! synchronous and never waits for storage: when the flush policy fires, the
//! whole queue is detached and written by a background task. Detached events
//! still count as held until the store accepts them, and go back to the front
//! of the queue if it does not. Degraded mode follows the number of held
//! events and tells the correlator to stop capturing bodies.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::event::CapturedEvent;
use crate::storage::EventStore;

/// Default queue length that triggers a flush.
pub const DEFAULT_FLUSH_COUNT: usize = 250;

/// Default time since the last flush that triggers a flush.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(2000);

/// Default queue length above which degraded mode is on.
pub const DEFAULT_HIGH_WATER_MARK: usize = 5000;

/// When to flush and when to degrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPolicy {
    /// Flush once the queue holds at least this many events.
    pub flush_count: usize,
    /// Flush once this much time has passed since the last flush.
    pub flush_interval: Duration,
    /// Degrade while the queue holds more than this many events.
    pub high_water_mark: usize,
}

impl Default for BufferPolicy {
    fn default() -> Self {
        Self {
            flush_count: DEFAULT_FLUSH_COUNT,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
        }
    }
}

/// Per-type counters of raw occurrences and buffer decisions.
///
/// Raw counters increment whether or not the event was admitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    /// Requests observed.
    pub http_req: u64,
    /// Completed responses observed.
    pub http_res: u64,
    /// Websockets opened.
    pub ws_open: u64,
    /// Websocket frames observed.
    pub ws_frames: u64,
    /// Bodies skipped because of degraded mode.
    pub dropped_bodies: u64,
    /// Events rejected by the inclusion policy.
    pub excluded: u64,
}

/// A single counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    /// See [`Counters::http_req`].
    HttpRequest,
    /// See [`Counters::http_res`].
    HttpResponse,
    /// See [`Counters::ws_open`].
    WsOpen,
    /// See [`Counters::ws_frames`].
    WsFrame,
    /// See [`Counters::dropped_bodies`].
    DroppedBody,
    /// See [`Counters::excluded`].
    Excluded,
}

impl Counters {
    fn bump(&mut self, counter: Counter) {
        let slot = match counter {
            Counter::HttpRequest => &mut self.http_req,
            Counter::HttpResponse => &mut self.http_res,
            Counter::WsOpen => &mut self.ws_open,
            Counter::WsFrame => &mut self.ws_frames,
            Counter::DroppedBody => &mut self.dropped_bodies,
            Counter::Excluded => &mut self.excluded,
        };
        *slot += 1;
    }
}

#[derive(Debug)]
struct BufferState {
    queue: VecDeque<CapturedEvent>,
    /// Events detached for a write the store has not confirmed yet.
    in_flight: usize,
    last_flush: Instant,
    /// Set by a failed write; automatic flushes wait one interval after it.
    failed_at: Option<Instant>,
    degraded: bool,
    seq: u64,
    counters: Counters,
}

/// Owner of the event queue, counters and degraded flag.
///
/// Cloning yields another handle to the same buffer.
#[derive(Clone)]
pub struct BufferController {
    policy: BufferPolicy,
    state: Arc<Mutex<BufferState>>,
    store: Arc<dyn EventStore>,
    flush_lock: Arc<AsyncMutex<()>>,
}

impl std::fmt::Debug for BufferController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferController")
            .field("policy", &self.policy)
            .field("queued", &self.len())
            .field("degraded", &self.is_degraded())
            .finish_non_exhaustive()
    }
}

impl BufferController {
    /// Create a buffer that flushes into `store`.
    #[must_use]
    pub fn new(policy: BufferPolicy, store: Arc<dyn EventStore>) -> Self {
        Self {
            policy,
            state: Arc::new(Mutex::new(BufferState {
                queue: VecDeque::new(),
                in_flight: 0,
                last_flush: Instant::now(),
                failed_at: None,
                degraded: false,
                seq: 0,
                counters: Counters::default(),
            })),
            store,
            flush_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The active policy.
    #[must_use]
    pub fn policy(&self) -> BufferPolicy {
        self.policy
    }

    /// Allocate the next event id.
    pub fn next_id(&self) -> u64 {
        let mut state = self.lock();
        state.seq += 1;
        state.seq
    }

    /// Number of queued events, not counting a write in progress.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Check if the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Number of events handed to the store and not yet confirmed.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    /// Check if bodies should currently be skipped.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.lock().degraded
    }

    /// Increment a counter.
    pub fn increment(&self, counter: Counter) {
        self.lock().counters.bump(counter);
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn counters(&self) -> Counters {
        self.lock().counters
    }

    /// Zero the counters.
    pub fn reset_counters(&self) {
        self.lock().counters = Counters::default();
    }

    /// Drop every queued event without persisting it.
    pub fn clear(&self) {
        let mut state = self.lock();
        let dropped = state.queue.len();
        state.queue.clear();
        self.update_degraded(&mut state);
        if dropped > 0 {
            debug!(dropped, "Discarded queued events");
        }
    }

    /// Drop every queued event once any in-flight flush has finished.
    pub async fn discard(&self) {
        let _guard = Arc::clone(&self.flush_lock).lock_owned().await;
        self.clear();
    }

    fn update_degraded(&self, state: &mut BufferState) {
        let held = state.queue.len() + state.in_flight;
        let degraded = held > self.policy.high_water_mark;
        if degraded != state.degraded {
            state.degraded = degraded;
            if degraded {
                warn!(
                    held,
                    high_water_mark = self.policy.high_water_mark,
                    "Entering degraded mode, bodies will be skipped"
                );
            } else {
                debug!(held, "Leaving degraded mode");
            }
        }
    }

    fn flush_due(&self, state: &BufferState) -> bool {
        if state.queue.is_empty() {
            return false;
        }
        if let Some(failed_at) = state.failed_at {
            if failed_at.elapsed() < self.policy.flush_interval {
                return false;
            }
        }
        state.queue.len() >= self.policy.flush_count
            || state.last_flush.elapsed() > self.policy.flush_interval
    }

    /// Admit an event.
    ///
    /// Never waits for storage. If the flush policy fires, the queue is
    /// handed to a background write.
    pub fn add_event(&self, event: CapturedEvent) {
        let due = {
            let mut state = self.lock();
            state.queue.push_back(event);
            self.update_degraded(&mut state);
            self.flush_due(&state)
        };
        if due {
            self.spawn_flush();
        }
    }

    /// Start a background flush if the policy says one is due.
    pub fn maybe_flush(&self) {
        let due = self.flush_due(&self.lock());
        if due {
            self.spawn_flush();
        }
    }

    fn spawn_flush(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime available, deferring flush");
            return;
        };
        let Ok(guard) = Arc::clone(&self.flush_lock).try_lock_owned() else {
            trace!("Flush already in progress");
            return;
        };
        let batch = self.take_queue();
        if batch.is_empty() {
            return;
        }
        let this = self.clone();
        handle.spawn(async move {
            // Errors are logged and the batch re-queued by `write_batch`.
            let _ = this.write_batch(batch, guard).await;
        });
    }

    fn take_queue(&self) -> Vec<CapturedEvent> {
        let mut state = self.lock();
        let batch: Vec<_> = state.queue.drain(..).collect();
        state.in_flight = batch.len();
        batch
    }

    async fn write_batch(
        &self,
        batch: Vec<CapturedEvent>,
        _guard: OwnedMutexGuard<()>,
    ) -> Result<usize> {
        let count = batch.len();
        match self.store.append(&batch).await {
            Ok(()) => {
                let mut state = self.lock();
                state.in_flight = 0;
                state.last_flush = Instant::now();
                state.failed_at = None;
                self.update_degraded(&mut state);
                debug!(count, "Flushed events to storage");
                Ok(count)
            }
            Err(e) => {
                warn!(error = %e, count, "Flush failed, re-queueing events");
                let mut state = self.lock();
                for event in batch.into_iter().rev() {
                    state.queue.push_front(event);
                }
                state.in_flight = 0;
                state.failed_at = Some(Instant::now());
                self.update_degraded(&mut state);
                Err(e)
            }
        }
    }

    /// Flush the whole queue and wait for the write to finish.
    ///
    /// Waits for any in-flight background flush first. Flushing an empty
    /// queue is a no-op. Returns the number of events written.
    ///
    /// # Errors
    ///
    /// Returns the storage error; the events stay queued in order.
    pub async fn flush(&self) -> Result<usize> {
        let guard = Arc::clone(&self.flush_lock).lock_owned().await;
        let batch = self.take_queue();
        if batch.is_empty() {
            return Ok(0);
        }
        self.write_batch(batch, guard).await
    }
}
