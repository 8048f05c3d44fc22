//! Capture session orchestration.
//!
//! A [`SessionController`] owns one capture context: the lifecycle manager,
//! the buffer, the correlator and the current run. It wires the four
//! commands (`start`, `stop`, `export`, `purge`) to those parts and runs the
//! pump that feeds host notifications to the correlator in order.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::buffer::{BufferController, Counters};
use crate::config::Config;
use crate::correlator::{CaptureSettings, Correlator};
use crate::error::{Error, Result};
use crate::export::ExportBundle;
use crate::host::{DebuggerHost, HostNotification, TargetId};
use crate::lifecycle::{AttachState, LifecycleManager};
use crate::storage::{EventStore, RunMeta};

/// How often the pump logs counters and checks the flush timer.
pub const PUMP_TICK: Duration = Duration::from_secs(2);

/// One capture context.
pub struct SessionController {
    lifecycle: LifecycleManager,
    buffer: BufferController,
    correlator: Arc<AsyncMutex<Correlator>>,
    store: Arc<dyn EventStore>,
    run: Mutex<Option<RunMeta>>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("lifecycle", &self.lifecycle)
            .field("buffer", &self.buffer)
            .field("run", &*self.run())
            .finish_non_exhaustive()
    }
}

impl SessionController {
    /// Build a session from the configuration.
    #[must_use]
    pub fn new(config: &Config, host: Arc<dyn DebuggerHost>, store: Arc<dyn EventStore>) -> Self {
        let retry = config.retry_policy();
        let lifecycle = LifecycleManager::new(
            Arc::clone(&host),
            config.lifecycle.protocol_version.clone(),
            retry,
        );
        let buffer = BufferController::new(config.buffer_policy(), Arc::clone(&store));
        let correlator = Correlator::new(config.capture_settings(), host, retry, buffer.clone());
        Self {
            lifecycle,
            buffer,
            correlator: Arc::new(AsyncMutex::new(correlator)),
            store,
            run: Mutex::new(None),
        }
    }

    fn run(&self) -> MutexGuard<'_, Option<RunMeta>> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The lifecycle manager.
    #[must_use]
    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// The event buffer.
    #[must_use]
    pub fn buffer(&self) -> &BufferController {
        &self.buffer
    }

    /// The current run, if one was started.
    #[must_use]
    pub fn run_meta(&self) -> Option<RunMeta> {
        self.run().clone()
    }

    /// Live counters.
    #[must_use]
    pub fn counters(&self) -> Counters {
        self.buffer.counters()
    }

    /// Adopt sessions the host still holds from a previous process.
    ///
    /// If the stored run was never stopped and its target is still attached,
    /// it becomes the current run again. Returns the number of adopted
    /// targets.
    ///
    /// # Errors
    ///
    /// Returns an error if the host or the store cannot be queried.
    pub async fn restore(&self) -> Result<usize> {
        let adopted = self.lifecycle.reconcile().await?;
        if let Some(meta) = self.store.run_meta().await? {
            if meta.stopped_at.is_none() && self.lifecycle.is_attached(&meta.target_id) {
                info!(run_id = %meta.run_id, target_id = %meta.target_id, "Resuming capture run");
                *self.run() = Some(meta);
            }
        }
        Ok(adopted)
    }

    /// Start a new run on the target.
    ///
    /// Purges persisted state and in-flight correlation, attaches, then
    /// records the run metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the purge, the attach or the metadata write fails.
    /// No run is recorded in that case.
    pub async fn start(&self, target: &TargetId) -> Result<RunMeta> {
        self.purge().await?;
        self.correlator.lock().await.reset();
        self.buffer.reset_counters();
        *self.run() = None;

        self.lifecycle.attach(target).await?;

        let meta = RunMeta::begin(target.clone());
        self.store.put_meta(&meta).await?;
        *self.run() = Some(meta.clone());
        info!(run_id = %meta.run_id, target_id = %target, "Capture started");
        Ok(meta)
    }

    /// Stop the current run.
    ///
    /// Detaches, finalizes the run metadata with the counters and waits for
    /// every queued event to be persisted. Stopping a stopped run only
    /// flushes again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveRun`] if no run was started, a storage error
    /// if the metadata or the events cannot be written, or the detach error
    /// once everything else is done.
    pub async fn stop(&self) -> Result<RunMeta> {
        let mut meta = self.run_meta().ok_or(Error::NoActiveRun)?;

        let detached = self.lifecycle.detach(&meta.target_id).await;
        if meta.stopped_at.is_none() {
            meta.finish(self.buffer.counters());
        }
        self.store.put_meta(&meta).await?;
        *self.run() = Some(meta.clone());

        let flushed = self.buffer.flush().await?;
        info!(
            run_id = %meta.run_id,
            flushed,
            duration_s = meta.duration_secs(),
            "Capture stopped"
        );
        detached?;
        Ok(meta)
    }

    /// Persist everything queued and bundle all events with a summary.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush or the read fails.
    pub async fn export(&self) -> Result<ExportBundle> {
        self.buffer.flush().await?;
        let events = self.store.read_all().await?;
        let meta = match self.run_meta() {
            Some(meta) => Some(meta),
            None => self.store.run_meta().await?,
        };
        let counters = match &meta {
            Some(m) if m.stopped_at.is_some() => m.counters,
            _ => self.buffer.counters(),
        };
        Ok(ExportBundle::new(events, meta.as_ref(), counters))
    }

    /// Delete all persisted events and run metadata, and drop queued events.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be cleared.
    pub async fn purge(&self) -> Result<()> {
        self.buffer.discard().await;
        self.store.clear().await?;
        debug!("Purged persisted state");
        Ok(())
    }

    /// Swap in new inclusion settings for occurrences observed from now on.
    pub async fn apply_capture_settings(&self, settings: CaptureSettings) {
        self.correlator.lock().await.set_settings(settings);
        debug!("Capture settings updated");
    }

    /// Consume host notifications on a background task.
    ///
    /// Occurrences reach the correlator in channel order, and only while
    /// their target is attached or in transition. Host teardowns clear the
    /// target's lifecycle state. Every [`PUMP_TICK`] the pump logs the
    /// counters and gives the buffer a chance to flush on time. When the
    /// channel closes the queue is flushed and the task ends.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn_pump(&self, mut notifications: mpsc::Receiver<HostNotification>) -> JoinHandle<()> {
        let lifecycle = self.lifecycle.clone();
        let buffer = self.buffer.clone();
        let correlator = Arc::clone(&self.correlator);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PUMP_TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    notification = notifications.recv() => match notification {
                        Some(HostNotification::Occurrence { target, occurrence }) => {
                            if lifecycle.attach_state(&target) == AttachState::Detached {
                                trace!(target_id = %target, "Ignoring occurrence for detached target");
                                continue;
                            }
                            correlator.lock().await.handle(&target, occurrence).await;
                        }
                        Some(HostNotification::Detached { target, reason }) => {
                            lifecycle.on_external_detach(&target, &reason);
                        }
                        None => break,
                    },
                    _ = ticker.tick() => {
                        debug!(
                            counters = ?buffer.counters(),
                            queued = buffer.len(),
                            in_flight = buffer.in_flight(),
                            degraded = buffer.is_degraded(),
                            "Capture counters"
                        );
                        buffer.maybe_flush();
                    }
                }
            }

            if let Err(e) = buffer.flush().await {
                warn!(error = %e, "Final flush failed");
            }
            debug!("Notification pump stopped");
        })
    }
}
