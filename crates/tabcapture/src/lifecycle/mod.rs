//! Target attach/detach lifecycle.
//!
//! The [`LifecycleManager`] keeps one [`CaptureTarget`] record per target the
//! session is attached to and reconciles that belief against the debugging
//! host, which is the authority on what is really attached.
//!
//! - **Per-target serialization**: attach and detach for the same target run
//!   one at a time, in call order. Different targets proceed independently.
//!
//! - **No partial state**: a record exists only after the attach and the
//!   `Network.enable` handshake both succeeded. A failed handshake is rolled
//!   back with a best-effort detach.
//!
//! - **Host teardown wins**: [`LifecycleManager::on_external_detach`] clears
//!   state immediately, without waiting for the per-target queue. An attach
//!   in flight at that moment ends with [`Error::TargetSuperseded`].
//!
//! Lifecycle operations run on their own task, so dropping the caller's
//! future does not cancel an operation halfway.

mod keyed_lock;
mod retry;

pub use keyed_lock::{KeyGuard, KeyedLock};
pub use retry::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES, DEFAULT_STEP};

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::host::{DebuggerHost, TargetId};

/// Protocol version requested on attach.
pub const DEFAULT_PROTOCOL_VERSION: &str = "1.3";

/// Command that turns on network occurrences for a target.
const ENABLE_METHOD: &str = "Network.enable";

/// Attach state of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachState {
    /// No debugging session.
    Detached,
    /// Attach or enable handshake in flight.
    Attaching,
    /// Fully attached and enabled.
    Attached,
    /// Detach in flight.
    Detaching,
}

impl std::fmt::Display for AttachState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Detached => write!(f, "detached"),
            Self::Attaching => write!(f, "attaching"),
            Self::Attached => write!(f, "attached"),
            Self::Detaching => write!(f, "detaching"),
        }
    }
}

/// A target the session is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureTarget {
    /// The target.
    pub target_id: TargetId,
    /// When the attach completed, or when the target was adopted.
    pub attached_at: DateTime<Utc>,
    /// Whether the record was adopted from the host by [`LifecycleManager::reconcile`].
    pub adopted: bool,
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    state: AttachState,
    token: u64,
}

struct Inner {
    host: Arc<dyn DebuggerHost>,
    protocol_version: String,
    retry: RetryPolicy,
    locks: KeyedLock<TargetId>,
    records: Mutex<HashMap<TargetId, CaptureTarget>>,
    transitions: Mutex<HashMap<TargetId, Transition>>,
    next_token: AtomicU64,
}

/// Attach/detach manager. Cloning yields another handle to the same state.
#[derive(Clone)]
pub struct LifecycleManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("protocol_version", &self.inner.protocol_version)
            .field("retry", &self.inner.retry)
            .field("attached", &self.records().len())
            .finish_non_exhaustive()
    }
}

impl LifecycleManager {
    /// Create a manager for the given host.
    #[must_use]
    pub fn new(
        host: Arc<dyn DebuggerHost>,
        protocol_version: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                host,
                protocol_version: protocol_version.into(),
                retry,
                locks: KeyedLock::new(),
                records: Mutex::new(HashMap::new()),
                transitions: Mutex::new(HashMap::new()),
                next_token: AtomicU64::new(1),
            }),
        }
    }

    /// The host this manager talks to.
    #[must_use]
    pub fn host(&self) -> &Arc<dyn DebuggerHost> {
        &self.inner.host
    }

    /// The retry policy applied to protocol commands.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.inner.retry
    }

    fn records(&self) -> MutexGuard<'_, HashMap<TargetId, CaptureTarget>> {
        self.inner
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn transitions(&self) -> MutexGuard<'_, HashMap<TargetId, Transition>> {
        self.inner
            .transitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_transition(&self, target: &TargetId, state: AttachState) -> u64 {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        self.transitions()
            .insert(target.clone(), Transition { state, token });
        token
    }

    /// End a transition. Returns `false` if it was cleared in the meantime.
    fn end_transition(&self, target: &TargetId, token: u64) -> bool {
        let mut transitions = self.transitions();
        if transitions.get(target).is_some_and(|t| t.token == token) {
            transitions.remove(target);
            true
        } else {
            false
        }
    }

    /// Check if the target has a capture record.
    #[must_use]
    pub fn is_attached(&self, target: &TargetId) -> bool {
        self.records().contains_key(target)
    }

    /// Current state of the target.
    #[must_use]
    pub fn attach_state(&self, target: &TargetId) -> AttachState {
        if let Some(transition) = self.transitions().get(target) {
            return transition.state;
        }
        if self.is_attached(target) {
            AttachState::Attached
        } else {
            AttachState::Detached
        }
    }

    /// The capture record of the target, if attached.
    #[must_use]
    pub fn target(&self, target: &TargetId) -> Option<CaptureTarget> {
        self.records().get(target).cloned()
    }

    /// Every attached target, sorted by id.
    #[must_use]
    pub fn attached_targets(&self) -> Vec<TargetId> {
        let mut targets: Vec<_> = self.records().keys().cloned().collect();
        targets.sort();
        targets
    }

    async fn run_detached<T, F>(op: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        tokio::spawn(op)
            .await
            .map_err(|e| Error::internal(format!("lifecycle task failed: {e}")))?
    }

    async fn host_reports_attached(&self, target: &TargetId) -> Result<bool> {
        let host = &self.inner.host;
        let attached = self.inner.retry.run(move || host.attached_targets()).await?;
        Ok(attached.contains(target))
    }

    /// Attach to the target and enable network occurrences.
    ///
    /// Succeeds without calling the host's attach if the target is already
    /// recorded and the host agrees it is attached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AttachFailed`] if the attach or the enable handshake
    /// failed (the attach is rolled back), [`Error::TargetSuperseded`] if the
    /// host tore the target down meanwhile, or [`Error::Host`] if the host
    /// could not be queried.
    pub async fn attach(&self, target: &TargetId) -> Result<()> {
        let this = self.clone();
        let target = target.clone();
        Self::run_detached(async move { this.attach_serialized(&target).await })
            .await
    }

    async fn attach_serialized(&self, target: &TargetId) -> Result<()> {
        let _guard = self.inner.locks.lock(target).await;

        if self.is_attached(target) {
            if self.host_reports_attached(target).await? {
                debug!(target_id = %target, "Already attached");
                return Ok(());
            }
            debug!(target_id = %target, "Dropping stale record, host lost the session");
            self.records().remove(target);
        }

        let token = self.begin_transition(target, AttachState::Attaching);
        let host = &self.inner.host;

        debug!(target_id = %target, version = %self.inner.protocol_version, "Attaching");
        if let Err(e) = host.attach(target, &self.inner.protocol_version).await {
            self.end_transition(target, token);
            return Err(Error::attach_failed(target.as_str(), e));
        }

        let enabled = self
            .inner
            .retry
            .run(move || host.send_command(target, ENABLE_METHOD, json!({})))
            .await;
        if let Err(e) = enabled {
            warn!(target_id = %target, error = %e, "Enable failed, rolling back attach");
            if let Err(detach_err) = host.detach(target).await {
                debug!(target_id = %target, error = %detach_err, "Rollback detach failed");
            }
            self.end_transition(target, token);
            return Err(Error::attach_failed(target.as_str(), e));
        }

        if !self.end_transition(target, token) {
            warn!(target_id = %target, "Target was detached by the host during attach");
            return Err(Error::TargetSuperseded {
                target: target.to_string(),
            });
        }

        self.records().insert(
            target.clone(),
            CaptureTarget {
                target_id: target.clone(),
                attached_at: Utc::now(),
                adopted: false,
            },
        );
        info!(target_id = %target, "Attached");
        Ok(())
    }

    /// Detach from the target.
    ///
    /// The host is asked first and only detached if it reports the target
    /// attached; a "not attached" answer counts as success. Internal state is
    /// cleared whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DetachFailed`] if the host's detach failed for any
    /// other reason.
    pub async fn detach(&self, target: &TargetId) -> Result<()> {
        let this = self.clone();
        let target = target.clone();
        Self::run_detached(async move { this.detach_serialized(&target).await })
            .await
    }

    async fn detach_serialized(&self, target: &TargetId) -> Result<()> {
        let _guard = self.inner.locks.lock(target).await;

        let token = self.begin_transition(target, AttachState::Detaching);
        let outcome = self.detach_on_host(target).await;
        self.end_transition(target, token);
        self.records().remove(target);

        match &outcome {
            Ok(()) => info!(target_id = %target, "Detached"),
            Err(e) => warn!(target_id = %target, error = %e, "Detach failed, state cleared"),
        }
        outcome
    }

    async fn detach_on_host(&self, target: &TargetId) -> Result<()> {
        let attached = match self.host_reports_attached(target).await {
            Ok(attached) => attached,
            Err(e) => {
                debug!(target_id = %target, error = %e, "Host query failed, detaching anyway");
                true
            }
        };
        if !attached {
            debug!(target_id = %target, "Host reports target not attached");
            return Ok(());
        }

        match self.inner.host.detach(target).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_attached() => {
                debug!(target_id = %target, "Target was already detached");
                Ok(())
            }
            Err(e) => Err(Error::detach_failed(target.as_str(), e)),
        }
    }

    /// Adopt targets the host reports attached but that have no record.
    ///
    /// No attach is issued for adopted targets. Targets with an operation in
    /// flight are skipped. Returns how many targets were adopted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Host`] if the host cannot be queried.
    pub async fn reconcile(&self) -> Result<usize> {
        let host = &self.inner.host;
        let attached = self.inner.retry.run(move || host.attached_targets()).await?;

        let transitions = self.transitions();
        let mut records = self.records();
        let mut adopted = 0;
        for target in attached {
            if records.contains_key(&target) || transitions.contains_key(&target) {
                continue;
            }
            info!(target_id = %target, "Adopting attached target");
            records.insert(
                target.clone(),
                CaptureTarget {
                    target_id: target,
                    attached_at: Utc::now(),
                    adopted: true,
                },
            );
            adopted += 1;
        }
        Ok(adopted)
    }

    /// Handle a host-initiated teardown.
    ///
    /// Clears the record and any in-flight transition immediately.
    pub fn on_external_detach(&self, target: &TargetId, reason: &str) {
        let had_transition = self.transitions().remove(target).is_some();
        let had_record = self.records().remove(target).is_some();
        if had_record || had_transition {
            info!(target_id = %target, reason, "Target detached by host");
        } else {
            debug!(target_id = %target, reason, "Host detach for unknown target");
        }
    }
}
