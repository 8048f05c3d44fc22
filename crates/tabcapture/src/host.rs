//! Debugging host abstraction.
//!
//! This module defines the seam between tabcapture and the remote debugging
//! host that owns the browser tabs. The host attaches and detaches sessions,
//! executes protocol commands and pushes notifications (protocol occurrences
//! and host-initiated teardowns) through a single ordered channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::occurrence::Occurrence;

/// Errors reported by the debugging host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// A failure that may succeed when retried (busy host, dropped socket).
    #[error("transient host failure: {0}")]
    Transient(String),

    /// The target has no attached debugging session.
    #[error("target is not attached")]
    NotAttached,

    /// A permanent failure of the call.
    #[error("host call failed: {0}")]
    Failed(String),
}

impl HostError {
    /// Create a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Create a permanent error.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Check if the call may be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Check if the host reported that the target is not attached.
    ///
    /// Hosts that only return free-form messages are recognised by the
    /// "not attached" phrase.
    #[must_use]
    pub fn is_not_attached(&self) -> bool {
        match self {
            Self::NotAttached => true,
            Self::Transient(message) | Self::Failed(message) => {
                message.to_ascii_lowercase().contains("not attached")
            }
        }
    }
}

/// Result type for host calls.
pub type HostResult<T> = std::result::Result<T, HostError>;

/// Opaque identifier of a browser tab or page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    /// Create a target id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TargetId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A message pushed by the host to the capture session.
#[derive(Debug, Clone)]
pub enum HostNotification {
    /// A protocol occurrence observed on an attached target.
    Occurrence {
        /// Where the occurrence was observed.
        target: TargetId,
        /// The decoded occurrence.
        occurrence: Occurrence,
    },

    /// The host tore down the debugging session on its own.
    Detached {
        /// The target that lost its session.
        target: TargetId,
        /// Host-supplied reason, e.g. `canceled_by_user`.
        reason: String,
    },
}

/// A remote debugging host.
///
/// All calls are fallible and asynchronous. Implementors forward them to the
/// browser's debugging endpoint; notifications travel separately through a
/// [`HostNotification`] channel handed to the session.
#[async_trait::async_trait]
pub trait DebuggerHost: Send + Sync {
    /// Attach a debugging session to the target using the protocol version.
    ///
    /// # Errors
    ///
    /// Returns an error if the host refuses or fails the attach.
    async fn attach(&self, target: &TargetId, protocol_version: &str) -> HostResult<()>;

    /// Detach the debugging session from the target.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::NotAttached`] if no session exists, or another
    /// error if the detach fails.
    async fn detach(&self, target: &TargetId) -> HostResult<()>;

    /// Send a protocol command to an attached target.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or the target is not attached.
    async fn send_command(&self, target: &TargetId, method: &str, params: Value)
        -> HostResult<Value>;

    /// List the targets the host currently reports as attached.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot be queried.
    async fn attached_targets(&self) -> HostResult<Vec<TargetId>>;
}
