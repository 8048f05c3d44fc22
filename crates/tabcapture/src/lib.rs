//! `tabcapture` - Redacting network capture for a single browser tab
//!
//! This library attaches to a tab through a remote debugging host, turns the
//! host's network occurrences into redacted [`CapturedEvent`]s and persists
//! them for export.
//!
//! - [`lifecycle`]: per-target attach/detach, reconciled against the host
//! - [`correlator`]: request/response pairing and websocket events
//! - [`redact`]: scrubbing of headers, URLs and bodies
//! - [`buffer`]: the event queue, flush policy and degraded mode
//! - [`session`]: the `start`/`stop`/`export`/`purge` commands

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod buffer;
pub mod cli;
pub mod config;
pub mod correlator;
pub mod error;
pub mod event;
pub mod export;
pub mod host;
pub mod lifecycle;
pub mod logging;
pub mod occurrence;
pub mod redact;
pub mod session;
pub mod storage;

pub use buffer::{BufferController, BufferPolicy, Counters};
pub use config::Config;
pub use correlator::{CaptureSettings, Correlator};
pub use error::{Error, Result};
pub use event::{BodyDescriptor, CapturedEvent};
pub use export::{ExportBundle, ExportSummary};
pub use host::{DebuggerHost, HostError, HostNotification, TargetId};
pub use lifecycle::{LifecycleManager, RetryPolicy};
pub use logging::init_logging;
pub use occurrence::Occurrence;
pub use redact::Redactor;
pub use session::SessionController;
pub use storage::{EventStore, RunMeta, Storage, StorageStats};
