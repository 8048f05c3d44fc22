//! Error types for tabcapture.
//!
//! This module defines the crate-level error type used by the storage,
//! configuration, lifecycle and session layers. Failures reported by the
//! debugging host have their own type, [`HostError`], which converts into
//! [`Error::Host`].

use std::path::PathBuf;
use thiserror::Error;

use crate::host::HostError;

/// The main error type for tabcapture operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Lifecycle Errors ===
    /// Attaching to a target failed and was rolled back.
    #[error("failed to attach to target '{target}': {source}")]
    AttachFailed {
        /// The target that could not be attached.
        target: String,
        /// The host failure that caused the rollback.
        #[source]
        source: HostError,
    },

    /// Detaching from a target failed. Internal state was cleared anyway.
    #[error("failed to detach from target '{target}': {source}")]
    DetachFailed {
        /// The target that could not be detached.
        target: String,
        /// The host failure.
        #[source]
        source: HostError,
    },

    /// The host tore the target down while an attach was in flight.
    #[error("target '{target}' was detached by the host during attach")]
    TargetSuperseded {
        /// The superseded target.
        target: String,
    },

    // === Host Errors ===
    /// A call to the debugging host failed.
    #[error("debugging host error: {0}")]
    Host(#[from] HostError),

    // === Session Errors ===
    /// An operation needed a recording run but none was started.
    #[error("no capture run has been started")]
    NoActiveRun,

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for tabcapture operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create an attach failure for the given target.
    #[must_use]
    pub fn attach_failed(target: impl Into<String>, source: HostError) -> Self {
        Self::AttachFailed {
            target: target.into(),
            source,
        }
    }

    /// Create a detach failure for the given target.
    #[must_use]
    pub fn detach_failed(target: impl Into<String>, source: HostError) -> Self {
        Self::DetachFailed {
            target: target.into(),
            source,
        }
    }

    /// Check if this error came out of the attach/detach lifecycle.
    #[must_use]
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(
            self,
            Self::AttachFailed { .. } | Self::DetachFailed { .. } | Self::TargetSuperseded { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NoActiveRun;
        assert_eq!(err.to_string(), "no capture run has been started");

        let err = Error::internal("queue poisoned");
        assert_eq!(err.to_string(), "internal error: queue poisoned");
    }

    #[test]
    fn test_attach_failed_display() {
        let err = Error::attach_failed("tab-7", HostError::failed("Network.enable rejected"));
        let msg = err.to_string();
        assert!(msg.contains("tab-7"));
        assert!(msg.contains("Network.enable rejected"));
        assert!(err.is_lifecycle_error());
    }

    #[test]
    fn test_detach_failed_display() {
        let err = Error::detach_failed("tab-9", HostError::transient("socket closed"));
        assert!(err.to_string().contains("tab-9"));
        assert!(err.is_lifecycle_error());
    }

    #[test]
    fn test_superseded_is_lifecycle_error() {
        let err = Error::TargetSuperseded {
            target: "tab-1".to_string(),
        };
        assert!(err.is_lifecycle_error());
        assert!(!Error::NoActiveRun.is_lifecycle_error());
    }

    #[test]
    fn test_from_host_error() {
        let err: Error = HostError::NotAttached.into();
        assert!(matches!(err, Error::Host(HostError::NotAttached)));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_rusqlite_error() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/db.sqlite",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err: Error = sqlite_err.into();
            assert!(matches!(err, Error::DatabaseQuery(_)));
        }
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
        }
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::ConfigValidation {
            message: "body_cap must be greater than 0".to_string(),
        };
        assert!(err.to_string().contains("body_cap"));
    }

    #[test]
    fn test_directory_create_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/root/forbidden"),
            source: io_err,
        };
        assert!(err.to_string().contains("/root/forbidden"));
    }
}
