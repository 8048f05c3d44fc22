//! Storage layer for tabcapture.
//!
//! This module provides the append/read/clear contract the capture session
//! persists through ([`EventStore`]) and its `SQLite` implementation
//! ([`Storage`]).

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::buffer::Counters;
use crate::error::{Error, Result};
use crate::event::CapturedEvent;
use crate::host::TargetId;

/// Metadata key holding the current run.
const RUN_KEY: &str = "run";

/// Metadata of one recording run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMeta {
    /// Run identifier, `run_<unix_ms>`.
    pub run_id: String,
    /// Target the run was recorded on.
    pub target_id: TargetId,
    /// When capture started.
    pub started_at: DateTime<Utc>,
    /// When capture stopped, if it has.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    /// Counter snapshot taken when the run was finalized.
    #[serde(default)]
    pub counters: Counters,
}

impl RunMeta {
    /// Start a new run on the target, stamped now.
    #[must_use]
    pub fn begin(target_id: TargetId) -> Self {
        let started_at = Utc::now();
        Self {
            run_id: format!("run_{}", started_at.timestamp_millis()),
            target_id,
            started_at,
            stopped_at: None,
            counters: Counters::default(),
        }
    }

    /// Mark the run stopped now with the final counters.
    pub fn finish(&mut self, counters: Counters) {
        self.stopped_at = Some(Utc::now());
        self.counters = counters;
    }

    /// Run length in seconds, up to now if still running.
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        let end = self.stopped_at.unwrap_or_else(Utc::now);
        #[allow(clippy::cast_precision_loss)]
        let millis = (end - self.started_at).num_milliseconds().max(0) as f64;
        millis / 1000.0
    }
}

/// Persistent store the capture session writes to.
///
/// `append` must be all-or-nothing: the in-memory queue is only released
/// once it returns `Ok`.
#[async_trait::async_trait]
pub trait EventStore: Send + Sync {
    /// Append events in the given order.
    async fn append(&self, events: &[CapturedEvent]) -> Result<()>;

    /// Store the run metadata, replacing any previous value.
    async fn put_meta(&self, meta: &RunMeta) -> Result<()>;

    /// Load the run metadata.
    async fn run_meta(&self) -> Result<Option<RunMeta>>;

    /// Read every event in append order.
    async fn read_all(&self) -> Result<Vec<CapturedEvent>>;

    /// Delete all events and run metadata.
    async fn clear(&self) -> Result<()>;
}

/// `SQLite`-backed event store.
///
/// Cloning yields another handle to the same connection. The
/// [`EventStore`] methods run on the blocking thread pool.
#[derive(Debug, Clone)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    /// Initializes the schema if this is a new database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("database connection lock poisoned"))
    }

    /// Append events in a single transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the database operation fails; in
    /// that case nothing is written.
    pub fn append_events(&self, events: &[CapturedEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r"
                INSERT INTO events (event_id, type, phase, host, timestamp, payload)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ",
            )?;
            for event in events {
                let payload = serde_json::to_string(event)?;
                let event_id = i64::try_from(event.id).unwrap_or(i64::MAX);
                stmt.execute(params![
                    event_id,
                    event.event_type.to_string(),
                    event.phase().to_string(),
                    event.host(),
                    event.timestamp.to_rfc3339(),
                    payload,
                ])?;
            }
        }
        tx.commit()?;
        debug!("Appended {} events", events.len());
        Ok(())
    }

    /// Read every event in append order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or a stored payload
    /// cannot be decoded.
    pub fn read_events(&self) -> Result<Vec<CapturedEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT payload FROM events ORDER BY seq ASC")?;
        let payloads = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(Error::from))
            .collect()
    }

    /// Count stored events.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Store the run metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the database operation fails.
    pub fn put_run_meta(&self, meta: &RunMeta) -> Result<()> {
        let value = serde_json::to_string(meta)?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            (RUN_KEY, value),
        )?;
        Ok(())
    }

    /// Load the run metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or the stored value
    /// cannot be decoded.
    pub fn get_run_meta(&self) -> Result<Option<RunMeta>> {
        let value: Option<String> = self
            .conn()?
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                [RUN_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.map(|v| serde_json::from_str(&v)).transpose()?)
    }

    /// Delete all events and run metadata. The schema version is kept.
    ///
    /// Returns the number of events deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear_all(&self) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let affected = tx.execute("DELETE FROM events", [])?;
        tx.execute("DELETE FROM metadata WHERE key = ?1", [RUN_KEY])?;
        tx.commit()?;

        if affected > 0 {
            info!("Purged {} stored events", affected);
        }
        Ok(affected)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let total_events = self.count()?;
        let run_id = self.get_run_meta()?.map(|m| m.run_id);

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_events,
            run_id,
            db_size_bytes,
        })
    }
}

/// Run a store operation off the async workers.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::internal(format!("storage task failed: {e}")))?
}

#[async_trait::async_trait]
impl EventStore for Storage {
    async fn append(&self, events: &[CapturedEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let this = self.clone();
        let events = events.to_vec();
        blocking(move || this.append_events(&events)).await
    }

    async fn put_meta(&self, meta: &RunMeta) -> Result<()> {
        let this = self.clone();
        let meta = meta.clone();
        blocking(move || this.put_run_meta(&meta)).await
    }

    async fn run_meta(&self) -> Result<Option<RunMeta>> {
        let this = self.clone();
        blocking(move || this.get_run_meta()).await
    }

    async fn read_all(&self) -> Result<Vec<CapturedEvent>> {
        let this = self.clone();
        blocking(move || this.read_events()).await
    }

    async fn clear(&self) -> Result<()> {
        let this = self.clone();
        blocking(move || this.clear_all().map(|_| ())).await
    }
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Total number of events stored.
    pub total_events: i64,
    /// Id of the stored run, if any.
    pub run_id: Option<String>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
