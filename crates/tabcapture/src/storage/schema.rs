//! `SQLite` schema definitions for tabcapture.
//!
//! This module contains the SQL statements for creating and managing
//! the database schema.

/// SQL statement to create the events table.
///
/// `seq` is assigned on append and defines read order.
pub const CREATE_EVENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS events (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id INTEGER NOT NULL,
    type TEXT NOT NULL,
    phase TEXT NOT NULL,
    host TEXT,
    timestamp TEXT NOT NULL,
    payload TEXT NOT NULL
)
";

/// SQL statement to create an index on `event_id`.
pub const CREATE_EVENT_ID_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_events_event_id ON events(event_id)
";

/// SQL statement to create an index on `host` for summaries.
pub const CREATE_HOST_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_events_host ON events(host)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_EVENTS_TABLE,
    CREATE_EVENT_ID_INDEX,
    CREATE_HOST_INDEX,
    CREATE_METADATA_TABLE,
];
