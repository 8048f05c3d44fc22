//! Schema versioning for the event store.
//!
//! Migrations are listed in ascending order. Each one runs in its own
//! transaction together with the version bump, so a store is never left
//! half-migrated.

use rusqlite::Connection;
use tracing::debug;

use crate::error::{Error, Result};

use super::schema::{CREATE_METADATA_TABLE, SCHEMA_STATEMENTS};

/// Schema version this build writes.
pub const CURRENT_VERSION: i32 = 1;

/// Metadata key holding the schema version.
const VERSION_KEY: &str = "schema_version";

/// One step of the schema history.
#[derive(Debug)]
struct Migration {
    version: i32,
    description: &'static str,
    statements: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "event log and run metadata",
    statements: SCHEMA_STATEMENTS,
}];

/// Bring the store up to [`CURRENT_VERSION`].
///
/// # Errors
///
/// Returns [`Error::DatabaseMigration`] if the stored version is unreadable
/// or newer than this build understands, and a database error if a
/// migration fails. A failed migration leaves the previous version intact.
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute(CREATE_METADATA_TABLE, [])?;

    let stored = stored_version(conn)?;
    if stored > CURRENT_VERSION {
        return Err(Error::DatabaseMigration {
            message: format!(
                "store is at schema version {stored}, this build supports up to {CURRENT_VERSION}"
            ),
        });
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > stored) {
        apply(conn, migration)?;
    }
    Ok(())
}

/// Stored schema version, 0 for a fresh store.
fn stored_version(conn: &Connection) -> Result<i32> {
    let value = match conn.query_row(
        "SELECT value FROM metadata WHERE key = ?1",
        [VERSION_KEY],
        |row| row.get::<_, String>(0),
    ) {
        Ok(value) => value,
        Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    value.parse().map_err(|_| Error::DatabaseMigration {
        message: format!("invalid schema version: {value}"),
    })
}

fn apply(conn: &Connection, migration: &Migration) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for statement in migration.statements {
        tx.execute(statement, [])?;
    }
    tx.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (VERSION_KEY, migration.version.to_string()),
    )?;
    tx.commit()?;

    debug!(
        version = migration.version,
        "applied schema migration: {}", migration.description
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [name],
            |row| row.get::<_, i32>(0),
        )
        .unwrap()
            == 1
    }

    fn write_version(conn: &Connection, value: &str) {
        conn.execute(CREATE_METADATA_TABLE, []).unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
            [value],
        )
        .unwrap();
    }

    #[test]
    fn test_migrations_ascend_to_current_version() {
        let versions: Vec<_> = MIGRATIONS.iter().map(|m| m.version).collect();
        assert!(versions.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(versions.last().copied(), Some(CURRENT_VERSION));
    }

    #[test]
    fn test_fresh_store_gets_tables_and_version() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(stored_version(&conn).ok(), None);

        initialize_schema(&conn).unwrap();

        assert!(table_exists(&conn, "events"));
        assert!(table_exists(&conn, "metadata"));
        assert_eq!(stored_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_empty_metadata_reads_as_version_zero() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(CREATE_METADATA_TABLE, []).unwrap();
        assert_eq!(stored_version(&conn).unwrap(), 0);
    }

    #[test]
    fn test_initialize_twice_keeps_data() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO events (event_id, type, phase, host, timestamp, payload)
             VALUES (1, 'http', 'request', 'a.example', '2026-01-01T00:00:00Z', '{}')",
            [],
        )
        .unwrap();

        initialize_schema(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_unparseable_version_is_migration_error() {
        let conn = Connection::open_in_memory().unwrap();
        write_version(&conn, "two");

        let err = initialize_schema(&conn).unwrap_err();
        assert!(matches!(err, Error::DatabaseMigration { .. }));
    }

    #[test]
    fn test_newer_store_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        write_version(&conn, &(CURRENT_VERSION + 1).to_string());

        let err = initialize_schema(&conn).unwrap_err();
        assert!(err.to_string().contains("supports up to"));
        assert!(!table_exists(&conn, "events"));
    }

    #[test]
    fn test_failed_migration_keeps_previous_version() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let broken = Migration {
            version: CURRENT_VERSION + 1,
            description: "broken",
            statements: &["CREATE TABLE scratch (id INTEGER)", "CREATE TABLE ("],
        };
        assert!(apply(&conn, &broken).is_err());

        assert_eq!(stored_version(&conn).unwrap(), CURRENT_VERSION);
        assert!(!table_exists(&conn, "scratch"));
    }

    #[test]
    fn test_indexes_created() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let indexes: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='index' AND tbl_name='events'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(std::result::Result::ok)
            .collect();

        assert!(indexes.iter().any(|n| n.contains("event_id")));
        assert!(indexes.iter().any(|n| n.contains("host")));
    }
}
