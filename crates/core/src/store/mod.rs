//! SQLite-backed stores.
//!
//! Each store owns a writer connection behind a mutex. The source of record may also hold a
//! few read-only connections so that concurrent sample lookups do not queue on the writer.
//! Schemas are created by numbered migrations recorded in `schema_version`;
//! reopening an existing database only applies the migrations it has not seen.

use crate::error::{StoreError, StoreResult};
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;
use std::time::Duration;

pub mod mirror;
pub mod source;

pub use mirror::MirrorDb;
pub use source::SourceOfRecordDb;

pub(crate) type Migration = (i64, &'static str);

pub(crate) fn open_connection(path: &Path, migrations: &[Migration]) -> StoreResult<Connection> {
    let conn = Connection::open(path)?;
    prepare(&conn, migrations)?;
    Ok(conn)
}

/// A read-only connection to an existing, already migrated database.
pub(crate) fn open_read_connection(path: &Path) -> StoreResult<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

pub(crate) fn open_memory_connection(migrations: &[Migration]) -> StoreResult<Connection> {
    let conn = Connection::open_in_memory()?;
    prepare(&conn, migrations)?;
    Ok(conn)
}

fn prepare(conn: &Connection, migrations: &[Migration]) -> StoreResult<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys=ON;
         CREATE TABLE IF NOT EXISTS schema_version (
             version     INTEGER PRIMARY KEY,
             applied_at  TEXT NOT NULL DEFAULT (datetime('now'))
         );",
    )?;
    run_migrations(conn, migrations)
}

/// Applies every migration newer than the recorded schema version.
pub(crate) fn run_migrations(conn: &Connection, migrations: &[Migration]) -> StoreResult<()> {
    let current = current_version(conn)?;

    for &(version, sql) in migrations {
        if version <= current {
            continue;
        }
        tracing::info!(version, "running migration");
        let applied = conn.execute_batch(sql).and_then(|_| {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![version],
            )
        });
        applied.map_err(|e| StoreError::MigrationFailed {
            version,
            reason: e.to_string(),
        })?;
    }

    Ok(())
}

pub(crate) fn current_version(conn: &Connection) -> StoreResult<i64> {
    let version = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        row.get::<_, Option<i64>>(0)
    })?;
    Ok(version.unwrap_or(0))
}
