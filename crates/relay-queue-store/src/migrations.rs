//! Queue store migrations.
//!
//! Migrations are run in order and tracked in the `migrations` table.

use crate::QueueResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> QueueResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    if current_version >= CURRENT_VERSION {
        debug!(current_version, "Queue schema up to date");
        return Ok(());
    }

    info!(current_version, target_version = CURRENT_VERSION, "Running queue migrations");

    if current_version < 1 {
        migrate_v1_queue_tables(conn)?;
    }

    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> QueueResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: per-topic index counters and the item table.
fn migrate_v1_queue_tables(conn: &Connection) -> QueueResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS queue_topics (
            topic TEXT PRIMARY KEY,
            next_index INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS queue_items (
            topic TEXT NOT NULL REFERENCES queue_topics(topic),
            item_index INTEGER NOT NULL,
            payload BLOB NOT NULL,
            enqueued_at TEXT NOT NULL,
            PRIMARY KEY (topic, item_index)
        ) WITHOUT ROWID;
        ",
    )?;
    record_migration(conn, 1, "queue_tables")
}
