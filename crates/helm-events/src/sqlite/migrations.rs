//! Versioned schema migrations.
//!
//! Each crate that owns tables passes its own ordered migration list; the
//! `schema_version` table is keyed by `(scope, version)` so scopes advance
//! independently. Every migration runs in its own transaction.

use rusqlite::{Connection, params};
use tracing::{debug, info};

use crate::errors::{Result, StoreError};

/// One schema step.
#[derive(Debug)]
pub struct Migration {
    /// Monotonic version within its scope.
    pub version: u32,
    /// Human-readable summary.
    pub description: &'static str,
    /// SQL batch to execute.
    pub sql: &'static str,
}

/// Apply every migration of `scope` newer than the recorded version.
///
/// Returns the number of migrations applied.
pub fn run_migrations(conn: &Connection, scope: &str, migrations: &[Migration]) -> Result<u32> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
           scope       TEXT    NOT NULL,
           version     INTEGER NOT NULL,
           applied_at  TEXT    NOT NULL,
           description TEXT,
           PRIMARY KEY (scope, version)
         );",
    )
    .map_err(|e| migration_error(format!("failed to create schema_version: {e}")))?;

    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version WHERE scope = ?1",
            params![scope],
            |row| row.get(0),
        )
        .map_err(|e| migration_error(format!("failed to read schema_version: {e}")))?;

    let mut applied = 0;
    for migration in migrations.iter().filter(|m| m.version > current) {
        info!(scope, version = migration.version, description = migration.description, "applying migration");
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| migration_error(format!("{scope} v{}: {e}", migration.version)))?;
        tx.execute_batch(migration.sql)
            .map_err(|e| migration_error(format!("{scope} v{} failed: {e}", migration.version)))?;
        let _ = tx.execute(
            "INSERT INTO schema_version (scope, version, applied_at, description)
             VALUES (?1, ?2, datetime('now'), ?3)",
            params![scope, migration.version, migration.description],
        )?;
        tx.commit()?;
        applied += 1;
    }
    if applied == 0 {
        debug!(scope, current, "schema up to date");
    }
    Ok(applied)
}

fn migration_error(message: String) -> StoreError {
    StoreError::Migration { message }
}
