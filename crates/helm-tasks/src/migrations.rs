//! Schema of the `background_tasks` table.

use helm_events::sqlite::Migration;

/// Migration scope.
pub const SCOPE: &str = "tasks";

/// Ordered migrations.
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "background task queue",
    sql: "CREATE TABLE IF NOT EXISTS background_tasks (
            id                TEXT PRIMARY KEY,
            parent_session_id TEXT NOT NULL,
            session_id        TEXT,
            agent             TEXT NOT NULL,
            prompt            TEXT NOT NULL,
            description       TEXT NOT NULL,
            priority          INTEGER NOT NULL DEFAULT 0,
            token_budget      INTEGER NOT NULL,
            tokens_used       INTEGER NOT NULL DEFAULT 0,
            status            TEXT NOT NULL,
            result            TEXT,
            error             TEXT,
            created_at        INTEGER NOT NULL,
            started_at        INTEGER,
            completed_at      INTEGER
          );
          CREATE INDEX IF NOT EXISTS idx_background_tasks_queue
            ON background_tasks(status, priority DESC, created_at, id);
          CREATE INDEX IF NOT EXISTS idx_background_tasks_parent
            ON background_tasks(parent_session_id);",
}];
