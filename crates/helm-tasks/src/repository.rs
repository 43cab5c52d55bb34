//! SQL data access for background tasks.
//!
//! All methods take a `&Connection` and are stateless. Status transitions
//! are guarded in the `WHERE` clause, so a terminal task never changes again
//! and callers learn from the returned flag whether their update applied.

use helm_core::ids::{SessionId, TaskId};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::errors::TaskError;
use crate::types::{BackgroundTask, NewTask, TaskStatus};

const COLUMNS: &str = "id, parent_session_id, session_id, agent, prompt, description, priority,
     token_budget, tokens_used, status, result, error, created_at, started_at, completed_at";

fn to_sql_u64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<BackgroundTask> {
    let status: String = row.get("status")?;
    let status = TaskStatus::from_sql(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            9,
            rusqlite::types::Type::Text,
            format!("unknown task status `{status}`").into(),
        )
    })?;
    Ok(BackgroundTask {
        id: TaskId::from_string(row.get("id")?),
        parent_session_id: SessionId::from_string(row.get("parent_session_id")?),
        session_id: row.get::<_, Option<String>>("session_id")?.map(SessionId::from_string),
        agent: row.get("agent")?,
        prompt: row.get("prompt")?,
        description: row.get("description")?,
        priority: row.get("priority")?,
        token_budget: from_sql_u64(row.get("token_budget")?),
        tokens_used: from_sql_u64(row.get("tokens_used")?),
        status,
        result: row.get("result")?,
        error: row.get("error")?,
        created_at: row.get("created_at")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
    })
}

/// Background task repository.
pub struct TaskRepository;

impl TaskRepository {
    /// Enqueue a task.
    pub fn insert(conn: &Connection, task: &NewTask, now: i64) -> Result<BackgroundTask, TaskError> {
        let id = TaskId::new();
        let _ = conn.execute(
            "INSERT INTO background_tasks
               (id, parent_session_id, agent, prompt, description, priority, token_budget,
                status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id.as_str(),
                task.parent_session_id.as_str(),
                task.agent,
                task.prompt,
                task.description,
                task.priority,
                to_sql_u64(task.token_budget),
                TaskStatus::Queued.as_sql(),
                now,
            ],
        )?;
        Self::get(conn, &id)?.ok_or_else(|| TaskError::not_found(&id))
    }

    /// Get a task by ID.
    pub fn get(conn: &Connection, id: &TaskId) -> Result<Option<BackgroundTask>, TaskError> {
        Ok(conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM background_tasks WHERE id = ?1"),
                params![id.as_str()],
                task_from_row,
            )
            .optional()?)
    }

    /// Highest-priority, oldest queued task.
    pub fn next_queued(conn: &Connection) -> Result<Option<BackgroundTask>, TaskError> {
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM background_tasks WHERE status = 'queued'
                     ORDER BY priority DESC, created_at ASC, id ASC LIMIT 1"
                ),
                [],
                task_from_row,
            )
            .optional()?)
    }

    /// Number of running tasks.
    pub fn count_running(conn: &Connection) -> Result<usize, TaskError> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM background_tasks WHERE status = 'running'",
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// `queued → running`, assigning the task session.
    pub fn mark_running(
        conn: &Connection,
        id: &TaskId,
        session_id: &SessionId,
        now: i64,
    ) -> Result<bool, TaskError> {
        let changed = conn.execute(
            "UPDATE background_tasks SET status = 'running', session_id = ?2, started_at = ?3
             WHERE id = ?1 AND status = 'queued'",
            params![id.as_str(), session_id.as_str(), now],
        )?;
        Ok(changed == 1)
    }

    /// Move a non-terminal task to a terminal status.
    pub fn finish(
        conn: &Connection,
        id: &TaskId,
        status: TaskStatus,
        result: Option<&str>,
        error: Option<&str>,
        now: i64,
    ) -> Result<bool, TaskError> {
        debug_assert!(status.is_terminal());
        let changed = conn.execute(
            "UPDATE background_tasks SET status = ?2, result = ?3, error = ?4, completed_at = ?5
             WHERE id = ?1 AND status IN ('queued', 'running')",
            params![id.as_str(), status.as_sql(), result, error, now],
        )?;
        Ok(changed == 1)
    }

    /// Record cumulative token usage.
    pub fn update_tokens(conn: &Connection, id: &TaskId, tokens_used: u64) -> Result<(), TaskError> {
        let _ = conn.execute(
            "UPDATE background_tasks SET tokens_used = ?2 WHERE id = ?1",
            params![id.as_str(), to_sql_u64(tokens_used)],
        )?;
        Ok(())
    }

    /// Fail every task still marked running. Returns the affected IDs.
    pub fn mark_interrupted(conn: &Connection, reason: &str, now: i64) -> Result<Vec<TaskId>, TaskError> {
        let mut stmt = conn.prepare("SELECT id FROM background_tasks WHERE status = 'running'")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let _ = conn.execute(
            "UPDATE background_tasks SET status = 'failed', error = ?1, completed_at = ?2
             WHERE status = 'running'",
            params![reason, now],
        )?;
        Ok(ids.into_iter().map(TaskId::from_string).collect())
    }

    /// Delete terminal tasks that finished before `cutoff`.
    pub fn purge_terminal_older_than(conn: &Connection, cutoff: i64) -> Result<usize, TaskError> {
        Ok(conn.execute(
            "DELETE FROM background_tasks
             WHERE status IN ('completed', 'failed', 'cancelled') AND completed_at < ?1",
            params![cutoff],
        )?)
    }

    /// Tasks in creation order, optionally filtered by status.
    pub fn list(conn: &Connection, status: Option<TaskStatus>) -> Result<Vec<BackgroundTask>, TaskError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM background_tasks
             WHERE ?1 IS NULL OR status = ?1
             ORDER BY created_at ASC, id ASC"
        ))?;
        let tasks = stmt
            .query_map(params![status.map(TaskStatus::as_sql)], task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }
}
