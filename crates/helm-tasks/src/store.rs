//! Pooled entry point to the task queue.

use helm_core::ids::{SessionId, TaskId};
use helm_events::sqlite::{ConnectionPool, run_migrations};
use rusqlite::TransactionBehavior;
use tracing::{debug, info, warn};

use crate::errors::TaskError;
use crate::migrations::{MIGRATIONS, SCOPE};
use crate::repository::TaskRepository;
use crate::types::{BackgroundTask, NewTask, TaskStatus};

/// Background task queue over a shared `SQLite` pool.
#[derive(Clone)]
pub struct TaskStore {
    pool: ConnectionPool,
}

impl TaskStore {
    /// Wrap a pool, creating the schema if needed.
    pub fn open(pool: ConnectionPool) -> Result<Self, TaskError> {
        let _ = run_migrations(&*pool.get()?, SCOPE, MIGRATIONS)?;
        Ok(Self { pool })
    }

    /// Enqueue a task.
    pub fn enqueue(&self, task: &NewTask) -> Result<BackgroundTask, TaskError> {
        let task = TaskRepository::insert(&*self.pool.get()?, task, helm_core::now_ms())?;
        debug!(task_id = %task.id, priority = task.priority, "task queued");
        Ok(task)
    }

    /// Get a task.
    pub fn get(&self, id: &TaskId) -> Result<Option<BackgroundTask>, TaskError> {
        TaskRepository::get(&*self.pool.get()?, id)
    }

    /// Get a task or fail with [`TaskError::NotFound`].
    pub fn require(&self, id: &TaskId) -> Result<BackgroundTask, TaskError> {
        self.get(id)?.ok_or_else(|| TaskError::not_found(id))
    }

    /// Highest-priority, oldest queued task.
    pub fn next_queued(&self) -> Result<Option<BackgroundTask>, TaskError> {
        TaskRepository::next_queued(&*self.pool.get()?)
    }

    /// Number of running tasks.
    pub fn count_running(&self) -> Result<usize, TaskError> {
        TaskRepository::count_running(&*self.pool.get()?)
    }

    /// Start the next queued task if fewer than `max_running` are running.
    ///
    /// The count, the pick, and the transition happen in one immediate
    /// transaction, so concurrent callers never exceed the limit.
    pub fn claim_next(&self, max_running: usize) -> Result<Option<BackgroundTask>, TaskError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if TaskRepository::count_running(&tx)? >= max_running {
            return Ok(None);
        }
        let Some(task) = TaskRepository::next_queued(&tx)? else {
            return Ok(None);
        };
        let session_id = SessionId::new();
        if !TaskRepository::mark_running(&tx, &task.id, &session_id, helm_core::now_ms())? {
            return Ok(None);
        }
        let claimed = TaskRepository::get(&tx, &task.id)?;
        tx.commit()?;
        Ok(claimed)
    }

    /// Move a task to a terminal status. Returns `false` if it already was.
    pub fn finish(
        &self,
        id: &TaskId,
        status: TaskStatus,
        result: Option<&str>,
        error: Option<&str>,
    ) -> Result<bool, TaskError> {
        let applied = TaskRepository::finish(&*self.pool.get()?, id, status, result, error, helm_core::now_ms())?;
        if applied {
            info!(task_id = %id, status = %status, "task finished");
        }
        Ok(applied)
    }

    /// Record cumulative token usage.
    pub fn update_tokens(&self, id: &TaskId, tokens_used: u64) -> Result<(), TaskError> {
        TaskRepository::update_tokens(&*self.pool.get()?, id, tokens_used)
    }

    /// Fail every task left running by a previous process.
    pub fn recover_interrupted(&self) -> Result<Vec<TaskId>, TaskError> {
        let ids = TaskRepository::mark_interrupted(
            &*self.pool.get()?,
            "interrupted: the process stopped while the task was running",
            helm_core::now_ms(),
        )?;
        if !ids.is_empty() {
            warn!(count = ids.len(), "marked interrupted tasks as failed");
        }
        Ok(ids)
    }

    /// Delete terminal tasks that finished more than `retention_ms` ago.
    pub fn purge_older_than(&self, retention_ms: i64) -> Result<usize, TaskError> {
        let cutoff = helm_core::now_ms().saturating_sub(retention_ms);
        let purged = TaskRepository::purge_terminal_older_than(&*self.pool.get()?, cutoff)?;
        if purged > 0 {
            info!(purged, "purged finished tasks");
        }
        Ok(purged)
    }

    /// Tasks in creation order.
    pub fn list(&self, status: Option<TaskStatus>) -> Result<Vec<BackgroundTask>, TaskError> {
        TaskRepository::list(&*self.pool.get()?, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helm_events::sqlite::{ConnectionConfig, new_file, new_in_memory};

    fn store() -> TaskStore {
        TaskStore::open(new_in_memory(&ConnectionConfig::default()).unwrap()).unwrap()
    }

    fn new_task(priority: i64) -> NewTask {
        NewTask {
            parent_session_id: SessionId::from("ses_parent"),
            agent: "build".into(),
            prompt: "p".into(),
            description: "d".into(),
            priority,
            token_budget: 100,
        }
    }

    #[test]
    fn claim_respects_limit() {
        let store = store();
        for p in 0..3 {
            let _ = store.enqueue(&new_task(p)).unwrap();
        }
        let first = store.claim_next(2).unwrap().unwrap();
        let second = store.claim_next(2).unwrap().unwrap();
        assert_eq!(first.priority, 2);
        assert_eq!(second.priority, 1);
        assert!(first.session_id.is_some());
        assert_eq!(first.status, TaskStatus::Running);
        assert!(store.claim_next(2).unwrap().is_none());

        assert!(store.finish(&first.id, TaskStatus::Completed, Some("ok"), None).unwrap());
        assert_eq!(store.claim_next(2).unwrap().unwrap().priority, 0);
    }

    #[test]
    fn claim_on_empty_queue_is_none() {
        assert!(store().claim_next(3).unwrap().is_none());
    }

    #[test]
    fn restart_fails_running_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("helm.db");
        let id = {
            let store = TaskStore::open(new_file(&path, &ConnectionConfig::default()).unwrap()).unwrap();
            let _ = store.enqueue(&new_task(0)).unwrap();
            store.claim_next(1).unwrap().unwrap().id
        };

        let store = TaskStore::open(new_file(&path, &ConnectionConfig::default()).unwrap()).unwrap();
        assert_eq!(store.recover_interrupted().unwrap(), vec![id.clone()]);
        let task = store.require(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("interrupted"));
        assert!(store.claim_next(1).unwrap().is_none());
    }

    #[test]
    fn require_unknown_task_fails() {
        assert!(matches!(
            store().require(&TaskId::from("tsk_missing")),
            Err(TaskError::NotFound(_))
        ));
    }

    #[test]
    fn purge_keeps_recent_tasks() {
        let store = store();
        let task = store.enqueue(&new_task(0)).unwrap();
        let _ = store.finish(&task.id, TaskStatus::Failed, None, Some("x")).unwrap();
        assert_eq!(store.purge_older_than(60_000).unwrap(), 0);
        assert_eq!(store.purge_older_than(-1).unwrap(), 1);
    }
}
