//! Background task scheduler.
//!
//! The queue lives in [`TaskStore`]; the scheduler only starts and settles
//! tasks. Every terminal transition pumps the queue again, so queued work
//! drains without an external driver. The running count is read from the
//! database inside the claim transaction, which keeps the concurrency limit
//! exact even with several pumps in flight.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use helm_core::ids::TaskId;
use helm_events::{BusEvent, EventBus};
use helm_tasks::{BackgroundTask, NewTask, TaskStatus, TaskStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::errors::RuntimeError;

/// Executes one claimed task.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Run `task` to completion and return its result text.
    ///
    /// `cancel` fires when the task is cancelled or the scheduler shuts down.
    async fn run(&self, task: &BackgroundTask, cancel: CancellationToken) -> Result<String, RuntimeError>;
}

/// Starts queued tasks, at most `max_concurrent` at a time.
pub struct Scheduler {
    store: TaskStore,
    bus: Arc<EventBus>,
    runner: Arc<dyn TaskRunner>,
    max_concurrent: usize,
    running: DashMap<TaskId, CancellationToken>,
    cancel_reasons: DashMap<TaskId, String>,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// Create a scheduler. Call [`init`](Self::init) before use.
    #[must_use]
    pub fn new(store: TaskStore, bus: Arc<EventBus>, runner: Arc<dyn TaskRunner>, max_concurrent: usize) -> Arc<Self> {
        Arc::new(Self {
            store,
            bus,
            runner,
            max_concurrent: max_concurrent.max(1),
            running: DashMap::new(),
            cancel_reasons: DashMap::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Fail tasks a previous process left running, then start queued work.
    #[instrument(skip_all)]
    pub fn init(self: &Arc<Self>) -> Result<(), RuntimeError> {
        for task_id in self.store.recover_interrupted()? {
            let error = self
                .store
                .get(&task_id)?
                .and_then(|t| t.error)
                .unwrap_or_else(|| "interrupted".to_owned());
            let _ = self.bus.publish(BusEvent::BackgroundFailed { task_id, error });
        }
        let _ = self.pump()?;
        Ok(())
    }

    /// Queue a task and start it if a slot is free.
    pub fn enqueue(self: &Arc<Self>, task: &NewTask) -> Result<BackgroundTask, RuntimeError> {
        let queued = self.store.enqueue(task)?;
        let _ = self.pump()?;
        // The pump may already have started it.
        Ok(self.store.get(&queued.id)?.unwrap_or(queued))
    }

    /// Start queued tasks until the limit is reached. Returns how many started.
    pub fn pump(self: &Arc<Self>) -> Result<usize, RuntimeError> {
        if self.shutdown.is_cancelled() {
            return Ok(0);
        }
        let mut started = 0;
        while let Some(task) = self.store.claim_next(self.max_concurrent)? {
            self.start(task);
            started += 1;
        }
        Ok(started)
    }

    fn start(self: &Arc<Self>, task: BackgroundTask) {
        let cancel = self.shutdown.child_token();
        let _ = self.running.insert(task.id.clone(), cancel.clone());
        if let Some(session_id) = task.session_id.clone() {
            let _ = self.bus.publish(BusEvent::BackgroundStarted {
                task_id: task.id.clone(),
                session_id,
            });
        }
        info!(task_id = %task.id, agent = %task.agent, priority = task.priority, "background task started");

        let scheduler = Arc::clone(self);
        let _ = tokio::spawn(async move {
            let runner = Arc::clone(&scheduler.runner);
            let claimed = task.clone();
            let run = tokio::spawn(async move { runner.run(&claimed, cancel).await });
            let result = match run.await {
                Ok(result) => result,
                Err(e) => Err(RuntimeError::Internal(format!("task runner panicked: {e}"))),
            };
            scheduler.settle(&task, result);
            let _ = scheduler.running.remove(&task.id);
            if let Err(e) = scheduler.pump() {
                error!(error = %e, "failed to start next background task");
            }
        });
    }

    fn settle(&self, task: &BackgroundTask, result: Result<String, RuntimeError>) {
        let requested = self.cancel_reasons.remove(&task.id).map(|(_, reason)| reason);
        let (status, event) = match result {
            Ok(text) => (
                TaskStatus::Completed,
                BusEvent::BackgroundCompleted {
                    task_id: task.id.clone(),
                    result: text,
                },
            ),
            Err(e) if requested.is_some() || e.is_cancellation() => (
                TaskStatus::Cancelled,
                BusEvent::BackgroundCancelled {
                    task_id: task.id.clone(),
                    reason: requested.unwrap_or_else(|| e.to_string()),
                },
            ),
            Err(e) => (
                TaskStatus::Failed,
                BusEvent::BackgroundFailed {
                    task_id: task.id.clone(),
                    error: e.to_string(),
                },
            ),
        };
        let (result_text, error_text) = match &event {
            BusEvent::BackgroundCompleted { result, .. } => (Some(result.as_str()), None),
            BusEvent::BackgroundCancelled { reason, .. } => (None, Some(reason.as_str())),
            BusEvent::BackgroundFailed { error, .. } => (None, Some(error.as_str())),
            _ => (None, None),
        };
        match self.store.finish(&task.id, status, result_text, error_text) {
            Ok(true) => {
                if status == TaskStatus::Failed {
                    warn!(task_id = %task.id, error = error_text.unwrap_or_default(), "background task failed");
                }
                let _ = self.bus.publish(event);
            }
            Ok(false) => debug!(task_id = %task.id, "task was already terminal"),
            Err(e) => error!(task_id = %task.id, error = %e, "failed to record task outcome"),
        }
    }

    /// Cancel a queued or running task. Returns `false` if it already finished.
    #[instrument(skip_all, fields(task_id = %task_id))]
    pub fn cancel(&self, task_id: &TaskId, reason: &str) -> Result<bool, RuntimeError> {
        if self.signal_running(task_id, reason) {
            return Ok(true);
        }
        let task = self.store.require(task_id)?;
        if task.status != TaskStatus::Queued {
            return Ok(false);
        }
        if !self.store.finish(task_id, TaskStatus::Cancelled, None, Some(reason))? {
            return Ok(false);
        }
        // Claimed between the status read and the update.
        let _ = self.signal_running(task_id, reason);
        let _ = self.bus.publish(BusEvent::BackgroundCancelled {
            task_id: task_id.clone(),
            reason: reason.to_owned(),
        });
        Ok(true)
    }

    fn signal_running(&self, task_id: &TaskId, reason: &str) -> bool {
        let Some(token) = self.running.get(task_id).map(|t| t.value().clone()) else {
            return false;
        };
        let _ = self.cancel_reasons.insert(task_id.clone(), reason.to_owned());
        token.cancel();
        true
    }

    /// Purge terminal tasks older than `retention`.
    pub fn cleanup(&self, retention: Duration) -> Result<usize, RuntimeError> {
        let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
        Ok(self.store.purge_older_than(retention_ms)?)
    }

    /// Tasks running in this process.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Stop starting tasks and cancel the running ones.
    pub fn shutdown(&self) {
        info!(running = self.running.len(), "background scheduler shutting down");
        for entry in &self.running {
            let _ = self.cancel_reasons.insert(entry.key().clone(), "shutdown".to_owned());
        }
        self.shutdown.cancel();
    }

    /// Underlying queue.
    #[must_use]
    pub fn store(&self) -> &TaskStore {
        &self.store
    }
}
