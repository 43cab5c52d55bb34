//! Background agent manager.
//!
//! A background task is a prompt run by the orchestrator in a dedicated
//! session. While it runs, a watcher follows the session's per-step token
//! usage and cancels the task once the budget is exceeded. Background
//! sessions never see the background tools, so tasks cannot spawn tasks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use helm_core::ids::{SessionId, TaskId};
use helm_events::BusEvent;
use helm_settings::BackgroundSettings;
use helm_tasks::{BackgroundTask, NewTask, TaskStatus, TaskStore};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::scheduler::{Scheduler, TaskRunner};
use super::tools::{BACKGROUND_AGENT_TOOL, BACKGROUND_RESULT_TOOL, BackgroundAgentTool, BackgroundResultTool};
use crate::agent::AgentMode;
use crate::errors::RuntimeError;
use crate::orchestrator::{Orchestrator, PromptInput};

/// Parameters of [`BackgroundAgentManager::spawn`].
#[derive(Clone, Debug)]
pub struct SpawnRequest {
    /// Session spawning the task.
    pub parent_session_id: SessionId,
    /// Agent to run.
    pub agent: String,
    /// Prompt text.
    pub prompt: String,
    /// Short description for listings.
    pub description: String,
    /// Token budget; the configured default when unset.
    pub token_budget: Option<u64>,
    /// Higher runs first.
    pub priority: i64,
}

impl SpawnRequest {
    /// A request with priority 0 and the default budget.
    #[must_use]
    pub fn new(parent_session_id: SessionId, agent: impl Into<String>, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        Self {
            parent_session_id,
            agent: agent.into(),
            description: prompt.chars().take(80).collect(),
            prompt,
            token_budget: None,
            priority: 0,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the token budget.
    #[must_use]
    pub fn with_token_budget(mut self, budget: u64) -> Self {
        self.token_budget = Some(budget);
        self
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

/// Spawns, cancels and awaits background agents.
pub struct BackgroundAgentManager {
    orchestrator: Arc<Orchestrator>,
    scheduler: Arc<Scheduler>,
    settings: BackgroundSettings,
}

impl BackgroundAgentManager {
    /// Create a manager over `store`. Call [`init`](Self::init) before use.
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>, store: TaskStore) -> Arc<Self> {
        let settings = orchestrator.settings().background.clone();
        let runner = Arc::new(OrchestratorRunner {
            orchestrator: Arc::clone(&orchestrator),
            store: store.clone(),
        });
        let scheduler = Scheduler::new(
            store,
            Arc::clone(orchestrator.bus()),
            runner,
            settings.max_concurrent_tasks,
        );
        Arc::new(Self {
            orchestrator,
            scheduler,
            settings,
        })
    }

    /// Recover interrupted tasks and start queued ones.
    pub fn init(&self) -> Result<(), RuntimeError> {
        self.scheduler.init()
    }

    /// Add `background_agent` and `background_result` to the tool catalog.
    pub fn register_tools(self: &Arc<Self>) {
        let tools = self.orchestrator.tools();
        tools.register(Arc::new(BackgroundAgentTool::new(Arc::downgrade(self))));
        tools.register(Arc::new(BackgroundResultTool::new(Arc::downgrade(self))));
    }

    /// Queue a background agent.
    #[instrument(skip_all, fields(parent = %request.parent_session_id, agent = %request.agent))]
    pub fn spawn(&self, request: SpawnRequest) -> Result<BackgroundTask, RuntimeError> {
        let agent = self.orchestrator.agents().get(&request.agent)?;
        if agent.mode == AgentMode::Primary {
            return Err(RuntimeError::AgentNotSpawnable(agent.name));
        }
        let task = self.scheduler.enqueue(&NewTask {
            parent_session_id: request.parent_session_id,
            agent: agent.name,
            prompt: request.prompt,
            description: request.description,
            priority: request.priority,
            token_budget: request.token_budget.unwrap_or(self.settings.default_token_budget),
        })?;
        info!(task_id = %task.id, status = %task.status, budget = task.token_budget, "background agent spawned");
        Ok(task)
    }

    /// Cancel a task. Returns `false` if it already finished.
    pub fn cancel(&self, task_id: &TaskId) -> Result<bool, RuntimeError> {
        self.scheduler.cancel(task_id, "cancelled by request")
    }

    /// Wait up to `timeout_ms` for a task to finish and return its result.
    ///
    /// Fails with [`RuntimeError::TaskFailed`] or [`RuntimeError::TaskCancelled`]
    /// when the task ended that way, and [`RuntimeError::Timeout`] when it is
    /// still queued or running at the deadline.
    #[instrument(skip_all, fields(task_id = %task_id))]
    pub async fn await_result(&self, task_id: &TaskId, timeout_ms: u64) -> Result<String, RuntimeError> {
        match tokio::time::timeout(Duration::from_millis(timeout_ms), self.poll_until_terminal(task_id)).await {
            Ok(result) => result,
            Err(_) => Err(RuntimeError::Timeout { ms: timeout_ms }),
        }
    }

    async fn poll_until_terminal(&self, task_id: &TaskId) -> Result<String, RuntimeError> {
        let interval = Duration::from_millis(self.settings.poll_interval_ms.max(1));
        loop {
            let task = self.scheduler.store().require(task_id)?;
            match task.status {
                TaskStatus::Completed => return Ok(task.result.unwrap_or_default()),
                TaskStatus::Failed => {
                    return Err(RuntimeError::TaskFailed {
                        task_id: task.id,
                        message: task.error.unwrap_or_default(),
                    });
                }
                TaskStatus::Cancelled => {
                    return Err(RuntimeError::TaskCancelled {
                        task_id: task.id,
                        reason: task.error.unwrap_or_default(),
                    });
                }
                TaskStatus::Queued | TaskStatus::Running => tokio::time::sleep(interval).await,
            }
        }
    }

    /// A task by ID.
    pub fn get(&self, task_id: &TaskId) -> Result<Option<BackgroundTask>, RuntimeError> {
        Ok(self.scheduler.store().get(task_id)?)
    }

    /// Tasks in creation order, optionally filtered by status.
    pub fn list(&self, status: Option<TaskStatus>) -> Result<Vec<BackgroundTask>, RuntimeError> {
        Ok(self.scheduler.store().list(status)?)
    }

    /// Purge terminal tasks older than the configured retention.
    pub fn cleanup(&self) -> Result<usize, RuntimeError> {
        self.scheduler
            .cleanup(Duration::from_secs(self.settings.retention_hours.saturating_mul(3600)))
    }

    /// Cancel running tasks and stop starting new ones.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    /// The orchestrator tasks run on.
    #[must_use]
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// The scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }
}

/// Runs a task as a prompt in its own session.
struct OrchestratorRunner {
    orchestrator: Arc<Orchestrator>,
    store: TaskStore,
}

impl OrchestratorRunner {
    /// Persist and announce cumulative usage.
    fn record_usage(&self, task: &BackgroundTask, used: u64) {
        if let Err(e) = self.store.update_tokens(&task.id, used) {
            warn!(task_id = %task.id, error = %e, "failed to record task token usage");
        }
        let _ = self.orchestrator.bus().publish(BusEvent::BackgroundProgress {
            task_id: task.id.clone(),
            tokens_used: used,
            token_budget: task.token_budget,
        });
    }

    /// Tokens used by every assistant message stored for the session.
    async fn stored_usage(&self, session_id: &SessionId) -> Option<u64> {
        match self.orchestrator.messages(session_id).await {
            Ok(messages) => Some(
                messages
                    .iter()
                    .filter_map(|m| m.info.as_assistant())
                    .map(|m| m.tokens.total())
                    .sum(),
            ),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "failed to read session usage");
                None
            }
        }
    }
}

#[async_trait]
impl TaskRunner for OrchestratorRunner {
    #[instrument(skip_all, fields(task_id = %task.id))]
    async fn run(&self, task: &BackgroundTask, cancel: CancellationToken) -> Result<String, RuntimeError> {
        let session_id = task
            .session_id
            .clone()
            .ok_or_else(|| RuntimeError::Internal(format!("task {} has no session", task.id)))?;
        // Subscribe before the prompt starts so no step usage is missed.
        let mut events = self.orchestrator.bus().subscribe();
        let input = PromptInput::text(session_id.clone(), task.prompt.as_str())
            .with_agent(task.agent.as_str())
            .with_tool(BACKGROUND_AGENT_TOOL, false)
            .with_tool(BACKGROUND_RESULT_TOOL, false);

        let budget = cancel.child_token();
        let mut used = task.tokens_used;
        let update = |total: u64, used: &mut u64| {
            if total == *used {
                return;
            }
            *used = total;
            self.record_usage(task, total);
            if total > task.token_budget && !budget.is_cancelled() {
                warn!(used = total, budget = task.token_budget, "token budget exceeded, cancelling");
                budget.cancel();
            }
        };

        let prompt = self.orchestrator.prompt_with_signal(input, &budget);
        tokio::pin!(prompt);
        let result = loop {
            tokio::select! {
                result = &mut prompt => break result,
                event = events.recv() => match event {
                    // The step is stored before its usage is published, so the store total
                    // already includes it and never counts a step twice.
                    Ok(BusEvent::SessionTokens { session_id: s, tokens }) if s == session_id => {
                        let total = match self.stored_usage(&session_id).await {
                            Some(total) => total,
                            None => used + tokens.total(),
                        };
                        update(total.max(used), &mut used);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "budget watcher lagged, reading usage from the store");
                        if let Some(total) = self.stored_usage(&session_id).await {
                            update(total.max(used), &mut used);
                        }
                    }
                    Err(RecvError::Closed) => break (&mut prompt).await,
                },
            }
        };
        drop(events);
        if let Some(total) = self.stored_usage(&session_id).await {
            update(total.max(used), &mut used);
        }

        if used > task.token_budget {
            return Err(RuntimeError::BudgetExceeded {
                used,
                budget: task.token_budget,
            });
        }
        let message = result?;
        let text = message.last_text().unwrap_or_default().to_owned();
        debug!(chars = text.len(), used, "background prompt finished");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::RuntimeDeps;
    use assert_matches::assert_matches;
    use helm_core::messages::{ModelRef, TokenUsage};
    use helm_events::sqlite::{ConnectionConfig, new_in_memory};
    use helm_events::{EventBus, MemoryStore};
    use helm_llm::testing::{Script, ScriptedProvider, text_reply};
    use helm_llm::{ModelInfo, ProviderRegistry};
    use helm_settings::HelmSettings;

    fn manager(scripts: Vec<Script>) -> Arc<BackgroundAgentManager> {
        let mut providers = ProviderRegistry::new();
        providers.register(
            Arc::new(ScriptedProvider::with_scripts("test", scripts)),
            vec![ModelInfo::new("test", "m", 100_000, 4_000)],
        );
        let deps = RuntimeDeps::new(Arc::new(MemoryStore::new()), Arc::new(EventBus::new()), Arc::new(providers));
        let mut settings = HelmSettings::default();
        settings.model.provider_id = "test".into();
        settings.model.model_id = "m".into();
        settings.background.poll_interval_ms = 5;
        let orchestrator = Arc::new(Orchestrator::new(deps, settings));
        let store = TaskStore::open(new_in_memory(&ConnectionConfig::default()).unwrap()).unwrap();
        let manager = BackgroundAgentManager::new(orchestrator, store);
        manager.init().unwrap();
        manager
    }

    fn usage(output: u64) -> TokenUsage {
        TokenUsage {
            output,
            ..TokenUsage::default()
        }
    }

    #[tokio::test]
    async fn spawned_task_returns_final_text() {
        let manager = manager(vec![Script::Respond(text_reply("report ready", usage(10)))]);
        let task = manager
            .spawn(SpawnRequest::new(SessionId::new(), "build", "write a report").with_token_budget(1_000))
            .unwrap();
        assert_eq!(manager.await_result(&task.id, 5_000).await.unwrap(), "report ready");

        let task = manager.get(&task.id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.tokens_used, 10);
        let messages = manager.orchestrator.messages(&task.session_id.unwrap()).await.unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn budget_overrun_cancels() {
        let manager = manager(vec![Script::Respond(text_reply("expensive", usage(1_200)))]);
        let task = manager
            .spawn(SpawnRequest::new(SessionId::new(), "build", "go").with_token_budget(1_000))
            .unwrap();
        let result = manager.await_result(&task.id, 5_000).await;

        assert_matches!(result, Err(RuntimeError::TaskCancelled { reason, .. }) if reason.contains("budget"));
        let task = manager.get(&task.id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.tokens_used, 1_200);
    }

    #[tokio::test]
    async fn interactive_agents_cannot_be_spawned() {
        let manager = manager(vec![]);
        assert_matches!(
            manager.spawn(SpawnRequest::new(SessionId::new(), "plan", "go")),
            Err(RuntimeError::AgentNotSpawnable(name)) if name == "plan"
        );
        assert_matches!(
            manager.spawn(SpawnRequest::new(SessionId::new(), "ghost", "go")),
            Err(RuntimeError::AgentNotFound(_))
        );
        assert!(manager.list(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn await_times_out_while_running() {
        let manager = manager(vec![Script::Hang(vec![])]);
        let task = manager.spawn(SpawnRequest::new(SessionId::new(), "build", "go")).unwrap();
        assert_matches!(
            manager.await_result(&task.id, 50).await,
            Err(RuntimeError::Timeout { ms: 50 })
        );

        assert!(manager.cancel(&task.id).unwrap());
        assert_matches!(
            manager.await_result(&task.id, 5_000).await,
            Err(RuntimeError::TaskCancelled { reason, .. }) if reason == "cancelled by request"
        );
        assert!(!manager.cancel(&task.id).unwrap());
    }

    #[tokio::test]
    async fn background_sessions_do_not_see_background_tools() {
        let provider = Arc::new(ScriptedProvider::new("test"));
        let mut providers = ProviderRegistry::new();
        providers.register(provider.clone(), vec![ModelInfo::new("test", "m", 100_000, 4_000)]);
        let deps = RuntimeDeps::new(Arc::new(MemoryStore::new()), Arc::new(EventBus::new()), Arc::new(providers));
        let mut settings = HelmSettings::default();
        settings.model = helm_settings::ModelSettings {
            provider_id: "test".into(),
            model_id: "m".into(),
        };
        let orchestrator = Arc::new(Orchestrator::new(deps, settings));
        let store = TaskStore::open(new_in_memory(&ConnectionConfig::default()).unwrap()).unwrap();
        let manager = BackgroundAgentManager::new(Arc::clone(&orchestrator), store);
        manager.register_tools();

        let parent = SessionId::new();
        let _ = orchestrator
            .prompt(PromptInput::text(parent, "hi").with_model(ModelRef::new("test", "m")))
            .await
            .unwrap();
        let task = manager.spawn(SpawnRequest::new(SessionId::new(), "build", "go")).unwrap();
        let _ = manager.await_result(&task.id, 5_000).await.unwrap();

        let requests = provider.requests();
        let names = |i: usize| requests[i].tools.iter().map(|t| t.name.clone()).collect::<Vec<_>>();
        assert!(names(0).contains(&BACKGROUND_AGENT_TOOL.to_owned()));
        assert!(names(1).is_empty());
    }
}
