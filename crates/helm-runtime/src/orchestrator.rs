//! Conversation orchestrator.
//!
//! One prompt runs under the session lock:
//!
//! ```text
//! write user message
//! loop {
//!     resolve tools → overflow check (compact) → stream one step
//!     → interpret events (run tools) → tool-calls ? continue : stop
//! }
//! finish (settle tool parts, record error, complete message) → prune
//! ```
//!
//! A prompt writes one assistant message that spans all of its steps. A
//! compaction in the middle of a prompt closes that message and opens a new
//! one after the checkpoint.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use helm_context::{
    Compactor, ContextError, ModelOutputSummarizer, OverflowPolicy, PrunePolicy, Pruner,
    checkpoint_index, estimate_tokens, to_model_messages,
};
use helm_core::ids::{MessageId, SessionId};
use helm_core::messages::{
    AssistantMessage, Message, MessageTime, MessageWithParts, ModelRef, Part, PartKind,
    TokenUsage, UserMessage,
};
use helm_core::now_ms;
use helm_events::{BusEvent, EventBus, MessageStore};
use helm_hooks::HookEngine;
use helm_llm::{FinishReason, ModelInfo, ModelRequest, ProviderError, ProviderRegistry, ResolvedModel};
use helm_settings::HelmSettings;
use helm_tools::{
    ApprovalGate, ResolvedTools, ToolEnablement, ToolExecutor, ToolRegistry, ToolResolver, ToolRules,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::agent::{AgentCatalog, AgentDefinition, DEFAULT_AGENT};
use crate::errors::{OVERFLOW_GUIDANCE, RuntimeError};
use crate::lock::SessionLock;
use crate::processor::{AssistantTurn, Recorder, StepContext, StepOutcome, StreamProcessor, settle_tool};
use crate::snapshot::{NoopSnapshot, Snapshot};

// ─────────────────────────────────────────────────────────────────────────────
// Inputs
// ─────────────────────────────────────────────────────────────────────────────

/// Shared collaborators of the orchestrator.
#[derive(Clone)]
pub struct RuntimeDeps {
    /// Message persistence.
    pub store: Arc<dyn MessageStore>,
    /// Event bus.
    pub bus: Arc<EventBus>,
    /// Model providers.
    pub providers: Arc<ProviderRegistry>,
    /// Tool catalog.
    pub tools: Arc<ToolRegistry>,
    /// Tool hooks.
    pub hooks: Arc<HookEngine>,
    /// Agents.
    pub agents: Arc<AgentCatalog>,
    /// Step snapshots.
    pub snapshot: Arc<dyn Snapshot>,
}

impl RuntimeDeps {
    /// Defaults: empty tool catalog, no hooks, built-in agents, no snapshots.
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, bus: Arc<EventBus>, providers: Arc<ProviderRegistry>) -> Self {
        Self {
            store,
            bus,
            providers,
            tools: Arc::new(ToolRegistry::new()),
            hooks: Arc::new(HookEngine::empty()),
            agents: Arc::new(AgentCatalog::builtin()),
            snapshot: Arc::new(NoopSnapshot),
        }
    }

    /// Use `tools` as the tool catalog.
    #[must_use]
    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    /// Use `hooks` around tool calls.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<HookEngine>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Use `agents` as the agent catalog.
    #[must_use]
    pub fn with_agents(mut self, agents: Arc<AgentCatalog>) -> Self {
        self.agents = agents;
        self
    }

    /// Take step snapshots with `snapshot`.
    #[must_use]
    pub fn with_snapshot(mut self, snapshot: Arc<dyn Snapshot>) -> Self {
        self.snapshot = snapshot;
        self
    }
}

/// One user prompt.
#[derive(Clone, Debug)]
pub struct PromptInput {
    /// Target session.
    pub session_id: SessionId,
    /// Text parts of the user message.
    pub parts: Vec<String>,
    /// Model override.
    pub model: Option<ModelRef>,
    /// Agent; [`DEFAULT_AGENT`] when unset.
    pub agent: Option<String>,
    /// Per-request `tool pattern → enabled` overrides.
    pub tools: BTreeMap<String, bool>,
}

impl PromptInput {
    /// A single-text prompt.
    #[must_use]
    pub fn text(session_id: SessionId, text: impl Into<String>) -> Self {
        Self {
            session_id,
            parts: vec![text.into()],
            model: None,
            agent: None,
            tools: BTreeMap::new(),
        }
    }

    /// Run with `agent`.
    #[must_use]
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    /// Run against `model`.
    #[must_use]
    pub fn with_model(mut self, model: ModelRef) -> Self {
        self.model = Some(model);
        self
    }

    /// Enable or disable tools matching `pattern` for this prompt.
    #[must_use]
    pub fn with_tool(mut self, pattern: impl Into<String>, enabled: bool) -> Self {
        let _ = self.tools.insert(pattern.into(), enabled);
        self
    }
}

/// Everything resolved for one prompt.
struct PromptRun {
    session_id: SessionId,
    user_id: MessageId,
    agent: AgentDefinition,
    agent_rules: ToolRules,
    overrides: ToolRules,
    model_ref: ModelRef,
    model: ResolvedModel,
    steps: u32,
    reactive_used: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────────────────

/// Runs prompts against sessions.
pub struct Orchestrator {
    recorder: Recorder,
    providers: Arc<ProviderRegistry>,
    agents: Arc<AgentCatalog>,
    snapshot: Arc<dyn Snapshot>,
    lock: SessionLock,
    resolver: ToolResolver,
    executor: ToolExecutor,
    hooks: Arc<HookEngine>,
    approval: Arc<ApprovalGate>,
    compactor: Compactor,
    overflow: OverflowPolicy,
    settings: HelmSettings,
}

impl Orchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(deps: RuntimeDeps, settings: HelmSettings) -> Self {
        let RuntimeDeps {
            store,
            bus,
            providers,
            tools,
            hooks,
            agents,
            snapshot,
        } = deps;
        let context = &settings.context;
        Self {
            resolver: ToolResolver::new(Arc::clone(&tools), Arc::new(ToolEnablement::new())),
            executor: ToolExecutor::new(tools, Arc::clone(&hooks), settings.tools.discovery_tool.clone()),
            hooks,
            approval: Arc::new(ApprovalGate::new(Arc::clone(&bus))),
            compactor: Compactor::new(Arc::clone(&store), Arc::clone(&bus))
                .with_output_token_max(context.output_token_max),
            overflow: OverflowPolicy {
                output_token_max: context.output_token_max,
                safety_percent: context.safety_multiplier_percent,
            },
            recorder: Recorder { store, bus },
            providers,
            agents,
            snapshot,
            lock: SessionLock::new(),
            settings,
        }
    }

    /// Run a prompt to completion.
    pub async fn prompt(&self, input: PromptInput) -> Result<MessageWithParts, RuntimeError> {
        self.prompt_with_signal(input, &CancellationToken::new()).await
    }

    /// Run a prompt that also aborts when `parent` is cancelled.
    ///
    /// Waits for earlier prompts on the same session to finish first, and for
    /// background tool hooks to finish before returning.
    #[instrument(skip_all, fields(session_id = %input.session_id))]
    pub async fn prompt_with_signal(
        &self,
        input: PromptInput,
        parent: &CancellationToken,
    ) -> Result<MessageWithParts, RuntimeError> {
        let session_id = input.session_id.clone();
        let mut guard = self.lock.acquire_with(&session_id, parent).await;
        let cancel = guard.signal().clone();
        let result = self.run_prompt(input, &cancel).await;
        guard.release();
        self.hooks.drain_background().await;
        let _ = self.recorder.bus.publish(BusEvent::SessionIdle { session_id });
        result
    }

    /// Write a compaction checkpoint for `session_id` now.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn compact(&self, session_id: &SessionId) -> Result<MessageWithParts, RuntimeError> {
        let mut guard = self.lock.acquire(session_id).await;
        let result = self.compact_locked(session_id, guard.signal()).await;
        guard.release();
        let _ = self.recorder.bus.publish(BusEvent::SessionIdle {
            session_id: session_id.clone(),
        });
        result
    }

    async fn compact_locked(
        &self,
        session_id: &SessionId,
        cancel: &CancellationToken,
    ) -> Result<MessageWithParts, RuntimeError> {
        let messages = self.recorder.store.list(session_id).await?;
        if messages.is_empty() {
            return Err(RuntimeError::SessionNotFound(session_id.to_string()));
        }
        let (model_ref, agent) = messages
            .iter()
            .rev()
            .find_map(|m| m.info.as_user())
            .map_or_else(
                || (self.settings.model.model_ref(), DEFAULT_AGENT.to_owned()),
                |u| (u.model.clone(), u.agent.clone()),
            );
        let model = self.providers.resolve(&model_ref)?;
        self.compactor
            .run(session_id, &model, &agent, cancel)
            .await
            .map_err(compaction_error)
    }

    /// Abort the prompt running on `session_id`. Returns `false` if idle.
    pub fn abort(&self, session_id: &SessionId) -> bool {
        let aborted = self.lock.abort(session_id);
        if aborted {
            info!(session_id = %session_id, "abort requested");
        }
        aborted
    }

    /// Whether a prompt is running on `session_id`.
    #[must_use]
    pub fn is_busy(&self, session_id: &SessionId) -> bool {
        self.lock.is_locked(session_id)
    }

    /// Messages of a session, oldest first.
    pub async fn messages(&self, session_id: &SessionId) -> Result<Vec<MessageWithParts>, RuntimeError> {
        Ok(self.recorder.store.list(session_id).await?)
    }

    /// Approval gate for doom-loop prompts.
    #[must_use]
    pub fn approval(&self) -> &Arc<ApprovalGate> {
        &self.approval
    }

    /// Per-session enabled deferred tools.
    #[must_use]
    pub fn enablement(&self) -> &Arc<ToolEnablement> {
        self.resolver.enablement()
    }

    /// Tool catalog.
    #[must_use]
    pub fn tools(&self) -> &Arc<ToolRegistry> {
        self.resolver.registry()
    }

    /// Agent catalog.
    #[must_use]
    pub fn agents(&self) -> &Arc<AgentCatalog> {
        &self.agents
    }

    /// Event bus.
    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.recorder.bus
    }

    /// Session lock table.
    #[must_use]
    pub fn lock(&self) -> &SessionLock {
        &self.lock
    }

    /// Active settings.
    #[must_use]
    pub fn settings(&self) -> &HelmSettings {
        &self.settings
    }

    // ── Prompt lifecycle ────────────────────────────────────────────────────

    async fn run_prompt(
        &self,
        input: PromptInput,
        cancel: &CancellationToken,
    ) -> Result<MessageWithParts, RuntimeError> {
        let mut run = self.start(input).await?;
        let mut turn = None;
        let result = self.run_loop(&mut run, &mut turn, cancel).await;
        let message = self.finish(&run, turn, result).await?;
        if self.settings.context.auto_prune {
            self.prune(&run).await;
        }
        Ok(message)
    }

    /// Resolve agent, model and rules, then persist the user message.
    async fn start(&self, input: PromptInput) -> Result<PromptRun, RuntimeError> {
        let agent = self.agents.get(input.agent.as_deref().unwrap_or(DEFAULT_AGENT))?;
        let model_ref = input
            .model
            .clone()
            .or_else(|| agent.model.clone())
            .unwrap_or_else(|| self.settings.model.model_ref());
        let model = self.providers.resolve(&model_ref)?;
        let agent_rules = agent.rules()?;
        let overrides = ToolRules::from_overrides(&input.tools)?;

        let user = UserMessage {
            id: MessageId::new(),
            session_id: input.session_id.clone(),
            time: MessageTime {
                created: now_ms(),
                completed: None,
            },
            agent: agent.name.clone(),
            model: model_ref.clone(),
            tools: input.tools,
        };
        self.recorder.message(Message::User(user.clone())).await?;
        for text in &input.parts {
            self.recorder
                .part(&Part::text(&input.session_id, &user.id, text.as_str()), None)
                .await?;
        }
        debug!(agent = %agent.name, model = %model_ref, "prompt started");

        Ok(PromptRun {
            session_id: input.session_id,
            user_id: user.id,
            agent,
            agent_rules,
            overrides,
            model_ref,
            model,
            steps: 0,
            reactive_used: false,
        })
    }

    async fn run_loop(
        &self,
        run: &mut PromptRun,
        turn: &mut Option<AssistantTurn>,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError> {
        loop {
            if cancel.is_cancelled() {
                return Err(RuntimeError::Aborted);
            }
            // Re-resolved every step so tools enabled mid-prompt show up.
            let tools = self
                .resolver
                .resolve(&run.session_id, &run.agent_rules, &run.overrides);

            if self.settings.context.auto_compact && self.overflows(run).await? {
                info!("context window nearly full, compacting before the next request");
                self.compact_in_turn(run, turn, cancel).await?;
                if self.overflows(run).await? {
                    return Err(RuntimeError::ContextOverflow {
                        message: OVERFLOW_GUIDANCE.to_owned(),
                    });
                }
            }

            if turn.is_none() {
                *turn = Some(self.open_turn(run).await?);
            }
            let current = turn
                .as_mut()
                .ok_or_else(|| RuntimeError::Internal("no open assistant message".into()))?;

            let history = self.recorder.store.list(&run.session_id).await?;
            let request = ModelRequest {
                system: run.agent.system_prompt.clone(),
                messages: to_model_messages(&history),
                tools: tools.definitions(),
                max_output_tokens: Some(self.output_reserve(&run.model.info)),
            };
            run.steps += 1;

            let outcome = match self.step_with_retry(run, current, &tools, &request, cancel).await {
                Ok(outcome) => outcome,
                Err(RuntimeError::Provider(e)) if e.is_context_overflow() => {
                    if run.reactive_used || !self.settings.context.auto_compact {
                        return Err(RuntimeError::ContextOverflow {
                            message: format!("{e}. {OVERFLOW_GUIDANCE}"),
                        });
                    }
                    run.reactive_used = true;
                    warn!(error = %e, "provider rejected the request as too long, compacting once");
                    self.compact_in_turn(run, turn, cancel).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if outcome.blocked {
                current.message.blocked = true;
                return Ok(());
            }
            match outcome.finish {
                Some(FinishReason::ToolCalls) => {
                    if run.agent.max_steps.is_some_and(|max| run.steps >= max) {
                        info!(steps = run.steps, "step limit reached");
                        return Ok(());
                    }
                }
                Some(FinishReason::Length) => return Err(RuntimeError::OutputLength),
                Some(FinishReason::Error) => {
                    return Err(RuntimeError::Provider(ProviderError::Other {
                        message: "model finished with an error".into(),
                    }));
                }
                _ => return Ok(()),
            }
        }
    }

    /// Settle open tool parts, record the outcome and complete the message.
    async fn finish(
        &self,
        run: &PromptRun,
        turn: Option<AssistantTurn>,
        result: Result<(), RuntimeError>,
    ) -> Result<MessageWithParts, RuntimeError> {
        let mut turn = match turn {
            Some(turn) => turn,
            None => self.open_turn(run).await?,
        };
        let now = now_ms();
        let reason = match &result {
            Ok(()) => "interrupted: the model stopped before calling the tool".to_owned(),
            Err(RuntimeError::Aborted) => "aborted".to_owned(),
            Err(e) => format!("interrupted: {e}"),
        };
        for part in &mut turn.parts {
            if settle_tool(part, Err(reason.clone()), now) {
                if let Err(e) = self.recorder.part(part, None).await {
                    warn!(error = %e, "failed to save settled tool part");
                }
            }
        }
        if let Err(e) = &result {
            turn.message.error = Some(e.to_message_error(&run.model_ref.provider_id));
        }
        let _ = turn.message.complete(now);
        if let Err(e) = self.recorder.message(Message::Assistant(turn.message.clone())).await {
            error!(error = %e, "failed to save completed assistant message");
        }

        match result {
            Ok(()) => {
                info!(
                    message_id = %turn.message.id,
                    steps = run.steps,
                    tokens = turn.message.tokens.total(),
                    blocked = turn.message.blocked,
                    "prompt finished"
                );
                Ok(turn.into_message())
            }
            Err(RuntimeError::Aborted) => {
                info!(message_id = %turn.message.id, "prompt aborted");
                Err(RuntimeError::Aborted)
            }
            Err(e) => {
                error!(message_id = %turn.message.id, category = e.category(), error = %e, "prompt failed");
                let _ = self.recorder.bus.publish(BusEvent::SessionError {
                    session_id: run.session_id.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn prune(&self, run: &PromptRun) {
        let context = &self.settings.context;
        let pruner = Pruner::new(Arc::clone(&self.recorder.store), Arc::clone(&self.recorder.bus))
            .with_policy(PrunePolicy {
                protect: context.prune_protect,
                minimum: context.prune_minimum,
                summary_min_chars: context.prune_summary_min_chars,
                summary_max_input_chars: context.prune_summary_max_input_chars,
                protected_turns: context.prune_protected_turns,
            })
            .with_summarizer(Arc::new(ModelOutputSummarizer::new(run.model.clone())));
        match pruner.prune(&run.session_id).await {
            Ok(report) if report.pruned_parts > 0 => {
                info!(parts = report.pruned_parts, tokens = report.pruned_tokens, "pruned old tool output");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "pruning failed"),
        }
    }

    // ── Steps ───────────────────────────────────────────────────────────────

    async fn step_with_retry(
        &self,
        run: &PromptRun,
        turn: &mut AssistantTurn,
        tools: &ResolvedTools,
        request: &ModelRequest,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome, RuntimeError> {
        let mut attempt = 0_u32;
        loop {
            let error = match self.step(run, turn, tools, request, cancel).await {
                Ok(outcome) => return Ok(outcome),
                Err(RuntimeError::Provider(e)) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };
            attempt += 1;
            self.settle_open_tools(turn, "interrupted: the request was retried").await?;
            if !self.settings.retry.allows(attempt) {
                return Err(RuntimeError::TransientProvider {
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = self.settings.retry.delay_for(attempt, error.retry_after_ms());
            warn!(attempt, delay_ms = delay, error = %error, "model request failed, retrying");
            let part = Part::new(
                &turn.message.session_id,
                &turn.message.id,
                PartKind::Retry {
                    attempt,
                    error: error.to_string(),
                    created: now_ms(),
                },
            );
            self.recorder.part(&part, None).await?;
            turn.parts.push(part);

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(RuntimeError::Aborted),
                () = tokio::time::sleep(Duration::from_millis(delay)) => {}
            }
        }
    }

    async fn step(
        &self,
        run: &PromptRun,
        turn: &mut AssistantTurn,
        tools: &ResolvedTools,
        request: &ModelRequest,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome, RuntimeError> {
        let stream = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RuntimeError::Aborted),
            stream = run.model.provider.stream(&run.model.info, request) => stream?,
        };
        let ctx = StepContext {
            recorder: &self.recorder,
            executor: &self.executor,
            approval: &self.approval,
            snapshot: self.snapshot.as_ref(),
            model: &run.model.info,
            tools,
            doom_loop_threshold: self.settings.tools.doom_loop_threshold,
            cancel,
        };
        StreamProcessor::new(&ctx, turn).run(stream).await
    }

    async fn settle_open_tools(&self, turn: &mut AssistantTurn, reason: &str) -> Result<(), RuntimeError> {
        let now = now_ms();
        for part in &mut turn.parts {
            if settle_tool(part, Err(reason.to_owned()), now) {
                self.recorder.part(part, None).await?;
            }
        }
        Ok(())
    }

    // ── Context window ──────────────────────────────────────────────────────

    fn output_reserve(&self, model: &ModelInfo) -> u64 {
        match model.limit.output.min(self.settings.context.output_token_max) {
            0 => self.settings.context.output_token_max,
            n => n,
        }
    }

    /// Whether the history the next request would carry overflows.
    async fn overflows(&self, run: &PromptRun) -> Result<bool, RuntimeError> {
        let messages = self.recorder.store.list(&run.session_id).await?;
        let start = checkpoint_index(&messages).unwrap_or(0);
        let estimate = estimate_tokens(&run.agent.system_prompt, &messages[start..]);
        let overflow = self.overflow.is_overflow(estimate, &run.model.info);
        if overflow {
            debug!(estimate, context = run.model.info.limit.context, "estimate exceeds usable context");
        }
        Ok(overflow)
    }

    /// Close the open assistant message, then write a checkpoint.
    async fn compact_in_turn(
        &self,
        run: &PromptRun,
        turn: &mut Option<AssistantTurn>,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError> {
        if let Some(mut closing) = turn.take() {
            self.settle_open_tools(&mut closing, "interrupted: the conversation was compacted")
                .await?;
            let _ = closing.message.complete(now_ms());
            self.recorder.message(Message::Assistant(closing.message)).await?;
        }
        let checkpoint = self
            .compactor
            .run(&run.session_id, &run.model, &run.agent.name, cancel)
            .await
            .map_err(compaction_error)?;
        info!(checkpoint = %checkpoint.info.id(), "compacted mid-prompt");
        Ok(())
    }

    async fn open_turn(&self, run: &PromptRun) -> Result<AssistantTurn, RuntimeError> {
        let message = AssistantMessage {
            id: MessageId::new(),
            session_id: run.session_id.clone(),
            parent_id: run.user_id.clone(),
            time: MessageTime {
                created: now_ms(),
                completed: None,
            },
            agent: run.agent.name.clone(),
            model: run.model_ref.clone(),
            tokens: TokenUsage::default(),
            cost: 0.0,
            error: None,
            summary: false,
            blocked: false,
            finish: None,
        };
        self.recorder.message(Message::Assistant(message.clone())).await?;
        Ok(AssistantTurn::new(message))
    }
}

fn compaction_error(e: ContextError) -> RuntimeError {
    match e {
        ContextError::Cancelled => RuntimeError::Aborted,
        e if e.is_context_overflow() => RuntimeError::ContextOverflow {
            message: format!("compaction request was too long. {OVERFLOW_GUIDANCE}"),
        },
        e => RuntimeError::Context(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use helm_core::messages::MessageError;
    use helm_events::MemoryStore;
    use helm_llm::testing::{Script, ScriptedProvider, text_reply, tool_call_reply};
    use helm_tools::testing::EchoTool;
    use serde_json::json;

    fn orchestrator(scripts: Vec<Script>, settings: HelmSettings) -> (Orchestrator, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::with_scripts("test", scripts));
        let mut providers = ProviderRegistry::new();
        providers.register(provider.clone(), vec![ModelInfo::new("test", "m", 100_000, 4_000)]);
        let tools = Arc::new(ToolRegistry::new());
        tools.register(Arc::new(EchoTool::new("echo")));
        let deps = RuntimeDeps::new(Arc::new(MemoryStore::new()), Arc::new(EventBus::new()), Arc::new(providers))
            .with_tools(tools);
        let mut settings = settings;
        settings.model.provider_id = "test".into();
        settings.model.model_id = "m".into();
        (Orchestrator::new(deps, settings), provider)
    }

    fn usage(input: u64) -> TokenUsage {
        TokenUsage {
            input,
            ..TokenUsage::default()
        }
    }

    fn network() -> ProviderError {
        ProviderError::Network {
            message: "connection reset".into(),
        }
    }

    fn assistant(message: &MessageWithParts) -> &AssistantMessage {
        message.info.as_assistant().unwrap()
    }

    #[tokio::test]
    async fn text_reply_completes_the_message() {
        let (orch, provider) = orchestrator(vec![Script::Respond(text_reply("hi", usage(7)))], HelmSettings::default());
        let session = SessionId::new();
        let message = orch.prompt(PromptInput::text(session.clone(), "hello")).await.unwrap();

        assert_eq!(message.last_text(), Some("hi"));
        let info = assistant(&message);
        assert!(info.is_completed());
        assert_eq!(info.tokens.input, 7);
        assert_eq!(info.agent, "build");
        assert_eq!(provider.request_count(), 1);
        assert!(!orch.is_busy(&session));

        let stored = orch.messages(&session).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].text(), "hello");
    }

    #[tokio::test]
    async fn tool_calls_loop_until_the_model_stops() {
        let (orch, provider) = orchestrator(
            vec![
                Script::Respond(tool_call_reply("c1", "echo", json!({"n": 1}), usage(1))),
                Script::Respond(text_reply("done", usage(1))),
            ],
            HelmSettings::default(),
        );
        let message = orch.prompt(PromptInput::text(SessionId::new(), "go")).await.unwrap();

        assert_eq!(provider.request_count(), 2);
        assert_eq!(assistant(&message).tokens.input, 2);
        let second = &provider.requests()[1];
        assert!(second.messages.iter().any(|m| m.role == helm_llm::ModelRole::Tool));
        assert_eq!(second.tools.len(), 1);
    }

    #[tokio::test]
    async fn step_limit_stops_on_tool_calls() {
        let (orch, provider) = orchestrator(
            vec![Script::Respond(tool_call_reply("c1", "echo", json!({}), usage(1)))],
            HelmSettings::default(),
        );
        orch.agents().register(AgentDefinition::new("once", "one step").with_max_steps(1));
        let message = orch
            .prompt(PromptInput::text(SessionId::new(), "go").with_agent("once"))
            .await
            .unwrap();
        assert_eq!(provider.request_count(), 1);
        assert_eq!(assistant(&message).finish.as_deref(), Some("tool-calls"));
    }

    #[tokio::test]
    async fn overrides_hide_tools() {
        let (orch, provider) = orchestrator(vec![], HelmSettings::default());
        let _ = orch
            .prompt(PromptInput::text(SessionId::new(), "go").with_tool("echo", false))
            .await
            .unwrap();
        assert!(provider.requests()[0].tools.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_with_retry_parts() {
        let (orch, provider) = orchestrator(
            vec![
                Script::Reject(network()),
                Script::FailAfter(vec![], network()),
                Script::Respond(text_reply("recovered", usage(1))),
            ],
            HelmSettings::default(),
        );
        let message = orch.prompt(PromptInput::text(SessionId::new(), "go")).await.unwrap();

        assert_eq!(provider.request_count(), 3);
        let attempts: Vec<u32> = message
            .parts
            .iter()
            .filter_map(|p| match p.kind {
                PartKind::Retry { attempt, .. } => Some(attempt),
                _ => None,
            })
            .collect();
        assert_eq!(attempts, vec![1, 2]);
        assert_eq!(message.last_text(), Some("recovered"));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let mut settings = HelmSettings::default();
        settings.retry.max_retries = 2;
        let (orch, provider) = orchestrator(
            vec![Script::Reject(network()), Script::Reject(network()), Script::Reject(network())],
            settings,
        );
        let session = SessionId::new();
        let result = orch.prompt(PromptInput::text(session.clone(), "go")).await;

        assert_matches!(result, Err(RuntimeError::TransientProvider { attempts: 3, .. }));
        assert_eq!(provider.request_count(), 3);
        let stored = orch.messages(&session).await.unwrap();
        let info = assistant(stored.last().unwrap());
        assert!(info.is_completed());
        assert_matches!(info.error, Some(MessageError::Unknown { .. }));
    }

    #[tokio::test]
    async fn auth_errors_are_not_retried() {
        let (orch, provider) = orchestrator(
            vec![Script::Reject(ProviderError::Auth {
                message: "bad key".into(),
            })],
            HelmSettings::default(),
        );
        let session = SessionId::new();
        let mut rx = orch.bus().subscribe();
        let result = orch.prompt(PromptInput::text(session.clone(), "go")).await;

        assert_matches!(result, Err(RuntimeError::Provider(ProviderError::Auth { .. })));
        assert_eq!(provider.request_count(), 1);
        let stored = orch.messages(&session).await.unwrap();
        assert_matches!(
            &assistant(stored.last().unwrap()).error,
            Some(MessageError::ProviderAuth { provider_id, .. }) if provider_id == "test"
        );
        let mut saw_error = false;
        while let Ok(event) = rx.try_recv() {
            saw_error |= matches!(event, BusEvent::SessionError { .. });
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn output_length_is_recorded() {
        let mut events = text_reply("cut", usage(1));
        for event in &mut events {
            if let helm_llm::StreamEvent::FinishStep { finish_reason, .. }
            | helm_llm::StreamEvent::Finish { finish_reason } = event
            {
                *finish_reason = FinishReason::Length;
            }
        }
        let (orch, _) = orchestrator(vec![Script::Respond(events)], HelmSettings::default());
        let session = SessionId::new();
        let result = orch.prompt(PromptInput::text(session.clone(), "go")).await;

        assert_matches!(result, Err(RuntimeError::OutputLength));
        let stored = orch.messages(&session).await.unwrap();
        assert_eq!(assistant(stored.last().unwrap()).error, Some(MessageError::OutputLength));
    }

    #[tokio::test]
    async fn unknown_agent_writes_nothing() {
        let (orch, _) = orchestrator(vec![], HelmSettings::default());
        let session = SessionId::new();
        let result = orch.prompt(PromptInput::text(session.clone(), "go").with_agent("ghost")).await;
        assert_matches!(result, Err(RuntimeError::AgentNotFound(_)));
        assert!(orch.messages(&session).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn manual_compaction_is_idempotent() {
        let (orch, provider) = orchestrator(
            vec![
                Script::Respond(text_reply("answer", usage(1))),
                Script::Respond(text_reply("summary of the work", usage(1))),
            ],
            HelmSettings::default(),
        );
        let session = SessionId::new();
        assert_matches!(orch.compact(&session).await, Err(RuntimeError::SessionNotFound(_)));
        let _ = orch.prompt(PromptInput::text(session.clone(), "go")).await.unwrap();

        let first = orch.compact(&session).await.unwrap();
        let second = orch.compact(&session).await.unwrap();
        assert_eq!(first.info.id(), second.info.id());
        assert!(first.info.is_summary());
        assert_eq!(provider.request_count(), 2);
    }
}
