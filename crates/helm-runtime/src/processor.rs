//! Stream processor: turns one model step's events into persisted parts.
//!
//! Every event is written through as it arrives, so a crash mid-stream
//! leaves the parts produced so far on disk. Tool calls run inline when the
//! model finishes emitting them; their part moves pending → running →
//! completed/error and the call-id slot is freed on the terminal transition.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use helm_core::ids::PermissionId;
use helm_core::messages::{
    AssistantMessage, Message, MessageWithParts, Part, PartKind, SpanTime, ToolState, ToolTime,
};
use helm_core::now_ms;
use helm_events::{BusEvent, EventBus, MessageStore, PermissionRequest};
use helm_llm::{FinishReason, ModelInfo, ProviderError, StreamEvent, StreamEventStream};
use helm_tools::doom_loop::is_doom_loop;
use helm_tools::{ApprovalGate, ResolvedTools, ToolCallRequest, ToolError, ToolExecutor, ToolOutput};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::RuntimeError;
use crate::snapshot::Snapshot;

// ─────────────────────────────────────────────────────────────────────────────
// Persistence
// ─────────────────────────────────────────────────────────────────────────────

/// Upserts records and announces them on the bus.
#[derive(Clone)]
pub(crate) struct Recorder {
    pub store: Arc<dyn MessageStore>,
    pub bus: Arc<EventBus>,
}

impl Recorder {
    pub async fn part(&self, part: &Part, delta: Option<String>) -> Result<(), RuntimeError> {
        self.store.upsert_part(part).await?;
        let _ = self.bus.publish(BusEvent::PartUpdated {
            part: part.clone(),
            delta,
        });
        Ok(())
    }

    pub async fn message(&self, message: Message) -> Result<(), RuntimeError> {
        self.store.upsert_message(&message).await?;
        let _ = self.bus.publish(BusEvent::MessageUpdated { info: message });
        Ok(())
    }
}

/// The assistant message a prompt is writing, with its parts in order.
pub(crate) struct AssistantTurn {
    pub message: AssistantMessage,
    pub parts: Vec<Part>,
}

impl AssistantTurn {
    pub fn new(message: AssistantMessage) -> Self {
        Self {
            message,
            parts: Vec::new(),
        }
    }

    pub fn into_message(self) -> MessageWithParts {
        MessageWithParts {
            info: Message::Assistant(self.message),
            parts: self.parts,
        }
    }
}

/// Move a non-terminal tool part to `completed` or `error`.
///
/// Returns `false` if `part` is not a tool part or is already terminal.
pub(crate) fn settle_tool(part: &mut Part, result: Result<ToolOutput, String>, now: i64) -> bool {
    let Some(state) = part.tool_state_mut() else {
        return false;
    };
    if state.is_terminal() {
        return false;
    }
    let input = state.input().cloned().unwrap_or(Value::Null);
    let time = ToolTime {
        start: state.start().unwrap_or(now),
        end: now,
        compacted: None,
    };
    *state = match result {
        Ok(out) => ToolState::Completed {
            input,
            output: out.output,
            title: out.title,
            metadata: out.metadata,
            time,
        },
        Err(error) => ToolState::Error { input, error, time },
    };
    true
}

// ─────────────────────────────────────────────────────────────────────────────
// Processor
// ─────────────────────────────────────────────────────────────────────────────

/// Collaborators for one model step.
pub(crate) struct StepContext<'a> {
    pub recorder: &'a Recorder,
    pub executor: &'a ToolExecutor,
    pub approval: &'a ApprovalGate,
    pub snapshot: &'a dyn Snapshot,
    pub model: &'a ModelInfo,
    pub tools: &'a ResolvedTools,
    pub doom_loop_threshold: usize,
    pub cancel: &'a CancellationToken,
}

/// How a step ended.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct StepOutcome {
    pub finish: Option<FinishReason>,
    pub blocked: bool,
}

pub(crate) struct StreamProcessor<'a> {
    ctx: &'a StepContext<'a>,
    turn: &'a mut AssistantTurn,
    texts: HashMap<String, usize>,
    reasoning: HashMap<String, usize>,
    calls: HashMap<String, usize>,
    step_snapshot: Option<String>,
    outcome: StepOutcome,
}

impl<'a> StreamProcessor<'a> {
    pub fn new(ctx: &'a StepContext<'a>, turn: &'a mut AssistantTurn) -> Self {
        Self {
            ctx,
            turn,
            texts: HashMap::new(),
            reasoning: HashMap::new(),
            calls: HashMap::new(),
            step_snapshot: None,
            outcome: StepOutcome::default(),
        }
    }

    /// Consume the stream until it ends, fails, or the turn is aborted.
    pub async fn run(mut self, mut stream: StreamEventStream) -> Result<StepOutcome, RuntimeError> {
        loop {
            let event = tokio::select! {
                biased;
                () = self.ctx.cancel.cancelled() => return Err(RuntimeError::Aborted),
                event = stream.next() => event,
            };
            match event {
                None => break,
                Some(Ok(event)) => self.handle(event).await?,
                Some(Err(ProviderError::Cancelled)) => return Err(RuntimeError::Aborted),
                Some(Err(e)) => return Err(RuntimeError::Provider(e)),
            }
        }
        Ok(self.outcome)
    }

    async fn handle(&mut self, event: StreamEvent) -> Result<(), RuntimeError> {
        match event {
            StreamEvent::Start => {}
            StreamEvent::StartStep => {
                self.step_snapshot = self.ctx.snapshot.track().await;
                let snapshot = self.step_snapshot.clone();
                let _ = self.push(PartKind::StepStart { snapshot }).await?;
            }

            StreamEvent::TextStart { id } => {
                let _ = self.block(id, false).await?;
            }
            StreamEvent::TextDelta { id, delta } => {
                let index = self.block(id, false).await?;
                self.append(index, delta).await?;
            }
            StreamEvent::TextEnd { id } => {
                let index = self.texts.remove(&id);
                self.end_block(index).await?;
            }
            StreamEvent::ReasoningStart { id } => {
                let _ = self.block(id, true).await?;
            }
            StreamEvent::ReasoningDelta { id, delta } => {
                let index = self.block(id, true).await?;
                self.append(index, delta).await?;
            }
            StreamEvent::ReasoningEnd { id } => {
                let index = self.reasoning.remove(&id);
                self.end_block(index).await?;
            }

            StreamEvent::ToolInputStart { call_id, tool_name } => {
                let index = self
                    .push(PartKind::Tool {
                        call_id: call_id.clone(),
                        tool: tool_name,
                        state: ToolState::Pending { raw: String::new() },
                    })
                    .await?;
                let _ = self.calls.insert(call_id, index);
            }
            StreamEvent::ToolInputDelta { call_id, delta } => {
                if let Some(&index) = self.calls.get(&call_id) {
                    if let Some(ToolState::Pending { raw }) = self.turn.parts[index].tool_state_mut() {
                        raw.push_str(&delta);
                    }
                    self.ctx.recorder.part(&self.turn.parts[index], Some(delta)).await?;
                }
            }
            StreamEvent::ToolCall {
                call_id,
                tool_name,
                input,
            } => {
                let index = match self.calls.get(&call_id) {
                    Some(&index) => index,
                    None => {
                        let index = self
                            .push(PartKind::Tool {
                                call_id: call_id.clone(),
                                tool: tool_name.clone(),
                                state: ToolState::Pending {
                                    raw: input.to_string(),
                                },
                            })
                            .await?;
                        let _ = self.calls.insert(call_id.clone(), index);
                        index
                    }
                };
                if let Some(state) = self.turn.parts[index].tool_state_mut() {
                    *state = ToolState::Running {
                        input: input.clone(),
                        start: now_ms(),
                    };
                }
                self.ctx.recorder.part(&self.turn.parts[index], None).await?;
                self.run_tool(index, call_id, tool_name, input).await?;
            }
            StreamEvent::ToolResult {
                call_id,
                output,
                title,
            } => {
                if let Some(index) = self.calls.remove(&call_id) {
                    let output = ToolOutput {
                        title,
                        output,
                        metadata: Value::Null,
                    };
                    self.settle(index, Ok(output)).await?;
                }
            }
            StreamEvent::ToolError { call_id, error } => {
                if let Some(index) = self.calls.remove(&call_id) {
                    self.settle(index, Err(error)).await?;
                }
            }

            StreamEvent::FinishStep {
                usage,
                finish_reason,
            } => {
                let cost = self.ctx.model.cost_of(&usage);
                self.turn.message.tokens.accumulate(&usage);
                self.turn.message.cost += cost;
                self.turn.message.finish = Some(finish_reason.as_str().to_owned());

                let snapshot = self.ctx.snapshot.track().await;
                let _ = self
                    .push(PartKind::StepFinish {
                        reason: finish_reason.as_str().to_owned(),
                        tokens: usage,
                        cost,
                        snapshot,
                    })
                    .await?;
                if let Some(hash) = self.step_snapshot.take() {
                    let patch = self.ctx.snapshot.patch(&hash).await;
                    if !patch.files.is_empty() {
                        let _ = self.push(PartKind::Patch(patch)).await?;
                    }
                }
                self.ctx
                    .recorder
                    .message(Message::Assistant(self.turn.message.clone()))
                    .await?;
                let _ = self.ctx.recorder.bus.publish(BusEvent::SessionTokens {
                    session_id: self.turn.message.session_id.clone(),
                    tokens: usage,
                });
                self.outcome.finish = Some(finish_reason);
            }
            StreamEvent::Finish { finish_reason } => {
                self.turn.message.finish = Some(finish_reason.as_str().to_owned());
                self.outcome.finish = Some(finish_reason);
            }
        }
        Ok(())
    }

    async fn push(&mut self, kind: PartKind) -> Result<usize, RuntimeError> {
        let part = Part::new(&self.turn.message.session_id, &self.turn.message.id, kind);
        self.ctx.recorder.part(&part, None).await?;
        self.turn.parts.push(part);
        Ok(self.turn.parts.len() - 1)
    }

    /// Index of the text or reasoning part for block `id`, created on first use.
    async fn block(&mut self, id: String, reasoning: bool) -> Result<usize, RuntimeError> {
        let open = if reasoning { &self.reasoning } else { &self.texts };
        if let Some(&index) = open.get(&id) {
            return Ok(index);
        }
        let time = Some(SpanTime {
            start: now_ms(),
            end: None,
        });
        let kind = if reasoning {
            PartKind::Reasoning {
                text: String::new(),
                time,
            }
        } else {
            PartKind::Text {
                text: String::new(),
                time,
                synthetic: false,
            }
        };
        let index = self.push(kind).await?;
        let open = if reasoning { &mut self.reasoning } else { &mut self.texts };
        let _ = open.insert(id, index);
        Ok(index)
    }

    async fn append(&mut self, index: usize, delta: String) -> Result<(), RuntimeError> {
        if let PartKind::Text { text, .. } | PartKind::Reasoning { text, .. } =
            &mut self.turn.parts[index].kind
        {
            text.push_str(&delta);
        }
        self.ctx.recorder.part(&self.turn.parts[index], Some(delta)).await
    }

    async fn end_block(&mut self, index: Option<usize>) -> Result<(), RuntimeError> {
        let Some(index) = index else {
            return Ok(());
        };
        if let PartKind::Text { time: Some(time), .. } | PartKind::Reasoning { time: Some(time), .. } =
            &mut self.turn.parts[index].kind
        {
            time.end = Some(now_ms());
        }
        self.ctx.recorder.part(&self.turn.parts[index], None).await
    }

    async fn settle(&mut self, index: usize, result: Result<ToolOutput, String>) -> Result<(), RuntimeError> {
        if settle_tool(&mut self.turn.parts[index], result, now_ms()) {
            self.ctx.recorder.part(&self.turn.parts[index], None).await?;
        }
        Ok(())
    }

    async fn run_tool(
        &mut self,
        index: usize,
        call_id: String,
        tool: String,
        input: Value,
    ) -> Result<(), RuntimeError> {
        let threshold = self.ctx.doom_loop_threshold;
        if is_doom_loop(&self.turn.parts, threshold) {
            warn!(tool = %tool, call_id = %call_id, threshold, "repeated identical tool calls");
            let request = PermissionRequest {
                id: PermissionId::new(),
                kind: "doom_loop".into(),
                session_id: self.turn.message.session_id.clone(),
                message_id: self.turn.message.id.clone(),
                call_id: call_id.clone(),
                tool: tool.clone(),
                title: format!("`{tool}` was called {threshold} times in a row with the same arguments"),
                metadata: json!({ "input": input }),
            };
            if let Err(e) = self.ctx.approval.ask(request, self.ctx.cancel).await {
                return self.tool_failed(index, &call_id, e).await;
            }
        }

        let request = ToolCallRequest {
            session_id: self.turn.message.session_id.clone(),
            message_id: self.turn.message.id.clone(),
            call_id: call_id.clone(),
            tool,
            args: input,
            agent: self.turn.message.agent.clone(),
        };
        match self.ctx.executor.execute(&request, self.ctx.tools, self.ctx.cancel).await {
            Ok(output) => {
                let _ = self.calls.remove(&call_id);
                self.settle(index, Ok(output)).await
            }
            Err(e) => self.tool_failed(index, &call_id, e).await,
        }
    }

    /// Record a tool failure. Rejections block the turn; an abort ends it;
    /// anything else goes back to the model as the tool's error text.
    async fn tool_failed(&mut self, index: usize, call_id: &str, error: ToolError) -> Result<(), RuntimeError> {
        let _ = self.calls.remove(call_id);
        self.settle(index, Err(error.to_string())).await?;
        match RuntimeError::from(error) {
            RuntimeError::Aborted => Err(RuntimeError::Aborted),
            RuntimeError::PermissionRejected { message } => {
                warn!(call_id, %message, "tool call rejected, blocking the turn");
                self.outcome.blocked = true;
                Ok(())
            }
            other => {
                debug!(call_id, category = other.category(), error = %other, "tool error returned to the model");
                Ok(())
            }
        }
    }
}
