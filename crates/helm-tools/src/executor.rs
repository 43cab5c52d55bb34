//! Tool execution pipeline.
//!
//! lookup → visibility check → pre-tool hooks → execute (cancellable) →
//! post-tool hooks. A failure at any stage becomes a [`ToolError`] that the
//! caller records on the tool part.

use std::sync::Arc;

use helm_core::ids::{MessageId, SessionId};
use helm_hooks::engine::apply_modifications;
use helm_hooks::{HookContext, HookEngine};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::errors::ToolError;
use crate::registry::ToolRegistry;
use crate::resolver::ResolvedTools;
use crate::traits::{ToolContext, ToolOutput};

/// One tool call to run.
#[derive(Clone, Debug)]
pub struct ToolCallRequest {
    /// Session.
    pub session_id: SessionId,
    /// Assistant message that issued the call.
    pub message_id: MessageId,
    /// Call ID.
    pub call_id: String,
    /// Tool ID.
    pub tool: String,
    /// Arguments from the model.
    pub args: Value,
    /// Agent running the turn.
    pub agent: String,
}

/// Runs tool calls through the hook pipeline.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    hooks: Arc<HookEngine>,
    discovery_tool: String,
}

impl ToolExecutor {
    /// Create an executor.
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        hooks: Arc<HookEngine>,
        discovery_tool: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            hooks,
            discovery_tool: discovery_tool.into(),
        }
    }

    /// Run `call` if it is visible in `visible`.
    #[instrument(skip_all, fields(session_id = %call.session_id, tool = %call.tool, call_id = %call.call_id))]
    pub async fn execute(
        &self,
        call: &ToolCallRequest,
        visible: &ResolvedTools,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self.registry.get(&call.tool).ok_or_else(|| ToolError::NotFound {
            tool: call.tool.clone(),
        })?;
        if !visible.contains(&call.tool) {
            let guidance = if tool.deferred() {
                format!(
                    "Call `{}` to find and enable it, then retry.",
                    self.discovery_tool
                )
            } else {
                "It is not available to this agent.".to_owned()
            };
            return Err(ToolError::Unavailable {
                tool: call.tool.clone(),
                guidance,
            });
        }

        let pre = self
            .hooks
            .execute(&HookContext::PreToolUse {
                session_id: call.session_id.clone(),
                tool: call.tool.clone(),
                call_id: call.call_id.clone(),
                args: call.args.clone(),
            })
            .await;
        if pre.is_blocked() {
            return Err(ToolError::Blocked {
                reason: pre.reason.unwrap_or_else(|| "blocked by hook".into()),
            });
        }
        let args = apply_modifications(call.args.clone(), &pre);

        let ctx = ToolContext {
            session_id: call.session_id.clone(),
            message_id: call.message_id.clone(),
            call_id: call.call_id.clone(),
            agent: call.agent.clone(),
            cancel: cancel.child_token(),
        };
        debug!("executing tool");
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ToolError::Cancelled),
            result = tool.execute(args.clone(), &ctx) => result,
        };

        if matches!(outcome, Err(ToolError::Cancelled)) {
            return outcome;
        }
        if let Err(e) = &outcome {
            warn!(error = %e, "tool failed");
        }
        let (output, is_error) = match &outcome {
            Ok(out) => (out.output.clone(), false),
            Err(e) => (e.to_string(), true),
        };
        let _ = self
            .hooks
            .execute(&HookContext::PostToolUse {
                session_id: call.session_id.clone(),
                tool: call.tool.clone(),
                call_id: call.call_id.clone(),
                args,
                output,
                is_error,
            })
            .await;
        outcome
    }

    /// The registry calls are looked up in.
    #[must_use]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }
}
