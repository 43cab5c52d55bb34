//! Tools that let the model spawn and collect background agents.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use helm_core::ids::TaskId;
use helm_tools::{Tool, ToolContext, ToolError, ToolOutput};
use serde_json::{Value, json};

use super::manager::{BackgroundAgentManager, SpawnRequest};
use crate::agent::AgentMode;
use crate::errors::RuntimeError;

/// ID of the spawn tool.
pub const BACKGROUND_AGENT_TOOL: &str = "background_agent";
/// ID of the result tool.
pub const BACKGROUND_RESULT_TOOL: &str = "background_result";

const DEFAULT_WAIT_MS: u64 = 60_000;

fn upgrade(manager: &Weak<BackgroundAgentManager>) -> Result<Arc<BackgroundAgentManager>, ToolError> {
    manager.upgrade().ok_or_else(|| ToolError::Execution {
        message: "background agents are shut down".into(),
    })
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args[key]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidArguments {
            message: format!("{key} is required"),
        })
}

/// `background_agent`: queue a prompt for another agent.
pub struct BackgroundAgentTool {
    manager: Weak<BackgroundAgentManager>,
}

impl BackgroundAgentTool {
    /// Create the tool.
    #[must_use]
    pub fn new(manager: Weak<BackgroundAgentManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for BackgroundAgentTool {
    fn id(&self) -> &str {
        BACKGROUND_AGENT_TOOL
    }

    fn description(&self) -> &str {
        "Start an agent in the background on a self-contained task. Returns a task ID; \
         collect the result later with background_result."
    }

    fn parameters(&self) -> Value {
        let agents: Vec<String> = self
            .manager
            .upgrade()
            .map(|m| {
                m.orchestrator()
                    .agents()
                    .list()
                    .into_iter()
                    .filter(|a| a.mode != AgentMode::Primary)
                    .map(|a| a.name)
                    .collect()
            })
            .unwrap_or_default();
        json!({
            "type": "object",
            "required": ["agent", "prompt"],
            "properties": {
                "agent": {"type": "string", "enum": agents, "description": "Agent to run"},
                "prompt": {"type": "string", "description": "Complete instructions for the task"},
                "description": {"type": "string", "description": "Short label for the task"},
                "token_budget": {"type": "integer", "minimum": 1, "description": "Maximum tokens the task may use"},
                "priority": {"type": "integer", "description": "Higher runs first"}
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let manager = upgrade(&self.manager)?;
        let mut request = SpawnRequest::new(
            ctx.session_id.clone(),
            required_str(&args, "agent")?,
            required_str(&args, "prompt")?,
        );
        if let Some(description) = args["description"].as_str() {
            request = request.with_description(description);
        }
        if let Some(budget) = args["token_budget"].as_u64() {
            request = request.with_token_budget(budget);
        }
        if let Some(priority) = args["priority"].as_i64() {
            request = request.with_priority(priority);
        }

        let task = manager.spawn(request).map_err(|e| match e {
            RuntimeError::AgentNotFound(_) | RuntimeError::AgentNotSpawnable(_) => ToolError::InvalidArguments {
                message: e.to_string(),
            },
            e => ToolError::Execution { message: e.to_string() },
        })?;
        let mut output = ToolOutput::new(
            task.description.clone(),
            format!(
                "Started background task {} ({}). Call {BACKGROUND_RESULT_TOOL} with this task_id to collect the result.",
                task.id, task.status
            ),
        );
        output.metadata = json!({"taskId": task.id.to_string(), "status": task.status});
        Ok(output)
    }
}

/// `background_result`: wait for a background task and return its result.
pub struct BackgroundResultTool {
    manager: Weak<BackgroundAgentManager>,
}

impl BackgroundResultTool {
    /// Create the tool.
    #[must_use]
    pub fn new(manager: Weak<BackgroundAgentManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for BackgroundResultTool {
    fn id(&self) -> &str {
        BACKGROUND_RESULT_TOOL
    }

    fn description(&self) -> &str {
        "Wait for a background task started with background_agent and return its final answer."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "required": ["task_id"],
            "properties": {
                "task_id": {"type": "string", "description": "ID returned by background_agent"},
                "timeout_ms": {"type": "integer", "minimum": 1, "description": "How long to wait (default 60000)"}
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let manager = upgrade(&self.manager)?;
        let task_id = TaskId::from(required_str(&args, "task_id")?);
        let timeout_ms = args["timeout_ms"].as_u64().unwrap_or(DEFAULT_WAIT_MS);

        let result = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return Err(ToolError::Cancelled),
            result = manager.await_result(&task_id, timeout_ms) => result,
        };
        match result {
            Ok(text) => Ok(ToolOutput::new(format!("task {task_id}"), text)),
            Err(RuntimeError::Timeout { ms }) => Ok(ToolOutput::new(
                format!("task {task_id}"),
                format!("Task {task_id} is still running after {ms}ms. Call {BACKGROUND_RESULT_TOOL} again later."),
            )),
            Err(RuntimeError::Task(e)) => Err(ToolError::InvalidArguments { message: e.to_string() }),
            Err(e) => Err(ToolError::Execution { message: e.to_string() }),
        }
    }
}
