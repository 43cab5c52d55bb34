//! The [`Tool`] trait and its execution context.

use async_trait::async_trait;
use helm_core::ids::{MessageId, SessionId};
use helm_llm::ToolDefinition;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::errors::ToolError;

/// Context passed to every tool invocation.
#[derive(Clone, Debug)]
pub struct ToolContext {
    /// Session invoking the tool.
    pub session_id: SessionId,
    /// Assistant message that issued the call.
    pub message_id: MessageId,
    /// Call ID.
    pub call_id: String,
    /// Agent running the turn.
    pub agent: String,
    /// Fires when the turn is aborted.
    pub cancel: CancellationToken,
}

/// What a tool returns.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Short display title.
    pub title: String,
    /// Text fed back to the model.
    pub output: String,
    /// Tool-specific metadata.
    #[serde(default)]
    pub metadata: Value,
}

impl ToolOutput {
    /// Output with a title and no metadata.
    #[must_use]
    pub fn new(title: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            output: output.into(),
            metadata: Value::Null,
        }
    }
}

/// A callable tool.
///
/// Tools discovered at runtime (for example from a plugin host) implement
/// the same trait and register into the same catalog.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool ID, the exact name the model uses.
    fn id(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema of the arguments.
    fn parameters(&self) -> Value;

    /// Whether the tool stays hidden until enabled for a session.
    fn deferred(&self) -> bool {
        false
    }

    /// Run the tool. Long-running tools should watch `ctx.cancel`.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError>;

    /// Definition advertised to the model.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.id().to_owned(),
            description: self.description().to_owned(),
            parameters: self.parameters(),
        }
    }
}
