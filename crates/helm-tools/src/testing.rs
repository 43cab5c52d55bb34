//! Tools for tests.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::errors::ToolError;
use crate::traits::{Tool, ToolContext, ToolOutput};

/// Returns its arguments as JSON text.
pub struct EchoTool {
    id: String,
    deferred: bool,
}

impl EchoTool {
    /// Immediate echo tool.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            deferred: false,
        }
    }

    /// Deferred echo tool.
    #[must_use]
    pub fn deferred(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            deferred: true,
        }
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn id(&self) -> &str {
        &self.id
    }
    fn description(&self) -> &str {
        "Echo the arguments back."
    }
    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }
    fn deferred(&self) -> bool {
        self.deferred
    }
    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::new(self.id.clone(), args.to_string()))
    }
}

/// Runs until its cancellation token fires.
pub struct SlowTool {
    id: String,
}

impl SlowTool {
    /// Create a slow tool.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn id(&self) -> &str {
        &self.id
    }
    fn description(&self) -> &str {
        "Never finishes on its own."
    }
    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        ctx.cancel.cancelled().await;
        Err(ToolError::Cancelled)
    }
}

/// Always fails with the configured message.
pub struct FailingTool {
    id: String,
    message: String,
}

impl FailingTool {
    /// Create a failing tool.
    #[must_use]
    pub fn new(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn id(&self) -> &str {
        &self.id
    }
    fn description(&self) -> &str {
        "Always fails."
    }
    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        Err(ToolError::Execution {
            message: self.message.clone(),
        })
    }
}
