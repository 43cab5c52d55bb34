//! Core types for the hook system.

use helm_core::ids::SessionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Point in tool execution where a hook fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookType {
    /// Before a tool runs. Always blocking: it can veto or rewrite the call.
    PreToolUse,
    /// After a tool returned or failed.
    PostToolUse,
}

impl HookType {
    /// Whether handlers of this type always run inline.
    #[must_use]
    pub fn is_forced_blocking(self) -> bool {
        matches!(self, Self::PreToolUse)
    }
}

impl std::fmt::Display for HookType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PreToolUse => write!(f, "PreToolUse"),
            Self::PostToolUse => write!(f, "PostToolUse"),
        }
    }
}

/// What a hook wants to happen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookAction {
    /// Proceed unchanged.
    Continue,
    /// Veto the call.
    Block,
    /// Proceed with rewritten arguments.
    Modify,
}

/// How a hook runs relative to the call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookExecutionMode {
    /// Inline; the call waits for it.
    #[default]
    Blocking,
    /// Spawned; the call does not wait.
    Background,
}

/// Result returned by a hook handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookResult {
    /// Action to take.
    pub action: HookAction,
    /// Why the call was blocked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Argument fields to overwrite (for `Modify`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modifications: Option<Value>,
}

impl HookResult {
    /// Proceed unchanged.
    #[must_use]
    pub fn continue_() -> Self {
        Self {
            action: HookAction::Continue,
            reason: None,
            modifications: None,
        }
    }

    /// Veto with a reason.
    #[must_use]
    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            action: HookAction::Block,
            reason: Some(reason.into()),
            modifications: None,
        }
    }

    /// Overwrite argument fields.
    #[must_use]
    pub fn modify(modifications: Value) -> Self {
        Self {
            action: HookAction::Modify,
            reason: None,
            modifications: Some(modifications),
        }
    }

    /// Whether this result vetoes the call.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.action == HookAction::Block
    }
}

/// Data passed to a handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "hookType", rename_all = "camelCase")]
pub enum HookContext {
    /// Before a tool runs.
    #[serde(rename_all = "camelCase")]
    PreToolUse {
        /// Session.
        session_id: SessionId,
        /// Tool ID.
        tool: String,
        /// Call ID.
        call_id: String,
        /// Arguments the model supplied.
        args: Value,
    },
    /// After a tool finished.
    #[serde(rename_all = "camelCase")]
    PostToolUse {
        /// Session.
        session_id: SessionId,
        /// Tool ID.
        tool: String,
        /// Call ID.
        call_id: String,
        /// Arguments the tool ran with.
        args: Value,
        /// Output or error text.
        output: String,
        /// Whether the tool failed.
        is_error: bool,
    },
}

impl HookContext {
    /// The hook point of this context.
    #[must_use]
    pub fn hook_type(&self) -> HookType {
        match self {
            Self::PreToolUse { .. } => HookType::PreToolUse,
            Self::PostToolUse { .. } => HookType::PostToolUse,
        }
    }

    /// Tool ID.
    #[must_use]
    pub fn tool(&self) -> &str {
        match self {
            Self::PreToolUse { tool, .. } | Self::PostToolUse { tool, .. } => tool,
        }
    }
}
