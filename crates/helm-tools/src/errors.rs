//! Tool error types.
//!
//! Most variants are fed back to the model as the tool part's error text and
//! the conversation continues. [`ToolError::Rejected`] and
//! [`ToolError::Cancelled`] also end the turn.

use thiserror::Error;

/// Errors from resolving or executing a tool call.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool with this ID is registered.
    #[error("unknown tool '{tool}'")]
    NotFound {
        /// Requested tool.
        tool: String,
    },

    /// The tool exists but is not visible to this turn.
    #[error("tool '{tool}' is not enabled for this session. {guidance}")]
    Unavailable {
        /// Requested tool.
        tool: String,
        /// How to make it available.
        guidance: String,
    },

    /// A pre-tool hook vetoed the call.
    #[error("blocked: {reason}")]
    Blocked {
        /// Veto reason.
        reason: String,
    },

    /// An approval request was rejected.
    #[error("{message}")]
    Rejected {
        /// Rejection text fed back to the model.
        message: String,
    },

    /// The turn was aborted while the tool was pending or running.
    #[error("aborted")]
    Cancelled,

    /// Arguments failed validation.
    #[error("invalid arguments: {message}")]
    InvalidArguments {
        /// What was wrong.
        message: String,
    },

    /// The tool ran and failed.
    #[error("{message}")]
    Execution {
        /// Failure text.
        message: String,
    },

    /// A tool rule is not a valid wildcard.
    #[error("invalid tool pattern '{pattern}': {message}")]
    InvalidPattern {
        /// Offending pattern.
        pattern: String,
        /// Parser message.
        message: String,
    },
}

impl ToolError {
    /// Whether the error ends the turn instead of being fed back to the model.
    #[must_use]
    pub fn stops_turn(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::Cancelled)
    }
}
