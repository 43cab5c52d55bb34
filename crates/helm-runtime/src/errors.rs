//! Runtime error types.

use helm_core::ids::TaskId;
use helm_core::messages::MessageError;
use helm_context::ContextError;
use helm_events::StoreError;
use helm_llm::ProviderError;
use helm_tasks::TaskError;
use helm_tools::ToolError;

/// Guidance attached to a context overflow that compaction could not fix.
pub const OVERFLOW_GUIDANCE: &str = "The conversation no longer fits the model's context window, \
even after compaction. Start a new session, or switch to a model with a larger context window.";

/// Errors that end a prompt or a background task.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A retryable provider error persisted through every retry.
    #[error("provider error after {attempts} attempts: {source}")]
    TransientProvider {
        /// Attempts made, including the first.
        attempts: u32,
        /// Last error.
        source: ProviderError,
    },

    /// The request does not fit the context window and recovery failed.
    #[error("context overflow: {message}")]
    ContextOverflow {
        /// What happened and what to do.
        message: String,
    },

    /// A tool call was rejected at an approval point.
    #[error("permission rejected: {message}")]
    PermissionRejected {
        /// Rejection text.
        message: String,
    },

    /// Cancelled by abort or timeout.
    #[error("aborted")]
    Aborted,

    /// The model called a tool that is not visible.
    #[error("tool `{tool}` is unavailable: {guidance}")]
    UnavailableTool {
        /// Tool ID.
        tool: String,
        /// How to make it available.
        guidance: String,
    },

    /// A background task used more tokens than its budget.
    #[error("token budget exceeded: {used} > {budget}")]
    BudgetExceeded {
        /// Tokens used.
        used: u64,
        /// Budget.
        budget: u64,
    },

    /// The model hit its output limit.
    #[error("model output limit reached")]
    OutputLength,

    /// Non-retryable provider error.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Message persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Task queue failure.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// Compaction or pruning failure.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// Any other tool failure (for example a malformed rule pattern).
    #[error(transparent)]
    Tool(ToolError),

    /// A background task ended in `failed`.
    #[error("background task {task_id} failed: {message}")]
    TaskFailed {
        /// Task.
        task_id: TaskId,
        /// Failure reason.
        message: String,
    },

    /// A background task ended in `cancelled`.
    #[error("background task {task_id} was cancelled: {reason}")]
    TaskCancelled {
        /// Task.
        task_id: TaskId,
        /// Cancellation reason.
        reason: String,
    },

    /// Unknown session.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Unknown agent.
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    /// The agent exists but may not run as a background task.
    #[error("agent `{0}` is interactive only and cannot run in the background")]
    AgentNotSpawnable(String),

    /// A wait timed out.
    #[error("timed out after {ms}ms")]
    Timeout {
        /// Timeout.
        ms: u64,
    },

    /// Unexpected state.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider(e) if e.is_retryable())
    }

    /// Whether the provider rejected the request as too long.
    #[must_use]
    pub fn is_context_overflow(&self) -> bool {
        match self {
            Self::ContextOverflow { .. } => true,
            Self::Provider(e) => e.is_context_overflow(),
            Self::Context(e) => e.is_context_overflow(),
            _ => false,
        }
    }

    /// Whether this ends a background task as `cancelled` rather than `failed`.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Aborted | Self::BudgetExceeded { .. })
    }

    /// Error category string for logs and events.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::TransientProvider { .. } => "transient_provider",
            Self::ContextOverflow { .. } => "context_overflow",
            Self::PermissionRejected { .. } => "permission_rejected",
            Self::Aborted => "aborted",
            Self::UnavailableTool { .. } => "unavailable_tool",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::OutputLength => "output_length",
            Self::Provider(_) => "provider",
            Self::Store(_) => "store",
            Self::Task(_) => "task",
            Self::Context(_) => "context",
            Self::Tool(_) => "tool",
            Self::TaskFailed { .. } => "task_failed",
            Self::TaskCancelled { .. } => "task_cancelled",
            Self::SessionNotFound(_) => "session_not_found",
            Self::AgentNotFound(_) => "agent_not_found",
            Self::AgentNotSpawnable(_) => "agent_not_spawnable",
            Self::Timeout { .. } => "timeout",
            Self::Internal(_) => "internal",
        }
    }

    /// The error as recorded on an assistant message.
    #[must_use]
    pub fn to_message_error(&self, provider_id: &str) -> MessageError {
        match self {
            Self::Aborted | Self::BudgetExceeded { .. } => MessageError::Aborted {
                message: self.to_string(),
            },
            Self::OutputLength => MessageError::OutputLength,
            Self::Provider(ProviderError::Auth { message }) => MessageError::ProviderAuth {
                provider_id: provider_id.to_owned(),
                message: message.clone(),
            },
            e if e.is_context_overflow() => MessageError::ContextOverflow {
                message: e.to_string(),
            },
            e => MessageError::Unknown {
                message: e.to_string(),
            },
        }
    }
}

impl From<ToolError> for RuntimeError {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::Cancelled => Self::Aborted,
            ToolError::Rejected { message } => Self::PermissionRejected { message },
            ToolError::Unavailable { tool, guidance } => Self::UnavailableTool { tool, guidance },
            other => Self::Tool(other),
        }
    }
}
