//! Background task types.

use helm_core::ids::{SessionId, TaskId};
use serde::{Deserialize, Serialize};

/// Lifecycle of a background task.
///
/// `queued → running → completed | failed | cancelled`. A queued task may be
/// cancelled before it starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for a slot.
    Queued,
    /// Executing.
    Running,
    /// Finished with a result.
    Completed,
    /// Finished with an error, or interrupted by a restart.
    Failed,
    /// Stopped by request or by its token budget.
    Cancelled,
}

impl TaskStatus {
    /// Column value.
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a column value.
    #[must_use]
    pub fn from_sql(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A persisted background task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundTask {
    /// Task ID.
    pub id: TaskId,
    /// Session that spawned the task.
    pub parent_session_id: SessionId,
    /// Dedicated session, assigned when the task starts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Agent that runs the prompt.
    pub agent: String,
    /// Prompt text.
    pub prompt: String,
    /// Short description for listings.
    pub description: String,
    /// Higher runs first.
    pub priority: i64,
    /// Token budget; exceeding it cancels the task.
    pub token_budget: u64,
    /// Tokens consumed so far.
    pub tokens_used: u64,
    /// Status.
    pub status: TaskStatus,
    /// Final text of a completed task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Failure or cancellation reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Enqueue time, Unix ms.
    pub created_at: i64,
    /// Start time, Unix ms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    /// Terminal transition time, Unix ms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
}

/// Parameters for enqueueing a task.
#[derive(Clone, Debug)]
pub struct NewTask {
    /// Session that spawns the task.
    pub parent_session_id: SessionId,
    /// Agent that runs the prompt.
    pub agent: String,
    /// Prompt text.
    pub prompt: String,
    /// Short description.
    pub description: String,
    /// Higher runs first.
    pub priority: i64,
    /// Token budget.
    pub token_budget: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_sql() {
        for status in [
            TaskStatus::Queued,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::from_sql(status.as_sql()), Some(status));
        }
        assert_eq!(TaskStatus::from_sql("paused"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }
}
