//! Typed in-process event bus.
//!
//! Built on a tokio broadcast channel: `publish` never awaits, and a slow
//! subscriber lags (and skips events) instead of blocking publishers. Each
//! subscriber sees events in the order a single publisher sent them; no
//! ordering is promised across publishers.

use std::sync::atomic::{AtomicU64, Ordering};

use helm_core::ids::{MessageId, PermissionId, SessionId, TaskId};
use helm_core::messages::{Message, Part, TokenUsage};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Default broadcast channel capacity.
const DEFAULT_CAPACITY: usize = 1024;

/// An approval request raised by loop detection.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    /// Request ID.
    pub id: PermissionId,
    /// Kind of approval (e.g. `doom_loop`).
    pub kind: String,
    /// Session the call belongs to.
    pub session_id: SessionId,
    /// Assistant message that issued the call.
    pub message_id: MessageId,
    /// Tool call ID.
    pub call_id: String,
    /// Tool ID; `always` replies are remembered against it.
    pub tool: String,
    /// Display title.
    pub title: String,
    /// Call arguments.
    pub metadata: Value,
}

/// Every event the runtime publishes.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "properties")]
pub enum BusEvent {
    /// A prompt finished and the session lock was released.
    #[serde(rename = "session.idle")]
    SessionIdle {
        /// Session.
        session_id: SessionId,
    },
    /// A compaction checkpoint was written.
    #[serde(rename = "session.compacted")]
    SessionCompacted {
        /// Session.
        session_id: SessionId,
        /// The checkpoint message.
        message_id: MessageId,
    },
    /// A turn ended with an unrecoverable error.
    #[serde(rename = "session.error")]
    SessionError {
        /// Session.
        session_id: SessionId,
        /// Error text.
        error: String,
    },
    /// Token usage reported at the end of a model step.
    #[serde(rename = "session.tokens")]
    SessionTokens {
        /// Session.
        session_id: SessionId,
        /// Step usage.
        tokens: TokenUsage,
    },
    /// A message was created or changed.
    #[serde(rename = "message.updated")]
    MessageUpdated {
        /// The new message state.
        info: Message,
    },
    /// A part was created or changed.
    #[serde(rename = "message.part.updated")]
    PartUpdated {
        /// The new part state.
        part: Part,
        /// Text appended by this update, for streaming consumers.
        #[serde(skip_serializing_if = "Option::is_none")]
        delta: Option<String>,
    },
    /// A tool call is waiting for an approval decision.
    #[serde(rename = "permission.asked")]
    PermissionAsked(PermissionRequest),
    /// An approval decision was made.
    #[serde(rename = "permission.replied")]
    PermissionReplied {
        /// Session.
        session_id: SessionId,
        /// Request answered.
        permission_id: PermissionId,
        /// `once`, `always`, or `reject`.
        response: String,
    },
    /// A background task started running.
    #[serde(rename = "background.agent.started")]
    BackgroundStarted {
        /// Task.
        task_id: TaskId,
        /// Dedicated task session.
        session_id: SessionId,
    },
    /// A running background task consumed tokens.
    #[serde(rename = "background.agent.progress")]
    BackgroundProgress {
        /// Task.
        task_id: TaskId,
        /// Cumulative tokens used.
        tokens_used: u64,
        /// Task budget.
        token_budget: u64,
    },
    /// A background task produced its result.
    #[serde(rename = "background.agent.completed")]
    BackgroundCompleted {
        /// Task.
        task_id: TaskId,
        /// Final text.
        result: String,
    },
    /// A background task failed.
    #[serde(rename = "background.agent.failed")]
    BackgroundFailed {
        /// Task.
        task_id: TaskId,
        /// Failure reason.
        error: String,
    },
    /// A background task was cancelled by request or budget.
    #[serde(rename = "background.agent.cancelled")]
    BackgroundCancelled {
        /// Task.
        task_id: TaskId,
        /// Why it was cancelled.
        reason: String,
    },
}

impl BusEvent {
    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionIdle { .. } => "session.idle",
            Self::SessionCompacted { .. } => "session.compacted",
            Self::SessionError { .. } => "session.error",
            Self::SessionTokens { .. } => "session.tokens",
            Self::MessageUpdated { .. } => "message.updated",
            Self::PartUpdated { .. } => "message.part.updated",
            Self::PermissionAsked(_) => "permission.asked",
            Self::PermissionReplied { .. } => "permission.replied",
            Self::BackgroundStarted { .. } => "background.agent.started",
            Self::BackgroundProgress { .. } => "background.agent.progress",
            Self::BackgroundCompleted { .. } => "background.agent.completed",
            Self::BackgroundFailed { .. } => "background.agent.failed",
            Self::BackgroundCancelled { .. } => "background.agent.cancelled",
        }
    }

    /// Session the event concerns, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::SessionIdle { session_id }
            | Self::SessionCompacted { session_id, .. }
            | Self::SessionError { session_id, .. }
            | Self::SessionTokens { session_id, .. }
            | Self::PermissionReplied { session_id, .. }
            | Self::BackgroundStarted { session_id, .. } => Some(session_id),
            Self::MessageUpdated { info } => Some(info.session_id()),
            Self::PartUpdated { part, .. } => Some(&part.session_id),
            Self::PermissionAsked(request) => Some(&request.session_id),
            Self::BackgroundProgress { .. }
            | Self::BackgroundCompleted { .. }
            | Self::BackgroundFailed { .. }
            | Self::BackgroundCancelled { .. } => None,
        }
    }
}

/// Broadcast-based event bus.
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
    publish_count: AtomicU64,
}

impl EventBus {
    /// Create a bus with the default channel capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus with a custom channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            publish_count: AtomicU64::new(0),
        }
    }

    /// Publish to every current subscriber. Non-blocking.
    ///
    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, event: BusEvent) -> usize {
        let _ = self.publish_count.fetch_add(1, Ordering::Relaxed);
        self.tx.send(event).unwrap_or(0)
    }

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Total events published.
    pub fn publish_count(&self) -> u64 {
        self.publish_count.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle(id: &str) -> BusEvent {
        BusEvent::SessionIdle {
            session_id: SessionId::from(id),
        }
    }

    #[test]
    fn publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(idle("ses_1")), 0);
        assert_eq!(bus.publish_count(), 1);
    }

    #[tokio::test]
    async fn subscriber_sees_publish_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let _ = bus.publish(idle("ses_1"));
        let _ = bus.publish(idle("ses_2"));
        assert_eq!(rx.recv().await.unwrap().session_id().unwrap().as_str(), "ses_1");
        assert_eq!(rx.recv().await.unwrap().session_id().unwrap().as_str(), "ses_2");
    }

    #[test]
    fn wire_shape_uses_dotted_names() {
        let value = serde_json::to_value(idle("ses_1")).unwrap();
        assert_eq!(value["type"], "session.idle");
        assert_eq!(value["properties"]["session_id"], "ses_1");
        assert_eq!(idle("ses_1").name(), "session.idle");
    }

    #[test]
    fn background_events_have_no_session() {
        let event = BusEvent::BackgroundFailed {
            task_id: TaskId::from("tsk_1"),
            error: "boom".into(),
        };
        assert!(event.session_id().is_none());
        assert_eq!(event.name(), "background.agent.failed");
    }
}
