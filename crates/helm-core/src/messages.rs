//! Conversation data model.
//!
//! A session owns an ordered list of [`Message`]s; each message owns ordered
//! [`Part`]s. Every record is keyed by a branded ID so persistence can upsert
//! it idempotently. Assistant messages double as compaction checkpoints when
//! their `summary` flag is set.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{MessageId, PartId, SessionId};

// ─────────────────────────────────────────────────────────────────────────────
// Tokens
// ─────────────────────────────────────────────────────────────────────────────

/// Token counts reported for one model step (or accumulated over several).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Prompt tokens billed at the full rate.
    #[serde(default)]
    pub input: u64,
    /// Completion tokens.
    #[serde(default)]
    pub output: u64,
    /// Reasoning tokens, when the provider reports them separately.
    #[serde(default)]
    pub reasoning: u64,
    /// Prompt tokens served from cache.
    #[serde(default)]
    pub cache_read: u64,
    /// Prompt tokens written to cache.
    #[serde(default)]
    pub cache_write: u64,
}

impl TokenUsage {
    /// Sum of every counter.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input + self.output + self.reasoning + self.cache_read + self.cache_write
    }

    /// Add another usage record into this one.
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input += other.input;
        self.output += other.output;
        self.reasoning += other.reasoning;
        self.cache_read += other.cache_read;
        self.cache_write += other.cache_write;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

/// Provider/model pair a message was produced with.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRef {
    /// Provider identifier (e.g. `anthropic`).
    pub provider_id: String,
    /// Model identifier within the provider.
    pub model_id: String,
}

impl ModelRef {
    /// Build a model reference.
    #[must_use]
    pub fn new(provider_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
        }
    }

    /// Parse `provider/model`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let (provider, model) = value.split_once('/')?;
        if provider.is_empty() || model.is_empty() {
            return None;
        }
        Some(Self::new(provider, model))
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider_id, self.model_id)
    }
}

/// Creation and completion times in Unix milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTime {
    /// When the message was created.
    pub created: i64,
    /// When the message reached a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<i64>,
}

/// Terminal error recorded on an assistant message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum MessageError {
    /// The run was cancelled.
    Aborted {
        /// Human-readable reason.
        message: String,
    },
    /// The model stopped because it hit its output limit.
    OutputLength,
    /// The provider rejected our credentials.
    ProviderAuth {
        /// Provider that rejected the request.
        provider_id: String,
        /// Provider message.
        message: String,
    },
    /// The conversation no longer fits even after compaction.
    ContextOverflow {
        /// Guidance for the caller.
        message: String,
    },
    /// Anything else.
    Unknown {
        /// Error text.
        message: String,
    },
}

impl MessageError {
    /// Display text for the error.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Aborted { message }
            | Self::ProviderAuth { message, .. }
            | Self::ContextOverflow { message }
            | Self::Unknown { message } => message,
            Self::OutputLength => "output length exceeded",
        }
    }
}

/// A message authored by the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessage {
    /// Message ID.
    pub id: MessageId,
    /// Owning session.
    pub session_id: SessionId,
    /// Timestamps.
    pub time: MessageTime,
    /// Agent that should answer.
    pub agent: String,
    /// Model that should answer.
    pub model: ModelRef,
    /// Per-request tool overrides (`tool id or wildcard → enabled`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tools: BTreeMap<String, bool>,
}

/// A message produced by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMessage {
    /// Message ID.
    pub id: MessageId,
    /// Owning session.
    pub session_id: SessionId,
    /// The user message this answers.
    pub parent_id: MessageId,
    /// Timestamps; `completed` is set exactly once.
    pub time: MessageTime,
    /// Agent that produced it.
    pub agent: String,
    /// Model that produced it.
    pub model: ModelRef,
    /// Running token totals across steps.
    #[serde(default)]
    pub tokens: TokenUsage,
    /// Running cost in USD.
    #[serde(default)]
    pub cost: f64,
    /// Terminal error, if the turn did not finish cleanly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<MessageError>,
    /// Marks a compaction checkpoint.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub summary: bool,
    /// Set when a tool call was rejected by an approval decision.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub blocked: bool,
    /// Last finish reason reported by the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish: Option<String>,
}

impl AssistantMessage {
    /// Set the completion timestamp if it is not already set.
    ///
    /// Returns `true` when this call set it.
    pub fn complete(&mut self, now: i64) -> bool {
        if self.time.completed.is_some() {
            return false;
        }
        self.time.completed = Some(now);
        true
    }

    /// Whether the message reached a terminal state.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.time.completed.is_some()
    }
}

/// A user or assistant message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    /// Caller input.
    User(UserMessage),
    /// Model output.
    Assistant(AssistantMessage),
}

impl Message {
    /// Message ID.
    #[must_use]
    pub fn id(&self) -> &MessageId {
        match self {
            Self::User(m) => &m.id,
            Self::Assistant(m) => &m.id,
        }
    }

    /// Owning session.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::User(m) => &m.session_id,
            Self::Assistant(m) => &m.session_id,
        }
    }

    /// Borrow as an assistant message.
    #[must_use]
    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Self::Assistant(m) => Some(m),
            Self::User(_) => None,
        }
    }

    /// Borrow as a user message.
    #[must_use]
    pub fn as_user(&self) -> Option<&UserMessage> {
        match self {
            Self::User(m) => Some(m),
            Self::Assistant(_) => None,
        }
    }

    /// Whether this is a compaction checkpoint.
    #[must_use]
    pub fn is_summary(&self) -> bool {
        self.as_assistant().is_some_and(|m| m.summary)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parts
// ─────────────────────────────────────────────────────────────────────────────

/// Start/end times of a streamed span.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanTime {
    /// Start, Unix ms.
    pub start: i64,
    /// End, Unix ms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

/// Times of a finished tool call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolTime {
    /// Execution start, Unix ms.
    pub start: i64,
    /// Execution end, Unix ms.
    pub end: i64,
    /// When pruning hid this output from the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compacted: Option<i64>,
}

/// Lifecycle of a tool part: `pending → running → completed | error`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolState {
    /// The model started streaming the call's input.
    Pending {
        /// Raw input streamed so far.
        #[serde(default)]
        raw: String,
    },
    /// Input is complete and the tool is executing.
    Running {
        /// Parsed arguments.
        input: Value,
        /// Execution start, Unix ms.
        start: i64,
    },
    /// The tool returned output.
    Completed {
        /// Parsed arguments.
        input: Value,
        /// Output fed back to the model.
        output: String,
        /// Short title for display.
        title: String,
        /// Tool-specific metadata.
        #[serde(default)]
        metadata: Value,
        /// Execution times.
        time: ToolTime,
    },
    /// The tool failed, was vetoed, or was aborted.
    Error {
        /// Parsed arguments.
        input: Value,
        /// Error text fed back to the model.
        error: String,
        /// Execution times.
        time: ToolTime,
    },
}

impl ToolState {
    /// Arguments, once known.
    #[must_use]
    pub fn input(&self) -> Option<&Value> {
        match self {
            Self::Pending { .. } => None,
            Self::Running { input, .. }
            | Self::Completed { input, .. }
            | Self::Error { input, .. } => Some(input),
        }
    }

    /// Whether the call reached `completed` or `error`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Error { .. })
    }

    /// Lowercase status label.
    #[must_use]
    pub fn status(&self) -> &'static str {
        match self {
            Self::Pending { .. } => "pending",
            Self::Running { .. } => "running",
            Self::Completed { .. } => "completed",
            Self::Error { .. } => "error",
        }
    }

    /// Execution start time, once running.
    #[must_use]
    pub fn start(&self) -> Option<i64> {
        match self {
            Self::Pending { .. } => None,
            Self::Running { start, .. } => Some(*start),
            Self::Completed { time, .. } | Self::Error { time, .. } => Some(time.start),
        }
    }
}

/// Snapshot diff recorded at the end of a step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    /// Snapshot hash the diff was taken against.
    pub hash: String,
    /// Files changed since that snapshot.
    pub files: Vec<String>,
}

/// The typed payload of a [`Part`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PartKind {
    /// Visible model text.
    Text {
        /// Accumulated text.
        text: String,
        /// Streaming span.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time: Option<SpanTime>,
        /// Inserted by the runtime rather than the model or caller.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        synthetic: bool,
    },
    /// Model reasoning.
    Reasoning {
        /// Accumulated reasoning text.
        text: String,
        /// Streaming span.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time: Option<SpanTime>,
    },
    /// A tool invocation.
    Tool {
        /// Call ID assigned by the model stream.
        #[serde(rename = "callID")]
        call_id: String,
        /// Tool ID.
        tool: String,
        /// Lifecycle state.
        state: ToolState,
    },
    /// A failed attempt that will be retried.
    Retry {
        /// 1-based attempt number.
        attempt: u32,
        /// Error that caused the retry.
        error: String,
        /// When the failure was recorded.
        created: i64,
    },
    /// Beginning of a model step.
    StepStart {
        /// Snapshot hash taken when the step started.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<String>,
    },
    /// End of a model step.
    StepFinish {
        /// Finish reason reported for the step.
        reason: String,
        /// Step usage.
        tokens: TokenUsage,
        /// Step cost in USD.
        cost: f64,
        /// Snapshot hash taken when the step finished.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<String>,
    },
    /// Files changed during a step.
    Patch(Patch),
}

/// An ordered child of a message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Part ID; ascending within the message.
    pub id: PartId,
    /// Owning session.
    pub session_id: SessionId,
    /// Owning message.
    pub message_id: MessageId,
    /// Typed payload.
    #[serde(flatten)]
    pub kind: PartKind,
}

impl Part {
    /// Create a part with a fresh ID.
    #[must_use]
    pub fn new(session_id: &SessionId, message_id: &MessageId, kind: PartKind) -> Self {
        Self {
            id: PartId::new(),
            session_id: session_id.clone(),
            message_id: message_id.clone(),
            kind,
        }
    }

    /// Convenience constructor for a non-synthetic text part.
    #[must_use]
    pub fn text(session_id: &SessionId, message_id: &MessageId, text: impl Into<String>) -> Self {
        Self::new(
            session_id,
            message_id,
            PartKind::Text {
                text: text.into(),
                time: None,
                synthetic: false,
            },
        )
    }

    /// `(call id, tool id, state)` if this is a tool part.
    #[must_use]
    pub fn as_tool(&self) -> Option<(&str, &str, &ToolState)> {
        match &self.kind {
            PartKind::Tool {
                call_id,
                tool,
                state,
            } => Some((call_id, tool, state)),
            _ => None,
        }
    }

    /// Mutable tool state if this is a tool part.
    pub fn tool_state_mut(&mut self) -> Option<&mut ToolState> {
        match &mut self.kind {
            PartKind::Tool { state, .. } => Some(state),
            _ => None,
        }
    }

    /// Text content of a text part.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match &self.kind {
            PartKind::Text { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// A message together with its parts, in part order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageWithParts {
    /// The message.
    pub info: Message,
    /// Its parts.
    pub parts: Vec<Part>,
}

impl MessageWithParts {
    /// Concatenated text parts of the message.
    #[must_use]
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Text of the last text part, trimmed.
    #[must_use]
    pub fn last_text(&self) -> Option<&str> {
        self.parts
            .iter()
            .rev()
            .filter_map(Part::as_text)
            .map(str::trim)
            .find(|t| !t.is_empty())
    }
}
