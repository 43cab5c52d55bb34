//! Streamed model events.
//!
//! A provider stream yields one step or more. Each step is bracketed by
//! [`StreamEvent::StartStep`] and [`StreamEvent::FinishStep`]; the whole
//! response ends with [`StreamEvent::Finish`]. Text and reasoning arrive as
//! start/delta/end triples keyed by a block ID. Tool calls arrive as
//! `ToolInputStart`, any number of `ToolInputDelta`s, then `ToolCall` with
//! the parsed input.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use helm_core::messages::TokenUsage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ProviderError, ProviderResult};

/// Boxed stream returned by [`Provider::stream`](crate::Provider::stream).
pub type StreamEventStream = Pin<Box<dyn Stream<Item = ProviderResult<StreamEvent>> + Send>>;

/// Why the model stopped a step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    /// Natural end of turn.
    Stop,
    /// Output limit reached.
    Length,
    /// The model wants tool results before continuing.
    ToolCalls,
    /// Output was filtered.
    ContentFilter,
    /// The provider reported an error finish.
    Error,
    /// Unrecognized reason.
    Unknown,
}

impl FinishReason {
    /// Wire label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolCalls => "tool-calls",
            Self::ContentFilter => "content-filter",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

/// One event of a model response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    /// The response began.
    Start,
    /// A model step began.
    StartStep,
    /// A text block opened.
    TextStart {
        /// Block ID.
        id: String,
    },
    /// Text appended to an open block.
    TextDelta {
        /// Block ID.
        id: String,
        /// Appended text.
        delta: String,
    },
    /// A text block closed.
    TextEnd {
        /// Block ID.
        id: String,
    },
    /// A reasoning block opened.
    ReasoningStart {
        /// Block ID.
        id: String,
    },
    /// Reasoning appended to an open block.
    ReasoningDelta {
        /// Block ID.
        id: String,
        /// Appended text.
        delta: String,
    },
    /// A reasoning block closed.
    ReasoningEnd {
        /// Block ID.
        id: String,
    },
    /// The model started a tool call.
    ToolInputStart {
        /// Call ID.
        call_id: String,
        /// Tool ID.
        tool_name: String,
    },
    /// Raw argument text for an open call.
    ToolInputDelta {
        /// Call ID.
        call_id: String,
        /// Appended raw input.
        delta: String,
    },
    /// Arguments are complete.
    ToolCall {
        /// Call ID.
        call_id: String,
        /// Tool ID.
        tool_name: String,
        /// Parsed arguments.
        input: Value,
    },
    /// A provider-executed tool returned.
    ToolResult {
        /// Call ID.
        call_id: String,
        /// Output text.
        output: String,
        /// Display title.
        #[serde(default)]
        title: String,
    },
    /// A provider-executed tool failed.
    ToolError {
        /// Call ID.
        call_id: String,
        /// Error text.
        error: String,
    },
    /// A model step ended.
    FinishStep {
        /// Step usage.
        usage: TokenUsage,
        /// Why the step ended.
        finish_reason: FinishReason,
    },
    /// The response ended.
    Finish {
        /// Reason of the last step.
        finish_reason: FinishReason,
    },
}

/// Drain a stream and concatenate its text deltas.
///
/// Used for single-shot calls such as summarization, where only the final
/// text matters.
pub async fn collect_text(mut stream: StreamEventStream) -> ProviderResult<String> {
    let mut text = String::new();
    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::TextDelta { delta, .. } => text.push_str(&delta),
            StreamEvent::Finish {
                finish_reason: FinishReason::Error,
            } => {
                return Err(ProviderError::Other {
                    message: "model finished with an error".into(),
                });
            }
            _ => {}
        }
    }
    Ok(text)
}
