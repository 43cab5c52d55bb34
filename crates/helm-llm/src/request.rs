//! Provider-agnostic request shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool advertised to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool ID.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// JSON Schema of the arguments.
    pub parameters: Value,
}

/// Speaker of a [`ModelMessage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    /// Caller input or synthetic runtime input.
    User,
    /// Model output, including tool calls.
    Assistant,
    /// Tool results answering the preceding assistant message.
    Tool,
}

/// Content of a [`ModelMessage`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// Text.
        text: String,
    },
    /// Prior reasoning.
    Reasoning {
        /// Text.
        text: String,
    },
    /// A tool call made by the model.
    ToolCall {
        /// Call ID.
        call_id: String,
        /// Tool ID.
        name: String,
        /// Arguments.
        input: Value,
    },
    /// The result of a tool call.
    ToolResult {
        /// Call ID.
        call_id: String,
        /// Output or error text.
        output: String,
        /// Whether `output` is an error.
        is_error: bool,
    },
}

/// One message of model history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelMessage {
    /// Speaker.
    pub role: ModelRole,
    /// Content blocks, in order.
    pub content: Vec<ContentBlock>,
}

impl ModelMessage {
    /// A user message with a single text block.
    #[must_use]
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: ModelRole::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Concatenated text blocks.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A complete model request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRequest {
    /// System prompt segments.
    pub system: Vec<String>,
    /// Conversation history.
    pub messages: Vec<ModelMessage>,
    /// Tools visible for this request.
    pub tools: Vec<ToolDefinition>,
    /// Output cap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,
}
