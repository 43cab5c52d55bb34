//! Model history assembly.
//!
//! History sent to the model starts at the latest checkpoint: the checkpoint
//! text, a synthetic resume message, then every message written after it.
//! Without a checkpoint the whole session is sent.

use helm_core::messages::{Message, MessageWithParts, Part, PartKind, ToolState};
use helm_llm::{ContentBlock, ModelMessage, ModelRole};

use crate::constants::{INTERRUPTED_TOOL_OUTPUT, RESUME_PROMPT};

/// Index of the latest usable checkpoint.
///
/// A checkpoint is a completed summary message with no error and non-empty
/// text.
#[must_use]
pub fn checkpoint_index(messages: &[MessageWithParts]) -> Option<usize> {
    messages.iter().rposition(|m| {
        m.info.as_assistant().is_some_and(|a| {
            a.summary && a.error.is_none() && a.is_completed() && !m.text().trim().is_empty()
        })
    })
}

/// Convert stored messages into model history.
#[must_use]
pub fn to_model_messages(messages: &[MessageWithParts]) -> Vec<ModelMessage> {
    let mut out = Vec::new();
    let rest = match checkpoint_index(messages) {
        Some(index) => {
            out.push(ModelMessage {
                role: ModelRole::Assistant,
                content: vec![ContentBlock::Text {
                    text: messages[index].text(),
                }],
            });
            out.push(ModelMessage::user_text(RESUME_PROMPT));
            &messages[index + 1..]
        }
        None => messages,
    };
    for message in rest {
        match &message.info {
            Message::User(_) => {
                let content: Vec<_> = message
                    .parts
                    .iter()
                    .filter_map(Part::as_text)
                    .filter(|t| !t.is_empty())
                    .map(|t| ContentBlock::Text { text: t.to_owned() })
                    .collect();
                if !content.is_empty() {
                    out.push(ModelMessage {
                        role: ModelRole::User,
                        content,
                    });
                }
            }
            Message::Assistant(info) => {
                // Failed checkpoints never reach the model.
                if info.summary {
                    continue;
                }
                push_assistant(&mut out, message);
            }
        }
    }
    out
}

fn push_assistant(out: &mut Vec<ModelMessage>, message: &MessageWithParts) {
    let mut content = Vec::new();
    let mut results = Vec::new();
    for part in &message.parts {
        match &part.kind {
            PartKind::Text { text, .. } if !text.is_empty() => {
                content.push(ContentBlock::Text { text: text.clone() });
            }
            PartKind::Reasoning { text, .. } if !text.is_empty() => {
                content.push(ContentBlock::Reasoning { text: text.clone() });
            }
            PartKind::Tool {
                call_id,
                tool,
                state,
            } => {
                let (input, output, is_error) = match state {
                    ToolState::Completed { input, output, .. } => (input.clone(), output.clone(), false),
                    ToolState::Error { input, error, .. } => (input.clone(), error.clone(), true),
                    ToolState::Running { input, .. } => {
                        (input.clone(), INTERRUPTED_TOOL_OUTPUT.to_owned(), true)
                    }
                    ToolState::Pending { .. } => continue,
                };
                content.push(ContentBlock::ToolCall {
                    call_id: call_id.clone(),
                    name: tool.clone(),
                    input,
                });
                results.push(ContentBlock::ToolResult {
                    call_id: call_id.clone(),
                    output,
                    is_error,
                });
            }
            _ => {}
        }
    }
    if content.is_empty() {
        return;
    }
    out.push(ModelMessage {
        role: ModelRole::Assistant,
        content,
    });
    if !results.is_empty() {
        out.push(ModelMessage {
            role: ModelRole::Tool,
            content: results,
        });
    }
}
