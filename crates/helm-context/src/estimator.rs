//! Token estimation and the overflow test.
//!
//! The estimate is additive: every part contributes `ceil(len / 4)` tokens
//! and nothing else, so appending parts never lowers it.

use helm_core::messages::{MessageWithParts, Part, PartKind, ToolState};
use helm_llm::ModelInfo;

use crate::constants::{CHARS_PER_TOKEN, OUTPUT_TOKEN_MAX, SAFETY_MULTIPLIER_PERCENT};

/// Estimated tokens of a text.
#[must_use]
pub fn estimate_text(text: &str) -> u64 {
    (text.len() as u64).div_ceil(CHARS_PER_TOKEN)
}

/// Estimated tokens of one part.
#[must_use]
pub fn estimate_part(part: &Part) -> u64 {
    match &part.kind {
        PartKind::Text { text, .. } | PartKind::Reasoning { text, .. } => estimate_text(text),
        PartKind::Tool { state, .. } => match state {
            ToolState::Pending { raw } => estimate_text(raw),
            ToolState::Running { input, .. } => estimate_text(&input.to_string()),
            ToolState::Completed { input, output, .. } => {
                estimate_text(&input.to_string()) + estimate_text(output)
            }
            ToolState::Error { input, error, .. } => {
                estimate_text(&input.to_string()) + estimate_text(error)
            }
        },
        PartKind::Retry { .. }
        | PartKind::StepStart { .. }
        | PartKind::StepFinish { .. }
        | PartKind::Patch(_) => 0,
    }
}

/// Estimated tokens of a system prompt plus a message history.
#[must_use]
pub fn estimate_tokens(system: &[String], messages: &[MessageWithParts]) -> u64 {
    let system: u64 = system.iter().map(|s| estimate_text(s)).sum();
    let history: u64 = messages
        .iter()
        .flat_map(|m| m.parts.iter())
        .map(estimate_part)
        .sum();
    system + history
}

/// Parameters of the overflow test.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverflowPolicy {
    /// Cap on the output reservation.
    pub output_token_max: u64,
    /// Multiplier applied to the estimate, in percent.
    pub safety_percent: u64,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        Self {
            output_token_max: OUTPUT_TOKEN_MAX,
            safety_percent: SAFETY_MULTIPLIER_PERCENT,
        }
    }
}

impl OverflowPolicy {
    /// Tokens available for input: `context − min(output, output_token_max)`.
    ///
    /// `None` when the context window is unknown. A model reporting no output
    /// limit reserves the full `output_token_max`.
    #[must_use]
    pub fn usable(&self, model: &ModelInfo) -> Option<u64> {
        if model.limit.context == 0 {
            return None;
        }
        let reserved = match model.limit.output.min(self.output_token_max) {
            0 => self.output_token_max,
            n => n,
        };
        Some(model.limit.context.saturating_sub(reserved))
    }

    /// Whether `estimate` inflated by the safety multiplier exceeds the
    /// usable window.
    #[must_use]
    pub fn is_overflow(&self, estimate: u64, model: &ModelInfo) -> bool {
        let Some(usable) = self.usable(model) else {
            return false;
        };
        u128::from(estimate) * u128::from(self.safety_percent) > u128::from(usable) * 100
    }
}

/// [`OverflowPolicy::is_overflow`] with default parameters.
#[must_use]
pub fn is_overflow(estimate: u64, model: &ModelInfo) -> bool {
    OverflowPolicy::default().is_overflow(estimate, model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use helm_core::ids::{MessageId, SessionId};
    use helm_core::messages::ToolTime;
    use proptest::prelude::*;
    use serde_json::json;

    fn text_part(text: &str) -> Part {
        Part::text(&SessionId::from("ses_1"), &MessageId::from("msg_1"), text)
    }

    #[test]
    fn text_rounds_up() {
        assert_eq!(estimate_text(""), 0);
        assert_eq!(estimate_text("a"), 1);
        assert_eq!(estimate_text("abcd"), 1);
        assert_eq!(estimate_text("abcde"), 2);
    }

    #[test]
    fn tool_parts_count_input_and_output() {
        let part = Part::new(
            &SessionId::from("ses_1"),
            &MessageId::from("msg_1"),
            PartKind::Tool {
                call_id: "c1".into(),
                tool: "read".into(),
                state: ToolState::Completed {
                    input: json!({"path": "a"}),
                    output: "x".repeat(400),
                    title: String::new(),
                    metadata: serde_json::Value::Null,
                    time: ToolTime {
                        start: 0,
                        end: 1,
                        compacted: None,
                    },
                },
            },
        );
        // {"path":"a"} is 12 chars.
        assert_eq!(estimate_part(&part), 3 + 100);
    }

    #[test]
    fn system_prompt_counts() {
        assert_eq!(estimate_tokens(&["x".repeat(40)], &[]), 10);
    }

    #[test]
    fn overflow_boundary() {
        // usable = 100_000 − 32_000 = 68_000; 68_000 / 1.1 = 61_818.18
        let model = ModelInfo::new("p", "m", 100_000, 64_000);
        assert!(!is_overflow(61_818, &model));
        assert!(is_overflow(61_819, &model));
    }

    #[test]
    fn small_output_limit_reserves_less() {
        let model = ModelInfo::new("p", "m", 100_000, 8_000);
        assert_eq!(OverflowPolicy::default().usable(&model), Some(92_000));
    }

    #[test]
    fn unknown_output_limit_reserves_max() {
        let model = ModelInfo::new("p", "m", 100_000, 0);
        assert_eq!(OverflowPolicy::default().usable(&model), Some(68_000));
    }

    #[test]
    fn unknown_context_never_overflows() {
        let model = ModelInfo::new("p", "m", 0, 0);
        assert!(!is_overflow(u64::MAX, &model));
    }

    #[test]
    fn ninety_percent_plus_large_output_overflows() {
        let model = ModelInfo::new("p", "m", 200_000, 32_000);
        let usable = OverflowPolicy::default().usable(&model).unwrap_or_default();
        let current = usable * 9 / 10;
        assert!(!is_overflow(current * 100 / 110, &model));
        assert!(is_overflow(current + 50_000, &model));
    }

    proptest! {
        #[test]
        fn estimate_is_monotonic(texts in proptest::collection::vec(".{0,64}", 1..20)) {
            let mut message = MessageWithParts {
                info: helm_core::messages::Message::User(helm_core::messages::UserMessage {
                    id: MessageId::from("msg_1"),
                    session_id: SessionId::from("ses_1"),
                    time: helm_core::messages::MessageTime { created: 0, completed: None },
                    agent: "build".into(),
                    model: helm_core::messages::ModelRef::new("p", "m"),
                    tools: std::collections::BTreeMap::new(),
                }),
                parts: Vec::new(),
            };
            let mut previous = 0;
            for text in &texts {
                message.parts.push(text_part(text));
                let current = estimate_tokens(&[], std::slice::from_ref(&message));
                prop_assert!(current >= previous);
                previous = current;
            }
        }
    }
}
