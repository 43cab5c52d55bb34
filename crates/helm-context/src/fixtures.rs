//! Message builders shared by this crate's tests.

use std::collections::BTreeMap;

use helm_core::ids::{MessageId, SessionId};
use helm_core::messages::{
    AssistantMessage, Message, MessageTime, MessageWithParts, ModelRef, Part, PartKind, TokenUsage,
    ToolState, ToolTime, UserMessage,
};
use serde_json::{Value, json};

pub fn user(session: &SessionId, text: &str) -> MessageWithParts {
    let id = MessageId::new();
    MessageWithParts {
        parts: vec![Part::text(session, &id, text)],
        info: Message::User(UserMessage {
            id,
            session_id: session.clone(),
            time: MessageTime {
                created: 1,
                completed: None,
            },
            agent: "build".into(),
            model: ModelRef::new("test", "model"),
            tools: BTreeMap::new(),
        }),
    }
}

pub fn assistant_info(session: &SessionId, parent: &MessageId) -> AssistantMessage {
    AssistantMessage {
        id: MessageId::new(),
        session_id: session.clone(),
        parent_id: parent.clone(),
        time: MessageTime {
            created: 2,
            completed: Some(3),
        },
        agent: "build".into(),
        model: ModelRef::new("test", "model"),
        tokens: TokenUsage::default(),
        cost: 0.0,
        error: None,
        summary: false,
        blocked: false,
        finish: Some("stop".into()),
    }
}

pub fn assistant(session: &SessionId, parent: &MessageId, text: &str) -> MessageWithParts {
    let info = assistant_info(session, parent);
    MessageWithParts {
        parts: vec![Part::text(session, &info.id, text)],
        info: Message::Assistant(info),
    }
}

pub fn summary(session: &SessionId, parent: &MessageId, text: &str) -> MessageWithParts {
    let mut info = assistant_info(session, parent);
    info.summary = true;
    MessageWithParts {
        parts: vec![Part::text(session, &info.id, text)],
        info: Message::Assistant(info),
    }
}

pub fn completed_tool(session: &SessionId, message: &MessageId, tool: &str, output: &str) -> Part {
    Part::new(
        session,
        message,
        PartKind::Tool {
            call_id: format!("call_{}", MessageId::new()),
            tool: tool.into(),
            state: ToolState::Completed {
                input: json!({}),
                output: output.into(),
                title: tool.into(),
                metadata: Value::Null,
                time: ToolTime {
                    start: 1,
                    end: 2,
                    compacted: None,
                },
            },
        },
    )
}

/// Assistant message with one completed tool call.
pub fn tool_turn(session: &SessionId, parent: &MessageId, tool: &str, output: &str) -> MessageWithParts {
    let info = assistant_info(session, parent);
    MessageWithParts {
        parts: vec![completed_tool(session, &info.id, tool, output)],
        info: Message::Assistant(info),
    }
}
