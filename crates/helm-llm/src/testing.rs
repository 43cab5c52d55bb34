//! Scripted provider for tests.
//!
//! Each call to [`Provider::stream`] pops the next [`Script`]. When the queue
//! is empty the provider answers with a short text reply.

use std::collections::VecDeque;

use async_trait::async_trait;
use helm_core::messages::TokenUsage;
use parking_lot::Mutex;
use serde_json::Value;

use crate::errors::{ProviderError, ProviderResult};
use crate::models::ModelInfo;
use crate::provider::Provider;
use crate::request::ModelRequest;
use crate::stream::{FinishReason, StreamEvent, StreamEventStream};

/// One scripted response.
#[derive(Debug)]
pub enum Script {
    /// Stream these events, then end.
    Respond(Vec<StreamEvent>),
    /// Fail when the stream is opened.
    Reject(ProviderError),
    /// Stream these events, then yield the error.
    FailAfter(Vec<StreamEvent>, ProviderError),
    /// Stream these events, then never end.
    Hang(Vec<StreamEvent>),
}

/// Provider that replays [`Script`]s and records every request.
pub struct ScriptedProvider {
    id: String,
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedProvider {
    /// Provider with an empty script queue.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_scripts(id, Vec::new())
    }

    /// Provider that replays `scripts` in order.
    #[must_use]
    pub fn with_scripts(id: impl Into<String>, scripts: Vec<Script>) -> Self {
        Self {
            id: id.into(),
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue another script.
    pub fn push(&self, script: Script) {
        self.scripts.lock().push_back(script);
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn stream(
        &self,
        _model: &ModelInfo,
        request: &ModelRequest,
    ) -> ProviderResult<StreamEventStream> {
        self.requests.lock().push(request.clone());
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| Script::Respond(text_reply("ok", TokenUsage::default())));

        let (events, error, hang) = match script {
            Script::Reject(err) => return Err(err),
            Script::Respond(events) => (events, None, false),
            Script::FailAfter(events, err) => (events, Some(err), false),
            Script::Hang(events) => (events, None, true),
        };
        Ok(Box::pin(async_stream::stream! {
            for event in events {
                yield Ok(event);
            }
            if let Some(err) = error {
                yield Err(err);
            }
            if hang {
                futures::future::pending::<()>().await;
            }
        }))
    }
}

/// A single-step text response.
#[must_use]
pub fn text_reply(text: &str, usage: TokenUsage) -> Vec<StreamEvent> {
    vec![
        StreamEvent::Start,
        StreamEvent::StartStep,
        StreamEvent::TextStart { id: "t0".into() },
        StreamEvent::TextDelta {
            id: "t0".into(),
            delta: text.into(),
        },
        StreamEvent::TextEnd { id: "t0".into() },
        StreamEvent::FinishStep {
            usage,
            finish_reason: FinishReason::Stop,
        },
        StreamEvent::Finish {
            finish_reason: FinishReason::Stop,
        },
    ]
}

/// A single-step response that calls one tool.
#[must_use]
pub fn tool_call_reply(call_id: &str, tool: &str, input: Value, usage: TokenUsage) -> Vec<StreamEvent> {
    vec![
        StreamEvent::Start,
        StreamEvent::StartStep,
        StreamEvent::ToolInputStart {
            call_id: call_id.into(),
            tool_name: tool.into(),
        },
        StreamEvent::ToolInputDelta {
            call_id: call_id.into(),
            delta: input.to_string(),
        },
        StreamEvent::ToolCall {
            call_id: call_id.into(),
            tool_name: tool.into(),
            input,
        },
        StreamEvent::FinishStep {
            usage,
            finish_reason: FinishReason::ToolCalls,
        },
        StreamEvent::Finish {
            finish_reason: FinishReason::ToolCalls,
        },
    ]
}
