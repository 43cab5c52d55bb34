//! Compaction checkpoints.
//!
//! A checkpoint is an assistant message with `summary = true` whose text is
//! a model-written summary of everything before it. [`history`](crate::history)
//! starts model history at the latest checkpoint.

use std::sync::Arc;

use futures::StreamExt;
use helm_core::ids::{MessageId, SessionId};
use helm_core::messages::{
    AssistantMessage, Message, MessageError, MessageTime, MessageWithParts, ModelRef, Part,
    TokenUsage,
};
use helm_events::{BusEvent, EventBus, MessageStore};
use helm_llm::{ModelMessage, ModelRequest, ProviderError, ResolvedModel, StreamEvent};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::constants::{OUTPUT_TOKEN_MAX, SUMMARIZE_INSTRUCTION, SUMMARIZE_SYSTEM_PROMPT};
use crate::errors::ContextError;
use crate::history::{checkpoint_index, to_model_messages};

/// Writes compaction checkpoints.
pub struct Compactor {
    store: Arc<dyn MessageStore>,
    bus: Arc<EventBus>,
    output_token_max: u64,
}

impl Compactor {
    /// Create a compactor.
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            bus,
            output_token_max: OUTPUT_TOKEN_MAX,
        }
    }

    /// Cap the summary length.
    #[must_use]
    pub fn with_output_token_max(mut self, output_token_max: u64) -> Self {
        self.output_token_max = output_token_max;
        self
    }

    /// Summarize the session into a new checkpoint.
    ///
    /// Returns the existing checkpoint unchanged when it is already the
    /// latest message.
    #[instrument(skip_all, fields(session_id = %session_id, model = %model.info.id))]
    pub async fn run(
        &self,
        session_id: &SessionId,
        model: &ResolvedModel,
        agent: &str,
        cancel: &CancellationToken,
    ) -> Result<MessageWithParts, ContextError> {
        let mut messages = self.store.list(session_id).await?;
        if let Some(index) = checkpoint_index(&messages).filter(|&i| i + 1 == messages.len()) {
            info!("latest message is already a checkpoint");
            return Ok(messages.swap_remove(index));
        }
        let parent_id = messages
            .iter()
            .rev()
            .find_map(|m| m.info.as_user().map(|u| u.id.clone()))
            .ok_or_else(|| ContextError::NothingToCompact {
                session_id: session_id.clone(),
            })?;

        let mut history = to_model_messages(&messages);
        history.push(ModelMessage::user_text(SUMMARIZE_INSTRUCTION));
        let reserve = match model.info.limit.output.min(self.output_token_max) {
            0 => self.output_token_max,
            n => n,
        };
        let request = ModelRequest {
            system: vec![SUMMARIZE_SYSTEM_PROMPT.to_owned()],
            messages: history,
            tools: Vec::new(),
            max_output_tokens: Some(reserve),
        };

        let mut checkpoint = AssistantMessage {
            id: MessageId::new(),
            session_id: session_id.clone(),
            parent_id,
            time: MessageTime {
                created: helm_core::now_ms(),
                completed: None,
            },
            agent: agent.to_owned(),
            model: ModelRef::new(&model.info.provider_id, &model.info.id),
            tokens: TokenUsage::default(),
            cost: 0.0,
            error: None,
            summary: true,
            blocked: false,
            finish: None,
        };
        self.save(&checkpoint).await?;

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ContextError::Cancelled),
            result = stream_summary(model, &request) => result.map_err(ContextError::from),
        };

        let mut parts = Vec::new();
        let result = match outcome {
            Ok((text, usage)) => {
                checkpoint.tokens = usage;
                checkpoint.cost = model.info.cost_of(&usage);
                if text.trim().is_empty() {
                    Err(ContextError::EmptySummary)
                } else {
                    let part = Part::text(session_id, &checkpoint.id, text);
                    self.store.upsert_part(&part).await?;
                    let _ = self.bus.publish(BusEvent::PartUpdated {
                        part: part.clone(),
                        delta: None,
                    });
                    parts.push(part);
                    checkpoint.finish = Some("stop".into());
                    Ok(())
                }
            }
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!(error = %e, "compaction failed");
            checkpoint.error = Some(message_error(e, &model.info.provider_id));
        }
        let _ = checkpoint.complete(helm_core::now_ms());
        self.save(&checkpoint).await?;
        result?;

        info!(message_id = %checkpoint.id, tokens = checkpoint.tokens.total(), "checkpoint written");
        let _ = self.bus.publish(BusEvent::SessionCompacted {
            session_id: session_id.clone(),
            message_id: checkpoint.id.clone(),
        });
        Ok(MessageWithParts {
            info: Message::Assistant(checkpoint),
            parts,
        })
    }

    async fn save(&self, message: &AssistantMessage) -> Result<(), ContextError> {
        let info = Message::Assistant(message.clone());
        self.store.upsert_message(&info).await?;
        let _ = self.bus.publish(BusEvent::MessageUpdated { info });
        Ok(())
    }
}

async fn stream_summary(
    model: &ResolvedModel,
    request: &ModelRequest,
) -> Result<(String, TokenUsage), ProviderError> {
    let mut stream = model.provider.stream(&model.info, request).await?;
    let mut text = String::new();
    let mut usage = TokenUsage::default();
    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::TextDelta { delta, .. } => text.push_str(&delta),
            StreamEvent::FinishStep { usage: step, .. } => usage.accumulate(&step),
            _ => {}
        }
    }
    Ok((text, usage))
}

fn message_error(error: &ContextError, provider_id: &str) -> MessageError {
    match error {
        ContextError::Cancelled => MessageError::Aborted {
            message: error.to_string(),
        },
        ContextError::Provider(ProviderError::Auth { message }) => MessageError::ProviderAuth {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::RESUME_PROMPT;
    use crate::fixtures::{assistant, user};
    use assert_matches::assert_matches;
    use helm_events::MemoryStore;
    use helm_llm::testing::{Script, ScriptedProvider, text_reply};
    use helm_llm::{ModelInfo, ModelRole};

    struct Fixture {
        store: Arc<MemoryStore>,
        bus: Arc<EventBus>,
        provider: Arc<ScriptedProvider>,
        model: ResolvedModel,
        session: SessionId,
    }

    async fn fixture(scripts: Vec<Script>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let session = SessionId::from("ses_1");
        let u = user(&session, "build the parser");
        let a = assistant(&session, u.info.id(), "done, parser.rs written");
        for m in [&u, &a] {
            store.upsert_message(&m.info).await.unwrap();
            for p in &m.parts {
                store.upsert_part(p).await.unwrap();
            }
        }
        let provider = Arc::new(ScriptedProvider::with_scripts("test", scripts));
        Fixture {
            store,
            bus: Arc::new(EventBus::new()),
            model: ResolvedModel {
                provider: provider.clone(),
                info: ModelInfo::new("test", "model", 100_000, 8_000),
            },
            provider,
            session,
        }
    }

    fn usage() -> TokenUsage {
        TokenUsage {
            input: 100,
            output: 20,
            ..TokenUsage::default()
        }
    }

    #[tokio::test]
    async fn writes_a_summary_checkpoint() {
        let f = fixture(vec![Script::Respond(text_reply("summary: parser done", usage()))]).await;
        let mut events = f.bus.subscribe();
        let compactor = Compactor::new(f.store.clone(), f.bus.clone());

        let checkpoint = compactor
            .run(&f.session, &f.model, "build", &CancellationToken::new())
            .await
            .unwrap();

        assert!(checkpoint.info.is_summary());
        assert_eq!(checkpoint.text(), "summary: parser done");
        let stored = f.store.list(&f.session).await.unwrap();
        assert_eq!(stored.len(), 3);
        let info = stored[2].info.as_assistant().unwrap();
        assert!(info.is_completed());
        assert_eq!(info.tokens.total(), 120);

        let request = &f.provider.requests()[0];
        assert_eq!(request.system, vec![SUMMARIZE_SYSTEM_PROMPT.to_owned()]);
        assert_eq!(request.messages.last().unwrap().text(), SUMMARIZE_INSTRUCTION);

        let mut compacted = false;
        while let Ok(event) = events.try_recv() {
            compacted |= matches!(event, BusEvent::SessionCompacted { .. });
        }
        assert!(compacted);

        let history = to_model_messages(&stored);
        assert_eq!(history[0].role, ModelRole::Assistant);
        assert_eq!(history[1].text(), RESUME_PROMPT);
    }

    #[tokio::test]
    async fn second_run_is_a_noop() {
        let f = fixture(vec![Script::Respond(text_reply("summary", usage()))]).await;
        let compactor = Compactor::new(f.store.clone(), f.bus.clone());
        let cancel = CancellationToken::new();

        let first = compactor.run(&f.session, &f.model, "build", &cancel).await.unwrap();
        let second = compactor.run(&f.session, &f.model, "build", &cancel).await.unwrap();

        assert_eq!(first.info.id(), second.info.id());
        assert_eq!(f.provider.request_count(), 1);
        let summaries = f
            .store
            .list(&f.session)
            .await
            .unwrap()
            .iter()
            .filter(|m| m.info.is_summary())
            .count();
        assert_eq!(summaries, 1);
    }

    #[tokio::test]
    async fn provider_failure_completes_message_with_error() {
        let f = fixture(vec![Script::Reject(ProviderError::ContextOverflow {
            message: "prompt is too long".into(),
        })])
        .await;
        let compactor = Compactor::new(f.store.clone(), f.bus.clone());

        let err = compactor
            .run(&f.session, &f.model, "build", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_context_overflow());

        let stored = f.store.list(&f.session).await.unwrap();
        let info = stored[2].info.as_assistant().unwrap();
        assert!(info.is_completed());
        assert_matches!(info.error, Some(MessageError::ContextOverflow { .. }));
        assert_eq!(checkpoint_index(&stored), None);
    }

    #[tokio::test]
    async fn empty_summary_is_an_error() {
        let f = fixture(vec![Script::Respond(text_reply("  ", usage()))]).await;
        let compactor = Compactor::new(f.store.clone(), f.bus.clone());
        assert_matches!(
            compactor.run(&f.session, &f.model, "build", &CancellationToken::new()).await,
            Err(ContextError::EmptySummary)
        );
    }

    #[tokio::test]
    async fn abort_stops_a_hanging_summary() {
        let f = fixture(vec![Script::Hang(Vec::new())]).await;
        let compactor = Compactor::new(f.store.clone(), f.bus.clone());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let _ = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            trigger.cancel();
        });

        assert_matches!(
            compactor.run(&f.session, &f.model, "build", &cancel).await,
            Err(ContextError::Cancelled)
        );
        let stored = f.store.list(&f.session).await.unwrap();
        assert_matches!(
            stored[2].info.as_assistant().unwrap().error,
            Some(MessageError::Aborted { .. })
        );
    }

    #[tokio::test]
    async fn empty_session_has_nothing_to_compact() {
        let f = fixture(Vec::new()).await;
        let compactor = Compactor::new(f.store.clone(), f.bus.clone());
        assert_matches!(
            compactor
                .run(&SessionId::from("ses_other"), &f.model, "build", &CancellationToken::new())
                .await,
            Err(ContextError::NothingToCompact { .. })
        );
    }
}
