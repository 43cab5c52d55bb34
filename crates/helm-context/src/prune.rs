//! Incremental pruning of old tool outputs.
//!
//! Walks the session newest to oldest. The most recent user turns are
//! skipped outright; after that, completed tool outputs are counted against a
//! protected watermark and everything past it becomes prunable. Nothing is
//! written unless the prunable total exceeds a minimum. Long outputs are
//! replaced by a short summary, short ones are kept verbatim, and every
//! pruned part is stamped with `time.compacted`.

use std::sync::Arc;

use async_trait::async_trait;
use helm_core::ids::SessionId;
use helm_core::messages::{Message, MessageWithParts, Part, ToolState};
use helm_events::{BusEvent, EventBus, MessageStore};
use helm_llm::{ModelMessage, ModelRequest, ResolvedModel, collect_text};
use tracing::{debug, info, instrument, warn};

use crate::constants::{
    PRUNE_MINIMUM, PRUNE_PROTECT, PRUNE_PROTECTED_TURNS, PRUNE_SUMMARY_MAX_INPUT_CHARS,
    PRUNE_SUMMARY_MIN_CHARS, PRUNE_SUMMARY_SYSTEM_PROMPT, PRUNED_OUTPUT_PREFIX,
};
use crate::errors::ContextError;
use crate::estimator::estimate_text;

/// Condenses one tool output.
#[async_trait]
pub trait ToolOutputSummarizer: Send + Sync {
    /// Summarize `output` produced by `tool`.
    async fn summarize(&self, tool: &str, output: &str) -> Result<String, ContextError>;
}

/// [`ToolOutputSummarizer`] backed by a model call.
pub struct ModelOutputSummarizer {
    model: ResolvedModel,
    max_output_tokens: u64,
}

impl ModelOutputSummarizer {
    /// Summarize with `model`.
    #[must_use]
    pub fn new(model: ResolvedModel) -> Self {
        Self {
            model,
            max_output_tokens: 1_024,
        }
    }
}

#[async_trait]
impl ToolOutputSummarizer for ModelOutputSummarizer {
    async fn summarize(&self, tool: &str, output: &str) -> Result<String, ContextError> {
        let request = ModelRequest {
            system: vec![PRUNE_SUMMARY_SYSTEM_PROMPT.to_owned()],
            messages: vec![ModelMessage::user_text(format!(
                "Output of the `{tool}` tool:\n\n{output}"
            ))],
            tools: Vec::new(),
            max_output_tokens: Some(self.max_output_tokens),
        };
        let stream = self.model.provider.stream(&self.model.info, &request).await?;
        Ok(collect_text(stream).await?.trim().to_owned())
    }
}

/// Pruning thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrunePolicy {
    /// Newest tool-output tokens that are never pruned.
    pub protect: u64,
    /// Prunable tokens required before anything is written.
    pub minimum: u64,
    /// Outputs at least this long are summarized.
    pub summary_min_chars: usize,
    /// Outputs are cut to this length before summarizing.
    pub summary_max_input_chars: usize,
    /// Most recent user turns skipped outright.
    pub protected_turns: usize,
}

impl Default for PrunePolicy {
    fn default() -> Self {
        Self {
            protect: PRUNE_PROTECT,
            minimum: PRUNE_MINIMUM,
            summary_min_chars: PRUNE_SUMMARY_MIN_CHARS,
            summary_max_input_chars: PRUNE_SUMMARY_MAX_INPUT_CHARS,
            protected_turns: PRUNE_PROTECTED_TURNS,
        }
    }
}

/// What a prune pass did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Parts stamped as compacted.
    pub pruned_parts: usize,
    /// Estimated tokens of the pruned outputs before rewriting.
    pub pruned_tokens: u64,
    /// Parts whose output was replaced by a summary.
    pub summarized: usize,
}

/// `(message index, part index)` of every prunable part, newest first, and
/// their estimated total.
#[must_use]
pub fn select_prunable(messages: &[MessageWithParts], policy: &PrunePolicy) -> (Vec<(usize, usize)>, u64) {
    let mut selected = Vec::new();
    let mut total = 0_u64;
    let mut pruned = 0_u64;
    let mut turns = 0_usize;

    'messages: for (mi, message) in messages.iter().enumerate().rev() {
        if matches!(message.info, Message::User(_)) {
            turns += 1;
        }
        if turns < policy.protected_turns {
            continue;
        }
        if message.info.is_summary() {
            break;
        }
        for (pi, part) in message.parts.iter().enumerate().rev() {
            let Some((_, _, ToolState::Completed { output, time, .. })) = part.as_tool() else {
                continue;
            };
            if time.compacted.is_some() {
                break 'messages;
            }
            let estimate = estimate_text(output);
            total += estimate;
            if total > policy.protect {
                pruned += estimate;
                selected.push((mi, pi));
            }
        }
    }
    (selected, pruned)
}

/// Prunes old tool outputs of a session.
pub struct Pruner {
    store: Arc<dyn MessageStore>,
    bus: Arc<EventBus>,
    summarizer: Option<Arc<dyn ToolOutputSummarizer>>,
    policy: PrunePolicy,
}

impl Pruner {
    /// Pruner with default thresholds and no summarizer.
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            bus,
            summarizer: None,
            policy: PrunePolicy::default(),
        }
    }

    /// Summarize long outputs with `summarizer`.
    #[must_use]
    pub fn with_summarizer(mut self, summarizer: Arc<dyn ToolOutputSummarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Override thresholds.
    #[must_use]
    pub fn with_policy(mut self, policy: PrunePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run one pruning pass.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn prune(&self, session_id: &SessionId) -> Result<PruneReport, ContextError> {
        let messages = self.store.list(session_id).await?;
        let (selected, pruned_tokens) = select_prunable(&messages, &self.policy);
        if pruned_tokens <= self.policy.minimum {
            debug!(pruned_tokens, "below prune minimum");
            return Ok(PruneReport::default());
        }

        let mut report = PruneReport {
            pruned_tokens,
            ..PruneReport::default()
        };
        let now = helm_core::now_ms();
        for (mi, pi) in selected {
            let mut part = messages[mi].parts[pi].clone();
            let Some((_, tool, ToolState::Completed { output, .. })) = part.as_tool() else {
                continue;
            };
            let rewritten = if output.len() >= self.policy.summary_min_chars {
                report.summarized += 1;
                Some(self.condense(tool, output).await)
            } else {
                None
            };
            stamp(&mut part, rewritten, now);
            self.store.upsert_part(&part).await?;
            let _ = self.bus.publish(BusEvent::PartUpdated { part, delta: None });
            report.pruned_parts += 1;
        }
        info!(
            parts = report.pruned_parts,
            tokens = report.pruned_tokens,
            summarized = report.summarized,
            "pruned tool outputs"
        );
        Ok(report)
    }

    async fn condense(&self, tool: &str, output: &str) -> String {
        let input = truncate_chars(output, self.policy.summary_max_input_chars);
        if let Some(summarizer) = &self.summarizer {
            match summarizer.summarize(tool, input).await {
                Ok(summary) if !summary.is_empty() => {
                    return format!("{PRUNED_OUTPUT_PREFIX}\n{summary}");
                }
                Ok(_) => warn!(tool, "empty tool output summary"),
                Err(e) => warn!(tool, error = %e, "tool output summary failed"),
            }
        }
        format!(
            "{PRUNED_OUTPUT_PREFIX}\n{}\n[... truncated]",
            truncate_chars(output, self.policy.summary_min_chars)
        )
    }
}

fn stamp(part: &mut Part, rewritten: Option<String>, now: i64) {
    if let Some(ToolState::Completed { output, time, .. }) = part.tool_state_mut() {
        if let Some(rewritten) = rewritten {
            *output = rewritten;
        }
        time.compacted = Some(now);
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{assistant_info, completed_tool, summary, tool_turn, user};
    use helm_core::ids::MessageId;
    use helm_events::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Stub {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ToolOutputSummarizer for Stub {
        async fn summarize(&self, _tool: &str, output: &str) -> Result<String, ContextError> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ContextError::EmptySummary);
            }
            Ok(format!("condensed {} chars", output.len()))
        }
    }

    fn stub(fail: bool) -> Arc<Stub> {
        Arc::new(Stub {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    fn policy() -> PrunePolicy {
        PrunePolicy {
            protect: 100,
            minimum: 50,
            summary_min_chars: 200,
            summary_max_input_chars: 500,
            protected_turns: 2,
        }
    }

    /// Tool turn whose parts, oldest first, have outputs of the given sizes.
    fn multi_tool(session: &SessionId, parent: &MessageId, sizes: &[usize]) -> MessageWithParts {
        let info = assistant_info(session, parent);
        MessageWithParts {
            parts: sizes
                .iter()
                .map(|n| completed_tool(session, &info.id, "read", &"x".repeat(*n)))
                .collect(),
            info: Message::Assistant(info),
        }
    }

    /// `[u1, old, u2, a2, u3, a3]` where `a2`/`a3` carry large outputs.
    fn session_with(old: MessageWithParts, u1: MessageWithParts) -> Vec<MessageWithParts> {
        let session = old.info.session_id().clone();
        let u2 = user(&session, "second");
        let a2 = tool_turn(&session, u2.info.id(), "read", &"y".repeat(4_000));
        let u3 = user(&session, "third");
        let a3 = tool_turn(&session, u3.info.id(), "read", &"z".repeat(4_000));
        vec![u1, old, u2, a2, u3, a3]
    }

    async fn persist(messages: &[MessageWithParts]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for m in messages {
            store.upsert_message(&m.info).await.unwrap();
            for p in &m.parts {
                store.upsert_part(p).await.unwrap();
            }
        }
        store
    }

    fn outputs(message: &MessageWithParts) -> Vec<(String, Option<i64>)> {
        message
            .parts
            .iter()
            .filter_map(|p| match p.as_tool() {
                Some((_, _, ToolState::Completed { output, time, .. })) => {
                    Some((output.clone(), time.compacted))
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn recent_turns_and_watermark_are_protected() {
        let session = SessionId::from("ses_1");
        let u1 = user(&session, "first");
        // Oldest first: 200 + 200 tokens prunable, newest 80 tokens under the watermark.
        let old = multi_tool(&session, u1.info.id(), &[800, 800, 320]);
        let messages = session_with(old, u1);
        let store = persist(&messages).await;
        let summarizer = stub(false);
        let pruner = Pruner::new(store.clone(), Arc::new(EventBus::new()))
            .with_policy(policy())
            .with_summarizer(summarizer.clone());

        let report = pruner.prune(&session).await.unwrap();
        assert_eq!(report.pruned_parts, 2);
        assert_eq!(report.pruned_tokens, 400);
        assert_eq!(report.summarized, 2);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 2);

        let stored = store.list(&session).await.unwrap();
        let old = outputs(&stored[1]);
        assert!(old[0].0.starts_with(PRUNED_OUTPUT_PREFIX));
        assert!(old[0].1.is_some());
        assert!(old[1].1.is_some());
        assert_eq!(old[2], ("x".repeat(320), None));
        // The two newest turns are untouched regardless of size.
        assert_eq!(outputs(&stored[3])[0].1, None);
        assert_eq!(outputs(&stored[5])[0].1, None);
    }

    #[tokio::test]
    async fn nothing_happens_below_minimum() {
        let session = SessionId::from("ses_1");
        let u1 = user(&session, "first");
        // 80 protected, then 40 prunable: under the minimum of 50.
        let old = multi_tool(&session, u1.info.id(), &[160, 320]);
        let store = persist(&session_with(old, u1)).await;
        let pruner = Pruner::new(store.clone(), Arc::new(EventBus::new())).with_policy(policy());

        assert_eq!(pruner.prune(&session).await.unwrap(), PruneReport::default());
        let stored = store.list(&session).await.unwrap();
        assert!(outputs(&stored[1]).iter().all(|(_, compacted)| compacted.is_none()));
    }

    #[tokio::test]
    async fn short_outputs_are_kept_verbatim() {
        let session = SessionId::from("ses_1");
        let u1 = user(&session, "first");
        let old = multi_tool(&session, u1.info.id(), &[190, 190, 190, 190, 400]);
        let store = persist(&session_with(old, u1)).await;
        let summarizer = stub(false);
        let pruner = Pruner::new(store.clone(), Arc::new(EventBus::new()))
            .with_policy(policy())
            .with_summarizer(summarizer.clone());

        let report = pruner.prune(&session).await.unwrap();
        assert_eq!(report.pruned_parts, 4);
        assert_eq!(report.summarized, 0);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
        let stored = store.list(&session).await.unwrap();
        for (output, compacted) in &outputs(&stored[1])[..4] {
            assert_eq!(output, &"x".repeat(190));
            assert!(compacted.is_some());
        }
    }

    #[tokio::test]
    async fn failed_summary_falls_back_to_truncation() {
        let session = SessionId::from("ses_1");
        let u1 = user(&session, "first");
        let old = multi_tool(&session, u1.info.id(), &[800, 800, 320]);
        let store = persist(&session_with(old, u1)).await;
        let pruner = Pruner::new(store.clone(), Arc::new(EventBus::new()))
            .with_policy(policy())
            .with_summarizer(stub(true));

        let _ = pruner.prune(&session).await.unwrap();
        let stored = store.list(&session).await.unwrap();
        let (output, _) = &outputs(&stored[1])[0];
        assert!(output.contains(&"x".repeat(200)));
        assert!(!output.contains(&"x".repeat(201)));
        assert!(output.ends_with("[... truncated]"));
    }

    #[tokio::test]
    async fn stops_at_already_compacted_part() {
        let session = SessionId::from("ses_1");
        let u0 = user(&session, "zeroth");
        let ancient = multi_tool(&session, u0.info.id(), &[4_000]);
        let u1 = user(&session, "first");
        let mut old = multi_tool(&session, u1.info.id(), &[320, 320]);
        stamp(&mut old.parts[0], None, 1);
        let mut messages = vec![u0, ancient];
        messages.extend(session_with(old, u1));
        let store = persist(&messages).await;
        let pruner = Pruner::new(store.clone(), Arc::new(EventBus::new())).with_policy(policy());

        // Only 80 tokens are reachable before the compacted part: all protected.
        assert_eq!(pruner.prune(&session).await.unwrap(), PruneReport::default());
        let stored = store.list(&session).await.unwrap();
        assert_eq!(outputs(&stored[1])[0].1, None);
    }

    #[tokio::test]
    async fn stops_at_checkpoint() {
        let session = SessionId::from("ses_1");
        let u0 = user(&session, "zeroth");
        let ancient = multi_tool(&session, u0.info.id(), &[4_000, 4_000]);
        let checkpoint = summary(&session, u0.info.id(), "summary");
        let u1 = user(&session, "first");
        let old = multi_tool(&session, u1.info.id(), &[100]);
        let mut messages = vec![u0, ancient, checkpoint];
        messages.extend(session_with(old, u1));
        let (selected, _) = select_prunable(&messages, &policy());
        assert!(selected.is_empty());
    }

    #[tokio::test]
    async fn model_summarizer_sends_condense_prompt() {
        use helm_core::messages::TokenUsage;
        use helm_llm::ModelInfo;
        use helm_llm::testing::{Script, ScriptedProvider, text_reply};

        let provider = Arc::new(ScriptedProvider::with_scripts(
            "test",
            vec![Script::Respond(text_reply(" 3 files changed ", TokenUsage::default()))],
        ));
        let summarizer = ModelOutputSummarizer::new(ResolvedModel {
            provider: provider.clone(),
            info: ModelInfo::new("test", "model", 10_000, 1_000),
        });
        assert_eq!(summarizer.summarize("bash", "diff ...").await.unwrap(), "3 files changed");
        let request = &provider.requests()[0];
        assert_eq!(request.system[0], PRUNE_SUMMARY_SYSTEM_PROMPT);
        assert!(request.messages[0].text().contains("`bash`"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
