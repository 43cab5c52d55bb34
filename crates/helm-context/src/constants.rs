//! Context subsystem constants.

// ─────────────────────────────────────────────────────────────────────────────
// Token estimation
// ─────────────────────────────────────────────────────────────────────────────

/// Approximate characters per token.
pub const CHARS_PER_TOKEN: u64 = 4;

/// Upper bound on the output reservation subtracted from the context window.
pub const OUTPUT_TOKEN_MAX: u64 = 32_000;

/// Estimate multiplier, in percent, applied before comparing against the
/// usable window.
pub const SAFETY_MULTIPLIER_PERCENT: u64 = 110;

// ─────────────────────────────────────────────────────────────────────────────
// Pruning
// ─────────────────────────────────────────────────────────────────────────────

/// Tool-output tokens (newest first) that pruning never touches.
pub const PRUNE_PROTECT: u64 = 40_000;

/// Prunable tokens required before pruning does anything.
pub const PRUNE_MINIMUM: u64 = 20_000;

/// Outputs at least this long are summarized; shorter ones are kept verbatim.
pub const PRUNE_SUMMARY_MIN_CHARS: usize = 2_000;

/// Outputs are cut to this length before being sent to the summarizer.
pub const PRUNE_SUMMARY_MAX_INPUT_CHARS: usize = 20_000;

/// Most recent user turns skipped by pruning.
pub const PRUNE_PROTECTED_TURNS: usize = 2;

/// Prefix of a summarized tool output.
pub const PRUNED_OUTPUT_PREFIX: &str = "[Earlier output summarized]";

/// System prompt for tool-output summaries.
pub const PRUNE_SUMMARY_SYSTEM_PROMPT: &str = "You condense tool output for a coding agent. \
Keep every identifier, file path, line number, command, and error message exactly as written. \
Drop repetition and boilerplate. Answer with the condensed output only.";

// ─────────────────────────────────────────────────────────────────────────────
// Compaction
// ─────────────────────────────────────────────────────────────────────────────

/// System prompt for the compaction call.
pub const SUMMARIZE_SYSTEM_PROMPT: &str = "You are a helpful AI assistant tasked with summarizing \
conversations. Focus on information that would help another agent continue the work: what was \
done, which files were touched, decisions made, open problems, and the user's latest request.";

/// Final user instruction of the compaction call.
pub const SUMMARIZE_INSTRUCTION: &str = "Provide a detailed summary of our conversation above so \
that the work can continue from it alone. Include what we did, what we are doing now, which files \
we are working on, and what needs to be done next. Quote the user's most recent request verbatim.";

/// Synthetic user message that follows a checkpoint in model history.
pub const RESUME_PROMPT: &str =
    "Use the summary above to continue from where we left off. Do not repeat finished work.";

/// Replacement for interrupted tool calls when history is rebuilt.
pub const INTERRUPTED_TOOL_OUTPUT: &str = "Tool execution was interrupted";
