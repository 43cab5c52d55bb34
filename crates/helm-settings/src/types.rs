//! Settings sections.
//!
//! Every field has a serde default so a partial JSON file deserializes
//! cleanly. Keys are `camelCase` on disk.

use helm_core::messages::ModelRef;
use helm_core::retry::RetryConfig;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HelmSettings {
    /// Context window management.
    pub context: ContextSettings,
    /// Provider retry policy.
    pub retry: RetryConfig,
    /// Tool resolution and loop detection.
    pub tools: ToolSettings,
    /// Background task queue.
    pub background: BackgroundSettings,
    /// Default model.
    pub model: ModelSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl HelmSettings {
    /// Reject combinations the runtime cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.background.max_concurrent_tasks == 0 {
            return Err(SettingsError::InvalidValue(
                "background.maxConcurrentTasks must be at least 1".into(),
            ));
        }
        if self.tools.doom_loop_threshold < 2 {
            return Err(SettingsError::InvalidValue(
                "tools.doomLoopThreshold must be at least 2".into(),
            ));
        }
        if self.context.safety_multiplier_percent < 100 {
            return Err(SettingsError::InvalidValue(
                "context.safetyMultiplierPercent must be at least 100".into(),
            ));
        }
        Ok(())
    }
}

/// Context estimation, compaction, and pruning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextSettings {
    /// Cap on the output reservation subtracted from the context limit.
    pub output_token_max: u64,
    /// Safety multiplier applied to estimates, in percent.
    pub safety_multiplier_percent: u64,
    /// Recent tool output tokens that pruning never touches.
    pub prune_protect: u64,
    /// Minimum prunable tokens before pruning acts.
    pub prune_minimum: u64,
    /// Outputs shorter than this are kept verbatim when pruned.
    pub prune_summary_min_chars: usize,
    /// Outputs are truncated to this many chars before summarizing.
    pub prune_summary_max_input_chars: usize,
    /// Most recent user turns pruning skips.
    pub prune_protected_turns: usize,
    /// Run compaction automatically on overflow.
    pub auto_compact: bool,
    /// Prune after each prompt.
    pub auto_prune: bool,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            output_token_max: 32_000,
            safety_multiplier_percent: 110,
            prune_protect: 40_000,
            prune_minimum: 20_000,
            prune_summary_min_chars: 2_000,
            prune_summary_max_input_chars: 20_000,
            prune_protected_turns: 2,
            auto_compact: true,
            auto_prune: true,
        }
    }
}

/// Tool resolution settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolSettings {
    /// Identical consecutive calls that trigger an approval request.
    pub doom_loop_threshold: usize,
    /// Tool the model is pointed at when it calls a deferred tool.
    pub discovery_tool: String,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            doom_loop_threshold: 3,
            discovery_tool: "tool_search".into(),
        }
    }
}

/// Background task queue settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackgroundSettings {
    /// Tasks allowed to run at once.
    pub max_concurrent_tasks: usize,
    /// Terminal tasks older than this are purged by cleanup.
    pub retention_hours: u64,
    /// Poll interval for `await_result`.
    pub poll_interval_ms: u64,
    /// Budget used when a spawn does not specify one.
    pub default_token_budget: u64,
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 3,
            retention_hours: 24,
            poll_interval_ms: 500,
            default_token_budget: 200_000,
        }
    }
}

/// Default model selection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelSettings {
    /// Provider used when a prompt names none.
    pub provider_id: String,
    /// Model used when a prompt names none.
    pub model_id: String,
}

impl ModelSettings {
    /// As a [`ModelRef`].
    #[must_use]
    pub fn model_ref(&self) -> ModelRef {
        ModelRef::new(&self.provider_id, &self.model_id)
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            provider_id: "anthropic".into(),
            model_id: "claude-sonnet-4".into(),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}
