//! Model metadata: context limits and pricing.

use helm_core::messages::TokenUsage;
use serde::{Deserialize, Serialize};

/// Token limits of a model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelLimit {
    /// Context window in tokens. Zero means unknown.
    pub context: u64,
    /// Maximum output tokens.
    pub output: u64,
}

/// USD prices per million tokens.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCost {
    /// Input price.
    pub input: f64,
    /// Output price (also applied to reasoning tokens).
    pub output: f64,
    /// Cache read price.
    #[serde(default)]
    pub cache_read: f64,
    /// Cache write price.
    #[serde(default)]
    pub cache_write: f64,
}

/// A model as the runtime sees it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    /// Model ID.
    pub id: String,
    /// Provider ID.
    pub provider_id: String,
    /// Token limits.
    pub limit: ModelLimit,
    /// Pricing.
    #[serde(default)]
    pub cost: ModelCost,
}

impl ModelInfo {
    /// Build a model with the given limits and no pricing.
    #[must_use]
    pub fn new(provider_id: impl Into<String>, id: impl Into<String>, context: u64, output: u64) -> Self {
        Self {
            id: id.into(),
            provider_id: provider_id.into(),
            limit: ModelLimit { context, output },
            cost: ModelCost::default(),
        }
    }

    /// USD cost of `usage` at this model's prices.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cost_of(&self, usage: &TokenUsage) -> f64 {
        let per_token = |tokens: u64, price: f64| (tokens as f64) * price / 1_000_000.0;
        per_token(usage.input, self.cost.input)
            + per_token(usage.output + usage.reasoning, self.cost.output)
            + per_token(usage.cache_read, self.cost.cache_read)
            + per_token(usage.cache_write, self.cost.cache_write)
    }
}
