//! # Provider Trait
//!
//! A [`Provider`] turns a [`ModelRequest`] into a stream of
//! [`StreamEvent`](crate::StreamEvent)s. The [`ProviderRegistry`] maps a
//! `(provider, model)` pair to the provider instance and the model's limits.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use helm_core::messages::ModelRef;

use crate::errors::{ProviderError, ProviderResult};
use crate::models::ModelInfo;
use crate::request::ModelRequest;
use crate::stream::StreamEventStream;

/// Streaming model backend.
///
/// Implementors must be `Send + Sync` for use across async tasks. Dropping
/// the returned stream must abort the underlying request.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider ID (e.g. `"anthropic"`).
    fn id(&self) -> &str;

    /// Start a streamed completion.
    async fn stream(
        &self,
        model: &ModelInfo,
        request: &ModelRequest,
    ) -> ProviderResult<StreamEventStream>;
}

/// A provider paired with the model it will serve.
#[derive(Clone)]
pub struct ResolvedModel {
    /// Provider instance.
    pub provider: Arc<dyn Provider>,
    /// Model metadata.
    pub info: ModelInfo,
}

impl std::fmt::Debug for ResolvedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedModel")
            .field("provider", &self.provider.id())
            .field("info", &self.info)
            .finish()
    }
}

struct ProviderEntry {
    provider: Arc<dyn Provider>,
    models: HashMap<String, ModelInfo>,
}

/// Catalog of providers and their models.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderEntry>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider with the models it serves.
    ///
    /// Registering a provider ID twice replaces the earlier entry.
    pub fn register(&mut self, provider: Arc<dyn Provider>, models: Vec<ModelInfo>) {
        let models = models.into_iter().map(|m| (m.id.clone(), m)).collect();
        let _ = self
            .providers
            .insert(provider.id().to_owned(), ProviderEntry { provider, models });
    }

    /// Look up a provider/model pair.
    pub fn resolve(&self, model: &ModelRef) -> ProviderResult<ResolvedModel> {
        self.providers
            .get(&model.provider_id)
            .and_then(|entry| {
                entry.models.get(&model.model_id).map(|info| ResolvedModel {
                    provider: Arc::clone(&entry.provider),
                    info: info.clone(),
                })
            })
            .ok_or_else(|| ProviderError::ModelNotFound {
                provider_id: model.provider_id.clone(),
                model_id: model.model_id.clone(),
            })
    }

    /// Registered provider IDs.
    pub fn provider_ids(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}
