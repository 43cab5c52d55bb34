//! # helm-llm
//!
//! Everything the runtime needs to know about model providers, without any
//! provider implementation:
//!
//! - [`provider`]: the [`Provider`] trait and [`ProviderRegistry`]
//! - [`stream`]: the [`StreamEvent`] vocabulary consumed by the turn loop
//! - [`request`]: provider-agnostic request shapes
//! - [`models`]: context limits and pricing
//! - [`errors`]: [`ProviderError`] and its retry / overflow classification

#![deny(unsafe_code)]

pub mod errors;
pub mod models;
pub mod provider;
pub mod request;
pub mod stream;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use errors::{ProviderError, ProviderResult};
pub use models::{ModelCost, ModelInfo, ModelLimit};
pub use provider::{Provider, ProviderRegistry, ResolvedModel};
pub use request::{ContentBlock, ModelMessage, ModelRequest, ModelRole, ToolDefinition};
pub use stream::{FinishReason, StreamEvent, StreamEventStream, collect_text};
