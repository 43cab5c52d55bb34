//! Provider error classification.
//!
//! The turn loop branches on three questions: is the error worth retrying,
//! did the request overflow the context window, and did authentication fail.

use thiserror::Error;

/// Result type alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Provider message fragments that indicate a context-length rejection.
const OVERFLOW_PATTERNS: &[&str] = &[
    "prompt is too long",
    "context length",
    "context window",
    "maximum context",
    "too many tokens",
    "input is too long",
];

/// Errors that can occur during provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Connection failed or timed out.
    #[error("network error: {message}")]
    Network {
        /// Error description.
        message: String,
    },

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Authentication failed.
    #[error("auth error: {message}")]
    Auth {
        /// Error description.
        message: String,
    },

    /// Rate limited by the provider.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Suggested retry delay in milliseconds.
        retry_after_ms: Option<u64>,
        /// Error description.
        message: String,
    },

    /// The request does not fit the model's context window.
    #[error("context overflow: {message}")]
    ContextOverflow {
        /// Error description.
        message: String,
    },

    /// Provider returned an API error.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error description.
        message: String,
        /// Whether the provider marked this as retryable.
        retryable: bool,
    },

    /// No provider or model is registered under the requested IDs.
    #[error("model not found: {provider_id}/{model_id}")]
    ModelNotFound {
        /// Provider ID.
        provider_id: String,
        /// Model ID.
        model_id: String,
    },

    /// Stream was cancelled.
    #[error("stream cancelled")]
    Cancelled,

    /// Anything else.
    #[error("{message}")]
    Other {
        /// Error description.
        message: String,
    },
}

impl ProviderError {
    /// Whether a retry with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::RateLimited { .. } => true,
            Self::Api {
                status, retryable, ..
            } => *retryable || *status == 429 || *status >= 500,
            Self::Json(_)
            | Self::Auth { .. }
            | Self::ContextOverflow { .. }
            | Self::ModelNotFound { .. }
            | Self::Cancelled
            | Self::Other { .. } => false,
        }
    }

    /// Whether the provider rejected the request as too long.
    pub fn is_context_overflow(&self) -> bool {
        match self {
            Self::ContextOverflow { .. } => true,
            Self::Api {
                status, message, ..
            } if *status == 400 || *status == 413 => {
                let lower = message.to_lowercase();
                OVERFLOW_PATTERNS.iter().any(|p| lower.contains(p))
            }
            _ => false,
        }
    }

    /// Server-suggested retry delay.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }

    /// Error category string for logs and events.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Json(_) => "parse",
            Self::Auth { .. } => "auth",
            Self::RateLimited { .. } => "rate_limit",
            Self::ContextOverflow { .. } => "context_overflow",
            Self::Api { .. } => "api",
            Self::ModelNotFound { .. } => "model_not_found",
            Self::Cancelled => "cancelled",
            Self::Other { .. } => "unknown",
        }
    }
}
