//! Context errors.

use helm_core::ids::SessionId;
use helm_events::StoreError;
use helm_llm::ProviderError;

/// Errors from compaction and pruning.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// Persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The summarize call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The session has no user message to summarize.
    #[error("session {session_id} has nothing to compact")]
    NothingToCompact {
        /// Session.
        session_id: SessionId,
    },

    /// The model returned an empty summary.
    #[error("compaction produced an empty summary")]
    EmptySummary,

    /// Aborted by the caller.
    #[error("compaction aborted")]
    Cancelled,
}

impl ContextError {
    /// Whether the underlying provider reported a context-length rejection.
    #[must_use]
    pub fn is_context_overflow(&self) -> bool {
        matches!(self, Self::Provider(e) if e.is_context_overflow())
    }
}
