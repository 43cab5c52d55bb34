//! Hook error types.

use thiserror::Error;

/// Error returned by a [`HookHandler`](crate::HookHandler).
#[derive(Debug, Error)]
pub enum HookError {
    /// The handler failed.
    #[error("hook {name} failed: {message}")]
    Handler {
        /// Handler name.
        name: String,
        /// Failure description.
        message: String,
    },
}
