//! Task queue errors.

use helm_events::StoreError;

/// Errors from the task queue.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// `SQLite` error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Schema setup failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// No task with this ID.
    #[error("task not found: {0}")]
    NotFound(String),
}

impl TaskError {
    /// Not-found error for `id`.
    #[must_use]
    pub fn not_found(id: impl std::fmt::Display) -> Self {
        Self::NotFound(id.to_string())
    }
}
