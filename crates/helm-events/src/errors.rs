//! Error types for message persistence.

use thiserror::Error;

/// Errors returned by [`MessageStore`](crate::MessageStore) implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Which migration failed and why.
        message: String,
    },

    /// A message referenced by ID does not exist.
    #[error("message not found: {0}")]
    MessageNotFound(String),
}

/// Convenience alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;
