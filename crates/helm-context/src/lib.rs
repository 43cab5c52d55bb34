//! # helm-context
//!
//! Keeps a conversation inside the model's context window.
//!
//! - [`estimator`]: chars/4 token estimate and the overflow test
//! - [`history`]: model history assembled from the latest checkpoint
//! - [`compaction`]: summary checkpoints written by a dedicated model call
//! - [`prune`]: incremental summarization of old tool outputs
//!
//! Compaction and pruning are independent. Compaction replaces history with
//! a single checkpoint message; pruning shrinks old tool outputs in place and
//! stamps them with a compaction time.

#![deny(unsafe_code)]

pub mod compaction;
pub mod constants;
pub mod errors;
pub mod estimator;
pub mod history;
pub mod prune;

#[cfg(test)]
mod fixtures;

pub use compaction::Compactor;
pub use errors::ContextError;
pub use estimator::{OverflowPolicy, estimate_tokens, is_overflow};
pub use history::{checkpoint_index, to_model_messages};
pub use prune::{
    ModelOutputSummarizer, PrunePolicy, PruneReport, Pruner, ToolOutputSummarizer, select_prunable,
};
