//! Step snapshots.
//!
//! The turn loop takes a snapshot when a model step starts and asks for the
//! files changed since then when it finishes. A non-empty change set becomes
//! a `patch` part, which is what a later revert would replay.

use async_trait::async_trait;
use helm_core::messages::Patch;

/// Workspace snapshot source.
#[async_trait]
pub trait Snapshot: Send + Sync {
    /// Record the current state. `None` when snapshots are unavailable.
    async fn track(&self) -> Option<String>;

    /// Files changed since `hash`.
    async fn patch(&self, hash: &str) -> Patch;
}

/// Snapshots disabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSnapshot;

#[async_trait]
impl Snapshot for NoopSnapshot {
    async fn track(&self) -> Option<String> {
        None
    }

    async fn patch(&self, hash: &str) -> Patch {
        Patch {
            hash: hash.to_owned(),
            files: Vec::new(),
        }
    }
}
