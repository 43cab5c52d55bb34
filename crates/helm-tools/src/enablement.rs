//! Per-session enabled deferred tools.
//!
//! A discovery action outside the runtime enables deferred tools for one
//! session. The resolver reads the set on every loop iteration, so a tool
//! enabled mid-conversation shows up on the next model step.

use std::collections::HashSet;

use dashmap::DashMap;
use helm_core::ids::SessionId;

/// Session → enabled deferred tool IDs.
#[derive(Default)]
pub struct ToolEnablement {
    sets: DashMap<SessionId, HashSet<String>>,
}

impl ToolEnablement {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable a tool for a session. Returns `true` if it was not enabled yet.
    pub fn enable(&self, session_id: &SessionId, tool: impl Into<String>) -> bool {
        self.sets
            .entry(session_id.clone())
            .or_default()
            .insert(tool.into())
    }

    /// Disable a tool for a session.
    pub fn disable(&self, session_id: &SessionId, tool: &str) -> bool {
        self.sets
            .get_mut(session_id)
            .is_some_and(|mut set| set.remove(tool))
    }

    /// Whether a tool is enabled for a session.
    pub fn is_enabled(&self, session_id: &SessionId, tool: &str) -> bool {
        self.sets
            .get(session_id)
            .is_some_and(|set| set.contains(tool))
    }

    /// Snapshot of a session's enabled set.
    pub fn enabled(&self, session_id: &SessionId) -> HashSet<String> {
        self.sets
            .get(session_id)
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    /// Forget a session.
    pub fn clear(&self, session_id: &SessionId) {
        let _ = self.sets.remove(session_id);
    }
}
