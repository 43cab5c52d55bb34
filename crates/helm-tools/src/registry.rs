//! Tool catalog.
//!
//! One map holds every tool; the immediate and deferred pools are views
//! split on [`Tool::deferred`]. Tools may be registered while sessions are
//! running, so the map sits behind a lock.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::traits::Tool;

/// Registry of callable tools, keyed by ID.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same ID.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        debug!(tool = tool.id(), deferred = tool.deferred(), "registering tool");
        let _ = self.tools.write().insert(tool.id().to_owned(), tool);
    }

    /// Remove a tool by ID.
    pub fn remove(&self, id: &str) -> Option<Arc<dyn Tool>> {
        self.tools.write().remove(id)
    }

    /// Look up a tool by ID.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(id).cloned()
    }

    /// Whether a tool with this ID exists.
    pub fn contains(&self, id: &str) -> bool {
        self.tools.read().contains_key(id)
    }

    /// Tools always offered to the model, sorted by ID.
    pub fn immediate(&self) -> Vec<Arc<dyn Tool>> {
        self.pool(false)
    }

    /// Tools offered only once enabled for a session, sorted by ID.
    pub fn deferred(&self) -> Vec<Arc<dyn Tool>> {
        self.pool(true)
    }

    fn pool(&self, deferred: bool) -> Vec<Arc<dyn Tool>> {
        self.tools
            .read()
            .values()
            .filter(|t| t.deferred() == deferred)
            .cloned()
            .collect()
    }

    /// Every registered ID, sorted.
    pub fn ids(&self) -> Vec<String> {
        self.tools.read().keys().cloned().collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}
