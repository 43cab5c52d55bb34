//! Hook registry.
//!
//! Handlers are bucketed by [`HookType`] and kept sorted by priority,
//! highest first. Equal priorities keep registration order.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::handler::HookHandler;
use crate::types::HookType;

/// Registry of hook handlers.
#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<HookType, Vec<Arc<dyn HookHandler>>>,
}

impl HookRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any handler of the same name and type.
    pub fn register(&mut self, handler: Arc<dyn HookHandler>) {
        let hook_type = handler.hook_type();
        let handlers = self.hooks.entry(hook_type).or_default();
        handlers.retain(|h| h.name() != handler.name());
        debug!(name = %handler.name(), hook_type = %hook_type, priority = handler.priority(), "registering hook");
        handlers.push(handler);
        // Stable sort keeps registration order within a priority.
        handlers.sort_by_key(|h| std::cmp::Reverse(h.priority()));
    }

    /// Remove a handler by name from every bucket.
    pub fn unregister(&mut self, name: &str) -> bool {
        let mut found = false;
        for handlers in self.hooks.values_mut() {
            let before = handlers.len();
            handlers.retain(|h| h.name() != name);
            found |= handlers.len() < before;
        }
        found
    }

    /// Handlers for `hook_type`, highest priority first.
    #[must_use]
    pub fn get_handlers(&self, hook_type: HookType) -> Vec<Arc<dyn HookHandler>> {
        self.hooks.get(&hook_type).cloned().unwrap_or_default()
    }

    /// Total number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.values().map(Vec::len).sum()
    }

    /// Whether no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
