//! Hook execution engine.
//!
//! Blocking handlers run sequentially in priority order:
//! - `Block` stops the chain and is returned as-is.
//! - `Modify` merges its argument overrides and continues.
//! - `Continue` continues.
//!
//! Background handlers are spawned and tracked so callers can drain them.
//! Finished ones are reaped whenever new ones are spawned.

use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use crate::handler::HookHandler;
use crate::registry::HookRegistry;
use crate::types::{HookAction, HookContext, HookExecutionMode, HookResult};

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Runs the handlers registered for a hook point.
pub struct HookEngine {
    registry: HookRegistry,
    background: Mutex<JoinSet<()>>,
}

impl HookEngine {
    /// Create an engine over `registry`.
    #[must_use]
    pub fn new(registry: HookRegistry) -> Self {
        Self {
            registry,
            background: Mutex::new(JoinSet::new()),
        }
    }

    /// Engine with no handlers.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(HookRegistry::new())
    }

    /// Run every handler for `context` and aggregate the outcome.
    #[instrument(skip_all, fields(hook_type = %context.hook_type(), tool = context.tool()))]
    pub async fn execute(&self, context: &HookContext) -> HookResult {
        let hook_type = context.hook_type();
        let handlers: Vec<_> = self
            .registry
            .get_handlers(hook_type)
            .into_iter()
            .filter(|h| h.should_handle(context))
            .collect();
        if handlers.is_empty() {
            return HookResult::continue_();
        }

        let (blocking, background): (Vec<_>, Vec<_>) = handlers.into_iter().partition(|h| {
            hook_type.is_forced_blocking() || h.execution_mode() == HookExecutionMode::Blocking
        });

        let mut modifications: Option<Value> = None;
        for handler in &blocking {
            let result = Self::run_one(handler.as_ref(), context).await;
            match result.action {
                HookAction::Block => {
                    debug!(name = %handler.name(), reason = result.reason.as_deref().unwrap_or("(none)"), "hook blocked call");
                    return result;
                }
                HookAction::Modify => {
                    if let Some(mods) = result.modifications {
                        modifications = Some(merge_json(modifications.take(), mods));
                    }
                }
                HookAction::Continue => {}
            }
        }

        if !background.is_empty() {
            let mut set = self.background.lock();
            reap_finished(&mut set);
            for handler in background {
                let context = context.clone();
                let _ = set.spawn(async move {
                    let _ = Self::run_one(handler.as_ref(), &context).await;
                });
            }
        }

        modifications.map_or_else(HookResult::continue_, HookResult::modify)
    }

    async fn run_one(handler: &dyn HookHandler, context: &HookContext) -> HookResult {
        let timeout_ms = handler.timeout_ms().unwrap_or(DEFAULT_TIMEOUT_MS);
        match tokio::time::timeout(Duration::from_millis(timeout_ms), handler.handle(context)).await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(name = %handler.name(), error = %e, "hook handler error (fail-open)");
                HookResult::continue_()
            }
            Err(_) => {
                warn!(name = %handler.name(), timeout_ms, "hook handler timed out (fail-open)");
                HookResult::continue_()
            }
        }
    }

    /// Wait for every spawned background handler.
    pub async fn drain_background(&self) {
        let mut set = std::mem::take(&mut *self.background.lock());
        while let Some(result) = set.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "background hook panicked");
            }
        }
    }

    /// Background handlers spawned and not yet reaped.
    #[must_use]
    pub fn background_len(&self) -> usize {
        self.background.lock().len()
    }

    /// The registry this engine runs.
    #[must_use]
    pub fn registry(&self) -> &HookRegistry {
        &self.registry
    }
}

impl Default for HookEngine {
    fn default() -> Self {
        Self::empty()
    }
}

fn reap_finished(set: &mut JoinSet<()>) {
    while let Some(result) = set.try_join_next() {
        if let Err(e) = result {
            warn!(error = %e, "background hook panicked");
        }
    }
}

/// Apply `source` fields over `target`; non-object sources replace.
fn merge_json(target: Option<Value>, source: Value) -> Value {
    match (target, source) {
        (Some(Value::Object(mut target)), Value::Object(source)) => {
            for (key, value) in source {
                let _ = target.insert(key, value);
            }
            Value::Object(target)
        }
        (_, source) => source,
    }
}

/// Apply a `Modify` result to tool arguments.
#[must_use]
pub fn apply_modifications(args: Value, result: &HookResult) -> Value {
    match &result.modifications {
        Some(mods) if result.action == HookAction::Modify => merge_json(Some(args), mods.clone()),
        _ => args,
    }
}
