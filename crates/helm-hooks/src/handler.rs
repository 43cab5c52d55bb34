//! Hook handler trait.

use async_trait::async_trait;

use crate::errors::HookError;
use crate::types::{HookContext, HookExecutionMode, HookResult, HookType};

/// A tool hook.
///
/// Higher [`priority`](HookHandler::priority) runs first. `PreToolUse`
/// handlers always run inline regardless of
/// [`execution_mode`](HookHandler::execution_mode).
#[async_trait]
pub trait HookHandler: Send + Sync {
    /// Unique name.
    fn name(&self) -> &str;

    /// Hook point this handler responds to.
    fn hook_type(&self) -> HookType;

    /// Execution priority. Default: 0.
    fn priority(&self) -> i32 {
        0
    }

    /// Preferred execution mode. Default: blocking.
    fn execution_mode(&self) -> HookExecutionMode {
        HookExecutionMode::Blocking
    }

    /// Timeout in milliseconds. Default: 30 s.
    fn timeout_ms(&self) -> Option<u64> {
        None
    }

    /// Run the handler.
    async fn handle(&self, context: &HookContext) -> Result<HookResult, HookError>;

    /// Return `false` to skip this handler for `context`.
    fn should_handle(&self, _context: &HookContext) -> bool {
        true
    }
}
