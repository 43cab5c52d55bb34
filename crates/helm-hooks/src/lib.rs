//! # helm-hooks
//!
//! Hook points around tool execution. A pre-tool hook may veto a call or
//! rewrite its arguments; a post-tool hook observes the result.
//!
//! Handlers run in priority order (highest first). Handler errors and
//! timeouts never stop a call: they are logged and treated as `Continue`.

#![deny(unsafe_code)]

pub mod engine;
pub mod errors;
pub mod handler;
pub mod registry;
pub mod types;

pub use engine::HookEngine;
pub use errors::HookError;
pub use handler::HookHandler;
pub use registry::HookRegistry;
pub use types::{HookAction, HookContext, HookExecutionMode, HookResult, HookType};
