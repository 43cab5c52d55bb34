//! # helm-tools
//!
//! Everything between "the model asked for a tool" and "the tool ran":
//!
//! - [`traits`]: the [`Tool`] trait and its execution context
//! - [`registry`]: immediate and deferred tool pools
//! - [`enablement`]: per-session set of enabled deferred tools
//! - [`resolver`]: per-turn visible tool set from rules and overrides
//! - [`executor`]: visibility check, hook pipeline, cancellable execution
//! - [`doom_loop`]: repeated identical call detection
//! - [`approval`]: suspend points awaiting an external decision

#![deny(unsafe_code)]

pub mod approval;
pub mod doom_loop;
pub mod enablement;
pub mod errors;
pub mod executor;
pub mod registry;
pub mod resolver;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

pub use approval::{ApprovalDecision, ApprovalGate};
pub use enablement::ToolEnablement;
pub use errors::ToolError;
pub use executor::{ToolCallRequest, ToolExecutor};
pub use registry::ToolRegistry;
pub use resolver::{ResolvedTools, ToolResolver, ToolRules};
pub use traits::{Tool, ToolContext, ToolOutput};
