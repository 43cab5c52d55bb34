//! Background agents.
//!
//! - [`scheduler`]: starts queued tasks under a concurrency limit and
//!   settles their terminal status
//! - [`manager`]: spawns, cancels and awaits background agents, and runs
//!   each task as a prompt in its own session under a token budget
//! - [`tools`]: `background_agent` / `background_result` tools for the model

pub mod manager;
pub mod scheduler;
pub mod tools;

pub use manager::{BackgroundAgentManager, SpawnRequest};
pub use scheduler::{Scheduler, TaskRunner};
pub use tools::{BackgroundAgentTool, BackgroundResultTool};
