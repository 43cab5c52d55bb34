//! # helm-runtime
//!
//! The execution core: one conversation loop per session, and a durable
//! scheduler for background agents.
//!
//! - [`lock`]: per-session mutual exclusion with an abort signal
//! - [`agent`]: agent definitions and the built-in catalog
//! - [`orchestrator`]: the prompt loop (tools, streaming, retries, compaction)
//! - [`background`]: background task scheduler and agent manager
//! - [`snapshot`]: step snapshots for patch parts
//! - [`errors`]: [`RuntimeError`]

#![deny(unsafe_code)]

pub mod agent;
pub mod background;
pub mod errors;
pub mod lock;
pub mod orchestrator;
mod processor;
pub mod snapshot;

pub use agent::{AgentCatalog, AgentDefinition, AgentMode, DEFAULT_AGENT};
pub use background::{BackgroundAgentManager, Scheduler, SpawnRequest, TaskRunner};
pub use errors::RuntimeError;
pub use lock::{LockGuard, SessionLock};
pub use orchestrator::{Orchestrator, PromptInput, RuntimeDeps};
pub use snapshot::{NoopSnapshot, Snapshot};
