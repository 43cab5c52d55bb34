//! # helm-tasks
//!
//! Durable queue of background agent tasks, stored in the same `SQLite`
//! database as messages.
//!
//! - [`types`]: [`BackgroundTask`], [`TaskStatus`], [`NewTask`]
//! - [`repository`]: stateless SQL over a `&Connection`
//! - [`store`]: [`TaskStore`], the pooled entry point with the atomic
//!   claim-next-queued operation

#![deny(unsafe_code)]

pub mod errors;
pub mod migrations;
pub mod repository;
pub mod store;
pub mod types;

pub use errors::TaskError;
pub use store::TaskStore;
pub use types::{BackgroundTask, NewTask, TaskStatus};
