//! # helm-events
//!
//! In-process event bus and durable message/part storage.
//!
//! - [`bus`]: typed broadcast bus (`session.idle`, `message.part.updated`, ...)
//! - [`store`]: the [`MessageStore`] trait and the in-memory implementation
//! - [`sqlite`]: `SQLite` connection pooling, migrations, and [`SqliteStore`]

#![deny(unsafe_code)]

pub mod bus;
pub mod errors;
pub mod sqlite;
pub mod store;

pub use bus::{BusEvent, EventBus, PermissionRequest};
pub use errors::{Result, StoreError};
pub use sqlite::{ConnectionConfig, ConnectionPool, SqliteStore};
pub use store::{MemoryStore, MessageStore};
