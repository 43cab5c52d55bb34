//! `SQLite` persistence: pooled connections, versioned migrations, and the
//! JSON-row [`SqliteStore`].

pub mod connection;
pub mod migrations;
mod store;

pub use connection::{ConnectionConfig, ConnectionPool, PooledConnection, new_file, new_in_memory};
pub use migrations::{Migration, run_migrations};
pub use store::SqliteStore;
