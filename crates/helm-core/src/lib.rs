//! # helm-core
//!
//! Foundation types for the Helm agent runtime.
//!
//! - [`ids`]: sortable prefixed identifiers and branded ID newtypes
//! - [`messages`]: sessions, messages, parts, and the tool-part state machine
//! - [`retry`]: retry configuration and backoff math
//! - [`logging`]: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;
pub mod messages;
pub mod retry;

/// Current wall-clock time in Unix milliseconds.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
