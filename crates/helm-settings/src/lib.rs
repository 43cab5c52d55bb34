//! # helm-settings
//!
//! Layered configuration: compiled defaults, then `~/.helm/settings.json`,
//! then `HELM_*` environment variables.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings, load_settings_from_path};
pub use types::{
    BackgroundSettings, ContextSettings, HelmSettings, LoggingSettings, ModelSettings,
    ToolSettings,
};
