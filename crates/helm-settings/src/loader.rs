//! Settings loading with deep merge and environment variable overrides.
//!
//! 1. Start with compiled [`HelmSettings::default()`]
//! 2. Deep-merge `~/.helm/settings.json` over it, if present
//! 3. Apply `HELM_*` environment overrides
//!
//! Objects merge per key, arrays and primitives are replaced, and nulls in
//! the file are skipped.

use std::path::{Path, PathBuf};

use helm_core::messages::ModelRef;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::HelmSettings;

/// Path of the user settings file.
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".helm").join("settings.json")
}

/// Load settings from the default path.
pub fn load_settings() -> Result<HelmSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path`, falling back to defaults when it is missing.
pub fn load_settings_from_path(path: &Path) -> Result<HelmSettings> {
    let defaults = serde_json::to_value(HelmSettings::default())?;
    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let user: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: HelmSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides read through `env`.
///
/// Invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut HelmSettings, env: impl Fn(&str) -> Option<String>) {
    let read = |key: &str| env(key).filter(|v| !v.is_empty());

    if let Some(v) = read("HELM_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("HELM_MAX_CONCURRENT_TASKS") {
        match parse_range(&v, 1, 64) {
            Some(n) => settings.background.max_concurrent_tasks = n,
            None => warn!(key = "HELM_MAX_CONCURRENT_TASKS", value = %v, "invalid value, ignoring"),
        }
    }
    if let Some(v) = read("HELM_OUTPUT_TOKEN_MAX") {
        match parse_range(&v, 1_000, 1_000_000) {
            Some(n) => settings.context.output_token_max = n,
            None => warn!(key = "HELM_OUTPUT_TOKEN_MAX", value = %v, "invalid value, ignoring"),
        }
    }
    if let Some(v) = read("HELM_DEFAULT_MODEL") {
        match ModelRef::parse(&v) {
            Some(model) => {
                settings.model.provider_id = model.provider_id;
                settings.model.model_id = model.model_id;
            }
            None => warn!(key = "HELM_DEFAULT_MODEL", value = %v, "expected provider/model, ignoring"),
        }
    }
    if let Some(v) = read("HELM_AUTO_COMPACT") {
        match parse_bool(&v) {
            Some(b) => settings.context.auto_compact = b,
            None => warn!(key = "HELM_AUTO_COMPACT", value = %v, "invalid boolean, ignoring"),
        }
    }
}

/// Parse `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, case-insensitively.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse an integer within `[min, max]`.
pub fn parse_range<T: std::str::FromStr + PartialOrd>(val: &str, min: T, max: T) -> Option<T> {
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
