//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`WirepoolSettings::default()`]
//! 2. If `~/.wirepool/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{Backpressure, MessageKind, WirepoolSettings};

/// Resolve the path to the settings file (`~/.wirepool/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".wirepool").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<WirepoolSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or values that fail
/// validation are errors.
pub fn load_settings_from_path(path: &Path) -> Result<WirepoolSettings> {
    let defaults = serde_json::to_value(WirepoolSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: WirepoolSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
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
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Integers must parse and fall inside their range; enums accept their
/// lowercase names. Anything else is ignored with a warning.
pub fn apply_env_overrides(settings: &mut WirepoolSettings) {
    let socket = &mut settings.socket;
    if let Some(v) = read_env_u64("WIREPOOL_PONG_WAIT_MS", 10, 3_600_000) {
        socket.pong_wait_ms = v;
    }
    if let Some(v) = read_env_u64("WIREPOOL_WRITE_WAIT_MS", 1, 600_000) {
        socket.write_wait_ms = v;
    }
    if let Some(v) = read_env_usize("WIREPOOL_MAX_MESSAGE_SIZE", 1, 16 * 1024 * 1024) {
        socket.max_message_size = v;
    }
    if let Some(v) = read_env_u64("WIREPOOL_RECONNECT_BACKOFF_MS", 1, 3_600_000) {
        socket.reconnect_backoff_ms = v;
    }
    if let Some(v) = read_env_usize("WIREPOOL_SEND_BUFFER", 1, 1_000_000) {
        socket.send_buffer = v;
    }
    if let Some(v) = read_env_usize("WIREPOOL_BACKLOG_CAPACITY", 0, 1_000_000) {
        socket.backlog_capacity = v;
    }
    if let Some(v) = read_env_parsed("WIREPOOL_BACKPRESSURE", parse_backpressure) {
        socket.backpressure = v;
    }
    if let Some(v) = read_env_parsed("WIREPOOL_MESSAGE_KIND", parse_message_kind) {
        socket.message_kind = v;
    }
    if let Some(v) = read_env_string("WIREPOOL_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a message kind (`text` / `binary`, case-insensitive).
pub fn parse_message_kind(val: &str) -> Option<MessageKind> {
    match val.to_lowercase().as_str() {
        "text" => Some(MessageKind::Text),
        "binary" => Some(MessageKind::Binary),
        _ => None,
    }
}

/// Parse a backpressure policy (`block` / `drop`, case-insensitive).
pub fn parse_backpressure(val: &str) -> Option<Backpressure> {
    match val.to_lowercase().as_str() {
        "block" => Some(Backpressure::Block),
        "drop" => Some(Backpressure::Drop),
        _ => None,
    }
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_parsed<T>(name: &str, parse: fn(&str) -> Option<T>) -> Option<T> {
    let val = std::env::var(name).ok()?;
    let result = parse(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({
            "socket": {"pongWaitMs": 60000, "writeWaitMs": 10000}
        });
        let source = serde_json::json!({
            "socket": {"pongWaitMs": 1000}
        });
        let merged = deep_merge(target, source);
        assert_eq!(merged["socket"]["pongWaitMs"], 1000);
        assert_eq!(merged["socket"]["writeWaitMs"], 10000);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4, 5]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["items"], serde_json::json!([4, 5]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let path = Path::new("/nonexistent/wirepool/settings.json");
        let settings = load_settings_from_path(path).unwrap();
        let defaults = WirepoolSettings::default();
        assert_eq!(settings.version, defaults.version);
        assert_eq!(settings.socket.pong_wait_ms, defaults.socket.pong_wait_ms);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"socket": {"reconnectBackoffMs": 250, "messageKind": "text"}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.socket.reconnect_backoff_ms, 250);
        assert_eq!(settings.socket.message_kind, MessageKind::Text);
        assert_eq!(settings.socket.send_buffer, 256);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"socket": {"sendBuffer": 0}}"#).unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::InvalidValue(_)));
    }

    #[test]
    fn load_rejects_unknown_enum_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"socket": {"backpressure": "sometimes"}}"#).unwrap();

        assert!(load_settings_from_path(&path).is_err());
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_u64_in_range() {
        assert_eq!(parse_u64_range("500", 10, 1000), Some(500));
        assert_eq!(parse_u64_range("10", 10, 1000), Some(10));
        assert_eq!(parse_u64_range("9", 10, 1000), None);
        assert_eq!(parse_u64_range("1001", 10, 1000), None);
        assert_eq!(parse_u64_range("abc", 10, 1000), None);
        assert_eq!(parse_u64_range("-5", 10, 1000), None);
    }

    #[test]
    fn parse_usize_in_range() {
        assert_eq!(parse_usize_range("0", 0, 8), Some(0));
        assert_eq!(parse_usize_range("9", 0, 8), None);
        assert_eq!(parse_usize_range("", 0, 8), None);
    }

    #[test]
    fn parse_message_kind_values() {
        assert_eq!(parse_message_kind("text"), Some(MessageKind::Text));
        assert_eq!(parse_message_kind("BINARY"), Some(MessageKind::Binary));
        assert_eq!(parse_message_kind("json"), None);
    }

    #[test]
    fn parse_backpressure_values() {
        assert_eq!(parse_backpressure("Block"), Some(Backpressure::Block));
        assert_eq!(parse_backpressure("drop"), Some(Backpressure::Drop));
        assert_eq!(parse_backpressure("queue"), None);
    }
}
