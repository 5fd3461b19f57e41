//! Settings resolution with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`CxdbHookSettings::default()`]
//! 2. Normalize the host's module config keys to camelCase and deep-merge
//!    them over the defaults
//! 3. Apply `CXDB_*` environment variable overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{CxdbHookSettings, DedupMode, EventRecordShape};

/// Resolve settings from the host config and the process environment.
pub fn load_settings(config: &Value) -> Result<CxdbHookSettings> {
    load_settings_with_env(config, |name| std::env::var(name).ok())
}

/// Resolve settings with an explicit environment lookup.
pub fn load_settings_with_env<F>(config: &Value, env: F) -> Result<CxdbHookSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(CxdbHookSettings::default())?;
    let merged = match config {
        Value::Object(_) => deep_merge(defaults, normalize_keys(config.clone())),
        Value::Null => defaults,
        other => {
            return Err(SettingsError::InvalidValue(format!(
                "hook config must be an object, got {other}"
            )));
        }
    };

    let mut settings: CxdbHookSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, env);
    validate(&settings)?;
    debug!(
        host = %settings.cxdb_host,
        port = settings.cxdb_port,
        dedup = ?settings.dedup_mode,
        shape = ?settings.event_record_shape,
        "resolved CXDB hook settings"
    );
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// `cxdb_host` → `cxdbHost`. Keys without underscores pass through.
fn camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for ch in key.chars() {
        if ch == '_' {
            upper = !out.is_empty();
        } else if upper {
            out.extend(ch.to_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Rewrite top-level keys to camelCase so both spellings merge onto the
/// same default key. Private keys (leading `_`) are dropped.
fn normalize_keys(config: Value) -> Value {
    match config {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, _)| !k.starts_with('_'))
                .map(|(k, v)| (camel_case(&k), v))
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    }
}

fn validate(settings: &CxdbHookSettings) -> Result<()> {
    if settings.cxdb_port == 0 {
        return Err(SettingsError::InvalidValue(
            "cxdbPort must be non-zero".into(),
        ));
    }
    if settings.cxdb_http_port == 0 {
        return Err(SettingsError::InvalidValue(
            "cxdbHttpPort must be non-zero".into(),
        ));
    }
    if settings.buffer_size == 0 {
        return Err(SettingsError::InvalidValue(
            "bufferSize must be at least 1".into(),
        ));
    }
    for (name, value) in [
        ("connectTimeoutSeconds", settings.connect_timeout_seconds),
        ("flushTimeoutSeconds", settings.flush_timeout_seconds),
    ] {
        if !value.is_finite() || value <= 0.0 {
            return Err(SettingsError::InvalidValue(format!(
                "{name} must be a positive number, got {value}"
            )));
        }
    }
    Ok(())
}

/// Apply `CXDB_*` environment overrides.
///
/// Values are parsed strictly; anything unparseable or out of range is
/// ignored with a warning and the merged value stays in effect.
pub fn apply_env_overrides<F>(settings: &mut CxdbHookSettings, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| env(name).filter(|v| !v.is_empty());

    if let Some(v) = read("CXDB_HOST") {
        settings.cxdb_host = v;
    }
    if let Some(v) = read_with(&read, "CXDB_PORT", |v| parse_u16_range(v, 1, 65535)) {
        settings.cxdb_port = v;
    }
    if let Some(v) = read_with(&read, "CXDB_HTTP_PORT", |v| parse_u16_range(v, 1, 65535)) {
        settings.cxdb_http_port = v;
    }
    if let Some(v) = read_with(&read, "CXDB_CONNECT_TIMEOUT", parse_positive_f64) {
        settings.connect_timeout_seconds = v;
    }
    if let Some(v) = read_with(&read, "CXDB_FLUSH_TIMEOUT", parse_positive_f64) {
        settings.flush_timeout_seconds = v;
    }
    if let Some(v) = read_with(&read, "CXDB_BUFFER_SIZE", |v| {
        parse_usize_range(v, 1, 10_000_000)
    }) {
        settings.buffer_size = v;
    }
    if let Some(v) = read_with(&read, "CXDB_PRIORITY", |v| v.parse::<i32>().ok()) {
        settings.priority = v;
    }
    if let Some(v) = read_with(&read, "CXDB_DEDUP_MODE", parse_enum::<DedupMode>) {
        settings.dedup_mode = v;
    }
    if let Some(v) = read_with(&read, "CXDB_EVENT_RECORD_SHAPE", parse_enum::<EventRecordShape>) {
        settings.event_record_shape = v;
    }
    if let Some(v) = read_with(&read, "CXDB_PUBLISH_REGISTRY", parse_bool) {
        settings.publish_registry = v;
    }
}

fn read_with<R, T>(read: &R, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T>
where
    R: Fn(&str) -> Option<String>,
{
    let val = read(name)?;
    let result = parse(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid env var, ignoring");
    }
    result
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a finite, strictly positive float.
pub fn parse_positive_f64(val: &str) -> Option<f64> {
    let n: f64 = val.parse().ok()?;
    (n.is_finite() && n > 0.0).then_some(n)
}

fn parse_enum<T: serde::de::DeserializeOwned>(val: &str) -> Option<T> {
    serde_json::from_value(Value::String(val.to_string())).ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
