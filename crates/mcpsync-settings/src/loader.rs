//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SyncSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `MCPSYNC_*` environment overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::SyncSettings;

/// Directory holding the settings file and the default memory database.
pub fn data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".mcpsync")
}

/// Resolve the path to the settings file (`~/.mcpsync/settings.json`).
pub fn settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<SyncSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid final value
/// is an error.
pub fn load_settings_from_path(path: &Path) -> Result<SyncSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults merged with the settings file, without env overrides.
pub fn load_file_layer(path: &Path) -> Result<SyncSettings> {
    let defaults = serde_json::to_value(SyncSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
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

/// Resolve the memory database path: absolute paths are kept, relative
/// ones land under [`data_dir`].
pub fn resolve_memory_db_path(settings: &SyncSettings) -> PathBuf {
    let configured = PathBuf::from(&settings.memory.db_path);
    if configured.is_absolute() {
        configured
    } else {
        data_dir().join(configured)
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut SyncSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable lookup.
///
/// Each variable has strict parsing rules:
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are ignored with a warning (file/default value stays)
pub fn apply_overrides_from<F>(settings: &mut SyncSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("MCPSYNC_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("MCPSYNC_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.usize("MCPSYNC_MAX_CONNECTIONS", 1, 100_000) {
        settings.server.max_connections = v;
    }
    if let Some(v) = env.u64("MCPSYNC_CONNECTION_TIMEOUT_SECS", 1, 30 * 24 * 60 * 60) {
        settings.server.connection_timeout_secs = v;
    }
    if let Some(v) = env.u64("MCPSYNC_SWEEP_INTERVAL_SECS", 1, 24 * 60 * 60) {
        settings.server.sweep_interval_secs = v;
    }

    // ── Auth ────────────────────────────────────────────────────────
    if let Some(v) = env.string("MCPSYNC_JWT_SECRET") {
        settings.auth.jwt_secret = Some(v);
    }
    if let Some(v) = env.string("MCPSYNC_JWT_ALGORITHM") {
        settings.auth.jwt_algorithm = v.to_uppercase();
    }
    if let Some(v) = env.bool("MCPSYNC_ALLOW_EPHEMERAL_SECRET") {
        settings.auth.allow_ephemeral_secret = v;
    }

    // ── Context / memory ────────────────────────────────────────────
    if let Some(v) = env.u64("MCPSYNC_MAX_BUDGET", 1, u64::MAX) {
        settings.context.max_budget = v;
    }
    if let Some(v) = env.string("MCPSYNC_MEMORY_DB") {
        settings.memory.db_path = v;
    }
    if let Some(v) = env.usize("MCPSYNC_MEMORY_MAX_RECORDS", 1, 10_000_000) {
        settings.memory.max_records = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("MCPSYNC_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("MCPSYNC_LOG_JSON") {
        settings.logging.json = v;
    }
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

// ── Variable readers (thin wrappers) ────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
    }

    fn string(&self, name: &str) -> Option<String> {
        self.raw(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.raw(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = self.raw(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.raw(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = self.raw(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn merge_nested_objects() {
        let target = serde_json::json!({"a": {"b": 1, "c": 2}});
        let source = serde_json::json!({"a": {"c": 3}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"]["b"], 1);
        assert_eq!(merged["a"]["c"], 3);
    }

    #[test]
    fn merge_skips_null() {
        let target = serde_json::json!({"a": 1});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_replaces_arrays() {
        let target = serde_json::json!({"a": [1, 2, 3]});
        let source = serde_json::json!({"a": [4]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], serde_json::json!([4]));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_file_layer(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.server.port, 8765);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"server":{{"port":9100}},"auth":{{"jwtSecret":"s3cret"}},"context":{{"maxBudget":500}}}}"#
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.auth.jwt_secret.as_deref(), Some("s3cret"));
        assert_eq!(settings.context.max_budget, 500);
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_file_layer(&path).is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut settings = SyncSettings::default();
        apply_overrides_from(
            &mut settings,
            lookup(&[
                ("MCPSYNC_PORT", "9999"),
                ("MCPSYNC_JWT_SECRET", "from-env"),
                ("MCPSYNC_JWT_ALGORITHM", "hs384"),
                ("MCPSYNC_MAX_BUDGET", "1234"),
                ("MCPSYNC_MEMORY_DB", "/var/lib/mcpsync/mem.db"),
                ("MCPSYNC_LOG_JSON", "yes"),
            ]),
        );
        assert_eq!(settings.server.port, 9999);
        assert_eq!(settings.auth.jwt_secret.as_deref(), Some("from-env"));
        assert_eq!(settings.auth.jwt_algorithm, "HS384");
        assert_eq!(settings.context.max_budget, 1234);
        assert_eq!(settings.memory.db_path, "/var/lib/mcpsync/mem.db");
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_env_values_ignored() {
        let mut settings = SyncSettings::default();
        apply_overrides_from(
            &mut settings,
            lookup(&[
                ("MCPSYNC_PORT", "not-a-port"),
                ("MCPSYNC_MAX_BUDGET", "0"),
                ("MCPSYNC_ALLOW_EPHEMERAL_SECRET", "maybe"),
                ("MCPSYNC_JWT_SECRET", ""),
            ]),
        );
        assert_eq!(settings.server.port, 8765);
        assert_eq!(settings.context.max_budget, 100_000);
        assert!(!settings.auth.allow_ephemeral_secret);
        assert!(settings.auth.jwt_secret.is_none());
    }

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "TRUE", "1", "yes", "On"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("80", 1, 100), Some(80));
        assert_eq!(parse_u16_range("0", 1, 100), None);
        assert_eq!(parse_u64_range("300", 1, 600), Some(300));
        assert_eq!(parse_u64_range("-1", 1, 600), None);
        assert_eq!(parse_usize_range("5", 1, 4), None);
    }

    #[test]
    fn relative_memory_path_resolves_under_data_dir() {
        let settings = SyncSettings::default();
        let path = resolve_memory_db_path(&settings);
        assert!(path.ends_with(".mcpsync/memory.db"));

        let mut absolute = SyncSettings::default();
        absolute.memory.db_path = "/srv/mem.db".into();
        assert_eq!(resolve_memory_db_path(&absolute), PathBuf::from("/srv/mem.db"));
    }
}
