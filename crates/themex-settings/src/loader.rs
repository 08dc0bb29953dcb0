//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ThemexSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `THEMEX_*` environment overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{EmbeddingProviderKind, ThemexSettings};

/// Resolve the path to the settings file (`~/.themex/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".themex").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ThemexSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; malformed JSON or an invalid value is an
/// error.
pub fn load_settings_from_path(path: &Path) -> Result<ThemexSettings> {
    load_with(path, |key| std::env::var(key).ok())
}

/// Like [`load_settings_from_path`] but with an injectable environment.
pub fn load_with<F>(path: &Path, env: F) -> Result<ThemexSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(ThemexSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ThemexSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
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

/// Apply `THEMEX_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut ThemexSettings) {
    apply_overrides(settings, |key| std::env::var(key).ok());
}

/// Apply overrides read through `env`.
///
/// Integers must parse and fall within range, booleans accept
/// `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`. Anything else is logged
/// and ignored.
pub fn apply_overrides<F>(settings: &mut ThemexSettings, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let reader = EnvReader { env };

    // ── Embedding ───────────────────────────────────────────────────
    if let Some(v) = reader.string("THEMEX_EMBEDDING_PROVIDER") {
        match parse_provider(&v) {
            Some(kind) => settings.embedding.provider = kind,
            None => tracing::warn!(key = "THEMEX_EMBEDDING_PROVIDER", value = %v, "unknown provider, ignoring"),
        }
    }
    if let Some(v) = reader.string("THEMEX_EMBEDDING_MODEL") {
        settings.embedding.model = v;
    }
    if let Some(v) = reader.string("THEMEX_EMBEDDING_URL") {
        settings.embedding.local_url = v;
    }
    if let Some(v) = reader.usize("THEMEX_EMBEDDING_BATCH_SIZE", 1, 2_048) {
        settings.embedding.batch_size = v;
    }
    if let Some(v) = reader.usize("THEMEX_EMBEDDING_DIMENSIONS", 1, 16_384) {
        settings.embedding.dimensions = v;
    }

    // ── Assistant ───────────────────────────────────────────────────
    if let Some(v) = reader.bool("THEMEX_ASSISTANT_ENABLED") {
        settings.assistant.enabled = v;
    }
    if let Some(v) = reader.string("THEMEX_ASSISTANT_URL") {
        settings.assistant.base_url = v;
    }
    if let Some(v) = reader.string("THEMEX_ASSISTANT_MODEL") {
        settings.assistant.model = v;
    }

    // ── Run limits ──────────────────────────────────────────────────
    if let Some(v) = reader.u64("THEMEX_AI_CALL_BUDGET", 0, 10_000) {
        settings.run.ai_call_budget = v as u32;
    }
    if let Some(v) = reader.u64("THEMEX_RUN_TIMEOUT_SECS", 1, 86_400) {
        settings.run.timeout_secs = v;
    }
    if let Some(v) = reader.u64("THEMEX_SEED", 0, u64::MAX) {
        settings.run.seed = v;
    }

    // ── Cache ───────────────────────────────────────────────────────
    if let Some(v) = reader.bool("THEMEX_SEMANTIC_CACHE_ENABLED") {
        settings.cache.semantic_enabled = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = reader.string("THEMEX_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = reader.bool("THEMEX_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn parse_provider(val: &str) -> Option<EmbeddingProviderKind> {
    match val.to_lowercase().as_str() {
        "local" | "tei" => Some(EmbeddingProviderKind::Local),
        "openai" | "remote" => Some(EmbeddingProviderKind::OpenAi),
        "hash" => Some(EmbeddingProviderKind::Hash),
        _ => None,
    }
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct EnvReader<F> {
    env: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.env)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = self.string(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"cache": {"semanticCapacity": 1000, "semanticEnabled": true}});
        let source = serde_json::json!({"cache": {"semanticCapacity": 50}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["cache"]["semanticCapacity"], 50);
        assert_eq!(merged["cache"]["semanticEnabled"], true);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1});
        let source = serde_json::json!({"a": null});
        assert_eq!(deep_merge(target, source)["a"], 1);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── loading ─────────────────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let s = load_with(Path::new("/nonexistent/settings.json"), no_env).unwrap();
        assert_eq!(s.run.ai_call_budget, 20);
        assert_eq!(s.embedding.batch_size, 32);
    }

    #[test]
    fn partial_file_overrides_deeply() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"pipelines": {"saturation": {"permutations": 20}}, "embedding": {"provider": "hash"}}"#,
        )
        .unwrap();

        let s = load_with(&path, no_env).unwrap();
        assert_eq!(s.pipelines.saturation.permutations, 20);
        assert_eq!(s.pipelines.saturation.window, 5);
        assert_eq!(s.embedding.provider, EmbeddingProviderKind::Hash);
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(load_with(&path, no_env), Err(SettingsError::Json(_))));
    }

    #[test]
    fn invalid_value_in_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"pipelines": {"survey": {"iciThreshold": 2.0}}}"#).unwrap();
        assert!(matches!(
            load_with(&path, no_env),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_beats_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"run": {"aiCallBudget": 5}}"#).unwrap();

        let s = load_with(&path, env_of(&[("THEMEX_AI_CALL_BUDGET", "9")])).unwrap();
        assert_eq!(s.run.ai_call_budget, 9);
    }

    #[test]
    fn invalid_env_values_ignored() {
        let mut s = ThemexSettings::default();
        apply_overrides(
            &mut s,
            env_of(&[
                ("THEMEX_EMBEDDING_BATCH_SIZE", "0"),
                ("THEMEX_ASSISTANT_ENABLED", "maybe"),
                ("THEMEX_EMBEDDING_PROVIDER", "carrier-pigeon"),
            ]),
        );
        assert_eq!(s.embedding.batch_size, 32);
        assert!(s.assistant.enabled);
        assert_eq!(s.embedding.provider, EmbeddingProviderKind::Local);
    }

    #[test]
    fn env_overrides_applied() {
        let mut s = ThemexSettings::default();
        apply_overrides(
            &mut s,
            env_of(&[
                ("THEMEX_EMBEDDING_PROVIDER", "openai"),
                ("THEMEX_ASSISTANT_ENABLED", "off"),
                ("THEMEX_SEED", "1234"),
                ("THEMEX_LOG_JSON", "yes"),
                ("THEMEX_SEMANTIC_CACHE_ENABLED", "0"),
            ]),
        );
        assert_eq!(s.embedding.provider, EmbeddingProviderKind::OpenAi);
        assert!(!s.assistant.enabled);
        assert_eq!(s.run.seed, 1234);
        assert!(s.logging.json);
        assert!(!s.cache.semantic_enabled);
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_values() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u64_range("10", 1, 100), Some(10));
        assert_eq!(parse_u64_range("101", 1, 100), None);
        assert_eq!(parse_usize_range(" 7 ", 1, 10), Some(7));
        assert_eq!(parse_usize_range("-1", 0, 10), None);
    }
}
