//! Settings loading with deep merge and environment overrides.
//!
//! Merge rules:
//! - objects merge recursively, source winning per key
//! - arrays and primitives are replaced by the source
//! - nulls in the source are skipped

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::CrewSettings;

/// `~/.crew`
pub fn crew_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".crew")
}

pub fn settings_path() -> PathBuf {
    crew_dir().join("settings.json")
}

/// Load from the default path with env overrides.
pub fn load_settings() -> Result<CrewSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path` with env overrides. A missing file yields defaults;
/// invalid JSON or an invalid final value is an error.
pub fn load_settings_from_path(path: &Path) -> Result<CrewSettings> {
    let defaults = serde_json::to_value(CrewSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: CrewSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

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
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

pub fn apply_env_overrides(settings: &mut CrewSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply `CREW_*` overrides read through `lookup`. Invalid values are
/// logged and ignored.
pub fn apply_overrides<F>(settings: &mut CrewSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("CREW_MODEL") {
        settings.model.name = v;
    }
    if let Some(v) = env.parsed("CREW_TEMPERATURE", |s| parse_f64_range(s, 0.0, 2.0)) {
        settings.model.temperature = v;
    }
    if let Some(v) = env.parsed("CREW_MAX_TURNS", |s| parse_u32_range(s, 1, 1000)) {
        settings.agent.max_turns = v;
    }
    if let Some(v) = env.parsed("CREW_AGENT_MAX_TURNS", |s| parse_u32_range(s, 1, 1000)) {
        settings.agent.agent_max_turns = v;
    }
    if let Some(v) = env.parsed("CREW_ACTION_TIMEOUT_SECS", |s| parse_u64_range(s, 1, 86_400)) {
        settings.agent.action_timeout_secs = Some(v);
    }
    if let Some(v) = env.parsed("CREW_PARALLEL_ACTIONS", parse_bool) {
        settings.agent.parallel_actions = v;
    }
    if let Some(v) = env.string("CREW_DATABASE") {
        settings.paths.database = v;
    }
    if let Some(v) = env.string("CREW_PERSONAS") {
        settings.paths.personas = v;
    }
    if let Some(v) = env.string("CREW_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("CREW_LOG_FORMAT", parse_log_format) {
        settings.logging.format = v;
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(val.trim());
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid env override, ignoring");
        }
        result
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Accepts (case-insensitive) `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.parse().ok()?;
    (n.is_finite() && n >= min && n <= max).then_some(n)
}

fn parse_log_format(val: &str) -> Option<String> {
    let lower = val.to_lowercase();
    matches!(lower.as_str(), "json" | "pretty").then_some(lower)
}
