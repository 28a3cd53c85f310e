//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every section is `#[serde(default)]`
//! so a partial file only has to name what it changes.

use std::collections::BTreeMap;
use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CrewSettings {
    pub version: String,
    pub model: ModelSettings,
    pub retry: RetrySettings,
    pub agent: AgentSettings,
    pub paths: PathSettings,
    pub logging: LoggingSettings,
}

impl Default for CrewSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            model: ModelSettings::default(),
            retry: RetrySettings::default(),
            agent: AgentSettings::default(),
            paths: PathSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl CrewSettings {
    /// Reject values no component can run with.
    pub fn validate(&self) -> Result<()> {
        if self.agent.max_turns == 0 {
            return Err(SettingsError::InvalidValue(
                "agent.maxTurns must be at least 1".into(),
            ));
        }
        if self.agent.agent_max_turns == 0 {
            return Err(SettingsError::InvalidValue(
                "agent.agentMaxTurns must be at least 1".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(SettingsError::InvalidValue(format!(
                "model.temperature must be within 0.0..=2.0, got {}",
                self.model.temperature
            )));
        }
        if self.agent.action_timeout_secs == Some(0) {
            return Err(SettingsError::InvalidValue(
                "agent.actionTimeoutSecs must be positive when set".into(),
            ));
        }
        Ok(())
    }

    /// The API key, read from the environment variable named in `model.apiKeyEnv`.
    pub fn api_key(&self) -> Option<SecretString> {
        std::env::var(&self.model.api_key_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(SecretString::from)
    }

    pub fn database_path(&self) -> PathBuf {
        expand_home(&self.paths.database)
    }

    pub fn personas_path(&self) -> PathBuf {
        expand_home(&self.paths.personas)
    }
}

/// Generation model parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelSettings {
    pub name: String,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub base_url: String,
    /// Seconds without stream data before the connection is considered dead.
    pub stream_idle_timeout_secs: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            name: "gemini-3-pro-preview".to_string(),
            temperature: 0.3,
            max_output_tokens: None,
            api_key_env: "GOOGLE_API_KEY".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            stream_idle_timeout_secs: 120,
        }
    }
}

/// Retry policy for generation calls.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter_factor: 0.2,
        }
    }
}

/// Loop and dispatcher knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    /// Generation budget for the supervisor loop.
    pub max_turns: u32,
    /// Generation budget for each sub-agent loop.
    pub agent_max_turns: u32,
    /// Per-action timeout inside sub-agents. `None` disables it.
    pub action_timeout_secs: Option<u64>,
    /// When false, every action of a turn runs one after another.
    pub parallel_actions: bool,
    /// Sub-agent tool payloads longer than this are truncated before entering
    /// history. 0 disables truncation.
    pub max_output_chars: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_turns: 25,
            agent_max_turns: 15,
            action_timeout_secs: Some(300),
            parallel_actions: true,
            max_output_chars: 50_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PathSettings {
    pub database: String,
    pub personas: String,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            database: "~/.crew/crew.db".to_string(),
            personas: "config/personas.json".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    /// `pretty` or `json`.
    pub format: String,
    /// Per-module level overrides, e.g. `{"crew_llm": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "pretty".to_string(),
            modules: BTreeMap::new(),
        }
    }
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(rest)
        }
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = CrewSettings::default();
        assert_eq!(s.model.name, "gemini-3-pro-preview");
        assert!((s.model.temperature - 0.3).abs() < f64::EPSILON);
        assert_eq!(s.model.api_key_env, "GOOGLE_API_KEY");
        assert_eq!(s.agent.max_turns, 25);
        assert_eq!(s.agent.agent_max_turns, 15);
        assert!(s.agent.parallel_actions);
        assert_eq!(s.paths.personas, "config/personas.json");
        assert!(s.validate().is_ok());
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(CrewSettings::default()).unwrap();
        assert_eq!(json["agent"]["maxTurns"], 25);
        assert_eq!(json["agent"]["agentMaxTurns"], 15);
        assert_eq!(json["model"]["apiKeyEnv"], "GOOGLE_API_KEY");
        assert!(json["model"].get("maxOutputTokens").is_none());
    }

    #[test]
    fn zero_turn_budget_rejected() {
        let mut s = CrewSettings::default();
        s.agent.max_turns = 0;
        assert!(matches!(s.validate(), Err(SettingsError::InvalidValue(_))));

        let mut s = CrewSettings::default();
        s.agent.agent_max_turns = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn temperature_out_of_range_rejected() {
        let mut s = CrewSettings::default();
        s.model.temperature = 3.5;
        assert!(s.validate().is_err());
    }

    #[test]
    fn zero_action_timeout_rejected() {
        let mut s = CrewSettings::default();
        s.agent.action_timeout_secs = Some(0);
        assert!(s.validate().is_err());
        s.agent.action_timeout_secs = None;
        assert!(s.validate().is_ok());
    }

    #[test]
    fn expand_home_only_touches_tilde_prefix() {
        assert_eq!(expand_home("/var/crew.db"), PathBuf::from("/var/crew.db"));
        assert_eq!(expand_home("rel/crew.db"), PathBuf::from("rel/crew.db"));
        let expanded = expand_home("~/.crew/crew.db");
        assert!(expanded.ends_with(".crew/crew.db"));
        assert!(!expanded.to_string_lossy().starts_with('~'));
    }
}
