//! Configuration schema.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case, converted
//! via `#[serde(rename_all = "camelCase")]`. Every section has defaults so
//! a missing or partial config file still yields a runnable setup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─────────────────────────────────────────────
// Root
// ─────────────────────────────────────────────

/// Root configuration — loaded from `~/.nexbot/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Provider selection tag (e.g. `"zai"`, `"openai"`).
    pub provider: String,
    /// Per-tag provider settings (api key, base URL, headers).
    pub providers: HashMap<String, ProviderConfig>,
    /// Workspace directory (bootstrap files, cron store, tool sandbox).
    pub workspace: String,
    pub agent: AgentConfig,
    pub sessions: SessionsConfig,
    pub tools: ToolsConfig,
    pub channels: ChannelsConfig,
    pub cron: CronConfig,
    pub bus: BusConfig,
}

// ─────────────────────────────────────────────
// Providers
// ─────────────────────────────────────────────

/// Settings for one provider tag.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    /// Custom API base URL (overrides the registry default).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Extra HTTP headers to send with each request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_headers: Option<HashMap<String, String>>,
}

impl ProviderConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

// ─────────────────────────────────────────────
// Agent
// ─────────────────────────────────────────────

/// Agent loop settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Model identifier passed to the provider.
    pub model: String,
    /// Maximum tokens to generate per response.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 – 2.0).
    pub temperature: f64,
    /// Timeout applied around each full `process` call, in seconds.
    pub timeout_seconds: u64,
    /// Maximum chat ↔ tool iterations per user message.
    pub max_iterations: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "glm-4.7".to_string(),
            max_tokens: 4096,
            temperature: 0.7,
            timeout_seconds: 30,
            max_iterations: 10,
        }
    }
}

// ─────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────

/// Session store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionsConfig {
    /// Session directory; empty means `~/.nexbot/sessions`.
    pub dir: String,
    /// fsync each appended record.
    pub fsync: bool,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            dir: String::new(),
            fsync: false,
        }
    }
}

// ─────────────────────────────────────────────
// Tools / channels / cron / bus
// ─────────────────────────────────────────────

/// Per-tool enable flags.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    pub spawn: bool,
    pub message: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            spawn: true,
            message: true,
        }
    }
}

/// Channel enable flags, keyed by channel kind.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelsConfig {
    pub enabled: HashMap<String, bool>,
}

impl ChannelsConfig {
    pub fn is_enabled(&self, kind: &str) -> bool {
        self.enabled.get(kind).copied().unwrap_or(false)
    }
}

/// Cron scheduler settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CronConfig {
    pub enabled: bool,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Message bus settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusConfig {
    /// Per-topic buffer capacity.
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.agent.timeout_seconds, 30);
        assert_eq!(config.bus.capacity, 100);
        assert!(config.cron.enabled);
        assert!(config.tools.spawn);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{"provider": "zai", "agent": {"model": "glm-4.7-air"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.provider, "zai");
        assert_eq!(config.agent.model, "glm-4.7-air");
        // Untouched fields keep defaults.
        assert_eq!(config.agent.max_tokens, 4096);
        assert_eq!(config.bus.capacity, 100);
    }

    #[test]
    fn test_camel_case_keys() {
        let json = r#"{
            "agent": {"maxTokens": 1024, "timeoutSeconds": 45, "maxIterations": 5}
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.agent.max_tokens, 1024);
        assert_eq!(config.agent.timeout_seconds, 45);
        assert_eq!(config.agent.max_iterations, 5);
    }

    #[test]
    fn test_provider_configured() {
        let mut pc = ProviderConfig::default();
        assert!(!pc.is_configured());
        pc.api_key = "sk-123".into();
        assert!(pc.is_configured());
    }

    #[test]
    fn test_channel_flags() {
        let json = r#"{"channels": {"enabled": {"telegram": true, "slack": false}}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.channels.is_enabled("telegram"));
        assert!(!config.channels.is_enabled("slack"));
        assert!(!config.channels.is_enabled("discord"));
    }

    #[test]
    fn test_round_trip() {
        let mut config = Config::default();
        config.provider = "zai".into();
        config.providers.insert(
            "zai".into(),
            ProviderConfig {
                api_key: "key".into(),
                api_base: None,
                extra_headers: None,
            },
        );

        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.provider, "zai");
        assert!(back.providers["zai"].is_configured());
    }
}
