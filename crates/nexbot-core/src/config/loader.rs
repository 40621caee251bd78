//! Configuration loading — file + environment overrides.
//!
//! Precedence: defaults < `~/.nexbot/config.json` < environment.

use std::path::PathBuf;

use tracing::{debug, warn};

use super::schema::Config;
use crate::utils;

/// Default config file location (`~/.nexbot/config.json`).
pub fn default_config_path() -> PathBuf {
    utils::get_data_path().join("config.json")
}

/// Load configuration. A missing file yields defaults; a malformed file
/// logs a warning and yields defaults (the service should still start).
pub fn load_config(path: Option<PathBuf>) -> Config {
    let path = path.unwrap_or_else(default_config_path);

    let mut config = if path.exists() {
        match std::fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str::<Config>(&data) {
                Ok(config) => {
                    debug!(path = %path.display(), "loaded config");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "malformed config, using defaults");
                    Config::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable config, using defaults");
                Config::default()
            }
        }
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config);

    if config.workspace.is_empty() {
        config.workspace = utils::get_default_workspace_path()
            .to_string_lossy()
            .into_owned();
    }
    config
}

/// Environment overrides for deployment without a config file.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(tag) = std::env::var("NEXBOT_PROVIDER") {
        if !tag.is_empty() {
            config.provider = tag;
        }
    }
    if let Ok(key) = std::env::var("NEXBOT_API_KEY") {
        if !key.is_empty() && !config.provider.is_empty() {
            config
                .providers
                .entry(config.provider.clone())
                .or_default()
                .api_key = key;
        }
    }
    if let Ok(workspace) = std::env::var("NEXBOT_WORKSPACE") {
        if !workspace.is_empty() {
            config.workspace = workspace;
        }
    }
}
