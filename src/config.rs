//! Runtime configuration
//!
//! Loaded once at startup from a YAML file. Every section and field has a
//! default, so a missing file or a partial one is fine.

use crate::CONSOLE_TARGET;
use crate::model::{Server, SteamId};
use crate::warning::EscalationSettings;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "config/gamewarden.yaml";
/// Overrides the config file location
pub const CONFIG_PATH_ENV: &str = "GAMEWARDEN_CONFIG";
/// Overrides `discord.token`
pub const TOKEN_ENV: &str = "DISCORD_TOKEN";

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub warnings: EscalationSettings,
    pub actions: ActionConfig,
    pub rcon: RconConfig,
    pub events: EventConfig,
    pub discord: DiscordConfig,
    pub filter: FilterConfig,
    /// Servers loaded into the in-memory store at startup
    pub servers: Vec<Server>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Author of automated actions
    pub owner: Option<SteamId>,
    /// Glob of log files to replay instead of live input
    pub replay_logs: Option<String>,
    /// Server the replayed lines are attributed to
    pub replay_server: Option<String>,
    pub ban_sweep_interval_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            owner: None,
            replay_logs: None,
            replay_server: None,
            ban_sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    pub queue_capacity: usize,
    /// Bound on a single handler run
    pub timeout_secs: u64,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            timeout_secs: 30,
        }
    }
}

impl ActionConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RconConfig {
    pub dial_timeout_secs: u64,
    pub server_timeout_secs: u64,
}

impl Default for RconConfig {
    fn default() -> Self {
        Self {
            dial_timeout_secs: 10,
            server_timeout_secs: 20,
        }
    }
}

impl RconConfig {
    #[must_use]
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    #[must_use]
    pub fn server_timeout(&self) -> Duration {
        Duration::from_secs(self.server_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Raw log line queue
    pub log_queue_capacity: usize,
    /// Per consumer event queue
    pub consumer_queue_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            log_queue_capacity: 50,
            consumer_queue_capacity: 100,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub enabled: bool,
    pub token: Option<String>,
    /// Channel that receives in-game chat
    pub relay_channel_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub enabled: bool,
    /// Patterns seeded into the store at startup
    pub words: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            words: Vec::new(),
        }
    }
}

impl Config {
    /// Load from `GAMEWARDEN_CONFIG` or the default path and apply env overrides
    ///
    /// # Errors
    /// Returns a `ConfigError` if the file exists but cannot be read or parsed,
    /// or if the result fails validation.
    pub async fn load() -> Result<Self, ConfigError> {
        let path = env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::load_from(&path).await?;

        if let Ok(token) = env::var(TOKEN_ENV) {
            if !token.trim().is_empty() {
                config.discord.token = Some(token);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Load from a specific file. A missing file yields the defaults.
    ///
    /// # Errors
    /// Returns a `ConfigError` if the file cannot be read or parsed.
    pub async fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                info!(target: CONSOLE_TARGET, path = %path.display(), "Loaded config");
                Self::from_yaml(&content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(target: CONSOLE_TARGET, path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// # Errors
    /// Returns `ConfigError::Yaml` for malformed documents
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Check cross-field requirements
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the first problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.warnings.limit == 0 {
            return Err(ConfigError::Invalid("warnings.limit must be at least 1".to_string()));
        }
        if self.filter.enabled && self.general.owner.is_none() {
            return Err(ConfigError::Invalid(
                "general.owner is required when the word filter is enabled".to_string(),
            ));
        }
        if self.discord.enabled && self.discord.token.is_none() {
            return Err(ConfigError::Invalid(format!(
                "discord.token or {TOKEN_ENV} is required when discord is enabled"
            )));
        }
        if self.general.replay_logs.is_some() && self.general.replay_server.is_none() {
            return Err(ConfigError::Invalid(
                "general.replay_server is required with general.replay_logs".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn ban_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.general.ban_sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warning::EscalationKind;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.warnings.limit, 3);
        assert_eq!(config.warnings.timeout_secs, 3600);
        assert_eq!(config.warnings.action, EscalationKind::Kick);
        assert_eq!(config.warnings.sweep_interval_ms, 1000);
        assert_eq!(config.actions.queue_capacity, 100);
        assert_eq!(config.rcon.dial_timeout(), Duration::from_secs(10));
        assert_eq!(config.rcon.server_timeout(), Duration::from_secs(20));
        assert_eq!(config.events.log_queue_capacity, 50);
        assert!(!config.discord.enabled);
        assert!(config.filter.enabled);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Config::from_yaml(
            r#"
general:
  owner: "76561197970669109"
warnings:
  limit: 5
  action: ban
servers:
  - name: "Uncletopia | Seattle"
    name_short: sea-1
    host: 10.0.0.1
    port: 27015
    rcon: secret
"#,
        )
        .unwrap();

        assert_eq!(config.warnings.limit, 5);
        assert_eq!(config.warnings.action, EscalationKind::Ban);
        assert_eq!(config.warnings.timeout_secs, 3600);
        assert_eq!(config.actions.timeout(), Duration::from_secs(30));
        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.servers[0].server_id, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.filter.enabled = false;
        assert!(config.validate().is_ok());

        config.discord.enabled = true;
        assert!(config.validate().is_err());
        config.discord.token = Some("token".to_string());
        assert!(config.validate().is_ok());

        config.general.replay_logs = Some("logs/*.log".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_yaml() {
        assert!(matches!(
            Config::from_yaml("warnings: [1, 2"),
            Err(ConfigError::Yaml(_))
        ));
        assert!(Config::from_yaml("").is_ok());
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let config = Config::load_from("/nonexistent/gamewarden.yaml").await.unwrap();
        assert_eq!(config, Config::default());
    }
}
