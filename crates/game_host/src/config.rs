//! Host configuration loaded from a TOML file.

use game_services::ServiceKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to write default configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub services: ServiceSettings,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub replay: ReplaySettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Service names, registered in this order.
    #[serde(default = "default_services")]
    pub enabled: Vec<String>,
}

fn default_services() -> Vec<String> {
    ServiceKind::ALL.iter().map(|kind| kind.to_string()).collect()
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            enabled: default_services(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineSettings {
    /// JSON seed for the in-memory engine. Starts empty when unset.
    pub seed_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReplaySettings {
    /// Push envelopes replayed once services are initialized.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json_format: bool,
    /// Seconds between event bus statistics reports, 0 disables them.
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stats_interval() -> u64 {
    60
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            stats_interval_secs: default_stats_interval(),
        }
    }
}

impl AppConfig {
    /// Loads the configuration, writing the default one first if `path` is missing.
    pub async fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            Ok(toml::from_str(&content)?)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("📝 Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Enabled services in registration order.
    pub fn service_kinds(&self) -> Result<Vec<ServiceKind>, ConfigError> {
        self.services
            .enabled
            .iter()
            .map(|name| ServiceKind::from_str(name).map_err(ConfigError::Invalid))
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                self.logging.level
            )));
        }

        let kinds = self.service_kinds()?;
        let mut seen = HashSet::new();
        for kind in kinds {
            if !seen.insert(kind) {
                return Err(ConfigError::Invalid(format!(
                    "Service '{}' is enabled more than once",
                    kind
                )));
            }
        }

        if let Some(seed) = &self.engine.seed_file {
            if !seed.is_file() {
                return Err(ConfigError::Invalid(format!(
                    "Seed file not found: {}",
                    seed.display()
                )));
            }
        }

        if let Some(replay) = &self.replay.file {
            if !replay.is_file() {
                return Err(ConfigError::Invalid(format!(
                    "Replay file not found: {}",
                    replay.display()
                )));
            }
        }

        Ok(())
    }
}
