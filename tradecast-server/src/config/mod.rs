//! Configuration module for tradecast-server.
//!
//! Handles loading configuration from the TOML file and applying CLI
//! overrides.

pub mod file;

use crate::config::file::FileConfig;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tradecast_core::hub::HubConfig;
use tradecast_core::processors::SupervisorConfig;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: std::path::PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Load and process the configuration.
    ///
    /// Reads the TOML file (a missing file means all defaults),
    /// applies CLI overrides, then validates.
    pub fn load(&self) -> Result<FileConfig, ConfigError> {
        let mut config: FileConfig = if self.config_path.exists() {
            let content = std::fs::read_to_string(&self.config_path)?;
            toml::from_str(&content)?
        } else {
            tracing::info!(
                path = %self.config_path.display(),
                "config file not found, using defaults"
            );
            toml::from_str("")?
        };

        if let Some(listen) = self.listen_override {
            config.server.listen = listen;
        }

        self.validate(&config)?;
        Ok(config)
    }

    fn validate(&self, config: &FileConfig) -> Result<(), ConfigError> {
        if config.hub.max_connections_per_user == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections_per_user must be at least 1".to_string(),
            ));
        }
        if config.hub.heartbeat_timeout_secs <= config.hub.heartbeat_interval_secs {
            return Err(ConfigError::ValidationError(
                "heartbeat_timeout_secs must exceed heartbeat_interval_secs".to_string(),
            ));
        }
        Ok(())
    }
}

/// Build the hub policy from the file section.
pub fn hub_config(config: &FileConfig) -> HubConfig {
    HubConfig {
        max_connections_per_user: config.hub.max_connections_per_user,
    }
}

/// Build the supervisor cadence from the file section.
pub fn supervisor_config(config: &FileConfig) -> SupervisorConfig {
    SupervisorConfig {
        heartbeat_interval: Duration::from_secs(config.hub.heartbeat_interval_secs),
        heartbeat_timeout: Duration::from_secs(config.hub.heartbeat_timeout_secs),
        reap_interval: Duration::from_secs(config.hub.reap_interval_secs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_carry_the_file_values() {
        let config: FileConfig =
            toml::from_str("[hub]\nheartbeat_interval_secs = 15\n").unwrap();
        let supervisor = supervisor_config(&config);
        assert_eq!(supervisor.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(supervisor.heartbeat_timeout, Duration::from_secs(300));
        assert_eq!(hub_config(&config).max_connections_per_user, 5);
    }
}
