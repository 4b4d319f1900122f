//! TOML file configuration structures.
//!
//! These structs directly map to the `tradecast.toml` file format.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub hub: HubConfigSection,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().expect("valid default address")
}

/// Connection hub and liveness settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfigSection {
    /// Concurrent connections one user may hold.
    pub max_connections_per_user: usize,
    /// Seconds between heartbeat envelopes.
    pub heartbeat_interval_secs: u64,
    /// Seconds without a heartbeat refresh before a connection is
    /// considered dead.
    pub heartbeat_timeout_secs: u64,
    /// Seconds between reaper sweeps.
    pub reap_interval_secs: u64,
    /// Seconds between order-expiry sweeps.
    pub order_expiry_interval_secs: u64,
}

impl Default for HubConfigSection {
    fn default() -> Self {
        Self {
            max_connections_per_user: 5,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 300,
            reap_interval_secs: 60,
            order_expiry_interval_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config_parses() {
        let toml_str = r#"
[server]
listen = "127.0.0.1:3000"

[hub]
max_connections_per_user = 3
heartbeat_interval_secs = 10
heartbeat_timeout_secs = 120
reap_interval_secs = 30
order_expiry_interval_secs = 15
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.port(), 3000);
        assert_eq!(config.hub.max_connections_per_user, 3);
        assert_eq!(config.hub.heartbeat_timeout_secs, 120);
    }

    #[test]
    fn empty_file_falls_back_to_defaults() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.listen.port(), 8080);
        assert_eq!(config.hub.max_connections_per_user, 5);
        assert_eq!(config.hub.heartbeat_interval_secs, 30);
        assert_eq!(config.hub.heartbeat_timeout_secs, 300);
        assert_eq!(config.hub.reap_interval_secs, 60);
    }

    #[test]
    fn partial_hub_section_keeps_remaining_defaults() {
        let config: FileConfig = toml::from_str("[hub]\nmax_connections_per_user = 8\n").unwrap();
        assert_eq!(config.hub.max_connections_per_user, 8);
        assert_eq!(config.hub.heartbeat_timeout_secs, 300);
    }
}
