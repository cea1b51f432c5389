//! Configuration management for the directory node.
//!
//! This module handles loading, validation, and conversion of node configuration
//! from TOML files.

use serde::{Deserialize, Serialize};
use session_directory::DirectoryConfig;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

fn default_context_ttl_secs() -> u64 {
    30
}

fn default_connect_retry_interval_ms() -> u64 {
    1_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_expiry_sweep_interval_ms() -> u64 {
    1_000
}

fn default_channel_capacity() -> usize {
    256
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Listener settings
    pub server: ServerSettings,
    /// Host context lifetime and reconnect pacing
    #[serde(default)]
    pub replication: ReplicationSettings,
    /// Lobby feed settings
    #[serde(default)]
    pub lobby: LobbySettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
    /// Session hosts dialled at startup
    #[serde(default)]
    pub hosts: Vec<HostSettings>,
}

/// Host link listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Address session hosts connect to (e.g., "0.0.0.0:7400")
    pub bind_address: String,
}

/// Replication tuning.
///
/// `context_ttl_secs` alone decides when a broken host is evicted. The retry
/// interval only paces reconnection attempts and may exceed the TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationSettings {
    /// How long a broken host keeps its sessions and players
    #[serde(default = "default_context_ttl_secs")]
    pub context_ttl_secs: u64,
    /// Delay between reconnection attempts
    #[serde(default = "default_connect_retry_interval_ms")]
    pub connect_retry_interval_ms: u64,
    /// Upper bound for one connection attempt
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Period of the background expiry sweep
    #[serde(default = "default_expiry_sweep_interval_ms")]
    pub expiry_sweep_interval_ms: u64,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            context_ttl_secs: default_context_ttl_secs(),
            connect_retry_interval_ms: default_connect_retry_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            expiry_sweep_interval_ms: default_expiry_sweep_interval_ms(),
        }
    }
}

/// Lobby feed settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbySettings {
    /// Buffered changes per lobby before slow subscribers lag
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// A session host the node dials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSettings {
    /// Host link URL, `ws://` or `wss://`
    pub address: String,
}

/// Logging system configuration.
///
/// Controls log output format, levels, and destination settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
    /// Optional file that receives a copy of the log output
    pub file_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_address: "127.0.0.1:7400".to_string(),
            },
            replication: ReplicationSettings::default(),
            lobby: LobbySettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
                file_path: None,
            },
            hosts: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the specified path
    /// and returns the default configuration.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The loaded or default configuration, or an error if loading/creation failed.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Converts the application configuration to the directory core configuration.
    pub fn to_directory_config(&self) -> Result<DirectoryConfig, Box<dyn std::error::Error>> {
        let defaults = DirectoryConfig::default();
        Ok(DirectoryConfig {
            listen_address: Some(self.server.bind_address.parse()?),
            seed_hosts: self.hosts.iter().map(|h| h.address.clone()).collect(),
            context_ttl_ms: Duration::from_secs(self.replication.context_ttl_secs).as_millis() as u64,
            connect_retry_interval_ms: self.replication.connect_retry_interval_ms,
            connect_timeout_ms: self.replication.connect_timeout_ms,
            expiry_sweep_interval_ms: self.replication.expiry_sweep_interval_ms,
            lobby_channel_capacity: self.lobby.channel_capacity,
            ..defaults
        })
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "Invalid bind address: {}",
                &self.server.bind_address
            ));
        }

        if self.replication.context_ttl_secs == 0 {
            return Err("replication.context_ttl_secs must be greater than 0".to_string());
        }
        if self.replication.connect_retry_interval_ms == 0 {
            return Err("replication.connect_retry_interval_ms must be greater than 0".to_string());
        }
        if self.replication.connect_timeout_ms == 0 {
            return Err("replication.connect_timeout_ms must be greater than 0".to_string());
        }
        if self.replication.expiry_sweep_interval_ms == 0 {
            return Err("replication.expiry_sweep_interval_ms must be greater than 0".to_string());
        }
        if self.lobby.channel_capacity == 0 {
            return Err("lobby.channel_capacity must be greater than 0".to_string());
        }

        for host in &self.hosts {
            if !(host.address.starts_with("ws://") || host.address.starts_with("wss://")) {
                return Err(format!(
                    "Invalid host address: {}. Must be a ws:// or wss:// URL",
                    host.address
                ));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();

        assert_eq!(config.server.bind_address, "127.0.0.1:7400");
        assert_eq!(config.replication.context_ttl_secs, 30);
        assert_eq!(config.replication.connect_retry_interval_ms, 1_000);
        assert_eq!(config.lobby.channel_capacity, 256);
        assert!(config.hosts.is_empty());
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
        assert!(config.logging.file_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.server.bind_address = "invalid".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.replication.context_ttl_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.hosts.push(HostSettings {
            address: "10.0.0.1:5057".to_string(),
        });
        let err = config.validate().unwrap_err();
        assert!(err.contains("10.0.0.1:5057"));

        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_interval_may_exceed_ttl() {
        let mut config = AppConfig::default();
        config.replication.context_ttl_secs = 1;
        config.replication.connect_retry_interval_ms = 10_000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_conversion_to_directory_config() {
        let mut config = AppConfig::default();
        config.replication.context_ttl_secs = 45;
        config.hosts.push(HostSettings {
            address: "ws://10.0.0.1:5057".to_string(),
        });

        let directory = config.to_directory_config().unwrap();
        assert_eq!(directory.listen_address, Some("127.0.0.1:7400".parse().unwrap()));
        assert_eq!(directory.context_ttl(), Duration::from_secs(45));
        assert_eq!(directory.seed_hosts, vec!["ws://10.0.0.1:5057".to_string()]);
        assert_eq!(directory.lobby_channel_capacity, 256);
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file_writes_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:7400");
        assert!(path.exists());

        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded.replication.context_ttl_secs, 30);
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
bind_address = "0.0.0.0:7500"

[replication]
context_ttl_secs = 10

[logging]
level = "debug"
json_format = true

[[hosts]]
address = "ws://10.0.0.1:5057"

[[hosts]]
address = "wss://gs-2.example.net/link"
"#
        )
        .unwrap();

        let config = AppConfig::load_from_file(&file.path().to_path_buf()).await.unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:7500");
        assert_eq!(config.replication.context_ttl_secs, 10);
        assert_eq!(config.replication.connect_timeout_ms, 5_000);
        assert_eq!(config.lobby.channel_capacity, 256);
        assert_eq!(config.hosts.len(), 2);
        assert!(config.logging.json_format);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[server\nbind_address = ").unwrap();
        assert!(AppConfig::load_from_file(&file.path().to_path_buf()).await.is_err());
    }
}
