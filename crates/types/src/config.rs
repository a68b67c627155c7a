//! Node configuration.
//!
//! Loaded from TOML. Every section is optional; missing fields take the
//! defaults below. Example:
//!
//! ```toml
//! network_id = 3
//! data_dir = "./data"
//! max_peers = 25
//!
//! [log]
//! level = "debug"
//! file = "./data/walletd.log"
//!
//! [boot_cluster]
//! enabled = true
//! boot_nodes = ["enode://...@10.0.0.1:30303"]
//!
//! [upstream]
//! enabled = false
//! url = "https://mainnet.example.org"
//! ```

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Configuration used to start a node.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NodeConfig {
    /// Network identifier the node joins.
    #[serde(default = "default_network_id")]
    pub network_id: u64,

    /// Data directory for chain data and keys.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// P2P listen address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Maximum number of connected peers.
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,

    /// Logging configuration, applied on every start.
    #[serde(default)]
    pub log: LogConfig,

    /// Static peers connected after start.
    #[serde(default)]
    pub boot_cluster: BootClusterConfig,

    /// Upstream RPC endpoint.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Message relay sub-service.
    #[serde(default)]
    pub relay: RelayConfig,

    /// Light sync sub-service.
    #[serde(default)]
    pub light_sync: LightSyncConfig,
}

fn default_network_id() -> u64 {
    1
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_listen_addr() -> String {
    "0.0.0.0:30303".to_string()
}

fn default_max_peers() -> usize {
    25
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network_id: default_network_id(),
            data_dir: default_data_dir(),
            listen_addr: default_listen_addr(),
            max_peers: default_max_peers(),
            log: LogConfig::default(),
            boot_cluster: BootClusterConfig::default(),
            upstream: UpstreamConfig::default(),
            relay: RelayConfig::default(),
            light_sync: LightSyncConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_peers == 0 {
            return Err(ConfigError::Invalid("max_peers must be at least 1".into()));
        }
        if self.upstream.enabled {
            let url = self.upstream.url.trim();
            if url.is_empty() {
                return Err(ConfigError::Invalid(
                    "upstream is enabled but no url is set".into(),
                ));
            }
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "upstream url must be http(s): {url}"
                )));
            }
        }
        Ok(())
    }

    /// Set the network id.
    pub fn with_network_id(mut self, network_id: u64) -> Self {
        self.network_id = network_id;
        self
    }

    /// Enable bootstrap peering with the given peers.
    pub fn with_boot_nodes(mut self, boot_nodes: Vec<String>) -> Self {
        self.boot_cluster = BootClusterConfig {
            enabled: true,
            boot_nodes,
        };
        self
    }

    /// Route RPC calls to an upstream endpoint.
    pub fn with_upstream(mut self, url: impl Into<String>) -> Self {
        self.upstream = UpstreamConfig {
            enabled: true,
            url: url.into(),
        };
        self
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogConfig {
    /// Level filter directive (e.g. "info", "walletd_node=debug").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional log file. Falls back to stdout if it cannot be opened.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Bootstrap peer list.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct BootClusterConfig {
    /// Whether to connect to the boot nodes after start.
    #[serde(default)]
    pub enabled: bool,

    /// Peer addresses in `enode://` form.
    #[serde(default)]
    pub boot_nodes: Vec<String>,
}

/// Upstream RPC endpoint configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub url: String,
}

/// Message relay configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Light sync configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LightSyncConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for LightSyncConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}
