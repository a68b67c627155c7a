//! walletd node daemon.
//!
//! Starts an embedded node, keeps the transaction queue open until a
//! shutdown signal arrives, then discards pending transactions and stops the
//! node.
//!
//! # Usage
//!
//! ```bash
//! walletd --config walletd.toml
//! walletd --config walletd.toml --bootstrap enode://...@10.0.0.1:30303
//! ```
//!
//! # Configuration
//!
//! ```toml
//! [node]
//! network_id = 3
//! data_dir = "./data"
//! max_peers = 25
//!
//! [node.log]
//! level = "info"
//! file = "./data/walletd.log"
//!
//! [node.boot_cluster]
//! enabled = true
//! boot_nodes = ["enode://...@10.0.0.1:30303"]
//!
//! [queue]
//! capacity = 1024
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use walletd_core::{TxQueue, DEFAULT_QUEUE_CAPACITY};
use walletd_node::{LocalNodeFactory, LogControl, LogEventSink, NodeManager, TxDispatcher};
use walletd_types::NodeConfig;

/// walletd node daemon
///
/// Runs an embedded node and its transaction queue.
#[derive(Parser, Debug)]
#[command(name = "walletd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory (overrides config)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Network id (overrides config)
    #[arg(long)]
    network_id: Option<u64>,

    /// Boot node addresses, enables the boot cluster (can be specified multiple times)
    #[arg(long)]
    bootstrap: Vec<String>,

    /// Log level filter applied until the node's own log config takes over
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Deserialize)]
struct DaemonConfig {
    #[serde(default)]
    node: NodeConfig,

    #[serde(default)]
    queue: QueueConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct QueueConfig {
    #[serde(default = "default_queue_capacity")]
    capacity: usize,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

impl DaemonConfig {
    fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn parse(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.node.validate()?;
        Ok(config)
    }

    fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(data_dir) = &cli.data_dir {
            self.node.data_dir = data_dir.clone();
        }
        if let Some(network_id) = cli.network_id {
            self.node.network_id = network_id;
        }
        if !cli.bootstrap.is_empty() {
            self.node.boot_cluster.enabled = true;
            self.node.boot_cluster.boot_nodes = cli.bootstrap.clone();
        }
    }
}

async fn shutdown_signal() -> Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = ctrl_c => {
                result.context("Failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C");
            }
            _ = terminate.recv() => info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.context("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_control = Arc::new(LogControl::install(&cli.log_level)?);

    let mut config = match &cli.config {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };
    config.apply_overrides(&cli);

    info!(
        network_id = config.node.network_id,
        data_dir = %config.node.data_dir.display(),
        boot_nodes = config.node.boot_cluster.boot_nodes.len(),
        "walletd starting"
    );

    fs::create_dir_all(&config.node.data_dir).with_context(|| {
        format!(
            "Failed to create data directory: {}",
            config.node.data_dir.display()
        )
    })?;

    let manager = NodeManager::builder(Arc::new(LocalNodeFactory))
        .event_sink(Arc::new(LogEventSink))
        .log_control(log_control)
        .build();
    manager
        .start(config.node.clone())
        .context("Failed to start node")?;

    let dispatcher = TxDispatcher::new(
        Arc::clone(&manager),
        Arc::new(TxQueue::new(config.queue.capacity)),
    );

    let version = manager
        .rpc_client()
        .map_err(anyhow::Error::from)
        .and_then(|client| Ok(client.call_typed::<String>("web3_clientVersion", json!([]))?));
    match version {
        Ok(version) => info!(version = %version, "Node ready, press Ctrl+C to stop"),
        Err(e) => warn!(error = %e, "Node ready, version query failed"),
    }

    shutdown_signal().await?;

    let discarded = dispatcher.shutdown();
    info!(discarded, "Transaction queue drained");

    manager.stop().context("Failed to stop node")?;
    info!("walletd shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("walletd").chain(args.iter().copied()))
    }

    #[test]
    fn test_parse_config() {
        let config = DaemonConfig::parse(
            r#"
            [node]
            network_id = 3
            max_peers = 10

            [node.log]
            level = "debug"

            [queue]
            capacity = 16
            "#,
        )
        .unwrap();
        assert_eq!(config.node.network_id, 3);
        assert_eq!(config.node.max_peers, 10);
        assert_eq!(config.node.log.level, "debug");
        assert_eq!(config.queue.capacity, 16);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = DaemonConfig::parse("").unwrap();
        assert_eq!(config.node, NodeConfig::default());
        assert_eq!(config.queue.capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        assert!(DaemonConfig::parse("[node]\nmax_peers = 0\n").is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("walletd.toml");
        fs::write(&path, "[node\n").unwrap();
        let err = DaemonConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
        assert!(DaemonConfig::load(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = DaemonConfig::default();
        config.apply_overrides(&cli(&[
            "--data-dir",
            "/tmp/walletd",
            "--network-id",
            "5",
            "--bootstrap",
            "enode://a",
            "--bootstrap",
            "enode://b",
        ]));
        assert_eq!(config.node.data_dir, PathBuf::from("/tmp/walletd"));
        assert_eq!(config.node.network_id, 5);
        assert!(config.node.boot_cluster.enabled);
        assert_eq!(config.node.boot_cluster.boot_nodes.len(), 2);

        let mut untouched = DaemonConfig::default();
        untouched.apply_overrides(&cli(&[]));
        assert!(!untouched.node.boot_cluster.enabled);
        assert_eq!(untouched.node.network_id, 1);
    }
}
