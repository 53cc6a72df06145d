// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DBC peer-to-peer node daemon
//!
//! # Usage
//!
//! ```bash
//! # Main net with defaults, random node id
//! dbc-node
//!
//! # Test net, explicit seeds
//! dbc-node --net test --port 21107 --peer 10.0.0.2:21107 --peer 10.0.0.3:21107
//!
//! # Using a configuration file
//! dbc-node --config node.toml
//!
//! # Write an example configuration
//! dbc-node gen-config --output node.toml
//! ```

mod config;
mod node;

use std::path::{Path, PathBuf};
use std::sync::mpsc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::{NodeConfig, NodeError};
use crate::node::Node;

/// DBC node daemon
#[derive(Parser, Debug)]
#[command(name = "dbc-node")]
#[command(author = "naskel.com")]
#[command(about = "DBC peer-to-peer node daemon")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Network (main, test)
    #[arg(long)]
    net: Option<String>,

    /// Listen IP
    #[arg(long)]
    listen: Option<String>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Seed peer ip:port (can repeat)
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Node id (generated when absent)
    #[arg(long)]
    node_id: Option<String>,

    /// Log level or filter directive (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "node.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(cmd) = &args.command {
        init_logging("info");
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let config = build_config(&args)?;
    init_logging(&config.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), net = %config.net, "starting dbc-node");

    let node = Node::new(config)?;
    node.start()?;

    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        tracing::info!("Received Ctrl+C, shutting down...");
        let _ = stop_tx.send(());
    })?;
    let _ = stop_rx.recv();

    node.shutdown();
    Ok(())
}

/// `RUST_LOG` wins over the configured level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// File (or defaults) with command-line overrides applied.
fn build_config(args: &Args) -> Result<NodeConfig, NodeError> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::default(),
    };
    if let Some(net) = &args.net {
        config.net = net.clone();
    }
    if let Some(ip) = &args.listen {
        config.listen_ip = ip.clone();
    }
    if args.port.is_some() {
        config.listen_port = args.port;
    }
    if !args.peers.is_empty() {
        config.peers = args.peers.clone();
    }
    if let Some(id) = &args.node_id {
        config.node_id = id.clone();
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    config.validate()?;
    Ok(config)
}

fn cmd_gen_config(output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = NodeConfig {
        net: "test".into(),
        listen_port: Some(21107),
        peers: vec!["10.0.0.2:21107".into(), "10.0.0.3:21107".into()],
        ..NodeConfig::default()
    };
    config.save(output)?;
    println!("Configuration written to {}", output.display());
    Ok(())
}

fn cmd_validate(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = NodeConfig::from_file(path)?;
    let net = config.to_net_config()?;
    println!("Configuration is valid");
    println!("  net:    {}", config.net);
    println!("  listen: {}", net.listen_addr());
    println!("  peers:  {}", config.peers.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let args = Args::parse_from([
            "dbc-node", "--net", "test", "--port", "4000", "--peer", "127.0.0.1:1", "--peer",
            "127.0.0.1:2", "--node-id", "n1",
        ]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.net, "test");
        assert_eq!(config.listen_port, Some(4000));
        assert_eq!(config.peers.len(), 2);
        assert_eq!(config.node_id, "n1");
    }

    #[test]
    fn test_cli_rejects_bad_peer() {
        let args = Args::parse_from(["dbc-node", "--peer", "nowhere"]);
        assert!(build_config(&args).is_err());
    }

    #[test]
    fn test_gen_config_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        cmd_gen_config(&path).unwrap();
        cmd_validate(&path).unwrap();
    }
}
