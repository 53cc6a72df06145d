// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node configuration.
//!
//! Loaded from a TOML file, every field optional; command-line flags are
//! applied on top before validation.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use dbc_net::config::MAX_POOL_THREADS;
use dbc_net::{HandshakeConfig, NetConfig, NetType, PoolConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Daemon errors.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Network error: {0}")]
    Net(#[from] dbc_net::Error),
}

/// Node configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// `main` or `test`.
    #[serde(default = "default_net")]
    pub net: String,

    /// Node id; a random one is generated when empty.
    #[serde(default)]
    pub node_id: String,

    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,

    /// Listen port (network default when absent).
    #[serde(default)]
    pub listen_port: Option<u16>,

    /// Seed peers, `ip:port`.
    #[serde(default)]
    pub peers: Vec<String>,

    /// Inbound connection limit.
    #[serde(default = "default_max_connect")]
    pub max_connect: usize,

    /// Outbound connections the node tries to keep.
    #[serde(default = "default_max_outbound")]
    pub max_outbound: usize,

    /// New connections started per candidate check.
    #[serde(default = "default_max_connect_per_check")]
    pub max_connect_per_check: usize,

    /// Inbound messages/second per channel (0 = unlimited).
    #[serde(default)]
    pub max_recv_speed: u32,

    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "default_max_reconnect_times")]
    pub max_reconnect_times: u32,

    #[serde(default = "default_shake_hand_interval_ms")]
    pub shake_hand_interval_ms: u64,

    #[serde(default = "default_wait_version_interval_ms")]
    pub wait_version_interval_ms: u64,

    #[serde(default = "default_lost_shake_hand_max")]
    pub lost_shake_hand_max: u32,

    /// Period of the peer candidate check.
    #[serde(default = "default_check_peers_secs")]
    pub check_peers_secs: u64,

    /// Period of the peer list broadcast.
    #[serde(default = "default_peer_exchange_secs")]
    pub peer_exchange_secs: u64,

    /// Metrics snapshot logging period (0 disables it).
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_net() -> String {
    "main".to_string()
}

fn default_listen_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_max_connect() -> usize {
    1024
}

fn default_max_outbound() -> usize {
    168
}

fn default_max_connect_per_check() -> usize {
    16
}

fn default_worker_threads() -> usize {
    8
}

fn default_reconnect_interval_ms() -> u64 {
    2000
}

fn default_max_reconnect_times() -> u32 {
    2
}

fn default_shake_hand_interval_ms() -> u64 {
    5000
}

fn default_wait_version_interval_ms() -> u64 {
    5000
}

fn default_lost_shake_hand_max() -> u32 {
    3
}

fn default_check_peers_secs() -> u64 {
    60
}

fn default_peer_exchange_secs() -> u64 {
    180
}

fn default_metrics_interval_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            net: default_net(),
            node_id: String::new(),
            listen_ip: default_listen_ip(),
            listen_port: None,
            peers: Vec::new(),
            max_connect: default_max_connect(),
            max_outbound: default_max_outbound(),
            max_connect_per_check: default_max_connect_per_check(),
            max_recv_speed: 0,
            worker_threads: default_worker_threads(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            max_reconnect_times: default_max_reconnect_times(),
            shake_hand_interval_ms: default_shake_hand_interval_ms(),
            wait_version_interval_ms: default_wait_version_interval_ms(),
            lost_shake_hand_max: default_lost_shake_hand_max(),
            check_peers_secs: default_check_peers_secs(),
            peer_exchange_secs: default_peer_exchange_secs(),
            metrics_interval_secs: default_metrics_interval_secs(),
            log_level: default_log_level(),
        }
    }
}

impl NodeConfig {
    /// Load and validate a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, NodeError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write as TOML.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), NodeError> {
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn net_type(&self) -> Result<NetType, NodeError> {
        self.net
            .parse::<NetType>()
            .map_err(|_| NodeError::Invalid(format!("unknown net '{}'", self.net)))
    }

    pub fn listen_ip(&self) -> Result<IpAddr, NodeError> {
        self.listen_ip
            .parse()
            .map_err(|_| NodeError::Invalid(format!("bad listen_ip '{}'", self.listen_ip)))
    }

    pub fn peer_addrs(&self) -> Result<Vec<SocketAddr>, NodeError> {
        self.peers
            .iter()
            .map(|p| {
                p.parse()
                    .map_err(|_| NodeError::Invalid(format!("bad peer address '{}'", p)))
            })
            .collect()
    }

    /// Check values the network layer would reject or that make no sense.
    pub fn validate(&self) -> Result<(), NodeError> {
        self.net_type()?;
        self.listen_ip()?;
        self.peer_addrs()?;
        if self.worker_threads == 0 || self.worker_threads > MAX_POOL_THREADS {
            return Err(NodeError::Invalid(format!(
                "worker_threads must be in 1..={} (got {})",
                MAX_POOL_THREADS, self.worker_threads
            )));
        }
        if self.max_connect == 0 {
            return Err(NodeError::Invalid("max_connect must be > 0".into()));
        }
        if self.check_peers_secs == 0 || self.peer_exchange_secs == 0 {
            return Err(NodeError::Invalid("timer periods must be > 0".into()));
        }
        Ok(())
    }

    /// Network layer configuration.
    pub fn to_net_config(&self) -> Result<NetConfig, NodeError> {
        let net_type = self.net_type()?;
        let mut config = NetConfig::for_net(net_type);
        let port = self.listen_port.unwrap_or_else(|| net_type.default_port());
        config = config
            .with_node_id(self.node_id.clone())
            .with_listen(self.listen_ip()?, port)
            .with_max_connect(self.max_connect)
            .with_max_recv_speed(self.max_recv_speed)
            .with_reconnect(
                Duration::from_millis(self.reconnect_interval_ms),
                self.max_reconnect_times,
            )
            .with_pools(PoolConfig {
                worker_threads: self.worker_threads,
                ..PoolConfig::default()
            })
            .with_handshake(HandshakeConfig {
                shake_hand_interval: Duration::from_millis(self.shake_hand_interval_ms),
                wait_version_interval: Duration::from_millis(self.wait_version_interval_ms),
                lost_shake_hand_max: self.lost_shake_hand_max,
            });
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Tests
// ============================================================================
