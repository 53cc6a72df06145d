// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Networking configuration.
//!
//! - [`NetConfig`] - Main configuration struct
//! - [`NetType`] - Main / test network selection (magic value, default port)
//! - [`PoolConfig`] - Reactor pool sizes
//! - [`SocketConfig`] - Socket options and send-queue bound
//! - [`HandshakeConfig`] - Version handshake and keepalive timing
//!
//! # Example
//!
//! ```
//! use dbc_net::{NetConfig, NetType};
//!
//! let config = NetConfig::for_net(NetType::Test)
//!     .with_node_id("node.0.test")
//!     .with_max_connect(256);
//! assert_eq!(config.listen_port, 21107);
//! assert!(config.validate().is_ok());
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::{MAIN_NET_MAGIC, MAX_FRAME_LEN, MIN_FRAME_LEN, TEST_NET_MAGIC};

/// Default main-net listen port.
pub const DEFAULT_MAIN_PORT: u16 = 11107;
/// Default test-net listen port.
pub const DEFAULT_TEST_PORT: u16 = 21107;
/// Hard cap on threads per reactor pool.
pub const MAX_POOL_THREADS: usize = 64;
/// Default outbound queue bound per channel (messages).
pub const DEFAULT_MAX_SEND_QUEUE: usize = 102_400;
/// Default tick interval shared by reactors and the tick source.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Network the node participates in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum NetType {
    #[default]
    Main,
    Test,
}

impl NetType {
    /// Magic value stamped in every message header.
    pub fn magic(&self) -> i32 {
        match self {
            NetType::Main => MAIN_NET_MAGIC,
            NetType::Test => TEST_NET_MAGIC,
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            NetType::Main => DEFAULT_MAIN_PORT,
            NetType::Test => DEFAULT_TEST_PORT,
        }
    }
}

impl std::str::FromStr for NetType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "main" | "mainnet" => Ok(NetType::Main),
            "test" | "testnet" => Ok(NetType::Test),
            other => Err(Error::InvalidConfig(format!("unknown net type: {}", other))),
        }
    }
}

/// Thread counts of the three reactor pools.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    pub acceptor_threads: usize,
    pub worker_threads: usize,
    pub connector_threads: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            acceptor_threads: 1,
            worker_threads: 8,
            connector_threads: 1,
        }
    }
}

/// Per-socket options applied when a channel starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocketConfig {
    /// TCP_NODELAY
    pub nodelay: bool,
    /// SO_KEEPALIVE
    pub keepalive: bool,
    /// SO_SNDBUF (0 = OS default)
    pub send_buffer: usize,
    /// SO_RCVBUF (0 = OS default)
    pub recv_buffer: usize,
    /// Outbound messages queued per channel before `write` fails.
    pub max_send_queue: usize,
    /// Listen backlog.
    pub listen_backlog: i32,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            keepalive: true,
            send_buffer: 32_000,
            recv_buffer: 32_000,
            max_send_queue: DEFAULT_MAX_SEND_QUEUE,
            listen_backlog: 128,
        }
    }
}

/// Version handshake and keepalive timing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// Idle interval between keepalive probes.
    pub shake_hand_interval: Duration,
    /// How long to wait for VER_REQ / VER_RESP.
    pub wait_version_interval: Duration,
    /// Keepalive intervals without traffic before the server gives up.
    pub lost_shake_hand_max: u32,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            shake_hand_interval: Duration::from_secs(5),
            wait_version_interval: Duration::from_secs(5),
            lost_shake_hand_max: 3,
        }
    }
}

/// Networking substrate configuration.
#[derive(Clone, Debug)]
pub struct NetConfig {
    pub net_type: NetType,
    /// Local node id, advertised in VER_REQ / VER_RESP.
    pub node_id: String,

    // === Listener ===
    pub listen_ip: IpAddr,
    pub listen_port: u16,
    /// Inbound connection limit.
    pub max_connect: usize,

    // === Outbound ===
    /// First reconnect delay; doubled after every failed attempt.
    pub reconnect_interval: Duration,
    /// Retries after the first failed attempt.
    pub max_reconnect_times: u32,

    // === Traffic ===
    /// Inbound messages/second per channel (0 = unlimited).
    pub max_recv_speed: u32,
    pub max_frame_len: usize,
    /// Deflate payloads above the threshold (needs the `compression` feature).
    pub compression: bool,

    pub pools: PoolConfig,
    pub socket: SocketConfig,
    pub handshake: HandshakeConfig,

    /// Reactor tick and timer resolution.
    pub tick_interval: Duration,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self::for_net(NetType::Main)
    }
}

impl NetConfig {
    /// Defaults for the given network.
    pub fn for_net(net_type: NetType) -> Self {
        Self {
            net_type,
            node_id: String::new(),
            listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: net_type.default_port(),
            max_connect: 1024,
            reconnect_interval: Duration::from_secs(2),
            max_reconnect_times: 2,
            max_recv_speed: 0,
            max_frame_len: MAX_FRAME_LEN,
            compression: cfg!(feature = "compression"),
            pools: PoolConfig::default(),
            socket: SocketConfig::default(),
            handshake: HandshakeConfig::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }

    /// Builder: set node id
    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    /// Builder: set listen endpoint
    pub fn with_listen(mut self, ip: IpAddr, port: u16) -> Self {
        self.listen_ip = ip;
        self.listen_port = port;
        self
    }

    /// Builder: set inbound connection limit
    pub fn with_max_connect(mut self, max: usize) -> Self {
        self.max_connect = max;
        self
    }

    /// Builder: set reconnect policy
    pub fn with_reconnect(mut self, interval: Duration, max_times: u32) -> Self {
        self.reconnect_interval = interval;
        self.max_reconnect_times = max_times;
        self
    }

    /// Builder: set receive rate limit
    pub fn with_max_recv_speed(mut self, speed: u32) -> Self {
        self.max_recv_speed = speed;
        self
    }

    /// Builder: set pool sizes
    pub fn with_pools(mut self, pools: PoolConfig) -> Self {
        self.pools = pools;
        self
    }

    /// Builder: set handshake timing
    pub fn with_handshake(mut self, handshake: HandshakeConfig) -> Self {
        self.handshake = handshake;
        self
    }

    /// Builder: set per-channel queue bound
    pub fn with_max_send_queue(mut self, max: usize) -> Self {
        self.socket.max_send_queue = max;
        self
    }

    /// Builder: set tick interval
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn magic(&self) -> i32 {
        self.net_type.magic()
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_ip, self.listen_port)
    }

    /// Address advertised to peers as `addr_me`.
    ///
    /// A wildcard listen address is replaced by the host's primary interface
    /// address when one can be found.
    pub fn advertised_addr(&self) -> SocketAddr {
        if !self.listen_ip.is_unspecified() {
            return self.listen_addr();
        }
        match local_ip_address::local_ip() {
            Ok(ip) => SocketAddr::new(ip, self.listen_port),
            Err(e) => {
                log::debug!("[CONN-MGR] no local interface address: {}", e);
                self.listen_addr()
            }
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        let pools = [
            ("acceptor", self.pools.acceptor_threads),
            ("worker", self.pools.worker_threads),
            ("connector", self.pools.connector_threads),
        ];
        for (name, n) in pools {
            if n == 0 || n > MAX_POOL_THREADS {
                return Err(Error::InvalidConfig(format!(
                    "{} pool threads must be in 1..={} (got {})",
                    name, MAX_POOL_THREADS, n
                )));
            }
        }
        if self.max_connect == 0 {
            return Err(invalid("max_connect must be > 0"));
        }
        if self.max_frame_len < MIN_FRAME_LEN || self.max_frame_len > u32::MAX as usize {
            return Err(invalid("max_frame_len out of range"));
        }
        if self.socket.max_send_queue == 0 {
            return Err(invalid("max_send_queue must be > 0"));
        }
        if self.reconnect_interval.is_zero() {
            return Err(invalid("reconnect_interval must be > 0"));
        }
        if self.tick_interval.is_zero() {
            return Err(invalid("tick_interval must be > 0"));
        }
        if self.handshake.shake_hand_interval < self.tick_interval
            || self.handshake.wait_version_interval < self.tick_interval
        {
            return Err(invalid("handshake intervals must be >= tick_interval"));
        }
        if self.handshake.lost_shake_hand_max == 0 {
            return Err(invalid("lost_shake_hand_max must be > 0"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> Error {
    Error::InvalidConfig(msg.to_string())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = NetConfig::default();
        assert_eq!(c.net_type, NetType::Main);
        assert_eq!(c.listen_port, 11107);
        assert_eq!(c.pools, PoolConfig::default());
        assert_eq!(c.pools.worker_threads, 8);
        assert_eq!(c.max_connect, 1024);
        assert_eq!(c.max_recv_speed, 0);
        assert_eq!(c.reconnect_interval, Duration::from_secs(2));
        assert_eq!(c.max_reconnect_times, 2);
        assert_eq!(c.socket.max_send_queue, 102_400);
        assert_eq!(c.socket.send_buffer, 32_000);
        assert_eq!(c.handshake.lost_shake_hand_max, 3);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_net_type() {
        assert_eq!(NetConfig::for_net(NetType::Test).listen_port, 21107);
        assert_eq!(NetType::Test.magic(), TEST_NET_MAGIC);
        assert_ne!(NetType::Main.magic(), NetType::Test.magic());
        assert_eq!("testnet".parse::<NetType>().unwrap(), NetType::Test);
        assert!("moon".parse::<NetType>().is_err());
    }

    #[test]
    fn test_advertised_addr() {
        let explicit = NetConfig::default().with_listen("127.0.0.1".parse().unwrap(), 4000);
        assert_eq!(explicit.advertised_addr(), explicit.listen_addr());

        let wildcard = NetConfig::default().with_listen("0.0.0.0".parse().unwrap(), 4000);
        assert_eq!(wildcard.advertised_addr().port(), 4000);
    }

    #[test]
    fn test_validate_pool_cap() {
        let mut c = NetConfig::default();
        c.pools.worker_threads = MAX_POOL_THREADS + 1;
        assert!(matches!(c.validate(), Err(Error::InvalidConfig(_))));

        c.pools.worker_threads = 0;
        assert!(c.validate().is_err());

        c.pools.worker_threads = MAX_POOL_THREADS;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(NetConfig::default().with_max_connect(0).validate().is_err());
        assert!(NetConfig::default().with_max_send_queue(0).validate().is_err());
        assert!(NetConfig::default()
            .with_reconnect(Duration::ZERO, 2)
            .validate()
            .is_err());

        let mut c = NetConfig::default();
        c.max_frame_len = 10;
        assert!(c.validate().is_err());

        let c = NetConfig::default().with_handshake(HandshakeConfig {
            shake_hand_interval: Duration::from_millis(10),
            ..Default::default()
        });
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_builders() {
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let c = NetConfig::default()
            .with_node_id("n1")
            .with_listen(ip, 0)
            .with_max_recv_speed(100)
            .with_tick_interval(Duration::from_millis(50));
        assert_eq!(c.node_id, "n1");
        assert_eq!(c.listen_addr(), "127.0.0.1:0".parse().unwrap());
        assert_eq!(c.max_recv_speed, 100);
        assert_eq!(c.tick_interval, Duration::from_millis(50));
    }
}
