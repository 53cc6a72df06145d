// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared helpers for loopback tests.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use dbc_net::{
    ConnectionManager, HandshakeConfig, Message, MessageBody, NetConfig, NetType, PoolConfig,
    TopicBus,
};

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
pub const WAIT: Duration = Duration::from_secs(5);

/// Test-net config with small pools and fast timers.
pub fn test_config(node_id: &str) -> NetConfig {
    NetConfig::for_net(NetType::Test)
        .with_node_id(node_id)
        .with_listen(LOCALHOST, 0)
        .with_pools(PoolConfig {
            acceptor_threads: 1,
            worker_threads: 2,
            connector_threads: 1,
        })
        .with_reconnect(Duration::from_millis(50), 1)
        .with_tick_interval(Duration::from_millis(20))
        .with_handshake(HandshakeConfig {
            shake_hand_interval: Duration::from_millis(500),
            wait_version_interval: Duration::from_millis(500),
            lost_shake_hand_max: 3,
        })
}

/// A running manager with its bus.
pub struct Node {
    pub manager: ConnectionManager,
    pub bus: Arc<TopicBus>,
}

impl Node {
    pub fn start(config: NetConfig) -> Self {
        let bus = Arc::new(TopicBus::new());
        let manager = ConnectionManager::new(config, Arc::clone(&bus)).unwrap();
        manager.init().unwrap();
        manager.start().unwrap();
        Self { manager, bus }
    }

    /// Listen on an ephemeral loopback port with the server handshake.
    pub fn listen(&self) -> SocketAddr {
        let factory = self.manager.server_handler_factory();
        self.manager
            .start_listen(SocketAddr::new(LOCALHOST, 0), factory)
            .unwrap()
    }

    pub fn magic(&self) -> i32 {
        self.manager.config().magic()
    }

    /// Opaque application message carrying `payload`, with a fresh nonce.
    pub fn app_message(&self, name: &str, payload: Vec<u8>) -> Message {
        Message::new(name, MessageBody::Opaque(payload))
            .with_magic(self.magic())
            .with_new_nonce()
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}
