// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node assembly: connection manager, tick source, peer directory and the
//! `p2p` service module.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dbc_net::protocol::{
    create_nonce, NetworkAddress, PeerNodeInfo, GET_PEER_NODES_REQ, GET_PEER_NODES_RESP,
    PEER_NODES_BROADCAST_REQ, VER_REQ, VER_RESP,
};
use dbc_net::timer::REPEAT_FOREVER;
use dbc_net::{
    ConnectionManager, HandlerFactory, Message, MessageBody, NetState, PeerDirectory,
    ServiceModule, SubscriptionId, TickSource, TopicBus,
};
use parking_lot::Mutex;

use crate::config::{NodeConfig, NodeError};

const CHECK_PEERS_TIMER: &str = "check_peer_candidates";
const PEER_EXCHANGE_TIMER: &str = "peer_info_exchange";
const METRICS_TIMER: &str = "log_metrics";

/// Delay before the first candidate check.
const FIRST_CHECK_DELAY: Duration = Duration::from_secs(5);

/// Peers carried in one peer list message.
const MAX_SEND_PEER_NODES: usize = 50;

/// A running node.
pub struct Node {
    config: NodeConfig,
    bus: Arc<TopicBus>,
    manager: Arc<ConnectionManager>,
    ticks: TickSource,
    peers: Arc<PeerDirectory>,
    p2p: ServiceModule,
    peer_subscriptions: Mutex<Vec<SubscriptionId>>,
    listen_addr: Mutex<Option<SocketAddr>>,
}

impl Node {
    /// Build the node; a missing node id is generated.
    pub fn new(mut config: NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;
        if config.node_id.is_empty() {
            config.node_id = create_nonce();
        }
        let net = config.to_net_config()?;
        let tick_interval = net.tick_interval;

        let bus = Arc::new(TopicBus::new());
        let manager = Arc::new(ConnectionManager::new(net, Arc::clone(&bus))?);
        let ticks = TickSource::new(Arc::clone(&bus), tick_interval);
        let peers = Arc::new(PeerDirectory::default());
        let p2p = ServiceModule::new("p2p", Arc::clone(&bus), tick_interval);

        Ok(Self {
            config,
            bus,
            manager,
            ticks,
            peers,
            p2p,
            peer_subscriptions: Mutex::new(Vec::new()),
            listen_addr: Mutex::new(None),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn peers(&self) -> &Arc<PeerDirectory> {
        &self.peers
    }

    /// Bound listen address once started.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        *self.listen_addr.lock()
    }

    /// Start networking, seed the peer directory and run the `p2p` module.
    pub fn start(&self) -> Result<(), NodeError> {
        self.manager.init()?;
        self.manager.start()?;

        let requested = self.manager.config().listen_addr();
        let bound = self
            .manager
            .start_listen(requested, self.manager.server_handler_factory())?;
        *self.listen_addr.lock() = Some(bound);
        tracing::info!(node_id = %self.config.node_id, listen = %bound, "node listening");

        for addr in self.config.peer_addrs()? {
            self.peers.add_candidate(addr, NetState::Idle, "");
        }
        *self.peer_subscriptions.lock() = self.peers.attach(&self.bus);

        self.bind_p2p();
        self.schedule_timers();
        self.p2p.start()?;
        self.ticks.start()?;
        tracing::info!(peers = self.peers.len(), "p2p service running");
        Ok(())
    }

    /// Stop the module, the tick source, then the network. Idempotent.
    pub fn shutdown(&self) {
        self.p2p.stop();
        self.ticks.stop();
        for id in self.peer_subscriptions.lock().drain(..) {
            self.bus.unsubscribe_id(id);
        }
        self.manager.stop();
        tracing::info!(node_id = %self.config.node_id, "node stopped");
    }

    fn bind_p2p(&self) {
        let magic = self.manager.config().magic();
        let node_id = self.config.node_id.clone();

        // client side login: the peer answered our VER_REQ
        let manager = Arc::clone(&self.manager);
        let peers = Arc::clone(&self.peers);
        self.p2p.bind_message(VER_RESP, move |_ctx, msg| {
            let MessageBody::VerResp(resp) = &msg.body else {
                return Ok(());
            };
            if let Some(channel) = manager.registry().get(msg.src_sid) {
                peers.mark_available(channel.remote_addr(), &resp.node_id);
            }
            let req = Message::new(GET_PEER_NODES_REQ, MessageBody::GetPeerNodesReq)
                .with_magic(magic)
                .with_new_nonce();
            manager.send_message(msg.src_sid, req)
        });

        // server side: remember where the peer says it listens
        let peers = Arc::clone(&self.peers);
        let own_id = node_id.clone();
        self.p2p.bind_message(VER_REQ, move |_ctx, msg| {
            if let MessageBody::VerReq(req) = &msg.body {
                if req.node_id != own_id {
                    if let Some(addr) = reachable(&req.addr_me) {
                        peers.add_candidate(addr, NetState::Available, &req.node_id);
                    }
                }
            }
            Ok(())
        });

        let manager = Arc::clone(&self.manager);
        let peers = Arc::clone(&self.peers);
        self.p2p.bind_message(GET_PEER_NODES_REQ, move |_ctx, msg| {
            let resp = Message::new(GET_PEER_NODES_RESP, peer_list(&peers))
                .with_magic(magic)
                .with_new_nonce()
                .with_session(msg.header.session_id.clone());
            manager.send_message(msg.src_sid, resp)
        });

        for name in [GET_PEER_NODES_RESP, PEER_NODES_BROADCAST_REQ] {
            let peers = Arc::clone(&self.peers);
            let own_id = node_id.clone();
            self.p2p.bind_message(name, move |_ctx, msg| {
                let MessageBody::PeerNodes(list) = &msg.body else {
                    return Ok(());
                };
                let mut added = 0;
                for info in list.iter().filter(|i| i.node_id != own_id) {
                    if let Some(addr) = reachable(&info.addr) {
                        if peers.add_candidate(addr, NetState::Idle, &info.node_id) {
                            added += 1;
                        }
                    }
                }
                tracing::debug!(from = %msg.src_sid, received = list.len(), added, "peer list");
                Ok(())
            });
        }

        let manager = Arc::clone(&self.manager);
        let peers = Arc::clone(&self.peers);
        let factory: HandlerFactory = self.manager.client_handler_factory();
        let max_outbound = self.config.max_outbound;
        let per_check = self.config.max_connect_per_check;
        let own_id = node_id;
        self.p2p.bind_timer(CHECK_PEERS_TIMER, move |_ctx, _fired| {
            peers.purge_failed();
            let need = max_outbound.saturating_sub(manager.out_connect_count());
            for addr in peers.select_for_connect(need.min(per_check), &own_id) {
                if let Err(e) = manager.start_connect(addr, Arc::clone(&factory)) {
                    tracing::warn!(peer = %addr, error = %e, "connect not started");
                    peers.on_connect_result(addr, false);
                }
            }
            tracing::debug!(
                candidates = peers.len(),
                maybe_available = peers.maybe_available_count(),
                outbound = manager.out_connect_count(),
                "peer candidates checked"
            );
            Ok(())
        });

        let manager = Arc::clone(&self.manager);
        let peers = Arc::clone(&self.peers);
        self.p2p.bind_timer(PEER_EXCHANGE_TIMER, move |_ctx, _fired| {
            let msg = Message::new(PEER_NODES_BROADCAST_REQ, peer_list(&peers))
                .with_magic(magic)
                .with_new_nonce();
            match manager.broadcast_message(msg, None) {
                Ok(sent) => tracing::debug!(channels = sent, "peer list broadcast"),
                // nobody logged in yet
                Err(dbc_net::Error::InactiveChannel) => {}
                Err(e) => return Err(e),
            }
            Ok(())
        });

        let manager = Arc::clone(&self.manager);
        self.p2p.bind_timer(METRICS_TIMER, move |_ctx, _fired| {
            let m = manager.metrics().snapshot();
            tracing::info!(
                active = m.active_connections,
                inbound = manager.in_connect_count(),
                outbound = manager.out_connect_count(),
                msgs_in = m.messages_received,
                msgs_out = m.messages_sent,
                duplicates = m.duplicates_dropped,
                framing_errors = m.framing_errors,
                queue_full = m.queue_full,
                "network metrics"
            );
            Ok(())
        });
    }

    fn schedule_timers(&self) {
        let check_ms = self.config.check_peers_secs * 1000;
        let first_ms = (FIRST_CHECK_DELAY.as_millis() as u64).min(check_ms);
        self.p2p.add_timer(CHECK_PEERS_TIMER, first_ms, first_ms, 1);
        self.p2p
            .add_timer(CHECK_PEERS_TIMER, check_ms, check_ms, REPEAT_FOREVER);

        let exchange_ms = self.config.peer_exchange_secs * 1000;
        self.p2p
            .add_timer(PEER_EXCHANGE_TIMER, exchange_ms, exchange_ms, REPEAT_FOREVER);

        if self.config.metrics_interval_secs > 0 {
            let metrics_ms = self.config.metrics_interval_secs * 1000;
            self.p2p
                .add_timer(METRICS_TIMER, metrics_ms, metrics_ms, REPEAT_FOREVER);
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Address a peer can be dialled on, if the advertised one is usable.
fn reachable(addr: &NetworkAddress) -> Option<SocketAddr> {
    let ip: IpAddr = addr.ip.parse().ok()?;
    if ip.is_unspecified() || addr.port == 0 {
        return None;
    }
    Some(SocketAddr::new(ip, addr.port))
}

fn peer_list(peers: &PeerDirectory) -> MessageBody {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64);
    let list = peers
        .available_candidates(MAX_SEND_PEER_NODES)
        .into_iter()
        .map(|c| PeerNodeInfo {
            node_id: c.node_id,
            live_time_stamp: now,
            addr: NetworkAddress::from(c.endpoint),
            service_list: Vec::new(),
        })
        .collect();
    MessageBody::PeerNodes(list)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn local_config(node_id: &str) -> NodeConfig {
        NodeConfig {
            net: "test".into(),
            node_id: node_id.into(),
            listen_ip: "127.0.0.1".into(),
            listen_port: Some(0),
            worker_threads: 1,
            check_peers_secs: 1,
            metrics_interval_secs: 0,
            ..NodeConfig::default()
        }
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        cond()
    }

    #[test]
    fn test_reachable() {
        let ok = NetworkAddress {
            ip: "10.1.2.3".into(),
            port: 11107,
        };
        assert_eq!(reachable(&ok), Some("10.1.2.3:11107".parse().unwrap()));
        let wildcard = NetworkAddress {
            ip: "0.0.0.0".into(),
            port: 11107,
        };
        assert_eq!(reachable(&wildcard), None);
        let no_port = NetworkAddress {
            ip: "10.1.2.3".into(),
            port: 0,
        };
        assert_eq!(reachable(&no_port), None);
        let garbage = NetworkAddress {
            ip: "nope".into(),
            port: 1,
        };
        assert_eq!(reachable(&garbage), None);
    }

    #[test]
    fn test_generated_node_id() {
        let node = Node::new(local_config("")).unwrap();
        assert_eq!(node.node_id().len(), 32);
    }

    #[test]
    fn test_seed_peer_becomes_available() {
        let a = Node::new(local_config("node-a")).unwrap();
        a.start().unwrap();
        let a_addr = a.listen_addr().unwrap();

        let b = Node::new(NodeConfig {
            peers: vec![a_addr.to_string()],
            ..local_config("node-b")
        })
        .unwrap();
        b.start().unwrap();
        assert_eq!(b.peers().get(a_addr).unwrap().net_state, NetState::Idle);

        assert!(wait_until(Duration::from_secs(10), || b
            .peers()
            .get(a_addr)
            .is_some_and(|c| c.net_state == NetState::Available)));
        assert_eq!(b.peers().get(a_addr).unwrap().node_id, "node-a");
        assert_eq!(b.manager().out_connect_count(), 1);

        b.shutdown();
        b.shutdown();
        a.shutdown();
    }
}
