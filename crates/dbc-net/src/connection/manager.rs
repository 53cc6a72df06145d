// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection manager.
//!
//! Owns the three reactor pools, the listeners, the connectors and the live
//! channel table, and is the surface the rest of the node talks to:
//!
//! - lifecycle: [`ConnectionManager::init`], [`start`](ConnectionManager::start),
//!   [`stop`](ConnectionManager::stop)
//! - endpoints: [`start_listen`](ConnectionManager::start_listen),
//!   [`start_connect`](ConnectionManager::start_connect) and their `stop_*`
//! - traffic: [`send_message`](ConnectionManager::send_message),
//!   [`broadcast_message`](ConnectionManager::broadcast_message),
//!   [`send_resp_message`](ConnectionManager::send_resp_message)
//!
//! Shutdown order is listeners, then connectors, then channels, then the
//! reactor threads, so no new work appears while tearing down.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use mio::Token;
use parking_lot::{Mutex, RwLock};

use super::acceptor::{bind_listener, Acceptor};
use super::connector::{Connector, ConnectorStatus};
use super::registry::ChannelRegistry;
use crate::bus::TopicBus;
use crate::channel::{ClientHandshake, HandlerFactory, HandshakeParams, ServerHandshake};
use crate::config::NetConfig;
use crate::context::NetContext;
use crate::error::{Error, Result};
use crate::metrics::NetMetrics;
use crate::protocol::Message;
use crate::reactor::{ReactorHandle, ReactorPool};
use crate::socket_id::{SocketId, SocketKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Initialized,
    Running,
    Stopped,
}

struct ListenerEntry {
    requested: SocketAddr,
    local: SocketAddr,
    reactor: ReactorHandle,
    token: Token,
}

struct ConnectorEntry {
    addr: SocketAddr,
    reactor: ReactorHandle,
    token: Token,
    status: Arc<Mutex<ConnectorStatus>>,
}

/// Networking front door of a node.
pub struct ConnectionManager {
    ctx: Arc<NetContext>,
    registry: Arc<ChannelRegistry>,
    acceptor_pool: ReactorPool,
    worker_pool: Arc<ReactorPool>,
    connector_pool: ReactorPool,
    acceptors: RwLock<Vec<ListenerEntry>>,
    connectors: RwLock<HashMap<SocketId, ConnectorEntry>>,
    state: Mutex<Lifecycle>,
}

impl ConnectionManager {
    /// Validate `config` and build a manager around a fresh [`NetContext`].
    pub fn new(config: NetConfig, bus: Arc<TopicBus>) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_context(Arc::new(NetContext::new(config, bus))))
    }

    /// Build a manager around an existing context (custom codec table).
    pub fn with_context(ctx: Arc<NetContext>) -> Self {
        let tick = ctx.config.tick_interval;
        Self {
            registry: Arc::new(ChannelRegistry::new()),
            acceptor_pool: ReactorPool::new("acceptor", tick),
            worker_pool: Arc::new(ReactorPool::new("worker", tick)),
            connector_pool: ReactorPool::new("connector", tick),
            acceptors: RwLock::new(Vec::new()),
            connectors: RwLock::new(HashMap::new()),
            state: Mutex::new(Lifecycle::Created),
            ctx,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create the reactor pools.
    pub fn init(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != Lifecycle::Created {
            return Err(Error::InvalidState(format!("init in state {:?}", *state)));
        }
        let pools = &self.ctx.config.pools;
        self.acceptor_pool.init(pools.acceptor_threads)?;
        self.worker_pool.init(pools.worker_threads)?;
        self.connector_pool.init(pools.connector_threads)?;
        *state = Lifecycle::Initialized;
        Ok(())
    }

    /// Start every reactor thread; all or nothing.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != Lifecycle::Initialized {
            return Err(Error::InvalidState(format!("start in state {:?}", *state)));
        }

        self.acceptor_pool.start()?;
        if let Err(e) = self.worker_pool.start() {
            self.acceptor_pool.stop();
            return Err(e);
        }
        if let Err(e) = self.connector_pool.start() {
            self.worker_pool.stop();
            self.acceptor_pool.stop();
            return Err(e);
        }

        *state = Lifecycle::Running;
        log::info!(
            "[CONN-MGR] started ({} acceptor, {} worker, {} connector threads)",
            self.acceptor_pool.size(),
            self.worker_pool.size(),
            self.connector_pool.size()
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        *self.state.lock() == Lifecycle::Running
    }

    fn ensure_running(&self) -> Result<()> {
        match *self.state.lock() {
            Lifecycle::Running => Ok(()),
            other => Err(Error::InvalidState(format!("manager is {:?}", other))),
        }
    }

    /// Ordered shutdown; idempotent.
    pub fn stop(&self) {
        {
            // released before teardown: bus callbacks fired by closing
            // channels may query the manager
            let mut state = self.state.lock();
            let previous = std::mem::replace(&mut *state, Lifecycle::Stopped);
            if matches!(previous, Lifecycle::Stopped | Lifecycle::Created) {
                return;
            }
        }

        for entry in self.acceptors.write().drain(..) {
            let _ = entry.reactor.detach(entry.token);
        }
        for (_, entry) in self.connectors.write().drain() {
            let _ = entry.reactor.detach(entry.token);
        }
        let channels = self.registry.drain();
        let closed = channels.len();
        for channel in channels {
            channel.stop();
        }

        self.acceptor_pool.stop();
        self.connector_pool.stop();
        self.worker_pool.stop();
        log::info!("[CONN-MGR] stopped ({} channels closed)", closed);
    }

    /// Stop and release the manager.
    pub fn exit(self) {
        self.stop();
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    /// Bind `addr` and accept connections, building each channel's handler
    /// with `factory`. Returns the bound address (useful with port 0).
    pub fn start_listen(&self, addr: SocketAddr, factory: HandlerFactory) -> Result<SocketAddr> {
        self.ensure_running()?;
        if addr.port() != 0
            && self
                .acceptors
                .read()
                .iter()
                .any(|e| e.requested == addr || e.local == addr)
        {
            return Err(Error::ListenerExists(addr));
        }

        let listener = bind_listener(addr, self.ctx.config.socket.listen_backlog)?;
        let acceptor = Acceptor::new(
            listener,
            factory,
            Arc::clone(&self.ctx),
            Arc::clone(&self.registry),
            Arc::clone(&self.worker_pool),
        )?;
        let local = acceptor.local_addr();

        let reactor = self.acceptor_pool.next_reactor()?;
        let token = reactor.attach(Box::new(acceptor))?;
        self.acceptors.write().push(ListenerEntry {
            requested: addr,
            local,
            reactor,
            token,
        });
        Ok(local)
    }

    /// Close the listener bound to (or requested as) `addr`.
    pub fn stop_listen(&self, addr: SocketAddr) -> Result<()> {
        let entry = {
            let mut acceptors = self.acceptors.write();
            let idx = acceptors
                .iter()
                .position(|e| e.local == addr || e.requested == addr)
                .ok_or(Error::ListenerNotFound(addr))?;
            acceptors.remove(idx)
        };
        let _ = entry.reactor.detach(entry.token);
        Ok(())
    }

    /// Bound addresses of every listener.
    pub fn local_listen_addrs(&self) -> Vec<SocketAddr> {
        self.acceptors.read().iter().map(|e| e.local).collect()
    }

    // ========================================================================
    // Connectors
    // ========================================================================

    /// Connect to `addr` with the configured retry budget.
    pub fn start_connect(&self, addr: SocketAddr, factory: HandlerFactory) -> Result<SocketId> {
        self.start_connect_with_retry(addr, factory, self.ctx.config.max_reconnect_times)
    }

    /// Connect to `addr`, retrying up to `retry_budget` times after the first
    /// failure. Returns the connector's id, which its first channel carries;
    /// retries open their channels under fresh ids.
    pub fn start_connect_with_retry(
        &self,
        addr: SocketAddr,
        factory: HandlerFactory,
        retry_budget: u32,
    ) -> Result<SocketId> {
        self.ensure_running()?;
        let mut connectors = self.connectors.write();
        connectors.retain(|_, e| !e.status.lock().is_terminal());
        if connectors.values().any(|e| e.addr == addr) {
            return Err(Error::InvalidState(format!("already connecting to {}", addr)));
        }

        let sid = self.ctx.socket_ids.alloc_client();
        let status = Arc::new(Mutex::new(ConnectorStatus::Connecting));
        let connector = Connector::new(
            addr,
            sid,
            factory,
            Arc::clone(&self.ctx),
            Arc::clone(&self.registry),
            Arc::clone(&self.worker_pool),
            retry_budget,
            Arc::clone(&status),
        );
        let reactor = self.connector_pool.next_reactor()?;
        let token = reactor.attach(Box::new(connector))?;
        connectors.insert(
            sid,
            ConnectorEntry {
                addr,
                reactor,
                token,
                status,
            },
        );
        log::debug!("[CONN-MGR] connector {} -> {}", sid, addr);
        Ok(sid)
    }

    /// Cancel every connector targeting `addr`. Established channels stay.
    pub fn stop_connect(&self, addr: SocketAddr) -> Result<()> {
        let removed: Vec<ConnectorEntry> = {
            let mut connectors = self.connectors.write();
            let sids: Vec<SocketId> = connectors
                .iter()
                .filter(|(_, e)| e.addr == addr)
                .map(|(sid, _)| *sid)
                .collect();
            sids.iter().filter_map(|sid| connectors.remove(sid)).collect()
        };
        if removed.is_empty() {
            return Err(Error::ConnectorNotFound(addr.to_string()));
        }
        for entry in removed {
            let _ = entry.reactor.detach(entry.token);
        }
        Ok(())
    }

    /// Forget a connector, cancelling it if still active.
    pub fn release_connector(&self, sid: SocketId) -> Result<()> {
        let entry = self
            .connectors
            .write()
            .remove(&sid)
            .ok_or_else(|| Error::ConnectorNotFound(sid.to_string()))?;
        if !entry.status.lock().is_terminal() {
            let _ = entry.reactor.detach(entry.token);
        }
        Ok(())
    }

    pub fn connector_status(&self, sid: SocketId) -> Option<ConnectorStatus> {
        self.connectors.read().get(&sid).map(|e| *e.status.lock())
    }

    // ========================================================================
    // Traffic
    // ========================================================================

    /// Queue `msg` on channel `sid`.
    pub fn send_message(&self, sid: SocketId, msg: Message) -> Result<()> {
        let channel = self.registry.get(sid).ok_or(Error::ChannelNotFound(sid))?;
        channel.send(msg)
    }

    /// Queue `msg` on every logged-in channel except `exclude`.
    ///
    /// Returns how many channels accepted it. The message must carry a nonce
    /// so that peers relaying it back are filtered out.
    pub fn broadcast_message(&self, msg: Message, exclude: Option<SocketId>) -> Result<usize> {
        if msg.nonce().is_empty() {
            return Err(Error::MissingNonce);
        }
        let msg = Arc::new(msg);
        let mut sent = 0;
        for channel in self.registry.snapshot() {
            if Some(channel.sid()) == exclude || !channel.is_ready() {
                continue;
            }
            match channel.write(Arc::clone(&msg)) {
                Ok(()) => sent += 1,
                Err(e) => log::debug!(
                    "[CONN-MGR] broadcast {} skipped {}: {}",
                    msg.name(),
                    channel.sid(),
                    e
                ),
            }
        }
        if sent == 0 {
            return Err(Error::InactiveChannel);
        }
        Ok(sent)
    }

    /// Route a response back along the request path.
    ///
    /// Pops the last hop off `header.path` and sends to the logged-in
    /// channel whose peer announced that node id.
    pub fn send_resp_message(&self, mut msg: Message) -> Result<()> {
        let hop = msg
            .header
            .path
            .pop()
            .ok_or_else(|| Error::InvalidState(format!("{} has an empty path", msg.name())))?;
        let channel = self
            .registry
            .find_by_node_id(&hop)
            .ok_or(Error::InactiveChannel)?;
        channel.send(msg)
    }

    // ========================================================================
    // Channels
    // ========================================================================

    pub fn stop_channel(&self, sid: SocketId) -> Result<()> {
        let channel = self.registry.get(sid).ok_or(Error::ChannelNotFound(sid))?;
        channel.stop();
        Ok(())
    }

    pub fn channel_count(&self) -> usize {
        self.registry.len()
    }

    /// Live inbound channels.
    pub fn in_connect_count(&self) -> usize {
        self.registry.count_by_kind(SocketKind::Server)
    }

    /// Live outbound channels.
    pub fn out_connect_count(&self) -> usize {
        self.registry.count_by_kind(SocketKind::Client)
    }

    pub fn is_channel_ready(&self, sid: SocketId) -> bool {
        self.registry.get(sid).is_some_and(|c| c.is_ready())
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    // ========================================================================
    // Handlers and shared state
    // ========================================================================

    /// Handshake factory for outbound channels.
    pub fn client_handler_factory(&self) -> HandlerFactory {
        ClientHandshake::factory(Arc::new(HandshakeParams::from_config(&self.ctx.config)))
    }

    /// Handshake factory for accepted channels.
    pub fn server_handler_factory(&self) -> HandlerFactory {
        ServerHandshake::factory(Arc::new(HandshakeParams::from_config(&self.ctx.config)))
    }

    pub fn context(&self) -> &Arc<NetContext> {
        &self.ctx
    }

    pub fn config(&self) -> &NetConfig {
        &self.ctx.config
    }

    pub fn metrics(&self) -> &Arc<NetMetrics> {
        &self.ctx.metrics
    }

    pub fn bus(&self) -> &Arc<TopicBus> {
        &self.ctx.bus
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &*self.state.lock())
            .field("channels", &self.registry.len())
            .field("listeners", &self.acceptors.read().len())
            .field("connectors", &self.connectors.read().len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::protocol::{MessageBody, GET_PEER_NODES_RESP};
    use crate::socket_id::SocketKind;
    use std::time::Duration;

    fn config() -> NetConfig {
        NetConfig::default()
            .with_node_id("node-a")
            .with_pools(PoolConfig {
                acceptor_threads: 1,
                worker_threads: 2,
                connector_threads: 1,
            })
            .with_tick_interval(Duration::from_millis(20))
    }

    fn running() -> ConnectionManager {
        let mgr = ConnectionManager::new(config(), Arc::new(TopicBus::new())).unwrap();
        mgr.init().unwrap();
        mgr.start().unwrap();
        mgr
    }

    fn msg() -> Message {
        Message::new(GET_PEER_NODES_RESP, MessageBody::PeerNodes(Vec::new()))
    }

    #[test]
    fn test_new_validates_config() {
        let bad = config().with_max_connect(0);
        assert!(matches!(
            ConnectionManager::new(bad, Arc::new(TopicBus::new())),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_lifecycle_order() {
        let mgr = ConnectionManager::new(config(), Arc::new(TopicBus::new())).unwrap();
        assert!(mgr.start().is_err());
        assert!(mgr
            .start_listen("127.0.0.1:0".parse().unwrap(), mgr.server_handler_factory())
            .is_err());
        mgr.init().unwrap();
        assert!(mgr.init().is_err());
        mgr.start().unwrap();
        assert!(mgr.is_running());

        mgr.stop();
        mgr.stop();
        assert!(!mgr.is_running());
        assert!(mgr.start().is_err());
    }

    #[test]
    fn test_listen_and_stop_listen() {
        let mgr = running();
        let addr = mgr
            .start_listen("127.0.0.1:0".parse().unwrap(), mgr.server_handler_factory())
            .unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(mgr.local_listen_addrs(), vec![addr]);
        assert!(matches!(
            mgr.start_listen(addr, mgr.server_handler_factory()),
            Err(Error::ListenerExists(_))
        ));

        mgr.stop_listen(addr).unwrap();
        assert!(mgr.local_listen_addrs().is_empty());
        assert!(matches!(mgr.stop_listen(addr), Err(Error::ListenerNotFound(_))));
        mgr.exit();
    }

    #[test]
    fn test_send_to_unknown_channel() {
        let mgr = running();
        let sid = SocketId::new(SocketKind::Client, 99);
        assert!(matches!(
            mgr.send_message(sid, msg()),
            Err(Error::ChannelNotFound(_))
        ));
        assert!(matches!(mgr.stop_channel(sid), Err(Error::ChannelNotFound(_))));
        assert!(!mgr.is_channel_ready(sid));
    }

    #[test]
    fn test_broadcast_requires_nonce_and_channels() {
        let mgr = running();
        assert!(matches!(
            mgr.broadcast_message(msg(), None),
            Err(Error::MissingNonce)
        ));
        assert!(matches!(
            mgr.broadcast_message(msg().with_new_nonce(), None),
            Err(Error::InactiveChannel)
        ));
    }

    #[test]
    fn test_send_resp_routing_errors() {
        let mgr = running();
        assert!(matches!(
            mgr.send_resp_message(msg()),
            Err(Error::InvalidState(_))
        ));
        let mut routed = msg();
        routed.header.path = vec!["node-x".into()];
        assert!(matches!(
            mgr.send_resp_message(routed),
            Err(Error::InactiveChannel)
        ));
    }

    #[test]
    fn test_connector_bookkeeping() {
        let mgr = running();
        assert!(matches!(
            mgr.stop_connect("127.0.0.1:9".parse().unwrap()),
            Err(Error::ConnectorNotFound(_))
        ));
        assert!(mgr
            .release_connector(SocketId::new(SocketKind::Client, 1))
            .is_err());

        // nothing listens here; the connector keeps retrying with a long base delay
        let target: SocketAddr = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };
        let sid = mgr
            .start_connect_with_retry(target, mgr.client_handler_factory(), 5)
            .unwrap();
        assert!(sid.is_client());
        assert!(mgr.connector_status(sid).is_some());
        assert!(matches!(
            mgr.start_connect(target, mgr.client_handler_factory()),
            Err(Error::InvalidState(_))
        ));

        mgr.stop_connect(target).unwrap();
        assert!(mgr.connector_status(sid).is_none());
    }
}
