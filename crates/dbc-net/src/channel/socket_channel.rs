// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Socket channel: the shared, thread-safe face of one TCP connection.
//!
//! # Lifecycle
//!
//! ```text
//!   open_channel()            VER_REQ/VER_RESP           stop() / on_error()
//!  ---------------> [running] -----------------> [ready] ------------------> [stopped]
//!   registered,                logged_in = true            deregistered,
//!   driver attached                                        queue cleared
//! ```
//!
//! The socket itself is owned by the [`super::ChannelDriver`] on a worker
//! reactor. Other threads only see this struct: they queue messages with
//! [`SocketChannel::write`] and the driver drains the queue in FIFO order.
//! The channel keeps a weak handle to the registry it lives in; the registry
//! holds the strong one.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use mio::Token;
use parking_lot::Mutex;

use crate::bus::TopicBus;
use crate::connection::ChannelRegistry;
use crate::error::{Error, Result};
use crate::metrics::NetMetrics;
use crate::protocol::{ChannelErrorNotification, Message, TCP_CHANNEL_ERROR};
use crate::reactor::ReactorHandle;
use crate::socket_id::SocketId;

/// One live TCP connection.
pub struct SocketChannel {
    sid: SocketId,
    remote_addr: SocketAddr,
    local_addr: Option<SocketAddr>,
    reactor: ReactorHandle,
    token: Token,

    send_queue: Mutex<VecDeque<Arc<Message>>>,
    max_queue: usize,

    stopped: AtomicBool,
    /// Set by the one caller allowed to publish the error notification.
    error_reported: AtomicBool,
    logged_in: AtomicBool,
    remote_node_id: Mutex<Option<String>>,

    registry: Weak<ChannelRegistry>,
    bus: Arc<TopicBus>,
    metrics: Arc<NetMetrics>,
}

impl SocketChannel {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        sid: SocketId,
        remote_addr: SocketAddr,
        local_addr: Option<SocketAddr>,
        reactor: ReactorHandle,
        token: Token,
        max_queue: usize,
        registry: Weak<ChannelRegistry>,
        bus: Arc<TopicBus>,
        metrics: Arc<NetMetrics>,
    ) -> Self {
        Self {
            sid,
            remote_addr,
            local_addr,
            reactor,
            token,
            send_queue: Mutex::new(VecDeque::new()),
            max_queue,
            stopped: AtomicBool::new(false),
            error_reported: AtomicBool::new(false),
            logged_in: AtomicBool::new(false),
            remote_node_id: Mutex::new(None),
            registry,
            bus,
            metrics,
        }
    }

    pub fn sid(&self) -> SocketId {
        self.sid
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Reactor thread serving this channel.
    pub fn reactor_name(&self) -> &str {
        self.reactor.name()
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Queue `msg` for sending.
    ///
    /// Messages leave in the order they were queued. Fails with
    /// [`Error::QueueFull`] once `max_send_queue` messages are waiting and
    /// with [`Error::ChannelStopped`] after `stop`.
    pub fn write(&self, msg: Arc<Message>) -> Result<()> {
        if self.is_stopped() {
            return Err(Error::ChannelStopped(self.sid));
        }

        let was_empty = {
            let mut queue = self.send_queue.lock();
            if queue.len() >= self.max_queue {
                self.metrics.record_queue_full();
                return Err(Error::QueueFull(self.max_queue));
            }
            let was_empty = queue.is_empty();
            queue.push_back(msg);
            was_empty
        };

        // a non-empty queue is already being drained by the driver
        if was_empty {
            self.reactor.notify(self.token)?;
        }
        Ok(())
    }

    /// Convenience wrapper around [`Self::write`].
    pub fn send(&self, msg: Message) -> Result<()> {
        self.write(Arc::new(msg))
    }

    pub fn queue_len(&self) -> usize {
        self.send_queue.lock().len()
    }

    pub(crate) fn front(&self) -> Option<Arc<Message>> {
        self.send_queue.lock().front().cloned()
    }

    pub(crate) fn pop_front(&self) -> Option<Arc<Message>> {
        self.send_queue.lock().pop_front()
    }

    // ========================================================================
    // State
    // ========================================================================

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::Acquire)
    }

    /// Logged in and not stopped.
    pub fn is_ready(&self) -> bool {
        self.is_logged_in() && !self.is_stopped()
    }

    pub(crate) fn set_logged_in(&self) {
        self.logged_in.store(true, Ordering::Release);
    }

    /// Node id the peer announced during the handshake.
    pub fn remote_node_id(&self) -> Option<String> {
        self.remote_node_id.lock().clone()
    }

    pub(crate) fn set_remote_node_id(&self, node_id: &str) {
        *self.remote_node_id.lock() = Some(node_id.to_string());
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Stop the channel. Idempotent.
    ///
    /// Deregisters from the registry, drops queued messages and detaches the
    /// driver; pending reactor callbacks see the stopped flag and return.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(registry) = self.registry.upgrade() {
            registry.remove_channel(self.sid);
        }
        self.send_queue.lock().clear();
        // fails only when the reactor is already gone, which closes the socket too
        let _ = self.reactor.detach(self.token);
        self.metrics.record_connection_closed();
        log::debug!("[CHANNEL] {} {} stopped", self.sid, self.remote_addr);
    }

    /// Report a fatal error on the bus, then stop.
    ///
    /// At most one notification is published per channel, whichever of the
    /// reactor and another thread gets here first.
    pub fn on_error(&self, reason: &str) {
        if self.is_stopped() || self.error_reported.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("[CHANNEL] {} {} error: {}", self.sid, self.remote_addr, reason);
        let notification = ChannelErrorNotification {
            sid: self.sid,
            endpoint: self.remote_addr,
            logged_in: self.is_logged_in(),
            reason: reason.to_string(),
        };
        self.bus.publish(TCP_CHANNEL_ERROR, &notification);
        self.stop();
    }
}

impl std::fmt::Debug for SocketChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketChannel")
            .field("sid", &self.sid)
            .field("remote_addr", &self.remote_addr)
            .field("logged_in", &self.is_logged_in())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocol::{MessageBody, GET_PEER_NODES_REQ};
    use crate::reactor::Reactor;
    use crate::socket_id::SocketKind;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Channel bound to a running reactor that has no driver attached.
    pub(crate) struct TestChannel {
        pub reactor: Reactor,
        pub registry: Arc<ChannelRegistry>,
        pub bus: Arc<TopicBus>,
        pub metrics: Arc<NetMetrics>,
        pub channel: Arc<SocketChannel>,
    }

    pub(crate) fn test_channel(max_queue: usize) -> TestChannel {
        let reactor = Reactor::new(0, "chan-test", Duration::from_millis(50)).unwrap();
        reactor.start().unwrap();
        let handle = reactor.handle();
        let registry = Arc::new(ChannelRegistry::new());
        let bus = Arc::new(TopicBus::new());
        let metrics = Arc::new(NetMetrics::new());
        let channel = Arc::new(SocketChannel::new(
            SocketId::new(SocketKind::Client, 1),
            "127.0.0.1:54321".parse().unwrap(),
            None,
            handle.clone(),
            handle.alloc_token(),
            max_queue,
            Arc::downgrade(&registry),
            Arc::clone(&bus),
            Arc::clone(&metrics),
        ));
        registry.add_channel(Arc::clone(&channel)).unwrap();
        TestChannel {
            reactor,
            registry,
            bus,
            metrics,
            channel,
        }
    }

    /// Registered channel of the given kind; keep the reactor alive.
    pub(crate) fn socket_channel_for_tests(
        kind: SocketKind,
        sequence: u64,
    ) -> (Reactor, Arc<ChannelRegistry>, Arc<SocketChannel>) {
        let reactor = Reactor::new(0, "registry-test", Duration::from_millis(50)).unwrap();
        reactor.start().unwrap();
        let handle = reactor.handle();
        let registry = Arc::new(ChannelRegistry::new());
        let channel = Arc::new(SocketChannel::new(
            SocketId::new(kind, sequence),
            "127.0.0.1:40000".parse().unwrap(),
            None,
            handle.clone(),
            handle.alloc_token(),
            16,
            Arc::downgrade(&registry),
            Arc::new(TopicBus::new()),
            Arc::new(NetMetrics::new()),
        ));
        registry.add_channel(Arc::clone(&channel)).unwrap();
        (reactor, registry, channel)
    }

    fn msg(nonce: &str) -> Message {
        Message::new(GET_PEER_NODES_REQ, MessageBody::GetPeerNodesReq).with_nonce(nonce)
    }

    #[test]
    fn test_write_is_fifo() {
        let t = test_channel(16);
        for i in 0..5 {
            t.channel.send(msg(&i.to_string())).unwrap();
        }
        assert_eq!(t.channel.queue_len(), 5);
        for i in 0..5 {
            assert_eq!(t.channel.pop_front().unwrap().nonce(), i.to_string());
        }
    }

    #[test]
    fn test_queue_full() {
        let t = test_channel(2);
        t.channel.send(msg("a")).unwrap();
        t.channel.send(msg("b")).unwrap();
        assert!(matches!(t.channel.send(msg("c")), Err(Error::QueueFull(2))));
        assert_eq!(t.metrics.snapshot().queue_full, 1);
    }

    #[test]
    fn test_stop_is_idempotent_and_deregisters() {
        let t = test_channel(8);
        t.channel.send(msg("a")).unwrap();
        assert_eq!(t.registry.len(), 1);

        t.channel.stop();
        t.channel.stop();
        assert!(t.channel.is_stopped());
        assert_eq!(t.registry.len(), 0);
        assert_eq!(t.channel.queue_len(), 0);
        assert_eq!(t.metrics.snapshot().connections_closed, 1);
        assert!(matches!(t.channel.send(msg("b")), Err(Error::ChannelStopped(_))));
    }

    #[test]
    fn test_on_error_notifies_once() {
        let t = test_channel(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        t.bus
            .subscribe::<ChannelErrorNotification, _>(TCP_CHANNEL_ERROR, move |n| {
                s.lock().push(n.clone());
            });

        t.channel.on_error("reset by peer");
        t.channel.on_error("again");

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].reason, "reset by peer");
        assert!(!seen[0].logged_in);
        assert_eq!(seen[0].sid, t.channel.sid());
        assert!(t.channel.is_stopped());
    }

    #[test]
    fn test_concurrent_on_error_notifies_once() {
        let t = test_channel(8);
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        t.bus
            .subscribe::<ChannelErrorNotification, _>(TCP_CHANNEL_ERROR, move |_| {
                // widen the window between check and stop
                std::thread::sleep(Duration::from_millis(5));
                s.fetch_add(1, Ordering::SeqCst);
            });

        let barrier = Arc::new(std::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let channel = Arc::clone(&t.channel);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    if i % 2 == 0 {
                        channel.on_error("reset by peer");
                    } else {
                        channel.on_error("handshake timeout");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(t.channel.is_stopped());
        assert_eq!(t.metrics.snapshot().connections_closed, 1);
        t.reactor.stop();
    }

    #[test]
    fn test_ready_requires_login() {
        let t = test_channel(8);
        assert!(!t.channel.is_ready());
        t.channel.set_logged_in();
        t.channel.set_remote_node_id("peer-1");
        assert!(t.channel.is_ready());
        assert_eq!(t.channel.remote_node_id().as_deref(), Some("peer-1"));
        t.channel.stop();
        assert!(!t.channel.is_ready());
        assert!(t.channel.is_logged_in());
        t.reactor.stop();
    }
}
