// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Listening socket driven by an acceptor reactor.

use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::sync::Arc;

use mio::net::TcpListener;
use mio::{Interest, Registry, Token};
use socket2::{Domain, Protocol, Socket, Type};

use super::{open_channel, ChannelRegistry};
use crate::channel::HandlerFactory;
use crate::context::NetContext;
use crate::reactor::{Action, CloseReason, EventHandler, Readiness, ReactorPool};
use crate::socket_id::SocketKind;

/// Bind a non-blocking listener with `SO_REUSEADDR`.
pub(crate) fn bind_listener(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    socket.set_nonblocking(true)?;
    let listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(listener))
}

pub(crate) struct Acceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
    factory: HandlerFactory,
    ctx: Arc<NetContext>,
    registry: Arc<ChannelRegistry>,
    workers: Arc<ReactorPool>,
}

impl Acceptor {
    pub(crate) fn new(
        listener: TcpListener,
        factory: HandlerFactory,
        ctx: Arc<NetContext>,
        registry: Arc<ChannelRegistry>,
        workers: Arc<ReactorPool>,
    ) -> io::Result<Self> {
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            factory,
            ctx,
            registry,
            workers,
        })
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn accept_all(&mut self) -> io::Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                // the peer gave up before we got to it
                Err(e) if e.kind() == ErrorKind::ConnectionAborted => continue,
                Err(e) => return Err(e),
            };
            self.ctx.metrics.record_connection_accepted();

            let max = self.ctx.config.max_connect;
            if self.registry.count_by_kind(SocketKind::Server) >= max {
                log::warn!(
                    "[ACCEPTOR] {} rejected {}: connection limit {} reached",
                    self.local_addr,
                    peer,
                    max
                );
                drop(stream);
                continue;
            }

            let sid = self.ctx.socket_ids.alloc_server();
            match open_channel(
                &self.ctx,
                &self.registry,
                &self.workers,
                stream,
                sid,
                &self.factory,
            ) {
                Ok(_) => log::debug!("[ACCEPTOR] {} accepted {} as {}", self.local_addr, peer, sid),
                Err(e) => log::warn!("[ACCEPTOR] {} failed to open {}: {}", self.local_addr, peer, e),
            }
        }
    }
}

impl EventHandler for Acceptor {
    fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        registry.register(&mut self.listener, token, Interest::READABLE)?;
        log::info!("[ACCEPTOR] listening on {}", self.local_addr);
        Ok(())
    }

    fn ready(&mut self, _registry: &Registry, readiness: Readiness) -> Action {
        if readiness.readable {
            if let Err(e) = self.accept_all() {
                // transient accept errors (EMFILE and friends) must not kill the listener
                log::error!("[ACCEPTOR] {} accept failed: {}", self.local_addr, e);
            }
        }
        Action::Continue
    }

    fn close(&mut self, registry: &Registry, reason: CloseReason) {
        let _ = registry.deregister(&mut self.listener);
        log::info!("[ACCEPTOR] {} closed: {}", self.local_addr, reason);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_ephemeral() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        // the port is really listening
        assert!(std::net::TcpStream::connect(addr).is_ok());
    }

    #[test]
    fn test_bind_conflict() {
        let first = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = first.local_addr().unwrap();
        assert!(bind_listener(addr, 16).is_err());
    }
}
