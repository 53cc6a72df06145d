// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound connector with bounded exponential backoff.
//!
//! # State machine
//!
//! ```text
//!            connect()                   TCP up
//!   [start] ----------> [Connecting] -------------> [AwaitingLogin]
//!                         |   ^                        |        |
//!             error/timeout   | delay elapsed          | login  | channel closed
//!                         v   |                        v        | before login
//!                       [Waiting] <--------------------+--------+
//!                         |                            |
//!                budget exhausted                 [Connected]
//!                         v
//!                      [Failed]
//! ```
//!
//! The connector is keyed by its own [`SocketId`], which its first channel
//! also carries. Every later attempt opens its channel under a freshly
//! allocated id, so a late error from a dead channel never aliases the live
//! one. It publishes `ConnectNotification::Success` with the new channel's
//! id each time the TCP connection comes up and `ConnectNotification::Failed`
//! once, with the id of the last attempt, when the retry budget runs out. It
//! removes itself from its reactor as soon as the channel logs in.

use std::io::{self, ErrorKind};
use std::mem;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use parking_lot::Mutex;

use super::{open_channel, ChannelRegistry};
use crate::channel::{HandlerFactory, SocketChannel};
use crate::context::NetContext;
use crate::protocol::{ConnectNotification, ConnectStatus, CLIENT_CONNECT_NOTIFICATION};
use crate::reactor::{Action, CloseReason, EventHandler, Readiness, ReactorPool};
use crate::socket_id::SocketId;

/// Delay before retry number `attempt + 1`: `base << attempt`.
///
/// The shift is capped so the result never overflows.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(16))
}

/// Observable progress of a connector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectorStatus {
    Connecting,
    AwaitingLogin,
    /// Waiting out the backoff delay before the next attempt.
    Backoff { attempt: u32 },
    Connected,
    Failed,
    /// Removed before reaching a terminal state.
    Stopped,
}

impl ConnectorStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectorStatus::Connected | ConnectorStatus::Failed | ConnectorStatus::Stopped
        )
    }
}

enum State {
    Idle,
    Connecting { stream: TcpStream, started: Instant },
    AwaitingLogin(Arc<SocketChannel>),
    Waiting(Instant),
    Done,
}

pub(crate) struct Connector {
    addr: SocketAddr,
    sid: SocketId,
    /// Id of the current (or last) attempt's channel.
    channel_sid: SocketId,
    /// A channel has already been opened under `channel_sid`.
    channel_opened: bool,
    factory: HandlerFactory,
    ctx: Arc<NetContext>,
    registry: Arc<ChannelRegistry>,
    workers: Arc<ReactorPool>,
    token: Token,
    state: State,
    attempt: u32,
    budget: u32,
    status: Arc<Mutex<ConnectorStatus>>,
}

impl Connector {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        addr: SocketAddr,
        sid: SocketId,
        factory: HandlerFactory,
        ctx: Arc<NetContext>,
        registry: Arc<ChannelRegistry>,
        workers: Arc<ReactorPool>,
        budget: u32,
        status: Arc<Mutex<ConnectorStatus>>,
    ) -> Self {
        Self {
            addr,
            sid,
            channel_sid: sid,
            channel_opened: false,
            factory,
            ctx,
            registry,
            workers,
            token: Token(0),
            state: State::Idle,
            attempt: 0,
            budget,
            status,
        }
    }

    fn set_status(&self, status: ConnectorStatus) {
        *self.status.lock() = status;
    }

    fn connect_timeout(&self) -> Duration {
        self.ctx.config.handshake.wait_version_interval
    }

    fn try_connect(&mut self, registry: &Registry) -> io::Result<()> {
        let mut stream = TcpStream::connect(self.addr)?;
        registry.register(&mut stream, self.token, Interest::WRITABLE)?;
        self.state = State::Connecting {
            stream,
            started: Instant::now(),
        };
        self.set_status(ConnectorStatus::Connecting);
        log::debug!(
            "[CONNECTOR] {} connecting to {} (attempt {})",
            self.sid,
            self.addr,
            self.attempt + 1
        );
        Ok(())
    }

    fn on_failure(&mut self, registry: &Registry, reason: &str) -> Action {
        if let State::Connecting { mut stream, .. } = mem::replace(&mut self.state, State::Idle) {
            let _ = registry.deregister(&mut stream);
        }
        self.ctx.metrics.record_connection_failed();

        if self.attempt >= self.budget {
            log::warn!(
                "[CONNECTOR] {} giving up on {} after {} attempts: {}",
                self.sid,
                self.addr,
                self.attempt + 1,
                reason
            );
            self.state = State::Done;
            self.set_status(ConnectorStatus::Failed);
            self.publish(ConnectStatus::Failed);
            return Action::Close(format!("connect failed: {}", reason));
        }

        let delay = backoff_delay(self.ctx.config.reconnect_interval, self.attempt);
        self.attempt += 1;
        log::info!(
            "[CONNECTOR] {} connect to {} failed ({}), retry {}/{} in {:?}",
            self.sid,
            self.addr,
            reason,
            self.attempt,
            self.budget,
            delay
        );
        self.state = State::Waiting(Instant::now() + delay);
        self.set_status(ConnectorStatus::Backoff {
            attempt: self.attempt,
        });
        Action::Continue
    }

    fn on_connected(&mut self, registry: &Registry) -> Action {
        let State::Connecting { mut stream, .. } = mem::replace(&mut self.state, State::Idle) else {
            return Action::Continue;
        };
        // the socket moves to a worker reactor
        let _ = registry.deregister(&mut stream);

        // ids are never reused, not even by a retry of the same connector
        if self.channel_opened {
            self.channel_sid = self.ctx.socket_ids.alloc_client();
        }
        self.channel_opened = true;

        match open_channel(
            &self.ctx,
            &self.registry,
            &self.workers,
            stream,
            self.channel_sid,
            &self.factory,
        ) {
            Ok(channel) => {
                log::info!(
                    "[CONNECTOR] {} connected to {} as {}",
                    self.sid,
                    self.addr,
                    self.channel_sid
                );
                self.publish(ConnectStatus::Success);
                self.state = State::AwaitingLogin(channel);
                self.set_status(ConnectorStatus::AwaitingLogin);
                Action::Continue
            }
            Err(e) => self.on_failure(registry, &e.to_string()),
        }
    }

    fn publish(&self, status: ConnectStatus) {
        let notification = ConnectNotification {
            sid: self.channel_sid,
            endpoint: self.addr,
            status,
        };
        self.ctx.bus.publish(CLIENT_CONNECT_NOTIFICATION, &notification);
    }
}

impl EventHandler for Connector {
    fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        self.token = token;
        if let Err(e) = self.try_connect(registry) {
            if let Action::Close(reason) = self.on_failure(registry, &e.to_string()) {
                return Err(io::Error::other(reason));
            }
        }
        Ok(())
    }

    fn ready(&mut self, registry: &Registry, _readiness: Readiness) -> Action {
        let State::Connecting { stream, .. } = &self.state else {
            return Action::Continue;
        };

        match stream.take_error() {
            Ok(Some(e)) | Err(e) => return self.on_failure(registry, &e.to_string()),
            Ok(None) => {}
        }
        match stream.peer_addr() {
            Ok(_) => self.on_connected(registry),
            Err(e) if e.kind() == ErrorKind::NotConnected || e.kind() == ErrorKind::WouldBlock => {
                Action::Continue
            }
            Err(e) => self.on_failure(registry, &e.to_string()),
        }
    }

    fn tick(&mut self, registry: &Registry, now: Instant) -> Action {
        match &self.state {
            State::Idle => Action::Continue,
            State::Connecting { started, .. } => {
                if now.saturating_duration_since(*started) >= self.connect_timeout() {
                    self.on_failure(registry, "connect timed out")
                } else {
                    Action::Continue
                }
            }
            State::AwaitingLogin(channel) => {
                if channel.is_logged_in() {
                    self.state = State::Done;
                    self.set_status(ConnectorStatus::Connected);
                    Action::Close("logged in".into())
                } else if channel.is_stopped() {
                    self.on_failure(registry, "channel closed before login")
                } else {
                    Action::Continue
                }
            }
            State::Waiting(until) => {
                if now < *until {
                    return Action::Continue;
                }
                self.ctx.metrics.record_reconnect();
                match self.try_connect(registry) {
                    Ok(()) => Action::Continue,
                    Err(e) => self.on_failure(registry, &e.to_string()),
                }
            }
            State::Done => Action::Close("done".into()),
        }
    }

    fn close(&mut self, registry: &Registry, reason: CloseReason) {
        if let State::Connecting { mut stream, .. } = mem::replace(&mut self.state, State::Done) {
            let _ = registry.deregister(&mut stream);
        }
        let mut status = self.status.lock();
        if !status.is_terminal() {
            *status = ConnectorStatus::Stopped;
        }
        log::debug!("[CONNECTOR] {} to {} closed: {}", self.sid, self.addr, reason);
    }
}

// ============================================================================
// Tests
// ============================================================================
