// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Version handshake and keepalive.
//!
//! # State machine
//!
//! ```text
//!                  VER_REQ / VER_RESP                  error, timeout,
//!  [AwaitingVersion] ---------------> [LoggedIn] ----> lost keepalives
//!         |                              |  ^                |
//!         | wait_version_interval        |  | SHAKE_HAND     v
//!         +------------------------------+--+-----------> [Closed]
//! ```
//!
//! Client: sends `VER_REQ` on start and logs in on `VER_RESP`. Once logged in
//! it probes with `SHAKE_HAND_REQ` every interval in which no application
//! message went either way.
//!
//! Server: waits for `VER_REQ`, answers with `VER_RESP` and logs in once the
//! response is on the wire. It counts keepalive intervals without any inbound
//! traffic and gives up at `lost_shake_hand_max`.
//!
//! Before login only the expected handshake message is acceptable; anything
//! else is a protocol violation and the channel is torn down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use super::handler::{ChannelHandler, HandlerContext, HandlerFactory};
use crate::config::NetConfig;
use crate::error::{Error, Result};
use crate::protocol::{
    Message, MessageBody, NetworkAddress, VerReq, VerResp, CORE_VERSION, PROTOCOL_VERSION,
    SHAKE_HAND_REQ, SHAKE_HAND_RESP, VER_REQ, VER_RESP,
};

/// Local identity and timing used by both handshake sides.
#[derive(Clone, Debug)]
pub struct HandshakeParams {
    pub node_id: String,
    pub magic: i32,
    pub core_version: i32,
    pub protocol_version: i32,
    pub shake_hand_interval: Duration,
    pub wait_version_interval: Duration,
    pub lost_shake_hand_max: u32,
    /// Advertised as `addr_me` in `VER_REQ`.
    pub listen_addr: SocketAddr,
}

impl HandshakeParams {
    pub fn from_config(config: &NetConfig) -> Self {
        Self {
            node_id: config.node_id.clone(),
            magic: config.magic(),
            core_version: CORE_VERSION,
            protocol_version: PROTOCOL_VERSION,
            shake_hand_interval: config.handshake.shake_hand_interval,
            wait_version_interval: config.handshake.wait_version_interval,
            lost_shake_hand_max: config.handshake.lost_shake_hand_max,
            listen_addr: config.advertised_addr(),
        }
    }

    fn keepalive(&self, name: &str) -> Message {
        let body = if name == SHAKE_HAND_REQ {
            MessageBody::ShakeHandReq
        } else {
            MessageBody::ShakeHandResp
        };
        Message::new(name, body).with_magic(self.magic)
    }

    fn check_magic(&self, msg: &Message) -> Result<()> {
        if msg.header.magic != self.magic {
            return Err(Error::Protocol(format!(
                "{} with foreign magic {:#x}",
                msg.name(),
                msg.header.magic
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingVersion,
    LoggedIn,
    Closed,
}

fn unix_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// ============================================================================
// Client side
// ============================================================================

/// Handshake for outbound channels.
pub struct ClientHandshake {
    params: Arc<HandshakeParams>,
    state: HandshakeState,
    deadline: Option<Instant>,
    next_shake: Option<Instant>,
    /// Application traffic seen since the last keepalive interval.
    has_message: bool,
}

impl ClientHandshake {
    pub fn new(params: Arc<HandshakeParams>) -> Self {
        Self {
            params,
            state: HandshakeState::AwaitingVersion,
            deadline: None,
            next_shake: None,
            has_message: false,
        }
    }

    pub fn factory(params: Arc<HandshakeParams>) -> HandlerFactory {
        Arc::new(move || Box::new(ClientHandshake::new(Arc::clone(&params))))
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    fn ver_req(&self, ctx: &HandlerContext<'_>) -> Message {
        let req = VerReq {
            node_id: self.params.node_id.clone(),
            core_version: self.params.core_version,
            protocol_version: self.params.protocol_version,
            time_stamp: unix_time(),
            addr_me: NetworkAddress::from(self.params.listen_addr),
            addr_you: NetworkAddress::from(ctx.channel.remote_addr()),
            start_height: 0,
        };
        Message::new(VER_REQ, MessageBody::VerReq(req))
            .with_magic(self.params.magic)
            .with_new_nonce()
    }
}

impl ChannelHandler for ClientHandshake {
    fn start(&mut self, ctx: &HandlerContext<'_>) -> Result<()> {
        ctx.channel.send(self.ver_req(ctx))?;
        self.deadline = Some(ctx.now + self.params.wait_version_interval);
        log::debug!("[HANDSHAKE] {} sent {}", ctx.channel.sid(), VER_REQ);
        Ok(())
    }

    fn on_message_received(&mut self, ctx: &HandlerContext<'_>, msg: &Message) -> Result<()> {
        match self.state {
            HandshakeState::AwaitingVersion => {
                if msg.name() != VER_RESP {
                    return Err(Error::Protocol(format!("{} before login", msg.name())));
                }
                self.params.check_magic(msg)?;
                if let MessageBody::VerResp(resp) = &msg.body {
                    ctx.channel.set_remote_node_id(&resp.node_id);
                }
                self.state = HandshakeState::LoggedIn;
                ctx.channel.set_logged_in();
                self.deadline = None;
                self.next_shake = Some(ctx.now + self.params.shake_hand_interval);
                log::info!(
                    "[HANDSHAKE] {} logged in to {} ({})",
                    ctx.channel.sid(),
                    ctx.channel.remote_addr(),
                    ctx.channel.remote_node_id().unwrap_or_default()
                );
                Ok(())
            }
            HandshakeState::LoggedIn => match msg.name() {
                VER_RESP => Err(Error::Protocol("duplicate ver_resp".into())),
                VER_REQ => Err(Error::Protocol("ver_req on outbound channel".into())),
                SHAKE_HAND_REQ => ctx.channel.send(self.params.keepalive(SHAKE_HAND_RESP)),
                SHAKE_HAND_RESP => Ok(()),
                _ => {
                    self.has_message = true;
                    Ok(())
                }
            },
            HandshakeState::Closed => Err(Error::ChannelStopped(ctx.channel.sid())),
        }
    }

    fn on_message_sent(&mut self, _ctx: &HandlerContext<'_>, msg: &Message) -> Result<()> {
        if self.state == HandshakeState::LoggedIn && !msg.is_handshake() {
            self.has_message = true;
        }
        Ok(())
    }

    fn on_tick(&mut self, ctx: &HandlerContext<'_>) -> Result<()> {
        match self.state {
            HandshakeState::AwaitingVersion => match self.deadline {
                Some(deadline) if ctx.now >= deadline => Err(Error::HandshakeTimeout),
                _ => Ok(()),
            },
            HandshakeState::LoggedIn => {
                let due = self.next_shake.map_or(true, |t| ctx.now >= t);
                if due {
                    if !self.has_message {
                        ctx.channel.send(self.params.keepalive(SHAKE_HAND_REQ))?;
                    }
                    self.has_message = false;
                    self.next_shake = Some(ctx.now + self.params.shake_hand_interval);
                }
                Ok(())
            }
            HandshakeState::Closed => Ok(()),
        }
    }

    fn is_logged_in(&self) -> bool {
        self.state == HandshakeState::LoggedIn
    }

    fn stop(&mut self, _ctx: &HandlerContext<'_>) {
        self.state = HandshakeState::Closed;
    }
}

// ============================================================================
// Server side
// ============================================================================

/// Handshake for accepted channels.
pub struct ServerHandshake {
    params: Arc<HandshakeParams>,
    state: HandshakeState,
    deadline: Option<Instant>,
    ver_req_seen: bool,
    next_check: Option<Instant>,
    lost: u32,
}

impl ServerHandshake {
    pub fn new(params: Arc<HandshakeParams>) -> Self {
        Self {
            params,
            state: HandshakeState::AwaitingVersion,
            deadline: None,
            ver_req_seen: false,
            next_check: None,
            lost: 0,
        }
    }

    pub fn factory(params: Arc<HandshakeParams>) -> HandlerFactory {
        Arc::new(move || Box::new(ServerHandshake::new(Arc::clone(&params))))
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Keepalive intervals elapsed without inbound traffic.
    pub fn lost_count(&self) -> u32 {
        self.lost
    }

    fn ver_resp(&self) -> Message {
        let resp = VerResp {
            node_id: self.params.node_id.clone(),
            core_version: self.params.core_version,
            protocol_version: self.params.protocol_version,
        };
        Message::new(VER_RESP, MessageBody::VerResp(resp))
            .with_magic(self.params.magic)
            .with_new_nonce()
    }
}

impl ChannelHandler for ServerHandshake {
    fn start(&mut self, ctx: &HandlerContext<'_>) -> Result<()> {
        self.deadline = Some(ctx.now + self.params.wait_version_interval);
        Ok(())
    }

    fn on_message_received(&mut self, ctx: &HandlerContext<'_>, msg: &Message) -> Result<()> {
        self.lost = 0;
        match self.state {
            HandshakeState::AwaitingVersion => {
                if self.ver_req_seen {
                    return Err(Error::Protocol(format!(
                        "{} before ver_resp was sent",
                        msg.name()
                    )));
                }
                if msg.name() != VER_REQ {
                    return Err(Error::Protocol(format!("{} before login", msg.name())));
                }
                self.params.check_magic(msg)?;
                let MessageBody::VerReq(req) = &msg.body else {
                    return Err(Error::Protocol("ver_req without version body".into()));
                };
                if !req.node_id.is_empty() && req.node_id == self.params.node_id {
                    return Err(Error::Protocol("connected to self".into()));
                }
                ctx.channel.set_remote_node_id(&req.node_id);
                self.ver_req_seen = true;
                ctx.channel.send(self.ver_resp())?;
                log::debug!(
                    "[HANDSHAKE] {} ver_req from {} (core {:#x}, protocol {:#x})",
                    ctx.channel.sid(),
                    req.node_id,
                    req.core_version,
                    req.protocol_version
                );
                Ok(())
            }
            HandshakeState::LoggedIn => match msg.name() {
                VER_REQ => Err(Error::Protocol("duplicate ver_req".into())),
                VER_RESP => Err(Error::Protocol("ver_resp on inbound channel".into())),
                SHAKE_HAND_REQ => ctx.channel.send(self.params.keepalive(SHAKE_HAND_RESP)),
                _ => Ok(()),
            },
            HandshakeState::Closed => Err(Error::ChannelStopped(ctx.channel.sid())),
        }
    }

    fn on_message_sent(&mut self, ctx: &HandlerContext<'_>, msg: &Message) -> Result<()> {
        self.lost = 0;
        if self.state == HandshakeState::AwaitingVersion && msg.name() == VER_RESP {
            self.state = HandshakeState::LoggedIn;
            ctx.channel.set_logged_in();
            self.deadline = None;
            self.next_check = Some(ctx.now + self.params.shake_hand_interval);
            log::info!(
                "[HANDSHAKE] {} {} logged in ({})",
                ctx.channel.sid(),
                ctx.channel.remote_addr(),
                ctx.channel.remote_node_id().unwrap_or_default()
            );
        }
        Ok(())
    }

    fn on_tick(&mut self, ctx: &HandlerContext<'_>) -> Result<()> {
        match self.state {
            HandshakeState::AwaitingVersion => match self.deadline {
                Some(deadline) if ctx.now >= deadline => Err(Error::HandshakeTimeout),
                _ => Ok(()),
            },
            HandshakeState::LoggedIn => {
                let due = self.next_check.map_or(true, |t| ctx.now >= t);
                if due {
                    self.lost += 1;
                    if self.lost >= self.params.lost_shake_hand_max {
                        return Err(Error::KeepaliveLost(self.lost));
                    }
                    self.next_check = Some(ctx.now + self.params.shake_hand_interval);
                }
                Ok(())
            }
            HandshakeState::Closed => Ok(()),
        }
    }

    fn is_logged_in(&self) -> bool {
        self.state == HandshakeState::LoggedIn
    }

    fn stop(&mut self, _ctx: &HandlerContext<'_>) {
        self.state = HandshakeState::Closed;
    }
}

// ============================================================================
// Tests
// ============================================================================
