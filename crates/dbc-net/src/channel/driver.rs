// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Channel driver: the reactor-side half of a [`SocketChannel`].
//!
//! Owns the socket, the inbound and outbound buffers and the protocol
//! handler. All of it runs on one worker reactor, so reads, writes, ticks
//! and teardown for one connection are strictly serialized.
//!
//! Inbound path per readable event:
//!
//! ```text
//! read -> inbound ByteBuf -> codec.decode -> handler.on_message_received
//!      -> keepalive? stop -> nonce filter -> flow ctrl -> bus.publish(name)
//! ```
//!
//! Outbound path: the front of the channel's queue is encoded into the
//! outbound buffer and written until the socket would block. The message is
//! popped only once its last byte is written, which keeps per-channel FIFO
//! order across partial writes.

use std::io::{self, ErrorKind};
use std::net::Shutdown;
use std::sync::Arc;
use std::time::Instant;

use mio::{Interest, Registry, Token};

use super::byte_stream::ByteStream;
use super::flow_ctrl::FlowCtrl;
use super::handler::{ChannelHandler, HandlerContext};
use super::SocketChannel;
use crate::buffer::{ByteBuf, DEFAULT_BUF_LEN};
use crate::context::NetContext;
use crate::error::{Error, Result};
use crate::protocol::codec::Decoded;
use crate::protocol::Message;
use crate::reactor::{Action, CloseReason, EventHandler, Readiness};

/// Minimum free space reserved before each socket read.
const READ_CHUNK: usize = 16 * 1024;

pub(crate) struct ChannelDriver {
    channel: Arc<SocketChannel>,
    stream: Box<dyn ByteStream>,
    inbound: ByteBuf,
    outbound: ByteBuf,
    /// Message whose bytes currently sit in `outbound`.
    in_flight: Option<Arc<Message>>,
    in_flight_len: usize,
    handler: Box<dyn ChannelHandler>,
    ctx: Arc<NetContext>,
    flow: FlowCtrl,
}

impl ChannelDriver {
    pub(crate) fn new(
        channel: Arc<SocketChannel>,
        stream: Box<dyn ByteStream>,
        handler: Box<dyn ChannelHandler>,
        ctx: Arc<NetContext>,
    ) -> Self {
        let max_frame = ctx.config.max_frame_len;
        let flow = FlowCtrl::new(ctx.config.max_recv_speed, Instant::now());
        Self {
            channel,
            stream,
            inbound: ByteBuf::with_max(DEFAULT_BUF_LEN, max_frame + READ_CHUNK),
            outbound: ByteBuf::with_max(DEFAULT_BUF_LEN, max_frame),
            in_flight: None,
            in_flight_len: 0,
            handler,
            ctx,
            flow,
        }
    }

    fn fail(&mut self, reason: String) -> Action {
        self.channel.on_error(&reason);
        Action::Close(reason)
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    fn read_ready(&mut self) -> Result<bool> {
        loop {
            self.inbound.reserve(READ_CHUNK)?;
            match self.stream.read(self.inbound.writable_mut()) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    self.inbound.advance_write(n)?;
                    self.decode_all()?;
                    if self.channel.is_stopped() {
                        return Ok(true);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(true),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn decode_all(&mut self) -> Result<()> {
        loop {
            let before = self.inbound.valid_read_len();
            let decoded = match self.ctx.codec.decode(&mut self.inbound) {
                Ok(d) => d,
                Err(e) => {
                    self.ctx.metrics.record_framing_error();
                    return Err(e);
                }
            };
            let consumed = before - self.inbound.valid_read_len();

            match decoded {
                Decoded::NeedMore => return Ok(()),
                Decoded::Unknown(name) => {
                    self.ctx.metrics.record_unknown_message();
                    log::debug!(
                        "[CHANNEL] {} skipped undecodable message '{}'",
                        self.channel.sid(),
                        name
                    );
                }
                Decoded::Message(msg) => {
                    self.ctx.metrics.record_message_received(consumed);
                    self.dispatch(msg)?;
                }
            }
        }
    }

    fn dispatch(&mut self, mut msg: Message) -> Result<()> {
        msg.src_sid = self.channel.sid();
        let now = Instant::now();
        let hctx = HandlerContext {
            channel: &self.channel,
            now,
        };
        self.handler.on_message_received(&hctx, &msg)?;

        if msg.is_keepalive() {
            return Ok(());
        }

        if self.ctx.nonce_filter.check_and_insert(msg.nonce()) {
            self.ctx.metrics.record_duplicate();
            log::trace!(
                "[CHANNEL] {} dropped duplicate {} nonce={}",
                self.channel.sid(),
                msg.name(),
                msg.nonce()
            );
            return Ok(());
        }

        if self.flow.over_speed(1, now) {
            self.ctx.metrics.record_over_speed();
            log::debug!("[CHANNEL] {} over receive speed, dropped {}", self.channel.sid(), msg.name());
            return Ok(());
        }

        let name = msg.name().to_string();
        self.ctx.bus.publish(&name, &Arc::new(msg));
        Ok(())
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    fn flush(&mut self) -> Result<()> {
        loop {
            if self.channel.is_stopped() {
                return Ok(());
            }

            if self.outbound.is_empty() {
                if let Some(done) = self.in_flight.take() {
                    self.channel.pop_front();
                    self.ctx.metrics.record_message_sent(self.in_flight_len);
                    let hctx = HandlerContext {
                        channel: &self.channel,
                        now: Instant::now(),
                    };
                    self.handler.on_message_sent(&hctx, &done)?;
                }

                let Some(next) = self.channel.front() else {
                    return Ok(());
                };
                match self.ctx.codec.encode(&next, &mut self.outbound) {
                    Ok(len) => {
                        if !next.is_keepalive() {
                            self.ctx.nonce_filter.insert(next.nonce());
                        }
                        self.in_flight_len = len;
                        self.in_flight = Some(next);
                    }
                    Err(e) => {
                        log::warn!(
                            "[CHANNEL] {} dropping unencodable {}: {}",
                            self.channel.sid(),
                            next.name(),
                            e
                        );
                        self.outbound.clear();
                        self.channel.pop_front();
                        continue;
                    }
                }
            }

            match self.stream.write(self.outbound.readable()) {
                Ok(0) => {
                    return Err(Error::Io(io::Error::new(
                        ErrorKind::WriteZero,
                        "socket accepted no bytes",
                    )))
                }
                Ok(n) => self.outbound.advance_read(n)?,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl EventHandler for ChannelDriver {
    fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        self.stream
            .register(registry, token, Interest::READABLE | Interest::WRITABLE)?;
        let hctx = HandlerContext {
            channel: &self.channel,
            now: Instant::now(),
        };
        self.handler
            .start(&hctx)
            .map_err(|e| io::Error::other(e.to_string()))?;
        log::debug!(
            "[CHANNEL] {} {} started on {}",
            self.channel.sid(),
            self.channel.remote_addr(),
            self.channel.reactor_name()
        );
        Ok(())
    }

    fn ready(&mut self, _registry: &Registry, readiness: Readiness) -> Action {
        if self.channel.is_stopped() {
            return Action::Close("stopped".into());
        }

        if readiness.error {
            let reason = match self.stream.take_error() {
                Ok(Some(e)) => e.to_string(),
                Ok(None) => "socket error".to_string(),
                Err(e) => e.to_string(),
            };
            return self.fail(reason);
        }

        if readiness.readable || readiness.read_closed {
            match self.read_ready() {
                Ok(true) => {}
                Ok(false) => return self.fail("connection closed by peer".into()),
                Err(e) => return self.fail(e.to_string()),
            }
            if self.channel.is_stopped() {
                return Action::Close("stopped".into());
            }
        }

        // handler replies queued during dispatch go out right away
        if readiness.writable || self.channel.queue_len() > 0 {
            if let Err(e) = self.flush() {
                return self.fail(e.to_string());
            }
        }
        Action::Continue
    }

    fn notify(&mut self, _registry: &Registry) -> Action {
        if self.channel.is_stopped() {
            return Action::Close("stopped".into());
        }
        match self.flush() {
            Ok(()) => Action::Continue,
            Err(e) => self.fail(e.to_string()),
        }
    }

    fn tick(&mut self, _registry: &Registry, now: Instant) -> Action {
        if self.channel.is_stopped() {
            return Action::Close("stopped".into());
        }
        let hctx = HandlerContext {
            channel: &self.channel,
            now,
        };
        if let Err(e) = self.handler.on_tick(&hctx) {
            return self.fail(e.to_string());
        }
        if self.channel.queue_len() > 0 {
            if let Err(e) = self.flush() {
                return self.fail(e.to_string());
            }
        }
        Action::Continue
    }

    fn close(&mut self, registry: &Registry, reason: CloseReason) {
        if !self.channel.is_stopped() {
            self.channel.on_error(&reason.to_string());
        }
        let _ = self.stream.deregister(registry);
        let _ = self.stream.shutdown(Shutdown::Both);
        let hctx = HandlerContext {
            channel: &self.channel,
            now: Instant::now(),
        };
        self.handler.stop(&hctx);
        log::trace!("[CHANNEL] {} closed: {}", self.channel.sid(), reason);
    }
}

// ============================================================================
// Tests
// ============================================================================
