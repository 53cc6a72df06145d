// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-channel protocol handler interface.

use std::sync::Arc;
use std::time::Instant;

use super::SocketChannel;
use crate::error::Result;
use crate::protocol::Message;

/// What a handler sees of its channel during a callback.
pub struct HandlerContext<'a> {
    pub channel: &'a Arc<SocketChannel>,
    pub now: Instant,
}

/// Protocol logic bound to one channel.
///
/// Owned by the channel's driver; every callback runs on the driver's
/// reactor thread. An `Err` from any callback is fatal: the channel goes
/// through its error path and is torn down.
pub trait ChannelHandler: Send {
    /// Channel registered with its reactor, before the first read.
    fn start(&mut self, ctx: &HandlerContext<'_>) -> Result<()>;

    /// A message was decoded, before dedup and bus dispatch.
    fn on_message_received(&mut self, ctx: &HandlerContext<'_>, msg: &Message) -> Result<()>;

    /// A message has been fully written to the socket.
    fn on_message_sent(&mut self, ctx: &HandlerContext<'_>, msg: &Message) -> Result<()>;

    /// Reactor tick.
    fn on_tick(&mut self, ctx: &HandlerContext<'_>) -> Result<()>;

    fn is_logged_in(&self) -> bool;

    /// Channel is going away.
    fn stop(&mut self, _ctx: &HandlerContext<'_>) {}
}

/// Builds a fresh handler for every new channel.
pub type HandlerFactory = Arc<dyn Fn() -> Box<dyn ChannelHandler> + Send + Sync>;
