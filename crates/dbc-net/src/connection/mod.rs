// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection management: listeners, outbound connectors and the live
//! channel table.
//!
//! # Architecture
//!
//! ```text
//! +-------------------------------------------------------------+
//! |                     ConnectionManager                        |
//! |                                                              |
//! |  acceptor pool        connector pool        worker pool      |
//! |  +-----------+        +-----------+        +-------------+   |
//! |  | Acceptor  |        | Connector |        | ChannelDriver|  |
//! |  | (listen)  |        | (backoff) |        | (per socket) |  |
//! |  +-----+-----+        +-----+-----+        +------+------+   |
//! |        |   open_channel()   |                     ^          |
//! |        +--------------------+---------------------+          |
//! |                             |                                |
//! |                  +----------v----------+                     |
//! |                  |   ChannelRegistry   |                     |
//! |                  | SocketId -> Channel |                     |
//! |                  +---------------------+                     |
//! +-------------------------------------------------------------+
//! ```
//!
//! Accepting and connecting happen on their own reactor pools so that a
//! burst of reconnect timers or a slow accept never delays established
//! traffic on the workers.

mod acceptor;
mod connector;
mod manager;
mod registry;

pub use connector::{backoff_delay, ConnectorStatus};
pub use manager::ConnectionManager;
pub use registry::ChannelRegistry;

use std::sync::Arc;

use mio::net::TcpStream;

use crate::channel::{apply_socket_options, ChannelDriver, HandlerFactory, SocketChannel};
use crate::context::NetContext;
use crate::error::Result;
use crate::reactor::ReactorPool;
use crate::socket_id::SocketId;

/// Wrap a connected stream in a channel and hand it to a worker reactor.
///
/// The channel is registered before its driver is attached, so the first
/// decoded message always finds it in the table.
pub(crate) fn open_channel(
    ctx: &Arc<NetContext>,
    registry: &Arc<ChannelRegistry>,
    workers: &ReactorPool,
    stream: TcpStream,
    sid: SocketId,
    factory: &HandlerFactory,
) -> Result<Arc<SocketChannel>> {
    if let Err(e) = apply_socket_options(&stream, &ctx.config.socket) {
        log::warn!("[CONN-MGR] {} socket options not applied: {}", sid, e);
    }
    let remote_addr = stream.peer_addr()?;
    let local_addr = stream.local_addr().ok();

    let reactor = workers.next_reactor()?;
    let token = reactor.alloc_token();
    let channel = Arc::new(SocketChannel::new(
        sid,
        remote_addr,
        local_addr,
        reactor.clone(),
        token,
        ctx.config.socket.max_send_queue,
        Arc::downgrade(registry),
        Arc::clone(&ctx.bus),
        Arc::clone(&ctx.metrics),
    ));
    registry.add_channel(Arc::clone(&channel))?;

    let driver = ChannelDriver::new(
        Arc::clone(&channel),
        Box::new(stream),
        factory(),
        Arc::clone(ctx),
    );
    if let Err(e) = reactor.attach_with(token, Box::new(driver)) {
        channel.stop();
        return Err(e);
    }

    ctx.metrics.record_connection_established();
    log::debug!(
        "[CONN-MGR] channel {} {} -> {}",
        sid,
        remote_addr,
        reactor.name()
    );
    Ok(channel)
}
