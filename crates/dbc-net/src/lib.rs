// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # dbc-net - P2P node networking substrate
//!
//! Persistent TCP channels between peers of the DBC compute network:
//! reactor pools, framed binary messages, a version handshake with keepalive
//! probing, and a topic bus that hands decoded messages to service modules.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dbc_net::{ConnectionManager, NetConfig, Result, TopicBus};
//!
//! fn main() -> Result<()> {
//!     let bus = Arc::new(TopicBus::new());
//!     let config = NetConfig::default().with_node_id("node-a");
//!     let manager = ConnectionManager::new(config, Arc::clone(&bus))?;
//!     manager.init()?;
//!     manager.start()?;
//!
//!     let server = manager.server_handler_factory();
//!     manager.start_listen("0.0.0.0:11107".parse().unwrap(), server)?;
//!
//!     let client = manager.client_handler_factory();
//!     manager.start_connect("10.0.0.2:11107".parse().unwrap(), client)?;
//!
//!     // ... subscribe service modules on `bus` ...
//!     manager.stop();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                         Service modules                             |
//! |   ServiceModule mailbox + worker | TimerManager | PeerDirectory      |
//! +---------------------------------------------------------------------+
//! |                            TopicBus                                 |
//! |   Arc<Message> by message name | notifications | TimeTick          |
//! +---------------------------------------------------------------------+
//! |                       ConnectionManager                             |
//! |   Acceptors | Connectors (backoff) | ChannelRegistry | routing       |
//! +---------------------------------------------------------------------+
//! |                    SocketChannel / ChannelDriver                    |
//! |   ByteBuf | frame codec | handshake | nonce filter | flow control   |
//! +---------------------------------------------------------------------+
//! |                          Reactor pools                              |
//! |   acceptor | connector | worker  (one mio Poll per thread)         |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ConnectionManager`] | Owns the pools, listeners, connectors and live channels |
//! | [`SocketChannel`] | One TCP connection: send queue and lifecycle |
//! | [`Message`] | Routed message: header, body, source/destination ids |
//! | [`TopicBus`] | Typed publish/subscribe keyed by topic name |
//! | [`ServiceModule`] | Mailbox + single worker on top of the bus |
//! | [`PeerDirectory`] | Candidate endpoints and their connection state |
//!
//! ## Features
//!
//! - `compression` (default): deflate bodies above [`protocol::COMPRESS_THRESHOLD`]

pub mod buffer;
pub mod bus;
pub mod channel;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod metrics;
pub mod nonce_filter;
pub mod peer;
pub mod protocol;
pub mod reactor;
pub mod service;
pub mod socket_id;
pub mod timer;

pub use buffer::ByteBuf;
pub use bus::{SubscriptionId, TopicBus};
pub use channel::{
    ChannelHandler, ClientHandshake, HandlerContext, HandlerFactory, HandshakeParams,
    ServerHandshake, SocketChannel,
};
pub use config::{HandshakeConfig, NetConfig, NetType, PoolConfig, SocketConfig};
pub use connection::{backoff_delay, ChannelRegistry, ConnectionManager, ConnectorStatus};
pub use context::NetContext;
pub use error::{Error, Result};
pub use metrics::{NetMetrics, NetMetricsSnapshot};
pub use nonce_filter::NonceFilter;
pub use peer::{NetState, PeerCandidate, PeerDirectory};
pub use protocol::{
    BaseHeader, ChannelErrorNotification, ConnectNotification, ConnectStatus, Message,
    MessageBody, MessageCodec, TimeTick,
};
pub use reactor::{Reactor, ReactorHandle, ReactorPool};
pub use service::{Mail, ModuleContext, ServiceModule};
pub use socket_id::{SocketId, SocketIdAllocator, SocketKind};
pub use timer::{TickSource, TimerManager};
