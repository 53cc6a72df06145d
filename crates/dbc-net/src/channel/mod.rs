// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Socket channels.
//!
//! A connection is split in two halves:
//!
//! - [`SocketChannel`]: shared by `Arc`, lives in the connection registry.
//!   Any thread may queue messages, query login state or stop it.
//! - `ChannelDriver`: owns the socket and the [`ChannelHandler`] and runs on
//!   one worker reactor.
//!
//! Handshake logic plugs in through [`ChannelHandler`]; the stock
//! implementations are [`ClientHandshake`] and [`ServerHandshake`].

pub mod byte_stream;
mod driver;
pub mod flow_ctrl;
mod handler;
pub mod handshake;
mod socket_channel;

pub use byte_stream::{apply_socket_options, ByteStream};
pub(crate) use driver::ChannelDriver;
pub use flow_ctrl::FlowCtrl;
pub use handler::{ChannelHandler, HandlerContext, HandlerFactory};
pub use handshake::{ClientHandshake, HandshakeParams, HandshakeState, ServerHandshake};
pub use socket_channel::SocketChannel;

#[cfg(test)]
pub(crate) use socket_channel::tests::socket_channel_for_tests;
