// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type shared by every layer of the networking substrate.
//!
//! Errors are grouped the same way the channel teardown logic treats them:
//!
//! - **Transient I/O** (`Io`, `ConnectFailed`): routed through the single
//!   per-channel / per-connector error path; connectors retry with backoff.
//! - **Protocol** (`FrameTooLarge`, `FrameTooSmall`, `Protocol`,
//!   `HandshakeTimeout`, `KeepaliveLost`): always fatal to the channel.
//! - **Resource exhaustion** (`QueueFull`, `PoolSizeOverCap`,
//!   `BufferOverflow`, `MaxConnections`): reported synchronously to the caller.
//!
//! Unknown messages and duplicate nonces are not errors at all; they are
//! outcomes of the decoder and the nonce filter.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use crate::socket_id::SocketId;

/// Errors produced by `dbc-net`.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Transient I/O
    // ========================================================================
    /// Underlying socket or poll error.
    Io(io::Error),
    /// Outbound connect attempt failed.
    ConnectFailed {
        /// Target endpoint.
        endpoint: SocketAddr,
        /// Failure description.
        reason: String,
    },

    // ========================================================================
    // Protocol
    // ========================================================================
    /// Declared frame length above the maximum frame size.
    FrameTooLarge {
        /// Declared length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
    /// Declared frame length below the minimum valid frame size.
    FrameTooSmall {
        /// Declared length.
        len: usize,
        /// Protocol minimum.
        min: usize,
    },
    /// Handshake or framing rule violated by the peer.
    Protocol(String),
    /// No version handshake within the wait interval.
    HandshakeTimeout,
    /// Too many keepalive intervals without traffic.
    KeepaliveLost(u32),

    // ========================================================================
    // Codec
    // ========================================================================
    /// Malformed field while decoding.
    Decode(String),
    /// Message cannot be encoded.
    Encode(String),

    // ========================================================================
    // Resource exhaustion
    // ========================================================================
    /// Outbound message queue is full.
    QueueFull(usize),
    /// Reactor pool size outside `1..=cap`.
    PoolSizeOverCap {
        /// Requested thread count.
        requested: usize,
        /// Hard cap.
        cap: usize,
    },
    /// Byte buffer growth would exceed the maximum length.
    BufferOverflow {
        /// Total length that was needed.
        requested: usize,
        /// Maximum buffer length.
        max: usize,
    },
    /// Not enough readable bytes.
    BufferUnderflow {
        /// Bytes requested.
        requested: usize,
        /// Bytes available.
        available: usize,
    },
    /// Inbound connection limit reached.
    MaxConnections(usize),

    // ========================================================================
    // Registry
    // ========================================================================
    /// A channel with this id is already registered.
    DuplicateChannel(SocketId),
    /// No channel registered under this id.
    ChannelNotFound(SocketId),
    /// Broadcast found no logged-in channel.
    InactiveChannel,
    /// Broadcast message has no nonce.
    MissingNonce,
    /// Channel already stopped.
    ChannelStopped(SocketId),
    /// Already listening on this endpoint.
    ListenerExists(SocketAddr),
    /// No listener on this endpoint.
    ListenerNotFound(SocketAddr),
    /// No connector with this id or endpoint.
    ConnectorNotFound(String),

    // ========================================================================
    // Lifecycle / configuration
    // ========================================================================
    /// Operation not valid in the current lifecycle state.
    InvalidState(String),
    /// Configuration rejected by `validate()`.
    InvalidConfig(String),
}

impl Error {
    /// Fatal-to-the-channel protocol violations (never retried in place).
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Error::FrameTooLarge { .. }
                | Error::FrameTooSmall { .. }
                | Error::Protocol(_)
                | Error::HandshakeTimeout
                | Error::KeepaliveLost(_)
        )
    }

    /// Resource exhaustion reported synchronously to the caller.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(
            self,
            Error::QueueFull(_)
                | Error::PoolSizeOverCap { .. }
                | Error::BufferOverflow { .. }
                | Error::MaxConnections(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::ConnectFailed { endpoint, reason } => {
                write!(f, "Connect to {} failed: {}", endpoint, reason)
            }
            Error::FrameTooLarge { len, max } => {
                write!(f, "Frame too large: {} bytes (max {})", len, max)
            }
            Error::FrameTooSmall { len, min } => {
                write!(f, "Frame too small: {} bytes (min {})", len, min)
            }
            Error::Protocol(msg) => write!(f, "Protocol violation: {}", msg),
            Error::HandshakeTimeout => write!(f, "Version handshake timed out"),
            Error::KeepaliveLost(n) => write!(f, "Lost {} consecutive keepalives", n),
            Error::Decode(msg) => write!(f, "Decode error: {}", msg),
            Error::Encode(msg) => write!(f, "Encode error: {}", msg),
            Error::QueueFull(n) => write!(f, "Send queue full ({} messages)", n),
            Error::PoolSizeOverCap { requested, cap } => {
                write!(f, "Reactor pool size {} outside 1..={}", requested, cap)
            }
            Error::BufferOverflow { requested, max } => {
                write!(f, "Byte buffer overflow: need {} bytes (max {})", requested, max)
            }
            Error::BufferUnderflow {
                requested,
                available,
            } => write!(
                f,
                "Byte buffer underflow: need {} bytes, {} available",
                requested, available
            ),
            Error::MaxConnections(n) => write!(f, "Connection limit reached ({})", n),
            Error::DuplicateChannel(sid) => write!(f, "Channel already registered: {}", sid),
            Error::ChannelNotFound(sid) => write!(f, "Channel not found: {}", sid),
            Error::InactiveChannel => write!(f, "No active channel"),
            Error::MissingNonce => write!(f, "Broadcast message has no nonce"),
            Error::ChannelStopped(sid) => write!(f, "Channel stopped: {}", sid),
            Error::ListenerExists(addr) => write!(f, "Already listening on {}", addr),
            Error::ListenerNotFound(addr) => write!(f, "No listener on {}", addr),
            Error::ConnectorNotFound(what) => write!(f, "Connector not found: {}", what),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Result alias for `dbc-net` operations.
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// Tests
// ============================================================================
