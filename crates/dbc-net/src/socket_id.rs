// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Socket identifiers.
//!
//! Every channel is keyed by a [`SocketId`]: the side that created it
//! (accepted = server, connected = client) plus a sequence drawn from a
//! single process-wide counter. The allocator is an explicitly owned object,
//! shared by `Arc` between the acceptors and connectors of one manager.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Which side of the TCP connection created the channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SocketKind {
    /// Accepted by a local listener (inbound).
    Server,
    /// Established by a local connector (outbound).
    Client,
}

impl fmt::Display for SocketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketKind::Server => write!(f, "server"),
            SocketKind::Client => write!(f, "client"),
        }
    }
}

/// Channel identifier, unique for the lifetime of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId {
    kind: SocketKind,
    sequence: u64,
}

impl SocketId {
    /// Build an id from its parts.
    pub const fn new(kind: SocketKind, sequence: u64) -> Self {
        Self { kind, sequence }
    }

    /// Placeholder id carried by locally created messages.
    pub const fn unset() -> Self {
        Self::new(SocketKind::Server, 0)
    }

    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_client(&self) -> bool {
        self.kind == SocketKind::Client
    }

    pub fn is_unset(&self) -> bool {
        self.sequence == 0
    }
}

impl Default for SocketId {
    fn default() -> Self {
        Self::unset()
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.sequence)
    }
}

/// Monotonic [`SocketId`] allocator.
///
/// Server and client ids share one counter, so a sequence number is never
/// handed out twice regardless of kind. Sequence 0 is reserved for
/// [`SocketId::unset`].
#[derive(Debug, Default)]
pub struct SocketIdAllocator {
    current: AtomicU64,
}

impl SocketIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id for an accepted connection.
    pub fn alloc_server(&self) -> SocketId {
        SocketId::new(SocketKind::Server, self.next())
    }

    /// Allocate an id for an outbound connector.
    pub fn alloc_client(&self) -> SocketId {
        SocketId::new(SocketKind::Client, self.next())
    }

    /// Number of ids handed out so far.
    pub fn allocated(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    fn next(&self) -> u64 {
        self.current.fetch_add(1, Ordering::Relaxed) + 1
    }
}

// ============================================================================
// Tests
// ============================================================================
