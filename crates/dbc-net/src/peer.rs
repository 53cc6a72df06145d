// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Peer directory: the candidate endpoints a node may connect to.
//!
//! # Candidate states
//!
//! ```text
//!            select_for_connect          login (mark_available)
//!   [Idle] --------------------> [InUse] ----------------------> [Available]
//!     ^                            |  |                               |
//!     |                  connect   |  | our own node id               |
//!     |                  failed /  |  v                               |
//!     |                  error     | [Zombie]                         |
//!     |                            v                                  |
//!     +---- (retried while ---- [Failed] <----- channel error --------+ (kept)
//!            reconnects < max)     |
//!                                  v purge_failed
//!                               removed
//! ```
//!
//! The list is ordered: candidates that just failed move to the tail so the
//! next selection round tries fresh endpoints first.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::bus::{SubscriptionId, TopicBus};
use crate::protocol::{
    ChannelErrorNotification, ConnectNotification, ConnectStatus, CLIENT_CONNECT_NOTIFICATION,
    TCP_CHANNEL_ERROR,
};

/// Upper bound on the candidate list.
pub const MAX_PEER_CANDIDATES: usize = 1024;

/// Failed candidates are retried until they reach this many connects.
pub const DEFAULT_MAX_RECONNECT: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NetState {
    /// Never tried, usable whenever needed.
    Idle,
    /// Connecting or connected.
    InUse,
    Failed,
    /// Points back at ourselves; never selected again.
    Zombie,
    /// Logged in at least once.
    Available,
}

impl std::fmt::Display for NetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NetState::Idle => "idle",
            NetState::InUse => "in_use",
            NetState::Failed => "failed",
            NetState::Zombie => "zombie",
            NetState::Available => "available",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerCandidate {
    pub endpoint: SocketAddr,
    pub net_state: NetState,
    pub reconnect_count: u32,
    pub last_connect_time: SystemTime,
    /// Empty until learned from a handshake or a peer list.
    pub node_id: String,
}

impl PeerCandidate {
    pub fn new(endpoint: SocketAddr, net_state: NetState) -> Self {
        Self {
            endpoint,
            net_state,
            reconnect_count: 0,
            last_connect_time: SystemTime::now(),
            node_id: String::new(),
        }
    }
}

/// Ordered candidate list, at most one entry per endpoint.
#[derive(Debug)]
pub struct PeerDirectory {
    candidates: Mutex<Vec<PeerCandidate>>,
    max_reconnect: u32,
}

impl Default for PeerDirectory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECONNECT)
    }
}

impl PeerDirectory {
    pub fn new(max_reconnect: u32) -> Self {
        Self {
            candidates: Mutex::new(Vec::new()),
            max_reconnect,
        }
    }

    /// Add `endpoint` unless it is already known or the list is full.
    pub fn add_candidate(&self, endpoint: SocketAddr, state: NetState, node_id: &str) -> bool {
        let mut list = self.candidates.lock();
        if list.len() >= MAX_PEER_CANDIDATES {
            log::debug!("[PEER] candidate list full, dropping {}", endpoint);
            return false;
        }
        if list.iter().any(|c| c.endpoint == endpoint) {
            return false;
        }
        let mut candidate = PeerCandidate::new(endpoint, state);
        candidate.node_id = node_id.to_string();
        list.push(candidate);
        log::debug!("[PEER] added candidate {} ({})", endpoint, state);
        true
    }

    pub fn get(&self, endpoint: SocketAddr) -> Option<PeerCandidate> {
        self.candidates
            .lock()
            .iter()
            .find(|c| c.endpoint == endpoint)
            .cloned()
    }

    pub fn remove(&self, endpoint: SocketAddr) -> bool {
        let mut list = self.candidates.lock();
        let before = list.len();
        list.retain(|c| c.endpoint != endpoint);
        list.len() != before
    }

    pub fn len(&self) -> usize {
        self.candidates.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<PeerCandidate> {
        self.candidates.lock().clone()
    }

    /// The channel to `endpoint` logged in as `node_id`.
    pub fn mark_available(&self, endpoint: SocketAddr, node_id: &str) -> bool {
        let mut list = self.candidates.lock();
        let Some(c) = list.iter_mut().find(|c| c.endpoint == endpoint) else {
            return false;
        };
        c.net_state = NetState::Available;
        c.reconnect_count = 0;
        if !node_id.is_empty() {
            c.node_id = node_id.to_string();
        }
        true
    }

    /// Pick up to `limit` endpoints to connect to and mark them in use.
    ///
    /// Idle candidates and failed ones still under the reconnect bound are
    /// eligible. A candidate carrying `self_node_id` becomes a zombie.
    pub fn select_for_connect(&self, limit: usize, self_node_id: &str) -> Vec<SocketAddr> {
        let mut list = self.candidates.lock();
        let mut selected = Vec::new();
        for c in list.iter_mut() {
            if selected.len() >= limit {
                break;
            }
            let eligible = c.net_state == NetState::Idle
                || (c.net_state == NetState::Failed && c.reconnect_count < self.max_reconnect);
            if !eligible {
                continue;
            }
            if !self_node_id.is_empty() && c.node_id == self_node_id {
                log::debug!("[PEER] {} is ourselves, marking zombie", c.endpoint);
                c.net_state = NetState::Zombie;
                continue;
            }
            c.net_state = NetState::InUse;
            c.reconnect_count += 1;
            c.last_connect_time = SystemTime::now();
            selected.push(c.endpoint);
        }
        selected
    }

    /// Connector outcome for `endpoint`.
    pub fn on_connect_result(&self, endpoint: SocketAddr, success: bool) {
        if success {
            return;
        }
        let mut list = self.candidates.lock();
        if let Some(c) = list.iter_mut().find(|c| c.endpoint == endpoint) {
            c.net_state = NetState::Failed;
            c.last_connect_time = SystemTime::now();
        }
    }

    /// A channel to `endpoint` died: mark failed and move it to the tail.
    pub fn on_channel_error(&self, endpoint: SocketAddr) {
        let mut list = self.candidates.lock();
        let Some(idx) = list.iter().position(|c| c.endpoint == endpoint) else {
            return;
        };
        if matches!(list[idx].net_state, NetState::Zombie | NetState::Available) {
            return;
        }
        let mut c = list.remove(idx);
        c.net_state = NetState::Failed;
        c.last_connect_time = SystemTime::now();
        log::debug!("[PEER] {} failed, moved to tail", endpoint);
        list.push(c);
    }

    /// Drop failed candidates that used up their reconnects.
    pub fn purge_failed(&self) -> usize {
        let mut list = self.candidates.lock();
        let before = list.len();
        list.retain(|c| !(c.net_state == NetState::Failed && c.reconnect_count >= self.max_reconnect));
        let purged = before - list.len();
        if purged > 0 {
            log::debug!("[PEER] purged {} failed candidates", purged);
        }
        purged
    }

    /// Up to `n` candidates that have logged in before.
    pub fn available_candidates(&self, n: usize) -> Vec<PeerCandidate> {
        self.candidates
            .lock()
            .iter()
            .filter(|c| c.net_state == NetState::Available)
            .take(n)
            .cloned()
            .collect()
    }

    /// Candidates that are or may become usable.
    pub fn maybe_available_count(&self) -> usize {
        self.candidates
            .lock()
            .iter()
            .filter(|c| match c.net_state {
                NetState::Idle | NetState::InUse | NetState::Available => true,
                NetState::Failed => c.reconnect_count < self.max_reconnect,
                NetState::Zombie => false,
            })
            .count()
    }

    /// Follow connect outcomes and channel errors published on `bus`.
    pub fn attach(self: &Arc<Self>, bus: &TopicBus) -> Vec<SubscriptionId> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let on_connect = bus.subscribe::<ConnectNotification, _>(
            CLIENT_CONNECT_NOTIFICATION,
            move |n| {
                if let Some(dir) = weak.upgrade() {
                    dir.on_connect_result(n.endpoint, n.status == ConnectStatus::Success);
                }
            },
        );

        let weak: Weak<Self> = Arc::downgrade(self);
        let on_error = bus.subscribe::<ChannelErrorNotification, _>(TCP_CHANNEL_ERROR, move |n| {
            if let Some(dir) = weak.upgrade() {
                dir.on_channel_error(n.endpoint);
            }
        });
        vec![on_connect, on_error]
    }
}

// ============================================================================
// Tests
// ============================================================================
