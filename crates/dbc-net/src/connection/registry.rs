// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Live channel table keyed by [`SocketId`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::channel::SocketChannel;
use crate::error::{Error, Result};
use crate::socket_id::{SocketId, SocketKind};

/// Owns every live channel by strong reference.
///
/// Lookups and broadcast iteration take the read lock; add/remove take the
/// write lock. The table only ever holds channels that are not stopped:
/// [`SocketChannel::stop`] removes its own entry.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: RwLock<HashMap<SocketId, Arc<SocketChannel>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel. A second registration of the same id fails.
    pub fn add_channel(&self, channel: Arc<SocketChannel>) -> Result<()> {
        let sid = channel.sid();
        let mut channels = self.channels.write();
        if channels.contains_key(&sid) {
            return Err(Error::DuplicateChannel(sid));
        }
        channels.insert(sid, channel);
        log::trace!("[CONN-MGR] channel {} registered ({} live)", sid, channels.len());
        Ok(())
    }

    pub fn remove_channel(&self, sid: SocketId) -> Option<Arc<SocketChannel>> {
        self.channels.write().remove(&sid)
    }

    pub fn get(&self, sid: SocketId) -> Option<Arc<SocketChannel>> {
        self.channels.read().get(&sid).cloned()
    }

    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All channels, cloned out of the lock.
    pub fn snapshot(&self) -> Vec<Arc<SocketChannel>> {
        self.channels.read().values().cloned().collect()
    }

    /// Logged-in channel whose peer announced `node_id`.
    pub fn find_by_node_id(&self, node_id: &str) -> Option<Arc<SocketChannel>> {
        self.channels
            .read()
            .values()
            .find(|c| c.is_ready() && c.remote_node_id().as_deref() == Some(node_id))
            .cloned()
    }

    pub fn count_by_kind(&self, kind: SocketKind) -> usize {
        self.channels
            .read()
            .keys()
            .filter(|sid| sid.kind() == kind)
            .count()
    }

    /// Remove and return every channel.
    pub fn drain(&self) -> Vec<Arc<SocketChannel>> {
        self.channels.write().drain().map(|(_, c)| c).collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::socket_channel_for_tests;

    #[test]
    fn test_at_most_once_registration() {
        let (_reactor, registry, channel) = socket_channel_for_tests(SocketKind::Server, 5);
        assert_eq!(registry.len(), 1);
        assert!(matches!(
            registry.add_channel(Arc::clone(&channel)),
            Err(Error::DuplicateChannel(sid)) if sid == channel.sid()
        ));
        assert_eq!(registry.len(), 1);
        assert!(registry.get(channel.sid()).is_some());
    }

    #[test]
    fn test_size_tracks_live_channels() {
        let (_reactor, registry, channel) = socket_channel_for_tests(SocketKind::Client, 6);
        assert_eq!(registry.count_by_kind(SocketKind::Client), 1);
        assert_eq!(registry.count_by_kind(SocketKind::Server), 0);

        channel.stop();
        assert!(registry.is_empty());
        assert!(registry.remove_channel(channel.sid()).is_none());
    }

    #[test]
    fn test_find_by_node_id_needs_login() {
        let (_reactor, registry, channel) = socket_channel_for_tests(SocketKind::Client, 7);
        channel.set_remote_node_id("peer-a");
        assert!(registry.find_by_node_id("peer-a").is_none());
        channel.set_logged_in();
        assert_eq!(
            registry.find_by_node_id("peer-a").map(|c| c.sid()),
            Some(channel.sid())
        );
        assert!(registry.find_by_node_id("peer-b").is_none());
    }

    #[test]
    fn test_drain() {
        let (_reactor, registry, _channel) = socket_channel_for_tests(SocketKind::Server, 8);
        assert_eq!(registry.drain().len(), 1);
        assert!(registry.snapshot().is_empty());
    }
}
