// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Objects shared by every channel, acceptor and connector of one manager.

use std::sync::Arc;

use crate::bus::TopicBus;
use crate::config::NetConfig;
use crate::metrics::NetMetrics;
use crate::nonce_filter::NonceFilter;
use crate::protocol::{CodecTable, MessageCodec};
use crate::socket_id::SocketIdAllocator;

/// Shared networking state.
///
/// Constructed once per connection manager and handed to its components by
/// `Arc`; there are no process-wide singletons.
#[derive(Debug)]
pub struct NetContext {
    pub config: NetConfig,
    pub bus: Arc<TopicBus>,
    pub nonce_filter: Arc<NonceFilter>,
    pub socket_ids: Arc<SocketIdAllocator>,
    pub metrics: Arc<NetMetrics>,
    pub codec: MessageCodec,
}

impl NetContext {
    /// Context with a fresh nonce filter, id allocator and metrics.
    pub fn new(config: NetConfig, bus: Arc<TopicBus>) -> Self {
        Self::with_codec_table(config, bus, CodecTable::with_defaults())
    }

    /// Context decoding with a caller-extended codec table.
    pub fn with_codec_table(config: NetConfig, bus: Arc<TopicBus>, table: CodecTable) -> Self {
        let codec = MessageCodec::new(Arc::new(table), config.max_frame_len)
            .with_compression(config.compression);
        Self {
            config,
            bus,
            nonce_filter: Arc::new(NonceFilter::default()),
            socket_ids: Arc::new(SocketIdAllocator::new()),
            metrics: Arc::new(NetMetrics::new()),
            codec,
        }
    }
}
