// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Network metrics.
//!
//! One [`NetMetrics`] instance is shared by every channel, acceptor and
//! connector of a connection manager:
//! - Connection statistics (accepted, established, failed, closed)
//! - Message and byte throughput
//! - Drops (framing errors, unknown messages, duplicates, over-speed)
//!
//! # Example
//!
//! ```
//! use dbc_net::NetMetrics;
//!
//! let metrics = NetMetrics::new();
//! metrics.record_connection_established();
//! metrics.record_message_sent(1024);
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.connections_established, 1);
//! assert_eq!(snapshot.active_connections, 1);
//! ```

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

/// Counters shared across the networking substrate.
#[derive(Debug)]
pub struct NetMetrics {
    // Connections
    active_connections: AtomicUsize,
    connections_accepted: AtomicU64,
    connections_established: AtomicU64,
    connections_failed: AtomicU64,
    connections_closed: AtomicU64,
    reconnect_attempts: AtomicU64,

    // Throughput
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,

    // Drops
    framing_errors: AtomicU64,
    unknown_messages: AtomicU64,
    duplicates_dropped: AtomicU64,
    over_speed_dropped: AtomicU64,
    queue_full: AtomicU64,

    start_time: Instant,
}

impl NetMetrics {
    pub fn new() -> Self {
        Self {
            active_connections: AtomicUsize::new(0),
            connections_accepted: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connections_failed: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            framing_errors: AtomicU64::new(0),
            unknown_messages: AtomicU64::new(0),
            duplicates_dropped: AtomicU64::new(0),
            over_speed_dropped: AtomicU64::new(0),
            queue_full: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    // ========================================================================
    // Connection recording
    // ========================================================================

    /// Inbound socket accepted by a listener.
    pub fn record_connection_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Channel registered and started (either direction).
    pub fn record_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Channel torn down.
    pub fn record_connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
        // saturating: a channel that never got established may still be closed
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Outbound connect attempt failed.
    pub fn record_connection_failed(&self) {
        self.connections_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    // ========================================================================
    // Throughput recording
    // ========================================================================

    pub fn record_message_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_message_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    // ========================================================================
    // Drop recording
    // ========================================================================

    pub fn record_framing_error(&self) {
        self.framing_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown_message(&self) {
        self.unknown_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_over_speed(&self) {
        self.over_speed_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_full(&self) {
        self.queue_full.fetch_add(1, Ordering::Relaxed);
    }

    // ========================================================================
    // Getters
    // ========================================================================

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn duplicates_dropped(&self) -> u64 {
        self.duplicates_dropped.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Take a snapshot of all counters.
    pub fn snapshot(&self) -> NetMetricsSnapshot {
        NetMetricsSnapshot {
            active_connections: self.active_connections.load(Ordering::Relaxed),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            connections_failed: self.connections_failed.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
            unknown_messages: self.unknown_messages.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            over_speed_dropped: self.over_speed_dropped.load(Ordering::Relaxed),
            queue_full: self.queue_full.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

impl Default for NetMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`NetMetrics`].
#[derive(Clone, Debug, Default)]
pub struct NetMetricsSnapshot {
    pub active_connections: usize,
    pub connections_accepted: u64,
    pub connections_established: u64,
    pub connections_failed: u64,
    pub connections_closed: u64,
    pub reconnect_attempts: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub framing_errors: u64,
    pub unknown_messages: u64,
    pub duplicates_dropped: u64,
    pub over_speed_dropped: u64,
    pub queue_full: u64,
    pub uptime_secs: f64,
}

impl NetMetricsSnapshot {
    /// Messages per second, both directions.
    pub fn message_rate(&self) -> f64 {
        if self.uptime_secs > 0.0 {
            (self.messages_sent + self.messages_received) as f64 / self.uptime_secs
        } else {
            0.0
        }
    }

    /// Share of outbound attempts that connected.
    pub fn connection_success_rate(&self) -> f64 {
        let total = self.connections_established + self.connections_failed;
        if total > 0 {
            self.connections_established as f64 / total as f64
        } else {
            1.0
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_counters() {
        let m = NetMetrics::new();
        m.record_connection_accepted();
        m.record_connection_established();
        m.record_connection_established();
        m.record_connection_closed();
        m.record_connection_failed();

        let s = m.snapshot();
        assert_eq!(s.connections_accepted, 1);
        assert_eq!(s.connections_established, 2);
        assert_eq!(s.connections_closed, 1);
        assert_eq!(s.active_connections, 1);
        assert!((s.connection_success_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_close_without_establish_saturates() {
        let m = NetMetrics::new();
        m.record_connection_closed();
        assert_eq!(m.active_connections(), 0);
        assert_eq!(m.snapshot().connections_closed, 1);
    }

    #[test]
    fn test_throughput_and_drops() {
        let m = NetMetrics::new();
        m.record_message_sent(100);
        m.record_message_received(40);
        m.record_message_received(60);
        m.record_duplicate();
        m.record_over_speed();
        m.record_unknown_message();
        m.record_queue_full();
        m.record_framing_error();

        let s = m.snapshot();
        assert_eq!(s.messages_sent, 1);
        assert_eq!(s.bytes_sent, 100);
        assert_eq!(s.messages_received, 2);
        assert_eq!(s.bytes_received, 100);
        assert_eq!(s.duplicates_dropped, 1);
        assert_eq!(s.over_speed_dropped, 1);
        assert_eq!(s.unknown_messages, 1);
        assert_eq!(s.queue_full, 1);
        assert_eq!(s.framing_errors, 1);
    }
}
