// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-channel receive rate limiter.
//!
//! A token window refilled every half second with `max_recv_speed / 2`
//! messages. Unused window carries over up to `2 * max_recv_speed`, so short
//! bursts after quiet periods pass.

use std::time::{Duration, Instant};

/// Refill period.
pub const FLOW_SLICE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct FlowCtrl {
    max_speed: u64,
    window: u64,
    free: u64,
    last_refill: Instant,
}

impl FlowCtrl {
    /// Limiter allowing `max_recv_speed` messages per second; `0` disables it.
    pub fn new(max_recv_speed: u32, now: Instant) -> Self {
        let max_speed = max_recv_speed as u64;
        let window = (max_speed / 2).max(u64::from(max_speed > 0));
        Self {
            max_speed,
            window,
            free: window,
            last_refill: now,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_speed > 0
    }

    /// Account for `n` received messages. Returns true if over the limit.
    pub fn over_speed(&mut self, n: u64, now: Instant) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.refill(now);
        if self.free >= n {
            self.free -= n;
            false
        } else {
            true
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed < FLOW_SLICE {
            return;
        }
        let slices = (elapsed.as_millis() / FLOW_SLICE.as_millis()) as u64;
        self.free = self
            .free
            .saturating_add(self.window.saturating_mul(slices))
            .min(self.max_speed * 2);
        self.last_refill += FLOW_SLICE * slices as u32;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_never_limits() {
        let now = Instant::now();
        let mut fc = FlowCtrl::new(0, now);
        assert!(!fc.is_enabled());
        for _ in 0..10_000 {
            assert!(!fc.over_speed(1, now));
        }
    }

    #[test]
    fn test_window_per_slice() {
        let now = Instant::now();
        let mut fc = FlowCtrl::new(10, now);
        // 5 per half second
        for _ in 0..5 {
            assert!(!fc.over_speed(1, now));
        }
        assert!(fc.over_speed(1, now));

        let later = now + FLOW_SLICE;
        assert!(!fc.over_speed(5, later));
        assert!(fc.over_speed(1, later));
    }

    #[test]
    fn test_free_window_capped() {
        let now = Instant::now();
        let mut fc = FlowCtrl::new(10, now);
        // idle for a long time: at most 2 * max accumulates
        let later = now + Duration::from_secs(60);
        assert!(!fc.over_speed(20, later));
        assert!(fc.over_speed(1, later));
    }
}
