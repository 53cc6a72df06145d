// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared tick source.
//!
//! One thread publishes [`TimeTick`] on [`TIME_TICK_NOTIFICATION`] every
//! interval. Modules subscribe and drive their [`super::TimerManager`] from
//! the tick number, so every timer in the process shares one clock.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;

use crate::bus::TopicBus;
use crate::error::{Error, Result};
use crate::protocol::{TimeTick, TIME_TICK_NOTIFICATION};

struct Running {
    stop_tx: Sender<()>,
    join: JoinHandle<()>,
}

/// Background tick publisher.
pub struct TickSource {
    bus: Arc<TopicBus>,
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl TickSource {
    pub fn new(bus: Arc<TopicBus>, interval: Duration) -> Self {
        Self {
            bus,
            interval,
            running: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the tick thread. Calling it again while running is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Ok(());
        }
        if self.interval.is_zero() {
            return Err(Error::InvalidConfig("tick interval must be > 0".into()));
        }

        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let ticker = channel::tick(self.interval);
        let bus = Arc::clone(&self.bus);

        let join = thread::Builder::new()
            .name("dbc-tick".to_string())
            .spawn(move || {
                let mut n: u64 = 0;
                loop {
                    channel::select! {
                        recv(ticker) -> _ => {
                            n += 1;
                            bus.publish(TIME_TICK_NOTIFICATION, &TimeTick(n));
                        }
                        recv(stop_rx) -> _ => break,
                    }
                }
                log::debug!("[TIMER] tick source stopped after {} ticks", n);
            })?;

        *running = Some(Running { stop_tx, join });
        Ok(())
    }

    /// Stop and join the tick thread. Idempotent.
    pub fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        let _ = running.stop_tx.send(());
        if running.join.join().is_err() {
            log::error!("[TIMER] tick thread panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }
}

impl Drop for TickSource {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_ticks_are_published_in_order() {
        let bus = Arc::new(TopicBus::new());
        let last = Arc::new(AtomicU64::new(0));
        let ordered = Arc::new(AtomicU64::new(1));

        let l = Arc::clone(&last);
        let o = Arc::clone(&ordered);
        bus.subscribe::<TimeTick, _>(TIME_TICK_NOTIFICATION, move |t| {
            let prev = l.swap(t.0, Ordering::SeqCst);
            if t.0 != prev + 1 {
                o.store(0, Ordering::SeqCst);
            }
        });

        let source = TickSource::new(Arc::clone(&bus), Duration::from_millis(10));
        source.start().unwrap();
        source.start().unwrap();
        thread::sleep(Duration::from_millis(120));
        source.stop();
        source.stop();

        let seen = last.load(Ordering::SeqCst);
        assert!(seen >= 3, "only {} ticks", seen);
        assert_eq!(ordered.load(Ordering::SeqCst), 1);

        // nothing after stop
        thread::sleep(Duration::from_millis(30));
        assert_eq!(last.load(Ordering::SeqCst), seen);
        assert!(!source.is_running());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let source = TickSource::new(Arc::new(TopicBus::new()), Duration::ZERO);
        assert!(matches!(source.start(), Err(Error::InvalidConfig(_))));
    }
}
