// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-size pool of reactors with round-robin selection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

use super::{Reactor, ReactorHandle};
use crate::config::MAX_POOL_THREADS;
use crate::error::{Error, Result};

/// Pool of reactor threads.
///
/// `init` and `start` are all-or-nothing: if one reactor fails, the ones
/// already started are stopped before the error is returned.
pub struct ReactorPool {
    name: String,
    tick_interval: Duration,
    reactors: RwLock<Vec<Reactor>>,
    next: AtomicUsize,
}

impl ReactorPool {
    pub fn new(name: &str, tick_interval: Duration) -> Self {
        Self {
            name: name.to_string(),
            tick_interval,
            reactors: RwLock::new(Vec::new()),
            next: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create `n` reactors.
    pub fn init(&self, n: usize) -> Result<()> {
        if n == 0 || n > MAX_POOL_THREADS {
            return Err(Error::PoolSizeOverCap {
                requested: n,
                cap: MAX_POOL_THREADS,
            });
        }

        let mut reactors = self.reactors.write();
        if !reactors.is_empty() {
            return Err(Error::InvalidState(format!(
                "pool {} already initialized",
                self.name
            )));
        }

        let mut created = Vec::with_capacity(n);
        for i in 0..n {
            created.push(Reactor::new(
                i,
                &format!("{}-{}", self.name, i),
                self.tick_interval,
            )?);
        }
        *reactors = created;
        log::debug!("[REACTOR] pool {} initialized with {} reactors", self.name, n);
        Ok(())
    }

    /// Start every reactor thread.
    pub fn start(&self) -> Result<()> {
        let reactors = self.reactors.read();
        if reactors.is_empty() {
            return Err(Error::InvalidState(format!("pool {} not initialized", self.name)));
        }

        for (i, reactor) in reactors.iter().enumerate() {
            if let Err(e) = reactor.start() {
                log::error!("[REACTOR] pool {} failed to start reactor {}: {}", self.name, i, e);
                for started in &reactors[..i] {
                    started.stop();
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Next reactor in round-robin order.
    pub fn next_reactor(&self) -> Result<ReactorHandle> {
        let reactors = self.reactors.read();
        if reactors.is_empty() {
            return Err(Error::InvalidState(format!("pool {} not initialized", self.name)));
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % reactors.len();
        Ok(reactors[idx].handle())
    }

    /// Stop and join every reactor. Idempotent.
    pub fn stop(&self) {
        for reactor in self.reactors.read().iter() {
            reactor.stop();
        }
    }

    pub fn size(&self) -> usize {
        self.reactors.read().len()
    }

    pub fn is_running(&self) -> bool {
        self.reactors.read().iter().any(Reactor::is_running)
    }
}

impl std::fmt::Debug for ReactorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactorPool")
            .field("name", &self.name)
            .field("size", &self.size())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> ReactorPool {
        ReactorPool::new("worker", Duration::from_millis(50))
    }

    #[test]
    fn test_init_rejects_out_of_range() {
        assert!(matches!(
            pool().init(0),
            Err(Error::PoolSizeOverCap { requested: 0, cap: 64 })
        ));
        assert!(matches!(
            pool().init(MAX_POOL_THREADS + 1),
            Err(Error::PoolSizeOverCap { .. })
        ));
    }

    #[test]
    fn test_init_twice_rejected() {
        let p = pool();
        p.init(1).unwrap();
        assert!(matches!(p.init(1), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_round_robin() {
        let p = pool();
        p.init(3).unwrap();
        p.start().unwrap();

        let ids: Vec<usize> = (0..7).map(|_| p.next_reactor().unwrap().id()).collect();
        assert_eq!(ids, vec![0, 1, 2, 0, 1, 2, 0]);
        p.stop();
    }

    #[test]
    fn test_start_stop_lifecycle() {
        let p = pool();
        assert!(p.start().is_err());
        assert!(p.next_reactor().is_err());

        p.init(2).unwrap();
        p.start().unwrap();
        assert!(p.is_running());
        assert_eq!(p.size(), 2);

        p.stop();
        p.stop();
        assert!(!p.is_running());
    }
}
