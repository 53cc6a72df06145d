// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-module timer queue.
//!
//! Timers are ordered by their next fire tick. The owning module feeds
//! [`TimerManager::process`] with the tick counter; due timers are returned
//! to the caller, which dispatches them by name. Nothing here runs on its own
//! thread.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// Timer identifier. `0` is [`INVALID_TIMER_ID`].
pub type TimerId = u32;

/// Returned by [`TimerManager::add_timer`] when the request is rejected.
pub const INVALID_TIMER_ID: TimerId = 0;

/// Repeat count meaning "until removed".
pub const REPEAT_FOREVER: u64 = u64::MAX;

#[derive(Debug, Clone)]
struct Timer {
    name: String,
    period_ticks: u64,
    remaining: u64,
    next_fire: u64,
    session_id: String,
}

/// A timer that came due in [`TimerManager::process`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredTimer {
    pub id: TimerId,
    pub name: String,
    pub session_id: String,
    /// Whether this was the last repeat (the timer is gone).
    pub exhausted: bool,
}

/// Ordered timer queue.
#[derive(Debug)]
pub struct TimerManager {
    tick_ms: u64,
    current_tick: u64,
    next_id: TimerId,
    queue: BTreeSet<(u64, TimerId)>,
    timers: HashMap<TimerId, Timer>,
}

impl TimerManager {
    /// New queue whose ticks are `tick_interval` apart.
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            tick_ms: (tick_interval.as_millis() as u64).max(1),
            current_tick: 0,
            next_id: INVALID_TIMER_ID,
            queue: BTreeSet::new(),
            timers: HashMap::new(),
        }
    }

    /// Schedule a timer.
    ///
    /// First fire is `delay_ms` after the current tick, then every
    /// `period_ms`, `repeat` times in total ([`REPEAT_FOREVER`] for no limit).
    /// Returns [`INVALID_TIMER_ID`] if `period_ms` is below one tick or
    /// `repeat` is zero.
    pub fn add_timer(
        &mut self,
        name: &str,
        delay_ms: u64,
        period_ms: u64,
        repeat: u64,
        session_id: &str,
    ) -> TimerId {
        if period_ms < self.tick_ms || repeat == 0 {
            log::warn!(
                "[TIMER] rejected {}: period {}ms (tick {}ms), repeat {}",
                name,
                period_ms,
                self.tick_ms,
                repeat
            );
            return INVALID_TIMER_ID;
        }

        let id = self.alloc_id();
        let next_fire = self.current_tick + delay_ms / self.tick_ms;
        self.timers.insert(
            id,
            Timer {
                name: name.to_string(),
                period_ticks: period_ms / self.tick_ms,
                remaining: repeat,
                next_fire,
                session_id: session_id.to_string(),
            },
        );
        self.queue.insert((next_fire, id));
        log::trace!("[TIMER] add {} id={} first={}", name, id, next_fire);
        id
    }

    /// Remove a timer. Unknown or already-exhausted ids are ignored.
    pub fn remove_timer(&mut self, id: TimerId) -> bool {
        match self.timers.remove(&id) {
            Some(t) => {
                self.queue.remove(&(t.next_fire, id));
                true
            }
            None => false,
        }
    }

    /// Fire every timer due at `tick`, then reschedule the repeating ones.
    ///
    /// A timer fires at most once per call, even if `tick` jumped past
    /// several of its periods.
    pub fn process(&mut self, tick: u64) -> Vec<FiredTimer> {
        self.current_tick = self.current_tick.max(tick);

        let mut due = Vec::new();
        while let Some(&(at, id)) = self.queue.first() {
            if at > tick {
                break;
            }
            self.queue.remove(&(at, id));
            due.push(id);
        }

        let mut fired = Vec::with_capacity(due.len());
        for id in due {
            let Some(timer) = self.timers.get_mut(&id) else {
                continue;
            };
            if timer.remaining != REPEAT_FOREVER {
                timer.remaining -= 1;
            }
            let exhausted = timer.remaining == 0;
            fired.push(FiredTimer {
                id,
                name: timer.name.clone(),
                session_id: timer.session_id.clone(),
                exhausted,
            });

            if exhausted {
                self.timers.remove(&id);
            } else {
                timer.next_fire += timer.period_ticks;
                self.queue.insert((timer.next_fire, id));
            }
        }
        fired
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn contains(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    /// Last tick seen by `process`.
    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.timers.clear();
    }

    fn alloc_id(&mut self) -> TimerId {
        loop {
            self.next_id = self.next_id.wrapping_add(1);
            if self.next_id != INVALID_TIMER_ID && !self.timers.contains_key(&self.next_id) {
                return self.next_id;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
