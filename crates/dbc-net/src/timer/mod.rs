// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timer service: per-module timer queues driven by a shared tick source.

mod manager;
mod tick;

pub use manager::{FiredTimer, TimerId, TimerManager, INVALID_TIMER_ID, REPEAT_FOREVER};
pub use tick::TickSource;
