// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic bus: in-process publish/subscribe keyed by topic name and payload type.
//!
//! The network layer only ever publishes (decoded messages under their message
//! name, connect/channel-error notifications); service modules subscribe and
//! publish their responses. Nothing is buffered: `publish` calls every
//! matching callback synchronously on the publishing thread. A module that
//! needs to decouple from the network threads pushes into its own mailbox
//! (see [`crate::service::ServiceModule`]).
//!
//! Registration key is `(topic, TypeId of the payload)`, so the same topic can
//! carry different payload types without callbacks seeing the wrong one.
//!
//! Dispatch works on a snapshot of the callback list taken under the read
//! lock; callbacks run with no lock held. A subscription added while a publish
//! is running does not receive that publish, and callbacks may themselves
//! subscribe or publish without deadlocking.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

type Callback = Arc<dyn Fn(&dyn Any) + Send + Sync>;

/// Handle returned by [`TopicBus::subscribe`], used for targeted removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Typed topic registry.
pub struct TopicBus {
    topics: RwLock<HashMap<(String, TypeId), Vec<(SubscriptionId, Callback)>>>,
    next_id: AtomicU64,
}

impl TopicBus {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `callback` for payloads of type `T` on `topic`.
    ///
    /// Callbacks for one key are invoked in subscription order.
    pub fn subscribe<T, F>(&self, topic: &str, callback: F) -> SubscriptionId
    where
        T: Any,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let erased: Callback = Arc::new(move |payload: &dyn Any| {
            if let Some(value) = payload.downcast_ref::<T>() {
                callback(value);
            }
        });

        self.topics
            .write()
            .entry((topic.to_string(), TypeId::of::<T>()))
            .or_default()
            .push((id, erased));
        log::debug!("[BUS] subscribe {} ({})", topic, std::any::type_name::<T>());
        id
    }

    /// Deliver `payload` to every subscriber of `(topic, T)`.
    ///
    /// Returns the number of callbacks invoked; zero subscribers is a no-op.
    pub fn publish<T: Any>(&self, topic: &str, payload: &T) -> usize {
        let snapshot: Vec<Callback> = {
            let topics = self.topics.read();
            match topics.get(&(topic.to_string(), TypeId::of::<T>())) {
                Some(subs) => subs.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
                None => return 0,
            }
        };

        for cb in &snapshot {
            cb(payload);
        }
        snapshot.len()
    }

    /// Remove every callback for `(topic, T)`. Returns how many were removed.
    pub fn unsubscribe<T: Any>(&self, topic: &str) -> usize {
        let removed = self
            .topics
            .write()
            .remove(&(topic.to_string(), TypeId::of::<T>()))
            .map_or(0, |subs| subs.len());
        if removed > 0 {
            log::debug!("[BUS] unsubscribe {} ({} callbacks)", topic, removed);
        }
        removed
    }

    /// Remove a single subscription.
    pub fn unsubscribe_id(&self, id: SubscriptionId) -> bool {
        let mut topics = self.topics.write();
        let mut found = false;
        topics.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|(sid, _)| *sid != id);
            found |= subs.len() != before;
            !subs.is_empty()
        });
        found
    }

    /// Number of callbacks registered for `(topic, T)`.
    pub fn subscriber_count<T: Any>(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(&(topic.to_string(), TypeId::of::<T>()))
            .map_or(0, Vec::len)
    }

    /// Whether anyone listens for `(topic, T)`.
    pub fn has_subscribers<T: Any>(&self, topic: &str) -> bool {
        self.subscriber_count::<T>(topic) > 0
    }
}

impl Default for TopicBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TopicBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicBus")
            .field("keys", &self.topics.read().len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
