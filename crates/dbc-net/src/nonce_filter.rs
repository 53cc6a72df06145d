// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Nonce filter for duplicate suppression.
//!
//! A broadcast topology echoes messages back to their origin; every channel
//! consults one shared [`NonceFilter`] before publishing an inbound message
//! and records every nonce it sends.
//!
//! The filter is a pair of bloom filters. New nonces go into the active
//! generation; lookups check both. Once the active generation holds half the
//! element budget it becomes the previous one and a fresh generation starts,
//! so memory stays fixed and the filter always remembers at least the last
//! `budget / 2` nonces.
//!
//! Rotation drops the oldest half of the dedup state. Under a sustained
//! message rate above what the budget covers, a nonce can fall out of both
//! generations and its echo gets delivered again. The budget and
//! false-positive rate are kept as configured rather than tuned here.

use std::hash::{Hash, Hasher};

use bv::BitVec;
use fnv::FnvHasher;
use parking_lot::Mutex;

/// Default element budget across both generations.
pub const DEFAULT_NONCE_BUDGET: usize = 1_000_000;
/// Default false-positive rate of one generation.
pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.001;

/// Fixed-size bloom filter: one FNV hash per random key.
#[derive(Debug, Clone)]
struct Bloom {
    keys: Vec<u64>,
    bits: BitVec<u64>,
    count: usize,
}

impl Bloom {
    fn new(capacity: usize, fp_rate: f64) -> Self {
        let num_bits = Self::num_bits(capacity, fp_rate);
        let num_keys = Self::num_keys(num_bits, capacity);
        let keys = (0..num_keys).map(|_| fastrand::u64(..)).collect();
        Self {
            keys,
            bits: BitVec::new_fill(false, num_bits),
            count: 0,
        }
    }

    /// m = -n ln(p) / ln(2)^2
    fn num_bits(capacity: usize, fp_rate: f64) -> u64 {
        let n = capacity.max(1) as f64;
        let p = fp_rate.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;
        (-(n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64
    }

    /// k = m / n * ln(2)
    fn num_keys(num_bits: u64, capacity: usize) -> usize {
        ((num_bits as f64 / capacity.max(1) as f64) * std::f64::consts::LN_2)
            .round()
            .clamp(1.0, 32.0) as usize
    }

    fn pos(&self, item: &str, key: u64) -> u64 {
        let mut hasher = FnvHasher::with_key(key);
        item.hash(&mut hasher);
        hasher.finish() % self.bits.len()
    }

    fn contains(&self, item: &str) -> bool {
        self.keys.iter().all(|k| self.bits.get(self.pos(item, *k)))
    }

    fn insert(&mut self, item: &str) {
        for i in 0..self.keys.len() {
            let pos = self.pos(item, self.keys[i]);
            self.bits.set(pos, true);
        }
        self.count += 1;
    }

    fn clear(&mut self) {
        self.bits = BitVec::new_fill(false, self.bits.len());
        self.count = 0;
    }
}

#[derive(Debug)]
struct Generations {
    current: Bloom,
    previous: Bloom,
    rotations: u64,
}

/// Two-generation rotating bloom filter over message nonces.
#[derive(Debug)]
pub struct NonceFilter {
    inner: Mutex<Generations>,
    generation_capacity: usize,
}

impl NonceFilter {
    /// Filter sized for `budget` nonces at `fp_rate`.
    pub fn new(budget: usize, fp_rate: f64) -> Self {
        let generation_capacity = (budget / 2).max(1);
        let bloom = Bloom::new(generation_capacity, fp_rate);
        Self {
            inner: Mutex::new(Generations {
                current: bloom.clone(),
                previous: bloom,
                rotations: 0,
            }),
            generation_capacity,
        }
    }

    /// Whether `nonce` was seen recently. Empty nonces never match.
    pub fn contains(&self, nonce: &str) -> bool {
        if nonce.is_empty() {
            return false;
        }
        let g = self.inner.lock();
        g.current.contains(nonce) || g.previous.contains(nonce)
    }

    /// Record a nonce (called when a message is sent).
    pub fn insert(&self, nonce: &str) {
        if nonce.is_empty() {
            return;
        }
        let mut g = self.inner.lock();
        self.insert_locked(&mut g, nonce);
    }

    /// Returns `true` if `nonce` is a duplicate; otherwise records it.
    ///
    /// Check and insert happen under one lock, so two channels racing on the
    /// same nonce see exactly one "new".
    pub fn check_and_insert(&self, nonce: &str) -> bool {
        if nonce.is_empty() {
            return false;
        }
        let mut g = self.inner.lock();
        if g.current.contains(nonce) || g.previous.contains(nonce) {
            return true;
        }
        self.insert_locked(&mut g, nonce);
        false
    }

    /// Nonces in the active generation.
    pub fn len(&self) -> usize {
        self.inner.lock().current.count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times the active generation has been retired.
    pub fn rotations(&self) -> u64 {
        self.inner.lock().rotations
    }

    fn insert_locked(&self, g: &mut Generations, nonce: &str) {
        if g.current.count >= self.generation_capacity {
            std::mem::swap(&mut g.current, &mut g.previous);
            g.current.clear();
            g.rotations += 1;
            log::debug!("[CHANNEL] nonce filter rotated ({})", g.rotations);
        }
        g.current.insert(nonce);
    }
}

impl Default for NonceFilter {
    fn default() -> Self {
        Self::new(DEFAULT_NONCE_BUDGET, DEFAULT_FALSE_POSITIVE_RATE)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_and_insert() {
        let f = NonceFilter::new(1000, 0.001);
        assert!(!f.check_and_insert("a"));
        assert!(f.check_and_insert("a"));
        assert!(!f.check_and_insert("b"));
        assert!(f.contains("b"));
        assert_eq!(f.len(), 2);
    }

    #[test]
    fn test_insert_then_check_is_dup() {
        let f = NonceFilter::default();
        f.insert("sent-by-me");
        assert!(f.check_and_insert("sent-by-me"));
    }

    #[test]
    fn test_empty_nonce_never_dup() {
        let f = NonceFilter::new(100, 0.01);
        assert!(!f.check_and_insert(""));
        assert!(!f.check_and_insert(""));
        f.insert("");
        assert!(f.is_empty());
    }

    #[test]
    fn test_rotation_keeps_previous_generation() {
        let f = NonceFilter::new(20, 0.001);
        for i in 0..10 {
            f.insert(&format!("old-{}", i));
        }
        assert_eq!(f.rotations(), 0);

        // triggers rotation; old-* now live in the previous generation
        f.insert("new-0");
        assert_eq!(f.rotations(), 1);
        assert!(f.contains("old-3"));
        assert!(f.contains("new-0"));

        // a second rotation forgets the first batch
        for i in 1..=10 {
            f.insert(&format!("new-{}", i));
        }
        assert_eq!(f.rotations(), 2);
        let remembered = (0..10).filter(|i| f.contains(&format!("old-{}", i))).count();
        assert!(remembered <= 1, "{} old nonces still present", remembered);
    }

    #[test]
    fn test_bloom_sizing() {
        // 500k nonces at 0.1%: ~7.19M bits, 10 hashes
        let bloom = Bloom::new(500_000, 0.001);
        assert_eq!(bloom.bits.len(), Bloom::num_bits(500_000, 0.001));
        assert!((7_100_000..7_300_000).contains(&bloom.bits.len()));
        assert_eq!(bloom.keys.len(), 10);

        let tiny = Bloom::new(0, 0.5);
        assert_eq!(tiny.bits.len(), 64);
        assert_eq!(tiny.keys.len(), 32);
    }

    #[test]
    fn test_generations_share_keys_and_clear() {
        let mut bloom = Bloom::new(100, 0.01);
        bloom.insert("n1");
        assert!(bloom.contains("n1"));
        bloom.clear();
        assert!(!bloom.contains("n1"));
        assert_eq!(bloom.count, 0);
        assert_eq!(bloom.bits.len(), Bloom::num_bits(100, 0.01));
    }

    #[test]
    fn test_false_positive_rate_is_bounded() {
        let f = NonceFilter::new(20_000, 0.001);
        for i in 0..10_000 {
            f.insert(&format!("in-{}", i));
        }
        let fps = (0..10_000)
            .filter(|i| f.contains(&format!("out-{}", i)))
            .count();
        // 0.1% target; allow generous slack
        assert!(fps < 50, "{} false positives", fps);
    }

    #[test]
    fn test_concurrent_same_nonce_single_winner() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let f = Arc::new(NonceFilter::default());
        let fresh = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let f = Arc::clone(&f);
                let fresh = Arc::clone(&fresh);
                std::thread::spawn(move || {
                    if !f.check_and_insert("shared") {
                        fresh.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(fresh.load(Ordering::SeqCst), 1);
    }
}
