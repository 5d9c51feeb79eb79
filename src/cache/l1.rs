//! L1 Cache - In-Process Memory Tier
//!
//! Bounded map with a byte ceiling and strict least-recently-used eviction.
//!
//! # Design
//!
//! - Every read hit and every write stamps the key with the next value of a
//!   monotonically increasing access ledger. Stamps are unique, so the
//!   `BTreeMap<stamp, key>` order index is a total LRU order with no ties.
//! - Sizes come from [`estimate_size`]; the running total is maintained on
//!   every insert, overwrite, delete and eviction.
//! - The ceiling is advisory for a single item: an item larger than the
//!   ceiling evicts everything else and is still admitted.
//! - One `parking_lot::Mutex` guards the map, the order index and the total so
//!   they always move together. It is never held across an await point.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::clock::SharedClock;
use super::entry::{ttl_millis, CacheEntry};
use super::size::estimate_size;
use super::DEFAULT_L1_CAPACITY;

/// L1 Cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Byte ceiling for the sum of estimated entry sizes
    pub max_size_bytes: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_L1_CAPACITY,
        }
    }
}

/// Outcome of an eviction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Entries removed
    pub evicted: u64,
    /// Estimated bytes released
    pub freed_bytes: u64,
}

struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// access stamp -> key, ascending = least recently used first
    order: BTreeMap<u64, String>,
    total_size: u64,
    ledger: u64,
}

impl<V> Inner<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            total_size: 0,
            ledger: 0,
        }
    }

    #[inline]
    fn next_stamp(&mut self) -> u64 {
        self.ledger += 1;
        self.ledger
    }

    fn touch(&mut self, key: &str) {
        let stamp = self.next_stamp();
        if let Some(entry) = self.entries.get_mut(key) {
            let previous = std::mem::replace(&mut entry.access, stamp);
            self.order.remove(&previous);
            self.order.insert(stamp, key.to_string());
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.access);
        self.total_size = self.total_size.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn evict(&mut self, required: u64) -> EvictionReport {
        let mut report = EvictionReport::default();
        while report.freed_bytes < required {
            let Some((_, key)) = self.order.pop_first() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&key) {
                self.total_size = self.total_size.saturating_sub(entry.size_bytes);
                report.evicted += 1;
                report.freed_bytes += entry.size_bytes;
                trace!(key = %key, size = entry.size_bytes, "L1 evicted");
            }
        }
        report
    }
}

/// L1 Cache - in-process memory tier
pub struct MemoryTier<V> {
    inner: Mutex<Inner<V>>,
    config: MemoryConfig,
    clock: SharedClock,
    /// Entries evicted to make room
    evictions: AtomicU64,
    /// Entries dropped because their TTL elapsed
    expirations: AtomicU64,
}

impl<V: Clone + Serialize> MemoryTier<V> {
    /// Create a memory tier with the default 50 MiB ceiling
    pub fn new(clock: SharedClock) -> Self {
        Self::with_config(MemoryConfig::default(), clock)
    }

    /// Create a memory tier with custom configuration
    pub fn with_config(config: MemoryConfig, clock: SharedClock) -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
            config,
            clock,
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Get a live value, refreshing its recency
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();

        let expired = inner.entries.get(key)?.is_expired_at(now);
        if expired {
            inner.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "L1 entry expired on read");
            return None;
        }

        inner.touch(key);
        inner.entries.get(key).map(|e| e.value.clone())
    }

    /// Insert or overwrite a value, evicting least recently used entries first
    /// if the ceiling would be exceeded
    pub fn set(&self, key: &str, value: V, ttl_seconds: u64) -> EvictionReport {
        let size = estimate_size(&value);
        let now = self.clock.now_millis();
        let ceiling = self.config.max_size_bytes;

        let mut inner = self.inner.lock();
        inner.remove(key);

        let mut report = EvictionReport::default();
        if inner.total_size + size > ceiling {
            let required = inner.total_size + size - ceiling;
            report = inner.evict(required);
            if report.evicted > 0 {
                self.evictions.fetch_add(report.evicted, Ordering::Relaxed);
                debug!(
                    evicted = report.evicted,
                    freed = report.freed_bytes,
                    required,
                    "L1 eviction"
                );
            }
        }

        let stamp = inner.next_stamp();
        let entry = CacheEntry::new(value, now, ttl_millis(ttl_seconds), size, stamp);
        inner.entries.insert(key.to_string(), entry);
        inner.order.insert(stamp, key.to_string());
        inner.total_size += size;

        report
    }

    /// Remove a key; returns whether it was present
    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    /// Evict least recently used entries until `required` bytes are freed or
    /// the tier is empty
    pub fn evict(&self, required: u64) -> EvictionReport {
        let report = self.inner.lock().evict(required);
        self.evictions.fetch_add(report.evicted, Ordering::Relaxed);
        report
    }

    /// Remove every key starting with `prefix`; returns the number of live
    /// entries removed
    pub fn clear_prefix(&self, prefix: &str) -> u64 {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        let keys: Vec<String> = inner
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        let mut live = 0;
        for key in &keys {
            if let Some(entry) = inner.remove(key) {
                if !entry.is_expired_at(now) {
                    live += 1;
                }
            }
        }
        live
    }

    /// Drop every expired entry
    pub fn sweep_expired(&self) -> u64 {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired_at(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        let count = expired.len() as u64;
        self.expirations.fetch_add(count, Ordering::Relaxed);
        count
    }

    /// Check if a live entry exists, without touching recency
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now_millis();
        self.inner
            .lock()
            .entries
            .get(key)
            .is_some_and(|e| !e.is_expired_at(now))
    }

    /// Keys in eviction order, least recently used first
    pub fn lru_order(&self) -> Vec<String> {
        self.inner.lock().order.values().cloned().collect()
    }

    /// Remove everything
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
        inner.total_size = 0;
    }

    /// Get current size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.inner.lock().total_size
    }

    /// Get capacity
    pub fn capacity(&self) -> u64 {
        self.config.max_size_bytes
    }

    /// Get number of entries
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Get eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get utilization (0.0 - 1.0, may exceed 1.0 for an oversized item)
    pub fn utilization(&self) -> f64 {
        if self.config.max_size_bytes == 0 {
            return 0.0;
        }
        self.size_bytes() as f64 / self.config.max_size_bytes as f64
    }

    /// Get cache statistics
    pub fn stats(&self) -> MemoryStats {
        let (entries, size) = {
            let inner = self.inner.lock();
            (inner.entries.len(), inner.total_size)
        };
        MemoryStats {
            entries,
            size_bytes: size,
            capacity: self.config.max_size_bytes,
            evictions: self.evictions(),
            expirations: self.expirations.load(Ordering::Relaxed),
            utilization: if self.config.max_size_bytes == 0 {
                0.0
            } else {
                size as f64 / self.config.max_size_bytes as f64
            },
        }
    }
}

/// L1 cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    /// Number of entries
    pub entries: usize,
    /// Current size in bytes
    pub size_bytes: u64,
    /// Capacity in bytes
    pub capacity: u64,
    /// Eviction count
    pub evictions: u64,
    /// Expired entries dropped
    pub expirations: u64,
    /// Utilization (0.0 - 1.0)
    pub utilization: f64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use std::sync::Arc;
    use std::time::Duration;

    fn make_tier(max_size_bytes: u64) -> (MemoryTier<String>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let tier = MemoryTier::with_config(MemoryConfig { max_size_bytes }, clock.clone());
        (tier, clock)
    }

    /// A string whose estimated size is exactly `bytes` (must be even)
    fn make_value(bytes: usize) -> String {
        "x".repeat(bytes / 2)
    }

    #[test]
    fn test_memory_tier_creation() {
        let tier: MemoryTier<String> = MemoryTier::new(crate::cache::clock::system_clock());
        assert!(tier.is_empty());
        assert_eq!(tier.size_bytes(), 0);
        assert_eq!(tier.capacity(), DEFAULT_L1_CAPACITY);
    }

    #[test]
    fn test_set_get() {
        let (tier, _) = make_tier(1_000);
        tier.set("user:1", "alice".into(), 60);
        assert_eq!(tier.get("user:1"), Some("alice".to_string()));
        assert_eq!(tier.size_bytes(), 10);
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.get("user:2"), None);
    }

    #[test]
    fn test_overwrite_replaces_size() {
        let (tier, _) = make_tier(1_000);
        tier.set("k", make_value(100), 0);
        tier.set("k", make_value(40), 0);
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.size_bytes(), 40);
    }

    #[test]
    fn test_ttl_expiry_removes_entry() {
        let (tier, clock) = make_tier(1_000);
        tier.set("stat:views", make_value(20), 5);

        clock.advance(Duration::from_secs(5));
        assert!(tier.get("stat:views").is_some());

        clock.advance(Duration::from_millis(1));
        assert_eq!(tier.get("stat:views"), None);
        assert_eq!(tier.len(), 0);
        assert_eq!(tier.size_bytes(), 0);
        // No stale reappearance
        assert_eq!(tier.get("stat:views"), None);
    }

    #[test]
    fn test_zero_ttl_never_expires() {
        let (tier, clock) = make_tier(1_000);
        tier.set("k", make_value(10), 0);
        clock.advance(Duration::from_secs(10 * 365 * 24 * 3600));
        assert!(tier.get("k").is_some());
    }

    #[test]
    fn test_lru_eviction_order() {
        let (tier, _) = make_tier(300);
        tier.set("a", make_value(100), 0);
        tier.set("b", make_value(100), 0);
        tier.set("c", make_value(100), 0);

        // Touch a so b becomes least recently used
        assert!(tier.get("a").is_some());

        tier.set("d", make_value(100), 0);
        assert!(!tier.contains("b"));
        assert!(tier.contains("a"));
        assert!(tier.contains("c"));
        assert!(tier.contains("d"));
        assert_eq!(tier.size_bytes(), 300);
        assert_eq!(tier.evictions(), 1);
        assert_eq!(tier.lru_order(), vec!["c", "a", "d"]);
    }

    #[test]
    fn test_oversized_item_admitted_alone() {
        let (tier, _) = make_tier(100);
        tier.set("a", make_value(50), 0);
        tier.set("b", make_value(40), 0);

        let report = tier.set("big", make_value(500), 0);
        assert_eq!(report.evicted, 2);
        assert_eq!(tier.len(), 1);
        assert!(tier.contains("big"));
        assert_eq!(tier.size_bytes(), 500);
    }

    #[test]
    fn test_evict_frees_required_bytes() {
        let (tier, _) = make_tier(10_000);
        for i in 0..10 {
            tier.set(&format!("k{}", i), make_value(100), 0);
        }
        let report = tier.evict(250);
        assert_eq!(report.evicted, 3);
        assert_eq!(report.freed_bytes, 300);
        assert!(!tier.contains("k0"));
        assert!(!tier.contains("k2"));
        assert!(tier.contains("k3"));

        let report = tier.evict(u64::MAX);
        assert_eq!(report.evicted, 7);
        assert!(tier.is_empty());
    }

    #[test]
    fn test_delete() {
        let (tier, _) = make_tier(1_000);
        tier.set("k", make_value(10), 0);
        assert!(tier.delete("k"));
        assert!(!tier.delete("k"));
        assert_eq!(tier.size_bytes(), 0);
    }

    #[test]
    fn test_clear_prefix_idempotent() {
        let (tier, _) = make_tier(10_000);
        tier.set("user:1", make_value(10), 0);
        tier.set("user:2", make_value(10), 0);
        tier.set("static:1", make_value(10), 0);

        assert_eq!(tier.clear_prefix("user:"), 2);
        assert_eq!(tier.clear_prefix("user:"), 0);
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.size_bytes(), 10);
    }

    #[test]
    fn test_clear_prefix_counts_live_only() {
        let (tier, clock) = make_tier(10_000);
        tier.set("user:1", make_value(10), 1);
        tier.set("user:2", make_value(10), 0);
        clock.advance(Duration::from_secs(2));

        assert_eq!(tier.clear_prefix("user:"), 1);
        assert_eq!(tier.len(), 0);
        assert_eq!(tier.size_bytes(), 0);
    }

    #[test]
    fn test_sweep_expired() {
        let (tier, clock) = make_tier(10_000);
        tier.set("short", make_value(10), 1);
        tier.set("long", make_value(10), 100);
        clock.advance(Duration::from_secs(2));

        assert_eq!(tier.sweep_expired(), 1);
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.stats().expirations, 1);
    }

    #[test]
    fn test_stats() {
        let (tier, _) = make_tier(1_000);
        tier.set("k", make_value(500), 0);
        let stats = tier.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.size_bytes, 500);
        assert_eq!(stats.capacity, 1_000);
        assert!((stats.utilization - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        let (tier, _) = make_tier(u64::MAX / 2);
        let tier = Arc::new(tier);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let tier = Arc::clone(&tier);
                thread::spawn(move || {
                    for i in 0..500 {
                        let key = format!("obj-{}-{}", t, i);
                        tier.set(&key, make_value(64), 0);
                        tier.get(&key);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tier.len(), 4_000);
        assert_eq!(tier.size_bytes(), 4_000 * 64);
    }
}
