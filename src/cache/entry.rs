//! Cache Entry Types
//!
//! Entries held by the memory tier, plus the per-call option and batch types
//! shared by the tiers and the manager.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

// =============================================================================
// Cache Level
// =============================================================================

/// Which tier(s) an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheLevel {
    /// In-process memory tier
    L1,
    /// Durable local tier
    L2,
    /// Remote shared tier
    L3,
    /// Every tier, with backfill
    #[default]
    All,
}

impl CacheLevel {
    /// Whether this level includes the memory tier
    #[inline]
    pub fn includes_l1(&self) -> bool {
        matches!(self, CacheLevel::L1 | CacheLevel::All)
    }

    /// Whether this level includes the durable tier
    #[inline]
    pub fn includes_l2(&self) -> bool {
        matches!(self, CacheLevel::L2 | CacheLevel::All)
    }

    /// Whether this level includes the remote tier
    #[inline]
    pub fn includes_l3(&self) -> bool {
        matches!(self, CacheLevel::L3 | CacheLevel::All)
    }

    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CacheLevel::L1 => "l1",
            CacheLevel::L2 => "l2",
            CacheLevel::L3 => "l3",
            CacheLevel::All => "all",
        }
    }
}

impl fmt::Display for CacheLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for CacheLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l1" | "memory" => Ok(CacheLevel::L1),
            "l2" | "durable" => Ok(CacheLevel::L2),
            "l3" | "remote" => Ok(CacheLevel::L3),
            "all" => Ok(CacheLevel::All),
            other => Err(Error::Config(format!("unknown cache level: {}", other))),
        }
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

/// A value held by the memory tier
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The cached value
    pub value: V,
    /// Write timestamp (epoch millis)
    pub written_at_ms: i64,
    /// Time to live in millis (0 = never expires)
    pub ttl_ms: u64,
    /// Estimated footprint
    pub size_bytes: u64,
    /// Access ledger stamp of the latest read or write
    pub access: u64,
}

impl<V> CacheEntry<V> {
    /// Create a new entry
    pub fn new(value: V, written_at_ms: i64, ttl_ms: u64, size_bytes: u64, access: u64) -> Self {
        Self {
            value,
            written_at_ms,
            ttl_ms,
            size_bytes,
            access,
        }
    }

    /// Expiry instant in epoch millis, or `None` if the entry never expires
    #[inline]
    pub fn expires_at_ms(&self) -> Option<i64> {
        expiry_of(self.written_at_ms, self.ttl_ms)
    }

    /// Check if entry has expired at `now_ms`
    #[inline]
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        is_expired(self.written_at_ms, self.ttl_ms, now_ms)
    }
}

/// Expiry instant for a write at `written_at_ms` living `ttl_ms`
#[inline]
pub fn expiry_of(written_at_ms: i64, ttl_ms: u64) -> Option<i64> {
    if ttl_ms == 0 {
        None
    } else {
        Some(written_at_ms.saturating_add(ttl_ms.min(i64::MAX as u64) as i64))
    }
}

/// Shared expiry rule: strictly after `written_at + ttl`; ttl 0 never expires
#[inline]
pub fn is_expired(written_at_ms: i64, ttl_ms: u64, now_ms: i64) -> bool {
    match expiry_of(written_at_ms, ttl_ms) {
        Some(deadline) => now_ms > deadline,
        None => false,
    }
}

/// Seconds to millis, saturating
#[inline]
pub fn ttl_millis(ttl_seconds: u64) -> u64 {
    ttl_seconds.saturating_mul(1000)
}

// =============================================================================
// Options
// =============================================================================

/// Options for read operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// TTL used when backfilling faster tiers; category TTL if unset
    pub ttl_seconds: Option<u64>,
    /// Tier(s) to consult
    pub level: CacheLevel,
    /// Bypass the cache entirely and report absent
    pub force_refresh: bool,
}

impl GetOptions {
    /// Read only the given level
    pub fn level(level: CacheLevel) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }
}

/// Options for write operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOptions {
    /// Explicit TTL; category TTL if unset. 0 means never expires.
    pub ttl_seconds: Option<u64>,
    /// Tier(s) to write
    pub level: CacheLevel,
    /// Write through to the remote tier
    pub sync_to_remote: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            ttl_seconds: None,
            level: CacheLevel::All,
            sync_to_remote: true,
        }
    }
}

impl SetOptions {
    /// Write only the given level
    pub fn level(level: CacheLevel) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Override the TTL
    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }

    /// Skip the remote tier
    pub fn local_only(mut self) -> Self {
        self.sync_to_remote = false;
        self
    }
}

// =============================================================================
// Batches
// =============================================================================

/// One entry of a batch write
#[derive(Debug, Clone)]
pub struct BatchEntry<V> {
    /// Cache key
    pub key: String,
    /// Value to store
    pub value: V,
    /// Per-entry TTL, overriding the batch options
    pub ttl_seconds: Option<u64>,
}

impl<V> BatchEntry<V> {
    /// Entry using the batch TTL
    pub fn new(key: impl Into<String>, value: V) -> Self {
        Self {
            key: key.into(),
            value,
            ttl_seconds: None,
        }
    }

    /// Entry with its own TTL
    pub fn with_ttl(key: impl Into<String>, value: V, ttl_seconds: u64) -> Self {
        Self {
            key: key.into(),
            value,
            ttl_seconds: Some(ttl_seconds),
        }
    }
}

/// Result of a batch read
#[derive(Debug, Clone)]
pub struct BatchGetResult<V> {
    /// Keys that were found, with their values
    pub hits: HashMap<String, V>,
    /// Keys found at no tier, in request order
    pub misses: Vec<String>,
}

impl<V> Default for BatchGetResult<V> {
    fn default() -> Self {
        Self {
            hits: HashMap::new(),
            misses: Vec::new(),
        }
    }
}

impl<V> BatchGetResult<V> {
    /// Fraction of requested keys that were found
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits.len() + self.misses.len();
        if total == 0 {
            0.0
        } else {
            self.hits.len() as f64 / total as f64
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_boundary() {
        let entry = CacheEntry::new("v", 1_000, 500, 2, 1);
        assert_eq!(entry.expires_at_ms(), Some(1_500));
        assert!(!entry.is_expired_at(1_500));
        assert!(entry.is_expired_at(1_501));
    }

    #[test]
    fn test_zero_ttl_never_expires() {
        let entry = CacheEntry::new(1u32, 0, 0, 8, 1);
        assert_eq!(entry.expires_at_ms(), None);
        assert!(!entry.is_expired_at(i64::MAX));
    }

    #[test]
    fn test_level_membership() {
        assert!(CacheLevel::All.includes_l1());
        assert!(CacheLevel::All.includes_l2());
        assert!(CacheLevel::All.includes_l3());
        assert!(CacheLevel::L2.includes_l2());
        assert!(!CacheLevel::L2.includes_l1());
        assert!(!CacheLevel::L1.includes_l3());
        assert_eq!(CacheLevel::default(), CacheLevel::All);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("L1".parse::<CacheLevel>().unwrap(), CacheLevel::L1);
        assert_eq!("durable".parse::<CacheLevel>().unwrap(), CacheLevel::L2);
        assert!("l9".parse::<CacheLevel>().is_err());
    }

    #[test]
    fn test_set_options_defaults() {
        let opts = SetOptions::default();
        assert!(opts.sync_to_remote);
        assert_eq!(opts.level, CacheLevel::All);

        let opts = SetOptions::level(CacheLevel::L1).with_ttl(0).local_only();
        assert_eq!(opts.ttl_seconds, Some(0));
        assert!(!opts.sync_to_remote);
    }

    #[test]
    fn test_batch_hit_ratio() {
        let mut result = BatchGetResult::<u32>::default();
        assert_eq!(result.hit_ratio(), 0.0);
        result.hits.insert("a".into(), 1);
        result.misses.push("b".into());
        assert_eq!(result.hit_ratio(), 0.5);
    }

    #[test]
    fn test_ttl_millis_saturates() {
        assert_eq!(ttl_millis(2), 2_000);
        assert_eq!(ttl_millis(u64::MAX), u64::MAX);
    }
}
