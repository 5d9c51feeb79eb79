//! L3 Cache - Remote Shared Tier
//!
//! The remote tier is an external service reached over the network. The
//! cache only assumes three operations on it; there is no prefix scan, so
//! prefix clears never reach this tier.
//!
//! Values cross this boundary as opaque bytes (JSON-encoded by the manager).
//! [`InMemoryRemoteTier`] is a `DashMap`-backed stand-in with real TTL
//! handling and an availability switch for failure injection.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::clock::SharedClock;
use super::entry::{is_expired, ttl_millis};
use crate::error::{Error, Result};

/// Remote storage contract
#[async_trait]
pub trait RemoteTier: Send + Sync {
    /// Fetch a value, `None` if absent
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store a value for `ttl_seconds` (0 = never expires)
    async fn set(&self, key: &str, value: Bytes, ttl_seconds: u64) -> Result<()>;

    /// Remove a value
    async fn delete(&self, key: &str) -> Result<()>;

    /// Get backend statistics
    fn stats(&self) -> RemoteStats {
        RemoteStats::default()
    }
}

/// Remote backend statistics
#[derive(Debug, Clone, Default)]
pub struct RemoteStats {
    /// Objects currently stored
    pub object_count: u64,
    /// Read operations
    pub reads: u64,
    /// Write operations
    pub writes: u64,
    /// Delete operations
    pub deletes: u64,
    /// Calls rejected while unavailable
    pub failures: u64,
}

#[derive(Debug, Clone)]
struct RemoteRecord {
    data: Bytes,
    written_at_ms: i64,
    ttl_ms: u64,
}

/// In-memory remote tier for tests and single-process use
pub struct InMemoryRemoteTier {
    storage: DashMap<String, RemoteRecord>,
    clock: SharedClock,
    available: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    failures: AtomicU64,
}

impl InMemoryRemoteTier {
    /// Create an empty, available remote tier
    pub fn new(clock: SharedClock) -> Self {
        Self {
            storage: DashMap::new(),
            clock,
            available: AtomicBool::new(true),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of stored objects, including not yet reaped expired ones
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Check if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
            Err(Error::RemoteUnavailable("in-memory remote tier is offline".into()))
        }
    }
}

#[async_trait]
impl RemoteTier for InMemoryRemoteTier {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::Relaxed);

        let now = self.clock.now_millis();
        let expired = match self.storage.get(key) {
            Some(record) if !is_expired(record.written_at_ms, record.ttl_ms, now) => {
                return Ok(Some(record.data.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.storage.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl_seconds: u64) -> Result<()> {
        self.check_available()?;
        self.writes.fetch_add(1, Ordering::Relaxed);

        self.storage.insert(
            key.to_string(),
            RemoteRecord {
                data: value,
                written_at_ms: self.clock.now_millis(),
                ttl_ms: ttl_millis(ttl_seconds),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.storage.remove(key);
        Ok(())
    }

    fn stats(&self) -> RemoteStats {
        RemoteStats {
            object_count: self.storage.len() as u64,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
