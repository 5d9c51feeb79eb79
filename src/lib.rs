//! tiercache - Tiered Cache Manager
//!
//! Serves key→value lookups from the fastest available tier, falling back to
//! slower, larger, more durable tiers on a miss and backfilling the faster
//! tiers on a hit.
//!
//! # Architecture
//!
//! ```text
//! get ──▶ L1 Memory ──miss──▶ L2 Durable ──miss──▶ L3 Remote
//!            ▲                    │  ▲                  │
//!            └──── backfill ──────┘  └──── backfill ────┘
//! ```
//!
//! - L1: in-process, byte-bounded, LRU by access
//! - L2: LMDB store with quota-aware admission, reclamation by write time,
//!   periodic expiry sweep and transactional size/count metadata
//! - L3: any [`RemoteTier`](cache::RemoteTier) implementation
//!
//! # Example
//!
//! ```no_run
//! use tiercache::{CacheConfig, GetOptions, SetOptions, TieredCacheManager};
//!
//! # async fn run() -> tiercache::Result<()> {
//! let cache: TieredCacheManager<String> =
//!     TieredCacheManager::open(&CacheConfig::default()).await?;
//! cache.set("user:42", "alice".to_string(), &SetOptions::default()).await;
//! let name = cache.get("user:42", &GetOptions::default()).await;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Tiers, manager, TTL policy, statistics
//! - [`config`] - YAML configuration
//! - [`error`] - Error types
//! - [`metrics`] - Prometheus exposition

pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use cache::{
    BatchEntry, BatchGetResult, CacheLevel, DurableConfig, DurableTier, GetOptions,
    InMemoryRemoteTier, MemoryConfig, MemoryTier, RemoteTier, SetOptions, StatsSnapshot,
    TieredCacheManager, TtlPolicy,
};
pub use config::CacheConfig;
pub use error::{Error, ErrorKind, Result};
pub use metrics::PrometheusExporter;
