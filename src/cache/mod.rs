//! Three-Tiered Cache
//!
//! Read-through, write-through caching with L1 (memory), L2 (durable) and
//! L3 (remote) tiers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                     TieredCacheManager<V>                                │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  L1 (Memory)          │ L2 (Durable)        │ L3 (Remote)               │
//! │  ┌────────────────┐   │ ┌────────────────┐  │ ┌────────────────────┐    │
//! │  │ LRU map        │   │ │ LMDB store     │  │ │ RemoteTier trait   │    │
//! │  │ byte-bounded   │   │ │ + write index  │  │ │ (get/set/delete)   │    │
//! │  │ default: 50MB  │   │ │ quota: 100MB   │  │ │ 2s deadline        │    │
//! │  └────────────────┘   │ └────────────────┘  │ └────────────────────┘    │
//! │         ▲             │         │           │           │               │
//! │         └──── backfill on hit ──┴───────────┴───────────┘               │
//! │                                                                          │
//! │                   Category TTL policy (key prefix)                       │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Sizes
//!
//! Every tier accounts values by the same estimate (see [`estimate_size`]),
//! so the L1 capacity and the L2 quota are comparable numbers.

mod clock;
mod entry;
mod l1;
mod l2;
mod l3;
mod manager;
mod metrics;
mod policy;
mod size;
pub mod compression;

pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use compression::{CompressionAlgorithm, CompressionConfig, PayloadCodec};
pub use entry::{
    BatchEntry, BatchGetResult, CacheEntry, CacheLevel, GetOptions, SetOptions,
};
pub use l1::{EvictionReport, MemoryConfig, MemoryStats, MemoryTier};
pub use l2::{
    AggregateMetadata, DurableConfig, DurableRecord, DurableTier, QuotaSnapshot, ReclaimReport,
    SweepReport,
};
pub use l3::{InMemoryRemoteTier, RemoteStats, RemoteTier};
pub use manager::TieredCacheManager;
pub use metrics::{CacheMetrics, LatencyTracker, StatsSnapshot, TierHitRates};
pub use policy::{CategoryTtl, TtlPolicy, TtlRule};
pub use size::estimate_size;

/// Default L1 capacity (50MB)
pub const DEFAULT_L1_CAPACITY: u64 = 50 * 1024 * 1024;

/// Default L2 quota (100MB)
pub const DEFAULT_L2_QUOTA: u64 = 100 * 1024 * 1024;

/// Maximum records removed by one L2 reclamation pass
pub const DEFAULT_RECLAIM_BATCH_LIMIT: usize = 50;

/// Default L2 expiry sweep period (1 hour)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Default deadline for a single remote call
pub const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 2000;

/// Default period of the stats snapshot / L1 cleanup task (5 minutes)
pub const DEFAULT_SNAPSHOT_INTERVAL_SECS: u64 = 300;

// =============================================================================
// Tests
// =============================================================================
