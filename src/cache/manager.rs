//! Cache Manager - Unified Three-Tier Cache
//!
//! Routes reads through L1 (memory) → L2 (durable) → L3 (remote), backfills
//! the faster tiers on a lower-tier hit, writes every requested tier, and
//! applies the category TTL policy.
//!
//! The manager never returns an error to callers. Tier failures are logged,
//! counted in `stats().errors` and degrade to a miss (reads) or a partial
//! write (writes).

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::clock::{system_clock, SharedClock};
use super::entry::{BatchEntry, BatchGetResult, CacheLevel, GetOptions, SetOptions};
use super::l1::MemoryTier;
use super::l2::{DurableConfig, DurableTier, QuotaSnapshot};
use super::l3::RemoteTier;
use super::metrics::{CacheMetrics, LatencyTracker, StatsSnapshot};
use super::policy::{CategoryTtl, TtlPolicy};
use crate::config::CacheConfig;
use crate::error::{Error, Result};

/// Unified cache manager
pub struct TieredCacheManager<V> {
    /// L1 (memory) tier
    l1: MemoryTier<V>,
    /// L2 (durable) tier, absent until initialized
    l2: OnceCell<DurableTier>,
    /// L3 (remote) tier, if configured
    l3: Option<Arc<dyn RemoteTier>>,
    /// Category TTL table
    policy: TtlPolicy,
    /// Deadline for each remote call
    remote_timeout: Duration,
    /// Period of the snapshot/cleanup task
    snapshot_interval: Duration,
    clock: SharedClock,
    /// Metrics collector
    metrics: Arc<CacheMetrics>,
    /// Background tasks
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    background_started: AtomicBool,
    sweeper_started: AtomicBool,
}

impl<V> TieredCacheManager<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Create a manager with the system clock. The durable tier is not
    /// opened; see [`open`](Self::open) and [`init_durable`](Self::init_durable).
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Create a manager driven by `clock`
    pub fn with_clock(config: &CacheConfig, clock: SharedClock) -> Self {
        Self {
            l1: MemoryTier::with_config(config.memory.clone(), Arc::clone(&clock)),
            l2: OnceCell::new(),
            l3: None,
            policy: config.ttl_policy.clone(),
            remote_timeout: config.remote_timeout(),
            snapshot_interval: config.snapshot_interval(),
            clock,
            metrics: Arc::new(CacheMetrics::new()),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            background_started: AtomicBool::new(false),
            sweeper_started: AtomicBool::new(false),
        }
    }

    /// Attach a remote tier
    pub fn with_remote(mut self, remote: Arc<dyn RemoteTier>) -> Self {
        self.l3 = Some(remote);
        self
    }

    /// Create a manager and open the durable tier if one is configured
    pub async fn open(config: &CacheConfig) -> Result<Self> {
        Self::open_with_clock(config, system_clock()).await
    }

    /// [`open`](Self::open) driven by `clock`
    pub async fn open_with_clock(config: &CacheConfig, clock: SharedClock) -> Result<Self> {
        config.validate()?;
        let manager = Self::with_clock(config, clock);
        if let Some(durable) = &config.durable {
            manager.init_durable(durable.clone()).await?;
        }
        Ok(manager)
    }

    /// Open the durable tier. Later calls return the already open tier.
    pub async fn init_durable(&self, config: DurableConfig) -> Result<&DurableTier> {
        let clock = Arc::clone(&self.clock);
        let tier = self
            .l2
            .get_or_try_init(|| DurableTier::open(config, clock))
            .await?;

        if self.background_started.load(Ordering::SeqCst) {
            self.start_sweeper(tier);
        }
        Ok(tier)
    }

    /// Spawn the durable sweeper, at most once per manager
    fn start_sweeper(&self, tier: &DurableTier) {
        if self.sweeper_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let handle = tier.spawn_sweeper(self.shutdown.child_token());
        self.tasks.lock().push(handle);
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Look a key up, fastest tier first
    #[instrument(level = "debug", skip(self, options), fields(level = %options.level))]
    pub async fn get(&self, key: &str, options: &GetOptions) -> Option<V> {
        if options.force_refresh {
            return None;
        }
        let tracker = LatencyTracker::start();
        let value = self.lookup(key, options).await;
        self.metrics.record_get_latency(tracker.elapsed());
        value
    }

    async fn lookup(&self, key: &str, options: &GetOptions) -> Option<V> {
        let level = options.level;

        if level.includes_l1() {
            if let Some(value) = self.l1.get(key) {
                self.metrics.record_l1_hit();
                return Some(value);
            }
        }

        if level.includes_l2() {
            if let Some(l2) = self.l2.get() {
                match l2.get::<V>(key).await {
                    Ok(Some(value)) => {
                        self.metrics.record_l2_hit();
                        if level == CacheLevel::All {
                            if let Some(ttl) = self.backfill_ttl(key, options) {
                                self.l1.set(key, value.clone(), ttl);
                                self.metrics.record_backfill_l2_to_l1();
                            }
                        }
                        return Some(value);
                    }
                    Ok(None) => {}
                    Err(e) => self.record_failure(CacheLevel::L2, "get", key, &e),
                }
            }
        }

        if level.includes_l3() {
            if let Some(remote) = &self.l3 {
                match self.remote_get(remote.as_ref(), key).await {
                    Ok(Some(value)) => {
                        self.metrics.record_l3_hit();
                        if level == CacheLevel::All {
                            self.backfill_local(key, &value, options).await;
                        }
                        return Some(value);
                    }
                    Ok(None) => {}
                    Err(e) => self.record_failure(CacheLevel::L3, "get", key, &e),
                }
            }
        }

        self.metrics.record_miss();
        None
    }

    /// Look many keys up; a key resolved at one tier is not asked of slower ones
    #[instrument(level = "debug", skip(self, keys, options), fields(count = keys.len()))]
    pub async fn get_batch(&self, keys: &[String], options: &GetOptions) -> BatchGetResult<V> {
        let mut result = BatchGetResult::default();
        let mut seen = HashSet::with_capacity(keys.len());
        let mut pending: Vec<String> = keys
            .iter()
            .filter(|k| seen.insert(k.as_str()))
            .cloned()
            .collect();

        if options.force_refresh {
            result.misses = pending;
            return result;
        }

        let level = options.level;
        let tracker = LatencyTracker::start();

        if level.includes_l1() {
            pending.retain(|key| match self.l1.get(key) {
                Some(value) => {
                    self.metrics.record_l1_hit();
                    result.hits.insert(key.clone(), value);
                    false
                }
                None => true,
            });
        }

        if level.includes_l2() && !pending.is_empty() {
            if let Some(l2) = self.l2.get() {
                match l2.get_batch::<V>(&pending).await {
                    Ok(found) => {
                        for (key, value) in found {
                            self.metrics.record_l2_hit();
                            if level == CacheLevel::All {
                                if let Some(ttl) = self.backfill_ttl(&key, options) {
                                    self.l1.set(&key, value.clone(), ttl);
                                    self.metrics.record_backfill_l2_to_l1();
                                }
                            }
                            result.hits.insert(key, value);
                        }
                        pending.retain(|key| !result.hits.contains_key(key));
                    }
                    Err(e) => self.record_failure(CacheLevel::L2, "get_batch", "*", &e),
                }
            }
        }

        if level.includes_l3() && !pending.is_empty() {
            if let Some(remote) = &self.l3 {
                let lookups = pending
                    .iter()
                    .map(|key| self.remote_get(remote.as_ref(), key));
                let outcomes = join_all(lookups).await;

                let mut backfill = Vec::new();
                for (key, outcome) in pending.iter().zip(outcomes) {
                    match outcome {
                        Ok(Some(value)) => {
                            self.metrics.record_l3_hit();
                            if level == CacheLevel::All {
                                if let Some(ttl) = self.backfill_ttl(key, options) {
                                    self.l1.set(key, value.clone(), ttl);
                                    backfill.push((key.clone(), value.clone(), ttl));
                                }
                            }
                            result.hits.insert(key.clone(), value);
                        }
                        Ok(None) => {}
                        Err(e) => self.record_failure(CacheLevel::L3, "get", key, &e),
                    }
                }

                if !backfill.is_empty() {
                    if let Some(l2) = self.l2.get() {
                        if let Err(e) = l2.set_batch(backfill.as_slice()).await {
                            self.record_failure(CacheLevel::L2, "backfill", "*", &e);
                        }
                    }
                    for _ in &backfill {
                        self.metrics.record_backfill_l3_to_local();
                    }
                }
                pending.retain(|key| !result.hits.contains_key(key));
            }
        }

        for _ in &pending {
            self.metrics.record_miss();
        }
        result.misses = pending;
        self.metrics.record_get_latency(tracker.elapsed());
        result
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store a value in every requested tier. Returns `false` when nothing
    /// was written: the key's category is never cached, no tier was
    /// available, or every attempted tier failed.
    #[instrument(level = "debug", skip(self, value, options), fields(level = %options.level))]
    pub async fn set(&self, key: &str, value: V, options: &SetOptions) -> bool {
        let ttl = match self.policy.resolve(key, options.ttl_seconds) {
            CategoryTtl::Expire(ttl) => ttl,
            CategoryTtl::NoCache => {
                debug!(key, "Key category is never cached");
                self.metrics.record_set(false);
                return false;
            }
        };

        let tracker = LatencyTracker::start();
        let level = options.level;
        let mut outcome = WriteOutcome::default();

        if level.includes_l1() {
            self.l1.set(key, value.clone(), ttl);
            outcome.success();
        }

        let durable = async {
            match self.l2.get() {
                Some(l2) if level.includes_l2() => Some(l2.set(key, &value, ttl).await),
                _ => None,
            }
        };
        let remote = async {
            match &self.l3 {
                Some(remote) if level.includes_l3() && options.sync_to_remote => {
                    Some(self.remote_set(remote.as_ref(), key, &value, ttl).await)
                }
                _ => None,
            }
        };
        let (durable, remote) = tokio::join!(durable, remote);

        for (tier, result) in [(CacheLevel::L2, durable), (CacheLevel::L3, remote)] {
            match result {
                Some(Ok(())) => outcome.success(),
                Some(Err(e)) => {
                    outcome.failure();
                    self.record_failure(tier, "set", key, &e);
                }
                None => {}
            }
        }

        let stored = outcome.any_succeeded();
        self.metrics.record_set(stored);
        self.metrics.record_set_latency(tracker.elapsed());
        stored
    }

    /// Store many values. Each entry may carry its own TTL; entries whose
    /// category is never cached are skipped. The durable tier writes the
    /// whole batch in one transaction.
    #[instrument(level = "debug", skip(self, entries, options), fields(count = entries.len()))]
    pub async fn set_batch(&self, entries: Vec<BatchEntry<V>>, options: &SetOptions) -> bool {
        let resolved: Vec<(String, V, u64)> = entries
            .into_iter()
            .filter_map(|entry| {
                let explicit = entry.ttl_seconds.or(options.ttl_seconds);
                match self.policy.resolve(&entry.key, explicit) {
                    CategoryTtl::Expire(ttl) => Some((entry.key, entry.value, ttl)),
                    CategoryTtl::NoCache => {
                        debug!(key = %entry.key, "Key category is never cached");
                        None
                    }
                }
            })
            .collect();
        if resolved.is_empty() {
            return false;
        }

        let tracker = LatencyTracker::start();
        let level = options.level;
        let mut outcome = WriteOutcome::default();

        if level.includes_l1() {
            for (key, value, ttl) in &resolved {
                self.l1.set(key, value.clone(), *ttl);
            }
            outcome.success();
        }

        let durable = async {
            match self.l2.get() {
                Some(l2) if level.includes_l2() => Some(l2.set_batch(resolved.as_slice()).await),
                _ => None,
            }
        };
        let remote = async {
            match &self.l3 {
                Some(remote) if level.includes_l3() && options.sync_to_remote => {
                    let writes = resolved
                        .iter()
                        .map(|(key, value, ttl)| self.remote_set(remote.as_ref(), key, value, *ttl));
                    Some(join_all(writes).await)
                }
                _ => None,
            }
        };
        let (durable, remote) = tokio::join!(durable, remote);

        match durable {
            Some(Ok(())) => outcome.success(),
            Some(Err(e)) => {
                outcome.failure();
                self.record_failure(CacheLevel::L2, "set_batch", "*", &e);
            }
            None => {}
        }
        if let Some(results) = remote {
            let mut all_ok = true;
            for ((key, _, _), result) in resolved.iter().zip(results) {
                if let Err(e) = result {
                    all_ok = false;
                    self.record_failure(CacheLevel::L3, "set", key, &e);
                }
            }
            if all_ok {
                outcome.success();
            } else {
                outcome.failure();
            }
        }

        let stored = outcome.any_succeeded();
        self.metrics.record_set(stored);
        self.metrics.record_set_latency(tracker.elapsed());
        stored
    }

    /// Remove a key from the requested tiers. Returns `false` only when no
    /// tier was attempted or every attempted tier failed.
    #[instrument(level = "debug", skip(self))]
    pub async fn delete(&self, key: &str, level: CacheLevel) -> bool {
        let mut outcome = WriteOutcome::default();

        if level.includes_l1() {
            self.l1.delete(key);
            outcome.success();
        }

        let durable = async {
            match self.l2.get() {
                Some(l2) if level.includes_l2() => Some(l2.delete(key).await.map(|_| ())),
                _ => None,
            }
        };
        let remote = async {
            match &self.l3 {
                Some(remote) if level.includes_l3() => {
                    Some(self.with_deadline(key, remote.delete(key)).await)
                }
                _ => None,
            }
        };
        let (durable, remote) = tokio::join!(durable, remote);

        for (tier, result) in [(CacheLevel::L2, durable), (CacheLevel::L3, remote)] {
            match result {
                Some(Ok(())) => outcome.success(),
                Some(Err(e)) => {
                    outcome.failure();
                    self.record_failure(tier, "delete", key, &e);
                }
                None => {}
            }
        }
        outcome.any_succeeded()
    }

    /// Remove every key starting with `prefix` from the local tiers. The
    /// remote tier has no prefix scan and is left untouched. Returns the
    /// number of entries removed across both local tiers.
    #[instrument(level = "debug", skip(self))]
    pub async fn clear_by_prefix(&self, prefix: &str) -> u64 {
        let mut removed = self.l1.clear_prefix(prefix);
        if let Some(l2) = self.l2.get() {
            match l2.delete_by_prefix(prefix).await {
                Ok(count) => removed += count,
                Err(e) => self.record_failure(CacheLevel::L2, "clear_by_prefix", prefix, &e),
            }
        }
        info!(prefix, removed, "Cleared cache prefix");
        removed
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Current statistics
    pub fn stats(&self) -> StatsSnapshot {
        self.refresh_l1_gauges();
        self.metrics.snapshot()
    }

    /// Statistics with fresh durable-tier gauges
    pub async fn refresh_stats(&self) -> StatsSnapshot {
        self.refresh_l1_gauges();
        if let Some(l2) = self.l2.get() {
            match l2.metadata().await {
                Ok(meta) => self
                    .metrics
                    .update_l2_stats(meta.total_size_bytes, meta.item_count),
                Err(e) => self.record_failure(CacheLevel::L2, "metadata", "*", &e),
            }
        }
        self.metrics.snapshot()
    }

    /// Zero all counters
    pub fn reset_stats(&self) {
        self.metrics.reset();
    }

    /// Durable tier quota usage, if the durable tier is open
    pub async fn quota(&self) -> Option<QuotaSnapshot> {
        let l2 = self.l2.get()?;
        match l2.quota().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                self.record_failure(CacheLevel::L2, "quota", "*", &e);
                None
            }
        }
    }

    fn refresh_l1_gauges(&self) {
        let l1 = self.l1.stats();
        self.metrics
            .update_l1_stats(l1.size_bytes, l1.entries as u64, l1.evictions);
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Get reference to the memory tier
    pub fn memory(&self) -> &MemoryTier<V> {
        &self.l1
    }

    /// Get the durable tier, if initialized
    pub fn durable(&self) -> Option<&DurableTier> {
        self.l2.get()
    }

    /// Get the remote tier, if configured
    pub fn remote(&self) -> Option<&Arc<dyn RemoteTier>> {
        self.l3.as_ref()
    }

    /// Get the TTL policy
    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    /// Shared metrics collector
    pub fn metrics(&self) -> Arc<CacheMetrics> {
        Arc::clone(&self.metrics)
    }

    // =========================================================================
    // Background Tasks
    // =========================================================================

    /// Start the durable sweeper and the periodic snapshot/cleanup task.
    /// Calling it again has no effect.
    pub fn start_background(self: &Arc<Self>) {
        if self.background_started.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(l2) = self.l2.get() {
            self.start_sweeper(l2);
        }

        let weak = Arc::downgrade(self);
        let token = self.shutdown.child_token();
        let period = self.snapshot_interval;
        self.tasks
            .lock()
            .push(tokio::spawn(maintenance_loop(weak, token, period)));
        info!(interval = ?period, "Cache background tasks started");
    }

    /// Stop background tasks and wait for them to finish
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Cache background task ended abnormally: {}", e);
            }
        }
        info!("Cache manager shut down");
    }

    /// Drop expired memory entries and refresh gauges
    pub async fn run_maintenance(&self) -> StatsSnapshot {
        let expired = self.l1.sweep_expired();
        let snapshot = self.refresh_stats().await;
        debug!(
            expired,
            l1_entries = snapshot.l1_entries,
            l2_entries = snapshot.l2_entries,
            hit_rate = snapshot.hit_rate_by_tier.overall,
            "Cache snapshot"
        );
        snapshot
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn backfill_ttl(&self, key: &str, options: &GetOptions) -> Option<u64> {
        self.policy.resolve(key, options.ttl_seconds).seconds()
    }

    async fn backfill_local(&self, key: &str, value: &V, options: &GetOptions) {
        let Some(ttl) = self.backfill_ttl(key, options) else {
            return;
        };
        self.l1.set(key, value.clone(), ttl);
        if let Some(l2) = self.l2.get() {
            if let Err(e) = l2.set(key, value, ttl).await {
                self.record_failure(CacheLevel::L2, "backfill", key, &e);
            }
        }
        self.metrics.record_backfill_l3_to_local();
    }

    async fn with_deadline<T, F>(&self, key: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.remote_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::RemoteTimeout {
                key: key.to_string(),
                timeout_ms: self.remote_timeout.as_millis() as u64,
            }),
        }
    }

    async fn remote_get(&self, remote: &dyn RemoteTier, key: &str) -> Result<Option<V>> {
        match self.with_deadline(key, remote.get(key)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn remote_set(&self, remote: &dyn RemoteTier, key: &str, value: &V, ttl: u64) -> Result<()> {
        let payload = Bytes::from(serde_json::to_vec(value)?);
        self.with_deadline(key, remote.set(key, payload, ttl)).await
    }

    fn record_failure(&self, tier: CacheLevel, op: &str, key: &str, error: &Error) {
        self.metrics.record_error();
        warn!(
            tier = %tier,
            op,
            key,
            kind = ?error.kind(),
            "Cache tier operation failed: {}",
            error
        );
    }
}

impl<V> Drop for TieredCacheManager<V> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn maintenance_loop<V>(manager: Weak<TieredCacheManager<V>>, token: CancellationToken, period: Duration)
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    let mut tick = tokio::time::interval(period);
    // The first tick completes immediately
    tick.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("Cache maintenance task shutting down");
                break;
            }
            _ = tick.tick() => {
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.run_maintenance().await;
            }
        }
    }
}

/// Tally of tier write attempts
#[derive(Debug, Default)]
struct WriteOutcome {
    attempted: u32,
    succeeded: u32,
}

impl WriteOutcome {
    fn success(&mut self) {
        self.attempted += 1;
        self.succeeded += 1;
    }

    fn failure(&mut self) {
        self.attempted += 1;
    }

    fn any_succeeded(&self) -> bool {
        self.attempted > 0 && self.succeeded > 0
    }
}

// =============================================================================
// Tests
// =============================================================================
