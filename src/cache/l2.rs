//! L2 Cache - Durable Local Tier
//!
//! Quota-bounded key-value store on LMDB (via `heed`).
//!
//! # Layout
//!
//! - `cache`: key -> `[written_at:8][ttl_ms:8][size:8][flags:1]` header
//!   (little-endian) followed by the JSON payload, LZ4-compressed when that
//!   makes it smaller
//! - `write_index`: `written_at (big-endian) ++ key` -> `()`, so reclamation
//!   walks records oldest write first
//! - `metadata`: singleton [`AggregateMetadata`] under `aggregate`
//!
//! # Invariant
//!
//! `metadata.total_size_bytes` and `metadata.item_count` equal the sum and
//! count of every record in `cache`. Each record mutation, its index row and
//! the matching metadata update are committed in one write transaction.
//!
//! # Design
//!
//! - Sizes are the estimator's, not the stored length, so quota accounting
//!   matches the memory tier
//! - Writes that push the total above `quota * cleanup_threshold` reclaim in
//!   the same transaction: expired records first, then oldest live records,
//!   at most `reclaim_batch_limit` per pass
//! - Writes that would still exceed the hard quota are rejected
//! - All engine calls run on the blocking pool

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use heed::types::{Bytes, Str, Unit};
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::clock::SharedClock;
use super::compression::{CompressionAlgorithm, CompressionConfig, PayloadCodec};
use super::entry::{is_expired, ttl_millis};
use super::size::estimate_size;
use super::{DEFAULT_L2_QUOTA, DEFAULT_RECLAIM_BATCH_LIMIT, DEFAULT_SWEEP_INTERVAL_SECS};
use crate::error::{Error, Result};

const RECORDS_DB: &str = "cache";
const INDEX_DB: &str = "write_index";
const META_DB: &str = "metadata";
const META_KEY: &str = "aggregate";

/// Smallest LMDB map we open
const MIN_MAP_SIZE: u64 = 16 * 1024 * 1024;
/// Map sizes are rounded up to this
const MAP_ALIGN: u64 = 1024 * 1024;

// =============================================================================
// Configuration
// =============================================================================

/// L2 Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurableConfig {
    /// Store directory
    pub path: PathBuf,
    /// Hard quota on the sum of estimated record sizes
    pub quota_bytes: u64,
    /// Fraction of the quota above which writes reclaim first
    pub cleanup_threshold: f64,
    /// Maximum records removed by one reclamation pass
    pub reclaim_batch_limit: usize,
    /// Period of the background expiry sweep
    pub sweep_interval_secs: u64,
    /// Payload compression
    pub compression: CompressionConfig,
}

impl Default for DurableConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/tiercache"),
            quota_bytes: DEFAULT_L2_QUOTA,
            cleanup_threshold: 0.9,
            reclaim_batch_limit: DEFAULT_RECLAIM_BATCH_LIMIT,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            compression: CompressionConfig::default(),
        }
    }
}

impl DurableConfig {
    /// Default configuration rooted at `path`
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Total size above which writes reclaim first
    pub fn soft_limit(&self) -> u64 {
        (self.quota_bytes as f64 * self.cleanup_threshold) as u64
    }

    /// Sweep period
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// LMDB map size: twice the quota, at least [`MIN_MAP_SIZE`], MiB aligned
    pub fn map_size(&self) -> usize {
        let wanted = self.quota_bytes.saturating_mul(2).max(MIN_MAP_SIZE);
        let aligned = wanted.div_ceil(MAP_ALIGN).saturating_mul(MAP_ALIGN);
        usize::try_from(aligned).unwrap_or(usize::MAX)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.quota_bytes == 0 {
            return Err(Error::Config("durable.quota_bytes must be positive".into()));
        }
        if !(self.cleanup_threshold > 0.0 && self.cleanup_threshold <= 1.0) {
            return Err(Error::Config(format!(
                "durable.cleanup_threshold must be in (0, 1], got {}",
                self.cleanup_threshold
            )));
        }
        if self.reclaim_batch_limit == 0 {
            return Err(Error::Config(
                "durable.reclaim_batch_limit must be positive".into(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(Error::Config(
                "durable.sweep_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Records and Reports
// =============================================================================

/// Header of a stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurableRecord {
    /// Write timestamp (epoch millis)
    pub written_at_ms: i64,
    /// Time to live in millis (0 = never expires)
    pub ttl_ms: u64,
    /// Estimated size of the value
    pub size_bytes: u64,
    /// Payload encoding
    pub compression: CompressionAlgorithm,
}

impl DurableRecord {
    /// Encoded header length
    pub const HEADER_LEN: usize = 25;

    /// Check if record has expired at `now_ms`
    #[inline]
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        is_expired(self.written_at_ms, self.ttl_ms, now_ms)
    }

    fn encode(&self, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::HEADER_LEN + payload.len());
        buf.extend_from_slice(&self.written_at_ms.to_le_bytes());
        buf.extend_from_slice(&self.ttl_ms.to_le_bytes());
        buf.extend_from_slice(&self.size_bytes.to_le_bytes());
        buf.push(self.compression.flag());
        buf.extend_from_slice(payload);
        buf
    }

    fn decode<'a>(key: &str, raw: &'a [u8]) -> Result<(Self, &'a [u8])> {
        if raw.len() < Self::HEADER_LEN {
            return Err(Error::Corrupt {
                key: key.to_string(),
                reason: format!("record is {} bytes, header needs {}", raw.len(), Self::HEADER_LEN),
            });
        }
        let word = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&raw[at..at + 8]);
            b
        };
        let compression =
            CompressionAlgorithm::from_flag(raw[24]).ok_or_else(|| Error::Corrupt {
                key: key.to_string(),
                reason: format!("unknown compression flag {}", raw[24]),
            })?;
        let header = Self {
            written_at_ms: i64::from_le_bytes(word(0)),
            ttl_ms: u64::from_le_bytes(word(8)),
            size_bytes: u64::from_le_bytes(word(16)),
            compression,
        };
        Ok((header, &raw[Self::HEADER_LEN..]))
    }
}

/// Aggregate accounting for the whole store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateMetadata {
    /// Sum of record sizes
    pub total_size_bytes: u64,
    /// Number of records
    pub item_count: u64,
    /// Last completed sweep (epoch millis, 0 = never)
    pub last_cleanup_at_ms: i64,
}

impl AggregateMetadata {
    fn add(&mut self, size: u64) {
        self.total_size_bytes = self.total_size_bytes.saturating_add(size);
        self.item_count += 1;
    }

    fn remove(&mut self, size: u64) {
        self.total_size_bytes = self.total_size_bytes.saturating_sub(size);
        self.item_count = self.item_count.saturating_sub(1);
    }
}

/// Outcome of a reclamation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    /// Expired records removed
    pub expired_removed: u64,
    /// Live records removed, oldest write first
    pub live_removed: u64,
    /// Bytes released
    pub freed_bytes: u64,
}

impl ReclaimReport {
    /// Total records removed
    pub fn removed(&self) -> u64 {
        self.expired_removed + self.live_removed
    }
}

/// Outcome of an expiry sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Expired records removed
    pub expired_removed: u64,
    /// Bytes released
    pub freed_bytes: u64,
    /// Records remaining
    pub item_count: u64,
    /// Bytes remaining
    pub total_size_bytes: u64,
    /// Whether the stored metadata disagreed with the recount
    pub drift_corrected: bool,
}

/// Storage quota introspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaSnapshot {
    /// Estimated bytes in use
    pub used_bytes: u64,
    /// Configured quota
    pub quota_bytes: u64,
    /// Records stored
    pub item_count: u64,
    /// On-disk size reported by LMDB, if available
    pub disk_bytes: Option<u64>,
    /// Where the numbers come from
    pub source: String,
}

impl QuotaSnapshot {
    /// Bytes left under the quota
    pub fn available_bytes(&self) -> u64 {
        self.quota_bytes.saturating_sub(self.used_bytes)
    }

    /// Fraction of the quota in use
    pub fn usage_ratio(&self) -> f64 {
        if self.quota_bytes == 0 {
            0.0
        } else {
            self.used_bytes as f64 / self.quota_bytes as f64
        }
    }
}

#[inline]
fn index_key(written_at_ms: i64, key: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + key.len());
    buf.extend_from_slice(&(written_at_ms.max(0) as u64).to_be_bytes());
    buf.extend_from_slice(key.as_bytes());
    buf
}

#[inline]
fn index_entry_key(raw: &[u8]) -> Option<&str> {
    raw.get(8..).and_then(|k| std::str::from_utf8(k).ok())
}

// =============================================================================
// Engine
// =============================================================================

/// A serialized value ready to be written
struct Prepared {
    key: String,
    payload: Vec<u8>,
    size: u64,
    ttl_ms: u64,
}

struct Inner {
    env: Env,
    records: Database<Str, Bytes>,
    index: Database<Bytes, Unit>,
    meta: Database<Str, Bytes>,
    config: DurableConfig,
    codec: PayloadCodec,
    clock: SharedClock,
    /// Record writes allowed before `write` fails; `usize::MAX` is unlimited
    #[cfg(test)]
    write_budget: std::sync::atomic::AtomicUsize,
}

impl Inner {
    fn open(config: DurableConfig, clock: SharedClock) -> Result<Self> {
        std::fs::create_dir_all(&config.path)?;

        // SAFETY: the environment is opened once per tier and the directory
        // is owned by this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(config.map_size())
                .max_dbs(3)
                .open(&config.path)?
        };

        let mut wtxn = env.write_txn()?;
        let records: Database<Str, Bytes> = env.create_database(&mut wtxn, Some(RECORDS_DB))?;
        let index: Database<Bytes, Unit> = env.create_database(&mut wtxn, Some(INDEX_DB))?;
        let meta: Database<Str, Bytes> = env.create_database(&mut wtxn, Some(META_DB))?;
        wtxn.commit()?;

        let inner = Self {
            env,
            records,
            index,
            meta,
            codec: PayloadCodec::new(config.compression.clone()),
            config,
            clock,
            #[cfg(test)]
            write_budget: std::sync::atomic::AtomicUsize::new(usize::MAX),
        };

        let mut wtxn = inner.env.write_txn()?;
        if inner.meta.get(&wtxn, META_KEY)?.is_none() {
            inner.store_meta(&mut wtxn, &AggregateMetadata::default())?;
        }
        wtxn.commit()?;

        Ok(inner)
    }

    fn header(&self, txn: &RoTxn, key: &str) -> Result<Option<DurableRecord>> {
        match self.records.get(txn, key)? {
            Some(raw) => Ok(Some(DurableRecord::decode(key, raw)?.0)),
            None => Ok(None),
        }
    }

    fn load_meta(&self, txn: &RoTxn) -> Result<AggregateMetadata> {
        match self.meta.get(txn, META_KEY)? {
            Some(raw) => Ok(serde_json::from_slice(raw)?),
            None => Ok(AggregateMetadata::default()),
        }
    }

    fn store_meta(&self, wtxn: &mut RwTxn, meta: &AggregateMetadata) -> Result<()> {
        let raw = serde_json::to_vec(meta)?;
        self.meta.put(wtxn, META_KEY, &raw)?;
        Ok(())
    }

    fn write(&self, wtxn: &mut RwTxn, key: &str, header: &DurableRecord, payload: &[u8]) -> Result<()> {
        #[cfg(test)]
        {
            use std::sync::atomic::Ordering;
            let spent = self
                .write_budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                    0 => None,
                    usize::MAX => Some(usize::MAX),
                    n => Some(n - 1),
                });
            if spent.is_err() {
                return Err(Error::Internal(format!("write to {} refused", key)));
            }
        }
        self.records.put(wtxn, key, &header.encode(payload))?;
        self.index.put(wtxn, &index_key(header.written_at_ms, key), &())?;
        Ok(())
    }

    fn unlink(&self, wtxn: &mut RwTxn, key: &str, header: &DurableRecord) -> Result<()> {
        self.records.delete(wtxn, key)?;
        self.index.delete(wtxn, &index_key(header.written_at_ms, key))?;
        Ok(())
    }

    /// Read a live payload, removing the record if it has expired
    fn get_payload(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.clock.now_millis();
        let live = {
            let rtxn = self.env.read_txn()?;
            let Some(raw) = self.records.get(&rtxn, key)? else {
                return Ok(None);
            };
            let (header, payload) = DurableRecord::decode(key, raw)?;
            if header.is_expired_at(now) {
                None
            } else {
                Some(self.codec.decode(payload, header.compression)?)
            }
        };

        if live.is_none() {
            self.expire(&[key.to_string()], now)?;
        }
        Ok(live)
    }

    /// Read many payloads in one transaction; expired hits are removed after
    fn get_payloads(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let now = self.clock.now_millis();
        let mut found = HashMap::with_capacity(keys.len());
        let mut expired = Vec::new();
        {
            let rtxn = self.env.read_txn()?;
            for key in keys {
                let Some(raw) = self.records.get(&rtxn, key)? else {
                    continue;
                };
                let decoded = DurableRecord::decode(key, raw).and_then(|(header, payload)| {
                    if header.is_expired_at(now) {
                        Ok(None)
                    } else {
                        self.codec.decode(payload, header.compression).map(Some)
                    }
                });
                match decoded {
                    Ok(Some(payload)) => {
                        found.insert(key.clone(), payload);
                    }
                    Ok(None) => expired.push(key.clone()),
                    Err(e) => warn!(key = %key, error = %e, "Skipping unreadable L2 record"),
                }
            }
        }

        if !expired.is_empty() {
            self.expire(&expired, now)?;
        }
        Ok(found)
    }

    /// Remove the given keys if they are still expired at `now`
    fn expire(&self, keys: &[String], now: i64) -> Result<u64> {
        let mut wtxn = self.env.write_txn()?;
        let mut meta = self.load_meta(&wtxn)?;
        let mut removed = 0;
        for key in keys {
            if let Some(header) = self.header(&wtxn, key)? {
                if header.is_expired_at(now) {
                    self.unlink(&mut wtxn, key, &header)?;
                    meta.remove(header.size_bytes);
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            self.store_meta(&mut wtxn, &meta)?;
            wtxn.commit()?;
        }
        Ok(removed)
    }

    /// Write one or more records in a single transaction
    fn put_all(&self, batch: Vec<Prepared>) -> Result<Option<ReclaimReport>> {
        let quota = self.config.quota_bytes;
        let now = self.clock.now_millis();

        // Last write wins for duplicate keys within a batch
        let mut slots: HashMap<String, usize> = HashMap::with_capacity(batch.len());
        let mut items: Vec<Prepared> = Vec::with_capacity(batch.len());
        for item in batch {
            if item.size > quota {
                return Err(Error::QuotaExceeded {
                    required: item.size,
                    available: quota,
                });
            }
            match slots.get(&item.key) {
                Some(&slot) => items[slot] = item,
                None => {
                    slots.insert(item.key.clone(), items.len());
                    items.push(item);
                }
            }
        }

        let mut wtxn = self.env.write_txn()?;
        let mut meta = self.load_meta(&wtxn)?;

        let mut previous = Vec::with_capacity(items.len());
        for item in &items {
            previous.push(self.header(&wtxn, &item.key)?);
        }
        let outgoing: u64 = previous.iter().flatten().map(|h| h.size_bytes).sum();
        let incoming: u64 = items.iter().map(|i| i.size).sum();
        let new_keys = previous.iter().filter(|h| h.is_none()).count() as u64;

        let protected: HashSet<String> = slots.into_keys().collect();
        let reclaimed = self.admit(&mut wtxn, &mut meta, outgoing, incoming, &protected, now)?;

        for (item, old) in items.into_iter().zip(previous) {
            if let Some(old) = old {
                self.unlink(&mut wtxn, &item.key, &old)?;
            }
            let (stored, compression) = self.codec.encode(item.payload);
            let header = DurableRecord {
                written_at_ms: now,
                ttl_ms: item.ttl_ms,
                size_bytes: item.size,
                compression,
            };
            self.write(&mut wtxn, &item.key, &header, &stored)?;
        }

        meta.total_size_bytes = meta.total_size_bytes.saturating_sub(outgoing) + incoming;
        meta.item_count += new_keys;
        self.store_meta(&mut wtxn, &meta)?;
        wtxn.commit()?;

        Ok(reclaimed)
    }

    /// Make room for `incoming` bytes replacing `outgoing` bytes
    fn admit(
        &self,
        wtxn: &mut RwTxn,
        meta: &mut AggregateMetadata,
        outgoing: u64,
        incoming: u64,
        protected: &HashSet<String>,
        now: i64,
    ) -> Result<Option<ReclaimReport>> {
        let quota = self.config.quota_bytes;
        let soft = self.config.soft_limit();
        let projected = meta.total_size_bytes.saturating_sub(outgoing) + incoming;
        if projected <= soft {
            return Ok(None);
        }

        let report = self.reclaim_in(wtxn, meta, projected - soft, protected, now)?;
        debug!(
            expired = report.expired_removed,
            live = report.live_removed,
            freed = report.freed_bytes,
            "L2 reclaimed before write"
        );

        let remaining = meta.total_size_bytes.saturating_sub(outgoing);
        if remaining + incoming > quota {
            return Err(Error::QuotaExceeded {
                required: incoming,
                available: quota.saturating_sub(remaining),
            });
        }
        Ok(Some(report))
    }

    /// Walk the write index oldest-first over at most `reclaim_batch_limit`
    /// candidates. Expired candidates go first, then live ones until
    /// `required` is freed. Expired records past the window are left to the
    /// sweeper.
    fn reclaim_in(
        &self,
        wtxn: &mut RwTxn,
        meta: &mut AggregateMetadata,
        required: u64,
        protected: &HashSet<String>,
        now: i64,
    ) -> Result<ReclaimReport> {
        let limit = self.config.reclaim_batch_limit;
        let mut expired = Vec::new();
        let mut live = Vec::new();
        let mut expired_bytes = 0u64;

        for item in self.index.iter(wtxn)? {
            if expired.len() + live.len() >= limit || (required > 0 && expired_bytes >= required) {
                break;
            }
            let (raw, _) = item?;
            let Some(key) = index_entry_key(raw) else {
                continue;
            };
            if protected.contains(key) {
                continue;
            }
            let Some(header) = self.header(wtxn, key)? else {
                continue;
            };
            if header.is_expired_at(now) {
                expired_bytes += header.size_bytes;
                expired.push((key.to_string(), header));
            } else {
                live.push((key.to_string(), header));
            }
        }

        let mut report = ReclaimReport::default();
        for (key, header) in expired {
            self.unlink(wtxn, &key, &header)?;
            meta.remove(header.size_bytes);
            report.expired_removed += 1;
            report.freed_bytes += header.size_bytes;
        }
        for (key, header) in live {
            if report.freed_bytes >= required {
                break;
            }
            self.unlink(wtxn, &key, &header)?;
            meta.remove(header.size_bytes);
            report.live_removed += 1;
            report.freed_bytes += header.size_bytes;
        }
        Ok(report)
    }

    fn reclaim(&self, required: u64) -> Result<ReclaimReport> {
        let now = self.clock.now_millis();
        let mut wtxn = self.env.write_txn()?;
        let mut meta = self.load_meta(&wtxn)?;
        let report = self.reclaim_in(&mut wtxn, &mut meta, required, &HashSet::new(), now)?;
        if report.removed() > 0 {
            self.store_meta(&mut wtxn, &meta)?;
            wtxn.commit()?;
        }
        Ok(report)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut wtxn = self.env.write_txn()?;
        let Some(header) = self.header(&wtxn, key)? else {
            return Ok(false);
        };
        let mut meta = self.load_meta(&wtxn)?;
        self.unlink(&mut wtxn, key, &header)?;
        meta.remove(header.size_bytes);
        self.store_meta(&mut wtxn, &meta)?;
        wtxn.commit()?;
        Ok(true)
    }

    /// Unlinks every match; only the live ones are counted
    fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
        let now = self.clock.now_millis();
        let mut wtxn = self.env.write_txn()?;
        let mut matches = Vec::new();
        for item in self.records.prefix_iter(&wtxn, prefix)? {
            let (key, raw) = item?;
            let (header, _) = DurableRecord::decode(key, raw)?;
            matches.push((key.to_string(), header));
        }
        if matches.is_empty() {
            return Ok(0);
        }

        let mut meta = self.load_meta(&wtxn)?;
        let mut freed = 0u64;
        for (key, header) in &matches {
            self.unlink(&mut wtxn, key, header)?;
            freed += header.size_bytes;
        }
        let removed = matches.len() as u64;
        let live = matches.iter().filter(|(_, h)| !h.is_expired_at(now)).count() as u64;
        meta.total_size_bytes = meta.total_size_bytes.saturating_sub(freed);
        meta.item_count = meta.item_count.saturating_sub(removed);
        self.store_meta(&mut wtxn, &meta)?;
        wtxn.commit()?;
        Ok(live)
    }

    fn sweep(&self) -> Result<SweepReport> {
        let now = self.clock.now_millis();
        let mut wtxn = self.env.write_txn()?;
        let before = self.load_meta(&wtxn)?;

        let mut expired = Vec::new();
        let mut live_size = 0u64;
        let mut live_count = 0u64;
        for item in self.records.iter(&wtxn)? {
            let (key, raw) = item?;
            let (header, _) = DurableRecord::decode(key, raw)?;
            if header.is_expired_at(now) {
                expired.push((key.to_string(), header));
            } else {
                live_size += header.size_bytes;
                live_count += 1;
            }
        }

        let mut freed = 0u64;
        for (key, header) in &expired {
            self.unlink(&mut wtxn, key, header)?;
            freed += header.size_bytes;
        }
        let removed = expired.len() as u64;

        let expected_size = before.total_size_bytes.saturating_sub(freed);
        let expected_count = before.item_count.saturating_sub(removed);
        let drift_corrected = expected_size != live_size || expected_count != live_count;
        if drift_corrected {
            warn!(
                stored_size = expected_size,
                actual_size = live_size,
                stored_count = expected_count,
                actual_count = live_count,
                "L2 metadata drift corrected"
            );
        }

        let meta = AggregateMetadata {
            total_size_bytes: live_size,
            item_count: live_count,
            last_cleanup_at_ms: now,
        };
        self.store_meta(&mut wtxn, &meta)?;
        wtxn.commit()?;

        Ok(SweepReport {
            expired_removed: removed,
            freed_bytes: freed,
            item_count: live_count,
            total_size_bytes: live_size,
            drift_corrected,
        })
    }

    fn audit(&self) -> Result<AggregateMetadata> {
        let rtxn = self.env.read_txn()?;
        let stored = self.load_meta(&rtxn)?;
        let mut recount = AggregateMetadata {
            last_cleanup_at_ms: stored.last_cleanup_at_ms,
            ..Default::default()
        };
        for item in self.records.iter(&rtxn)? {
            let (key, raw) = item?;
            let (header, _) = DurableRecord::decode(key, raw)?;
            recount.add(header.size_bytes);
        }
        Ok(recount)
    }

    fn metadata(&self) -> Result<AggregateMetadata> {
        let rtxn = self.env.read_txn()?;
        self.load_meta(&rtxn)
    }

    fn contains(&self, key: &str) -> Result<bool> {
        let now = self.clock.now_millis();
        let rtxn = self.env.read_txn()?;
        Ok(self
            .header(&rtxn, key)?
            .is_some_and(|h| !h.is_expired_at(now)))
    }
}

// =============================================================================
// Durable Tier
// =============================================================================

/// L2 Cache - durable local tier.
///
/// Only exists once its store has been opened.
#[derive(Clone)]
pub struct DurableTier {
    inner: Arc<Inner>,
}

impl fmt::Debug for DurableTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableTier")
            .field("path", &self.inner.config.path)
            .field("quota_bytes", &self.inner.config.quota_bytes)
            .finish()
    }
}

impl DurableTier {
    /// Open (or create) the store described by `config`
    pub async fn open(config: DurableConfig, clock: SharedClock) -> Result<Self> {
        config.validate()?;
        let path = config.path.clone();
        let (inner, meta) = tokio::task::spawn_blocking(move || {
            let inner = Inner::open(config, clock)?;
            let meta = inner.metadata()?;
            Ok::<_, Error>((inner, meta))
        })
        .await??;
        info!(
            path = %path.display(),
            items = meta.item_count,
            bytes = meta.total_size_bytes,
            "L2 store opened"
        );
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Get configuration
    pub fn config(&self) -> &DurableConfig {
        &self.inner.config
    }

    /// Store directory
    pub fn path(&self) -> &Path {
        &self.inner.config.path
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&inner)).await?
    }

    /// Get a live value
    #[instrument(level = "debug", skip(self))]
    pub async fn get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>> {
        let owned = key.to_string();
        let payload = self.blocking(move |db| db.get_payload(&owned)).await?;
        match payload {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Write a value, reclaiming space first if the store is near its quota
    #[instrument(level = "debug", skip(self, value))]
    pub async fn set<V: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &V,
        ttl_seconds: u64,
    ) -> Result<()> {
        let item = prepare(key, value, ttl_seconds)?;
        self.blocking(move |db| db.put_all(vec![item])).await?;
        Ok(())
    }

    /// Read many keys in one transaction
    #[instrument(level = "debug", skip(self, keys), fields(count = keys.len()))]
    pub async fn get_batch<V: DeserializeOwned>(&self, keys: &[String]) -> Result<HashMap<String, V>> {
        let owned = keys.to_vec();
        let payloads = self.blocking(move |db| db.get_payloads(&owned)).await?;

        let mut values = HashMap::with_capacity(payloads.len());
        for (key, bytes) in payloads {
            match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    values.insert(key, value);
                }
                Err(e) => warn!(key = %key, error = %e, "Skipping undecodable L2 value"),
            }
        }
        Ok(values)
    }

    /// Write many entries `(key, value, ttl_seconds)` atomically: either all
    /// are stored and accounted, or none are
    #[instrument(level = "debug", skip(self, entries), fields(count = entries.len()))]
    pub async fn set_batch<V: Serialize>(&self, entries: &[(String, V, u64)]) -> Result<()> {
        let batch = entries
            .iter()
            .map(|(key, value, ttl)| prepare(key, value, *ttl))
            .collect::<Result<Vec<_>>>()?;
        if batch.is_empty() {
            return Ok(());
        }
        self.blocking(move |db| db.put_all(batch)).await?;
        Ok(())
    }

    /// Remove a key; returns whether it existed
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let owned = key.to_string();
        self.blocking(move |db| db.delete(&owned)).await
    }

    /// Remove every key starting with `prefix`; returns the number of live
    /// records removed (expired matches are dropped but not counted)
    #[instrument(level = "debug", skip(self))]
    pub async fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
        let owned = prefix.to_string();
        self.blocking(move |db| db.delete_by_prefix(&owned)).await
    }

    /// Free at least `required` bytes from the oldest `reclaim_batch_limit`
    /// writes, expired ones first
    pub async fn reclaim(&self, required: u64) -> Result<ReclaimReport> {
        self.blocking(move |db| db.reclaim(required)).await
    }

    /// Remove every expired record and reconcile metadata to a full recount
    pub async fn sweep_expired(&self) -> Result<SweepReport> {
        self.blocking(|db| db.sweep()).await
    }

    /// Stored aggregate metadata
    pub async fn metadata(&self) -> Result<AggregateMetadata> {
        self.blocking(|db| db.metadata()).await
    }

    /// Aggregate metadata recomputed from the records themselves
    pub async fn audit(&self) -> Result<AggregateMetadata> {
        self.blocking(|db| db.audit()).await
    }

    /// Whether a live record exists for `key`
    pub async fn contains(&self, key: &str) -> Result<bool> {
        let owned = key.to_string();
        self.blocking(move |db| db.contains(&owned)).await
    }

    /// Quota usage
    pub async fn quota(&self) -> Result<QuotaSnapshot> {
        self.blocking(|db| {
            let meta = db.metadata()?;
            let disk_bytes = db.env.real_disk_size().ok();
            let source = match disk_bytes {
                Some(_) => "metadata+lmdb",
                None => "metadata",
            };
            Ok(QuotaSnapshot {
                used_bytes: meta.total_size_bytes,
                quota_bytes: db.config.quota_bytes,
                item_count: meta.item_count,
                disk_bytes,
                source: source.to_string(),
            })
        })
        .await
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `sweep_interval`
    /// until `token` is cancelled
    pub fn spawn_sweeper(&self, token: CancellationToken) -> JoinHandle<()> {
        let tier = self.clone();
        let period = self.config().sweep_interval();

        tokio::spawn(async move {
            info!("Starting L2 sweeper every {:?}", period);
            let mut tick = tokio::time::interval(period);
            // The first tick completes immediately
            tick.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("L2 sweeper shutting down");
                        break;
                    }
                    _ = tick.tick() => {
                        match tier.sweep_expired().await {
                            Ok(report) => debug!(
                                removed = report.expired_removed,
                                freed = report.freed_bytes,
                                items = report.item_count,
                                "L2 sweep complete"
                            ),
                            Err(e) => warn!("L2 sweep failed: {}", e),
                        }
                    }
                }
            }
        })
    }
}

fn prepare<V: Serialize + ?Sized>(key: &str, value: &V, ttl_seconds: u64) -> Result<Prepared> {
    Ok(Prepared {
        key: key.to_string(),
        payload: serde_json::to_vec(value)?,
        size: estimate_size(value),
        ttl_ms: ttl_millis(ttl_seconds),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::{Clock, ManualClock};
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn make_config(dir: &TempDir, quota_bytes: u64) -> DurableConfig {
        DurableConfig {
            quota_bytes,
            ..DurableConfig::at(dir.path())
        }
    }

    async fn make_tier(quota_bytes: u64) -> (DurableTier, Arc<ManualClock>, TempDir) {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let tier = DurableTier::open(make_config(&dir, quota_bytes), clock.clone())
            .await
            .unwrap();
        (tier, clock, dir)
    }

    /// A string whose estimated size is exactly `bytes` (must be even)
    fn make_value(bytes: usize) -> String {
        "x".repeat(bytes / 2)
    }

    async fn assert_consistent(tier: &DurableTier) {
        let stored = tier.metadata().await.unwrap();
        let recount = tier.audit().await.unwrap();
        assert_eq!(stored.total_size_bytes, recount.total_size_bytes);
        assert_eq!(stored.item_count, recount.item_count);
    }

    #[test]
    fn test_header_layout() {
        let header = DurableRecord {
            written_at_ms: 42,
            ttl_ms: 1_000,
            size_bytes: 7,
            compression: CompressionAlgorithm::Lz4,
        };
        let raw = header.encode(b"{}");
        assert_eq!(raw.len(), DurableRecord::HEADER_LEN + 2);
        assert_eq!(&raw[0..8], &42i64.to_le_bytes());
        assert_eq!(raw[24], 1);

        let (decoded, payload) = DurableRecord::decode("k", &raw).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(payload, b"{}");

        assert_matches!(DurableRecord::decode("k", &raw[..10]), Err(Error::Corrupt { .. }));
    }

    #[test]
    fn test_index_key_orders_by_time() {
        let early = index_key(1_000, "zzz");
        let late = index_key(2_000, "aaa");
        assert!(early < late);
        assert_eq!(index_entry_key(&early), Some("zzz"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = DurableConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.soft_limit(), (DEFAULT_L2_QUOTA as f64 * 0.9) as u64);
        assert_eq!(config.map_size() % MAP_ALIGN as usize, 0);

        config.cleanup_threshold = 1.5;
        assert_matches!(config.validate(), Err(Error::Config(_)));

        config.cleanup_threshold = 0.9;
        config.quota_bytes = 0;
        assert_matches!(config.validate(), Err(Error::Config(_)));
    }

    #[tokio::test]
    async fn test_open_initializes_metadata() {
        let (tier, _, _dir) = make_tier(10_000).await;
        let meta = tier.metadata().await.unwrap();
        assert_eq!(meta, AggregateMetadata::default());
    }

    #[tokio::test]
    async fn test_set_get_overwrite() {
        let (tier, _, _dir) = make_tier(10_000).await;

        tier.set("user:1", &make_value(100), 60).await.unwrap();
        assert_eq!(tier.get::<String>("user:1").await.unwrap(), Some(make_value(100)));

        tier.set("user:1", &make_value(40), 60).await.unwrap();
        let meta = tier.metadata().await.unwrap();
        assert_eq!(meta.item_count, 1);
        assert_eq!(meta.total_size_bytes, 40);
        assert_consistent(&tier).await;

        assert_eq!(tier.get::<String>("user:2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_get_removes_record() {
        let (tier, clock, _dir) = make_tier(10_000).await;
        tier.set("stat:views", &1234u64, 5).await.unwrap();

        clock.advance(Duration::from_secs(5));
        assert_eq!(tier.get::<u64>("stat:views").await.unwrap(), Some(1234));

        clock.advance(Duration::from_millis(1));
        assert_eq!(tier.get::<u64>("stat:views").await.unwrap(), None);

        let meta = tier.metadata().await.unwrap();
        assert_eq!(meta.item_count, 0);
        assert_eq!(meta.total_size_bytes, 0);
        assert_consistent(&tier).await;
    }

    #[tokio::test]
    async fn test_delete() {
        let (tier, _, _dir) = make_tier(10_000).await;
        tier.set("k", &make_value(10), 0).await.unwrap();
        assert!(tier.delete("k").await.unwrap());
        assert!(!tier.delete("k").await.unwrap());
        assert_eq!(tier.metadata().await.unwrap().item_count, 0);
    }

    #[tokio::test]
    async fn test_delete_by_prefix() {
        let (tier, _, _dir) = make_tier(10_000).await;
        for i in 0..3 {
            tier.set(&format!("user:{}", i), &make_value(20), 0).await.unwrap();
        }
        tier.set("static:logo", &make_value(20), 0).await.unwrap();

        assert_eq!(tier.delete_by_prefix("user:").await.unwrap(), 3);
        assert_eq!(tier.delete_by_prefix("user:").await.unwrap(), 0);

        let meta = tier.metadata().await.unwrap();
        assert_eq!(meta.item_count, 1);
        assert_eq!(meta.total_size_bytes, 20);
        assert!(tier.contains("static:logo").await.unwrap());
        assert_consistent(&tier).await;
    }

    #[tokio::test]
    async fn test_reclaim_oldest_write_first() {
        // soft limit 900
        let (tier, clock, _dir) = make_tier(1_000).await;
        for key in ["a", "b", "c", "d"] {
            tier.set(key, &make_value(200), 0).await.unwrap();
            clock.advance(Duration::from_secs(1));
        }
        // Reading does not refresh write order
        assert!(tier.get::<String>("a").await.unwrap().is_some());

        tier.set("e", &make_value(200), 0).await.unwrap();
        assert!(!tier.contains("a").await.unwrap());
        assert!(tier.contains("b").await.unwrap());
        assert!(tier.contains("e").await.unwrap());

        let meta = tier.metadata().await.unwrap();
        assert_eq!(meta.total_size_bytes, 800);
        assert_eq!(meta.item_count, 4);
        assert_consistent(&tier).await;
    }

    #[tokio::test]
    async fn test_reclaim_prefers_expired() {
        let (tier, clock, _dir) = make_tier(1_000).await;
        tier.set("a", &make_value(200), 0).await.unwrap();
        clock.advance(Duration::from_secs(1));
        tier.set("b", &make_value(200), 1).await.unwrap();
        clock.advance(Duration::from_secs(1));
        tier.set("c", &make_value(200), 0).await.unwrap();
        tier.set("d", &make_value(200), 0).await.unwrap();
        clock.advance(Duration::from_secs(5));

        tier.set("e", &make_value(200), 0).await.unwrap();
        assert!(tier.contains("a").await.unwrap());
        assert_eq!(tier.get::<String>("b").await.unwrap(), None);
        assert_eq!(tier.metadata().await.unwrap().item_count, 4);
        assert_consistent(&tier).await;
    }

    #[tokio::test]
    async fn test_explicit_reclaim_respects_batch_limit() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let config = DurableConfig {
            reclaim_batch_limit: 2,
            ..make_config(&dir, 100_000)
        };
        let tier = DurableTier::open(config, clock.clone()).await.unwrap();
        for i in 0..5 {
            tier.set(&format!("k{}", i), &make_value(100), 0).await.unwrap();
            clock.advance(Duration::from_millis(10));
        }

        let report = tier.reclaim(u64::MAX).await.unwrap();
        assert_eq!(report.live_removed, 2);
        assert_eq!(report.freed_bytes, 200);
        assert!(!tier.contains("k0").await.unwrap());
        assert!(!tier.contains("k1").await.unwrap());
        assert!(tier.contains("k2").await.unwrap());
        assert_consistent(&tier).await;
    }

    #[tokio::test]
    async fn test_oversized_value_rejected() {
        let (tier, _, _dir) = make_tier(1_000).await;
        tier.set("small", &make_value(100), 0).await.unwrap();

        let result = tier.set("huge", &make_value(2_000), 0).await;
        assert_matches!(result, Err(Error::QuotaExceeded { required: 2_000, .. }));

        let meta = tier.metadata().await.unwrap();
        assert_eq!(meta.item_count, 1);
        assert_eq!(meta.total_size_bytes, 100);
    }

    #[tokio::test]
    async fn test_batch_roundtrip_and_accounting() {
        let (tier, clock, _dir) = make_tier(100_000).await;
        let entries = vec![
            ("a".to_string(), make_value(10), 0),
            ("b".to_string(), make_value(20), 1),
            ("c".to_string(), make_value(30), 0),
        ];
        tier.set_batch(&entries).await.unwrap();

        let meta = tier.metadata().await.unwrap();
        assert_eq!(meta.item_count, 3);
        assert_eq!(meta.total_size_bytes, 60);

        clock.advance(Duration::from_secs(2));
        let keys: Vec<String> = ["a", "b", "c", "zz"].iter().map(|s| s.to_string()).collect();
        let found: HashMap<String, String> = tier.get_batch(&keys).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.contains_key("a"));
        assert!(!found.contains_key("b"));

        // Expired hit was removed
        assert_eq!(tier.metadata().await.unwrap().item_count, 2);
        assert_consistent(&tier).await;
    }

    #[tokio::test]
    async fn test_batch_failure_persists_nothing() {
        use serde::ser::Error as _;

        struct Flaky(bool);
        impl Serialize for Flaky {
            fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
                if self.0 {
                    Err(S::Error::custom("refusing to serialize"))
                } else {
                    s.serialize_str("ok")
                }
            }
        }

        let (tier, _, _dir) = make_tier(100_000).await;
        tier.set("existing", &make_value(10), 0).await.unwrap();
        let before = tier.metadata().await.unwrap();

        let entries = vec![
            ("a".to_string(), Flaky(false), 0),
            ("b".to_string(), Flaky(true), 0),
            ("c".to_string(), Flaky(false), 0),
        ];
        assert_matches!(tier.set_batch(&entries).await, Err(Error::Serialization(_)));

        assert_eq!(tier.metadata().await.unwrap(), before);
        assert!(!tier.contains("a").await.unwrap());
        assert_consistent(&tier).await;
    }

    #[tokio::test]
    async fn test_batch_over_quota_rolls_back() {
        let (tier, _, _dir) = make_tier(1_000).await;
        let entries = vec![
            ("a".to_string(), make_value(600), 0),
            ("b".to_string(), make_value(600), 0),
        ];
        assert_matches!(tier.set_batch(&entries).await, Err(Error::QuotaExceeded { .. }));
        assert_eq!(tier.metadata().await.unwrap(), AggregateMetadata::default());
    }

    #[tokio::test]
    async fn test_sweep_reconciles_metadata() {
        let (tier, clock, _dir) = make_tier(100_000).await;
        tier.set("short", &make_value(50), 1).await.unwrap();
        tier.set("long", &make_value(70), 0).await.unwrap();
        clock.advance(Duration::from_secs(2));

        let report = tier.sweep_expired().await.unwrap();
        assert_eq!(report.expired_removed, 1);
        assert_eq!(report.freed_bytes, 50);
        assert_eq!(report.item_count, 1);
        assert!(!report.drift_corrected);

        let meta = tier.metadata().await.unwrap();
        assert_eq!(meta.total_size_bytes, 70);
        assert_eq!(meta.last_cleanup_at_ms, clock.now_millis());
    }

    #[tokio::test]
    async fn test_quota_snapshot() {
        let (tier, _, _dir) = make_tier(10_000).await;
        tier.set("k", &make_value(1_000), 0).await.unwrap();

        let quota = tier.quota().await.unwrap();
        assert_eq!(quota.used_bytes, 1_000);
        assert_eq!(quota.quota_bytes, 10_000);
        assert_eq!(quota.item_count, 1);
        assert_eq!(quota.available_bytes(), 9_000);
        assert!((quota.usage_ratio() - 0.1).abs() < 1e-9);
        assert_eq!(quota.source, "metadata+lmdb");
        assert!(quota.disk_bytes.is_some());
    }

    #[tokio::test]
    async fn test_reclaim_walks_oldest_window_only() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let config = DurableConfig {
            reclaim_batch_limit: 2,
            ..make_config(&dir, 100_000)
        };
        let tier = DurableTier::open(config, clock.clone()).await.unwrap();
        tier.set("k0", &make_value(100), 0).await.unwrap();
        clock.advance(Duration::from_millis(10));
        tier.set("k1", &make_value(100), 0).await.unwrap();
        clock.advance(Duration::from_millis(10));
        tier.set("k2", &make_value(100), 1).await.unwrap();
        clock.advance(Duration::from_secs(2));

        // k2 has expired but sits past the two oldest writes
        let report = tier.reclaim(50).await.unwrap();
        assert_eq!(report.expired_removed, 0);
        assert_eq!(report.live_removed, 1);
        assert_eq!(report.freed_bytes, 100);
        assert!(!tier.contains("k0").await.unwrap());
        assert!(tier.contains("k1").await.unwrap());
        assert_eq!(tier.audit().await.unwrap().item_count, 2);
        assert_consistent(&tier).await;

        let swept = tier.sweep_expired().await.unwrap();
        assert_eq!(swept.expired_removed, 1);
        assert_eq!(swept.item_count, 1);
    }

    #[tokio::test]
    async fn test_reclaim_stops_once_enough_is_freed() {
        let (tier, clock, _dir) = make_tier(100_000).await;
        for i in 0..6 {
            tier.set(&format!("k{}", i), &make_value(100), 0).await.unwrap();
            clock.advance(Duration::from_millis(10));
        }

        let report = tier.reclaim(150).await.unwrap();
        assert_eq!(report.live_removed, 2);
        assert_eq!(report.freed_bytes, 200);
        assert!(tier.contains("k2").await.unwrap());
        assert_eq!(tier.metadata().await.unwrap().item_count, 4);
        assert_consistent(&tier).await;
    }

    #[tokio::test]
    async fn test_delete_by_prefix_counts_live_only() {
        let (tier, clock, _dir) = make_tier(10_000).await;
        tier.set("user:1", &make_value(20), 1).await.unwrap();
        tier.set("user:2", &make_value(20), 0).await.unwrap();
        clock.advance(Duration::from_secs(2));

        assert_eq!(tier.delete_by_prefix("user:").await.unwrap(), 1);

        let meta = tier.metadata().await.unwrap();
        assert_eq!(meta.item_count, 0);
        assert_eq!(meta.total_size_bytes, 0);
        assert_consistent(&tier).await;
    }

    #[tokio::test]
    async fn test_batch_failure_midway_rolls_back_written_records() {
        use std::sync::atomic::Ordering;

        let (tier, _, _dir) = make_tier(100_000).await;
        tier.set("existing", &make_value(10), 0).await.unwrap();
        let before = tier.metadata().await.unwrap();

        let entries: Vec<(String, String, u64)> = (0..4)
            .map(|i| (format!("batch:{}", i), make_value(20), 0))
            .collect();

        // Two records land in the transaction before the third write fails
        tier.inner.write_budget.store(2, Ordering::SeqCst);
        assert_matches!(tier.set_batch(&entries).await, Err(Error::Internal(_)));

        assert_eq!(tier.metadata().await.unwrap(), before);
        assert_eq!(tier.audit().await.unwrap().item_count, 1);
        for (key, _, _) in &entries {
            assert!(!tier.contains(key).await.unwrap());
        }
        assert_consistent(&tier).await;

        tier.inner.write_budget.store(usize::MAX, Ordering::SeqCst);
        tier.set_batch(&entries).await.unwrap();
        assert_eq!(tier.metadata().await.unwrap().item_count, 5);
        assert_consistent(&tier).await;
    }

    #[tokio::test]
    async fn test_large_values_compress_transparently() {
        let (tier, _, _dir) = make_tier(1_000_000).await;
        let value = serde_json::json!({ "body": "abc".repeat(2_000) });
        tier.set("template:page", &value, 0).await.unwrap();
        let back: serde_json::Value = tier.get("template:page").await.unwrap().unwrap();
        assert_eq!(back, value);
    }

    #[tokio::test]
    async fn test_reopen_keeps_records() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        {
            let tier = DurableTier::open(make_config(&dir, 10_000), clock.clone())
                .await
                .unwrap();
            tier.set("static:logo", &make_value(30), 0).await.unwrap();
        }

        let tier = DurableTier::open(make_config(&dir, 10_000), clock).await.unwrap();
        assert_eq!(tier.get::<String>("static:logo").await.unwrap(), Some(make_value(30)));
        assert_eq!(tier.metadata().await.unwrap().item_count, 1);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_cancel() {
        let (tier, _, _dir) = make_tier(10_000).await;
        let token = CancellationToken::new();
        let handle = tier.spawn_sweeper(token.clone());
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
