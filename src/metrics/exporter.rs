//! Prometheus Exporter
//!
//! Publishes cache statistics as gauges in a private registry and renders
//! them in the Prometheus text exposition format. Counter values are exported
//! as gauges because `reset_stats` may move them backwards.

use prometheus::{Encoder, GaugeVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::cache::{QuotaSnapshot, StatsSnapshot};
use crate::error::Result;

/// Metric name prefix
const NAMESPACE: &str = "tiercache";

/// Cache statistics exporter
pub struct PrometheusExporter {
    registry: Registry,

    hits: IntGaugeVec,
    hit_rate: GaugeVec,
    misses: IntGauge,
    errors: IntGauge,
    sets: IntGaugeVec,
    backfills: IntGaugeVec,

    size_bytes: IntGaugeVec,
    entries: IntGaugeVec,
    evictions: IntGauge,
    latency_us: IntGaugeVec,

    quota_bytes: IntGauge,
    quota_used_bytes: IntGauge,
    disk_bytes: IntGauge,
}

impl PrometheusExporter {
    /// Create an exporter with all metrics registered
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let hits = IntGaugeVec::new(opts("hits", "Lookups answered by each tier"), &["tier"])?;
        let hit_rate = GaugeVec::new(
            opts("hit_rate", "Fraction of lookups answered by each tier"),
            &["tier"],
        )?;
        let misses = IntGauge::with_opts(opts("misses", "Lookups found at no tier"))?;
        let errors = IntGauge::with_opts(opts("errors", "Tier failures absorbed by the manager"))?;
        let sets = IntGaugeVec::new(opts("sets", "Write calls by outcome"), &["outcome"])?;
        let backfills = IntGaugeVec::new(
            opts("backfills", "Values copied into faster tiers"),
            &["path"],
        )?;
        let size_bytes = IntGaugeVec::new(
            opts("size_bytes", "Estimated bytes held by each local tier"),
            &["tier"],
        )?;
        let entries = IntGaugeVec::new(opts("entries", "Entries held by each local tier"), &["tier"])?;
        let evictions = IntGauge::with_opts(opts("l1_evictions", "Entries evicted from L1"))?;
        let latency_us = IntGaugeVec::new(
            opts("latency_microseconds", "Moving average operation latency"),
            &["op"],
        )?;
        let quota_bytes = IntGauge::with_opts(opts("l2_quota_bytes", "Durable tier quota"))?;
        let quota_used_bytes =
            IntGauge::with_opts(opts("l2_quota_used_bytes", "Durable tier quota in use"))?;
        let disk_bytes =
            IntGauge::with_opts(opts("l2_disk_bytes", "Durable store size reported by LMDB"))?;

        registry.register(Box::new(hits.clone()))?;
        registry.register(Box::new(hit_rate.clone()))?;
        registry.register(Box::new(misses.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(sets.clone()))?;
        registry.register(Box::new(backfills.clone()))?;
        registry.register(Box::new(size_bytes.clone()))?;
        registry.register(Box::new(entries.clone()))?;
        registry.register(Box::new(evictions.clone()))?;
        registry.register(Box::new(latency_us.clone()))?;
        registry.register(Box::new(quota_bytes.clone()))?;
        registry.register(Box::new(quota_used_bytes.clone()))?;
        registry.register(Box::new(disk_bytes.clone()))?;

        Ok(Self {
            registry,
            hits,
            hit_rate,
            misses,
            errors,
            sets,
            backfills,
            size_bytes,
            entries,
            evictions,
            latency_us,
            quota_bytes,
            quota_used_bytes,
            disk_bytes,
        })
    }

    /// Publish a stats snapshot
    pub fn observe(&self, stats: &StatsSnapshot) {
        self.hits.with_label_values(&["l1"]).set(gauge(stats.l1_hits));
        self.hits.with_label_values(&["l2"]).set(gauge(stats.l2_hits));
        self.hits.with_label_values(&["l3"]).set(gauge(stats.l3_hits));

        let rates = &stats.hit_rate_by_tier;
        self.hit_rate.with_label_values(&["l1"]).set(rates.l1);
        self.hit_rate.with_label_values(&["l2"]).set(rates.l2);
        self.hit_rate.with_label_values(&["l3"]).set(rates.l3);
        self.hit_rate.with_label_values(&["overall"]).set(rates.overall);

        self.misses.set(gauge(stats.misses));
        self.errors.set(gauge(stats.errors));
        self.sets.with_label_values(&["stored"]).set(gauge(stats.sets));
        self.sets
            .with_label_values(&["rejected"])
            .set(gauge(stats.rejected_sets));
        self.backfills
            .with_label_values(&["l2_to_l1"])
            .set(gauge(stats.backfills_l2_to_l1));
        self.backfills
            .with_label_values(&["l3_to_local"])
            .set(gauge(stats.backfills_l3_to_local));

        self.size_bytes
            .with_label_values(&["l1"])
            .set(gauge(stats.l1_size_bytes));
        self.size_bytes
            .with_label_values(&["l2"])
            .set(gauge(stats.l2_size_bytes));
        self.entries.with_label_values(&["l1"]).set(gauge(stats.l1_entries));
        self.entries.with_label_values(&["l2"]).set(gauge(stats.l2_entries));
        self.evictions.set(gauge(stats.l1_evictions));

        self.latency_us
            .with_label_values(&["get"])
            .set(gauge(stats.get_latency_us));
        self.latency_us
            .with_label_values(&["set"])
            .set(gauge(stats.set_latency_us));
    }

    /// Publish durable quota usage
    pub fn observe_quota(&self, quota: &QuotaSnapshot) {
        self.quota_bytes.set(gauge(quota.quota_bytes));
        self.quota_used_bytes.set(gauge(quota.used_bytes));
        if let Some(disk) = quota.disk_bytes {
            self.disk_bytes.set(gauge(disk));
        }
    }

    /// Render the registry in text exposition format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Underlying registry, for embedding in a larger exposition endpoint
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for PrometheusExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusExporter").finish_non_exhaustive()
    }
}

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE)
}

fn gauge(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheMetrics;

    #[test]
    fn test_render_snapshot() {
        let metrics = CacheMetrics::new();
        metrics.record_l1_hit();
        metrics.record_l2_hit();
        metrics.record_miss();
        metrics.update_l1_stats(2048, 3, 1);

        let exporter = PrometheusExporter::new().unwrap();
        exporter.observe(&metrics.snapshot());
        let text = exporter.render().unwrap();

        assert!(text.contains("tiercache_hits{tier=\"l1\"} 1"));
        assert!(text.contains("tiercache_misses 1"));
        assert!(text.contains("tiercache_size_bytes{tier=\"l1\"} 2048"));
        assert!(text.contains("# TYPE tiercache_hit_rate gauge"));
    }

    #[test]
    fn test_render_quota() {
        let exporter = PrometheusExporter::new().unwrap();
        exporter.observe_quota(&QuotaSnapshot {
            used_bytes: 10,
            quota_bytes: 100,
            item_count: 1,
            disk_bytes: None,
            source: "metadata".into(),
        });
        let text = exporter.render().unwrap();
        assert!(text.contains("tiercache_l2_quota_bytes 100"));
        assert!(text.contains("tiercache_l2_quota_used_bytes 10"));
    }

    #[test]
    fn test_gauge_saturates() {
        assert_eq!(gauge(u64::MAX), i64::MAX);
        assert_eq!(gauge(7), 7);
    }
}
