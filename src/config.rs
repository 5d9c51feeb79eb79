//! Cache configuration
//!
//! One YAML document configures every tier:
//!
//! ```yaml
//! memory:
//!   max_size_bytes: 52428800
//! durable:
//!   path: ./data/tiercache
//!   quota_bytes: 104857600
//!   cleanup_threshold: 0.9
//! remote_timeout_ms: 2000
//! snapshot_interval_secs: 300
//! ttl_policy:
//!   default_ttl_seconds: 3600
//!   rules:
//!     - prefix: "user:"
//!       ttl_seconds: 3600
//!     - prefix: "realtime:"
//!       cacheable: false
//! ```
//!
//! Every field has a default; `durable: null` runs without the durable tier.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{
    DurableConfig, MemoryConfig, TtlPolicy, DEFAULT_REMOTE_TIMEOUT_MS,
    DEFAULT_SNAPSHOT_INTERVAL_SECS,
};
use crate::error::{Error, Result};

/// Configuration for a [`TieredCacheManager`](crate::cache::TieredCacheManager)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// L1 settings
    pub memory: MemoryConfig,
    /// L2 settings; `None` disables the durable tier
    pub durable: Option<DurableConfig>,
    /// Deadline for a single remote call
    pub remote_timeout_ms: u64,
    /// Period of the stats snapshot / L1 cleanup task
    pub snapshot_interval_secs: u64,
    /// Key category → TTL table
    pub ttl_policy: TtlPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory: MemoryConfig::default(),
            durable: Some(DurableConfig::default()),
            remote_timeout_ms: DEFAULT_REMOTE_TIMEOUT_MS,
            snapshot_interval_secs: DEFAULT_SNAPSHOT_INTERVAL_SECS,
            ttl_policy: TtlPolicy::default(),
        }
    }
}

impl CacheConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&raw)?;
        debug!(path = %path.display(), "Loaded cache configuration");
        Ok(config)
    }

    /// Check that all settings are usable
    pub fn validate(&self) -> Result<()> {
        if self.memory.max_size_bytes == 0 {
            return Err(Error::Config("memory.max_size_bytes must be > 0".into()));
        }
        if self.remote_timeout_ms == 0 {
            return Err(Error::Config("remote_timeout_ms must be > 0".into()));
        }
        if self.snapshot_interval_secs == 0 {
            return Err(Error::Config("snapshot_interval_secs must be > 0".into()));
        }
        if let Some(rule) = self.ttl_policy.rules.iter().find(|r| r.prefix.is_empty()) {
            return Err(Error::Config(format!(
                "ttl_policy rule with empty prefix (ttl {})",
                rule.ttl_seconds
            )));
        }
        if let Some(durable) = &self.durable {
            durable.validate()?;
        }
        Ok(())
    }

    /// Remote call deadline
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    /// Snapshot task period
    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }
}
