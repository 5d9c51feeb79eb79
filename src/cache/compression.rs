//! Durable Payload Compression
//!
//! LZ4 block compression for L2 payloads, with automatic fallback to the raw
//! bytes when compression fails or does not shrink the payload. The algorithm
//! used is recorded in the record header flag byte.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Payload encodings understood by the durable tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionAlgorithm {
    /// Stored as-is
    #[default]
    None,
    /// LZ4 block with prepended length
    Lz4,
}

impl CompressionAlgorithm {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }

    /// Header flag byte
    #[inline]
    pub fn flag(&self) -> u8 {
        match self {
            CompressionAlgorithm::None => 0,
            CompressionAlgorithm::Lz4 => 1,
        }
    }

    /// Parse a header flag byte
    pub fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            0 => Some(CompressionAlgorithm::None),
            1 => Some(CompressionAlgorithm::Lz4),
            _ => None,
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Compression Configuration
// =============================================================================

/// Configuration for payload compression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Compress payloads at all
    pub enabled: bool,
    /// Minimum payload size to compress (smaller payloads are stored raw)
    pub min_size_bytes: u64,
    /// LZ4 high-compression level
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size_bytes: 1024,
            level: 4,
        }
    }
}

impl CompressionConfig {
    /// Never compress
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

// =============================================================================
// Payload Codec
// =============================================================================

/// Encodes and decodes durable payloads
#[derive(Debug, Clone, Default)]
pub struct PayloadCodec {
    config: CompressionConfig,
}

impl PayloadCodec {
    /// Create a codec from configuration
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Compress `data` if worthwhile.
    ///
    /// Returns (stored_bytes, algorithm_used). Never fails: any compression
    /// error falls back to the raw payload.
    pub fn encode(&self, data: Vec<u8>) -> (Vec<u8>, CompressionAlgorithm) {
        if !self.config.enabled || (data.len() as u64) < self.config.min_size_bytes {
            return (data, CompressionAlgorithm::None);
        }

        let mode = lz4::block::CompressionMode::HIGHCOMPRESSION(self.config.level);
        match lz4::block::compress(&data, Some(mode), true) {
            Ok(compressed) if compressed.len() < data.len() => {
                (compressed, CompressionAlgorithm::Lz4)
            }
            Ok(_) => (data, CompressionAlgorithm::None),
            Err(e) => {
                tracing::warn!("LZ4 compression failed, storing uncompressed: {}", e);
                (data, CompressionAlgorithm::None)
            }
        }
    }

    /// Restore the original payload
    pub fn decode(&self, data: &[u8], algorithm: CompressionAlgorithm) -> Result<Vec<u8>> {
        match algorithm {
            CompressionAlgorithm::None => Ok(data.to_vec()),
            CompressionAlgorithm::Lz4 => {
                lz4::block::decompress(data, None).map_err(|e| Error::DecompressionFailed {
                    algorithm: algorithm.name().into(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Get configuration
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }
}
