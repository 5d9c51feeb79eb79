//! Error types for the tiered cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
///
/// The manager uses this to decide how a failure degrades: storage and remote
/// failures become misses at that tier, serialization failures reject the
/// single value involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Capacity could not be made available
    Capacity,
    /// Durable storage engine failure
    Storage,
    /// Remote tier failure (network, timeout)
    Remote,
    /// Value could not be converted to or from its stored form
    Serialization,
    /// Invalid configuration
    Config,
    /// Anything else
    Internal,
}

/// Errors that can occur in the tiered cache
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// LMDB engine error
    #[error("Storage engine error: {0}")]
    Storage(#[from] heed::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored record could not be decoded
    #[error("Corrupt record for key {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// Write rejected because the durable quota is exhausted
    #[error("Quota exceeded: need {required} bytes, {available} available")]
    QuotaExceeded { required: u64, available: u64 },

    /// JSON encoding/decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote tier reported a failure
    #[error("Remote tier unavailable: {0}")]
    RemoteUnavailable(String),

    /// Remote tier did not answer within the deadline
    #[error("Remote tier timed out after {timeout_ms}ms for key {key}")]
    RemoteTimeout { key: String, timeout_ms: u64 },

    // =========================================================================
    // Compression Errors
    // =========================================================================
    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// YAML configuration parse error
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::QuotaExceeded { .. } => ErrorKind::Capacity,
            Error::Storage(_) | Error::Io(_) | Error::Corrupt { .. } => ErrorKind::Storage,
            Error::DecompressionFailed { .. } => ErrorKind::Storage,
            Error::RemoteUnavailable(_) | Error::RemoteTimeout { .. } => ErrorKind::Remote,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::Config(_) | Error::ConfigParse(_) => ErrorKind::Config,
            Error::Metrics(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Internal(format!("blocking storage task failed: {}", e))
    }
}
