//! Metrics module
//!
//! Exposes cache statistics to Prometheus.

mod exporter;

pub use exporter::PrometheusExporter;
