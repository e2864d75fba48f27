//! Telemetry
//!
//! Observability components for token lifecycle operations. Logging goes
//! through `tracing` directly; this module holds the metrics interface.

pub mod metrics;

pub use metrics::{
    create_in_memory_metrics, no_op_metrics, InMemoryMetrics, MetricEntry, MetricLabels,
    NoOpMetrics, TokenMetrics,
};
