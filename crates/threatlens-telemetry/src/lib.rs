//! Threatlens Telemetry
//!
//! Metric names and in-process counters for the intelligence engine.
//!
//! Provides:
//! - Stable metric names for the `metrics` facade
//! - One-shot registration of metric descriptions
//! - Lock-free counters with point-in-time snapshots

pub mod metrics;

pub use crate::metrics::{describe_metrics, EngineMetrics, MetricsSnapshot};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::metrics::{describe_metrics, EngineMetrics, MetricsSnapshot};
}
