//! Metrics module for Prometheus-based monitoring.
//!
//! Covers job execution, generation traffic, per-file skips and queue depth.
//!
//! # Example
//!
//! ```ignore
//! use artifact_forge::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics()?;
//! MetricsCollector::new().record_job("completed", 312.0);
//! println!("{}", export_metrics());
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    EXTRACTIONS_TOTAL, FILES_SKIPPED_TOTAL, GENERATION_LATENCY, GENERATION_REQUESTS_TOTAL,
    GENERATION_TOKENS_TOTAL, JOBS_IN_PROGRESS, JOBS_TOTAL, JOB_DURATION, QUEUE_DEPTH, REGISTRY,
    TICKS_SKIPPED,
};
