//! Prometheus metrics registration and export.
//!
//! All metrics live in process-wide `OnceLock` statics. Recording before
//! [`init_metrics`] is a silent no-op, which keeps library users and unit
//! tests free of any setup.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all artifact-forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total number of jobs executed, labeled by outcome.
pub static JOBS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Job execution duration in seconds, labeled by outcome.
pub static JOB_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Number of jobs on disk, labeled by state (queued/retired).
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// 1 while a job holds the execution lock.
pub static JOBS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Execution ticks skipped because a job was already running.
pub static TICKS_SKIPPED: OnceLock<Counter> = OnceLock::new();

/// Generation attempts, labeled by client and outcome.
pub static GENERATION_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Generation attempt latency in seconds, labeled by client.
pub static GENERATION_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Tokens consumed, labeled by client and type (input/output).
pub static GENERATION_TOKENS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Files given up on after their retry, labeled by reason.
pub static FILES_SKIPPED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Successful extractions, labeled by the strategy that produced them.
pub static EXTRACTIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Safe to call more than once; later calls leave the first registry in
/// place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    // Job metrics
    let jobs_total = CounterVec::new(
        Opts::new("artifact_forge_jobs_total", "Total number of jobs executed"),
        &["outcome"],
    )?;

    let job_duration = HistogramVec::new(
        HistogramOpts::new(
            "artifact_forge_job_duration_seconds",
            "Job execution duration in seconds",
        )
        .buckets(vec![30.0, 60.0, 120.0, 300.0, 600.0, 900.0, 1500.0]),
        &["outcome"],
    )?;

    let queue_depth = GaugeVec::new(
        Opts::new("artifact_forge_queue_depth", "Number of jobs in the queue"),
        &["state"],
    )?;

    let jobs_in_progress = Gauge::new(
        "artifact_forge_jobs_in_progress",
        "Number of jobs currently executing",
    )?;

    let ticks_skipped = Counter::new(
        "artifact_forge_ticks_skipped_total",
        "Execution ticks skipped because a job was running",
    )?;

    // Generation metrics
    let generation_requests_total = CounterVec::new(
        Opts::new(
            "artifact_forge_generation_requests_total",
            "Total generation attempts",
        ),
        &["client", "outcome"],
    )?;

    let generation_latency = HistogramVec::new(
        HistogramOpts::new(
            "artifact_forge_generation_latency_seconds",
            "Generation attempt latency in seconds",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 180.0, 600.0, 900.0]),
        &["client"],
    )?;

    let generation_tokens_total = CounterVec::new(
        Opts::new("artifact_forge_generation_tokens_total", "Total tokens used"),
        &["client", "type"],
    )?;

    let files_skipped_total = CounterVec::new(
        Opts::new(
            "artifact_forge_files_skipped_total",
            "Files skipped after exhausting their retry",
        ),
        &["reason"],
    )?;

    let extractions_total = CounterVec::new(
        Opts::new(
            "artifact_forge_extractions_total",
            "Artifact extractions by winning strategy",
        ),
        &["strategy"],
    )?;

    registry.register(Box::new(jobs_total.clone()))?;
    registry.register(Box::new(job_duration.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(jobs_in_progress.clone()))?;
    registry.register(Box::new(ticks_skipped.clone()))?;
    registry.register(Box::new(generation_requests_total.clone()))?;
    registry.register(Box::new(generation_latency.clone()))?;
    registry.register(Box::new(generation_tokens_total.clone()))?;
    registry.register(Box::new(files_skipped_total.clone()))?;
    registry.register(Box::new(extractions_total.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = JOBS_TOTAL.set(jobs_total);
    let _ = JOB_DURATION.set(job_duration);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = JOBS_IN_PROGRESS.set(jobs_in_progress);
    let _ = TICKS_SKIPPED.set(ticks_skipped);
    let _ = GENERATION_REQUESTS_TOTAL.set(generation_requests_total);
    let _ = GENERATION_LATENCY.set(generation_latency);
    let _ = GENERATION_TOKENS_TOTAL.set(generation_tokens_total);
    let _ = FILES_SKIPPED_TOTAL.set(files_skipped_total);
    let _ = EXTRACTIONS_TOTAL.set(extractions_total);

    tracing::info!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead of failing when the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
