//! High-level recording interface over the raw Prometheus statics.

use super::prometheus::{
    EXTRACTIONS_TOTAL, FILES_SKIPPED_TOTAL, GENERATION_LATENCY, GENERATION_REQUESTS_TOTAL,
    GENERATION_TOKENS_TOTAL, JOBS_IN_PROGRESS, JOBS_TOTAL, JOB_DURATION, QUEUE_DEPTH,
    TICKS_SKIPPED,
};
use crate::llm::Usage;

/// Metrics collector for recording artifact-forge operational metrics.
///
/// Every method is a no-op until [`super::init_metrics`] has run.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a finished job.
    ///
    /// # Arguments
    ///
    /// * `outcome` - "completed", "failed" or "timed_out"
    /// * `duration_secs` - Wall-clock time from lock acquisition to release
    pub fn record_job(&self, outcome: &str, duration_secs: f64) {
        if let Some(jobs_total) = JOBS_TOTAL.get() {
            jobs_total.with_label_values(&[outcome]).inc();
        }

        if let Some(job_duration) = JOB_DURATION.get() {
            job_duration
                .with_label_values(&[outcome])
                .observe(duration_secs);
        }

        tracing::trace!(
            outcome = outcome,
            duration_secs = duration_secs,
            "Recorded job metric"
        );
    }

    /// Record one generation attempt.
    pub fn record_generation(
        &self,
        client: &str,
        outcome: &str,
        latency_secs: f64,
        usage: Option<&Usage>,
    ) {
        if let Some(requests) = GENERATION_REQUESTS_TOTAL.get() {
            requests.with_label_values(&[client, outcome]).inc();
        }

        if let Some(latency) = GENERATION_LATENCY.get() {
            latency.with_label_values(&[client]).observe(latency_secs);
        }

        if let (Some(tokens), Some(usage)) = (GENERATION_TOKENS_TOTAL.get(), usage) {
            tokens
                .with_label_values(&[client, "input"])
                .inc_by(usage.prompt_tokens as f64);
            tokens
                .with_label_values(&[client, "output"])
                .inc_by(usage.completion_tokens as f64);
        }
    }

    pub fn record_file_skipped(&self, reason: &str) {
        if let Some(skipped) = FILES_SKIPPED_TOTAL.get() {
            skipped.with_label_values(&[reason]).inc();
        }
    }

    pub fn record_extraction(&self, strategy: &str) {
        if let Some(extractions) = EXTRACTIONS_TOTAL.get() {
            extractions.with_label_values(&[strategy]).inc();
        }
    }

    pub fn record_tick_skipped(&self) {
        if let Some(skipped) = TICKS_SKIPPED.get() {
            skipped.inc();
        }
    }

    /// Update the queue depth gauges.
    pub fn set_queue_depth(&self, queued: usize, retired: usize) {
        if let Some(depth) = QUEUE_DEPTH.get() {
            depth.with_label_values(&["queued"]).set(queued as f64);
            depth.with_label_values(&["retired"]).set(retired as f64);
        }
    }

    pub fn set_job_in_progress(&self, running: bool) {
        if let Some(gauge) = JOBS_IN_PROGRESS.get() {
            gauge.set(if running { 1.0 } else { 0.0 });
        }
    }
}
