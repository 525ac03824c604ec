//! The execution tick.
//!
//! One tick selects at most one job and runs it to completion, failure or
//! timeout. Jobs are strictly serialized by an atomic execution lock: a tick
//! that finds the lock held returns [`TickOutcome::Busy`] at once instead of
//! waiting.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::executor::JobExecutor;
use super::failure_tracker::FailureTracker;
use super::job::{Job, JobResult, JobState};
use super::queue::JobStore;
use crate::error::{ExecutionError, SchedulerError};
use crate::metrics::MetricsCollector;
use crate::storage::{JobTally, StatsStore};

/// Default wall-clock limit for one job.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(25 * 60);

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub job_timeout: Duration,
    /// Completed jobs allowed per UTC day; 0 disables the cap.
    pub daily_cap: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            job_timeout: DEFAULT_JOB_TIMEOUT,
            daily_cap: 0,
        }
    }
}

impl SchedulerConfig {
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_daily_cap(mut self, cap: u32) -> Self {
        self.daily_cap = cap;
        self
    }
}

/// What a tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Another job was executing; nothing was done.
    Busy,
    /// No selectable job.
    Idle,
    /// The daily job cap is exhausted.
    CapReached,
    /// A job ran.
    Ran(JobReport),
}

/// Result of the job a tick ran.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub job_id: String,
    pub state: JobState,
    pub error: Option<String>,
    /// Failure count after this run (0 on success).
    pub failures: u32,
    pub duration: Duration,
}

/// Holds the execution lock; releases it when dropped, including on panic
/// and when the tick future is cancelled.
struct ExecutionGuard<'a> {
    flag: &'a AtomicBool,
    metrics: MetricsCollector,
}

impl<'a> ExecutionGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool, metrics: MetricsCollector) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        metrics.set_job_in_progress(true);
        Some(Self { flag, metrics })
    }
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        self.metrics.set_job_in_progress(false);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Selects and runs queued jobs, one at a time.
pub struct JobScheduler {
    store: JobStore,
    tracker: Arc<FailureTracker>,
    executor: Arc<dyn JobExecutor>,
    stats: Option<Arc<StatsStore>>,
    config: SchedulerConfig,
    executing: AtomicBool,
    /// Job that failed on the most recent run; passed over once if another
    /// job is eligible.
    last_failed: Mutex<Option<String>>,
    metrics: MetricsCollector,
}

impl JobScheduler {
    pub fn new(
        store: JobStore,
        tracker: Arc<FailureTracker>,
        executor: Arc<dyn JobExecutor>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            tracker,
            executor,
            stats: None,
            config,
            executing: AtomicBool::new(false),
            last_failed: Mutex::new(None),
            metrics: MetricsCollector::new(),
        }
    }

    /// Persist daily counters and enforce `daily_cap`.
    pub fn with_stats(mut self, stats: Arc<StatsStore>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn tracker(&self) -> &Arc<FailureTracker> {
        &self.tracker
    }

    pub fn stats(&self) -> Option<&Arc<StatsStore>> {
        self.stats.as_ref()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::Acquire)
    }

    /// Highest-priority queued job that is not retired.
    ///
    /// A job that just failed is passed over in favour of the next eligible
    /// job, so one stuck job cannot monopolize consecutive ticks.
    pub async fn select_next(&self) -> Result<Option<Job>, SchedulerError> {
        let last_failed = self.last_failed.lock().await.clone();
        let mut deferred = None;

        for job in self.store.list_queued().await? {
            if self.tracker.is_retired(&job.id).await {
                continue;
            }
            if deferred.is_none() && last_failed.as_deref() == Some(job.id.as_str()) {
                deferred = Some(job);
                continue;
            }
            return Ok(Some(job));
        }
        Ok(deferred)
    }

    /// Run one execution tick.
    ///
    /// Job failures are recorded, not returned; an `Err` means the queue or
    /// a bookkeeping file could not be read or written.
    pub async fn tick(&self) -> Result<TickOutcome, SchedulerError> {
        let Some(_guard) = ExecutionGuard::try_acquire(&self.executing, self.metrics) else {
            tracing::debug!("Tick skipped, a job is still executing");
            self.metrics.record_tick_skipped();
            return Ok(TickOutcome::Busy);
        };

        if let Some(stats) = &self.stats {
            if !stats.under_daily_cap(self.config.daily_cap).await {
                tracing::debug!(cap = self.config.daily_cap, "Daily job cap reached");
                return Ok(TickOutcome::CapReached);
            }
        }

        let Some(job) = self.select_next().await? else {
            return Ok(TickOutcome::Idle);
        };

        let prior_failures = self.tracker.get(&job.id).await;
        tracing::info!(
            job_id = %job.id,
            priority = job.priority,
            job_type = %job.type_tag,
            failures = prior_failures,
            "Executing job"
        );

        let report = self.run(&job).await?;
        Ok(TickOutcome::Ran(report))
    }

    async fn run(&self, job: &Job) -> Result<JobReport, SchedulerError> {
        let started = Instant::now();
        let execution = AssertUnwindSafe(self.executor.execute(job)).catch_unwind();
        let outcome = tokio::time::timeout(self.config.job_timeout, execution).await;
        let duration = started.elapsed();
        let duration_ms = duration.as_millis() as u64;

        let result = match outcome {
            Ok(Ok(Ok(summary))) => {
                JobResult::success(&job.id, summary.artifacts, summary.skipped, duration_ms)
            }
            Ok(Ok(Err(e))) => JobResult::failure(&job.id, e.to_string(), duration_ms),
            Ok(Err(panic)) => {
                let err = ExecutionError::Panicked(panic_message(panic.as_ref()));
                JobResult::failure(&job.id, err.to_string(), duration_ms)
            }
            Err(_) => JobResult::timeout(&job.id, duration_ms),
        };

        self.metrics
            .record_job(&result.state.to_string(), duration.as_secs_f64());

        let failures = match result.state {
            JobState::Completed => {
                self.store.complete(job, &result).await?;
                self.tracker.reset(&job.id).await?;
                self.last_failed.lock().await.take();
                self.tally(JobTally::Completed).await?;
                tracing::info!(
                    job_id = %job.id,
                    artifacts = result.artifacts,
                    skipped = result.skipped.len(),
                    duration_ms = duration_ms,
                    "Job completed"
                );
                0
            }
            state => {
                *self.last_failed.lock().await = Some(job.id.clone());
                let failures = self.tracker.increment(&job.id).await?;
                let tally = if state == JobState::TimedOut {
                    JobTally::TimedOut
                } else {
                    JobTally::Failed
                };
                self.tally(tally).await?;
                tracing::warn!(
                    job_id = %job.id,
                    state = %state,
                    error = ?result.error,
                    failures = failures,
                    threshold = self.tracker.threshold(),
                    duration_ms = duration_ms,
                    "Job failed"
                );
                failures
            }
        };

        Ok(JobReport {
            job_id: job.id.clone(),
            state: result.state,
            error: result.error,
            failures,
            duration,
        })
    }

    async fn tally(&self, tally: JobTally) -> Result<(), SchedulerError> {
        if let Some(stats) = &self.stats {
            stats.record(tally).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("store", &self.store)
            .field("config", &self.config)
            .field("executing", &self.is_executing())
            .finish()
    }
}
