//! The timed loops that drive the scheduler.
//!
//! - **Discovery**: asks every [`JobSource`] for new jobs and enqueues them
//! - **Execution**: spawns a [`JobScheduler::tick`] per interval; a tick that
//!   overlaps a running job returns `Busy` immediately
//! - **Housekeeping**: daily counter rollover, queue gauges, stale temp files
//!
//! Each loop runs as its own task and stops on a broadcast shutdown signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::engine::{JobScheduler, TickOutcome};
use super::source::JobSource;
use crate::error::SchedulerError;
use crate::metrics::MetricsCollector;
use crate::storage::ArtifactWriter;

/// Temp files older than this are considered abandoned.
const STALE_TEMP_AGE: Duration = Duration::from_secs(60 * 60);

/// Intervals of the scheduler loops.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    pub execution_interval: Duration,
    pub discovery_interval: Duration,
    pub housekeeping_interval: Duration,
    /// How long shutdown waits for a running job.
    pub shutdown_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            execution_interval: Duration::from_secs(60),
            discovery_interval: Duration::from_secs(5 * 60),
            housekeeping_interval: Duration::from_secs(10 * 60),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl RunnerConfig {
    pub fn with_execution_interval(mut self, interval: Duration) -> Self {
        self.execution_interval = interval;
        self
    }

    pub fn with_discovery_interval(mut self, interval: Duration) -> Self {
        self.discovery_interval = interval;
        self
    }

    pub fn with_housekeeping_interval(mut self, interval: Duration) -> Self {
        self.housekeeping_interval = interval;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Owns the loop tasks.
pub struct SchedulerRunner {
    config: RunnerConfig,
    scheduler: Arc<JobScheduler>,
    sources: Arc<Vec<Arc<dyn JobSource>>>,
    writer: Option<ArtifactWriter>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
    is_running: AtomicBool,
}

impl SchedulerRunner {
    pub fn new(scheduler: Arc<JobScheduler>, config: RunnerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            scheduler,
            sources: Arc::new(Vec::new()),
            writer: None,
            shutdown_tx,
            handles: Vec::new(),
            is_running: AtomicBool::new(false),
        }
    }

    pub fn with_sources(mut self, sources: Vec<Arc<dyn JobSource>>) -> Self {
        self.sources = Arc::new(sources);
        self
    }

    /// Output directory swept for abandoned temp files by housekeeping.
    pub fn with_artifact_writer(mut self, writer: ArtifactWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Spawn the three loops.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::AlreadyRunning` if the loops are running.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }

        self.handles.push(tokio::spawn(discovery_loop(
            Arc::clone(&self.scheduler),
            Arc::clone(&self.sources),
            self.config.discovery_interval,
            self.shutdown_tx.subscribe(),
        )));
        self.handles.push(tokio::spawn(execution_loop(
            Arc::clone(&self.scheduler),
            self.config.execution_interval,
            self.shutdown_tx.subscribe(),
        )));
        self.handles.push(tokio::spawn(housekeeping_loop(
            Arc::clone(&self.scheduler),
            self.writer.clone(),
            self.config.housekeeping_interval,
            self.shutdown_tx.subscribe(),
        )));

        self.is_running.store(true, Ordering::SeqCst);
        info!(
            execution_interval_secs = self.config.execution_interval.as_secs(),
            discovery_interval_secs = self.config.discovery_interval.as_secs(),
            sources = self.sources.len(),
            "Scheduler started"
        );
        Ok(())
    }

    /// Signal every loop to stop and wait for them, including a job that is
    /// still executing.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::ShutdownTimeout` if the loops do not stop
    /// within the configured timeout; they are aborted in that case.
    pub async fn shutdown(&mut self) -> Result<(), SchedulerError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(SchedulerError::NotRunning);
        }

        info!("Initiating scheduler shutdown");
        // Loops may already have stopped
        let _ = self.shutdown_tx.send(());

        let mut handles = std::mem::take(&mut self.handles);
        let wait = async {
            for handle in handles.iter_mut() {
                if let Err(e) = handle.await {
                    error!(error = %e, "Scheduler loop panicked during shutdown");
                }
            }
        };

        let result = tokio::time::timeout(self.config.shutdown_timeout, wait).await;
        self.is_running.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => {
                info!("Scheduler shutdown complete");
                Ok(())
            }
            Err(_) => {
                for handle in &handles {
                    handle.abort();
                }
                Err(SchedulerError::ShutdownTimeout(self.config.shutdown_timeout))
            }
        }
    }
}

impl Drop for SchedulerRunner {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// One discovery pass: enqueue everything the sources offer. Returns how
/// many jobs were enqueued.
pub async fn discover_once(scheduler: &JobScheduler, sources: &[Arc<dyn JobSource>]) -> usize {
    let mut enqueued = 0;

    for source in sources {
        let jobs = match source.discover().await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(source = source.name(), error = %e, "Job discovery failed");
                continue;
            }
        };

        for job in jobs {
            if let Err(e) = scheduler.store().enqueue(&job).await {
                error!(source = source.name(), job_id = %job.id, error = %e, "Failed to enqueue job");
                continue;
            }
            if let Err(e) = source.acknowledge(&job.id).await {
                warn!(source = source.name(), job_id = %job.id, error = %e, "Failed to acknowledge job");
            }
            info!(
                source = source.name(),
                job_id = %job.id,
                priority = job.priority,
                "Job enqueued"
            );
            enqueued += 1;
        }
    }

    enqueued
}

/// One housekeeping pass.
pub async fn housekeep_once(scheduler: &JobScheduler, writer: Option<&ArtifactWriter>) {
    if let Some(stats) = scheduler.stats() {
        if let Err(e) = stats.rollover().await {
            warn!(error = %e, "Failed to roll over daily stats");
        }
    }

    match scheduler.store().list_queued().await {
        Ok(jobs) => {
            let mut retired = 0;
            for job in &jobs {
                if scheduler.tracker().is_retired(&job.id).await {
                    retired += 1;
                }
            }
            MetricsCollector::new().set_queue_depth(jobs.len() - retired, retired);
            debug!(queued = jobs.len(), retired = retired, "Queue depth updated");
        }
        Err(e) => warn!(error = %e, "Failed to list queue"),
    }

    if let Some(writer) = writer.cloned() {
        let swept =
            tokio::task::spawn_blocking(move || writer.sweep_stale_temp_files(STALE_TEMP_AGE))
                .await;
        match swept {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "Temp file sweep failed"),
            Err(e) => error!(error = %e, "Temp file sweep panicked"),
        }
    }
}

async fn discovery_loop(
    scheduler: Arc<JobScheduler>,
    sources: Arc<Vec<Arc<dyn JobSource>>>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    if sources.is_empty() {
        debug!("No job sources configured, discovery loop idle");
    }
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                discover_once(&scheduler, &sources).await;
            }
        }
    }
    info!("Discovery loop stopped");
}

async fn execution_loop(
    scheduler: Arc<JobScheduler>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ticks = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                let scheduler = Arc::clone(&scheduler);
                ticks.spawn(async move { scheduler.tick().await });
            }
            Some(joined) = ticks.join_next(), if !ticks.is_empty() => {
                log_tick(joined);
            }
        }
    }

    if !ticks.is_empty() {
        info!("Waiting for the running job to finish");
    }
    while let Some(joined) = ticks.join_next().await {
        log_tick(joined);
    }
    info!("Execution loop stopped");
}

fn log_tick(joined: Result<Result<TickOutcome, SchedulerError>, tokio::task::JoinError>) {
    match joined {
        Ok(Ok(TickOutcome::Ran(report))) => debug!(
            job_id = %report.job_id,
            state = %report.state,
            "Tick finished"
        ),
        Ok(Ok(outcome)) => debug!(outcome = ?outcome, "Tick finished"),
        Ok(Err(e)) => error!(error = %e, "Tick failed"),
        Err(e) => error!(error = %e, "Tick task panicked"),
    }
}

async fn housekeeping_loop(
    scheduler: Arc<JobScheduler>,
    writer: Option<ArtifactWriter>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                housekeep_once(&scheduler, writer.as_ref()).await;
            }
        }
    }
    info!("Housekeeping loop stopped");
}
