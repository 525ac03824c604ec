//! CLI command definitions for artifact-forge.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ForgeConfig;
use crate::generation::FileCoordinator;
use crate::llm::{GenerationClient, StreamingProvider};
use crate::metrics::{export_metrics, init_metrics, MetricsCollector};
use crate::scheduler::{
    FailureTracker, GenerationExecutor, InboxSource, JobScheduler, JobSource, JobStore,
    JobSubmission, SchedulerRunner, TickOutcome,
};
use crate::storage::{ArtifactWriter, StatsStore};

/// Multi-file artifact generator driven by a persistent job queue.
#[derive(Parser)]
#[command(name = "artifact-forge")]
#[command(about = "Generate multi-file artifacts from a persistent job queue")]
#[command(version)]
#[command(
    long_about = "artifact-forge drives a rate-limited chat-completions endpoint to generate \
multi-file projects, one job at a time, from a file-backed queue.\n\nExample usage:\n  \
FORGE_API_KEY=... artifact-forge run\n  artifact-forge enqueue job.json --priority 10"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// YAML configuration file; FORGE_* environment variables override it.
    #[arg(short, long, global = true, env = "FORGE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the discovery, execution and housekeeping loops until Ctrl-C.
    Run,

    /// Run a single execution tick and exit.
    Tick,

    /// Add a job file to the queue.
    Enqueue(EnqueueArgs),

    /// List queued jobs with their failure counts.
    #[command(alias = "ls")]
    Queue(QueueArgs),

    /// Inspect or reset failure records.
    Failures(FailuresArgs),

    /// Print a queue-depth snapshot in Prometheus text format.
    ///
    /// Job and generation counters live in the daemon process and are not
    /// visible here.
    Metrics,
}

#[derive(clap::Args)]
pub struct EnqueueArgs {
    /// JSON job file (`{"id", "priority", "type", "payload"}`; all optional).
    pub file: PathBuf,

    /// Override the job priority.
    #[arg(short, long)]
    pub priority: Option<i32>,

    /// Override the job id.
    #[arg(long)]
    pub id: Option<String>,
}

#[derive(clap::Args)]
pub struct QueueArgs {
    /// Output as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

#[derive(clap::Args)]
pub struct FailuresArgs {
    #[command(subcommand)]
    pub command: FailuresSubcommand,
}

#[derive(clap::Subcommand)]
pub enum FailuresSubcommand {
    /// Show every recorded failure count.
    List,
    /// Clear failure records so retired jobs become selectable again.
    Reset {
        /// Only reset this job.
        #[arg(long)]
        job: Option<String>,
    },
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and
/// `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run => run_daemon(config).await,
        Commands::Tick => run_tick(config).await,
        Commands::Enqueue(args) => run_enqueue(config, args).await,
        Commands::Queue(args) => run_queue(config, args).await,
        Commands::Failures(args) => run_failures(config, args).await,
        Commands::Metrics => run_metrics(config).await,
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ForgeConfig> {
    let config = match path {
        Some(path) => ForgeConfig::from_yaml_file(path)?,
        None => ForgeConfig::from_env()?,
    };
    Ok(config)
}

// ============================================================================
// Wiring
// ============================================================================

fn job_store(config: &ForgeConfig) -> JobStore {
    JobStore::new(config.queue_dir(), config.done_dir())
}

async fn failure_tracker(config: &ForgeConfig) -> anyhow::Result<Arc<FailureTracker>> {
    let tracker = FailureTracker::open(config.failures_file(), config.retire_threshold).await?;
    Ok(Arc::new(tracker))
}

fn generation_client(config: &ForgeConfig, name: &str, api_key: &str) -> Arc<GenerationClient> {
    let provider = StreamingProvider::with_custom_url(
        api_key.to_string(),
        config.base_url.clone(),
        config.model.clone(),
    )
    .with_streaming(config.stream);
    info!(
        client = name,
        model = %config.model,
        api_key = %provider.api_key_masked(),
        streaming = config.stream,
        "Generation client configured"
    );
    Arc::new(GenerationClient::new(
        Arc::new(provider),
        config.client_config(name),
    ))
}

fn file_coordinator(config: &ForgeConfig) -> anyhow::Result<FileCoordinator> {
    let primary = generation_client(config, "primary", config.require_api_key()?);
    let mut coordinator = FileCoordinator::new(primary, config.coordinator_config());

    if let Some(key) = config.secondary_api_key.as_deref().filter(|k| !k.is_empty()) {
        coordinator = coordinator.with_client(generation_client(config, "secondary", key));
    }
    Ok(coordinator)
}

async fn build_scheduler(
    config: &ForgeConfig,
) -> anyhow::Result<(Arc<JobScheduler>, ArtifactWriter)> {
    let writer = ArtifactWriter::new(config.output_dir());
    let executor = GenerationExecutor::new(Arc::new(file_coordinator(config)?), writer.clone())
        .with_min_success_ratio(config.min_success_ratio);
    let stats = StatsStore::open(config.stats_file()).await?;

    let scheduler = JobScheduler::new(
        job_store(config),
        failure_tracker(config).await?,
        Arc::new(executor),
        config.scheduler_config(),
    )
    .with_stats(Arc::new(stats));

    Ok((Arc::new(scheduler), writer))
}

// ============================================================================
// Commands
// ============================================================================

async fn run_daemon(config: ForgeConfig) -> anyhow::Result<()> {
    init_metrics()?;
    let (scheduler, writer) = build_scheduler(&config).await?;
    let sources: Vec<Arc<dyn JobSource>> = vec![Arc::new(InboxSource::new(config.inbox_dir()))];

    info!(
        data_dir = %config.data_dir.display(),
        job_timeout_secs = config.job_timeout.as_secs(),
        retire_threshold = config.retire_threshold,
        max_jobs_per_day = config.max_jobs_per_day,
        "Starting artifact-forge"
    );

    let mut runner = SchedulerRunner::new(scheduler, config.runner_config())
        .with_sources(sources)
        .with_artifact_writer(writer);
    runner.start()?;

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, shutting down");

    if let Err(e) = runner.shutdown().await {
        warn!(error = %e, "Scheduler did not stop cleanly");
    }
    Ok(())
}

async fn run_tick(config: ForgeConfig) -> anyhow::Result<()> {
    init_metrics()?;
    let (scheduler, _) = build_scheduler(&config).await?;

    match scheduler.tick().await? {
        TickOutcome::Ran(report) => {
            println!(
                "{}: {} after {:.1}s (failures: {})",
                report.job_id,
                report.state,
                report.duration.as_secs_f64(),
                report.failures
            );
            if let Some(error) = report.error {
                println!("  error: {}", error);
            }
        }
        TickOutcome::Idle => println!("No selectable job in the queue"),
        TickOutcome::CapReached => println!("Daily job cap reached"),
        TickOutcome::Busy => println!("Another job is executing"),
    }
    Ok(())
}

async fn run_enqueue(config: ForgeConfig, args: EnqueueArgs) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&args.file)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", args.file.display(), e))?;
    let mut submission: JobSubmission = serde_json::from_str(&text)
        .map_err(|e| anyhow::anyhow!("Invalid job file {}: {}", args.file.display(), e))?;

    if args.id.is_some() {
        submission.id = args.id;
    }
    if args.priority.is_some() {
        submission.priority = args.priority;
    }
    let job = submission.into_job()?;

    let store = job_store(&config);
    let replaced = store.contains(&job.id).await?;
    store.enqueue(&job).await?;

    if replaced {
        println!("Replaced queued job {} (priority {})", job.id, job.priority);
    } else {
        println!("Enqueued job {} (priority {})", job.id, job.priority);
    }
    Ok(())
}

#[derive(Serialize)]
struct QueueRow {
    id: String,
    priority: i32,
    #[serde(rename = "type")]
    type_tag: String,
    failures: u32,
    retired: bool,
    created_at: chrono::DateTime<chrono::Utc>,
}

async fn run_queue(config: ForgeConfig, args: QueueArgs) -> anyhow::Result<()> {
    let store = job_store(&config);
    let tracker = failure_tracker(&config).await?;

    let mut rows = Vec::new();
    for job in store.list_queued().await? {
        let failures = tracker.get(&job.id).await;
        rows.push(QueueRow {
            retired: failures >= tracker.threshold(),
            failures,
            id: job.id,
            priority: job.priority,
            type_tag: job.type_tag,
            created_at: job.created_at,
        });
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("Queue is empty");
        return Ok(());
    }
    println!("{:<36} {:>8} {:>8}  {:<8} CREATED", "ID", "PRIORITY", "FAILURES", "STATUS");
    for row in rows {
        println!(
            "{:<36} {:>8} {:>8}  {:<8} {}",
            row.id,
            row.priority,
            row.failures,
            if row.retired { "retired" } else { "queued" },
            row.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

async fn run_failures(config: ForgeConfig, args: FailuresArgs) -> anyhow::Result<()> {
    let tracker = failure_tracker(&config).await?;

    match args.command {
        FailuresSubcommand::List => {
            let records = tracker.snapshot().await;
            if records.is_empty() {
                println!("No failures recorded");
            }
            for (id, count) in records {
                let marker = if count >= tracker.threshold() {
                    " (retired)"
                } else {
                    ""
                };
                println!("{}: {}{}", id, count, marker);
            }
        }
        FailuresSubcommand::Reset { job: Some(job) } => {
            if tracker.reset(&job).await? {
                println!("Reset failures for {}", job);
            } else {
                println!("No failures recorded for {}", job);
            }
        }
        FailuresSubcommand::Reset { job: None } => {
            let cleared = tracker.reset_all().await?;
            println!("Reset failures for {} job(s)", cleared);
        }
    }
    Ok(())
}

/// Queued jobs split into `(runnable, retired)`.
async fn queue_depth(config: &ForgeConfig) -> anyhow::Result<(usize, usize)> {
    let store = job_store(config);
    let tracker = failure_tracker(config).await?;
    let jobs = store.list_queued().await?;
    let mut retired = 0;
    for job in &jobs {
        if tracker.is_retired(&job.id).await {
            retired += 1;
        }
    }
    Ok((jobs.len() - retired, retired))
}

/// Only the queue gauges are filled in; the registry is fresh for this
/// process, so counters export at zero.
async fn run_metrics(config: ForgeConfig) -> anyhow::Result<()> {
    init_metrics()?;

    let (queued, retired) = queue_depth(&config).await?;
    MetricsCollector::new().set_queue_depth(queued, retired);

    print!("{}", export_metrics());
    Ok(())
}
