//! Scheduler behavior across restarts, timeouts and the background loops.

use std::sync::Arc;
use std::time::Duration;

use artifact_forge::error::ExecutionError;
use artifact_forge::scheduler::{
    ExecutionSummary, FailureTracker, InboxSource, Job, JobExecutor, JobScheduler, JobSource,
    JobState, JobStore, RunnerConfig, SchedulerConfig, SchedulerRunner, TickOutcome,
};
use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

/// Succeeds unless the job id says otherwise.
struct ByName;

#[async_trait]
impl JobExecutor for ByName {
    async fn execute(&self, job: &Job) -> Result<ExecutionSummary, ExecutionError> {
        if job.id.starts_with("hang") {
            std::future::pending::<()>().await;
        }
        if job.id.starts_with("fail") {
            return Err(ExecutionError::Other("model returned nothing useful".into()));
        }
        Ok(ExecutionSummary {
            artifacts: 3,
            skipped: Vec::new(),
        })
    }
}

async fn scheduler_in(dir: &TempDir, threshold: u32, timeout: Duration) -> Arc<JobScheduler> {
    let tracker = FailureTracker::open(dir.path().join("failures.json"), threshold)
        .await
        .unwrap();
    Arc::new(JobScheduler::new(
        JobStore::new(dir.path().join("queue"), dir.path().join("done")),
        Arc::new(tracker),
        Arc::new(ByName),
        SchedulerConfig::default().with_job_timeout(timeout),
    ))
}

async fn enqueue(scheduler: &JobScheduler, id: &str, priority: i32) {
    let job = Job::new(json!({"prompt": id}))
        .with_id(id)
        .with_priority(priority);
    scheduler.store().enqueue(&job).await.unwrap();
}

async fn run_one(scheduler: &JobScheduler) -> (String, JobState) {
    match scheduler.tick().await.unwrap() {
        TickOutcome::Ran(report) => (report.job_id, report.state),
        other => panic!("expected a run, got {:?}", other),
    }
}

#[tokio::test]
async fn test_lock_released_after_every_kind_of_outcome() {
    let dir = TempDir::new().unwrap();
    // Threshold 1 retires each failure so the three jobs run in priority order.
    let scheduler = scheduler_in(&dir, 1, Duration::from_millis(200)).await;
    enqueue(&scheduler, "hang-1", 30).await;
    enqueue(&scheduler, "fail-1", 20).await;
    enqueue(&scheduler, "ok-1", 10).await;

    assert_eq!(run_one(&scheduler).await, ("hang-1".to_string(), JobState::TimedOut));
    assert!(!scheduler.is_executing());

    assert_eq!(run_one(&scheduler).await, ("fail-1".to_string(), JobState::Failed));
    assert!(!scheduler.is_executing());

    assert_eq!(run_one(&scheduler).await, ("ok-1".to_string(), JobState::Completed));
    assert!(!scheduler.is_executing());

    assert_eq!(scheduler.tracker().get("hang-1").await, 1);
    assert_eq!(scheduler.tracker().get("fail-1").await, 1);
    assert_eq!(scheduler.store().len().await.unwrap(), 2);
    assert_eq!(scheduler.tick().await.unwrap(), TickOutcome::Idle);
}

#[tokio::test]
async fn test_retirement_survives_restart_until_reset() {
    let dir = TempDir::new().unwrap();
    {
        let scheduler = scheduler_in(&dir, 2, Duration::from_secs(5)).await;
        enqueue(&scheduler, "fail-forever", 5).await;
        run_one(&scheduler).await;
        run_one(&scheduler).await;
        assert!(scheduler.tracker().is_retired("fail-forever").await);
        assert_eq!(scheduler.tick().await.unwrap(), TickOutcome::Idle);
    }

    // A fresh process sees the same failure counts.
    let scheduler = scheduler_in(&dir, 2, Duration::from_secs(5)).await;
    enqueue(&scheduler, "ok-late", 0).await;
    assert_eq!(run_one(&scheduler).await.0, "ok-late");
    assert_eq!(scheduler.tick().await.unwrap(), TickOutcome::Idle);
    assert!(scheduler.store().contains("fail-forever").await.unwrap());

    assert_eq!(scheduler.tracker().reset_all().await.unwrap(), 1);
    assert_eq!(
        run_one(&scheduler).await,
        ("fail-forever".to_string(), JobState::Failed)
    );
}

#[tokio::test]
async fn test_runner_picks_up_inbox_jobs() {
    let dir = TempDir::new().unwrap();
    let inbox = dir.path().join("inbox");
    std::fs::create_dir_all(&inbox).unwrap();
    std::fs::write(
        inbox.join("landing-page.json"),
        r#"{"priority": 3, "payload": {"prompt": "landing page"}}"#,
    )
    .unwrap();
    std::fs::write(inbox.join("broken.json"), "{ not json").unwrap();

    let scheduler = scheduler_in(&dir, 3, Duration::from_secs(5)).await;
    let sources: Vec<Arc<dyn JobSource>> = vec![Arc::new(InboxSource::new(&inbox))];
    let config = RunnerConfig::default()
        .with_discovery_interval(Duration::from_millis(20))
        .with_execution_interval(Duration::from_millis(20))
        .with_housekeeping_interval(Duration::from_secs(60))
        .with_shutdown_timeout(Duration::from_secs(5));

    let mut runner = SchedulerRunner::new(Arc::clone(&scheduler), config).with_sources(sources);
    runner.start().unwrap();

    let done = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(result) = scheduler.store().read_result("landing-page").await.unwrap() {
                return result;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("job should complete");

    runner.shutdown().await.unwrap();
    assert!(!runner.is_running());

    assert_eq!(done.state, JobState::Completed);
    assert_eq!(done.artifacts, 3);
    assert!(!inbox.join("landing-page.json").exists());
    assert!(inbox.join("broken.json.rejected").exists());
}
