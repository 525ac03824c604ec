//! Job definitions for the scheduler.
//!
//! - `Job`: a queued unit of work with an opaque payload
//! - `JobSubmission`: the looser shape accepted from files and the CLI
//! - `JobState`: where a job is in its lifecycle
//! - `JobResult`: the record kept for a finished job

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageError;
use crate::storage::validate_job_id;

/// Default priority for jobs (0 is normal priority).
pub const DEFAULT_PRIORITY: i32 = 0;

/// A unit of work waiting in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier; also the queue file name.
    pub id: String,
    /// Higher values run first.
    #[serde(default)]
    pub priority: i32,
    /// Free-form kind label, used by executors to route work.
    #[serde(rename = "type", default)]
    pub type_tag: String,
    /// Opaque to the scheduler; interpreted by the executor.
    #[serde(default)]
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Creates a job with a fresh id and default priority.
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            id: generate_job_id(),
            priority: DEFAULT_PRIORITY,
            type_tag: String::new(),
            payload,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_type(mut self, type_tag: impl Into<String>) -> Self {
        self.type_tag = type_tag.into();
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        validate_job_id(&self.id)
    }

    /// How long ago the job was created.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }
}

/// Selection order: higher priority first, then older, then by id.
pub fn selection_order(a: &Job, b: &Job) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Fresh job id (32 lowercase hex characters).
pub fn generate_job_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// A job as written by hand or by a discovery collaborator. Missing fields
/// are filled in by [`JobSubmission::into_job`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSubmission {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(rename = "type", default)]
    pub type_tag: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl JobSubmission {
    pub fn into_job(self) -> Result<Job, StorageError> {
        let job = Job {
            id: self.id.unwrap_or_else(generate_job_id),
            priority: self.priority.unwrap_or(DEFAULT_PRIORITY),
            type_tag: self.type_tag.unwrap_or_default(),
            payload: self.payload,
            created_at: self.created_at.unwrap_or_else(Utc::now),
        };
        job.validate()?;
        Ok(job)
    }
}

/// Lifecycle of a job inside one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Selected,
    Executing,
    Completed,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::TimedOut
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Selected => write!(f, "selected"),
            JobState::Executing => write!(f, "executing"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
            JobState::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// Record of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub state: JobState,
    #[serde(default)]
    pub error: Option<String>,
    /// Number of artifacts written.
    #[serde(default)]
    pub artifacts: usize,
    /// Requested files that produced nothing.
    #[serde(default)]
    pub skipped: Vec<String>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl JobResult {
    pub fn success(
        job_id: impl Into<String>,
        artifacts: usize,
        skipped: Vec<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            state: JobState::Completed,
            error: None,
            artifacts,
            skipped,
            completed_at: Utc::now(),
            duration_ms,
        }
    }

    pub fn failure(job_id: impl Into<String>, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            job_id: job_id.into(),
            state: JobState::Failed,
            error: Some(error.into()),
            artifacts: 0,
            skipped: Vec::new(),
            completed_at: Utc::now(),
            duration_ms,
        }
    }

    pub fn timeout(job_id: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            job_id: job_id.into(),
            state: JobState::TimedOut,
            error: Some("Job execution timed out".to_string()),
            artifacts: 0,
            skipped: Vec::new(),
            completed_at: Utc::now(),
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == JobState::Completed
    }
}
