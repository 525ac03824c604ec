//! Where new jobs come from.
//!
//! The discovery loop asks a [`JobSource`] for jobs, enqueues each one, then
//! acknowledges it so the source can forget about it. The built-in
//! [`InboxSource`] picks up JSON files dropped into a directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;

use super::job::{Job, JobSubmission};
use crate::error::SchedulerError;

/// Suffix given to inbox files that could not be parsed.
pub const REJECTED_SUFFIX: &str = ".rejected";

#[async_trait]
pub trait JobSource: Send + Sync {
    fn name(&self) -> &str;

    /// Jobs ready to be enqueued.
    async fn discover(&self) -> Result<Vec<Job>, SchedulerError>;

    /// Called once `job_id` is safely queued.
    async fn acknowledge(&self, _job_id: &str) -> Result<(), SchedulerError> {
        Ok(())
    }
}

/// Reads `*.json` job submissions from a directory.
///
/// A file stays in place until its job is acknowledged, so a crash between
/// discovery and enqueue only causes the job to be discovered again.
#[derive(Debug)]
pub struct InboxSource {
    dir: PathBuf,
    pending: Mutex<HashMap<String, PathBuf>>,
}

impl InboxSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn reject(&self, path: &Path, reason: &str) {
        tracing::warn!(file = %path.display(), reason = %reason, "Rejecting inbox file");
        let mut rejected = path.as_os_str().to_owned();
        rejected.push(REJECTED_SUFFIX);
        if let Err(e) = fs::rename(path, PathBuf::from(rejected)).await {
            tracing::error!(file = %path.display(), error = %e, "Failed to set aside inbox file");
        }
    }
}

#[async_trait]
impl JobSource for InboxSource {
    fn name(&self) -> &str {
        "inbox"
    }

    async fn discover(&self) -> Result<Vec<Job>, SchedulerError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SchedulerError::Discovery(e.to_string())),
        };

        let mut jobs = Vec::new();
        let mut pending = self.pending.lock().await;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SchedulerError::Discovery(e.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }
            let path = entry.path();

            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Failed to read inbox file");
                    continue;
                }
            };
            let mut submission: JobSubmission = match serde_json::from_slice(&bytes) {
                Ok(submission) => submission,
                Err(e) => {
                    self.reject(&path, &e.to_string()).await;
                    continue;
                }
            };
            if submission.id.is_none() {
                // Stable id across rediscovery of the same file.
                submission.id = Some(name.trim_end_matches(".json").to_string());
            }
            match submission.into_job() {
                Ok(job) => {
                    pending.insert(job.id.clone(), path);
                    jobs.push(job);
                }
                Err(e) => self.reject(&path, &e.to_string()).await,
            }
        }

        if !jobs.is_empty() {
            tracing::debug!(source = self.name(), count = jobs.len(), "Discovered jobs");
        }
        Ok(jobs)
    }

    async fn acknowledge(&self, job_id: &str) -> Result<(), SchedulerError> {
        let Some(path) = self.pending.lock().await.remove(job_id) else {
            return Ok(());
        };
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SchedulerError::Discovery(format!(
                "failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }
}
