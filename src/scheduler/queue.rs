//! Directory-backed job queue.
//!
//! # Queue Structure
//!
//! - `{queue_dir}/<id>.json`: one file per queued job
//! - `{done_dir}/<id>.json`: the [`JobResult`] of every completed job
//!
//! Writes go through write-then-rename, so a crash leaves either the old or
//! the new record. Failed jobs stay in the queue; whether they are picked
//! again is decided by the failure tracker.

use std::path::{Path, PathBuf};

use tokio::fs;

use super::job::{selection_order, Job, JobResult};
use crate::error::StorageError;
use crate::storage::fs::{read_json_opt, write_json_atomic};
use crate::storage::validate_job_id;

/// Filesystem job queue.
#[derive(Debug, Clone)]
pub struct JobStore {
    queue_dir: PathBuf,
    done_dir: PathBuf,
}

impl JobStore {
    pub fn new(queue_dir: impl Into<PathBuf>, done_dir: impl Into<PathBuf>) -> Self {
        Self {
            queue_dir: queue_dir.into(),
            done_dir: done_dir.into(),
        }
    }

    pub fn queue_dir(&self) -> &Path {
        &self.queue_dir
    }

    pub fn done_dir(&self) -> &Path {
        &self.done_dir
    }

    fn queued_path(&self, job_id: &str) -> Result<PathBuf, StorageError> {
        validate_job_id(job_id)?;
        Ok(self.queue_dir.join(format!("{}.json", job_id)))
    }

    fn done_path(&self, job_id: &str) -> Result<PathBuf, StorageError> {
        validate_job_id(job_id)?;
        Ok(self.done_dir.join(format!("{}.json", job_id)))
    }

    /// All queued jobs in selection order.
    ///
    /// Unreadable records are logged and skipped so one corrupt file cannot
    /// stall the queue. Hidden files (in-progress writes) are ignored.
    pub async fn list_queued(&self) -> Result<Vec<Job>, StorageError> {
        let mut entries = match fs::read_dir(&self.queue_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut jobs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }

            let path = entry.path();
            match read_json_opt::<Job>(&path).await {
                Ok(Some(job)) => jobs.push(job),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Skipping unreadable job record");
                }
            }
        }

        jobs.sort_by(selection_order);
        Ok(jobs)
    }

    /// Number of queued jobs.
    pub async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.list_queued().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len().await? == 0)
    }

    pub async fn read(&self, job_id: &str) -> Result<Option<Job>, StorageError> {
        read_json_opt(&self.queued_path(job_id)?).await
    }

    pub async fn contains(&self, job_id: &str) -> Result<bool, StorageError> {
        Ok(fs::try_exists(self.queued_path(job_id)?).await?)
    }

    /// Add `job` to the queue, replacing any queued record with the same id.
    pub async fn enqueue(&self, job: &Job) -> Result<(), StorageError> {
        let path = self.queued_path(&job.id)?;
        write_json_atomic(&path, job).await?;
        tracing::debug!(job_id = %job.id, priority = job.priority, "Job enqueued");
        Ok(())
    }

    /// Remove a queued job. Returns `false` if it was not queued.
    pub async fn delete(&self, job_id: &str) -> Result<bool, StorageError> {
        match fs::remove_file(self.queued_path(job_id)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Record `result` under `done/` and drop the job from the queue.
    ///
    /// The result is written first: a crash in between leaves the job queued
    /// and it will simply run again.
    pub async fn complete(&self, job: &Job, result: &JobResult) -> Result<(), StorageError> {
        write_json_atomic(&self.done_path(&job.id)?, result).await?;
        if !self.delete(&job.id).await? {
            tracing::warn!(job_id = %job.id, "Completed job was no longer queued");
        }
        Ok(())
    }

    /// Result of a completed job, if any.
    pub async fn read_result(&self, job_id: &str) -> Result<Option<JobResult>, StorageError> {
        read_json_opt(&self.done_path(job_id)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::JobState;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> JobStore {
        JobStore::new(dir.path().join("queue"), dir.path().join("done"))
    }

    fn job(id: &str, priority: i32) -> Job {
        Job::new(serde_json::json!({"files": []}))
            .with_id(id)
            .with_priority(priority)
    }

    #[tokio::test]
    async fn test_missing_queue_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        assert!(store.list_queued().await.unwrap().is_empty());
        assert!(store.is_empty().await.unwrap());
        assert!(store.read("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enqueue_and_list_in_priority_order() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.enqueue(&job("low", 1)).await.unwrap();
        store.enqueue(&job("high", 50)).await.unwrap();
        store.enqueue(&job("mid", 10)).await.unwrap();

        let ids: Vec<String> = store
            .list_queued()
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec!["high", "mid", "low"]);
        assert!(store.contains("mid").await.unwrap());
        assert_eq!(store.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_enqueue_overwrites_existing() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.enqueue(&job("j", 1)).await.unwrap();
        store.enqueue(&job("j", 99)).await.unwrap();

        assert_eq!(store.len().await.unwrap(), 1);
        assert_eq!(store.read("j").await.unwrap().unwrap().priority, 99);
    }

    #[tokio::test]
    async fn test_corrupt_and_hidden_files_skipped() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.enqueue(&job("good", 0)).await.unwrap();

        let queue = dir.path().join("queue");
        std::fs::write(queue.join("bad.json"), "{truncated").unwrap();
        std::fs::write(queue.join(".good.json.abc.tmp"), "{}").unwrap();
        std::fs::write(queue.join("notes.txt"), "hi").unwrap();

        let jobs = store.list_queued().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "good");
    }

    #[tokio::test]
    async fn test_complete_moves_to_done() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let j = job("j1", 0);
        store.enqueue(&j).await.unwrap();

        let result = JobResult::success("j1", 3, Vec::new(), 42);
        store.complete(&j, &result).await.unwrap();

        assert!(!store.contains("j1").await.unwrap());
        let done = store.read_result("j1").await.unwrap().unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.artifacts, 3);
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.enqueue(&job("j1", 0)).await.unwrap();

        assert!(store.delete("j1").await.unwrap());
        assert!(!store.delete("j1").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_ids_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        assert!(matches!(
            store.read("../x").await,
            Err(StorageError::InvalidJobId(_))
        ));
        assert!(store.enqueue(&job("a/b", 0)).await.is_err());
    }
}
