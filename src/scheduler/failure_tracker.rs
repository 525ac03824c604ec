//! Durable per-job failure counts.
//!
//! A job whose count reaches the retire threshold is never selected again
//! until its record is reset. Counts survive restarts in `failures.json`.
//!
//! The file is authoritative: every operation re-reads it under the lock, so
//! a `failures reset` from another process takes effect in a running daemon
//! and is not overwritten by the daemon's next write.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::storage::fs::{read_json_opt, write_json_atomic};

/// Default number of failures after which a job is retired.
pub const DEFAULT_RETIRE_THRESHOLD: u32 = 3;

type Records = BTreeMap<String, u32>;

#[derive(Debug)]
pub struct FailureTracker {
    path: PathBuf,
    threshold: u32,
    /// Last state seen on disk; used when the file cannot be read.
    records: Mutex<Records>,
}

impl FailureTracker {
    /// Load counts from `path` (missing file = no failures yet).
    pub async fn open(path: impl Into<PathBuf>, threshold: u32) -> Result<Self, StorageError> {
        let path = path.into();
        let records: Records = read_json_opt(&path).await?.unwrap_or_default();
        if !records.is_empty() {
            tracing::info!(
                jobs = records.len(),
                file = %path.display(),
                "Loaded failure records"
            );
        }
        Ok(Self {
            path,
            threshold: threshold.max(1),
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Replace the cached map with the file's content. A deleted file means
    /// every record was cleared; an unreadable one keeps the cache.
    async fn refresh(&self, records: &mut Records) {
        match read_json_opt::<Records>(&self.path).await {
            Ok(on_disk) => *records = on_disk.unwrap_or_default(),
            Err(e) => tracing::warn!(
                file = %self.path.display(),
                error = %e,
                "Failed to re-read failure records, using cached counts"
            ),
        }
    }

    /// Locked, freshly loaded records.
    async fn load(&self) -> tokio::sync::MutexGuard<'_, Records> {
        let mut records = self.records.lock().await;
        self.refresh(&mut records).await;
        records
    }

    pub async fn get(&self, job_id: &str) -> u32 {
        self.load().await.get(job_id).copied().unwrap_or(0)
    }

    /// Add one failure and persist before returning the new count.
    pub async fn increment(&self, job_id: &str) -> Result<u32, StorageError> {
        let mut records = self.load().await;
        let count = records.entry(job_id.to_string()).or_insert(0);
        *count += 1;
        let count = *count;
        write_json_atomic(&self.path, &*records).await?;

        if count >= self.threshold {
            tracing::warn!(
                job_id = %job_id,
                failures = count,
                threshold = self.threshold,
                "Job retired after repeated failures"
            );
        }
        Ok(count)
    }

    pub async fn is_retired(&self, job_id: &str) -> bool {
        self.get(job_id).await >= self.threshold
    }

    /// Forget every failure.
    pub async fn reset_all(&self) -> Result<usize, StorageError> {
        let mut records = self.load().await;
        let cleared = records.len();
        records.clear();
        write_json_atomic(&self.path, &*records).await?;
        Ok(cleared)
    }

    /// Forget the failures of one job. Returns whether it had any.
    pub async fn reset(&self, job_id: &str) -> Result<bool, StorageError> {
        let mut records = self.load().await;
        let existed = records.remove(job_id).is_some();
        if existed {
            write_json_atomic(&self.path, &*records).await?;
        }
        Ok(existed)
    }

    pub async fn snapshot(&self) -> BTreeMap<String, u32> {
        self.load().await.clone()
    }

    /// Ids of every retired job.
    pub async fn retired(&self) -> Vec<String> {
        self.load()
            .await
            .iter()
            .filter(|(_, count)| **count >= self.threshold)
            .map(|(id, _)| id.clone())
            .collect()
    }
}
