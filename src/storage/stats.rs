//! Persistent run statistics and the daily job cap.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::fs::{read_json_opt, write_json_atomic};
use crate::error::StorageError;

/// Contents of `stats.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// UTC day the `jobs_today` counter belongs to.
    pub date: NaiveDate,
    /// Jobs completed on `date`.
    pub jobs_today: u32,
    #[serde(default)]
    pub total_completed: u64,
    #[serde(default)]
    pub total_failed: u64,
    #[serde(default)]
    pub total_timed_out: u64,
    #[serde(default)]
    pub last_job_at: Option<DateTime<Utc>>,
}

impl RunStats {
    fn fresh(today: NaiveDate) -> Self {
        Self {
            date: today,
            jobs_today: 0,
            total_completed: 0,
            total_failed: 0,
            total_timed_out: 0,
            last_job_at: None,
        }
    }
}

/// How a finished job is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTally {
    Completed,
    Failed,
    TimedOut,
}

/// File-backed statistics, cached in memory and rewritten on every change.
#[derive(Debug)]
pub struct StatsStore {
    path: PathBuf,
    state: Mutex<RunStats>,
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

impl StatsStore {
    /// Load `path`, or start fresh if it does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let stats = read_json_opt(&path)
            .await?
            .unwrap_or_else(|| RunStats::fresh(today()));
        Ok(Self {
            path,
            state: Mutex::new(stats),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> RunStats {
        self.state.lock().await.clone()
    }

    /// Reset the daily counter if the UTC date changed. Returns `true` when
    /// a rollover happened.
    pub async fn rollover(&self) -> Result<bool, StorageError> {
        self.rollover_to(today()).await
    }

    pub async fn rollover_to(&self, date: NaiveDate) -> Result<bool, StorageError> {
        let mut state = self.state.lock().await;
        if state.date == date {
            return Ok(false);
        }
        tracing::info!(
            previous = %state.date,
            jobs = state.jobs_today,
            "Daily job counter rolled over"
        );
        state.date = date;
        state.jobs_today = 0;
        write_json_atomic(&self.path, &*state).await?;
        Ok(true)
    }

    /// Whether another job may start today under `cap` (0 = unlimited).
    pub async fn under_daily_cap(&self, cap: u32) -> bool {
        if cap == 0 {
            return true;
        }
        let state = self.state.lock().await;
        state.date != today() || state.jobs_today < cap
    }

    /// Count a finished job. Only completed jobs count toward the daily cap.
    pub async fn record(&self, tally: JobTally) -> Result<RunStats, StorageError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        if state.date != now.date_naive() {
            state.date = now.date_naive();
            state.jobs_today = 0;
        }

        match tally {
            JobTally::Completed => {
                state.jobs_today += 1;
                state.total_completed += 1;
            }
            JobTally::Failed => state.total_failed += 1,
            JobTally::TimedOut => state.total_timed_out += 1,
        }
        state.last_job_at = Some(now);

        write_json_atomic(&self.path, &*state).await?;
        Ok(state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_missing_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let store = StatsStore::open(dir.path().join("stats.json")).await.unwrap();

        let stats = store.snapshot().await;
        assert_eq!(stats.jobs_today, 0);
        assert_eq!(stats.date, today());
        assert!(stats.last_job_at.is_none());
    }

    #[tokio::test]
    async fn test_record_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.json");
        let store = StatsStore::open(&path).await.unwrap();

        store.record(JobTally::Completed).await.unwrap();
        store.record(JobTally::Failed).await.unwrap();
        store.record(JobTally::TimedOut).await.unwrap();

        let reopened = StatsStore::open(&path).await.unwrap().snapshot().await;
        assert_eq!(reopened.jobs_today, 1);
        assert_eq!(reopened.total_completed, 1);
        assert_eq!(reopened.total_failed, 1);
        assert_eq!(reopened.total_timed_out, 1);
        assert!(reopened.last_job_at.is_some());
    }

    #[tokio::test]
    async fn test_daily_cap() {
        let dir = TempDir::new().unwrap();
        let store = StatsStore::open(dir.path().join("stats.json")).await.unwrap();

        assert!(store.under_daily_cap(2).await);
        store.record(JobTally::Completed).await.unwrap();
        assert!(store.under_daily_cap(2).await);
        store.record(JobTally::Failed).await.unwrap();
        assert!(store.under_daily_cap(2).await);
        store.record(JobTally::Completed).await.unwrap();
        assert!(!store.under_daily_cap(2).await);
        assert!(store.under_daily_cap(0).await);
    }

    #[tokio::test]
    async fn test_rollover_resets_daily_counter() {
        let dir = TempDir::new().unwrap();
        let store = StatsStore::open(dir.path().join("stats.json")).await.unwrap();
        store.record(JobTally::Completed).await.unwrap();

        assert!(!store.rollover().await.unwrap());

        let tomorrow = today().succ_opt().unwrap();
        assert!(store.rollover_to(tomorrow).await.unwrap());
        let stats = store.snapshot().await;
        assert_eq!(stats.jobs_today, 0);
        assert_eq!(stats.total_completed, 1);
        assert_eq!(stats.date, tomorrow);
    }
}
