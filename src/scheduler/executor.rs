//! Turning a job payload into written artifacts.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::job::Job;
use crate::error::ExecutionError;
use crate::generation::{FileCoordinator, FileSpec};
use crate::storage::{ArtifactManifest, ArtifactWriter};

/// Minimum fraction of requested files that must be produced by default.
pub const DEFAULT_MIN_SUCCESS_RATIO: f64 = 0.5;

/// What a successful execution produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSummary {
    pub artifacts: usize,
    pub skipped: Vec<String>,
}

impl From<&ArtifactManifest> for ExecutionSummary {
    fn from(manifest: &ArtifactManifest) -> Self {
        Self {
            artifacts: manifest.files.len(),
            skipped: manifest.skipped.clone(),
        }
    }
}

/// Runs one job. Any error counts as a failure of that job.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> Result<ExecutionSummary, ExecutionError>;
}

/// Payload understood by [`GenerationExecutor`].
///
/// With a file list each file is generated separately. Without one, `prompt`
/// is sent as a single bundle request and the answer is extracted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Shared description of the whole project.
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub files: Vec<FileSpec>,
    #[serde(default)]
    pub prompt: Option<String>,
}

impl JobPayload {
    pub fn from_job(job: &Job) -> Result<Self, ExecutionError> {
        let payload: JobPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| ExecutionError::InvalidPayload(e.to_string()))?;
        if payload.files.is_empty() && payload.prompt.as_deref().map_or(true, str::is_empty) {
            return Err(ExecutionError::InvalidPayload(
                "payload needs either `files` or `prompt`".to_string(),
            ));
        }
        Ok(payload)
    }
}

/// Generates the files a job asks for and writes them under the output
/// directory.
pub struct GenerationExecutor {
    coordinator: Arc<FileCoordinator>,
    writer: ArtifactWriter,
    min_success_ratio: f64,
}

impl GenerationExecutor {
    pub fn new(coordinator: Arc<FileCoordinator>, writer: ArtifactWriter) -> Self {
        Self {
            coordinator,
            writer,
            min_success_ratio: DEFAULT_MIN_SUCCESS_RATIO,
        }
    }

    /// Clamped to `[0.0, 1.0]`. A job with zero artifacts always fails.
    pub fn with_min_success_ratio(mut self, ratio: f64) -> Self {
        self.min_success_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn min_success_ratio(&self) -> f64 {
        self.min_success_ratio
    }

    pub fn writer(&self) -> &ArtifactWriter {
        &self.writer
    }

    async fn execute_files(
        &self,
        job: &Job,
        payload: &JobPayload,
    ) -> Result<ExecutionSummary, ExecutionError> {
        let report = self
            .coordinator
            .generate_set(&payload.files, &payload.context)
            .await;

        if report.produced() == 0 || report.success_ratio() < self.min_success_ratio {
            return Err(ExecutionError::InsufficientOutput {
                produced: report.produced(),
                requested: report.requested,
                min_ratio: self.min_success_ratio,
            });
        }

        let skipped: Vec<String> = report.skipped.iter().map(|s| s.path.clone()).collect();
        let manifest = self
            .writer
            .write_set(&job.id, report.artifacts.iter(), &skipped)
            .await?;
        Ok(ExecutionSummary::from(&manifest))
    }

    async fn execute_bundle(
        &self,
        job: &Job,
        payload: &JobPayload,
    ) -> Result<ExecutionSummary, ExecutionError> {
        let prompt = payload.prompt.as_deref().unwrap_or_default();
        let context = payload.context.trim();
        let full_prompt = if context.is_empty() {
            prompt.to_string()
        } else {
            format!("{}\n\n{}", context, prompt)
        };
        let artifacts = self.coordinator.generate_bundle(&full_prompt).await?;
        if artifacts.is_empty() {
            return Err(ExecutionError::InsufficientOutput {
                produced: 0,
                requested: 0,
                min_ratio: self.min_success_ratio,
            });
        }

        let manifest = self.writer.write_set(&job.id, &artifacts, &[]).await?;
        Ok(ExecutionSummary::from(&manifest))
    }
}

#[async_trait]
impl JobExecutor for GenerationExecutor {
    async fn execute(&self, job: &Job) -> Result<ExecutionSummary, ExecutionError> {
        let payload = JobPayload::from_job(job)?;

        if payload.files.is_empty() {
            self.execute_bundle(job, &payload).await
        } else {
            self.execute_files(job, &payload).await
        }
    }
}
