//! On-disk output for generated artifacts.
//!
//! Layout: `<base>/<job-id>/<artifact path>` plus a `.forge-manifest.json`
//! listing every written file with its size and SHA-256. The manifest is
//! written last, so its presence marks a complete output directory. Its
//! dotted name keeps it clear of project files such as a web-extension
//! `manifest.json`.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::fs::{compute_checksum, read_json_opt, write_atomic, write_json_atomic, TEMP_SUFFIX};
use super::validate_job_id;
use crate::error::StorageError;
use crate::generation::types::normalize_artifact_path;
use crate::generation::Artifact;

/// File name of the per-job manifest.
pub const MANIFEST_FILE: &str = ".forge-manifest.json";

/// One written file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub size_bytes: u64,
    pub sha256: String,
}

/// Summary of one job's output directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub job_id: String,
    pub generated_at: DateTime<Utc>,
    pub files: Vec<ManifestEntry>,
    /// Requested files that produced nothing.
    #[serde(default)]
    pub skipped: Vec<String>,
}

impl ArtifactManifest {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }
}

/// Writes artifacts below a base directory.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    base_path: PathBuf,
}

impl ArtifactWriter {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Output directory for `job_id`.
    pub fn job_dir(&self, job_id: &str) -> Result<PathBuf, StorageError> {
        validate_job_id(job_id)?;
        Ok(self.base_path.join(job_id))
    }

    /// Write every artifact, then the manifest.
    ///
    /// Every path is validated before the first write, so an unsafe or
    /// reserved path fails the call without touching the job directory.
    pub async fn write_set<'a, I>(
        &self,
        job_id: &str,
        artifacts: I,
        skipped: &[String],
    ) -> Result<ArtifactManifest, StorageError>
    where
        I: IntoIterator<Item = &'a Artifact>,
    {
        let dir = self.job_dir(job_id)?;

        let mut planned = Vec::new();
        for artifact in artifacts {
            let relative = normalize_artifact_path(&artifact.path)
                .ok_or_else(|| StorageError::InvalidArtifactPath(artifact.path.clone()))?;
            if relative == MANIFEST_FILE {
                return Err(StorageError::InvalidArtifactPath(relative));
            }
            planned.push((relative, artifact));
        }

        let mut files = Vec::with_capacity(planned.len());
        for (relative, artifact) in planned {
            let data = artifact.content.as_bytes();
            write_atomic(&dir.join(&relative), data).await?;
            files.push(ManifestEntry {
                path: relative,
                size_bytes: data.len() as u64,
                sha256: compute_checksum(data),
            });
        }

        let manifest = ArtifactManifest {
            job_id: job_id.to_string(),
            generated_at: Utc::now(),
            files,
            skipped: skipped.to_vec(),
        };
        write_json_atomic(&dir.join(MANIFEST_FILE), &manifest).await?;

        tracing::info!(
            job_id = %job_id,
            files = manifest.files.len(),
            bytes = manifest.total_bytes(),
            dir = %dir.display(),
            "Artifacts written"
        );
        Ok(manifest)
    }

    /// Load the manifest of a finished job, if any.
    pub async fn read_manifest(
        &self,
        job_id: &str,
    ) -> Result<Option<ArtifactManifest>, StorageError> {
        read_json_opt(&self.job_dir(job_id)?.join(MANIFEST_FILE)).await
    }

    /// Delete temp files older than `max_age` left behind by interrupted
    /// writes. Blocking; run it on a blocking thread.
    pub fn sweep_stale_temp_files(&self, max_age: Duration) -> Result<usize, StorageError> {
        if !self.base_path.exists() {
            return Ok(0);
        }

        let now = SystemTime::now();
        let mut removed = 0;

        for entry in WalkDir::new(&self.base_path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let name = entry.file_name().to_string_lossy();
            if !(name.starts_with('.') && name.ends_with(TEMP_SUFFIX)) {
                continue;
            }
            let age = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age >= max_age {
                std::fs::remove_file(entry.path())?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(removed = removed, "Removed stale temp files");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn artifact(path: &str, content: &str) -> Artifact {
        Artifact {
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_write_set_and_manifest() {
        let dir = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(dir.path());
        let artifacts = vec![
            artifact("package.json", "{}"),
            artifact("src/app/page.tsx", "export default function Page() {}\n"),
        ];

        let manifest = writer
            .write_set("job-1", &artifacts, &["README.md".to_string()])
            .await
            .unwrap();

        assert_eq!(manifest.files.len(), 2);
        assert_eq!(manifest.skipped, vec!["README.md"]);
        assert_eq!(manifest.files[0].sha256, compute_checksum(b"{}"));
        assert_eq!(manifest.total_bytes(), 2 + 34);

        let page = dir.path().join("job-1/src/app/page.tsx");
        assert_eq!(
            std::fs::read_to_string(page).unwrap(),
            "export default function Page() {}\n"
        );

        let loaded = writer.read_manifest("job-1").await.unwrap();
        assert_eq!(loaded, Some(manifest));
    }

    #[tokio::test]
    async fn test_write_set_rejects_escaping_paths() {
        let dir = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(dir.path().join("out"));

        let result = writer
            .write_set("job-1", &[artifact("../../evil.sh", "x")], &[])
            .await;
        assert!(matches!(result, Err(StorageError::InvalidArtifactPath(_))));
        assert!(!dir.path().join("evil.sh").exists());

        let result = writer
            .write_set("job-1", &[artifact(MANIFEST_FILE, "{}")], &[])
            .await;
        assert!(matches!(result, Err(StorageError::InvalidArtifactPath(_))));
    }

    #[tokio::test]
    async fn test_project_manifest_json_is_an_ordinary_artifact() {
        let dir = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(dir.path());
        let artifacts = vec![
            artifact("popup.html", "<p>hi</p>"),
            artifact("manifest.json", "{\"manifest_version\": 3}"),
        ];

        let manifest = writer.write_set("ext", &artifacts, &[]).await.unwrap();
        assert_eq!(manifest.files.len(), 2);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("ext/manifest.json")).unwrap(),
            "{\"manifest_version\": 3}"
        );
        assert_eq!(writer.read_manifest("ext").await.unwrap(), Some(manifest));
    }

    #[tokio::test]
    async fn test_invalid_path_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(dir.path());
        let artifacts = vec![
            artifact("popup.html", "<p>hi</p>"),
            artifact("../outside.js", "x"),
        ];

        let result = writer.write_set("ext", &artifacts, &[]).await;
        assert!(matches!(result, Err(StorageError::InvalidArtifactPath(_))));
        assert!(!dir.path().join("ext").exists());
    }

    #[tokio::test]
    async fn test_invalid_job_id_rejected() {
        let dir = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(dir.path());

        let result = writer.write_set("../x", &[artifact("a", "b")], &[]).await;
        assert!(matches!(result, Err(StorageError::InvalidJobId(_))));
    }

    #[tokio::test]
    async fn test_read_manifest_missing() {
        let dir = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(dir.path());
        assert!(writer.read_manifest("nope").await.unwrap().is_none());
    }

    #[test]
    fn test_sweep_stale_temp_files() {
        let dir = TempDir::new().unwrap();
        let job_dir = dir.path().join("job-1/src");
        std::fs::create_dir_all(&job_dir).unwrap();
        std::fs::write(job_dir.join(".main.rs.abc123.tmp"), "partial").unwrap();
        std::fs::write(job_dir.join("main.rs"), "fn main() {}").unwrap();

        let writer = ArtifactWriter::new(dir.path());
        assert_eq!(writer.sweep_stale_temp_files(Duration::from_secs(3600)).unwrap(), 0);
        assert_eq!(writer.sweep_stale_temp_files(Duration::ZERO).unwrap(), 1);
        assert!(job_dir.join("main.rs").exists());
        assert!(!job_dir.join(".main.rs.abc123.tmp").exists());
    }
}
