//! Filesystem-backed persistence.
//!
//! Everything the daemon must remember across restarts lives in plain files
//! under the data directory, each rewritten with write-then-rename:
//!
//! - **Artifacts**: generated files per job plus a checksum manifest
//! - **Stats**: daily job counter and lifetime totals
//!
//! The job queue and failure records live in [`crate::scheduler`] but use the
//! same helpers from [`fs`].

pub mod artifacts;
pub mod fs;
pub mod stats;

pub use artifacts::{ArtifactManifest, ArtifactWriter, ManifestEntry, MANIFEST_FILE};
pub use stats::{JobTally, RunStats, StatsStore};

use crate::error::StorageError;

/// Maximum accepted job id length.
pub const MAX_JOB_ID_LEN: usize = 128;

/// Job ids become file and directory names, so they are restricted to
/// ASCII alphanumerics, `-` and `_`.
pub fn validate_job_id(id: &str) -> Result<(), StorageError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_JOB_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidJobId(id.to_string()))
    }
}
