//! Multi-file artifact generation on top of [`crate::llm::GenerationClient`].
//!
//! - [`types`]: artifacts, requested files and the per-set report
//! - [`content_start`]: narration vs. file-content heuristics
//! - [`coordinator`]: one request per file, with a single stricter retry

pub mod content_start;
pub mod coordinator;
pub mod types;

pub use content_start::{looks_like_content_start, strip_preamble, Stripped};
pub use coordinator::{CoordinatorConfig, FileCoordinator};
pub use types::{
    Artifact, ArtifactSet, FileFailure, FileSpec, GenerationReport, SkippedFile,
};
