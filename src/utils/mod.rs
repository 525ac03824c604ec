//! Shared utility functions for artifact-forge.
//!
//! Currently this is artifact extraction from raw model responses.

pub mod artifact_extraction;

pub use artifact_extraction::{
    extract_artifacts, extract_artifacts_with_strategy, strip_trailing_commas, Extraction,
    ExtractionStrategy,
};
