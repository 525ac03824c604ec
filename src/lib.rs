//! artifact-forge: multi-file artifact generation over a rate-limited
//! chat-completions endpoint, driven by a persistent job queue.
//!
//! The crate is layered bottom-up:
//!
//! - [`llm`]: the generation client (concurrency cap, minimum call spacing,
//!   retries with exponential backoff, per-call timeout)
//! - [`utils::artifact_extraction`]: recovers `{path, content}` records from
//!   messy model output
//! - [`generation`]: per-file generation with sibling context and a bundle
//!   fallback
//! - [`scheduler`]: file-backed job queue, one-at-a-time execution with a hard
//!   timeout, failure tracking and retirement
//! - [`storage`], [`config`], [`metrics`], [`cli`]: ambient plumbing

pub mod cli;
pub mod config;
pub mod error;
pub mod generation;
pub mod llm;
pub mod metrics;
pub mod scheduler;
pub mod storage;
pub mod utils;

pub use config::ForgeConfig;
pub use error::{ConfigError, ExecutionError, LlmError, SchedulerError, StorageError};
pub use generation::{Artifact, ArtifactSet, FileCoordinator, FileSpec};
pub use llm::{GenerationClient, GenerationRequest, GenerationResult, LlmProvider};
pub use scheduler::{Job, JobScheduler, SchedulerRunner, TickOutcome};
