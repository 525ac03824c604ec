//! Job scheduling: a file-backed queue, one-at-a-time execution and
//! retirement of chronically failing jobs.
//!
//! - **JobStore**: one JSON file per queued job, completed jobs under `done/`
//! - **FailureTracker**: durable failure counts; retires a job at the threshold
//! - **JobScheduler**: the execution tick, guarded by an atomic lock and a
//!   hard per-job timeout
//! - **SchedulerRunner**: discovery, execution and housekeeping loops
//!
//! # Architecture
//!
//! ```text
//!   ┌────────────┐   discover    ┌───────────┐   tick    ┌──────────────┐
//!   │ JobSource  │ ────────────► │ JobStore  │ ────────► │ JobScheduler │
//!   │  (inbox)   │   enqueue     │  queue/   │  select   │  lock + run  │
//!   └────────────┘               └───────────┘           └──────┬───────┘
//!                                      ▲                        │
//!                               done/  │ complete     failure   ▼
//!                                      └──────────── FailureTracker
//! ```

pub mod engine;
pub mod executor;
pub mod failure_tracker;
pub mod job;
pub mod queue;
pub mod runner;
pub mod source;

pub use engine::{JobReport, JobScheduler, SchedulerConfig, TickOutcome, DEFAULT_JOB_TIMEOUT};
pub use executor::{ExecutionSummary, GenerationExecutor, JobExecutor, JobPayload};
pub use failure_tracker::{FailureTracker, DEFAULT_RETIRE_THRESHOLD};
pub use job::{Job, JobResult, JobState, JobSubmission};
pub use queue::JobStore;
pub use runner::{RunnerConfig, SchedulerRunner};
pub use source::{InboxSource, JobSource};
