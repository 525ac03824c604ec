//! Command-line interface for artifact-forge.
//!
//! Provides commands to run the scheduler, drive single ticks, manage the
//! queue and failure records, and dump metrics.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
