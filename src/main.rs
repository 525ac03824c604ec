//! artifact-forge CLI entry point.
//!
//! Initializes logging and delegates to the CLI module for command handling.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// `--log-level` applies to this crate; dependencies (hyper, reqwest) stay
/// at `warn` unless `RUST_LOG` says otherwise.
fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(format!("warn,artifact_forge={}", level))
        .unwrap_or_else(|_| EnvFilter::new("warn,artifact_forge=info"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = artifact_forge::cli::parse_cli();

    // RUST_LOG > --log-level > info
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(&cli.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    artifact_forge::cli::run_with_cli(cli).await
}
