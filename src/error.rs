//! Error types for artifact-forge operations.
//!
//! Defines error types for the major subsystems:
//! - LLM endpoint interactions (per-call, retried inside the generation client)
//! - Job scheduling and execution
//! - Filesystem-backed storage (job queue, failure records, artifacts)
//! - Configuration loading and validation

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: FORGE_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Endpoint returned an empty response")]
    EmptyResponse,

    #[error("Concurrency limiter closed")]
    LimiterClosed,
}

impl LlmError {
    /// Whether another attempt might succeed.
    ///
    /// Transport failures, call timeouts, empty bodies, rate limiting and 5xx
    /// responses are transient. Any other status or an unparseable body fails
    /// the call immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RequestFailed(_)
            | LlmError::Timeout(_)
            | LlmError::EmptyResponse
            | LlmError::RateLimited(_) => true,
            LlmError::Api { status, .. } => *status >= 500 || *status == 429,
            LlmError::MissingApiKey | LlmError::ParseError(_) | LlmError::LimiterClosed => false,
        }
    }
}

/// Errors that can occur in the filesystem-backed stores.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Job '{0}' not found in queue")]
    JobNotFound(String),

    #[error("Invalid job id '{0}': must be non-empty and contain only alphanumeric characters, hyphens, and underscores")]
    InvalidJobId(String),

    #[error("Invalid artifact path '{0}'")]
    InvalidArtifactPath(String),
}

/// Errors raised while executing a single job.
///
/// Every variant is caught by the scheduler and recorded against the job's
/// failure count; none of them stops the process.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    #[error("Generation failed: {0}")]
    Generation(#[from] LlmError),

    #[error("Too few files generated: {produced} of {requested} (minimum ratio {min_ratio})")]
    InsufficientOutput {
        produced: usize,
        requested: usize,
        min_ratio: f64,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Job panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

/// Errors that can occur while driving the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Discovery failed: {0}")]
    Discovery(String),

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler is not running")]
    NotRunning,

    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid YAML.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(LlmError::RequestFailed("connection reset".to_string()).is_transient());
        assert!(LlmError::Timeout(Duration::from_secs(900)).is_transient());
        assert!(LlmError::EmptyResponse.is_transient());
        assert!(LlmError::RateLimited("slow down".to_string()).is_transient());
        assert!(LlmError::Api {
            status: 503,
            message: "unavailable".to_string()
        }
        .is_transient());
        assert!(LlmError::Api {
            status: 429,
            message: "too many".to_string()
        }
        .is_transient());

        assert!(!LlmError::Api {
            status: 401,
            message: "unauthorized".to_string()
        }
        .is_transient());
        assert!(!LlmError::ParseError("bad json".to_string()).is_transient());
        assert!(!LlmError::MissingApiKey.is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = LlmError::Api {
            status: 502,
            message: "bad gateway".to_string(),
        };
        assert!(err.to_string().contains("502"));
        assert!(err.to_string().contains("bad gateway"));

        let err = ExecutionError::InsufficientOutput {
            produced: 1,
            requested: 5,
            min_ratio: 0.5,
        };
        assert!(err.to_string().contains("1 of 5"));

        let err = StorageError::InvalidJobId("../etc".to_string());
        assert!(err.to_string().contains("../etc"));
    }
}
