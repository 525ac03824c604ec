//! Runtime configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, an optional
//! YAML file, and `FORGE_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::generation::coordinator::{
    DEFAULT_BUNDLE_TOKENS, DEFAULT_PER_FILE_TOKENS, MAX_PER_FILE_TOKENS, MIN_PER_FILE_TOKENS,
};
use crate::generation::CoordinatorConfig;
use crate::llm::client::{
    DEFAULT_BASE_RETRY_DELAY, DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_RETRIES,
    DEFAULT_MIN_INTERVAL,
};
use crate::llm::providers::streaming::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::llm::types::DEFAULT_TEMPERATURE;
use crate::llm::ClientConfig;
use crate::scheduler::executor::DEFAULT_MIN_SUCCESS_RATIO;
use crate::scheduler::failure_tracker::DEFAULT_RETIRE_THRESHOLD;
use crate::scheduler::{RunnerConfig, SchedulerConfig, DEFAULT_JOB_TIMEOUT};

/// Environment variable holding the primary credential.
pub const API_KEY_ENV: &str = "FORGE_API_KEY";

/// Environment variable holding the optional second credential.
pub const SECONDARY_API_KEY_ENV: &str = "FORGE_SECONDARY_API_KEY";

/// Configuration for the whole daemon.
#[derive(Clone)]
pub struct ForgeConfig {
    // Endpoint
    /// Base URL of the chat-completions endpoint.
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    /// A second credential gets its own client, semaphore and rate limit.
    pub secondary_api_key: Option<String>,
    pub stream: bool,

    // Generation client
    pub max_concurrent: usize,
    /// Minimum gap between request starts on one client.
    pub min_interval: Duration,
    pub call_timeout: Duration,
    pub max_retries: u32,
    pub base_retry_delay: Duration,

    // Generation budgets
    pub per_file_max_tokens: u32,
    pub bundle_max_tokens: u32,
    pub temperature: f64,

    // Scheduling
    pub job_timeout: Duration,
    pub retire_threshold: u32,
    pub execution_interval: Duration,
    pub discovery_interval: Duration,
    pub housekeeping_interval: Duration,
    /// Completed jobs per UTC day; 0 means unlimited.
    pub max_jobs_per_day: u32,
    /// Fraction of requested files a job must produce to count as success.
    pub min_success_ratio: f64,

    // Storage
    /// Root for the queue, done, inbox, output and state files.
    pub data_dir: PathBuf,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        let runner = RunnerConfig::default();
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            secondary_api_key: None,
            stream: true,

            max_concurrent: DEFAULT_MAX_CONCURRENT,
            min_interval: DEFAULT_MIN_INTERVAL,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            base_retry_delay: DEFAULT_BASE_RETRY_DELAY,

            per_file_max_tokens: DEFAULT_PER_FILE_TOKENS,
            bundle_max_tokens: DEFAULT_BUNDLE_TOKENS,
            temperature: DEFAULT_TEMPERATURE,

            job_timeout: DEFAULT_JOB_TIMEOUT,
            retire_threshold: DEFAULT_RETIRE_THRESHOLD,
            execution_interval: runner.execution_interval,
            discovery_interval: runner.discovery_interval,
            housekeeping_interval: runner.housekeeping_interval,
            max_jobs_per_day: 0,
            min_success_ratio: DEFAULT_MIN_SUCCESS_RATIO,

            data_dir: PathBuf::from("./forge-data"),
        }
    }
}

impl std::fmt::Debug for ForgeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForgeConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field(
                "secondary_api_key",
                &self.secondary_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("stream", &self.stream)
            .field("max_concurrent", &self.max_concurrent)
            .field("min_interval", &self.min_interval)
            .field("call_timeout", &self.call_timeout)
            .field("max_retries", &self.max_retries)
            .field("job_timeout", &self.job_timeout)
            .field("retire_threshold", &self.retire_threshold)
            .field("max_jobs_per_day", &self.max_jobs_per_day)
            .field("data_dir", &self.data_dir)
            .finish_non_exhaustive()
    }
}

/// Shape of the YAML file. Every key is optional; durations are seconds.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    base_url: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    secondary_api_key: Option<String>,
    stream: Option<bool>,
    max_concurrent: Option<usize>,
    min_interval_secs: Option<u64>,
    call_timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    base_retry_delay_secs: Option<u64>,
    per_file_max_tokens: Option<u32>,
    bundle_max_tokens: Option<u32>,
    temperature: Option<f64>,
    job_timeout_secs: Option<u64>,
    retire_threshold: Option<u32>,
    execution_interval_secs: Option<u64>,
    discovery_interval_secs: Option<u64>,
    housekeeping_interval_secs: Option<u64>,
    max_jobs_per_day: Option<u32>,
    min_success_ratio: Option<f64>,
    data_dir: Option<PathBuf>,
}

impl FileConfig {
    fn apply(self, config: &mut ForgeConfig) {
        let secs = Duration::from_secs;
        if let Some(v) = self.base_url {
            config.base_url = v;
        }
        if let Some(v) = self.model {
            config.model = v;
        }
        if self.api_key.is_some() {
            config.api_key = self.api_key;
        }
        if self.secondary_api_key.is_some() {
            config.secondary_api_key = self.secondary_api_key;
        }
        if let Some(v) = self.stream {
            config.stream = v;
        }
        if let Some(v) = self.max_concurrent {
            config.max_concurrent = v;
        }
        if let Some(v) = self.min_interval_secs {
            config.min_interval = secs(v);
        }
        if let Some(v) = self.call_timeout_secs {
            config.call_timeout = secs(v);
        }
        if let Some(v) = self.max_retries {
            config.max_retries = v;
        }
        if let Some(v) = self.base_retry_delay_secs {
            config.base_retry_delay = secs(v);
        }
        if let Some(v) = self.per_file_max_tokens {
            config.per_file_max_tokens = v;
        }
        if let Some(v) = self.bundle_max_tokens {
            config.bundle_max_tokens = v;
        }
        if let Some(v) = self.temperature {
            config.temperature = v;
        }
        if let Some(v) = self.job_timeout_secs {
            config.job_timeout = secs(v);
        }
        if let Some(v) = self.retire_threshold {
            config.retire_threshold = v;
        }
        if let Some(v) = self.execution_interval_secs {
            config.execution_interval = secs(v);
        }
        if let Some(v) = self.discovery_interval_secs {
            config.discovery_interval = secs(v);
        }
        if let Some(v) = self.housekeeping_interval_secs {
            config.housekeeping_interval = secs(v);
        }
        if let Some(v) = self.max_jobs_per_day {
            config.max_jobs_per_day = v;
        }
        if let Some(v) = self.min_success_ratio {
            config.min_success_ratio = v;
        }
        if let Some(v) = self.data_dir {
            config.data_dir = v;
        }
    }
}

impl ForgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from defaults overridden by the environment.
    ///
    /// # Environment Variables
    ///
    /// - `FORGE_API_KEY` / `FORGE_SECONDARY_API_KEY`: credentials
    /// - `FORGE_BASE_URL`, `FORGE_MODEL`, `FORGE_STREAM`
    /// - `FORGE_MAX_CONCURRENT` (default: 2)
    /// - `FORGE_MIN_INTERVAL_SECS` (default: 5)
    /// - `FORGE_CALL_TIMEOUT_SECS` (default: 900)
    /// - `FORGE_MAX_RETRIES` (default: 3)
    /// - `FORGE_BASE_RETRY_DELAY_SECS` (default: 10)
    /// - `FORGE_PER_FILE_MAX_TOKENS` (default: 6500)
    /// - `FORGE_BUNDLE_MAX_TOKENS` (default: 16384)
    /// - `FORGE_TEMPERATURE` (default: 0.7)
    /// - `FORGE_JOB_TIMEOUT_SECS` (default: 1500)
    /// - `FORGE_RETIRE_THRESHOLD` (default: 3)
    /// - `FORGE_EXECUTION_INTERVAL_SECS`, `FORGE_DISCOVERY_INTERVAL_SECS`,
    ///   `FORGE_HOUSEKEEPING_INTERVAL_SECS`
    /// - `FORGE_MAX_JOBS_PER_DAY` (default: 0, unlimited)
    /// - `FORGE_MIN_SUCCESS_RATIO` (default: 0.5)
    /// - `FORGE_DATA_DIR` (default: ./forge-data)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// result fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a YAML file, then applies environment overrides.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&text)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses YAML on top of the defaults, without environment overrides.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if !text.trim().is_empty() {
            let file: FileConfig = serde_yaml::from_str(text)?;
            file.apply(&mut config);
        }
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        let secs = |key: &str| -> Result<Option<Duration>, ConfigError> {
            env_parsed::<u64>(key).map(|v| v.map(Duration::from_secs))
        };

        if let Ok(val) = std::env::var("FORGE_BASE_URL") {
            self.base_url = val;
        }
        if let Ok(val) = std::env::var("FORGE_MODEL") {
            self.model = val;
        }
        if let Ok(val) = std::env::var(API_KEY_ENV) {
            self.api_key = Some(val);
        }
        if let Ok(val) = std::env::var(SECONDARY_API_KEY_ENV) {
            self.secondary_api_key = Some(val);
        }
        if let Ok(val) = std::env::var("FORGE_STREAM") {
            self.stream = parse_env_bool(&val, "FORGE_STREAM")?;
        }

        if let Some(v) = env_parsed("FORGE_MAX_CONCURRENT")? {
            self.max_concurrent = v;
        }
        if let Some(v) = secs("FORGE_MIN_INTERVAL_SECS")? {
            self.min_interval = v;
        }
        if let Some(v) = secs("FORGE_CALL_TIMEOUT_SECS")? {
            self.call_timeout = v;
        }
        if let Some(v) = env_parsed("FORGE_MAX_RETRIES")? {
            self.max_retries = v;
        }
        if let Some(v) = secs("FORGE_BASE_RETRY_DELAY_SECS")? {
            self.base_retry_delay = v;
        }

        if let Some(v) = env_parsed("FORGE_PER_FILE_MAX_TOKENS")? {
            self.per_file_max_tokens = v;
        }
        if let Some(v) = env_parsed("FORGE_BUNDLE_MAX_TOKENS")? {
            self.bundle_max_tokens = v;
        }
        if let Some(v) = env_parsed("FORGE_TEMPERATURE")? {
            self.temperature = v;
        }

        if let Some(v) = secs("FORGE_JOB_TIMEOUT_SECS")? {
            self.job_timeout = v;
        }
        if let Some(v) = env_parsed("FORGE_RETIRE_THRESHOLD")? {
            self.retire_threshold = v;
        }
        if let Some(v) = secs("FORGE_EXECUTION_INTERVAL_SECS")? {
            self.execution_interval = v;
        }
        if let Some(v) = secs("FORGE_DISCOVERY_INTERVAL_SECS")? {
            self.discovery_interval = v;
        }
        if let Some(v) = secs("FORGE_HOUSEKEEPING_INTERVAL_SECS")? {
            self.housekeeping_interval = v;
        }
        if let Some(v) = env_parsed("FORGE_MAX_JOBS_PER_DAY")? {
            self.max_jobs_per_day = v;
        }
        if let Some(v) = env_parsed("FORGE_MIN_SUCCESS_RATIO")? {
            self.min_success_ratio = v;
        }
        if let Ok(val) = std::env::var("FORGE_DATA_DIR") {
            self.data_dir = PathBuf::from(val);
        }
        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::ValidationFailed(msg.to_string()));

        if self.base_url.is_empty() {
            return fail("base_url cannot be empty");
        }
        if self.model.is_empty() {
            return fail("model cannot be empty");
        }
        if self.max_concurrent == 0 {
            return fail("max_concurrent must be greater than 0");
        }
        if self.call_timeout.is_zero() {
            return fail("call_timeout must be greater than 0");
        }
        if self.max_retries == 0 {
            return fail("max_retries must be at least 1");
        }
        if !(MIN_PER_FILE_TOKENS..=MAX_PER_FILE_TOKENS).contains(&self.per_file_max_tokens) {
            return Err(ConfigError::ValidationFailed(format!(
                "per_file_max_tokens must be between {} and {}",
                MIN_PER_FILE_TOKENS, MAX_PER_FILE_TOKENS
            )));
        }
        if self.bundle_max_tokens == 0 {
            return fail("bundle_max_tokens must be greater than 0");
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return fail("temperature must be between 0.0 and 2.0");
        }
        if self.job_timeout.is_zero() {
            return fail("job_timeout must be greater than 0");
        }
        if self.retire_threshold == 0 {
            return fail("retire_threshold must be at least 1");
        }
        if self.execution_interval.is_zero()
            || self.discovery_interval.is_zero()
            || self.housekeeping_interval.is_zero()
        {
            return fail("loop intervals must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.min_success_ratio) {
            return fail("min_success_ratio must be between 0.0 and 1.0");
        }
        Ok(())
    }

    /// The primary credential, required by commands that call the endpoint.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(API_KEY_ENV.to_string()))
    }

    // Data directory layout

    pub fn queue_dir(&self) -> PathBuf {
        self.data_dir.join("queue")
    }

    pub fn done_dir(&self) -> PathBuf {
        self.data_dir.join("done")
    }

    pub fn inbox_dir(&self) -> PathBuf {
        self.data_dir.join("inbox")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.data_dir.join("output")
    }

    pub fn failures_file(&self) -> PathBuf {
        self.data_dir.join("failures.json")
    }

    pub fn stats_file(&self) -> PathBuf {
        self.data_dir.join("stats.json")
    }

    // Component configs

    pub fn client_config(&self, name: &str) -> ClientConfig {
        ClientConfig::default()
            .with_name(name)
            .with_max_concurrent(self.max_concurrent)
            .with_min_interval(self.min_interval)
            .with_call_timeout(self.call_timeout)
            .with_max_retries(self.max_retries)
            .with_base_retry_delay(self.base_retry_delay)
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig::default()
            .with_per_file_max_tokens(self.per_file_max_tokens)
            .with_bundle_max_tokens(self.bundle_max_tokens)
            .with_temperature(self.temperature)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::default()
            .with_job_timeout(self.job_timeout)
            .with_daily_cap(self.max_jobs_per_day)
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig::default()
            .with_execution_interval(self.execution_interval)
            .with_discovery_interval(self.discovery_interval)
            .with_housekeeping_interval(self.housekeeping_interval)
    }

    // Builders

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_per_file_max_tokens(mut self, tokens: u32) -> Self {
        self.per_file_max_tokens = tokens;
        self
    }

    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_retire_threshold(mut self, threshold: u32) -> Self {
        self.retire_threshold = threshold;
        self
    }

    pub fn with_min_success_ratio(mut self, ratio: f64) -> Self {
        self.min_success_ratio = ratio;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(val) => parse_env_value(&val, key).map(Some),
        Err(_) => Ok(None),
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
