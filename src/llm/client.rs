//! Rate-limited, concurrency-bounded, deadline-enforcing generation client.
//!
//! Wraps an [`LlmProvider`] so that every call:
//!
//! 1. waits for the interval limiter (minimum gap between call starts),
//! 2. holds a semaphore permit for the duration of the attempt,
//! 3. runs under a hard deadline, and
//! 4. is retried with linear backoff on transient failures.
//!
//! Cancellation is by drop: dropping the future returned by
//! [`GenerationClient::complete`] drops the in-flight provider future and
//! releases the permit.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::Instant;

use super::rate_limit::IntervalLimiter;
use super::types::{GenerationRequest, GenerationResult, LlmProvider};
use crate::error::LlmError;
use crate::metrics::MetricsCollector;

/// Default number of concurrent in-flight calls.
pub const DEFAULT_MAX_CONCURRENT: usize = 2;

/// Default minimum gap between call starts.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(5);

/// Default per-attempt deadline.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Default number of attempts per call.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default backoff unit; attempt `n` waits `n * base` before retrying.
pub const DEFAULT_BASE_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Tuning knobs for one [`GenerationClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Label used in logs and metrics.
    pub name: String,
    pub max_concurrent: usize,
    pub min_interval: Duration,
    pub call_timeout: Duration,
    pub max_retries: u32,
    pub base_retry_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "primary".to_string(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            min_interval: DEFAULT_MIN_INTERVAL,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            base_retry_delay: DEFAULT_BASE_RETRY_DELAY,
        }
    }
}

impl ClientConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_retry_delay(mut self, delay: Duration) -> Self {
        self.base_retry_delay = delay;
        self
    }
}

/// A generation client owning its own credential (via the provider),
/// semaphore and rate limiter.
///
/// Construct once and share as `Arc<GenerationClient>`; two instances never
/// share limits.
pub struct GenerationClient {
    provider: Arc<dyn LlmProvider>,
    semaphore: Semaphore,
    limiter: IntervalLimiter,
    config: ClientConfig,
    metrics: MetricsCollector,
}

impl GenerationClient {
    pub fn new(provider: Arc<dyn LlmProvider>, config: ClientConfig) -> Self {
        let permits = config.max_concurrent.max(1);
        Self {
            provider,
            semaphore: Semaphore::new(permits),
            limiter: IntervalLimiter::new(config.min_interval),
            config,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Permits currently free; equals `max_concurrent` when idle.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Run `request` to completion, retrying transient failures.
    ///
    /// Returns a usable result or the last attempt's error. An `Empty`
    /// result is surfaced as [`LlmError::EmptyResponse`].
    pub async fn complete(&self, request: &GenerationRequest) -> Result<GenerationResult, LlmError> {
        let max_attempts = request
            .max_retries
            .unwrap_or(self.config.max_retries)
            .max(1);
        let mut attempt: u32 = 1;

        loop {
            match self.attempt(request).await {
                Ok(result) => {
                    if attempt > 1 {
                        tracing::info!(
                            client = %self.config.name,
                            attempt = attempt,
                            "Generation succeeded after retry"
                        );
                    }
                    return Ok(result);
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.config.base_retry_delay * attempt;
                    tracing::warn!(
                        client = %self.config.name,
                        attempt = attempt,
                        max_retries = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient error, will retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(
                        client = %self.config.name,
                        attempt = attempt,
                        error = %err,
                        "Generation failed"
                    );
                    return Err(err);
                }
            }
        }
    }

    async fn attempt(&self, request: &GenerationRequest) -> Result<GenerationResult, LlmError> {
        self.limiter.until_ready().await;
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| LlmError::LimiterClosed)?;
        // Permits can free up back-to-back; keep real starts spaced too.
        self.limiter.mark_start().await;

        let started = Instant::now();
        let outcome =
            tokio::time::timeout(self.config.call_timeout, self.provider.generate(request)).await;
        let latency = started.elapsed().as_secs_f64();

        let result = match outcome {
            Err(_) => Err(LlmError::Timeout(self.config.call_timeout)),
            Ok(Ok(GenerationResult::Empty)) => Err(LlmError::EmptyResponse),
            Ok(other) => other,
        };

        let label = match &result {
            Ok(GenerationResult::ThinkingOnly { .. }) => "thinking_only",
            Ok(_) => "completed",
            Err(LlmError::Timeout(_)) => "timeout",
            Err(LlmError::EmptyResponse) => "empty",
            Err(_) => "error",
        };
        self.metrics.record_generation(
            &self.config.name,
            label,
            latency,
            result.as_ref().ok().and_then(|r| r.usage()),
        );
        tracing::debug!(
            client = %self.config.name,
            outcome = label,
            latency_secs = latency,
            "Generation attempt finished"
        );

        result
    }
}

impl std::fmt::Debug for GenerationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationClient")
            .field("config", &self.config)
            .field("available_permits", &self.available_permits())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::future::join_all;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Provider that sleeps, tracks concurrency and records start instants.
    struct SlowProvider {
        delay: Duration,
        /// Per-call delays consumed in call order before `delay` applies.
        scripted_delays: Mutex<VecDeque<Duration>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        starts: Mutex<Vec<Instant>>,
    }

    impl SlowProvider {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                scripted_delays: Mutex::new(VecDeque::new()),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                starts: Mutex::new(Vec::new()),
            }
        }

        fn with_delays(delays: Vec<Duration>) -> Self {
            let provider = Self::new(Duration::from_millis(100));
            *provider.scripted_delays.lock().unwrap() = delays.into();
            provider
        }
    }

    #[async_trait]
    impl LlmProvider for SlowProvider {
        async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationResult, LlmError> {
            self.starts.lock().unwrap().push(Instant::now());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let delay = self
                .scripted_delays
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(self.delay);
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(GenerationResult::from_channels(
                "ok".to_string(),
                String::new(),
                None,
            ))
        }
    }

    /// Provider that replays a script of results, then repeats the last one.
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<GenerationResult, LlmError>>>,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<GenerationResult, LlmError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationResult, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                match script.front().unwrap() {
                    Ok(result) => Ok(result.clone()),
                    Err(LlmError::Api { status, message }) => Err(LlmError::Api {
                        status: *status,
                        message: message.clone(),
                    }),
                    Err(_) => Err(LlmError::RequestFailed("scripted".to_string())),
                }
            }
        }
    }

    /// Provider that never answers.
    struct HangingProvider {
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for HangingProvider {
        async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationResult, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            futures::future::pending::<()>().await;
            Ok(GenerationResult::Empty)
        }
    }

    fn fast_config() -> ClientConfig {
        ClientConfig::default()
            .with_min_interval(Duration::ZERO)
            .with_base_retry_delay(Duration::from_millis(10))
    }

    fn completed(text: &str) -> GenerationResult {
        GenerationResult::from_channels(text.to_string(), String::new(), None)
    }

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.min_interval, Duration::from_secs(5));
        assert_eq!(config.call_timeout, Duration::from_secs(900));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_retry_delay, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_never_exceeds_capacity() {
        let provider = Arc::new(SlowProvider::new(Duration::from_secs(1)));
        let client = GenerationClient::new(provider.clone(), fast_config().with_max_concurrent(2));
        let request = GenerationRequest::new("write a file");

        let results = join_all((0..6).map(|_| client.complete(&request))).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(provider.peak.load(Ordering::SeqCst), 2);
        assert_eq!(client.available_permits(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_starts_respect_min_interval() {
        let provider = Arc::new(SlowProvider::new(Duration::from_millis(100)));
        let client = GenerationClient::new(
            provider.clone(),
            fast_config()
                .with_max_concurrent(4)
                .with_min_interval(Duration::from_secs(5)),
        );
        let request = GenerationRequest::new("write a file");

        join_all((0..4).map(|_| client.complete(&request))).await;

        let mut starts = provider.starts.lock().unwrap().clone();
        starts.sort();
        assert_eq!(starts.len(), 4);
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(5));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_interval_holds_when_semaphore_saturated() {
        let provider = Arc::new(SlowProvider::with_delays(vec![
            Duration::from_secs(60),
            Duration::from_secs(1),
            Duration::from_secs(1),
        ]));
        let client = GenerationClient::new(
            provider.clone(),
            fast_config()
                .with_max_concurrent(1)
                .with_min_interval(Duration::from_secs(5)),
        );
        let request = GenerationRequest::new("write a file");

        let results = join_all((0..3).map(|_| client.complete(&request))).await;
        assert!(results.iter().all(|r| r.is_ok()));

        let starts = provider.starts.lock().unwrap().clone();
        assert_eq!(starts.len(), 3);
        let gaps: Vec<Duration> = starts.windows(2).map(|p| p[1] - p[0]).collect();
        assert_eq!(gaps[0], Duration::from_secs(60));
        assert!(gaps[1] >= Duration::from_secs(5), "gaps: {:?}", gaps);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_errors_then_succeeds() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(LlmError::Api {
                status: 503,
                message: "unavailable".to_string(),
            }),
            Err(LlmError::RequestFailed("connection reset".to_string())),
            Ok(completed("fn main() {}")),
        ]));
        let client = GenerationClient::new(provider.clone(), fast_config());

        let result = client
            .complete(&GenerationRequest::new("main.rs"))
            .await
            .expect("third attempt should succeed");

        assert_eq!(result.best_text(), Some("fn main() {}"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_linear_backoff_between_attempts() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(LlmError::RateLimited("slow down".to_string())),
            Err(LlmError::RateLimited("slow down".to_string())),
            Ok(completed("done")),
        ]));
        let client = GenerationClient::new(
            provider,
            fast_config().with_base_retry_delay(Duration::from_secs(10)),
        );

        let before = Instant::now();
        client
            .complete(&GenerationRequest::new("x"))
            .await
            .expect("should succeed");

        // 1 * 10s after the first failure, 2 * 10s after the second
        assert!(Instant::now() - before >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_fail_immediately() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(LlmError::Api {
            status: 401,
            message: "unauthorized".to_string(),
        })]));
        let client = GenerationClient::new(provider.clone(), fast_config());

        let err = client
            .complete(&GenerationRequest::new("x"))
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::Api { status: 401, .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_result_is_retried_and_surfaced() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(GenerationResult::Empty)]));
        let client = GenerationClient::new(provider.clone(), fast_config());

        let err = client
            .complete(&GenerationRequest::new("x"))
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::EmptyResponse));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_retry_budget_overrides_client_default() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(GenerationResult::Empty)]));
        let client = GenerationClient::new(provider.clone(), fast_config());

        let request = GenerationRequest::new("x").with_retry_budget(1);
        assert!(client.complete(&request).await.is_err());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_thinking_only_is_returned_without_retry() {
        let thinking = GenerationResult::from_channels(
            String::new(),
            "I should start with the imports".to_string(),
            None,
        );
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(thinking)]));
        let client = GenerationClient::new(provider.clone(), fast_config());

        let result = client.complete(&GenerationRequest::new("x")).await.unwrap();
        assert!(result.is_thinking_only());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_releases_permit() {
        let provider = Arc::new(HangingProvider {
            calls: AtomicU32::new(0),
        });
        let client = GenerationClient::new(
            provider.clone(),
            fast_config()
                .with_call_timeout(Duration::from_secs(60))
                .with_max_retries(2),
        );

        let err = client
            .complete(&GenerationRequest::new("x"))
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::Timeout(d) if d == Duration::from_secs(60)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(client.available_permits(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_call_releases_permit() {
        let provider = Arc::new(HangingProvider {
            calls: AtomicU32::new(0),
        });
        let client = GenerationClient::new(provider, fast_config());
        let request = GenerationRequest::new("x");

        let outcome = tokio::time::timeout(Duration::from_secs(1), client.complete(&request)).await;

        assert!(outcome.is_err());
        assert_eq!(client.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_independent_clients_do_not_share_permits() {
        let a = GenerationClient::new(
            Arc::new(SlowProvider::new(Duration::ZERO)),
            fast_config().with_name("primary").with_max_concurrent(1),
        );
        let b = GenerationClient::new(
            Arc::new(SlowProvider::new(Duration::ZERO)),
            fast_config().with_name("secondary").with_max_concurrent(3),
        );

        assert_eq!(a.available_permits(), 1);
        assert_eq!(b.available_permits(), 3);
        assert_eq!(b.name(), "secondary");
    }
}
