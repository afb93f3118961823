//! Retry logic for model providers
//!
//! Exponential backoff with jitter for transient transport failures. The
//! workflows never retry transport errors on their own; callers opt in by
//! wrapping their provider in a [`RetryingProvider`].

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetrySettings;
use crate::error::{AgentflowError, Result};
use crate::llm::{LLMProvider, LLMRequest, LLMResponse, ModelInfo};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: usize,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Add jitter to prevent thundering herd
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self::default()
            .with_max_attempts(settings.max_attempts)
            .with_initial_delay(settings.initial_delay)
    }
}

impl RetryConfig {
    /// Create a config with no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Builder: set max attempts
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Builder: set initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Builder: set max delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Builder: set backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    /// Builder: enable/disable jitter
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculate delay for a given retry (0-indexed)
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let base_delay = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32);

        let clamped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.add_jitter {
            // Up to 25% jitter
            clamped_delay + clamped_delay * 0.25 * rand_jitter()
        } else {
            clamped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

/// Pseudo-random jitter in 0.0..1.0 from a small LCG
fn rand_jitter() -> f64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static SEED: AtomicU64 = AtomicU64::new(0);

    const A: u64 = 1103515245;
    const C: u64 = 12345;
    const M: u64 = 1 << 31;

    let seed = SEED.fetch_add(1, Ordering::Relaxed);
    let time_component = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let next = (A.wrapping_mul(seed.wrapping_add(time_component)).wrapping_add(C)) % M;
    (next as f64) / (M as f64)
}

/// Retry state tracker
#[derive(Debug)]
pub struct RetryState {
    config: RetryConfig,
    attempt: usize,
    last_error: Option<String>,
}

impl RetryState {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempt: 0,
            last_error: None,
        }
    }

    /// Check if another attempt is allowed
    pub fn should_retry(&self) -> bool {
        self.attempt < self.config.max_attempts
    }

    /// Record a failed attempt
    pub fn record_attempt(&mut self, error: impl Into<String>) {
        self.attempt += 1;
        self.last_error = Some(error.into());
    }

    /// Delay before the next attempt
    pub fn next_delay(&self) -> Duration {
        self.config.delay_for_attempt(self.attempt.saturating_sub(1))
    }

    /// Attempts made so far
    pub fn current_attempt(&self) -> usize {
        self.attempt
    }

    pub fn remaining_attempts(&self) -> usize {
        self.config.max_attempts.saturating_sub(self.attempt)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

/// Execute an async operation, retrying every error
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> std::result::Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    with_retry_if(config, operation, |_| true).await
}

/// Execute an async operation, retrying only errors accepted by `retryable`
pub async fn with_retry_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation: F,
    retryable: P,
) -> std::result::Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut state = RetryState::new(config.clone());

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                state.record_attempt(e.to_string());

                if !retryable(&e) || !state.should_retry() {
                    return Err(e);
                }

                let delay = state.next_delay();
                tracing::debug!(
                    attempt = state.current_attempt(),
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Provider decorator that retries transport errors with backoff
pub struct RetryingProvider {
    inner: Arc<dyn LLMProvider>,
    config: RetryConfig,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn LLMProvider>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LLMProvider for RetryingProvider {
    async fn generate_request(&self, request: &LLMRequest) -> Result<LLMResponse> {
        with_retry_if(
            &self.config,
            || self.inner.generate_request(request),
            AgentflowError::is_transport,
        )
        .await
    }

    fn model_info(&self) -> ModelInfo {
        self.inner.model_info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::scripted::{ScriptedProvider, ScriptedReply};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_delay_calculation() {
        let config = RetryConfig::default().with_jitter(false);

        // Exponential backoff: 500ms, 1000ms, 2000ms
        assert_eq!(config.delay_for_attempt(0).as_millis(), 500);
        assert_eq!(config.delay_for_attempt(1).as_millis(), 1000);
        assert_eq!(config.delay_for_attempt(2).as_millis(), 2000);
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig::default()
            .with_jitter(false)
            .with_max_delay(Duration::from_secs(1));

        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(1));
    }

    #[test]
    fn test_from_settings() {
        let settings = RetrySettings {
            enabled: true,
            max_attempts: 0,
            initial_delay: Duration::from_millis(50),
        };
        let config = RetryConfig::from(&settings);
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.initial_delay, Duration::from_millis(50));
    }

    #[test]
    fn test_retry_state() {
        let mut state = RetryState::new(RetryConfig::default().with_max_attempts(2));

        assert!(state.should_retry());
        state.record_attempt("error 1");
        assert!(state.should_retry());
        state.record_attempt("error 2");
        assert!(!state.should_retry());
        assert_eq!(state.remaining_attempts(), 0);
        assert_eq!(state.last_error(), Some("error 2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_eventual_success() {
        let attempts = AtomicUsize::new(0);
        let config = RetryConfig::default().with_max_attempts(3);

        let result = with_retry(&config, || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err("transient error")
                } else {
                    Ok("success")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_returns_immediately() {
        let attempts = AtomicUsize::new(0);
        let config = RetryConfig::default().with_max_attempts(5);

        let result: std::result::Result<(), &str> = with_retry_if(
            &config,
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal") }
            },
            |_| false,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_provider_recovers_from_transport_error() {
        let inner = Arc::new(ScriptedProvider::new(vec![
            ScriptedReply::failure("connection reset"),
            ScriptedReply::text("ok"),
        ]));
        let provider = RetryingProvider::new(inner.clone(), RetryConfig::default());

        assert_eq!(provider.generate("hi").await.unwrap(), "ok");
        assert_eq!(inner.call_count(), 2);
    }
}
