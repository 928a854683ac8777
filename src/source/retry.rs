//! Retry configuration, delay calculation, and the retrying source
//! decorator.
//!
//! The coordinator never retries on its own: a failed refresh is simply
//! re-attempted on the caller's next cycle. Wrapping a source in
//! [`RetryingSource`] opts in to in-call retries of transient errors.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::traits::{MetricSource, RawDataRequest};
use crate::telemetry;
use crate::Result;

/// Configuration for retry behaviour on transient errors.
///
/// ```rust
/// # use gapcache::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_attempts(3)
///     .initial_delay(Duration::from_millis(200));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial request).
    /// 1 = no retry. Default: 1.
    pub max_attempts: u32,
    /// Base delay before the first retry. Default: 500ms.
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps exponential growth). Default: 30s.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// A config that disables retries (single attempt).
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 1
    }

    /// `initial_delay * 2^attempt`, capped at `max_delay` (attempt is 0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }

    /// Backoff delay, unless the upstream supplied a `retry_after` hint.
    pub fn effective_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        retry_after
            .map(|hint| hint.min(self.max_delay))
            .unwrap_or_else(|| self.delay_for_attempt(attempt))
    }
}

/// Run `f` until it succeeds, fails permanently, or runs out of attempts.
pub(crate) async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    source_name: &str,
    operation: &str,
    f: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_transient() && attempt + 1 < config.max_attempts => {
                let delay = config.effective_delay(attempt, e.retry_after());
                metrics::counter!(telemetry::RETRIES_TOTAL,
                    "source" => source_name.to_owned(),
                    "operation" => operation.to_owned(),
                )
                .increment(1);
                warn!(
                    source = source_name,
                    operation,
                    attempt = attempt + 1,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after transient error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Decorator that retries a [`MetricSource`]'s transient failures.
///
/// Resolution errors and API errors below 500 are returned immediately.
pub struct RetryingSource {
    inner: Arc<dyn MetricSource>,
    config: RetryConfig,
}

impl RetryingSource {
    pub fn new(inner: Arc<dyn MetricSource>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    /// Wrap `inner` only if `config` actually allows retries.
    pub fn wrap(inner: Arc<dyn MetricSource>, config: RetryConfig) -> Arc<dyn MetricSource> {
        if config.is_enabled() {
            Arc::new(Self::new(inner, config))
        } else {
            inner
        }
    }
}

#[async_trait]
impl MetricSource for RetryingSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch_raw(&self, request: &RawDataRequest) -> Result<Vec<u8>> {
        with_retry(&self.config, self.inner.name(), "fetch_raw", || {
            self.inner.fetch_raw(request)
        })
        .await
    }

    async fn resolve_host(&self, label: &str) -> Result<String> {
        with_retry(&self.config, self.inner.name(), "resolve_host", || {
            self.inner.resolve_host(label)
        })
        .await
    }

    async fn resolve_host_datasource(&self, device_id: &str, datasource_id: i64) -> Result<i64> {
        with_retry(&self.config, self.inner.name(), "resolve_host_datasource", || {
            self.inner.resolve_host_datasource(device_id, datasource_id)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_single_attempt() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 1);
        assert!(!config.is_enabled());
    }

    #[test]
    fn delay_doubles_and_caps() {
        let config = RetryConfig::new()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(350));
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(config.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[test]
    fn retry_after_hint_wins_but_is_capped() {
        let config = RetryConfig::new().max_delay(Duration::from_secs(5));
        assert_eq!(
            config.effective_delay(0, Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
        assert_eq!(
            config.effective_delay(0, Some(Duration::from_secs(60))),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn zero_attempts_clamped_to_one() {
        assert_eq!(RetryConfig::new().max_attempts(0).max_attempts, 1);
    }
}
