mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockSource, T};
use gapcache::{
    GapcacheError, MetricSource, PendingTimeRange, RawDataRequest, RetryConfig, RetryingSource,
};

fn request() -> RawDataRequest {
    RawDataRequest {
        device_id: "1".into(),
        hds_id: 2,
        range: PendingTimeRange::new(T, T + 60),
    }
}

fn fast_retry(attempts: u32) -> RetryConfig {
    RetryConfig::new()
        .max_attempts(attempts)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(5))
}

#[tokio::test]
async fn retries_on_transient_error_then_succeeds() {
    let inner = Arc::new(MockSource::cpu());
    inner.fail_next(GapcacheError::Timeout);
    inner.fail_next(GapcacheError::ServiceUnavailable);
    let source = RetryingSource::new(inner.clone(), fast_retry(3));

    let bytes = source.fetch_raw(&request()).await.unwrap();
    assert!(!bytes.is_empty());
    assert_eq!(inner.call_count(), 3);
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let inner = Arc::new(MockSource::cpu());
    for _ in 0..3 {
        inner.fail_next(GapcacheError::Network("refused".into()));
    }
    let source = RetryingSource::new(inner.clone(), fast_retry(2));

    let err = source.fetch_raw(&request()).await.unwrap_err();
    assert!(matches!(err, GapcacheError::Network(_)));
    assert_eq!(inner.call_count(), 2);
}

#[tokio::test]
async fn permanent_errors_are_not_retried() {
    let inner = Arc::new(MockSource::cpu());
    inner.fail_next(GapcacheError::AuthenticationFailed);
    let source = RetryingSource::new(inner.clone(), fast_retry(5));

    let err = source.fetch_raw(&request()).await.unwrap_err();
    assert!(matches!(err, GapcacheError::AuthenticationFailed));
    assert_eq!(inner.call_count(), 1);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let inner = Arc::new(MockSource::cpu());
    inner.fail_next(GapcacheError::Api {
        status: 400,
        message: "bad request".into(),
    });
    let source = RetryingSource::new(inner.clone(), fast_retry(5));

    assert!(source.fetch_raw(&request()).await.is_err());
    assert_eq!(inner.call_count(), 1);
}

#[tokio::test]
async fn rate_limit_is_retried_after_hint() {
    let inner = Arc::new(MockSource::cpu());
    inner.fail_next(GapcacheError::RateLimited {
        retry_after: Some(Duration::from_millis(2)),
    });
    let source = RetryingSource::new(inner.clone(), fast_retry(2));

    source.fetch_raw(&request()).await.unwrap();
    assert_eq!(inner.call_count(), 2);
}

#[tokio::test]
async fn wrap_without_retries_passes_through() {
    let inner = Arc::new(MockSource::cpu());
    inner.fail_next(GapcacheError::Timeout);
    let source = RetryingSource::wrap(inner.clone(), RetryConfig::disabled());

    assert_eq!(source.name(), "mock");
    assert!(source.fetch_raw(&request()).await.is_err());
    assert_eq!(inner.call_count(), 1);
}

#[test]
fn effective_delay_honours_retry_after_up_to_cap() {
    let config = RetryConfig::new()
        .max_attempts(3)
        .initial_delay(Duration::from_millis(100))
        .max_delay(Duration::from_secs(1));
    assert_eq!(
        config.effective_delay(0, Some(Duration::from_millis(300))),
        Duration::from_millis(300)
    );
    assert_eq!(
        config.effective_delay(0, Some(Duration::from_secs(10))),
        Duration::from_secs(1)
    );
    assert_eq!(config.effective_delay(1, None), Duration::from_millis(200));
}
