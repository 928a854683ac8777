//! Tests for the bounded fetch dispatcher.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{MockSource, T};
use gapcache::{Dispatcher, FetchJob, FetchTarget, GapcacheError, PendingTimeRange};

fn target() -> FetchTarget {
    FetchTarget {
        device_id: "42".into(),
        hds_id: 7,
    }
}

fn jobs(n: usize) -> Vec<FetchJob> {
    (0..n)
        .map(|i| {
            let from = T + i as i64 * 600;
            FetchJob {
                job_id: i,
                range: PendingTimeRange::new(from, from + 599),
            }
        })
        .collect()
}

#[tokio::test]
async fn results_are_ordered_by_job_id() {
    let source = Arc::new(MockSource::cpu().with_delay(Duration::from_millis(5)));
    // first half of the jobs answers last
    source.slow_before.store(T + 1200, Ordering::SeqCst);
    let dispatcher = Dispatcher::new(source.clone());

    let chunks = dispatcher.fetch_all(&target(), jobs(4), None).await.unwrap();

    let ids: Vec<usize> = chunks.iter().map(|c| c.job_id).collect();
    assert_eq!(ids, vec![0, 1, 2, 3]);
    assert_eq!(chunks[2].from_time, T + 1200);
    assert!(chunks.iter().all(|c| c.is_ok()));
    assert_eq!(source.max_in_flight(), 4);
}

#[tokio::test]
async fn concurrency_limits_workers() {
    let source = Arc::new(MockSource::cpu().with_delay(Duration::from_millis(10)));
    let dispatcher = Dispatcher::new(source.clone());

    let chunks = dispatcher
        .fetch_all(&target(), jobs(5), Some(1))
        .await
        .unwrap();

    assert_eq!(chunks.len(), 5);
    assert_eq!(source.max_in_flight(), 1);
}

#[tokio::test]
async fn empty_batch_makes_no_calls() {
    let source = Arc::new(MockSource::cpu());
    let dispatcher = Dispatcher::new(source.clone());

    let chunks = dispatcher.fetch_all(&target(), Vec::new(), Some(3)).await.unwrap();
    assert!(chunks.is_empty());
    assert_eq!(source.call_count(), 0);
}

#[tokio::test]
async fn first_transport_error_fails_the_batch() {
    let source = Arc::new(MockSource::cpu());
    source.fail_next(GapcacheError::ServiceUnavailable);
    let dispatcher = Dispatcher::new(source.clone());

    let err = dispatcher
        .fetch_all(&target(), jobs(3), Some(1))
        .await
        .unwrap_err();
    assert!(matches!(err, GapcacheError::ServiceUnavailable));
    // the single worker stops at its first failure
    assert_eq!(source.call_count(), 1);
}

#[tokio::test]
async fn requests_carry_target_ids() {
    let source = Arc::new(MockSource::cpu());
    let dispatcher = Dispatcher::new(source.clone());

    dispatcher
        .fetch_one(&target(), jobs(1).remove(0))
        .await
        .unwrap();

    let call = &source.calls()[0];
    assert_eq!(call.device_id, "42");
    assert_eq!(call.hds_id, 7);
    assert_eq!(call.range, PendingTimeRange::new(T, T + 599));
}
