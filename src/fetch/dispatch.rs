//! Bounded-concurrency fetch dispatcher.
//!
//! A fixed number of workers drain a shared queue of sub-ranges, one upstream
//! call per sub-range. Each chunk keeps the slot index it was queued with and
//! the results are returned ordered by that index, so merge order never
//! depends on completion order.
//!
//! Workers live in a [`JoinSet`]: if the dispatching future is dropped, or
//! one worker hits a transport error, the remaining in-flight calls are
//! aborted.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, instrument};

use crate::source::{MetricSource, RawDataRequest};
use crate::telemetry;
use crate::types::{PendingTimeRange, RawDataChunk};
use crate::{GapcacheError, Result};

/// One queued sub-range and the slot its chunk lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchJob {
    pub job_id: usize,
    pub range: PendingTimeRange,
}

/// Resolved upstream coordinates shared by every job of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    pub device_id: String,
    pub hds_id: i64,
}

impl FetchTarget {
    fn request(&self, range: PendingTimeRange) -> RawDataRequest {
        RawDataRequest {
            device_id: self.device_id.clone(),
            hds_id: self.hds_id,
            range,
        }
    }
}

/// Issue one upstream call and decode its payload.
pub async fn fetch_chunk(
    source: &dyn MetricSource,
    target: &FetchTarget,
    job: FetchJob,
) -> Result<RawDataChunk> {
    let started = Instant::now();
    let result = source.fetch_raw(&target.request(job.range)).await;
    metrics::histogram!(telemetry::UPSTREAM_CALL_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    let status = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!(telemetry::UPSTREAM_CALLS_TOTAL, "status" => status).increment(1);

    let bytes = result?;
    debug!(
        job_id = job.job_id,
        from = job.range.from,
        to = job.range.to,
        bytes = bytes.len(),
        "fetched sub-range"
    );
    RawDataChunk::decode(job.job_id, job.range, &bytes)
}

/// Runs batches of [`FetchJob`]s against one source.
#[derive(Clone)]
pub struct Dispatcher {
    source: Arc<dyn MetricSource>,
}

impl Dispatcher {
    pub fn new(source: Arc<dyn MetricSource>) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &Arc<dyn MetricSource> {
        &self.source
    }

    /// Fetch a single job on the caller's task.
    pub async fn fetch_one(&self, target: &FetchTarget, job: FetchJob) -> Result<RawDataChunk> {
        fetch_chunk(self.source.as_ref(), target, job).await
    }

    /// Fetch every job with at most `concurrency` calls in flight
    /// (one worker per job when `None`).
    ///
    /// Returns chunks ordered by `job_id`. The first failed call aborts the
    /// batch and is returned as the error.
    #[instrument(skip(self, target, jobs), fields(jobs = jobs.len()))]
    pub async fn fetch_all(
        &self,
        target: &FetchTarget,
        jobs: Vec<FetchJob>,
        concurrency: Option<usize>,
    ) -> Result<Vec<RawDataChunk>> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        let workers = concurrency.unwrap_or(jobs.len()).clamp(1, jobs.len());
        debug!(workers, "dispatching");

        let queue = Arc::new(Mutex::new(VecDeque::from(jobs)));
        let mut set = JoinSet::new();
        for _ in 0..workers {
            let queue = queue.clone();
            let source = self.source.clone();
            let target = target.clone();
            set.spawn(async move {
                let mut chunks = Vec::new();
                loop {
                    let next = queue.lock().await.pop_front();
                    let Some(job) = next else {
                        break;
                    };
                    chunks.push(fetch_chunk(source.as_ref(), &target, job).await?);
                }
                Ok::<_, GapcacheError>(chunks)
            });
        }

        let mut slots = BTreeMap::new();
        while let Some(joined) = set.join_next().await {
            let chunks = joined
                .map_err(|e| GapcacheError::WorkerFailed(e.to_string()))??;
            for chunk in chunks {
                slots.insert(chunk.job_id, chunk);
            }
        }
        Ok(slots.into_values().collect())
    }
}
