//! The cache coordinator.
//!
//! One [`Coordinator::get_data`] call runs the whole incremental fetch:
//!
//! 1. derive the query identity and resolve it against the caches,
//!    promoting a settled edit-mode entry
//! 2. plan the prepend/append sub-ranges missing from the cached window
//! 3. clip the plan to the shared call budget
//! 4. fetch the earliest sub-range inline (re-resolving ids once if the
//!    upstream no longer knows them), the rest through the dispatcher
//! 5. merge `[prepend..., cached, append...]`, widen the window and store
//!    the merged series
//!
//! Rate limiting by the upstream is not fatal: the cached series is served
//! and the outcome reports the calls that still need to happen.

mod builder;

pub use builder::CoordinatorBuilder;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::cache::{
    BudgetConfig, CallBudgetTracker, DEFAULT_MAX_ENTRIES, RangeTracker, ResolutionCache,
    SeriesCache, lookup::DEFAULT_RESOLUTION_TTL,
};
use crate::clock::Clock;
use crate::fetch::{
    DEFAULT_MAX_RECORDS_PER_CALL, Dispatcher, FetchJob, FetchTarget, GapPlan, GapRequest,
    InstanceMatcher, MergeSpec, compute_ranges, merge,
};
use crate::telemetry;
use crate::types::{
    CachedWindow, Direction, KeyResolution, MetricQuery, QueryIdentity, QueryOutcome,
    RawDataChunk,
};
use crate::{GapcacheError, Result};

/// Coordinator tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Lifetime of a cached series. Default: 10 minutes.
    pub series_ttl: Duration,
    /// Lifetime of a series cached while the query is being edited.
    /// Default: 2 minutes.
    pub edit_ttl: Duration,
    /// How much longer a window outlives its series. Default: 60s.
    pub window_margin: Duration,
    pub max_records_per_call: i64,
    /// Default worker count when the query sets none. `None` = one worker
    /// per sub-range.
    pub concurrency: Option<usize>,
    pub budget: BudgetConfig,
    pub resolution_ttl: Duration,
    /// Capacity of each cache namespace.
    pub max_entries: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            series_ttl: Duration::from_secs(600),
            edit_ttl: Duration::from_secs(120),
            window_margin: Duration::from_secs(60),
            max_records_per_call: DEFAULT_MAX_RECORDS_PER_CALL,
            concurrency: None,
            budget: BudgetConfig::default(),
            resolution_ttl: DEFAULT_RESOLUTION_TTL,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn series_ttl(mut self, ttl: Duration) -> Self {
        self.series_ttl = ttl;
        self
    }

    pub fn edit_ttl(mut self, ttl: Duration) -> Self {
        self.edit_ttl = ttl;
        self
    }

    pub fn window_margin(mut self, margin: Duration) -> Self {
        self.window_margin = margin;
        self
    }

    pub fn max_records_per_call(mut self, n: i64) -> Self {
        self.max_records_per_call = n;
        self
    }

    pub fn concurrency(mut self, workers: usize) -> Self {
        self.concurrency = Some(workers);
        self
    }

    pub fn budget(mut self, budget: BudgetConfig) -> Self {
        self.budget = budget;
        self
    }

    pub fn resolution_ttl(mut self, ttl: Duration) -> Self {
        self.resolution_ttl = ttl;
        self
    }

    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }
}

/// Incremental-fetch cache coordinator.
pub struct Coordinator {
    config: CoordinatorConfig,
    clock: Arc<dyn Clock>,
    dispatcher: Dispatcher,
    windows: RangeTracker,
    series: SeriesCache,
    lookups: ResolutionCache,
    budget: Arc<CallBudgetTracker>,
}

impl Coordinator {
    /// Create a new builder for configuring the coordinator.
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn windows(&self) -> &RangeTracker {
        &self.windows
    }

    pub fn series(&self) -> &SeriesCache {
        &self.series
    }

    pub fn budget(&self) -> &CallBudgetTracker {
        &self.budget
    }

    pub fn lookups(&self) -> &ResolutionCache {
        &self.lookups
    }

    /// Cached window `query` would be served from right now.
    pub fn cached_window(&self, query: &MetricQuery) -> CachedWindow {
        let identity = QueryIdentity::derive(query, self.clock.now_millis());
        self.windows.window(&identity)
    }

    /// Serve `query` from cache, fetching only the missing sub-ranges.
    #[instrument(
        skip(self, query),
        fields(
            host = %query.host.label,
            data_source = %query.data_source.label,
            from = query.from,
            to = query.to
        )
    )]
    pub async fn get_data(&self, query: &MetricQuery) -> Result<QueryOutcome> {
        query.validate()?;
        let matcher = InstanceMatcher::new(&query.selection)?;
        let now_ms = self.clock.now_millis();
        let now = now_ms.div_euclid(1000);
        let identity = QueryIdentity::derive(query, now_ms);

        let key = match identity.resolve(|key| self.series.contains(key)) {
            KeyResolution::Promote { from, to } => {
                self.windows.promote(&from, &to);
                self.series.promote(&from, &to);
                info!(from = %from, to = %to, "promoted edit-mode cache entry");
                to
            }
            KeyResolution::Hit(key) | KeyResolution::Miss(key) => key,
        };

        let cached = self.series.get(&key);
        let mut window = self.windows.get(&key);
        if cached.is_none() && !window.is_empty() {
            // Series expired ahead of its window: refetch everything.
            self.windows.reset(&key);
            window = CachedWindow::empty();
        }

        let plan = if query.append_data || cached.is_none() {
            compute_ranges(&GapRequest {
                from: query.from,
                to: query.to,
                window,
                collect_interval: query.collect_interval,
                historical_data: query.historical_data,
                last_x_time: identity.last_x_time,
                max_records_per_call: self.config.max_records_per_call,
                now,
            })
        } else {
            GapPlan::default()
        };
        let wait_secs = plan.wait_secs;

        let (plan, mut pending) = self.apply_budget(query, plan);
        for (direction, ranges) in [
            (Direction::Prepend, &plan.prepend),
            (Direction::Append, &plan.append),
        ] {
            metrics::counter!(
                telemetry::SUBRANGES_PLANNED_TOTAL,
                "direction" => direction.as_str()
            )
            .increment(ranges.len() as u64);
        }

        let mut rate_limited = false;
        let mut fetched = Vec::new();
        if !plan.is_empty() {
            match self.fetch_plan(query, &plan).await {
                Ok(chunks) => fetched = chunks,
                Err(e) if e.is_rate_limited() => {
                    warn!(error = %e, "upstream rate limited, serving cached data");
                    rate_limited = true;
                    pending = pending.saturating_add(plan.total_calls() as u32);
                }
                Err(e) => return Err(e),
            }
        }
        let api_calls = fetched.len();

        let mut fetched = fetched.into_iter();
        let mut slots: Vec<RawDataChunk> = fetched.by_ref().take(plan.prepend.len()).collect();
        if let Some(series) = cached {
            slots.push(series.into());
        }
        slots.extend(fetched);

        if slots.is_empty() {
            if rate_limited || pending > 0 {
                return Ok(QueryOutcome {
                    frames: Vec::new(),
                    pending_api_calls: pending,
                    wait_secs,
                    rate_limited,
                    window,
                    api_calls,
                });
            }
            return Err(GapcacheError::NoData);
        }

        let merged = merge(
            &slots,
            &MergeSpec {
                from: query.from,
                to: query.to,
                matcher: &matcher,
                editing: identity.editing,
                data_points: &query.data_points,
            },
        )?;
        if !merged.matched_any {
            return Err(GapcacheError::NoMatchingInstances);
        }

        if api_calls > 0 {
            let series_ttl = if identity.editing {
                self.config.edit_ttl
            } else {
                query.cache_ttl.unwrap_or(self.config.series_ttl)
            };
            let window_ttl = series_ttl + self.config.window_margin;

            if let Some(start) = merged.earliest_fetched_secs {
                window = self.windows.extend_start(&key, start, window_ttl);
            }
            if let Some(end) = merged.latest_matched_secs {
                window = self.windows.extend_end(&key, end, window_ttl);
            }
            self.series.store(&key, merged.full, series_ttl);
        }

        info!(
            api_calls,
            pending_api_calls = pending,
            wait_secs = ?wait_secs,
            window_start = window.start,
            window_end = window.end,
            frames = merged.frames.len(),
            "query served"
        );

        Ok(QueryOutcome {
            frames: merged.frames,
            pending_api_calls: pending,
            wait_secs,
            rate_limited,
            window,
            api_calls,
        })
    }

    /// Reserve budget for `plan` and drop what was not granted.
    fn apply_budget(&self, query: &MetricQuery, plan: GapPlan) -> (GapPlan, u32) {
        let planned = plan.total_calls();
        if planned == 0 {
            return (plan, 0);
        }
        let quota = query.api_quota.or(self.budget.config().quota);
        let requested = u32::try_from(planned).unwrap_or(u32::MAX);
        let grant = self
            .budget
            .try_acquire(self.dispatcher.source().name(), requested, quota);
        if grant.pending > 0 {
            metrics::counter!(telemetry::BUDGET_PENDING_CALLS_TOTAL)
                .increment(u64::from(grant.pending));
            warn!(
                planned,
                granted = grant.granted,
                pending = grant.pending,
                used = grant.used_before,
                "call budget exhausted, deferring sub-ranges"
            );
        }
        (plan.clip_to_budget(grant.granted as usize), grant.pending)
    }

    /// Fetch every sub-range of `plan`, returned in slot order
    /// (prepend ranges, then append ranges, each chronological).
    async fn fetch_plan(&self, query: &MetricQuery, plan: &GapPlan) -> Result<Vec<RawDataChunk>> {
        let mut jobs = plan
            .prepend
            .iter()
            .chain(&plan.append)
            .enumerate()
            .map(|(job_id, range)| FetchJob {
                job_id,
                range: *range,
            });
        let Some(first) = jobs.next() else {
            return Ok(Vec::new());
        };

        let mut target = self.resolve_target(query, false).await?;
        let first_chunk = match self.fetch_first(&target, first).await {
            Ok(chunk) => chunk,
            Err(e) if e.is_resolution() => {
                warn!(error = %e, "upstream ids are stale, re-resolving once");
                self.lookups.invalidate(
                    &query.host.label,
                    Some(target.device_id.as_str()),
                    query.data_source.id,
                );
                target = self.resolve_target(query, true).await?;
                self.fetch_first(&target, first).await?
            }
            Err(e) => return Err(e),
        };

        let concurrency = query.concurrency.or(self.config.concurrency);
        let rest = self
            .dispatcher
            .fetch_all(&target, jobs.collect(), concurrency)
            .await?;

        let mut chunks = Vec::with_capacity(rest.len() + 1);
        chunks.push(first_chunk);
        chunks.extend(rest);
        Ok(chunks)
    }

    /// Fetch the earliest sub-range inline. A non-OK chunk is an error here
    /// so that no further calls are dispatched for a query bound to fail.
    async fn fetch_first(&self, target: &FetchTarget, job: FetchJob) -> Result<RawDataChunk> {
        let chunk = self.dispatcher.fetch_one(target, job).await?;
        if !chunk.is_ok() {
            return Err(GapcacheError::ChunkFailed {
                job_id: chunk.job_id,
                message: chunk.error,
            });
        }
        Ok(chunk)
    }

    /// Device and device-data-source ids for `query`.
    ///
    /// Ids carried by the query are used as-is unless `refresh` is set,
    /// in which case they are looked up again by label.
    async fn resolve_target(&self, query: &MetricQuery, refresh: bool) -> Result<FetchTarget> {
        let source = self.dispatcher.source().as_ref();
        let device_id = match &query.host.id {
            Some(id) if !refresh => id.clone(),
            _ => self.lookups.host_id(source, &query.host.label).await?,
        };
        let hds_id = match query.data_source.hds_id {
            Some(id) if !refresh || query.data_source.id <= 0 => id,
            _ => {
                self.lookups
                    .host_datasource_id(source, &device_id, query.data_source.id)
                    .await?
            }
        };
        Ok(FetchTarget { device_id, hds_id })
    }
}
