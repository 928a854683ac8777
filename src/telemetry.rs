//! Telemetry metric name constants.
//!
//! Consumers install their own `metrics` recorder (e.g. prometheus,
//! statsd); without a recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `gapcache_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `status` — outcome: "ok" or "error"
//! - `direction` — sub-range direction: "prepend" or "append"
//! - `namespace` — cache namespace: "series", "window", "host", "hds"
//! - `kind` — resolution kind: "host" or "hds"

/// Total upstream raw-data calls issued by the dispatcher.
///
/// Labels: `status` ("ok" | "error").
pub const UPSTREAM_CALLS_TOTAL: &str = "gapcache_upstream_calls_total";

/// Upstream raw-data call duration in seconds.
pub const UPSTREAM_CALL_DURATION_SECONDS: &str = "gapcache_upstream_call_duration_seconds";

/// Sub-ranges planned by the gap calculator (after budget clipping).
///
/// Labels: `direction`.
pub const SUBRANGES_PLANNED_TOTAL: &str = "gapcache_subranges_planned_total";

/// Calls withheld because the per-endpoint budget was exhausted.
pub const BUDGET_PENDING_CALLS_TOTAL: &str = "gapcache_budget_pending_calls_total";

/// Cache hits.
///
/// Labels: `namespace`.
pub const CACHE_HITS_TOTAL: &str = "gapcache_cache_hits_total";

/// Cache misses.
///
/// Labels: `namespace`.
pub const CACHE_MISSES_TOTAL: &str = "gapcache_cache_misses_total";

/// Retry attempts (not counting the initial request).
pub const RETRIES_TOTAL: &str = "gapcache_retries_total";

/// Host / data-source id resolutions that went to the upstream API.
///
/// Labels: `kind`.
pub const RESOLUTIONS_TOTAL: &str = "gapcache_resolutions_total";
