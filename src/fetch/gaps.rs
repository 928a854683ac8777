//! Gap calculator.
//!
//! Turns "what is cached" plus "what is requested" into the sub-ranges that
//! still have to be fetched. Everything here is pure: "now" is an input.
//!
//! # Layout of a plan
//!
//! ```text
//!   requested:      from |------------------------------------------| to
//!   cached:                      start |==============| end
//!   prepend:   trunc(from) |--------| start-1
//!   append:                                    end+1 |---------------| min(to, now)
//! ```
//!
//! Each side is split back-to-front into sub-ranges of at most
//! `max_records_per_call * collect_interval` seconds, then returned in
//! chronological order.

use tracing::{debug, warn};

use crate::clock::truncate_to_minute;
use crate::types::{CachedWindow, PendingTimeRange};

/// Records the upstream returns per raw-data call.
pub const DEFAULT_MAX_RECORDS_PER_CALL: i64 = 500;

/// Inputs to [`compute_ranges`]. Times are epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapRequest {
    pub from: i64,
    pub to: i64,
    pub window: CachedWindow,
    pub collect_interval: i64,
    pub historical_data: bool,
    pub last_x_time: bool,
    pub max_records_per_call: i64,
    pub now: i64,
}

/// Sub-ranges to fetch, each list in chronological order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GapPlan {
    pub prepend: Vec<PendingTimeRange>,
    pub append: Vec<PendingTimeRange>,
    /// Set when nothing new can exist yet on the append side.
    pub wait_secs: Option<i64>,
}

impl GapPlan {
    pub fn total_calls(&self) -> usize {
        self.prepend.len() + self.append.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_calls() == 0
    }

    /// Keep at most `granted` sub-ranges.
    ///
    /// Append ranges are granted first, earliest first; prepend ranges get
    /// the remainder, latest first. What survives is always adjacent to the
    /// cached window, so the window keeps growing without holes and the
    /// next call picks up where this one stopped.
    pub fn clip_to_budget(mut self, granted: usize) -> GapPlan {
        let keep_append = self.append.len().min(granted);
        self.append.truncate(keep_append);
        let keep_prepend = self.prepend.len().min(granted - keep_append);
        let drop = self.prepend.len() - keep_prepend;
        self.prepend.drain(..drop);
        self
    }
}

/// Number of records in `[from, to]`, rounded up.
pub fn record_count(from: i64, to: i64, collect_interval: i64) -> i64 {
    if collect_interval <= 0 || to <= from {
        return 0;
    }
    let span = to - from;
    span / collect_interval + i64::from(span % collect_interval > 0)
}

/// Split `[from, to]` back-to-front into sub-ranges spanning at most
/// `max_records * collect_interval` seconds, clipping `to` to `now`.
///
/// Returned in chronological order. Empty for zero or negative spans.
pub fn split_span(
    from: i64,
    to: i64,
    collect_interval: i64,
    max_records: i64,
    now: i64,
) -> Vec<PendingTimeRange> {
    let to = to.min(now);
    if collect_interval <= 0 || max_records <= 0 || to <= from {
        return Vec::new();
    }
    let width = max_records.saturating_mul(collect_interval);
    let mut ranges = Vec::new();
    let mut end = to;
    while end > from {
        let start = end.saturating_sub(width).max(from);
        ranges.push(PendingTimeRange::new(start, end));
        end = start - 1;
    }
    ranges.reverse();
    ranges
}

/// Plan the sub-ranges needed to cover `[req.from, req.to]`.
pub fn compute_ranges(req: &GapRequest) -> GapPlan {
    let mut plan = GapPlan::default();
    let interval = req.collect_interval;
    if interval <= 0 || req.to <= req.from {
        return plan;
    }
    let max_records = req.max_records_per_call.max(1);
    let aligned_from = truncate_to_minute(req.from);

    let window = req.window;
    if window.has_start() && window.start - req.from > interval {
        let prepend_to = window.start - 1;
        if req.historical_data {
            plan.prepend = split_span(aligned_from, prepend_to, interval, max_records, req.now);
        } else if record_count(req.from, req.to, interval) < max_records {
            // Backfill disabled: one call at most, adjacent to the cached
            // start. Minute alignment can push the span past one call's cap.
            let mut ranges = split_span(aligned_from, prepend_to, interval, max_records, req.now);
            plan.prepend = ranges.pop().into_iter().collect();
        }
    }

    if window.has_end() {
        let since_last = req.to - window.end;
        if since_last >= interval {
            plan.append = split_span(window.end + 1, req.to, interval, max_records, req.now);
        } else if since_last >= 0 {
            plan.wait_secs = Some(interval - since_last);
        }
    } else {
        plan.append = split_span(aligned_from, req.to, interval, max_records, req.now);
    }

    debug!(
        prepend = plan.prepend.len(),
        append = plan.append.len(),
        wait_secs = ?plan.wait_secs,
        "planned sub-ranges"
    );
    if plan.is_empty() && plan.wait_secs.is_none() && req.last_x_time {
        warn!(from = req.from, to = req.to, "no time range to fetch for rolling query");
    }
    plan
}
