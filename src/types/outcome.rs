//! Result of one `get_data` call.

use serde::Serialize;

use super::frame::Frame;
use super::range::CachedWindow;

/// Windowed frames plus the bookkeeping the caller needs to schedule its
/// next refresh.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    /// One frame per matched instance, sorted by name.
    pub frames: Vec<Frame>,
    /// Calls withheld by the call budget; retry later to fill the rest.
    pub pending_api_calls: u32,
    /// Seconds until new data can plausibly exist, when nothing was fetched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_secs: Option<i64>,
    /// The upstream reported rate limiting; frames come from cache only.
    pub rate_limited: bool,
    /// Cached window after this call.
    pub window: CachedWindow,
    /// Number of upstream raw-data calls issued.
    pub api_calls: usize,
}

impl QueryOutcome {
    /// Whether the caller should retry soon to complete the series.
    pub fn is_partial(&self) -> bool {
        self.pending_api_calls > 0 || self.rate_limited
    }

    pub fn frame(&self, name: &str) -> Option<&Frame> {
        self.frames.iter().find(|f| f.name == name)
    }
}
