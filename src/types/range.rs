//! Time ranges: fetch sub-ranges and the cached window.

use serde::{Deserialize, Serialize};

/// One `[from, to]` interval (epoch seconds, inclusive) fetched by a single
/// upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTimeRange {
    pub from: i64,
    pub to: i64,
}

impl PendingTimeRange {
    pub fn new(from: i64, to: i64) -> Self {
        Self { from, to }
    }

    pub fn span_secs(&self) -> i64 {
        self.to - self.from
    }
}

/// Which side of the cached window a sub-range extends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Older than the cached window.
    Prepend,
    /// Newer than the cached window.
    Append,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Prepend => "prepend",
            Direction::Append => "append",
        }
    }
}

/// Earliest and latest timestamp (epoch seconds) of data known to be cached
/// for one query identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedWindow {
    pub start: i64,
    pub end: i64,
}

impl CachedWindow {
    /// Start value of a window that has never been written.
    pub const EMPTY_START: i64 = i64::MAX;

    pub fn empty() -> Self {
        Self {
            start: Self::EMPTY_START,
            end: 0,
        }
    }

    /// No data has been recorded on either side.
    pub fn is_empty(&self) -> bool {
        !self.has_start() && !self.has_end()
    }

    pub fn has_start(&self) -> bool {
        self.start != Self::EMPTY_START
    }

    pub fn has_end(&self) -> bool {
        self.end > 0
    }

    /// Returns a copy with `start` lowered to `ts` if that tightens the window.
    pub fn with_start(self, ts: i64) -> Self {
        if ts > 0 && ts < self.start {
            Self { start: ts, ..self }
        } else {
            self
        }
    }

    /// Returns a copy with `end` raised to `ts` if that widens the window.
    pub fn with_end(self, ts: i64) -> Self {
        if ts > self.end {
            Self { end: ts, ..self }
        } else {
            self
        }
    }
}

impl Default for CachedWindow {
    fn default() -> Self {
        Self::empty()
    }
}
