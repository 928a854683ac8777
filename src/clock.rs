//! Time source for every "now"-dependent decision.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Current time in epoch milliseconds.
    fn now_millis(&self) -> i64;

    /// Current time in epoch seconds.
    fn now_secs(&self) -> i64 {
        self.now_millis().div_euclid(1000)
    }
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to. Cloned handles share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    /// Create a clock frozen at `secs` epoch seconds.
    pub fn at_secs(secs: i64) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(secs * 1000)),
        }
    }

    pub fn set_secs(&self, secs: i64) {
        self.millis.store(secs * 1000, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.millis.fetch_add(secs * 1000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Round epoch seconds down to the start of their minute.
pub fn truncate_to_minute(secs: i64) -> i64 {
    secs - secs.rem_euclid(60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_to_minute() {
        assert_eq!(truncate_to_minute(120), 120);
        assert_eq!(truncate_to_minute(179), 120);
        assert_eq!(truncate_to_minute(1_700_000_059), 1_700_000_040);
    }

    #[test]
    fn manual_clock_handles_share_time() {
        let clock = ManualClock::at_secs(100);
        let other = clock.clone();
        clock.advance_secs(5);
        assert_eq!(other.now_secs(), 105);
        other.set_secs(10);
        assert_eq!(clock.now_millis(), 10_000);
    }
}
