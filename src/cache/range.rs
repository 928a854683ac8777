//! Range tracker: the cached window per query identity.

use std::time::Duration;

use tracing::debug;

use super::TtlStore;
use crate::types::{CachedWindow, KeyResolution, QueryIdentity};

/// Earliest/latest cached timestamp per query identity.
///
/// Windows only ever widen: [`extend_start`](Self::extend_start) lowers the
/// start and [`extend_end`](Self::extend_end) raises the end, each as one
/// atomic read-modify-write, so concurrent writers leave the more extreme of
/// their values.
pub struct RangeTracker {
    windows: TtlStore<CachedWindow>,
}

impl RangeTracker {
    pub fn new() -> Self {
        Self::with_max_entries(super::DEFAULT_MAX_ENTRIES)
    }

    pub fn with_max_entries(max: u64) -> Self {
        Self {
            windows: TtlStore::with_max_entries("window", max),
        }
    }

    /// Window for `identity`, promoting a settled edit-mode window first.
    ///
    /// Returns [`CachedWindow::empty`] when nothing is cached.
    pub fn window(&self, identity: &QueryIdentity) -> CachedWindow {
        match identity.resolve(|key| self.windows.contains(key)) {
            KeyResolution::Hit(key) => self.get(&key),
            KeyResolution::Promote { from, to } => {
                self.promote(&from, &to);
                self.get(&to)
            }
            KeyResolution::Miss(_) => CachedWindow::empty(),
        }
    }

    /// Window stored under exactly `key`.
    pub fn get(&self, key: &str) -> CachedWindow {
        self.windows.get(key).unwrap_or_default()
    }

    /// Move the window under `from` to `to`. Returns whether anything moved.
    pub fn promote(&self, from: &str, to: &str) -> bool {
        let moved = self.windows.rename(from, to);
        if moved {
            debug!(from, to, "promoted cached window");
        }
        moved
    }

    /// Lower the start to `ts` if it is positive and earlier than the
    /// current start. Returns the window afterwards.
    pub fn extend_start(&self, key: &str, ts: i64, ttl: Duration) -> CachedWindow {
        self.windows
            .update(key, ttl, |current| {
                let current = current.unwrap_or_default();
                let widened = current.with_start(ts);
                (widened != current).then_some(widened)
            })
            .unwrap_or_default()
    }

    /// Raise the end to `ts` if it is later than the current end. Returns
    /// the window afterwards.
    pub fn extend_end(&self, key: &str, ts: i64, ttl: Duration) -> CachedWindow {
        self.windows
            .update(key, ttl, |current| {
                let current = current.unwrap_or_default();
                let widened = current.with_end(ts);
                (widened != current).then_some(widened)
            })
            .unwrap_or_default()
    }

    /// Forget the window under `key`.
    pub fn reset(&self, key: &str) {
        self.windows.remove(key);
    }

    /// Number of tracked windows.
    pub fn count(&self) -> u64 {
        self.windows.count()
    }
}

impl Default for RangeTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataSourceRef, HostRef, MetricQuery};

    const TTL: Duration = Duration::from_secs(120);
    const NOW: i64 = 1_700_000_000;

    fn identity(last_edited_ms: i64) -> QueryIdentity {
        let query = MetricQuery::new(HostRef::new("h"), DataSourceRef::new("ds", 1))
            .window(NOW - 3600, NOW)
            .last_edited_ms(last_edited_ms);
        QueryIdentity::derive(&query, NOW * 1000)
    }

    #[test]
    fn missing_window_is_empty() {
        let tracker = RangeTracker::new();
        assert!(tracker.window(&identity(0)).is_empty());
    }

    #[test]
    fn extension_is_monotonic() {
        let tracker = RangeTracker::new();
        let w = tracker.extend_start("k", 1000, TTL);
        assert_eq!(w.start, 1000);
        assert_eq!(tracker.extend_start("k", 2000, TTL).start, 1000);
        assert_eq!(tracker.extend_start("k", 0, TTL).start, 1000);
        assert_eq!(tracker.extend_start("k", 500, TTL).start, 500);

        assert_eq!(tracker.extend_end("k", 3000, TTL).end, 3000);
        assert_eq!(tracker.extend_end("k", 2500, TTL).end, 3000);
        assert_eq!(tracker.get("k"), CachedWindow { start: 500, end: 3000 });
    }

    #[test]
    fn non_improving_extension_on_empty_key_stores_nothing() {
        let tracker = RangeTracker::new();
        assert!(tracker.extend_start("k", 0, TTL).is_empty());
        assert!(tracker.extend_end("k", 0, TTL).is_empty());
        assert_eq!(tracker.count(), 0);
    }

    #[test]
    fn settled_edit_window_is_promoted() {
        let tracker = RangeTracker::new();
        let edited = NOW * 1000 - 300_000;
        let id = identity(edited);
        let edit_key = id.edit.clone().unwrap();
        tracker.extend_start(&edit_key, 100, TTL);
        tracker.extend_end(&edit_key, 200, TTL);

        let w = tracker.window(&id);
        assert_eq!(w, CachedWindow { start: 100, end: 200 });
        assert_eq!(tracker.get(&id.stable), w);
        assert!(tracker.get(&edit_key).is_empty());
    }

    #[test]
    fn editing_does_not_promote() {
        let tracker = RangeTracker::new();
        let edited = NOW * 1000 - 5_000;
        let id = identity(edited);
        tracker.extend_end(&id.stable, 999, TTL);
        assert!(tracker.window(&id).is_empty());
        assert_eq!(tracker.get(&id.stable).end, 999);
    }

    #[test]
    fn racing_extensions_keep_the_extreme() {
        let tracker = std::sync::Arc::new(RangeTracker::new());
        let handles: Vec<_> = (1..=16)
            .map(|i| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    tracker.extend_start("k", 1000 - i, TTL);
                    tracker.extend_end("k", 1000 + i, TTL);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.get("k"), CachedWindow { start: 984, end: 1016 });
    }
}
