//! Cached merged series per query identity.

use std::time::Duration;

use tracing::debug;

use super::TtlStore;
use crate::types::MergedSeries;

/// Full merged series, keyed like the range tracker.
pub struct SeriesCache {
    series: TtlStore<MergedSeries>,
}

impl SeriesCache {
    pub fn new() -> Self {
        Self::with_max_entries(super::DEFAULT_MAX_ENTRIES)
    }

    pub fn with_max_entries(max: u64) -> Self {
        Self {
            series: TtlStore::with_max_entries("series", max),
        }
    }

    pub fn get(&self, key: &str) -> Option<MergedSeries> {
        self.series.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.series.contains(key)
    }

    pub fn store(&self, key: &str, series: MergedSeries, ttl: Duration) {
        debug!(key, instances = series.instances.len(), rows = series.max_rows(), "storing series");
        self.series.set(key, series, ttl);
    }

    /// Move the series under `from` to `to`. Returns whether anything moved.
    pub fn promote(&self, from: &str, to: &str) -> bool {
        self.series.rename(from, to)
    }

    pub fn remove(&self, key: &str) {
        self.series.remove(key);
    }

    /// Number of cached series.
    pub fn count(&self) -> u64 {
        self.series.count()
    }
}

impl Default for SeriesCache {
    fn default() -> Self {
        Self::new()
    }
}
