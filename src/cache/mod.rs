//! Caching subsystem.
//!
//! Every namespace is a typed [`TtlStore`]:
//!
//! - [`range::RangeTracker`] — earliest/latest cached timestamp per query
//!   identity, including promotion of edit-mode entries.
//!
//! - [`series::SeriesCache`] — the full merged series per query identity,
//!   read back as the middle slot of the next merge.
//!
//! - [`budget::CallBudgetTracker`] — upstream calls issued per endpoint
//!   within the current rate window.
//!
//! - [`lookup::ResolutionCache`] — host label → device id and
//!   (device, data source) → device-data-source id.
//!
//! All of them are owned by a [`Coordinator`](crate::Coordinator) and
//! shared by every query it serves.

pub mod budget;
pub mod lookup;
pub mod range;
pub mod series;

pub use budget::{BudgetConfig, BudgetGrant, BudgetWindow, CallBudgetEntry, CallBudgetTracker};
pub use lookup::ResolutionCache;
pub use range::RangeTracker;
pub use series::SeriesCache;

use std::time::{Duration, Instant};

use moka::Expiry;
use moka::ops::compute::Op;
use moka::sync::Cache;

use crate::telemetry;

/// Default maximum number of entries per namespace.
pub const DEFAULT_MAX_ENTRIES: u64 = 10_000;

/// A value stored with its own time-to-live.
#[derive(Debug, Clone)]
struct Expiring<V> {
    value: V,
    ttl: Duration,
}

/// Expires each entry `ttl` after it was last written.
struct PerEntryTtl;

impl<V> Expiry<String, Expiring<V>> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Expiring<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Expiring<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Thread-safe string-keyed store with a per-entry expiry.
///
/// A read past an entry's expiry behaves as absent. Bounded by
/// `max_entries` (moka LRU) so long-running processes cannot grow without
/// limit. Hit/miss counters are labelled with the store's namespace.
pub struct TtlStore<V> {
    namespace: &'static str,
    entries: Cache<String, Expiring<V>>,
}

impl<V> TtlStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty store with the default capacity.
    pub fn new(namespace: &'static str) -> Self {
        Self::with_max_entries(namespace, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_max_entries(namespace: &'static str, max: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max)
            .expire_after(PerEntryTtl)
            .build();
        Self { namespace, entries }
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    /// Insert or overwrite `key`, expiring `ttl` from now.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.entries.insert(key.into(), Expiring { value, ttl });
    }

    /// Look up `key`. Emits cache hit/miss metrics.
    pub fn get(&self, key: &str) -> Option<V> {
        match self.entries.get(key) {
            Some(entry) => {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "namespace" => self.namespace)
                    .increment(1);
                Some(entry.value)
            }
            None => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "namespace" => self.namespace)
                    .increment(1);
                None
            }
        }
    }

    /// Presence check without touching metrics.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove `key`, returning its value if it was live.
    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries.remove(key).map(|entry| entry.value)
    }

    /// Number of live entries.
    pub fn count(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    /// Atomically replace the value under `key`.
    ///
    /// `f` receives the current live value (if any) and returns the value to
    /// store, or `None` to leave the entry untouched. Concurrent updates of
    /// the same key are serialized. Returns the value held afterwards.
    pub fn update<F>(&self, key: &str, ttl: Duration, f: F) -> Option<V>
    where
        F: FnOnce(Option<V>) -> Option<V>,
    {
        let mut held = None;
        let _ = self
            .entries
            .entry(key.to_string())
            .and_compute_with(|current| {
                let current = current.map(|entry| entry.into_value().value);
                match f(current.clone()) {
                    Some(value) => {
                        held = Some(value.clone());
                        Op::Put(Expiring { value, ttl })
                    }
                    None => {
                        held = current;
                        Op::Nop
                    }
                }
            });
        held
    }

    /// Move the entry under `from` to `to`, keeping its ttl.
    ///
    /// Returns `false` if `from` held nothing.
    pub fn rename(&self, from: &str, to: &str) -> bool {
        match self.entries.remove(from) {
            Some(entry) => {
                self.entries.insert(to.to_string(), entry);
                true
            }
            None => false,
        }
    }

    /// Evict all entries.
    pub fn clear(&self) {
        self.entries.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn set_get_remove() {
        let store = TtlStore::new("test");
        store.set("a", 1u32, TTL);
        assert_eq!(store.get("a"), Some(1));
        assert_eq!(store.get("b"), None);
        assert_eq!(store.remove("a"), Some(1));
        assert_eq!(store.get("a"), None);
        assert_eq!(store.remove("a"), None);
    }

    #[test]
    fn overwrite_replaces_value() {
        let store = TtlStore::new("test");
        store.set("a", 1u32, TTL);
        store.set("a", 2u32, TTL);
        assert_eq!(store.get("a"), Some(2));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn expired_entry_reads_as_absent() {
        let store = TtlStore::new("test");
        store.set("short", 1u32, Duration::from_millis(30));
        store.set("long", 2u32, TTL);
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(store.get("short"), None);
        assert!(!store.contains("short"));
        assert_eq!(store.get("long"), Some(2));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn update_sees_current_value() {
        let store = TtlStore::new("test");
        assert_eq!(store.update("n", TTL, |v| Some(v.unwrap_or(0) + 1)), Some(1));
        assert_eq!(store.update("n", TTL, |v| Some(v.unwrap_or(0) + 1)), Some(2));
        assert_eq!(store.update("n", TTL, |_: Option<u32>| None), Some(2));
        assert_eq!(store.get("n"), Some(2));
    }

    #[test]
    fn update_nop_on_missing_key_stores_nothing() {
        let store: TtlStore<u32> = TtlStore::new("test");
        assert_eq!(store.update("n", TTL, |_| None), None);
        assert!(!store.contains("n"));
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let store = std::sync::Arc::new(TtlStore::new("test"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.update("n", TTL, |v: Option<u32>| Some(v.unwrap_or(0) + 1));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.get("n"), Some(800));
    }

    #[test]
    fn rename_moves_entry() {
        let store = TtlStore::new("test");
        store.set("from", 7u32, TTL);
        assert!(store.rename("from", "to"));
        assert_eq!(store.get("from"), None);
        assert_eq!(store.get("to"), Some(7));
        assert!(!store.rename("missing", "to"));
    }
}
