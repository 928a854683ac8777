//! Per-endpoint upstream call budget.
//!
//! Every query against the same upstream endpoint draws from one shared
//! counter, so the budget caps aggregate load rather than per-query load.
//! Reservation is a single atomic read-modify-write on the endpoint's entry.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::TtlStore;
use crate::clock::Clock;

/// How calls are attributed to a rate window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BudgetWindow {
    /// Calls count toward the window containing "now", aligned to multiples
    /// of the window length. The counter resets at each boundary.
    #[default]
    TruncatedMinute,
    /// Calls count for exactly one window length after they were issued.
    Sliding,
}

/// Call budget configuration.
///
/// ```rust
/// # use gapcache::{BudgetConfig, BudgetWindow};
/// let config = BudgetConfig::new()
///     .quota(100)
///     .window(BudgetWindow::Sliding);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetConfig {
    /// Calls allowed per window. `None` disables throttling.
    pub quota: Option<u32>,
    pub window: BudgetWindow,
    /// Window length in seconds. Default: 60.
    pub window_secs: i64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            quota: None,
            window: BudgetWindow::default(),
            window_secs: 60,
        }
    }
}

impl BudgetConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quota(mut self, quota: u32) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn window(mut self, window: BudgetWindow) -> Self {
        self.window = window;
        self
    }

    pub fn window_secs(mut self, secs: i64) -> Self {
        self.window_secs = secs.max(1);
        self
    }
}

/// Budget usage of one endpoint in the current window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallBudgetEntry {
    /// Start of the current window, epoch seconds.
    pub window_start: i64,
    pub calls_this_window: u32,
    /// Calls requested but refused in this window.
    pub total_outstanding: u32,
}

/// Result of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetGrant {
    pub granted: u32,
    pub pending: u32,
    /// Calls already used in the window before this reservation.
    pub used_before: u32,
}

#[derive(Debug, Clone, Default)]
struct BudgetState {
    window_start: i64,
    calls: u32,
    outstanding: u32,
    /// (issued at millis, count); sliding windows only.
    issued: VecDeque<(i64, u32)>,
}

/// Shared per-endpoint call counter.
pub struct CallBudgetTracker {
    config: BudgetConfig,
    clock: Arc<dyn Clock>,
    entries: TtlStore<BudgetState>,
}

impl CallBudgetTracker {
    pub fn new(config: BudgetConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            entries: TtlStore::new("budget"),
        }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Usage of `endpoint` in the current window. Stale entries read as zero.
    pub fn get(&self, endpoint: &str) -> CallBudgetEntry {
        let now_ms = self.clock.now_millis();
        let state = self
            .entries
            .get(endpoint)
            .map(|state| self.roll(state, now_ms))
            .unwrap_or_else(|| self.fresh(now_ms));
        entry_of(&state)
    }

    /// Record `n` calls issued now against `endpoint`.
    pub fn add(&self, endpoint: &str, n: u32) -> CallBudgetEntry {
        let now_ms = self.clock.now_millis();
        let state = self.entries.update(endpoint, self.entry_ttl(), |current| {
            let mut state = match current {
                Some(state) => self.roll(state, now_ms),
                None => self.fresh(now_ms),
            };
            self.record(&mut state, now_ms, n);
            Some(state)
        });
        state.as_ref().map(entry_of).unwrap_or_default()
    }

    /// Reserve up to `requested` calls under `quota`.
    ///
    /// Grants `min(requested, quota - used)` and records the rest as
    /// outstanding. With no quota everything is granted.
    pub fn try_acquire(&self, endpoint: &str, requested: u32, quota: Option<u32>) -> BudgetGrant {
        let now_ms = self.clock.now_millis();
        let mut grant = BudgetGrant {
            granted: requested,
            pending: 0,
            used_before: 0,
        };
        self.entries.update(endpoint, self.entry_ttl(), |current| {
            let mut state = match current {
                Some(state) => self.roll(state, now_ms),
                None => self.fresh(now_ms),
            };
            grant.used_before = state.calls;
            if let Some(quota) = quota
                && requested.saturating_add(state.calls) > quota
            {
                grant.granted = quota.saturating_sub(state.calls);
                grant.pending = requested - grant.granted;
            }
            self.record(&mut state, now_ms, grant.granted);
            state.outstanding = state.outstanding.saturating_add(grant.pending);
            Some(state)
        });
        debug!(
            endpoint,
            requested,
            granted = grant.granted,
            pending = grant.pending,
            used_before = grant.used_before,
            "call budget reserved"
        );
        grant
    }

    fn window_ms(&self) -> i64 {
        self.config.window_secs.max(1) * 1000
    }

    fn entry_ttl(&self) -> Duration {
        Duration::from_secs(self.config.window_secs.max(1) as u64)
    }

    fn window_start(&self, now_ms: i64) -> i64 {
        let now_secs = now_ms.div_euclid(1000);
        match self.config.window {
            BudgetWindow::TruncatedMinute => {
                now_secs - now_secs.rem_euclid(self.config.window_secs.max(1))
            }
            BudgetWindow::Sliding => now_secs - self.config.window_secs.max(1),
        }
    }

    fn fresh(&self, now_ms: i64) -> BudgetState {
        BudgetState {
            window_start: self.window_start(now_ms),
            ..Default::default()
        }
    }

    /// Bring `state` forward to the window containing `now_ms`.
    fn roll(&self, mut state: BudgetState, now_ms: i64) -> BudgetState {
        match self.config.window {
            BudgetWindow::TruncatedMinute => {
                if state.window_start != self.window_start(now_ms) {
                    return self.fresh(now_ms);
                }
                state
            }
            BudgetWindow::Sliding => {
                let cutoff = now_ms - self.window_ms();
                while state.issued.front().is_some_and(|(at, _)| *at <= cutoff) {
                    state.issued.pop_front();
                }
                state.calls = state.issued.iter().map(|(_, n)| *n).sum();
                if state.issued.is_empty() {
                    state.outstanding = 0;
                }
                state.window_start = self.window_start(now_ms);
                state
            }
        }
    }

    fn record(&self, state: &mut BudgetState, now_ms: i64, n: u32) {
        if n == 0 {
            return;
        }
        state.calls = state.calls.saturating_add(n);
        if self.config.window == BudgetWindow::Sliding {
            state.issued.push_back((now_ms, n));
        }
    }
}

fn entry_of(state: &BudgetState) -> CallBudgetEntry {
    CallBudgetEntry {
        window_start: state.window_start,
        calls_this_window: state.calls,
        total_outstanding: state.outstanding,
    }
}
