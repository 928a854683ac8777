//! gapcache - incremental-fetch cache for time-series monitoring queries
//!
//! A dashboard refreshing a rolling window re-requests mostly the same data
//! every cycle. gapcache remembers which time window it already holds per
//! query, asks the upstream monitoring API only for the sub-ranges that are
//! missing, merges those with the cached series, and serves the requested
//! window back as per-instance frames.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gapcache::{
//!     Coordinator, Credentials, DataSourceRef, HostRef, InstanceSelection, MetricQuery,
//!     RestClient, RestConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> gapcache::Result<()> {
//!     let client = RestClient::new(&RestConfig::new("acme"), Credentials::bearer("token"))?;
//!     let coordinator = Coordinator::builder().source(Arc::new(client)).build()?;
//!
//!     let now = 1_700_000_000;
//!     let query = MetricQuery::new(HostRef::new("web-01"), DataSourceRef::new("CPU", 42))
//!         .window(now - 3600, now)
//!         .collect_interval(60)
//!         .selection(InstanceSelection::Regex(".*".into()));
//!
//!     let outcome = coordinator.get_data(&query).await?;
//!     for frame in &outcome.frames {
//!         println!("{}: {} rows", frame.name, frame.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fetch;
pub mod source;
pub mod telemetry;
pub mod types;
pub mod version;

// Re-export main types at crate root
pub use cache::{
    BudgetConfig, BudgetGrant, BudgetWindow, CallBudgetEntry, CallBudgetTracker, RangeTracker,
    ResolutionCache, SeriesCache, TtlStore,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, Secrets};
pub use coordinator::{Coordinator, CoordinatorBuilder, CoordinatorConfig};
pub use error::{GapcacheError, Result};
pub use fetch::{
    Dispatcher, FetchJob, FetchTarget, GapPlan, GapRequest, InstanceMatcher, MergeOutput,
    MergeSpec, compute_ranges, merge,
};
pub use source::{
    AuthScheme, Credentials, MetricSource, RawDataRequest, RestClient, RestConfig, RetryConfig,
    RetryingSource,
};
pub use types::{
    CachedWindow, Cell, DataSourceRef, Direction, Field, Frame, HostRef, InstanceSelection,
    KeyResolution, MergedSeries, MetricQuery, PendingTimeRange, QueryIdentity, QueryOutcome,
    RawDataChunk, ValuesAndTime,
};
