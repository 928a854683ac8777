//! Gap planning, dispatch and merging.
//!
//! - [`gaps`] decides which sub-ranges still need an upstream call
//! - [`dispatch`] runs those calls with bounded concurrency
//! - [`merge`] folds the resulting chunks and the cached series into frames

pub mod dispatch;
pub mod gaps;
pub mod merge;

pub use dispatch::{Dispatcher, FetchJob, FetchTarget, fetch_chunk};
pub use gaps::{DEFAULT_MAX_RECORDS_PER_CALL, GapPlan, GapRequest, compute_ranges};
pub use merge::{InstanceMatcher, MergeOutput, MergeSpec, merge};
