//! Public data types for gapcache.

mod frame;
mod identity;
mod outcome;
mod query;
mod range;
mod series;

pub use frame::{Field, Frame};
pub use identity::{KeyResolution, LAST_X_THRESHOLD_SECS, QueryIdentity};
pub use outcome::QueryOutcome;
pub use query::{DataSourceRef, HostRef, InstanceSelection, MetricQuery};
pub use range::{CachedWindow, Direction, PendingTimeRange};
pub use series::{Cell, MergedSeries, NO_DATA, RawDataChunk, STATUS_OK, ValuesAndTime};
