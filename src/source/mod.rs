//! Upstream data sources.

pub mod auth;
pub mod rest;
pub mod retry;
pub mod traits;

pub use auth::{AuthScheme, Credentials};
pub use rest::{RestClient, RestConfig};
pub use retry::{RetryConfig, RetryingSource};
pub use traits::{MetricSource, RawDataRequest};
