//! The upstream seam.
//!
//! The coordinator talks to the monitoring API only through
//! [`MetricSource`]. [`RestClient`](super::RestClient) is the production
//! implementation; tests substitute in-memory sources.
//!
//! # Error contract
//!
//! Implementations classify failures before returning them:
//! - transport failures → `Network`, `Timeout`, `InvalidCompany`
//! - HTTP 429 → `RateLimited` (with the `Retry-After` hint if present)
//! - HTTP 503 → `ServiceUnavailable`, other non-2xx → `Api`
//! - unknown device / data source → `DeviceNotFound` / `DataSourceNotFound`
//!
//! A raw-data payload whose envelope carries a non-OK status is *not* an
//! error at this layer: the bytes are returned and the chunk records the
//! message.

use async_trait::async_trait;

use crate::Result;
use crate::types::PendingTimeRange;

/// Parameters of one raw-data call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDataRequest {
    pub device_id: String,
    pub hds_id: i64,
    pub range: PendingTimeRange,
}

/// Authenticated access to the remote monitoring API.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Endpoint identity. Also the key of the shared call budget.
    fn name(&self) -> &str;

    /// Fetch the raw multi-instance payload for one sub-range.
    async fn fetch_raw(&self, request: &RawDataRequest) -> Result<Vec<u8>>;

    /// Resolve a host display label to its device id.
    async fn resolve_host(&self, label: &str) -> Result<String>;

    /// Resolve `(device id, data-source id)` to the device-data-source id.
    async fn resolve_host_datasource(&self, device_id: &str, datasource_id: i64) -> Result<i64>;
}
