//! Host and device-data-source id lookups.

use std::time::Duration;

use tracing::{info, instrument};

use super::TtlStore;
use crate::Result;
use crate::source::MetricSource;
use crate::telemetry;

/// Default lifetime of a resolved id.
pub const DEFAULT_RESOLUTION_TTL: Duration = Duration::from_secs(600);

/// TTL'd cache of resolved upstream identifiers.
///
/// Host labels map to device ids; `(device id, data-source id)` pairs map to
/// the per-host device-data-source id the raw-data endpoint needs.
pub struct ResolutionCache {
    hosts: TtlStore<String>,
    host_datasources: TtlStore<i64>,
    ttl: Duration,
}

impl ResolutionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            hosts: TtlStore::new("host"),
            host_datasources: TtlStore::new("hds"),
            ttl,
        }
    }

    /// Device id for `label`, asking `source` on a miss.
    #[instrument(skip(self, source), fields(source = source.name()))]
    pub async fn host_id(&self, source: &dyn MetricSource, label: &str) -> Result<String> {
        if let Some(id) = self.hosts.get(label) {
            return Ok(id);
        }
        metrics::counter!(telemetry::RESOLUTIONS_TOTAL, "kind" => "host").increment(1);
        let id = source.resolve_host(label).await?;
        info!(label, id = %id, "resolved host");
        self.hosts.set(label, id.clone(), self.ttl);
        Ok(id)
    }

    /// Device-data-source id for `(device_id, datasource_id)`, asking
    /// `source` on a miss.
    #[instrument(skip(self, source), fields(source = source.name()))]
    pub async fn host_datasource_id(
        &self,
        source: &dyn MetricSource,
        device_id: &str,
        datasource_id: i64,
    ) -> Result<i64> {
        let key = hds_key(device_id, datasource_id);
        if let Some(id) = self.host_datasources.get(&key) {
            return Ok(id);
        }
        metrics::counter!(telemetry::RESOLUTIONS_TOTAL, "kind" => "hds").increment(1);
        let id = source
            .resolve_host_datasource(device_id, datasource_id)
            .await?;
        info!(device_id, datasource_id, hds_id = id, "resolved host data source");
        self.host_datasources.set(key, id, self.ttl);
        Ok(id)
    }

    /// Drop cached ids so the next lookup goes upstream.
    pub fn invalidate(&self, host_label: &str, device_id: Option<&str>, datasource_id: i64) {
        self.hosts.remove(host_label);
        if let Some(device_id) = device_id {
            self.host_datasources
                .remove(&hds_key(device_id, datasource_id));
        }
    }

    /// Number of cached ids across both namespaces.
    pub fn count(&self) -> u64 {
        self.hosts.count() + self.host_datasources.count()
    }
}

impl Default for ResolutionCache {
    fn default() -> Self {
        Self::new(DEFAULT_RESOLUTION_TTL)
    }
}

fn hds_key(device_id: &str, datasource_id: i64) -> String {
    format!("{device_id}-{datasource_id}")
}
