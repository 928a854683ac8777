//! Builder for configuring coordinator instances

use std::sync::Arc;

use super::{Coordinator, CoordinatorConfig};
use crate::cache::{CallBudgetTracker, RangeTracker, ResolutionCache, SeriesCache};
use crate::clock::{Clock, SystemClock};
use crate::fetch::Dispatcher;
use crate::source::{MetricSource, RetryConfig, RetryingSource};
use crate::{GapcacheError, Result};

/// Builder for [`Coordinator`].
///
/// ```rust,no_run
/// # use gapcache::{Coordinator, Credentials, RestClient, RestConfig};
/// # use std::sync::Arc;
/// # fn main() -> gapcache::Result<()> {
/// let client = RestClient::new(&RestConfig::new("acme"), Credentials::bearer("token"))?;
/// let coordinator = Coordinator::builder()
///     .source(Arc::new(client))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct CoordinatorBuilder {
    source: Option<Arc<dyn MetricSource>>,
    clock: Option<Arc<dyn Clock>>,
    config: CoordinatorConfig,
    retry: RetryConfig,
    budget: Option<Arc<CallBudgetTracker>>,
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            clock: None,
            config: CoordinatorConfig::default(),
            retry: RetryConfig::default(),
            budget: None,
        }
    }

    /// Upstream the coordinator fetches from (required).
    pub fn source(mut self, source: Arc<dyn MetricSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Time source (default: the system clock).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Retry transient upstream failures (default: no retry).
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Share a call budget with other coordinators hitting the same
    /// endpoint. Without this, the coordinator gets a private tracker built
    /// from `config.budget`.
    pub fn budget(mut self, budget: Arc<CallBudgetTracker>) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn build(self) -> Result<Coordinator> {
        let source = self.source.ok_or_else(|| {
            GapcacheError::Configuration("no metric source configured".to_string())
        })?;
        if self.config.max_records_per_call <= 0 {
            return Err(GapcacheError::Configuration(
                "max_records_per_call must be positive".to_string(),
            ));
        }
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let budget = self.budget.unwrap_or_else(|| {
            Arc::new(CallBudgetTracker::new(
                self.config.budget.clone(),
                clock.clone(),
            ))
        });
        let source = RetryingSource::wrap(source, self.retry);

        Ok(Coordinator {
            windows: RangeTracker::with_max_entries(self.config.max_entries),
            series: SeriesCache::with_max_entries(self.config.max_entries),
            lookups: ResolutionCache::new(self.config.resolution_ttl),
            dispatcher: Dispatcher::new(source),
            budget,
            clock,
            config: self.config,
        })
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::RawDataRequest;
    use async_trait::async_trait;

    struct NullSource;

    #[async_trait]
    impl MetricSource for NullSource {
        fn name(&self) -> &str {
            "null"
        }

        async fn fetch_raw(&self, _request: &RawDataRequest) -> Result<Vec<u8>> {
            Err(GapcacheError::NoData)
        }

        async fn resolve_host(&self, label: &str) -> Result<String> {
            Err(GapcacheError::HostNotFound(label.to_string()))
        }

        async fn resolve_host_datasource(&self, device_id: &str, _ds: i64) -> Result<i64> {
            Err(GapcacheError::DataSourceNotFound(device_id.to_string()))
        }
    }

    #[test]
    fn build_without_source_fails() {
        let result = CoordinatorBuilder::new().build();
        assert!(matches!(result, Err(GapcacheError::Configuration(_))));
    }

    #[test]
    fn build_rejects_non_positive_record_limit() {
        let result = CoordinatorBuilder::new()
            .source(Arc::new(NullSource))
            .config(CoordinatorConfig::new().max_records_per_call(0))
            .build();
        assert!(matches!(result, Err(GapcacheError::Configuration(_))));
    }

    #[test]
    fn shared_budget_is_used_as_given() {
        let budget = Arc::new(CallBudgetTracker::new(
            Default::default(),
            Arc::new(SystemClock),
        ));
        let coordinator = CoordinatorBuilder::new()
            .source(Arc::new(NullSource))
            .budget(budget.clone())
            .build()
            .unwrap();
        assert!(std::ptr::eq(coordinator.budget(), budget.as_ref()));
    }
}
