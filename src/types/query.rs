//! Query description supplied by the caller.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{GapcacheError, Result};

/// How raw instance keys are matched against the caller's selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceSelection {
    /// Explicit list of instance labels.
    Select(Vec<String>),
    /// Pattern tested against the raw key with its data-source prefix removed.
    Regex(String),
}

impl Default for InstanceSelection {
    fn default() -> Self {
        InstanceSelection::Select(Vec::new())
    }
}

/// Monitored host, by display label and (once resolved) device id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRef {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl HostRef {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            id: None,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Data source, by label and numeric id, plus the per-host data-source id
/// once resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceRef {
    pub label: String,
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hds_id: Option<i64>,
}

impl DataSourceRef {
    pub fn new(label: impl Into<String>, id: i64) -> Self {
        Self {
            label: label.into(),
            id,
            hds_id: None,
        }
    }

    pub fn hds_id(mut self, hds_id: i64) -> Self {
        self.hds_id = Some(hds_id);
        self
    }
}

/// One logical panel query.
///
/// Times are epoch seconds except `last_edited_ms`.
///
/// ```rust
/// # use gapcache::{MetricQuery, HostRef, DataSourceRef, InstanceSelection};
/// let query = MetricQuery::new(HostRef::new("web-01"), DataSourceRef::new("CPU", 42))
///     .window(1_700_000_000, 1_700_003_600)
///     .collect_interval(60)
///     .selection(InstanceSelection::Regex(".*".into()));
/// assert_eq!(query.span_secs(), 3600);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricQuery {
    /// Account path the panel belongs to (part of the cache identity).
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub query_type: String,
    #[serde(default)]
    pub group: String,
    pub host: HostRef,
    pub data_source: DataSourceRef,
    #[serde(default)]
    pub selection: InstanceSelection,
    /// Data points to render; empty means all.
    #[serde(default)]
    pub data_points: Vec<String>,
    pub from: i64,
    pub to: i64,
    /// Sampling period of the metric in seconds.
    pub collect_interval: i64,
    #[serde(default)]
    pub historical_data: bool,
    #[serde(default = "default_true")]
    pub append_data: bool,
    /// When the query was last changed in the editor (epoch millis, 0 = never).
    #[serde(default)]
    pub last_edited_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_ttl: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_quota: Option<u32>,
}

fn default_true() -> bool {
    true
}

impl MetricQuery {
    pub fn new(host: HostRef, data_source: DataSourceRef) -> Self {
        Self {
            path: String::new(),
            query_type: String::new(),
            group: String::new(),
            host,
            data_source,
            selection: InstanceSelection::default(),
            data_points: Vec::new(),
            from: 0,
            to: 0,
            collect_interval: 60,
            historical_data: false,
            append_data: true,
            last_edited_ms: 0,
            cache_ttl: None,
            concurrency: None,
            api_quota: None,
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn query_type(mut self, query_type: impl Into<String>) -> Self {
        self.query_type = query_type.into();
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn host(mut self, host: HostRef) -> Self {
        self.host = host;
        self
    }

    pub fn data_source(mut self, data_source: DataSourceRef) -> Self {
        self.data_source = data_source;
        self
    }

    pub fn selection(mut self, selection: InstanceSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn data_points(mut self, data_points: Vec<String>) -> Self {
        self.data_points = data_points;
        self
    }

    /// Set the requested window `[from, to]` in epoch seconds.
    pub fn window(mut self, from: i64, to: i64) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn collect_interval(mut self, secs: i64) -> Self {
        self.collect_interval = secs;
        self
    }

    pub fn historical_data(mut self, enabled: bool) -> Self {
        self.historical_data = enabled;
        self
    }

    pub fn append_data(mut self, enabled: bool) -> Self {
        self.append_data = enabled;
        self
    }

    pub fn last_edited_ms(mut self, millis: i64) -> Self {
        self.last_edited_ms = millis;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn concurrency(mut self, workers: usize) -> Self {
        self.concurrency = Some(workers);
        self
    }

    pub fn api_quota(mut self, quota: u32) -> Self {
        self.api_quota = Some(quota);
        self
    }

    pub fn span_secs(&self) -> i64 {
        self.to - self.from
    }

    /// Reject queries that cannot produce a sensible request.
    pub fn validate(&self) -> Result<()> {
        if self.collect_interval <= 0 {
            return Err(GapcacheError::InvalidInput(format!(
                "collect interval must be positive, got {}",
                self.collect_interval
            )));
        }
        if self.host.label.is_empty() && self.host.id.is_none() {
            return Err(GapcacheError::InvalidInput("host is required".into()));
        }
        if self.data_source.id <= 0 && self.data_source.hds_id.is_none() {
            return Err(GapcacheError::InvalidInput(
                "data source id is required".into(),
            ));
        }
        if self.concurrency == Some(0) {
            return Err(GapcacheError::InvalidInput(
                "concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
