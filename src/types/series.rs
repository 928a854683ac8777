//! Raw and merged per-instance series.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::range::PendingTimeRange;
use crate::Result;

/// Literal the upstream API uses for a missing sample.
pub const NO_DATA: &str = "No Data";

/// Status string of a successful chunk.
pub const STATUS_OK: &str = "OK";

/// One sample value: a number, or a marker string such as `"No Data"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Number(f64),
    Text(String),
}

impl Cell {
    /// Numeric value for rendering; markers become NaN.
    pub fn as_f64(&self) -> f64 {
        match self {
            Cell::Number(n) => *n,
            Cell::Text(s) => s.parse().unwrap_or(f64::NAN),
        }
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, Cell::Text(s) if s == NO_DATA)
    }
}

/// Parallel time/value arrays for one instance, most recent first.
///
/// `time` holds epoch milliseconds and always has the same length as
/// `values`; each `values` row has one cell per data point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValuesAndTime {
    #[serde(default)]
    pub time: Vec<i64>,
    #[serde(default)]
    pub values: Vec<Vec<Cell>>,
}

impl ValuesAndTime {
    pub fn len(&self) -> usize {
        self.time.len().min(self.values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Newest timestamp in epoch millis.
    pub fn latest_ms(&self) -> Option<i64> {
        self.time.first().copied()
    }

    /// Oldest timestamp in epoch millis.
    pub fn earliest_ms(&self) -> Option<i64> {
        self.time.last().copied()
    }

    /// Append the rows of `older` that are strictly older than everything
    /// already held, keeping the series descending and duplicate-free.
    pub fn extend_older(&mut self, older: &ValuesAndTime) {
        let cutoff = self.earliest_ms().unwrap_or(i64::MAX);
        let skip = older.time[..older.len()]
            .iter()
            .take_while(|t| **t >= cutoff)
            .count();
        let n = older.len();
        self.time.extend_from_slice(&older.time[skip..n]);
        self.values.extend_from_slice(&older.values[skip..n]);
    }
}

/// Result of one upstream raw-data call.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDataChunk {
    /// Slot index assigned by the dispatcher.
    pub job_id: usize,
    pub from_time: i64,
    pub to_time: i64,
    /// `"OK"` on success, otherwise the upstream error message.
    pub error: String,
    pub data_source_name: String,
    pub data_points: Vec<String>,
    pub instances: BTreeMap<String, ValuesAndTime>,
}

/// Upstream response envelope.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: i64,
    #[serde(default)]
    errmsg: String,
    #[serde(default)]
    data: Option<EnvelopeData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeData {
    #[serde(default)]
    data_source_name: String,
    #[serde(default)]
    data_points: Vec<String>,
    #[serde(default)]
    instances: BTreeMap<String, ValuesAndTime>,
}

impl RawDataChunk {
    /// Decode an upstream payload into a chunk for `range`.
    ///
    /// An envelope with a non-OK `errmsg` yields a chunk carrying that
    /// message rather than an `Err`; only undecodable bytes fail.
    pub fn decode(job_id: usize, range: PendingTimeRange, bytes: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        let error = if envelope.errmsg.is_empty() {
            if envelope.status == 0 || envelope.status == 200 {
                STATUS_OK.to_string()
            } else {
                format!("status {}", envelope.status)
            }
        } else {
            envelope.errmsg
        };
        let data = envelope.data.unwrap_or_default();
        Ok(Self {
            job_id,
            from_time: range.from,
            to_time: range.to,
            error,
            data_source_name: data.data_source_name,
            data_points: data.data_points,
            instances: data.instances,
        })
    }

    pub fn is_ok(&self) -> bool {
        self.error == STATUS_OK
    }
}

/// Union of all chunks for a query, keyed by raw instance key.
///
/// This is the value written back to the series cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedSeries {
    pub data_source_name: String,
    pub data_points: Vec<String>,
    pub instances: BTreeMap<String, ValuesAndTime>,
}

impl MergedSeries {
    pub fn is_empty(&self) -> bool {
        self.instances.values().all(ValuesAndTime::is_empty)
    }

    /// Number of rows in the longest instance.
    pub fn max_rows(&self) -> usize {
        self.instances.values().map(ValuesAndTime::len).max().unwrap_or(0)
    }
}

impl From<MergedSeries> for RawDataChunk {
    fn from(series: MergedSeries) -> Self {
        RawDataChunk {
            job_id: 0,
            from_time: 0,
            to_time: 0,
            error: STATUS_OK.to_string(),
            data_source_name: series.data_source_name,
            data_points: series.data_points,
            instances: series.instances,
        }
    }
}
