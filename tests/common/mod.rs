//! Shared in-memory upstream for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use gapcache::{
    DataSourceRef, GapcacheError, HostRef, InstanceSelection, MetricQuery, MetricSource,
    RawDataRequest, Result,
};

/// Minute-aligned epoch seconds used as "the start of the hour" in tests.
pub const T: i64 = 1_700_000_040;

/// Upstream that synthesises one sample per collect interval.
///
/// Every sample's value equals its timestamp in seconds, so merged frames
/// can be checked against the request window directly.
pub struct MockSource {
    pub instances: Vec<String>,
    pub interval: i64,
    /// Data exists only up to this timestamp (seconds).
    pub latest_data: AtomicI64,
    /// Per-call latency; `None` answers immediately.
    pub delay: Mutex<Option<Duration>>,
    /// Latency of sub-ranges starting before `slow_before`, for reordering.
    pub slow_before: AtomicI64,

    calls: Mutex<Vec<RawDataRequest>>,
    fail_next: Mutex<VecDeque<GapcacheError>>,
    /// Device ids the upstream no longer knows.
    stale_devices: Mutex<Vec<String>>,
    /// Envelope error returned on the n-th call.
    chunk_error_on_call: Mutex<Option<(usize, String)>>,

    host_lookups: AtomicU32,
    hds_lookups: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockSource {
    pub fn new(instances: &[&str]) -> Self {
        Self {
            instances: instances.iter().map(|s| s.to_string()).collect(),
            interval: 60,
            latest_data: AtomicI64::new(i64::MAX),
            delay: Mutex::new(None),
            slow_before: AtomicI64::new(i64::MIN),
            calls: Mutex::new(Vec::new()),
            fail_next: Mutex::new(VecDeque::new()),
            stale_devices: Mutex::new(Vec::new()),
            chunk_error_on_call: Mutex::new(None),
            host_lookups: AtomicU32::new(0),
            hds_lookups: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn cpu() -> Self {
        Self::new(&["CPU-core0", "CPU-core1"])
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    /// Sample spacing in seconds.
    pub fn with_interval(mut self, secs: i64) -> Self {
        self.interval = secs;
        self
    }

    pub fn fail_next(&self, err: GapcacheError) {
        self.fail_next.lock().unwrap().push_back(err);
    }

    pub fn mark_stale(&self, device_id: &str) {
        self.stale_devices.lock().unwrap().push(device_id.to_string());
    }

    pub fn chunk_error_on_call(&self, n: usize, message: &str) {
        *self.chunk_error_on_call.lock().unwrap() = Some((n, message.to_string()));
    }

    pub fn calls(&self) -> Vec<RawDataRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn host_lookups(&self) -> u32 {
        self.host_lookups.load(Ordering::SeqCst)
    }

    pub fn hds_lookups(&self) -> u32 {
        self.hds_lookups.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn payload(&self, request: &RawDataRequest) -> String {
        let to = request.range.to.min(self.latest_data.load(Ordering::SeqCst));
        let mut times = Vec::new();
        let mut t = to - to.rem_euclid(self.interval);
        while t >= request.range.from {
            times.push(t);
            t -= self.interval;
        }
        let time_ms: Vec<String> = times.iter().map(|t| (t * 1000).to_string()).collect();
        let values: Vec<String> = times.iter().map(|t| format!("[{t}]")).collect();
        let series = format!(
            r#"{{"time":[{}],"values":[{}]}}"#,
            time_ms.join(","),
            values.join(",")
        );
        let instances: Vec<String> = self
            .instances
            .iter()
            .map(|name| format!(r#""{name}":{series}"#))
            .collect();
        format!(
            r#"{{"status":200,"errmsg":"OK","data":{{"dataSourceName":"CPU","dataPoints":["idle"],"instances":{{{}}}}}}}"#,
            instances.join(",")
        )
    }
}

#[async_trait]
impl MetricSource for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_raw(&self, request: &RawDataRequest) -> Result<Vec<u8>> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.clone());
            calls.len() - 1
        };
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            let delay = if request.range.from < self.slow_before.load(Ordering::SeqCst) {
                delay * 4
            } else {
                delay
            };
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(err) = self.fail_next.lock().unwrap().pop_front() {
            return Err(err);
        }
        if self
            .stale_devices
            .lock()
            .unwrap()
            .contains(&request.device_id)
        {
            return Ok(format!(
                r#"{{"status":1069,"errmsg":"Device<{}> is not found","data":null}}"#,
                request.device_id
            )
            .into_bytes());
        }
        if let Some((n, message)) = self.chunk_error_on_call.lock().unwrap().clone()
            && n == call
        {
            return Ok(format!(r#"{{"status":1,"errmsg":"{message}","data":null}}"#).into_bytes());
        }
        Ok(self.payload(request).into_bytes())
    }

    async fn resolve_host(&self, _label: &str) -> Result<String> {
        // every lookup hands out a fresh device id: 100, 101, ...
        let n = self.host_lookups.fetch_add(1, Ordering::SeqCst);
        Ok((100 + n).to_string())
    }

    async fn resolve_host_datasource(&self, _device_id: &str, datasource_id: i64) -> Result<i64> {
        self.hds_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(datasource_id * 10)
    }
}

/// Rolling-window query for `web-01` / `CPU`, selecting `core0`.
pub fn cpu_query(from: i64, to: i64) -> MetricQuery {
    MetricQuery::new(HostRef::new("web-01"), DataSourceRef::new("CPU", 5))
        .path("acme")
        .query_type("raw")
        .group("servers")
        .selection(InstanceSelection::Select(vec!["core0".into()]))
        .window(from, to)
        .collect_interval(60)
}
