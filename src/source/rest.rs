//! REST client for the monitoring API.
//!
//! Every request is a GET against `https://{company}.logicmonitor.com/santaba/rest/`
//! (or a custom base URL for testing with wiremock), authenticated per
//! [`Credentials`], and translated into [`GapcacheError`] before it leaves
//! this module.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, warn};

use super::auth::Credentials;
use super::traits::{MetricSource, RawDataRequest};
use crate::clock::{Clock, SystemClock};
use crate::error::is_not_found_message;
use crate::version::user_agent;
use crate::{GapcacheError, Result};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const API_VERSION_HEADER: &str = "x-version";
const API_VERSION: &str = "3";

/// Connection settings for [`RestClient`].
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Account (sub-domain) name.
    pub company: String,
    /// Overrides the account URL, e.g. a wiremock server. Must end with the
    /// REST root path.
    pub base_url: Option<String>,
    pub timeout: Duration,
    pub skip_tls_verify: bool,
}

impl RestConfig {
    pub fn new(company: impl Into<String>) -> Self {
        Self {
            company: company.into(),
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            skip_tls_verify: false,
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn skip_tls_verify(mut self, skip: bool) -> Self {
        self.skip_tls_verify = skip;
        self
    }

    fn resolved_base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.clone(),
            None => format!("https://{}.logicmonitor.com/santaba/rest/", self.company),
        }
    }
}

/// [`MetricSource`] backed by the monitoring REST API.
#[derive(Clone)]
pub struct RestClient {
    name: String,
    base: Url,
    /// Path of `base`, stripped from request paths before signing.
    root_path: String,
    credentials: Credentials,
    user_agent: String,
    http: Client,
    clock: Arc<dyn Clock>,
}

impl RestClient {
    pub fn new(config: &RestConfig, credentials: Credentials) -> Result<Self> {
        Self::with_clock(config, credentials, Arc::new(SystemClock))
    }

    /// Create a client that signs requests with timestamps from `clock`.
    pub fn with_clock(
        config: &RestConfig,
        credentials: Credentials,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if config.company.is_empty() && config.base_url.is_none() {
            return Err(GapcacheError::Configuration(
                "company name not configured".into(),
            ));
        }
        let mut raw = config.resolved_base_url();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base = Url::parse(&raw)
            .map_err(|e| GapcacheError::Configuration(format!("invalid base URL {raw}: {e}")))?;
        let root_path = base.path().trim_end_matches('/').to_string();

        let http = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.skip_tls_verify)
            .build()
            .map_err(|e| GapcacheError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            name: config.company.clone(),
            base,
            root_path,
            credentials,
            user_agent: user_agent(&config.company),
            http,
            clock,
        })
    }

    /// Cheap authenticated call used to validate credentials.
    pub async fn health_check(&self) -> Result<()> {
        let url = self.url("device/devices", &[("size", "1")])?;
        self.get(url, false).await.map(|_| ())
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self
            .base
            .join(path)
            .map_err(|e| GapcacheError::InvalidInput(format!("invalid request path {path}: {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn get(&self, url: Url, versioned: bool) -> Result<Vec<u8>> {
        let resource_path = url
            .path()
            .strip_prefix(&self.root_path)
            .unwrap_or(url.path())
            .to_string();
        let authorization = self
            .credentials
            .authorization(&resource_path, self.clock.now_millis())?;

        debug!(resource = %resource_path, "GET");
        let mut request = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .header(reqwest::header::USER_AGENT, &self.user_agent);
        if versioned {
            request = request.header(API_VERSION_HEADER, API_VERSION);
        }

        let response = request.send().await.map_err(translate_transport_error)?;
        let status = response.status();
        if status.is_success() {
            let body = response
                .bytes()
                .await
                .map_err(|e| GapcacheError::Http(e.to_string()))?;
            return Ok(body.to_vec());
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        let err = translate_status(status.as_u16(), retry_after, &body);
        warn!(resource = %resource_path, status = status.as_u16(), error = %err, "request failed");
        Err(err)
    }
}

#[async_trait]
impl MetricSource for RestClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_raw(&self, request: &RawDataRequest) -> Result<Vec<u8>> {
        let path = format!(
            "device/devices/{}/devicedatasources/{}/data",
            request.device_id, request.hds_id
        );
        let start = request.range.from.to_string();
        let end = request.range.to.to_string();
        let url = self.url(&path, &[("start", start.as_str()), ("end", end.as_str())])?;
        self.get(url, false).await
    }

    async fn resolve_host(&self, label: &str) -> Result<String> {
        let cache_buster = self.clock.now_millis().to_string();
        let parents = format!(
            r#"[{{"filter":"{label}","exclude":false,"token":"fullname","matchFilterAsGlob":true}}]"#
        );
        let url = self.url(
            "autocomplete/names",
            &[
                ("queryToken", "display"),
                ("needIdPrefix", "true"),
                ("size", "10"),
                ("_", cache_buster.as_str()),
                ("type", "hostChain"),
                ("query", label),
                ("parentsFilters", parents.as_str()),
            ],
        )?;
        let body = self.get(url, true).await?;
        let response: AutocompleteResponse = serde_json::from_slice(&body)?;
        response
            .items
            .first()
            .and_then(|item| item.split(':').next())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| GapcacheError::HostNotFound(label.to_string()))
    }

    async fn resolve_host_datasource(&self, device_id: &str, datasource_id: i64) -> Result<i64> {
        let path = format!("device/devices/{device_id}/devicedatasources");
        let filter = format!("dataSourceId:{datasource_id},instanceNumber>:1");
        let url = self.url(
            &path,
            &[
                ("format", "json"),
                ("fields", "id"),
                ("size", "-1"),
                ("filter", filter.as_str()),
            ],
        )?;
        let body = self.get(url, true).await?;
        let response: HostDataSourceResponse = serde_json::from_slice(&body)?;
        let total = response.total.unwrap_or(response.items.len() as i64);
        match (total, response.items.first()) {
            (1, Some(item)) => Ok(item.id),
            (0, _) | (_, None) => Err(GapcacheError::DataSourceNotFound(format!(
                "device {device_id} has no data source {datasource_id} with instances"
            ))),
            _ => Err(GapcacheError::AmbiguousDataSource(format!(
                "device {device_id} has {total} matches for data source {datasource_id}"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AutocompleteResponse {
    #[serde(default)]
    items: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct HostDataSourceResponse {
    #[serde(default)]
    total: Option<i64>,
    #[serde(default)]
    items: Vec<HostDataSourceItem>,
}

#[derive(Debug, Deserialize)]
struct HostDataSourceItem {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default, alias = "errorMessage")]
    errmsg: String,
}

/// Map a `reqwest` send failure onto the transport taxonomy.
fn translate_transport_error(err: reqwest::Error) -> GapcacheError {
    if err.is_timeout() {
        return GapcacheError::Timeout;
    }
    let chain = error_chain(&err);
    let lowered = chain.to_lowercase();
    if lowered.contains("dns error")
        || lowered.contains("failed to lookup address")
        || lowered.contains("no such host")
        || lowered.contains("name or service not known")
    {
        GapcacheError::InvalidCompany
    } else if err.is_connect() || lowered.contains("connection") {
        GapcacheError::Network(chain)
    } else {
        GapcacheError::Http(chain)
    }
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Map a non-2xx status onto the error taxonomy.
fn translate_status(status: u16, retry_after: Option<Duration>, body: &str) -> GapcacheError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.errmsg)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.trim().to_string());
    match status {
        401 => GapcacheError::AuthenticationFailed,
        429 => GapcacheError::RateLimited { retry_after },
        503 => GapcacheError::ServiceUnavailable,
        404 if is_not_found_message(&message) => {
            if message.contains("DeviceDataSource<") {
                GapcacheError::DataSourceNotFound(message)
            } else {
                GapcacheError::DeviceNotFound(message)
            }
        }
        code => GapcacheError::Api {
            status: code,
            message: if message.is_empty() {
                format!("API failed with status code = {code}")
            } else {
                message
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_base_url_uses_company() {
        let config = RestConfig::new("acme");
        assert_eq!(
            config.resolved_base_url(),
            "https://acme.logicmonitor.com/santaba/rest/"
        );
    }

    #[test]
    fn missing_company_is_configuration_error() {
        let result = RestClient::new(&RestConfig::new(""), Credentials::bearer("t"));
        assert!(matches!(result, Err(GapcacheError::Configuration(_))));
    }

    #[test]
    fn status_translation() {
        assert!(matches!(
            translate_status(429, Some(Duration::from_secs(3)), ""),
            GapcacheError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(3)
        ));
        assert!(matches!(
            translate_status(503, None, ""),
            GapcacheError::ServiceUnavailable
        ));
        assert!(matches!(
            translate_status(401, None, ""),
            GapcacheError::AuthenticationFailed
        ));
        assert!(matches!(
            translate_status(404, None, r#"{"errmsg":"Device<9> is not found"}"#),
            GapcacheError::DeviceNotFound(_)
        ));
        assert!(matches!(
            translate_status(404, None, r#"{"errorMessage":"DeviceDataSource<9> is not found"}"#),
            GapcacheError::DataSourceNotFound(_)
        ));
        match translate_status(500, None, "") {
            GapcacheError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "API failed with status code = 500");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn signing_path_strips_rest_root() {
        let client = RestClient::new(&RestConfig::new("acme"), Credentials::bearer("t")).unwrap();
        assert_eq!(client.root_path, "/santaba/rest");
        let url = client.url("device/devices/1/devicedatasources/2/data", &[]).unwrap();
        assert_eq!(
            url.path().strip_prefix(&client.root_path),
            Some("/device/devices/1/devicedatasources/2/data")
        );
    }
}
