//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.gapcache/config.toml` (user)
//! 3. `/etc/gapcache/config.toml` (system)
//!
//! Secrets are loaded separately with mandatory permission checks:
//! 1. `~/.gapcache/secrets.toml` (user, must be 0600)
//! 2. `/etc/gapcache/secrets.toml` (system, must be 0600)

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{BudgetConfig, BudgetWindow};
use crate::coordinator::CoordinatorConfig;
use crate::fetch::DEFAULT_MAX_RECORDS_PER_CALL;
use crate::source::{AuthScheme, Credentials, RestConfig, RetryConfig};
use crate::{GapcacheError, Result};

const BEARER_TOKEN_ENV: &str = "GAPCACHE_BEARER_TOKEN";
const ACCESS_KEY_ENV: &str = "GAPCACHE_ACCESS_KEY";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub fetch: FetchSection,
    #[serde(default)]
    pub budget: BudgetSection,
}

/// Upstream account settings.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Account (sub-domain) name.
    #[serde(default)]
    pub company: String,
    /// Overrides the account URL.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub auth: AuthScheme,
    /// LMv1 access id. The key itself lives in the secrets file.
    #[serde(default)]
    pub access_id: Option<String>,
    /// Request timeout in seconds (default: 30).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub skip_tls_verify: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            company: String::new(),
            base_url: None,
            auth: AuthScheme::default(),
            access_id: None,
            timeout_secs: default_timeout(),
            skip_tls_verify: false,
        }
    }
}

fn default_timeout() -> u64 {
    30
}

/// Cache lifetimes and capacity.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    /// Cached series lifetime in seconds (default: 600).
    #[serde(default = "default_series_ttl")]
    pub series_ttl_secs: u64,
    /// Lifetime while editing (default: 120).
    #[serde(default = "default_edit_ttl")]
    pub edit_ttl_secs: u64,
    /// Extra lifetime of a window over its series (default: 60).
    #[serde(default = "default_window_margin")]
    pub window_margin_secs: u64,
    /// Host / data-source id lifetime (default: 600).
    #[serde(default = "default_resolution_ttl")]
    pub resolution_ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            series_ttl_secs: default_series_ttl(),
            edit_ttl_secs: default_edit_ttl(),
            window_margin_secs: default_window_margin(),
            resolution_ttl_secs: default_resolution_ttl(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_series_ttl() -> u64 {
    600
}

fn default_edit_ttl() -> u64 {
    120
}

fn default_window_margin() -> u64 {
    60
}

fn default_resolution_ttl() -> u64 {
    600
}

fn default_max_entries() -> u64 {
    crate::cache::DEFAULT_MAX_ENTRIES
}

/// Fetch behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchSection {
    #[serde(default = "default_max_records")]
    pub max_records_per_call: i64,
    /// Worker count per query; unbounded when unset.
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Attempts per upstream call (default: 1, no retry).
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            max_records_per_call: default_max_records(),
            concurrency: None,
            retry_attempts: default_retry_attempts(),
        }
    }
}

fn default_max_records() -> i64 {
    DEFAULT_MAX_RECORDS_PER_CALL
}

fn default_retry_attempts() -> u32 {
    1
}

/// Shared upstream call budget.
#[derive(Debug, Clone, Deserialize)]
pub struct BudgetSection {
    /// Calls per window; throttling disabled when unset.
    #[serde(default)]
    pub quota_per_window: Option<u32>,
    #[serde(default)]
    pub window: BudgetWindow,
    #[serde(default = "default_window_secs")]
    pub window_secs: i64,
}

impl Default for BudgetSection {
    fn default() -> Self {
        Self {
            quota_per_window: None,
            window: BudgetWindow::default(),
            window_secs: default_window_secs(),
        }
    }
}

fn default_window_secs() -> i64 {
    60
}

/// Secrets configuration (API credentials).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.gapcache/config.toml`
    /// 3. `/etc/gapcache/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        let content = fs::read_to_string(&path).map_err(|e| {
            GapcacheError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            GapcacheError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(GapcacheError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".gapcache").join("config.toml");
            if user_config.exists() {
                return Ok(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/gapcache/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }

        Err(GapcacheError::Configuration(
            "No config file found. Create ~/.gapcache/config.toml or /etc/gapcache/config.toml"
                .to_string(),
        ))
    }

    pub fn rest_config(&self) -> RestConfig {
        let mut rest = RestConfig::new(self.upstream.company.clone())
            .timeout(Duration::from_secs(self.upstream.timeout_secs))
            .skip_tls_verify(self.upstream.skip_tls_verify);
        if let Some(url) = &self.upstream.base_url {
            rest = rest.base_url(url.clone());
        }
        rest
    }

    /// Credentials for the configured scheme, taken from `secrets`.
    pub fn credentials(&self, secrets: &Secrets) -> Result<Credentials> {
        match self.upstream.auth {
            AuthScheme::Bearer => secrets
                .bearer_token()
                .map(Credentials::bearer)
                .ok_or_else(|| {
                    GapcacheError::Configuration(format!(
                        "no bearer token: set bearer_token in secrets.toml or {BEARER_TOKEN_ENV}"
                    ))
                }),
            AuthScheme::Lmv1 => {
                let access_id = self.upstream.access_id.clone().ok_or_else(|| {
                    GapcacheError::Configuration("upstream.access_id is required for lmv1".into())
                })?;
                let access_key = secrets.access_key().ok_or_else(|| {
                    GapcacheError::Configuration(format!(
                        "no access key: set access_key in secrets.toml or {ACCESS_KEY_ENV}"
                    ))
                })?;
                Ok(Credentials::lmv1(access_id, access_key))
            }
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        let mut budget = BudgetConfig::new()
            .window(self.budget.window)
            .window_secs(self.budget.window_secs);
        if let Some(quota) = self.budget.quota_per_window {
            budget = budget.quota(quota);
        }
        let mut config = CoordinatorConfig::new()
            .series_ttl(Duration::from_secs(self.cache.series_ttl_secs))
            .edit_ttl(Duration::from_secs(self.cache.edit_ttl_secs))
            .window_margin(Duration::from_secs(self.cache.window_margin_secs))
            .resolution_ttl(Duration::from_secs(self.cache.resolution_ttl_secs))
            .max_entries(self.cache.max_entries)
            .max_records_per_call(self.fetch.max_records_per_call)
            .budget(budget);
        if let Some(workers) = self.fetch.concurrency {
            config = config.concurrency(workers);
        }
        config
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new().max_attempts(self.fetch.retry_attempts)
    }
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Returns empty secrets if no file exists (credentials may come from
    /// the environment).
    pub fn load() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".gapcache").join("secrets.toml");
            if user_secrets.exists() {
                return Self::load_from_file(&user_secrets);
            }
        }

        let system_secrets = PathBuf::from("/etc/gapcache/secrets.toml");
        if system_secrets.exists() {
            return Self::load_from_file(&system_secrets);
        }

        Ok(Secrets::default())
    }

    /// Load one secrets file, rejecting it if group or others can read it.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        Self::check_permissions(path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            GapcacheError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            GapcacheError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            GapcacheError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(GapcacheError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// Bearer token, falling back to `GAPCACHE_BEARER_TOKEN`.
    pub fn bearer_token(&self) -> Option<String> {
        non_empty(self.bearer_token.clone())
            .or_else(|| non_empty(std::env::var(BEARER_TOKEN_ENV).ok()))
    }

    /// LMv1 access key, falling back to `GAPCACHE_ACCESS_KEY`.
    pub fn access_key(&self) -> Option<String> {
        non_empty(self.access_key.clone())
            .or_else(|| non_empty(std::env::var(ACCESS_KEY_ENV).ok()))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.upstream.timeout_secs, 30);
        assert_eq!(config.cache.series_ttl_secs, 600);
        assert_eq!(config.cache.edit_ttl_secs, 120);
        assert_eq!(config.fetch.max_records_per_call, 500);
        assert_eq!(config.fetch.retry_attempts, 1);
        assert_eq!(config.budget.quota_per_window, None);
        assert_eq!(config.budget.window, BudgetWindow::TruncatedMinute);
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
            [upstream]
            company = "acme"
            auth = "lmv1"
            access_id = "id-1"
            timeout_secs = 10

            [cache]
            series_ttl_secs = 300

            [fetch]
            concurrency = 4
            retry_attempts = 3

            [budget]
            quota_per_window = 100
            window = "sliding"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.upstream.company, "acme");
        assert_eq!(config.upstream.auth, AuthScheme::Lmv1);
        assert_eq!(config.cache.series_ttl_secs, 300);
        // Defaults preserved
        assert_eq!(config.cache.edit_ttl_secs, 120);

        let coordinator = config.coordinator_config();
        assert_eq!(coordinator.series_ttl, Duration::from_secs(300));
        assert_eq!(coordinator.concurrency, Some(4));
        assert_eq!(coordinator.budget.quota, Some(100));
        assert_eq!(coordinator.budget.window, BudgetWindow::Sliding);

        assert_eq!(config.retry_config().max_attempts, 3);
        assert_eq!(config.rest_config().timeout, Duration::from_secs(10));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/gapcache.toml"))).unwrap_err();
        assert!(matches!(err, GapcacheError::Configuration(_)));
    }

    #[test]
    fn load_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[upstream]\ncompany = \"acme\"").unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.upstream.company, "acme");
    }

    #[test]
    fn lmv1_credentials_need_access_id() {
        let mut config = Config::default();
        config.upstream.auth = AuthScheme::Lmv1;
        let secrets = Secrets {
            access_key: Some("key".into()),
            ..Default::default()
        };
        assert!(config.credentials(&secrets).is_err());

        config.upstream.access_id = Some("id".into());
        assert!(matches!(
            config.credentials(&secrets).unwrap(),
            Credentials::Lmv1 { .. }
        ));
    }

    #[test]
    fn bearer_credentials_from_secrets() {
        let config = Config::default();
        let secrets = Secrets {
            bearer_token: Some("tok".into()),
            ..Default::default()
        };
        assert!(matches!(
            config.credentials(&secrets).unwrap(),
            Credentials::Bearer { token } if token == "tok"
        ));
    }

    #[cfg(unix)]
    #[test]
    fn world_readable_secrets_are_rejected() {
        use std::os::unix::fs::PermissionsExt;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bearer_token = \"tok\"").unwrap();
        fs::set_permissions(file.path(), fs::Permissions::from_mode(0o644)).unwrap();
        assert!(Secrets::load_from_file(file.path()).is_err());

        fs::set_permissions(file.path(), fs::Permissions::from_mode(0o600)).unwrap();
        let secrets = Secrets::load_from_file(file.path()).unwrap();
        assert_eq!(secrets.bearer_token.as_deref(), Some("tok"));
    }
}
