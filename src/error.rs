//! gapcache error types

use std::time::Duration;

/// gapcache error types
#[derive(Debug, thiserror::Error)]
pub enum GapcacheError {
    // Transport errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("connection timeout, please try again")]
    Timeout,

    #[error("invalid company name configured")]
    InvalidCompany,

    // Upstream status errors
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("service temporarily unavailable")]
    ServiceUnavailable,

    #[error("authentication failed")]
    AuthenticationFailed,

    // Resolution errors
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("data source not found: {0}")]
    DataSourceNotFound(String),

    #[error("host matches more than one data source: {0}")]
    AmbiguousDataSource(String),

    #[error("no host found for pattern: {0}")]
    HostNotFound(String),

    /// A fetched sub-range reported a non-OK status. The whole query fails
    /// so that a series with a hole is never cached.
    #[error("sub-range {job_id} failed: {message}")]
    ChunkFailed { job_id: usize, message: String },

    #[error("fetch worker failed: {0}")]
    WorkerFailed(String),

    // No-data conditions
    #[error("got no data from upstream")]
    NoData,

    #[error("no matching instances found")]
    NoMatchingInstances,

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid instance pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl GapcacheError {
    /// Whether a later attempt of the same call could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            GapcacheError::Http(_)
            | GapcacheError::Network(_)
            | GapcacheError::Timeout
            | GapcacheError::RateLimited { .. }
            | GapcacheError::ServiceUnavailable => true,
            GapcacheError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Upstream `Retry-After` hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GapcacheError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Stale host or data-source identifier; worth one re-resolution.
    pub fn is_resolution(&self) -> bool {
        match self {
            GapcacheError::DeviceNotFound(_) | GapcacheError::DataSourceNotFound(_) => true,
            GapcacheError::ChunkFailed { message, .. } => is_not_found_message(message),
            _ => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GapcacheError::RateLimited { .. })
    }
}

/// Matches upstream messages such as `Device<42> is not found` and
/// `DeviceDataSource<7> is not found`.
pub(crate) fn is_not_found_message(message: &str) -> bool {
    let Some(open) = message.find('<') else {
        return false;
    };
    let prefix = &message[..open];
    (prefix.ends_with("Device") || prefix.ends_with("DeviceDataSource"))
        && message[open..].contains("> is not found")
}

/// Result type alias for gapcache operations
pub type Result<T> = std::result::Result<T, GapcacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_messages() {
        assert!(is_not_found_message("Device<123> is not found"));
        assert!(is_not_found_message("DeviceDataSource<9> is not found"));
        assert!(!is_not_found_message("Device 123 is not found"));
        assert!(!is_not_found_message("Collector<1> is not found"));
        assert!(!is_not_found_message("OK"));
    }

    #[test]
    fn chunk_failure_with_not_found_is_resolution() {
        let err = GapcacheError::ChunkFailed {
            job_id: 0,
            message: "Device<5> is not found".into(),
        };
        assert!(err.is_resolution());

        let err = GapcacheError::ChunkFailed {
            job_id: 0,
            message: "internal error".into(),
        };
        assert!(!err.is_resolution());
    }
}
