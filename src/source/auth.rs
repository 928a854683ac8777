//! Request authentication for the REST source.
//!
//! Two schemes are supported: a static bearer token, and LMv1 request
//! signing, where every request carries an HMAC-SHA256 over the method,
//! the epoch-millisecond timestamp, and the resource path.

use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{GapcacheError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Authentication scheme selector used in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    #[default]
    Bearer,
    Lmv1,
}

/// Credentials for one account.
#[derive(Clone)]
pub enum Credentials {
    Bearer { token: String },
    Lmv1 { access_id: String, access_key: String },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Bearer { .. } => f.debug_struct("Bearer").finish_non_exhaustive(),
            Credentials::Lmv1 { access_id, .. } => f
                .debug_struct("Lmv1")
                .field("access_id", access_id)
                .finish_non_exhaustive(),
        }
    }
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Credentials::Bearer {
            token: token.into(),
        }
    }

    pub fn lmv1(access_id: impl Into<String>, access_key: impl Into<String>) -> Self {
        Credentials::Lmv1 {
            access_id: access_id.into(),
            access_key: access_key.into(),
        }
    }

    /// `Authorization` header value for a GET of `resource_path` at `epoch_ms`.
    pub fn authorization(&self, resource_path: &str, epoch_ms: i64) -> Result<String> {
        match self {
            Credentials::Bearer { token } => {
                if token.is_empty() {
                    return Err(GapcacheError::Configuration(
                        "bearer token is empty".into(),
                    ));
                }
                Ok(format!("Bearer {token}"))
            }
            Credentials::Lmv1 {
                access_id,
                access_key,
            } => {
                if access_id.is_empty() || access_key.is_empty() {
                    return Err(GapcacheError::Configuration(
                        "LMv1 signing needs both an access id and an access key".into(),
                    ));
                }
                let signature = lmv1_signature(access_key, "GET", resource_path, epoch_ms)?;
                Ok(format!("LMv1 {access_id}:{signature}:{epoch_ms}"))
            }
        }
    }
}

/// URL-safe base64 of the hex HMAC-SHA256 of `method + epoch + path`.
pub fn lmv1_signature(
    access_key: &str,
    method: &str,
    resource_path: &str,
    epoch_ms: i64,
) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(access_key.as_bytes())
        .map_err(|e| GapcacheError::Configuration(format!("invalid access key: {e}")))?;
    mac.update(method.as_bytes());
    mac.update(epoch_ms.to_string().as_bytes());
    mac.update(resource_path.as_bytes());
    let digest = hex::encode(mac.finalize().into_bytes());
    Ok(base64::engine::general_purpose::URL_SAFE.encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header() {
        let header = Credentials::bearer("abc").authorization("/x", 0).unwrap();
        assert_eq!(header, "Bearer abc");
    }

    #[test]
    fn empty_bearer_is_configuration_error() {
        let err = Credentials::bearer("").authorization("/x", 0).unwrap_err();
        assert!(matches!(err, GapcacheError::Configuration(_)));
    }

    #[test]
    fn lmv1_header_layout() {
        let header = Credentials::lmv1("id1", "key1")
            .authorization("/device/devices", 1_700_000_000_000)
            .unwrap();
        let parts: Vec<&str> = header
            .strip_prefix("LMv1 ")
            .unwrap()
            .split(':')
            .collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "id1");
        assert_eq!(parts[2], "1700000000000");
        // 64 hex chars encode to 88 base64 chars.
        assert_eq!(parts[1].len(), 88);
    }

    #[test]
    fn signature_is_deterministic_and_keyed() {
        let a = lmv1_signature("k", "GET", "/p", 1).unwrap();
        let b = lmv1_signature("k", "GET", "/p", 1).unwrap();
        let c = lmv1_signature("other", "GET", "/p", 1).unwrap();
        let d = lmv1_signature("k", "GET", "/p", 2).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn signature_decodes_to_hex_digest() {
        let sig = lmv1_signature("k", "GET", "/p", 1).unwrap();
        let decoded = base64::engine::general_purpose::URL_SAFE.decode(sig).unwrap();
        let hex_digest = String::from_utf8(decoded).unwrap();
        assert_eq!(hex_digest.len(), 64);
        assert!(hex_digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn debug_hides_secrets() {
        let debug = format!("{:?}", Credentials::lmv1("id1", "secret-key"));
        assert!(debug.contains("id1"));
        assert!(!debug.contains("secret-key"));
    }
}
