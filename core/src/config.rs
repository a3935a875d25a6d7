//! Client configuration.
//!
//! All settings come from environment variables:
//!
//! | Variable | Required | Default | Meaning |
//! |----------|----------|---------|---------|
//! | `APICLIENT_BASE_URL` | yes | - | Upstream base URL |
//! | `APICLIENT_TIMEOUT_SECS` | no | `10` | Connect/read timeout |
//! | `APICLIENT_API_KEY` | no | - | Sent as `x-api-key` |
//! | `APICLIENT_API_SECRET` | no | - | HMAC key for body signatures |
//! | `APICLIENT_CACHE_TTL_SECS` | no | `86400` | TTL for cached responses |
//!
//! Loading a `.env` file is left to the binary.

use std::env;
use std::time::Duration;

use crate::client::{ExecuteOptions, CACHE_TIME_DAY};
use crate::error::ConfigError;
use crate::request::ApiRequest;
use crate::transport::DEFAULT_TIMEOUT;

const BASE_URL: &str = "APICLIENT_BASE_URL";
const TIMEOUT_SECS: &str = "APICLIENT_TIMEOUT_SECS";
const API_KEY: &str = "APICLIENT_API_KEY";
const API_SECRET: &str = "APICLIENT_API_SECRET";
const CACHE_TTL_SECS: &str = "APICLIENT_CACHE_TTL_SECS";

/// Settings for an `ApiClient` and the requests it sends.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub default_cache_ttl: Duration,
}

// The secret stays out of logs.
impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("api_key", &self.api_key)
            .field("api_secret", &self.api_secret.as_ref().map(|_| "<redacted>"))
            .field("default_cache_ttl", &self.default_cache_ttl)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            api_key: None,
            api_secret: None,
            default_cache_ttl: CACHE_TIME_DAY,
        }
    }

    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Read the configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup(BASE_URL)
            .filter(|value| !value.trim().is_empty())
            .ok_or(ConfigError::Missing(BASE_URL))?;
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                var: BASE_URL,
                value: base_url,
                reason: "expected an http:// or https:// URL".to_string(),
            });
        }

        let timeout = seconds(&lookup, TIMEOUT_SECS)?.unwrap_or(DEFAULT_TIMEOUT);
        let default_cache_ttl = seconds(&lookup, CACHE_TTL_SECS)?.unwrap_or(CACHE_TIME_DAY);

        Ok(Self {
            base_url,
            timeout,
            api_key: lookup(API_KEY).filter(|value| !value.is_empty()),
            api_secret: lookup(API_SECRET).filter(|value| !value.is_empty()),
            default_cache_ttl,
        })
    }

    /// Attach the configured credentials to `request`. A key without a
    /// secret is sent unsigned.
    pub fn apply(&self, request: &mut ApiRequest) {
        match (&self.api_key, &self.api_secret) {
            (Some(key), Some(secret)) => {
                request.set_api_key(key, secret);
            }
            (Some(key), None) => {
                request.add_header(crate::request::API_KEY_HEADER, key.as_str());
            }
            (None, Some(secret)) => {
                request.set_secret(Some(secret.clone()));
            }
            (None, None) => {}
        }
    }

    /// Options for a cached execution using the configured TTL.
    pub fn cached(&self) -> ExecuteOptions {
        ExecuteOptions::cached(self.default_cache_ttl)
    }
}

fn seconds<F>(lookup: &F, var: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(|secs| Some(Duration::from_secs(secs)))
        .map_err(|e| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[(BASE_URL, "http://api.local")])).unwrap();
        assert_eq!(config, ClientConfig::new("http://api.local"));
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.default_cache_ttl, Duration::from_secs(86_400));
    }

    #[test]
    fn full_config_is_read() {
        let config = ClientConfig::from_lookup(lookup(&[
            (BASE_URL, "https://api.local/v1"),
            (TIMEOUT_SECS, "3"),
            (API_KEY, "key-1"),
            (API_SECRET, "s3cret"),
            (CACHE_TTL_SECS, "900"),
        ]))
        .unwrap();
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.api_key.as_deref(), Some("key-1"));
        assert_eq!(config.api_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.default_cache_ttl, Duration::from_secs(900));
    }

    #[test]
    fn missing_base_url_is_an_error() {
        let err = ClientConfig::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(err, ConfigError::Missing(BASE_URL));
    }

    #[test]
    fn non_http_base_url_is_rejected() {
        let err = ClientConfig::from_lookup(lookup(&[(BASE_URL, "ftp://x")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: BASE_URL, .. }));
    }

    #[test]
    fn bad_timeout_is_rejected() {
        let err = ClientConfig::from_lookup(lookup(&[
            (BASE_URL, "http://api.local"),
            (TIMEOUT_SECS, "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: TIMEOUT_SECS, .. }));
    }

    #[test]
    fn apply_sets_credentials() {
        let mut config = ClientConfig::new("http://api.local");
        config.api_key = Some("key-1".to_string());
        config.api_secret = Some("s3cret".to_string());

        let mut request = ApiRequest::post("/items");
        config.apply(&mut request);
        assert_eq!(request.secret(), Some("s3cret"));
        assert_eq!(request.headers().get_str("x-api-key"), Some("key-1"));
    }

    #[test]
    fn debug_redacts_secret() {
        let mut config = ClientConfig::new("http://api.local");
        config.api_secret = Some("s3cret".to_string());
        let printed = format!("{config:?}");
        assert!(!printed.contains("s3cret"));
        assert!(printed.contains("<redacted>"));
    }
}
