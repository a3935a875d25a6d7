//! Error types for the API client.
//!
//! # Design
//! None of these escape `ApiClient::execute`: transport failures are folded
//! into the returned `ApiResult`, and cache failures are logged and dropped.
//! They are still public because custom `Transport` and `CacheStore`
//! implementations have to produce them, and because hosts that do their own
//! I/O classify responses through `classify_response`.

use thiserror::Error;

use crate::http::{HttpMethod, HttpResponse};

/// A failed round-trip to the upstream API.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The connection could not be established or was dropped mid-flight.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The connect or read deadline elapsed.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The upstream answered with a non-2xx status. The response is kept so
    /// its envelope can still be parsed.
    #[error("{method} {url} resulted in a {status} response")]
    Status {
        method: HttpMethod,
        url: String,
        status: u16,
        response: Box<HttpResponse>,
    },

    /// The request could not be turned into a valid HTTP message.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The response arrived but its body could not be read.
    #[error("failed to read response body: {0}")]
    Body(String),
}

impl TransportError {
    /// The upstream response attached to this failure, if one arrived.
    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            TransportError::Status { response, .. } => Some(response),
            _ => None,
        }
    }
}

/// A cache-store operation failed.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Client configuration could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("required variable {0} is not set")]
    Missing(&'static str),

    #[error("variable {var} has invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}
