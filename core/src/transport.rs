//! HTTP transports.
//!
//! # Design
//! A `Transport` performs one round-trip and reports what the server said.
//! Any answered status counts as a successful send; deciding that a 4xx/5xx
//! is a failure is the executor's job (`classify_response`), so transports
//! stay dumb and hosts can plug in their own.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::TransportError;
use crate::http::{HttpRequest, HttpResponse};

/// Connect/read deadline used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Executes `HttpRequest`s against the upstream.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Send `request` and return the response, whatever its status.
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Absolute URL `path` resolves to, used in error messages.
    fn url_for(&self, path: &str) -> String {
        path.to_string()
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send(request)
    }

    fn url_for(&self, path: &str) -> String {
        (**self).url_for(path)
    }
}

/// Blocking transport backed by a `ureq` agent. The agent keeps a cookie jar
/// for the lifetime of the transport and reuses connections.
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
    base_url: String,
    timeout: Duration,
}

impl fmt::Debug for UreqTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UreqTransport")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl UreqTransport {
    pub fn new(base_url: &str) -> Self {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Self {
        // 4xx/5xx come back as data; the executor classifies them.
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build()
            .new_agent();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Transport for UreqTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = self.url_for(&request.path);
        let mut builder = ureq::http::Request::builder()
            .method(request.method.as_str())
            .uri(url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let sent = match &request.body {
            Some(body) => {
                let http_request = builder
                    .body(body.clone())
                    .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
                self.agent.run(http_request)
            }
            None => {
                let http_request = builder
                    .body(())
                    .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
                self.agent.run(http_request)
            }
        };
        let mut response = sent.map_err(TransportError::from)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|err| match err {
                ureq::Error::Timeout(_) => TransportError::Timeout(err.to_string()),
                other => TransportError::Body(other.to_string()),
            })?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl From<ureq::Error> for TransportError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Timeout(_) => TransportError::Timeout(err.to_string()),
            ureq::Error::BadUri(_) => TransportError::InvalidRequest(err.to_string()),
            other => TransportError::Connection(other.to_string()),
        }
    }
}
