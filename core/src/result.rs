//! Normalized outcome of one upstream call.
//!
//! # Design
//! Every response the upstream sends is wrapped in the same envelope:
//!
//! ```json
//! { "data": { ... }, "error": { "message": "...", "exception": ..., "validation": { "fields": [...], "params": [...] } } }
//! ```
//!
//! An `ApiResult` is built exactly once from a [`ResultSource`] (a live
//! response, a transport failure, or a cached body) by a single parsing
//! function, and is read-only afterwards. A body that is not a JSON object
//! leaves `data` and `error` empty instead of failing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::dot::{is_blank, DotMap};
use crate::error::TransportError;
use crate::form::FormBinder;
use crate::http::HttpResponse;

/// Placeholder returned by [`ApiResult::exception_message`] when there is no
/// message to report.
pub const NO_MESSAGE: &str = "-";

/// The raw outcome an `ApiResult` is built from.
#[derive(Debug, Clone)]
pub enum ResultSource {
    /// A 2xx response from the upstream.
    Response(HttpResponse),
    /// The round-trip failed; a non-2xx response rides along inside the error.
    TransportError(TransportError),
    /// A body previously stored in the cache.
    Cache(String),
}

/// One entry of `error.validation.fields` or `error.validation.params`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationMessage {
    pub name: String,
    #[serde(default)]
    pub message: String,
}

impl ValidationMessage {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    /// `"<name> - <message>"`, the label used for form-level reporting.
    pub fn label(&self) -> String {
        format!("{} - {}", self.name, self.message)
    }
}

/// Classification fixed at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultState {
    /// No transport failure and an empty `error` section.
    Valid,
    /// The upstream rejected the call through `error` without marking it as
    /// an exception (validation errors, plain messages).
    Invalid,
    /// The transport failed, or `error.exception` is set.
    Exception,
}

/// Uniform result of an upstream call.
#[derive(Debug, Clone)]
pub struct ApiResult {
    data: DotMap,
    error: DotMap,
    transport_error: Option<TransportError>,
    valid: bool,
    cached: bool,
    status_code: Option<u16>,
    response_headers: BTreeMap<String, Vec<String>>,
    raw_body: Option<String>,
    state: ResultState,
}

impl ApiResult {
    pub fn from_response(response: HttpResponse) -> Self {
        Self::from_source(ResultSource::Response(response))
    }

    pub fn from_transport_error(error: TransportError) -> Self {
        Self::from_source(ResultSource::TransportError(error))
    }

    pub fn from_cache(body: impl Into<String>) -> Self {
        Self::from_source(ResultSource::Cache(body.into()))
    }

    pub fn from_source(source: ResultSource) -> Self {
        let (raw_body, status_code, response_headers, transport_error, cached) = match source {
            ResultSource::Response(response) => (
                Some(response.body),
                Some(response.status),
                group_headers(&response.headers),
                None,
                false,
            ),
            ResultSource::TransportError(error) => {
                let response = error.response();
                (
                    response.map(|r| r.body.clone()),
                    response.map(|r| r.status),
                    response.map(|r| group_headers(&r.headers)).unwrap_or_default(),
                    Some(error),
                    false,
                )
            }
            ResultSource::Cache(body) => (Some(body), None, BTreeMap::new(), None, true),
        };

        let (data, error) = raw_body
            .as_deref()
            .map(parse_envelope)
            .unwrap_or_default();
        let valid = error.is_empty();

        let state = if transport_error.is_some() || (!valid && !error.is_empty_at("exception")) {
            ResultState::Exception
        } else if !valid {
            ResultState::Invalid
        } else {
            ResultState::Valid
        };

        Self {
            data,
            error,
            transport_error,
            valid,
            cached,
            status_code,
            response_headers,
            raw_body,
            state,
        }
    }

    /// No transport failure and no `error` section.
    pub fn is_valid(&self) -> bool {
        self.valid && self.transport_error.is_none()
    }

    /// The transport failed, independent of the envelope content.
    pub fn is_exception(&self) -> bool {
        self.transport_error.is_some()
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }

    pub fn state(&self) -> ResultState {
        self.state
    }

    pub fn data(&self) -> &DotMap {
        &self.data
    }

    pub fn error(&self) -> &DotMap {
        &self.error
    }

    pub fn transport_error(&self) -> Option<&TransportError> {
        self.transport_error.as_ref()
    }

    /// HTTP status of the response this result came from. `None` for cache
    /// hits and for failures where no response arrived.
    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn response_headers(&self) -> &BTreeMap<String, Vec<String>> {
        &self.response_headers
    }

    /// The body exactly as received (or as stored in the cache).
    pub fn raw_body(&self) -> Option<&str> {
        self.raw_body.as_deref()
    }

    pub fn has_validation_errors(&self) -> bool {
        self.error.has("validation")
    }

    pub fn field_validation_errors(&self) -> Vec<ValidationMessage> {
        self.validation_list("validation.fields")
    }

    pub fn param_validation_errors(&self) -> Vec<ValidationMessage> {
        self.validation_list("validation.params")
    }

    fn validation_list(&self, path: &str) -> Vec<ValidationMessage> {
        match self.error.get(path) {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// A transport failure, or an `error` section with a truthy `exception`.
    pub fn has_exception_message(&self) -> bool {
        self.is_exception() || (!self.valid && !self.error.is_empty_at("exception"))
    }

    /// `error.message`, else the transport failure, else [`NO_MESSAGE`].
    pub fn exception_message(&self) -> String {
        match self.error.get("message") {
            Some(Value::String(message)) => return message,
            Some(Value::Null) | None => {}
            Some(other) => return other.to_string(),
        }
        match &self.transport_error {
            Some(error) => error.to_string(),
            None => NO_MESSAGE.to_string(),
        }
    }

    /// Report every problem carried by this result on `form`: param errors
    /// as form-level messages, field errors on their field (or form-level
    /// when the form lacks it), then the exception message.
    pub fn apply_validation_errors<F: FormBinder + ?Sized>(&self, form: &mut F) {
        for error in self.param_validation_errors() {
            form.add_form_error(&error.label());
        }

        for error in self.field_validation_errors() {
            if form.has_field(&error.name) {
                form.add_field_error(&error.name, &error.message);
            } else {
                form.add_form_error(&error.label());
            }
        }

        if self.has_exception_message() {
            form.add_form_error(&self.exception_message());
        }
    }
}

/// Split a body into its `data` and `error` sections.
fn parse_envelope(body: &str) -> (DotMap, DotMap) {
    let mut envelope = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(envelope)) => envelope,
        Ok(_) => {
            debug!("response body is not an envelope object");
            return Default::default();
        }
        Err(err) => {
            debug!(error = %err, "response body is not JSON");
            return Default::default();
        }
    };

    let data = envelope
        .remove("data")
        .filter(|value| !is_blank(value))
        .map(DotMap::from_value)
        .unwrap_or_default();
    let error = envelope
        .remove("error")
        .filter(|value| !is_blank(value))
        .map(error_section)
        .unwrap_or_default();
    (data, error)
}

/// A bare string or other scalar in `error` is treated as its message.
fn error_section(value: Value) -> DotMap {
    match value {
        Value::Object(_) | Value::Array(_) => DotMap::from_value(value),
        Value::String(message) => {
            let mut map = DotMap::new();
            map.set("message", message);
            map
        }
        other => {
            let mut map = DotMap::new();
            map.set("message", other.to_string());
            map
        }
    }
}

fn group_headers(headers: &[(String, String)]) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        grouped
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.clone());
    }
    grouped
}
