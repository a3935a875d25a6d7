//! Request builder for upstream API calls.
//!
//! # Design
//! `ApiRequest` accumulates everything one call needs: path, method, a
//! dot-addressable body with the reserved `params.*` and `fields.*`
//! namespaces, headers, the signing secret and the cache settings. It never
//! touches the network. `ApiClient::execute` drives it through cache lookup,
//! signing and transport; hosts doing their own I/O call [`ApiRequest::prepare`]
//! directly.

use std::collections::BTreeSet;
use std::time::{Duration, SystemTime};

use serde_json::Value;

use crate::dot::DotMap;
use crate::http::{HttpMethod, HttpRequest};
use crate::signing::{self, SIGNATURE_HEADER};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const USER_IP_HEADER: &str = "x-user-ip";

const CONTENT_TYPE_JSON: (&str, &str) = ("content-type", "application/json");

/// A single call to the upstream API, owned by the caller.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    path: String,
    method: HttpMethod,
    data: DotMap,
    headers: DotMap,
    secret: Option<String>,
    force_refresh: bool,
    cache_key: Option<String>,
    cache_tags: BTreeSet<String>,
    resolved_cache_key: Option<String>,
    used_cache: bool,
    started_at: Option<SystemTime>,
    finished_at: Option<SystemTime>,
}

/// An `ApiRequest` frozen into wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    pub http: HttpRequest,
    /// Canonical JSON of the body. `{}` when the body is empty.
    pub canonical_body: String,
    /// Explicit cache key if one was set, the body fingerprint otherwise.
    pub cache_key: String,
    /// The `x-data-signature` value, present only for signed requests.
    pub signature: Option<String>,
}

impl ApiRequest {
    pub fn new(path: impl Into<String>, method: HttpMethod) -> Self {
        Self {
            path: path.into(),
            method,
            data: DotMap::new(),
            headers: DotMap::new(),
            secret: None,
            force_refresh: false,
            cache_key: None,
            cache_tags: BTreeSet::new(),
            resolved_cache_key: None,
            used_cache: false,
            started_at: None,
            finished_at: None,
        }
    }

    /// Shorthand for a POST request, the upstream's default verb.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(path, HttpMethod::Post)
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(path, HttpMethod::Get)
    }

    /// Set `params.<name>`.
    pub fn add_param(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.data.set(&format!("params.{name}"), value);
        self
    }

    /// Set `fields.<name>`.
    pub fn add_field(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.data.set(&format!("fields.{name}"), value);
        self
    }

    /// Set an arbitrary dotted path in the body.
    pub fn add_data(&mut self, path: &str, value: impl Into<Value>) -> &mut Self {
        self.data.set(path, value);
        self
    }

    pub fn add_header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.headers.set(name, value.into());
        self
    }

    pub fn set_bearer(&mut self, token: &str) -> &mut Self {
        self.add_header("Authorization", format!("Bearer {token}"))
    }

    /// Send `key` as `x-api-key` and sign non-empty bodies with `secret`.
    pub fn set_api_key(&mut self, key: &str, secret: &str) -> &mut Self {
        self.secret = Some(secret.to_string());
        self.add_header(API_KEY_HEADER, key)
    }

    pub fn set_user_ip(&mut self, ip: &str) -> &mut Self {
        self.add_header(USER_IP_HEADER, ip)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn set_path(&mut self, path: impl Into<String>) -> &mut Self {
        self.path = path.into();
        self
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn set_method(&mut self, method: HttpMethod) -> &mut Self {
        self.method = method;
        self
    }

    pub fn data(&self) -> &DotMap {
        &self.data
    }

    pub fn headers(&self) -> &DotMap {
        &self.headers
    }

    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }

    pub fn set_secret(&mut self, secret: Option<String>) -> &mut Self {
        self.secret = secret;
        self
    }

    pub fn is_force_refresh(&self) -> bool {
        self.force_refresh
    }

    /// Skip the cache read; a successful response is still stored.
    pub fn set_force_refresh(&mut self, force_refresh: bool) -> &mut Self {
        self.force_refresh = force_refresh;
        self
    }

    /// Explicit cache key, if the caller set one.
    pub fn cache_key(&self) -> Option<&str> {
        self.cache_key.as_deref()
    }

    pub fn set_cache_key(&mut self, cache_key: Option<String>) -> &mut Self {
        self.cache_key = cache_key;
        self
    }

    /// Key the most recent cached execution read from and wrote to.
    pub fn resolved_cache_key(&self) -> Option<&str> {
        self.resolved_cache_key.as_deref()
    }

    pub fn cache_tags(&self) -> &BTreeSet<String> {
        &self.cache_tags
    }

    pub fn set_cache_tags<I, S>(&mut self, tags: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cache_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn add_cache_tag(&mut self, tag: impl Into<String>) -> &mut Self {
        self.cache_tags.insert(tag.into());
        self
    }

    /// Whether the most recent execution asked for caching.
    pub fn used_cache(&self) -> bool {
        self.used_cache
    }

    pub fn started_at(&self) -> Option<SystemTime> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<SystemTime> {
        self.finished_at
    }

    /// Wall-clock duration of the most recent execution.
    pub fn elapsed(&self) -> Option<Duration> {
        let started = self.started_at?;
        self.finished_at?.duration_since(started).ok()
    }

    /// Canonical JSON of the body as it stands now.
    pub fn canonical_body(&self) -> String {
        signing::canonical_json(&self.data.to_value())
    }

    /// Default cache key for the current path and body.
    pub fn fingerprint(&self) -> String {
        signing::fingerprint(&self.path, &self.canonical_body())
    }

    /// Freeze the request into wire form, signing it if a secret is set and
    /// the body is non-empty.
    pub fn prepare(&self) -> PreparedRequest {
        self.build(self.canonical_body())
    }

    pub(crate) fn build(&self, canonical_body: String) -> PreparedRequest {
        let has_body = !self.data.is_empty();
        let mut headers = header_pairs(&self.headers);

        let signature = match (&self.secret, has_body) {
            (Some(secret), true) => Some(signing::sign(&canonical_body, secret)),
            _ => None,
        };
        if let Some(signature) = &signature {
            headers.push((SIGNATURE_HEADER.to_string(), signature.clone()));
        }
        let has_content_type = headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case(CONTENT_TYPE_JSON.0));
        if has_body && !has_content_type {
            headers.push((CONTENT_TYPE_JSON.0.to_string(), CONTENT_TYPE_JSON.1.to_string()));
        }

        let cache_key = self
            .cache_key
            .clone()
            .unwrap_or_else(|| signing::fingerprint(&self.path, &canonical_body));

        PreparedRequest {
            http: HttpRequest {
                method: self.method,
                path: self.path.clone(),
                headers,
                body: has_body.then(|| canonical_body.clone()),
            },
            canonical_body,
            cache_key,
            signature,
        }
    }

    /// Pick the cache key for this execution: the explicit key, or the
    /// fingerprint of `canonical_body`. Computed once per execution.
    pub(crate) fn resolve_cache_key(&mut self, canonical_body: &str) -> String {
        let key = self
            .cache_key
            .clone()
            .unwrap_or_else(|| signing::fingerprint(&self.path, canonical_body));
        self.resolved_cache_key = Some(key.clone());
        key
    }

    pub(crate) fn mark_started(&mut self, use_cache: bool) {
        self.used_cache = use_cache;
        self.resolved_cache_key = None;
        self.started_at = Some(SystemTime::now());
        self.finished_at = None;
    }

    pub(crate) fn mark_finished(&mut self) {
        self.finished_at = Some(SystemTime::now());
    }
}

/// Flatten the header tree into wire pairs. Array values repeat the header.
fn header_pairs(headers: &DotMap) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (name, value) in headers.flatten() {
        match value {
            Value::Array(values) => {
                pairs.extend(values.iter().map(|v| (name.clone(), header_value(v))));
            }
            other => pairs.push((name, header_value(&other))),
        }
    }
    pairs
}

fn header_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
