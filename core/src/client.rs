//! Executes `ApiRequest`s: cache lookup, signing, transport, normalization.
//!
//! # Design
//! `ApiClient` holds the transport and an optional shared cache store and
//! nothing else; per-call state (body, secret, cache key, timings) lives on
//! the `ApiRequest` the caller passes in. `execute` never fails: transport
//! errors become an exception `ApiResult`, and cache-store errors are logged
//! and ignored. There are no retries.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn, Span};

use crate::cache::CacheStore;
use crate::config::ClientConfig;
use crate::error::{CacheError, TransportError};
use crate::http::{HttpMethod, HttpResponse};
use crate::request::ApiRequest;
use crate::result::{ApiResult, ResultSource};
use crate::transport::{Transport, UreqTransport};

pub const CACHE_TIME_15_MINUTES: Duration = Duration::from_secs(15 * 60);
pub const CACHE_TIME_30_MINUTES: Duration = Duration::from_secs(30 * 60);
pub const CACHE_TIME_HOUR: Duration = Duration::from_secs(60 * 60);
pub const CACHE_TIME_DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-call execution settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteOptions {
    pub use_cache: bool,
    pub cache_ttl: Duration,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            use_cache: false,
            cache_ttl: CACHE_TIME_DAY,
        }
    }
}

impl ExecuteOptions {
    pub fn cached(cache_ttl: Duration) -> Self {
        Self {
            use_cache: true,
            cache_ttl,
        }
    }

    pub fn uncached() -> Self {
        Self::default()
    }
}

/// Executor for upstream API calls.
#[derive(Debug)]
pub struct ApiClient {
    transport: Box<dyn Transport>,
    cache: Option<Arc<dyn CacheStore>>,
}

impl ApiClient {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Box::new(transport),
            cache: None,
        }
    }

    /// Client over a `ureq` transport with the configured base URL and
    /// timeout.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(UreqTransport::with_timeout(&config.base_url, config.timeout))
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache(&self) -> Option<&Arc<dyn CacheStore>> {
        self.cache.as_ref()
    }

    /// Drop every cached response labelled with any of `tags`.
    pub fn invalidate_tags(&self, tags: &[&str]) -> Result<usize, CacheError> {
        match &self.cache {
            Some(cache) => cache.invalidate_tags(tags),
            None => Ok(0),
        }
    }

    /// Run `request` and normalize the outcome.
    ///
    /// With `use_cache`, a stored body for the request's cache key is
    /// returned without any network traffic (unless the request forces a
    /// refresh), and a successful response is stored for `cache_ttl` under
    /// the request's cache tags. Start and end times are recorded on
    /// `request` on every path.
    #[instrument(
        name = "api_request",
        skip_all,
        fields(
            http.method = %request.method(),
            http.path = %request.path(),
            http.status_code = tracing::field::Empty,
            cache.hit = tracing::field::Empty,
            elapsed_ms = tracing::field::Empty,
        )
    )]
    pub fn execute(&self, request: &mut ApiRequest, options: ExecuteOptions) -> ApiResult {
        request.mark_started(options.use_cache);
        let canonical_body = request.canonical_body();

        let cache_key = options
            .use_cache
            .then(|| request.resolve_cache_key(&canonical_body));

        if let Some(key) = cache_key.as_deref() {
            if !request.is_force_refresh() {
                let hit = self.cache_lookup(key);
                Span::current().record("cache.hit", hit.is_some());
                if let Some(body) = hit {
                    return finish(request, ApiResult::from_cache(body));
                }
            }
        }

        let prepared = request.build(canonical_body);
        let source = match self.transport.send(&prepared.http) {
            Ok(response) => classify_response(
                prepared.http.method,
                &self.transport.url_for(&prepared.http.path),
                response,
            ),
            Err(err) => ResultSource::TransportError(err),
        };
        let result = ApiResult::from_source(source);

        if let Some(status) = result.status_code() {
            Span::current().record("http.status_code", status);
        }

        match result.transport_error() {
            Some(err) => warn!(error = %err, "upstream call failed"),
            None => {
                if let (Some(key), Some(body)) = (cache_key.as_deref(), result.raw_body()) {
                    self.cache_store(key, body, options.cache_ttl, request);
                }
            }
        }

        finish(request, result)
    }

    fn cache_lookup(&self, key: &str) -> Option<String> {
        let Some(cache) = &self.cache else {
            debug!("caching requested but no cache store is configured");
            return None;
        };
        match cache.get(key) {
            Ok(Some(body)) => {
                debug!(cache.key = key, "cache hit");
                Some(body)
            }
            Ok(None) => {
                debug!(cache.key = key, "cache miss");
                None
            }
            Err(err) => {
                warn!(cache.key = key, error = %err, "cache read failed; treating as miss");
                None
            }
        }
    }

    fn cache_store(&self, key: &str, body: &str, ttl: Duration, request: &ApiRequest) {
        let Some(cache) = &self.cache else {
            return;
        };
        match cache.set(key, body, ttl, request.cache_tags()) {
            Ok(()) => debug!(cache.key = key, ttl_secs = ttl.as_secs(), "response cached"),
            Err(err) => warn!(cache.key = key, error = %err, "cache write failed"),
        }
    }
}

fn finish(request: &mut ApiRequest, result: ApiResult) -> ApiResult {
    request.mark_finished();
    if let Some(elapsed) = request.elapsed() {
        Span::current().record("elapsed_ms", elapsed.as_millis() as u64);
    }
    result
}

/// Apply the executor's status rules to a response the host received: 2xx
/// passes through, anything else becomes a `TransportError::Status` that
/// still carries the response.
pub fn classify_response(method: HttpMethod, url: &str, response: HttpResponse) -> ResultSource {
    if response.is_success() {
        return ResultSource::Response(response);
    }
    ResultSource::TransportError(TransportError::Status {
        method,
        url: url.to_string(),
        status: response.status,
        response: Box::new(response),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::http::HttpRequest;
    use crate::signing::SIGNATURE_HEADER;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::{BTreeSet, VecDeque};
    use tracing_test::traced_test;

    /// Replays canned outcomes and records what was sent.
    #[derive(Debug, Default)]
    struct ScriptedTransport {
        outcomes: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        sent: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn replying(outcomes: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<HttpRequest> {
            self.sent.lock().clone()
        }
    }

    impl Transport for ScriptedTransport {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.sent.lock().push(request.clone());
            self.outcomes
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Connection("no scripted reply".into())))
        }

        fn url_for(&self, path: &str) -> String {
            format!("http://upstream{path}")
        }
    }

    #[derive(Debug)]
    struct BrokenCache;

    impl CacheStore for BrokenCache {
        fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Backend("down".into()))
        }

        fn set(
            &self,
            _key: &str,
            _value: &str,
            _ttl: Duration,
            _tags: &BTreeSet<String>,
        ) -> Result<(), CacheError> {
            Err(CacheError::Backend("down".into()))
        }

        fn delete(&self, _key: &str) -> Result<bool, CacheError> {
            Err(CacheError::Backend("down".into()))
        }

        fn invalidate_tags(&self, _tags: &[&str]) -> Result<usize, CacheError> {
            Err(CacheError::Backend("down".into()))
        }
    }

    fn reply(status: u16, body: &str) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.to_string(),
        })
    }

    #[test]
    fn uncached_success() {
        let transport = ScriptedTransport::replying(vec![reply(200, r#"{"data":{"id":"1"}}"#)]);
        let client = ApiClient::new(Arc::clone(&transport));

        let mut request = ApiRequest::post("/items");
        request.add_field("title", "Lamp");
        let result = client.execute(&mut request, ExecuteOptions::default());

        assert!(result.is_valid());
        assert_eq!(result.data().get_str("id"), Some("1"));
        assert!(request.elapsed().is_some());
        assert!(!request.used_cache());
        assert_eq!(request.resolved_cache_key(), None);

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body.as_deref(), Some(r#"{"fields":{"title":"Lamp"}}"#));
    }

    #[test]
    fn signature_is_attached_to_signed_body() {
        let transport = ScriptedTransport::replying(vec![reply(200, "{}")]);
        let client = ApiClient::new(Arc::clone(&transport));

        let mut request = ApiRequest::post("/items");
        request.set_api_key("key-1", "s3cret").add_param("id", "abc");
        client.execute(&mut request, ExecuteOptions::default());

        let sent = transport.sent();
        let expected = crate::signing::sign(r#"{"params":{"id":"abc"}}"#, "s3cret");
        assert_eq!(sent[0].header(SIGNATURE_HEADER), Some(expected.as_str()));
        assert_eq!(sent[0].header("x-api-key"), Some("key-1"));
    }

    #[test]
    fn error_status_becomes_exception_with_parsed_body() {
        let transport = ScriptedTransport::replying(vec![reply(
            500,
            r#"{"error":{"message":"upstream exploded","exception":true}}"#,
        )]);
        let cache = Arc::new(MemoryCache::new());
        let client = ApiClient::new(Arc::clone(&transport)).with_cache(cache.clone());

        let mut request = ApiRequest::post("/explode");
        request.add_param("x", 1);
        let result = client.execute(&mut request, ExecuteOptions::cached(CACHE_TIME_HOUR));

        assert!(result.is_exception());
        assert!(!result.is_valid());
        assert_eq!(result.status_code(), Some(500));
        assert_eq!(result.exception_message(), "upstream exploded");
        assert!(cache.is_empty(), "failed calls are never cached");
        assert!(request.finished_at().is_some());
    }

    #[test]
    fn transport_failure_is_captured() {
        let transport =
            ScriptedTransport::replying(vec![Err(TransportError::Timeout("deadline".into()))]);
        let client = ApiClient::new(Arc::clone(&transport));

        let mut request = ApiRequest::get("/slow");
        let result = client.execute(&mut request, ExecuteOptions::default());

        assert!(result.is_exception());
        assert_eq!(result.exception_message(), "request timed out: deadline");
        assert!(result.raw_body().is_none());
        assert!(request.elapsed().is_some());
    }

    #[test]
    fn cache_miss_then_hit_with_empty_body() {
        let transport = ScriptedTransport::replying(vec![reply(200, r#"{"data":{"n":1}}"#)]);
        let cache = Arc::new(MemoryCache::new());
        let client = ApiClient::new(Arc::clone(&transport)).with_cache(cache.clone());

        let mut request = ApiRequest::get("/stats");
        request.set_api_key("key-1", "s3cret");

        let first = client.execute(&mut request, ExecuteOptions::cached(CACHE_TIME_DAY));
        assert!(!first.is_cached());
        assert_eq!(cache.len(), 1);
        let first_finished = request.finished_at().unwrap();

        let second = client.execute(&mut request, ExecuteOptions::cached(CACHE_TIME_DAY));
        assert!(second.is_cached());
        assert!(request.used_cache());
        assert!(request.elapsed().is_some());
        assert!(request.started_at().unwrap() >= first_finished);
        assert!(request.finished_at().unwrap() >= request.started_at().unwrap());
        assert_eq!(second.data(), first.data());
        assert_eq!(request.resolved_cache_key(), Some(request.fingerprint().as_str()));

        let sent = transport.sent();
        assert_eq!(sent.len(), 1, "cache hit must not reach the transport");
        assert!(sent[0].header(SIGNATURE_HEADER).is_none());
    }

    #[test]
    fn cache_hit_skips_signing_and_transport() {
        let cache = Arc::new(MemoryCache::new());
        let transport = ScriptedTransport::replying(Vec::new());
        let client = ApiClient::new(Arc::clone(&transport)).with_cache(cache.clone());

        let mut request = ApiRequest::post("/items");
        request.set_api_key("key-1", "s3cret").add_param("id", "abc");
        cache
            .set(&request.fingerprint(), r#"{"data":{"id":"abc"}}"#, CACHE_TIME_HOUR, &BTreeSet::new())
            .unwrap();

        let result = client.execute(&mut request, ExecuteOptions::cached(CACHE_TIME_HOUR));
        assert!(result.is_cached());
        assert!(result.is_valid());
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn force_refresh_skips_read_but_still_writes() {
        let transport = ScriptedTransport::replying(vec![reply(200, r#"{"data":{"v":2}}"#)]);
        let cache = Arc::new(MemoryCache::new());
        let client = ApiClient::new(Arc::clone(&transport)).with_cache(cache.clone());

        let mut request = ApiRequest::get("/config");
        request.set_cache_key(Some("config".to_string())).set_force_refresh(true);
        cache
            .set("config", r#"{"data":{"v":1}}"#, CACHE_TIME_HOUR, &BTreeSet::new())
            .unwrap();

        let result = client.execute(&mut request, ExecuteOptions::cached(CACHE_TIME_HOUR));
        assert!(!result.is_cached());
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(cache.get("config").unwrap().as_deref(), Some(r#"{"data":{"v":2}}"#));
    }

    #[test]
    fn invalid_envelope_is_still_cached() {
        let body = r#"{"error":{"validation":{"params":[{"name":"id","message":"not found"}]}}}"#;
        let transport = ScriptedTransport::replying(vec![reply(200, body)]);
        let cache = Arc::new(MemoryCache::new());
        let client = ApiClient::new(Arc::clone(&transport)).with_cache(cache.clone());

        let mut request = ApiRequest::post("/items/lookup");
        request.add_param("id", "abc");
        let result = client.execute(&mut request, ExecuteOptions::cached(CACHE_TIME_HOUR));

        assert!(!result.is_exception());
        assert!(!result.is_valid());
        assert_eq!(cache.get(&request.fingerprint()).unwrap().as_deref(), Some(body));
    }

    #[test]
    fn cached_writes_carry_tags() {
        let transport = ScriptedTransport::replying(vec![reply(200, r#"{"data":{}}"#)]);
        let cache = Arc::new(MemoryCache::new());
        let client = ApiClient::new(Arc::clone(&transport)).with_cache(cache.clone());

        let mut request = ApiRequest::get("/items");
        request.set_cache_tags(["items"]);
        client.execute(&mut request, ExecuteOptions::cached(CACHE_TIME_HOUR));

        assert_eq!(client.invalidate_tags(&["items"]).unwrap(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn caching_without_store_still_calls_upstream() {
        let transport = ScriptedTransport::replying(vec![reply(200, "{}"), reply(200, "{}")]);
        let client = ApiClient::new(Arc::clone(&transport));

        let mut request = ApiRequest::get("/items");
        client.execute(&mut request, ExecuteOptions::cached(CACHE_TIME_HOUR));
        client.execute(&mut request, ExecuteOptions::cached(CACHE_TIME_HOUR));
        assert_eq!(transport.sent().len(), 2);
        assert_eq!(client.invalidate_tags(&["items"]).unwrap(), 0);
    }

    #[test]
    #[traced_test]
    fn broken_cache_does_not_affect_outcome() {
        let transport = ScriptedTransport::replying(vec![reply(200, r#"{"data":{"ok":true}}"#)]);
        let client = ApiClient::new(Arc::clone(&transport)).with_cache(Arc::new(BrokenCache));

        let mut request = ApiRequest::get("/items");
        let result = client.execute(&mut request, ExecuteOptions::cached(CACHE_TIME_HOUR));

        assert!(result.is_valid());
        assert!(!result.is_cached());
        assert!(logs_contain("cache read failed"));
        assert!(logs_contain("cache write failed"));
    }

    #[test]
    fn classify_passes_2xx_and_wraps_others() {
        let ok = HttpResponse {
            status: 201,
            headers: Vec::new(),
            body: String::new(),
        };
        assert!(matches!(
            classify_response(HttpMethod::Post, "http://upstream/items", ok),
            ResultSource::Response(_)
        ));

        let not_found = HttpResponse {
            status: 404,
            headers: Vec::new(),
            body: "{}".to_string(),
        };
        match classify_response(HttpMethod::Get, "http://upstream/items/1", not_found) {
            ResultSource::TransportError(TransportError::Status { status, url, .. }) => {
                assert_eq!(status, 404);
                assert_eq!(url, "http://upstream/items/1");
            }
            other => panic!("unexpected source: {other:?}"),
        }
    }
}
