//! Synchronous client core for an envelope-style upstream API.
//!
//! # Overview
//! Every upstream response is a JSON envelope `{ "data": ..., "error": ... }`.
//! This crate builds signed requests, optionally answers them from a cache,
//! sends them through a pluggable `Transport`, and folds whatever comes back
//! (success, validation failure, domain exception, transport failure, cache
//! hit) into one `ApiResult` with a fixed classification.
//!
//! # Design
//! - `ApiRequest` is the per-call builder; it is owned by the caller and
//!   carries timing and cache bookkeeping for the last execution.
//! - `ApiClient::execute` never fails. Transport errors become exception
//!   results, cache-store errors are logged and ignored.
//! - Bodies are canonical JSON (keys sorted at every depth) and the bytes
//!   that are signed are the bytes that are sent.
//! - Hosts that do their own I/O use `ApiRequest::prepare` to get the wire
//!   request and `classify_response` plus `ApiResult::from_source` to parse
//!   what they received (host-does-IO pattern).
//! - Envelope DTOs are defined independently from the mock-server crate;
//!   integration tests catch schema drift.

pub mod cache;
pub mod client;
pub mod config;
pub mod dot;
pub mod error;
pub mod form;
pub mod http;
pub mod request;
pub mod result;
pub mod signing;
pub mod transport;

pub use cache::{CacheStore, MemoryCache};
pub use client::{
    classify_response, ApiClient, ExecuteOptions, CACHE_TIME_15_MINUTES, CACHE_TIME_30_MINUTES,
    CACHE_TIME_DAY, CACHE_TIME_HOUR,
};
pub use config::ClientConfig;
pub use dot::DotMap;
pub use error::{CacheError, ConfigError, TransportError};
pub use form::{FormBinder, FormErrors};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use request::{ApiRequest, PreparedRequest};
pub use result::{ApiResult, ResultSource, ResultState, ValidationMessage};
pub use transport::{Transport, UreqTransport};
