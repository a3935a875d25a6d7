//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Requests and results stay opaque: C callers hold a pointer and go through
//! accessor functions, so the dot-map and envelope internals never need a C
//! layout. Only the prepared wire request is plain data, because the host
//! has to read every field of it to perform the HTTP call. Conversion
//! functions live here to keep `lib.rs` focused on the `extern "C"` surface.

use std::ffi::CString;
use std::os::raw::c_char;

use apiclient_core::{ApiRequest, ApiResult, HttpMethod, ResultState};

/// Opaque handle to an `ApiRequest`.
pub struct FfiApiRequest {
    pub(crate) inner: ApiRequest,
}

/// Opaque handle to an `ApiResult`.
pub struct FfiApiResult {
    pub(crate) inner: ApiResult,
}

/// Status of a mutating call.
#[repr(C)]
#[derive(Debug, PartialEq, Eq)]
pub enum FfiStatus {
    Ok = 0,
    NullArg = 1,
    InvalidUtf8 = 2,
    InvalidJson = 3,
    Panic = 4,
}

/// HTTP method as a C enum.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiHttpMethod {
    Get = 0,
    Post = 1,
    Put = 2,
    Patch = 3,
    Delete = 4,
    Head = 5,
    Options = 6,
}

impl From<HttpMethod> for FfiHttpMethod {
    fn from(m: HttpMethod) -> Self {
        match m {
            HttpMethod::Get => FfiHttpMethod::Get,
            HttpMethod::Post => FfiHttpMethod::Post,
            HttpMethod::Put => FfiHttpMethod::Put,
            HttpMethod::Patch => FfiHttpMethod::Patch,
            HttpMethod::Delete => FfiHttpMethod::Delete,
            HttpMethod::Head => FfiHttpMethod::Head,
            HttpMethod::Options => FfiHttpMethod::Options,
        }
    }
}

impl From<FfiHttpMethod> for HttpMethod {
    fn from(m: FfiHttpMethod) -> Self {
        match m {
            FfiHttpMethod::Get => HttpMethod::Get,
            FfiHttpMethod::Post => HttpMethod::Post,
            FfiHttpMethod::Put => HttpMethod::Put,
            FfiHttpMethod::Patch => HttpMethod::Patch,
            FfiHttpMethod::Delete => HttpMethod::Delete,
            FfiHttpMethod::Head => HttpMethod::Head,
            FfiHttpMethod::Options => HttpMethod::Options,
        }
    }
}

/// Result classification as a C enum.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiResultState {
    Valid = 0,
    Invalid = 1,
    Exception = 2,
}

impl From<ResultState> for FfiResultState {
    fn from(state: ResultState) -> Self {
        match state {
            ResultState::Valid => FfiResultState::Valid,
            ResultState::Invalid => FfiResultState::Invalid,
            ResultState::Exception => FfiResultState::Exception,
        }
    }
}

/// A single HTTP header as a key-value pair of C strings.
#[repr(C)]
pub struct FfiHeader {
    pub key: *mut c_char,
    pub value: *mut c_char,
}

/// A prepared request described as C-compatible plain data.
///
/// Built by `apiclient_request_build`. `path` is relative to the host's base
/// URL. `body` and `signature` are null when the request has no body.
/// `cache_key` is the explicit key or the body fingerprint; hosts that keep
/// their own cache label the entry with `cache_tags` and skip the lookup
/// when `force_refresh` is set.
#[repr(C)]
pub struct FfiHttpRequest {
    pub method: FfiHttpMethod,
    pub path: *mut c_char,
    pub headers: *mut FfiHeader,
    pub headers_len: u32,
    pub body: *mut c_char,
    pub signature: *mut c_char,
    pub cache_key: *mut c_char,
    pub cache_tags: *mut *mut c_char,
    pub cache_tags_len: u32,
    pub force_refresh: bool,
}

impl FfiHttpRequest {
    /// Freeze `request` into a heap-allocated `FfiHttpRequest`.
    pub(crate) fn from_core(request: &ApiRequest) -> *mut Self {
        let prepared = request.prepare();
        let http = prepared.http;
        let headers_len = http.headers.len() as u32;
        let headers = into_c_array(
            http.headers
                .into_iter()
                .map(|(k, v)| FfiHeader {
                    key: into_c_string(k),
                    value: into_c_string(v),
                })
                .collect(),
        );
        let cache_tags_len = request.cache_tags().len() as u32;
        let cache_tags = into_c_array(
            request
                .cache_tags()
                .iter()
                .map(|tag| into_c_string(tag.clone()))
                .collect(),
        );

        let ffi_req = Box::new(FfiHttpRequest {
            method: http.method.into(),
            path: into_c_string(http.path),
            headers,
            headers_len,
            body: http.body.map_or(std::ptr::null_mut(), into_c_string),
            signature: prepared
                .signature
                .map_or(std::ptr::null_mut(), into_c_string),
            cache_key: into_c_string(prepared.cache_key),
            cache_tags,
            cache_tags_len,
            force_refresh: request.is_force_refresh(),
        });
        Box::into_raw(ffi_req)
    }
}

/// Leak `items` as a boxed slice; null when empty. len == capacity so the
/// free side can rebuild it exactly.
fn into_c_array<T>(items: Vec<T>) -> *mut T {
    if items.is_empty() {
        return std::ptr::null_mut();
    }
    Box::into_raw(items.into_boxed_slice()) as *mut T
}

/// An HTTP response described as C-compatible plain data.
///
/// The C caller constructs this on the stack after executing the request,
/// then passes a pointer to `apiclient_result_from_response`. The FFI layer
/// reads but does not free these fields. A null `body` reads as empty and
/// a null `headers` as no headers.
#[repr(C)]
pub struct FfiHttpResponse {
    pub status: u16,
    pub headers: *const FfiHeader,
    pub headers_len: u32,
    pub body: *const c_char,
}

/// Hand a Rust string to C. Interior NUL bytes cannot be represented, so
/// such strings come back empty.
pub(crate) fn into_c_string(s: String) -> *mut c_char {
    CString::new(s).unwrap_or_default().into_raw()
}
