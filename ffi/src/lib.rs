//! C-ABI wrapper around `apiclient-core`.
//!
//! # Overview
//! Exposes request building and envelope parsing through `extern "C"`
//! functions for hosts that perform the HTTP round-trip and caching
//! themselves (host-does-IO pattern):
//!
//! 1. `apiclient_request_new` + mutators describe the call.
//! 2. `apiclient_request_build` yields the signed wire request.
//! 3. The host sends it (or finds `cache_key` in its own cache).
//! 4. `apiclient_result_from_response` / `_from_cache` /
//!    `_from_transport_error` normalize the outcome.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - Body values cross the boundary as JSON text, so C callers can set
//!   numbers, booleans, arrays and nested objects without a C data model.
//! - The C caller owns all returned pointers and must call the matching
//!   `apiclient_*_free` function to release them. Strings returned by
//!   accessors are freed with `apiclient_free_string`.

pub mod types;

#[cfg(test)]
mod live_tests;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::catch_unwind;

use apiclient_core::{
    classify_response, ApiRequest, ApiResult, HttpResponse, ResultSource, TransportError,
};
use serde_json::Value;

use types::*;

/// Borrow a C string. `None` for null or non-UTF-8 input.
fn read_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Like `read_str`, but tells null and invalid UTF-8 apart.
fn require_str<'a>(ptr: *const c_char) -> Result<&'a str, FfiStatus> {
    if ptr.is_null() {
        return Err(FfiStatus::NullArg);
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| FfiStatus::InvalidUtf8)
}

/// Apply `f` to the request behind `req` with string arguments decoded.
fn mutate(
    req: *mut FfiApiRequest,
    f: impl FnOnce(&mut ApiRequest) -> Result<(), FfiStatus>,
) -> FfiStatus {
    if req.is_null() {
        return FfiStatus::NullArg;
    }
    let req = unsafe { &mut *req };
    match f(&mut req.inner) {
        Ok(()) => FfiStatus::Ok,
        Err(status) => status,
    }
}

fn parse_json(ptr: *const c_char) -> Result<Value, FfiStatus> {
    serde_json::from_str(require_str(ptr)?).map_err(|_| FfiStatus::InvalidJson)
}

// ---------------------------------------------------------------------------
// Request lifecycle
// ---------------------------------------------------------------------------

/// Create a request for `path` using `method`.
///
/// Returns null if `path` is null or not UTF-8.
/// The caller must free the returned pointer with `apiclient_request_free`.
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_request_new(
    path: *const c_char,
    method: FfiHttpMethod,
) -> *mut FfiApiRequest {
    catch_unwind(|| {
        let Some(path) = read_str(path) else {
            return std::ptr::null_mut();
        };
        let inner = ApiRequest::new(path, method.into());
        Box::into_raw(Box::new(FfiApiRequest { inner }))
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Free a request created by `apiclient_request_new`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_request_free(req: *mut FfiApiRequest) {
    if !req.is_null() {
        let _ = catch_unwind(|| {
            drop(unsafe { Box::from_raw(req) });
        });
    }
}

// ---------------------------------------------------------------------------
// Request mutation
// ---------------------------------------------------------------------------

/// Set `params.<name>` to the JSON value in `json_value` (e.g. `"abc"`, `12`).
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_request_add_param(
    req: *mut FfiApiRequest,
    name: *const c_char,
    json_value: *const c_char,
) -> FfiStatus {
    catch_unwind(|| {
        mutate(req, |inner| {
            let name = require_str(name)?;
            inner.add_param(name, parse_json(json_value)?);
            Ok(())
        })
    })
    .unwrap_or(FfiStatus::Panic)
}

/// Set `fields.<name>` to the JSON value in `json_value`.
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_request_add_field(
    req: *mut FfiApiRequest,
    name: *const c_char,
    json_value: *const c_char,
) -> FfiStatus {
    catch_unwind(|| {
        mutate(req, |inner| {
            let name = require_str(name)?;
            inner.add_field(name, parse_json(json_value)?);
            Ok(())
        })
    })
    .unwrap_or(FfiStatus::Panic)
}

/// Set an arbitrary dotted `path` in the body to the JSON value in
/// `json_value`.
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_request_add_data(
    req: *mut FfiApiRequest,
    path: *const c_char,
    json_value: *const c_char,
) -> FfiStatus {
    catch_unwind(|| {
        mutate(req, |inner| {
            let path = require_str(path)?;
            inner.add_data(path, parse_json(json_value)?);
            Ok(())
        })
    })
    .unwrap_or(FfiStatus::Panic)
}

#[unsafe(no_mangle)]
pub extern "C" fn apiclient_request_add_header(
    req: *mut FfiApiRequest,
    name: *const c_char,
    value: *const c_char,
) -> FfiStatus {
    catch_unwind(|| {
        mutate(req, |inner| {
            inner.add_header(require_str(name)?, require_str(value)?);
            Ok(())
        })
    })
    .unwrap_or(FfiStatus::Panic)
}

/// Send `key` as `x-api-key` and sign non-empty bodies with `secret`.
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_request_set_api_key(
    req: *mut FfiApiRequest,
    key: *const c_char,
    secret: *const c_char,
) -> FfiStatus {
    catch_unwind(|| {
        mutate(req, |inner| {
            inner.set_api_key(require_str(key)?, require_str(secret)?);
            Ok(())
        })
    })
    .unwrap_or(FfiStatus::Panic)
}

#[unsafe(no_mangle)]
pub extern "C" fn apiclient_request_set_bearer(
    req: *mut FfiApiRequest,
    token: *const c_char,
) -> FfiStatus {
    catch_unwind(|| {
        mutate(req, |inner| {
            inner.set_bearer(require_str(token)?);
            Ok(())
        })
    })
    .unwrap_or(FfiStatus::Panic)
}

#[unsafe(no_mangle)]
pub extern "C" fn apiclient_request_set_user_ip(
    req: *mut FfiApiRequest,
    ip: *const c_char,
) -> FfiStatus {
    catch_unwind(|| {
        mutate(req, |inner| {
            inner.set_user_ip(require_str(ip)?);
            Ok(())
        })
    })
    .unwrap_or(FfiStatus::Panic)
}

/// Set an explicit cache key. Null clears it, falling back to the body
/// fingerprint.
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_request_set_cache_key(
    req: *mut FfiApiRequest,
    key: *const c_char,
) -> FfiStatus {
    catch_unwind(|| {
        mutate(req, |inner| {
            let key = if key.is_null() {
                None
            } else {
                Some(require_str(key)?.to_string())
            };
            inner.set_cache_key(key);
            Ok(())
        })
    })
    .unwrap_or(FfiStatus::Panic)
}

/// Label the response cached for this request with `tag`, so the host can
/// invalidate it together with other entries carrying the same tag.
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_request_add_cache_tag(
    req: *mut FfiApiRequest,
    tag: *const c_char,
) -> FfiStatus {
    catch_unwind(|| {
        mutate(req, |inner| {
            inner.add_cache_tag(require_str(tag)?);
            Ok(())
        })
    })
    .unwrap_or(FfiStatus::Panic)
}

/// Ask the host to skip its cache lookup while still storing the response.
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_request_set_force_refresh(
    req: *mut FfiApiRequest,
    force_refresh: bool,
) -> FfiStatus {
    catch_unwind(|| {
        mutate(req, |inner| {
            inner.set_force_refresh(force_refresh);
            Ok(())
        })
    })
    .unwrap_or(FfiStatus::Panic)
}

// ---------------------------------------------------------------------------
// Request output
// ---------------------------------------------------------------------------

/// Freeze the request into a signed wire request.
///
/// Returns null if `req` is null.
/// The caller must free the returned pointer with `apiclient_free_request`.
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_request_build(req: *const FfiApiRequest) -> *mut FfiHttpRequest {
    catch_unwind(|| {
        if req.is_null() {
            return std::ptr::null_mut();
        }
        let req = unsafe { &*req };
        FfiHttpRequest::from_core(&req.inner)
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Default cache key for the request's current path and body.
///
/// Returns null if `req` is null. Free with `apiclient_free_string`.
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_request_fingerprint(req: *const FfiApiRequest) -> *mut c_char {
    catch_unwind(|| {
        if req.is_null() {
            return std::ptr::null_mut();
        }
        let req = unsafe { &*req };
        into_c_string(req.inner.fingerprint())
    })
    .unwrap_or(std::ptr::null_mut())
}

// ---------------------------------------------------------------------------
// Result construction
// ---------------------------------------------------------------------------

fn into_result(inner: ApiResult) -> *mut FfiApiResult {
    Box::into_raw(Box::new(FfiApiResult { inner }))
}

/// Normalize a response the host received for a request sent with `method`
/// to `url`. Non-2xx statuses become exceptions that still carry the body.
///
/// Returns null if `response` is null.
/// The caller must free the returned pointer with `apiclient_result_free`.
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_result_from_response(
    method: FfiHttpMethod,
    url: *const c_char,
    response: *const FfiHttpResponse,
) -> *mut FfiApiResult {
    catch_unwind(|| {
        if response.is_null() {
            return std::ptr::null_mut();
        }
        let response = unsafe { &*response };
        let response = HttpResponse {
            status: response.status,
            headers: read_headers(response.headers, response.headers_len),
            body: read_str(response.body).unwrap_or_default().to_string(),
        };
        let url = read_str(url).unwrap_or_default();
        into_result(ApiResult::from_source(classify_response(
            method.into(),
            url,
            response,
        )))
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Copy host-owned header pairs. Entries with a null or non-UTF-8 side are
/// skipped.
fn read_headers(headers: *const FfiHeader, len: u32) -> Vec<(String, String)> {
    if headers.is_null() || len == 0 {
        return Vec::new();
    }
    let headers = unsafe { std::slice::from_raw_parts(headers, len as usize) };
    headers
        .iter()
        .filter_map(|h| Some((read_str(h.key)?.to_string(), read_str(h.value)?.to_string())))
        .collect()
}

/// Build a result for a round-trip the host could not complete.
///
/// Returns null if `message` is null.
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_result_from_transport_error(
    message: *const c_char,
    timed_out: bool,
) -> *mut FfiApiResult {
    catch_unwind(|| {
        let Some(message) = read_str(message) else {
            return std::ptr::null_mut();
        };
        let error = if timed_out {
            TransportError::Timeout(message.to_string())
        } else {
            TransportError::Connection(message.to_string())
        };
        into_result(ApiResult::from_source(ResultSource::TransportError(error)))
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Build a result from a body the host found in its cache.
///
/// Returns null if `body` is null.
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_result_from_cache(body: *const c_char) -> *mut FfiApiResult {
    catch_unwind(|| {
        let Some(body) = read_str(body) else {
            return std::ptr::null_mut();
        };
        into_result(ApiResult::from_cache(body))
    })
    .unwrap_or(std::ptr::null_mut())
}

// ---------------------------------------------------------------------------
// Result accessors
// ---------------------------------------------------------------------------

/// Read from the result behind `result`, or return `default` for null.
fn inspect<T>(result: *const FfiApiResult, default: T, f: impl FnOnce(&ApiResult) -> T) -> T {
    if result.is_null() {
        return default;
    }
    f(&unsafe { &*result }.inner)
}

/// Classification of the result. Null reads as `Exception`.
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_result_state(result: *const FfiApiResult) -> FfiResultState {
    catch_unwind(|| inspect(result, FfiResultState::Exception, |r| r.state().into()))
        .unwrap_or(FfiResultState::Exception)
}

#[unsafe(no_mangle)]
pub extern "C" fn apiclient_result_is_valid(result: *const FfiApiResult) -> bool {
    catch_unwind(|| inspect(result, false, ApiResult::is_valid)).unwrap_or(false)
}

/// True only when the transport failed (including non-2xx statuses).
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_result_is_exception(result: *const FfiApiResult) -> bool {
    catch_unwind(|| inspect(result, false, ApiResult::is_exception)).unwrap_or(false)
}

#[unsafe(no_mangle)]
pub extern "C" fn apiclient_result_is_cached(result: *const FfiApiResult) -> bool {
    catch_unwind(|| inspect(result, false, ApiResult::is_cached)).unwrap_or(false)
}

#[unsafe(no_mangle)]
pub extern "C" fn apiclient_result_has_validation_errors(result: *const FfiApiResult) -> bool {
    catch_unwind(|| inspect(result, false, ApiResult::has_validation_errors)).unwrap_or(false)
}

#[unsafe(no_mangle)]
pub extern "C" fn apiclient_result_has_exception_message(result: *const FfiApiResult) -> bool {
    catch_unwind(|| inspect(result, false, ApiResult::has_exception_message)).unwrap_or(false)
}

/// HTTP status the result came from; 0 when no response arrived or the
/// result was cached.
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_result_status_code(result: *const FfiApiResult) -> u16 {
    catch_unwind(|| inspect(result, 0, |r| r.status_code().unwrap_or(0))).unwrap_or(0)
}

/// `error.message`, else the transport failure, else `"-"`.
/// Free with `apiclient_free_string`.
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_result_exception_message(result: *const FfiApiResult) -> *mut c_char {
    catch_unwind(|| {
        inspect(result, std::ptr::null_mut(), |r| {
            into_c_string(r.exception_message())
        })
    })
    .unwrap_or(std::ptr::null_mut())
}

/// The `data` section as compact JSON (`{}` when empty).
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_result_data_json(result: *const FfiApiResult) -> *mut c_char {
    catch_unwind(|| {
        inspect(result, std::ptr::null_mut(), |r| {
            into_c_string(r.data().to_value().to_string())
        })
    })
    .unwrap_or(std::ptr::null_mut())
}

/// The `error` section as compact JSON (`{}` when empty).
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_result_error_json(result: *const FfiApiResult) -> *mut c_char {
    catch_unwind(|| {
        inspect(result, std::ptr::null_mut(), |r| {
            into_c_string(r.error().to_value().to_string())
        })
    })
    .unwrap_or(std::ptr::null_mut())
}

/// The body exactly as received or as found in the cache, or null when no
/// response arrived. Free with `apiclient_free_string`.
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_result_raw_body(result: *const FfiApiResult) -> *mut c_char {
    catch_unwind(|| {
        inspect(result, std::ptr::null_mut(), |r| {
            r.raw_body()
                .map_or(std::ptr::null_mut(), |body| into_c_string(body.to_string()))
        })
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Response headers as a JSON object of lowercased name to list of values.
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_result_headers_json(result: *const FfiApiResult) -> *mut c_char {
    catch_unwind(|| {
        inspect(result, std::ptr::null_mut(), |r| {
            let headers = serde_json::to_string(r.response_headers()).unwrap_or_default();
            into_c_string(headers)
        })
    })
    .unwrap_or(std::ptr::null_mut())
}

/// JSON of the `data` value at a dotted `path`, or null when absent.
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_result_get(
    result: *const FfiApiResult,
    path: *const c_char,
) -> *mut c_char {
    catch_unwind(|| {
        let Some(path) = read_str(path) else {
            return std::ptr::null_mut();
        };
        inspect(result, std::ptr::null_mut(), |r| match r.data().get(path) {
            Some(value) => into_c_string(value.to_string()),
            None => std::ptr::null_mut(),
        })
    })
    .unwrap_or(std::ptr::null_mut())
}

/// `error.validation.fields` as a JSON array of `{"name","message"}`.
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_result_field_errors_json(result: *const FfiApiResult) -> *mut c_char {
    catch_unwind(|| {
        inspect(result, std::ptr::null_mut(), |r| {
            let errors = serde_json::to_string(&r.field_validation_errors()).unwrap_or_default();
            into_c_string(errors)
        })
    })
    .unwrap_or(std::ptr::null_mut())
}

/// `error.validation.params` as a JSON array of `{"name","message"}`.
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_result_param_errors_json(result: *const FfiApiResult) -> *mut c_char {
    catch_unwind(|| {
        inspect(result, std::ptr::null_mut(), |r| {
            let errors = serde_json::to_string(&r.param_validation_errors()).unwrap_or_default();
            into_c_string(errors)
        })
    })
    .unwrap_or(std::ptr::null_mut())
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Free an `FfiHttpRequest` returned by `apiclient_request_build`.
/// Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_free_request(req: *mut FfiHttpRequest) {
    if req.is_null() {
        return;
    }
    let _ = catch_unwind(|| {
        let req = unsafe { Box::from_raw(req) };
        for s in [req.path, req.body, req.signature, req.cache_key] {
            free_c_string(s);
        }
        if !req.headers.is_null() && req.headers_len > 0 {
            let headers = unsafe {
                Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                    req.headers,
                    req.headers_len as usize,
                ))
            };
            for h in headers.iter() {
                free_c_string(h.key);
                free_c_string(h.value);
            }
        }
        if !req.cache_tags.is_null() && req.cache_tags_len > 0 {
            let tags = unsafe {
                Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                    req.cache_tags,
                    req.cache_tags_len as usize,
                ))
            };
            for tag in tags.iter() {
                free_c_string(*tag);
            }
        }
    });
}

/// Free a result returned by any `apiclient_result_from_*` function.
/// Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_result_free(result: *mut FfiApiResult) {
    if !result.is_null() {
        let _ = catch_unwind(|| {
            drop(unsafe { Box::from_raw(result) });
        });
    }
}

/// Free a C string allocated by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn apiclient_free_string(s: *mut c_char) {
    if !s.is_null() {
        let _ = catch_unwind(|| free_c_string(s));
    }
}

fn free_c_string(s: *mut c_char) {
    if !s.is_null() {
        drop(unsafe { CString::from_raw(s) });
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
