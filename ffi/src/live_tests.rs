//! Host-does-IO round-trips against the live mock server.
//!
//! Plays the role of a C host: builds requests through the FFI surface,
//! performs the HTTP call with `ureq`, keeps its own cache keyed by the
//! request's `cache_key`, and hands responses back for normalization.

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use crate::types::*;
use crate::*;

const SECRET: &str = "host-secret";

fn start_server() -> String {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener, Some(SECRET.to_string())).await
        })
        .unwrap();
    });

    format!("http://{addr}")
}

fn c(s: &str) -> CString {
    CString::new(s).unwrap()
}

fn cstr<'a>(ptr: *const c_char) -> &'a str {
    unsafe { CStr::from_ptr(ptr) }.to_str().unwrap()
}

fn take(s: *mut c_char) -> String {
    let out = cstr(s).to_string();
    apiclient_free_string(s);
    out
}

/// What the host got back from the wire.
struct Received {
    status: u16,
    headers: Vec<(CString, CString)>,
    body: String,
}

/// Execute a built request the way a C host would.
fn send(base_url: &str, req: &FfiHttpRequest) -> Received {
    let agent = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .build()
        .new_agent();

    let method = match req.method {
        FfiHttpMethod::Get => "GET",
        FfiHttpMethod::Post => "POST",
        FfiHttpMethod::Put => "PUT",
        FfiHttpMethod::Patch => "PATCH",
        FfiHttpMethod::Delete => "DELETE",
        FfiHttpMethod::Head => "HEAD",
        FfiHttpMethod::Options => "OPTIONS",
    };
    let mut builder = ureq::http::Request::builder()
        .method(method)
        .uri(format!("{base_url}{}", cstr(req.path)));
    if !req.headers.is_null() {
        let headers = unsafe { std::slice::from_raw_parts(req.headers, req.headers_len as usize) };
        for h in headers {
            builder = builder.header(cstr(h.key), cstr(h.value));
        }
    }

    let mut response = if req.body.is_null() {
        agent.run(builder.body(()).unwrap())
    } else {
        agent.run(builder.body(cstr(req.body).to_string()).unwrap())
    }
    .expect("HTTP transport error");

    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| Some((c(name.as_str()), c(value.to_str().ok()?))))
        .collect();
    Received {
        status: response.status().as_u16(),
        headers,
        body: response.body_mut().read_to_string().unwrap_or_default(),
    }
}

fn normalize(base_url: &str, req: &FfiHttpRequest, received: &Received) -> *mut FfiApiResult {
    let url = c(&format!("{base_url}{}", cstr(req.path)));
    let body = c(&received.body);
    let headers: Vec<FfiHeader> = received
        .headers
        .iter()
        .map(|(name, value)| FfiHeader {
            key: name.as_ptr() as *mut c_char,
            value: value.as_ptr() as *mut c_char,
        })
        .collect();
    let response = FfiHttpResponse {
        status: received.status,
        headers: headers.as_ptr(),
        headers_len: headers.len() as u32,
        body: body.as_ptr(),
    };
    apiclient_result_from_response(req.method, url.as_ptr(), &response)
}

#[test]
fn signed_create_round_trip() {
    let base_url = start_server();

    let path = c("/items");
    let req = apiclient_request_new(path.as_ptr(), FfiHttpMethod::Post);
    let (key, secret) = (c("key-1"), c(SECRET));
    apiclient_request_set_api_key(req, key.as_ptr(), secret.as_ptr());
    let (title, value) = (c("title"), c(r#""Desk""#));
    apiclient_request_add_field(req, title.as_ptr(), value.as_ptr());

    let built = apiclient_request_build(req);
    let received = send(&base_url, unsafe { &*built });
    assert_eq!(received.status, 201);

    let result = normalize(&base_url, unsafe { &*built }, &received);
    assert!(apiclient_result_is_valid(result));
    let title_path = c("item.title");
    assert_eq!(take(apiclient_result_get(result, title_path.as_ptr())), r#""Desk""#);

    apiclient_result_free(result);
    apiclient_free_request(built);
    apiclient_request_free(req);
}

#[test]
fn validation_and_server_errors() {
    let base_url = start_server();

    // Unsigned body: the server rejects it with 401.
    let path = c("/items");
    let req = apiclient_request_new(path.as_ptr(), FfiHttpMethod::Post);
    let (title, value) = (c("title"), c(r#""Desk""#));
    apiclient_request_add_field(req, title.as_ptr(), value.as_ptr());
    let built = apiclient_request_build(req);
    let received = send(&base_url, unsafe { &*built });
    let result = normalize(&base_url, unsafe { &*built }, &received);
    assert!(apiclient_result_is_exception(result));
    assert_eq!(apiclient_result_status_code(result), 401);
    assert_eq!(take(apiclient_result_exception_message(result)), "invalid signature");
    apiclient_result_free(result);
    apiclient_free_request(built);

    // Signed but invalid: a 200 carrying field errors.
    let (key, secret) = (c("key-1"), c(SECRET));
    apiclient_request_set_api_key(req, key.as_ptr(), secret.as_ptr());
    let empty = c(r#""""#);
    apiclient_request_add_field(req, title.as_ptr(), empty.as_ptr());
    let built = apiclient_request_build(req);
    let received = send(&base_url, unsafe { &*built });
    let result = normalize(&base_url, unsafe { &*built }, &received);
    assert_eq!(apiclient_result_state(result), FfiResultState::Invalid);
    assert_eq!(
        take(apiclient_result_field_errors_json(result)),
        r#"[{"name":"title","message":"required"}]"#
    );
    apiclient_result_free(result);
    apiclient_free_request(built);

    apiclient_request_free(req);
}

#[test]
fn host_side_cache_by_key() {
    let base_url = start_server();
    let mut host_cache: HashMap<String, String> = HashMap::new();
    let mut host_tags: HashMap<String, Vec<String>> = HashMap::new();

    let path = c("/items");
    let req = apiclient_request_new(path.as_ptr(), FfiHttpMethod::Get);
    let tag = c("items");
    apiclient_request_add_cache_tag(req, tag.as_ptr());
    let built = apiclient_request_build(req);
    let cache_key = cstr(unsafe { (*built).cache_key }).to_string();
    assert!(!host_cache.contains_key(&cache_key));

    let received = send(&base_url, unsafe { &*built });
    let live = normalize(&base_url, unsafe { &*built }, &received);
    assert!(apiclient_result_is_valid(live));
    let headers = take(apiclient_result_headers_json(live));
    assert!(headers.contains(r#""content-type":["application/json"]"#), "{headers}");
    assert_eq!(take(apiclient_result_raw_body(live)), received.body);

    host_cache.insert(cache_key.clone(), received.body.clone());
    let r = unsafe { &*built };
    let tags = unsafe { std::slice::from_raw_parts(r.cache_tags, r.cache_tags_len as usize) };
    for tag in tags {
        host_tags
            .entry(cstr(*tag).to_string())
            .or_default()
            .push(cache_key.clone());
    }
    assert_eq!(host_tags["items"], vec![cache_key.clone()]);

    let stored = c(&host_cache[&cache_key]);
    let cached = apiclient_result_from_cache(stored.as_ptr());
    assert!(apiclient_result_is_cached(cached));
    assert_eq!(
        take(apiclient_result_data_json(cached)),
        take(apiclient_result_data_json(live))
    );

    apiclient_result_free(cached);
    apiclient_result_free(live);
    apiclient_free_request(built);
    apiclient_request_free(req);
}
