//! In-memory stand-in for the upstream API.
//!
//! Every route answers with the `{ "data": ..., "error": ... }` envelope.
//! When a secret is configured, non-empty request bodies must carry a valid
//! `x-data-signature` (base64 HMAC-SHA256 of the raw body).

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    body::{Body, Bytes},
    extract::{Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub const SIGNATURE_HEADER: &str = "x-data-signature";

/// Headers `/echo` reports back.
const ECHOED_HEADERS: [&str; 5] = [
    "authorization",
    "content-type",
    "x-api-key",
    "x-data-signature",
    "x-user-ip",
];

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub title: String,
    pub price: f64,
}

#[derive(Clone, Default)]
pub struct AppState {
    secret: Option<Arc<str>>,
    hits: Arc<AtomicUsize>,
    items: Arc<RwLock<HashMap<Uuid, Item>>>,
}

impl AppState {
    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::SeqCst);
    }
}

/// Router without signature checks.
pub fn app() -> Router {
    router(AppState::default())
}

/// Router that rejects unsigned or mis-signed non-empty bodies.
pub fn app_with_secret(secret: impl Into<String>) -> Router {
    router(AppState {
        secret: Some(Arc::from(secret.into())),
        ..AppState::default()
    })
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/items", get(list_items).post(create_item))
        .route("/items/lookup", post(lookup_item))
        .route("/echo", post(echo))
        .route("/explode", post(explode))
        .route("/business", post(business))
        .route("/slow", get(slow))
        .route("/hits", get(hits))
        .layer(middleware::from_fn_with_state(state.clone(), verify_signature))
        .with_state(state)
}

pub async fn run(listener: TcpListener, secret: Option<String>) -> Result<(), std::io::Error> {
    let app = match secret {
        Some(secret) => app_with_secret(secret),
        None => app(),
    };
    axum::serve(listener, app).await
}

pub fn sign(body: &[u8], secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA-256 accepts keys of any size");
    mac.update(body);
    STANDARD.encode(mac.finalize().into_bytes())
}

fn signature_matches(body: &[u8], secret: &str, signature: &str) -> bool {
    let Ok(expected) = STANDARD.decode(signature) else {
        return false;
    };
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA-256 accepts keys of any size");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn envelope_data(data: Value) -> Json<Value> {
    Json(json!({ "data": data }))
}

fn envelope_error(error: Value) -> Json<Value> {
    Json(json!({ "error": error }))
}

/// Lenient body parse: an empty or non-JSON body reads as `null`.
fn parse_body(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap_or(Value::Null)
}

async fn verify_signature(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(secret) = state.secret.clone() else {
        return next.run(request).await;
    };

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(error = %err, "failed to read request body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    if !bytes.is_empty() {
        let signature = parts
            .headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok());
        let valid = signature.is_some_and(|sig| signature_matches(&bytes, &secret, sig));
        if !valid {
            tracing::warn!(path = %parts.uri.path(), "rejected request with bad signature");
            return (
                StatusCode::UNAUTHORIZED,
                envelope_error(json!({ "message": "invalid signature", "exception": true })),
            )
                .into_response();
        }
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

async fn list_items(State(state): State<AppState>) -> Json<Value> {
    state.hit();
    let items = state.items.read().await;
    let mut listed: Vec<&Item> = items.values().collect();
    listed.sort_by(|a, b| a.title.cmp(&b.title));
    envelope_data(json!({ "items": listed }))
}

/// Expects `fields.title` (non-empty) and optionally `fields.price` (>= 0).
async fn create_item(State(state): State<AppState>, body: Bytes) -> (StatusCode, Json<Value>) {
    state.hit();
    let body = parse_body(&body);
    let fields = &body["fields"];

    let mut errors = Vec::new();
    let title = fields["title"].as_str().unwrap_or_default().trim().to_string();
    if title.is_empty() {
        errors.push(json!({ "name": "title", "message": "required" }));
    }
    let price = match &fields["price"] {
        Value::Null => 0.0,
        value => match value.as_f64() {
            Some(price) if price >= 0.0 => price,
            _ => {
                errors.push(json!({ "name": "price", "message": "must not be negative" }));
                0.0
            }
        },
    };
    if !errors.is_empty() {
        return (
            StatusCode::OK,
            envelope_error(json!({ "validation": { "fields": errors } })),
        );
    }

    let item = Item {
        id: Uuid::new_v4(),
        title,
        price,
    };
    state.items.write().await.insert(item.id, item.clone());
    (StatusCode::CREATED, envelope_data(json!({ "item": item })))
}

/// Expects `params.id`. Unknown ids come back as a param validation error.
async fn lookup_item(State(state): State<AppState>, body: Bytes) -> Json<Value> {
    state.hit();
    let body = parse_body(&body);
    let found = body["params"]["id"]
        .as_str()
        .and_then(|id| Uuid::parse_str(id).ok());

    let items = state.items.read().await;
    match found.and_then(|id| items.get(&id)) {
        Some(item) => envelope_data(json!({ "item": item })),
        None => envelope_error(json!({
            "validation": { "params": [{ "name": "id", "message": "not found" }] }
        })),
    }
}

async fn echo(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Json<Value> {
    state.hit();
    let seen: serde_json::Map<String, Value> = ECHOED_HEADERS
        .iter()
        .filter_map(|name| {
            let value = headers.get(*name)?.to_str().ok()?;
            Some((name.to_string(), Value::String(value.to_string())))
        })
        .collect();
    envelope_data(json!({
        "headers": seen,
        "raw": String::from_utf8_lossy(&body),
        "body": parse_body(&body),
    }))
}

async fn explode(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    state.hit();
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        envelope_error(json!({ "message": "upstream exploded", "exception": true })),
    )
}

/// A domain failure reported with a 200 status.
async fn business(State(state): State<AppState>) -> Json<Value> {
    state.hit();
    envelope_error(json!({
        "message": "insufficient funds",
        "exception": "DomainException",
    }))
}

#[derive(Deserialize)]
struct SlowParams {
    #[serde(default = "default_delay_ms")]
    ms: u64,
}

fn default_delay_ms() -> u64 {
    2_000
}

async fn slow(State(state): State<AppState>, Query(params): Query<SlowParams>) -> Json<Value> {
    state.hit();
    tokio::time::sleep(Duration::from_millis(params.ms)).await;
    envelope_data(json!({ "slept_ms": params.ms }))
}

/// Number of requests served by every other route. Not counted itself.
async fn hits(State(state): State<AppState>) -> Json<Value> {
    envelope_data(json!({ "hits": state.hits.load(Ordering::SeqCst) }))
}
