//! Canonical body encoding, request signatures and cache fingerprints.
//!
//! # Design
//! The signature and the cache key are both computed over the canonical JSON
//! encoding of the request body: keys sorted at every depth, compact
//! separators, no escaping beyond what JSON requires. The encoding is rebuilt
//! key by key so it stays sorted even if `serde_json` is compiled with
//! `preserve_order`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use serde_json::{Map, Value};
use sha2::Sha256;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "x-data-signature";

/// Prefix of every default cache key.
pub const CACHE_KEY_PREFIX: &str = "api_request_";

type HmacSha256 = Hmac<Sha256>;

/// Encode `value` with keys sorted lexicographically at every depth.
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut keys: Vec<&String> = object.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(object.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&object[key.as_str()]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// `base64(HMAC-SHA256(payload, secret))`.
pub fn sign(payload: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA-256 accepts keys of any size");
    mac.update(payload.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Default cache key: `api_request_` followed by the hex MD5 of
/// `path + canonical_body`.
pub fn fingerprint(path: &str, canonical_body: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(path.as_bytes());
    hasher.update(canonical_body.as_bytes());
    format!("{CACHE_KEY_PREFIX}{}", hex::encode(hasher.finalize()))
}
