//! Deterministic canonical-JSON hashing primitives.
//!
//! Every hash the ledger ever persists or returns to a caller is built from
//! two operations defined here: [`canonical`], which turns any serializable
//! value into one and only one byte string, and [`sha256_hex`], which turns
//! a byte string into a lowercase 64-character hex digest. Everything else
//! in this crate (`canonical_hash`, `chain_hash`) composes those two.
//!
//! Determinism is a hard contract: the same logical input must hash
//! identically no matter which process, platform, or point in time computes
//! it. That rules out `HashMap` iteration order, float formatting that
//! varies by libc, and any timestamp precision looser than microseconds.

use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("value is not representable as canonical JSON: {0}")]
    NotCanonicalizable(String),
    #[error("NaN/Infinity numeric values are not permitted in canonical JSON")]
    NonFiniteNumber,
}

/// Serializes `value` into canonical JSON: object keys sorted recursively,
/// no insignificant whitespace, arrays preserved in order.
///
/// Returns the canonical bytes. This is the single place that defines what
/// "the same payload" means for hashing purposes across the whole ledger.
pub fn canonical(value: &Value) -> Result<Vec<u8>, HashError> {
    let sorted = sort_value(value)?;
    serde_json::to_vec(&sorted).map_err(|e| HashError::NotCanonicalizable(e.to_string()))
}

/// Same as [`canonical`] but returns a `String` for call sites that want to
/// feed canonical text straight into a chain-hash concatenation.
pub fn canonical_string(value: &Value) -> Result<String, HashError> {
    canonical(value).map(|bytes| {
        // Canonical JSON is always valid UTF-8 since serde_json never emits
        // anything else for Value trees without raw byte extensions.
        String::from_utf8(bytes).expect("canonical JSON is valid UTF-8")
    })
}

fn sort_value(value: &Value) -> Result<Value, HashError> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = serde_json::Map::new();
            for (k, v) in entries {
                sorted.insert(k.clone(), sort_value(v)?);
            }
            Ok(Value::Object(sorted))
        }
        Value::Array(items) => {
            let mut sorted = Vec::with_capacity(items.len());
            for item in items {
                sorted.push(sort_value(item)?);
            }
            Ok(Value::Array(sorted))
        }
        Value::Number(n) => {
            if n.is_f64() {
                let f = n.as_f64().unwrap_or(f64::NAN);
                if !f.is_finite() {
                    return Err(HashError::NonFiniteNumber);
                }
            }
            Ok(value.clone())
        }
        other => Ok(other.clone()),
    }
}

/// Lowercase hex SHA-256 digest of raw bytes.
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_ref());
    hex::encode(hasher.finalize())
}

/// `sha256(canonical(payload))`, the building block for every
/// record-level integrity hash in the ledger (`violation_hash`,
/// `audit_hash`, `decision_hash` inputs, evidence node hashes, ...).
pub fn canonical_hash(payload: &Value) -> Result<String, HashError> {
    let bytes = canonical(payload)?;
    Ok(sha256_hex(bytes))
}

/// Computes a chain-link hash `sha256(prev_hash || field_1 || ... || field_n)`.
///
/// Field order is part of the chain's identity: callers must pass fields in
/// the fixed order documented for that chain type, every time, forever.
pub fn chain_hash(prev_hash: &str, fields: &[&str]) -> String {
    let mut buf = String::with_capacity(prev_hash.len() + fields.iter().map(|f| f.len()).sum::<usize>());
    buf.push_str(prev_hash);
    for field in fields {
        buf.push_str(field);
    }
    sha256_hex(buf.as_bytes())
}

/// Formats a UTC timestamp as the canonical ISO-8601 form used everywhere in
/// this system: microsecond precision, trailing `Z`, no offset notation.
pub fn format_timestamp(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}
