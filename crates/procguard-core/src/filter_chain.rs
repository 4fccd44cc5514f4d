//! Filter Audit Chain (§4.7): a hash-chained log of query/filter actions
//! against the audit surface. Tamper-evident by construction — any single
//! byte changed in any row breaks the chain from that point forward, and
//! the verifier says exactly where.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use procguard_hash::{canonical_string, format_timestamp, sha256_hex, HashError};

use crate::model::FilterAuditEvent;

pub const GENESIS_HASH: &str = "GENESIS";

/// `sha256(prev_hash || user_id || screen || canonical(filter_payload) || ts)`.
pub fn row_hash(
    prev_hash: &str,
    user_id: &str,
    screen: &str,
    filter_payload: &Value,
    created_at: DateTime<Utc>,
) -> Result<String, HashError> {
    let mut buf = String::from(prev_hash);
    buf.push_str(user_id);
    buf.push_str(screen);
    buf.push_str(&canonical_string(filter_payload)?);
    buf.push_str(&format_timestamp(created_at));
    Ok(sha256_hex(buf.as_bytes()))
}

/// Builds the next row to append, given the chain's current tail hash (or
/// [`GENESIS_HASH`] for the first row ever recorded).
pub fn build_event(
    prev_hash: &str,
    user_id: String,
    screen: String,
    filter_payload: Value,
    created_at: DateTime<Utc>,
) -> Result<FilterAuditEvent, HashError> {
    let hash = row_hash(prev_hash, &user_id, &screen, &filter_payload, created_at)?;
    Ok(FilterAuditEvent {
        id: Uuid::new_v4(),
        user_id,
        screen,
        filter_payload,
        created_at,
        prev_hash: prev_hash.to_string(),
        hash,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub valid: bool,
    pub first_bad_id: Option<Uuid>,
    pub recorded: Option<String>,
    pub expected: Option<String>,
    pub prev_used: Option<String>,
}

impl VerificationResult {
    fn valid() -> Self {
        Self {
            valid: true,
            first_bad_id: None,
            recorded: None,
            expected: None,
            prev_used: None,
        }
    }
}

/// Replays every row in creation order, recomputing each hash from scratch.
/// Stops at (and reports) the first mismatch; a greenfield (empty) chain
/// is trivially valid.
pub fn verify_chain(rows: &[FilterAuditEvent]) -> VerificationResult {
    let mut prev = GENESIS_HASH.to_string();
    for row in rows {
        let expected = match row_hash(&prev, &row.user_id, &row.screen, &row.filter_payload, row.created_at) {
            Ok(h) => h,
            Err(_) => {
                return VerificationResult {
                    valid: false,
                    first_bad_id: Some(row.id),
                    recorded: Some(row.hash.clone()),
                    expected: None,
                    prev_used: Some(prev),
                }
            }
        };
        if row.prev_hash != prev || row.hash != expected {
            return VerificationResult {
                valid: false,
                first_bad_id: Some(row.id),
                recorded: Some(row.hash.clone()),
                expected: Some(expected),
                prev_used: Some(prev),
            };
        }
        prev = row.hash.clone();
    }
    VerificationResult::valid()
}
