//! Request authentication via timestamp and shared-secret hash
//!
//! Every authenticated request body carries `timestamp` (Unix epoch ms) and
//! `hash` (SHA-256, 64 hex chars). The hash covers the canonical JSON body
//! with `hash` replaced by 64 zeros, followed by the shared secret in decimal.
//! A shared secret of 0 disables checking entirely.

use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Oldest accepted request timestamp, relative to now
pub const MAX_PAST_SKEW_MS: i64 = 5_000;
/// Furthest-future accepted request timestamp (clock drift only)
pub const MAX_FUTURE_SKEW_MS: i64 = 1_000;

const DUMMY_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Error)]
pub enum ApiAuthError {
    #[error("Invalid timestamp: {reason}")]
    InvalidTimestamp { timestamp: i64, now: i64, reason: String },

    #[error("Invalid hash")]
    InvalidHash { provided: String, calculated: String },
}

/// Check `timestamp` against the current clock
pub fn validate_timestamp(timestamp: i64) -> Result<(), ApiAuthError> {
    validate_timestamp_at(timestamp, Utc::now().timestamp_millis())
}

fn validate_timestamp_at(timestamp: i64, now: i64) -> Result<(), ApiAuthError> {
    let age = now - timestamp;
    if age > MAX_PAST_SKEW_MS {
        return Err(ApiAuthError::InvalidTimestamp {
            timestamp,
            now,
            reason: format!("Timestamp {}ms too old (max {}ms)", age, MAX_PAST_SKEW_MS),
        });
    }
    if -age > MAX_FUTURE_SKEW_MS {
        return Err(ApiAuthError::InvalidTimestamp {
            timestamp,
            now,
            reason: format!(
                "Timestamp {}ms in future (max {}ms)",
                -age, MAX_FUTURE_SKEW_MS
            ),
        });
    }
    Ok(())
}

/// SHA-256 over the canonical body (hash field zeroed) plus the secret
///
/// ```
/// use gotm_common::api::auth::calculate_hash;
/// use serde_json::json;
///
/// let body = json!({"voter_id": "1", "timestamp": 1730000000000i64, "hash": ""});
/// assert_eq!(calculate_hash(&body, 42).len(), 64);
/// ```
pub fn calculate_hash(body: &Value, shared_secret: i64) -> String {
    let mut value = body.clone();
    if let Some(obj) = value.as_object_mut() {
        obj.insert("hash".to_string(), Value::String(DUMMY_HASH.to_string()));
    }

    let mut hasher = Sha256::new();
    hasher.update(to_canonical_json(&value).as_bytes());
    hasher.update(shared_secret.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// JSON with object keys sorted and no whitespace
pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let items: Vec<String> = pairs
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), to_canonical_json(v)))
                .collect();
            format!("{{{}}}", items.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        // serde_json's own rendering escapes strings correctly
        other => other.to_string(),
    }
}

pub fn validate_hash(provided: &str, body: &Value, shared_secret: i64) -> Result<(), ApiAuthError> {
    let calculated = calculate_hash(body, shared_secret);
    if provided.eq_ignore_ascii_case(&calculated) {
        Ok(())
    } else {
        Err(ApiAuthError::InvalidHash {
            provided: provided.to_string(),
            calculated,
        })
    }
}
