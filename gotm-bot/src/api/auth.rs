//! Signed-request middleware for the vote route
//!
//! The JSON body carries `timestamp` and `hash`; see
//! [`gotm_common::api::auth`] for the hash construction. Rejections are
//! reported through [`ApiError`] like every other API failure.

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use gotm_common::api::auth::{validate_hash, validate_timestamp, ApiAuthError};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Largest request body read for hashing
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct Signature {
    timestamp: i64,
    hash: String,
}

/// Let the request through only if its body is fresh and signed with the
/// shared secret. A secret of 0 disables checking.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> ApiResult<Response> {
    if state.shared_secret == 0 {
        return Ok(next.run(request).await);
    }

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::MalformedBody(format!("could not read body: {}", e)))?;

    if let Err(e) = verify_signature(&bytes, state.shared_secret) {
        warn!(path = %parts.uri.path(), "Rejected unsigned or stale request: {}", e);
        return Err(e);
    }

    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}

/// Freshness first, then the hash
fn verify_signature(bytes: &Bytes, shared_secret: i64) -> ApiResult<()> {
    let body: Value = serde_json::from_slice(bytes)
        .map_err(|e| ApiError::MalformedBody(format!("invalid JSON: {}", e)))?;
    let signature = Signature::deserialize(&body).map_err(|e| ApiError::Unsigned(e.to_string()))?;

    validate_timestamp(signature.timestamp)?;
    validate_hash(&signature.hash, &body, shared_secret).map_err(|e| {
        if let ApiAuthError::InvalidHash { provided, calculated } = &e {
            warn!(provided = %provided, calculated = %calculated, "Hash mismatch");
        }
        ApiError::from(e)
    })
}
