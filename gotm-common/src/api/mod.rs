//! Shared HTTP API helpers
//!
//! Pure functions only, no HTTP framework dependencies. The bot crate wraps
//! these in axum middleware.

pub mod auth;

pub use auth::{calculate_hash, to_canonical_json, validate_hash, validate_timestamp, ApiAuthError};
