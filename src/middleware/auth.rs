//! API key authentication middleware for the internal API.
//!
//! The internal API has exactly one caller, the chat dispatcher, so the
//! key is a single configured value. Requests present it as a bearer
//! token; it is hashed and compared against the digest kept in app state,
//! so the plain key never sits in state or in log output.

use crate::{AppState, error::AppError};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};

/// Hex SHA-256 digest of a key, as stored in `AppState` and compared here.
pub fn digest(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// API key authentication middleware function.
///
/// # Flow
///
/// 1. Extract `Authorization: Bearer <key>` header from request
/// 2. Hash the `<key>` using SHA-256
/// 3. Compare against the configured key's digest
/// 4. If equal: call next handler
/// 5. If not: return 401 Unauthorized error
///
/// # Headers
///
/// Expected header format:
/// ```text
/// Authorization: Bearer abc123xyz
/// ```
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    // Step 1: Extract Authorization header
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::InvalidApiKey)?;

    // Step 2: Extract Bearer token
    // Expected format: "Bearer <api_key>"
    let api_key = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AppError::InvalidApiKey)?;

    // Step 3: Hash the presented key
    let key_hash = digest(api_key);

    // Step 4: Compare digests
    if key_hash != state.api_key_hash {
        return Err(AppError::InvalidApiKey);
    }

    // Step 5: Call the next middleware/handler
    Ok(next.run(request).await)
}
