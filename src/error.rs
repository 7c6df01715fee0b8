//! Error types and HTTP error response handling for the internal API.
//!
//! `AppError` covers the bot-facing endpoints only. The gateway callback
//! endpoint never produces one; it always answers with the gateway's own
//! numeric code taxonomy (see `models::callback`).

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::store::StoreError;

/// Application-wide error type for the internal API.
///
/// Each variant maps to a specific HTTP status code and error message.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A store operation failed.
    ///
    /// Wraps `StoreError` via `#[from]`, so handlers and services can use
    /// `?` on store calls directly.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// API key is missing or does not match the configured key.
    ///
    /// Returns HTTP 401 Unauthorized.
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Requested payment does not exist.
    ///
    /// Returns HTTP 404 Not Found.
    #[error("Payment not found")]
    PaymentNotFound,

    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400 Bad Request. The String carries the detail.
    #[error("Invalid request")]
    InvalidRequest(String),
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// All errors return JSON in this format:
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// # Status Code Mapping
///
/// - `InvalidApiKey` → 401 Unauthorized
/// - `PaymentNotFound` → 404 Not Found
/// - `InvalidRequest` → 400 Bad Request
/// - `Store` → 500 Internal Server Error (details logged, never exposed)
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::InvalidApiKey => (
                StatusCode::UNAUTHORIZED,
                "invalid_api_key",
                self.to_string(),
            ),
            AppError::PaymentNotFound => {
                (StatusCode::NOT_FOUND, "payment_not_found", self.to_string())
            }
            AppError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::Store(ref err) => {
                tracing::error!(error = %err, "store failure surfaced to the internal API");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
