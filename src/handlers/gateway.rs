//! Gateway callback endpoint.
//!
//! One route takes both callback phases; the `action` field in the body
//! decides which. The handler's only job is to get from an untrusted JSON
//! body to a typed callback, or to the right numeric rejection when it
//! cannot. Everything stateful happens in `GatewayService`.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};

use crate::AppState;
use crate::models::callback::{
    ACTION_COMPLETE, ACTION_PREPARE, CallbackRequest, CompleteCallback, GatewayResponse,
    MissingParameter, PrepareCallback, codes,
};

fn missing(err: MissingParameter) -> GatewayResponse {
    tracing::warn!(reason = %err, "callback missing a required parameter");
    GatewayResponse::error(codes::ACTION_NOT_FOUND, err.to_string())
}

/// Handle a gateway callback.
///
/// # Endpoint
///
/// `POST /webhook/gateway` (also mounted at `/api/gateway`)
///
/// # Response
///
/// Always a `GatewayResponse` body. Unreadable bodies, unknown actions and
/// missing parameters answer `-3`; the engine supplies every other code.
/// This endpoint is deliberately outside the bearer-auth surface: the
/// gateway authenticates per request through `sign_string`.
pub async fn gateway_callback(
    State(state): State<AppState>,
    body: Result<Json<CallbackRequest>, JsonRejection>,
) -> GatewayResponse {
    let Json(raw) = match body {
        Ok(json) => json,
        Err(rejection) => {
            tracing::warn!(reason = %rejection, "unreadable callback body");
            return GatewayResponse::error(codes::ACTION_NOT_FOUND, "Unreadable request body");
        }
    };

    match raw.action {
        Some(ACTION_PREPARE) => match PrepareCallback::try_from(raw) {
            Ok(cb) => state.gateway.handle_prepare(cb).await,
            Err(err) => missing(err),
        },
        Some(ACTION_COMPLETE) => match CompleteCallback::try_from(raw) {
            Ok(cb) => state.gateway.handle_complete(cb).await,
            Err(err) => missing(err),
        },
        Some(other) => {
            tracing::warn!(action = other, "unknown callback action");
            GatewayResponse::error(codes::ACTION_NOT_FOUND, "Unknown action")
        }
        None => GatewayResponse::error(codes::ACTION_NOT_FOUND, "Unknown action"),
    }
}
