//! Internal payments API for the chat dispatcher.
//!
//! - POST /api/v1/payments - Initiate a payment, returns the checkout link
//! - GET /api/v1/payments/:id - Payment status plus the owner's access flag

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppState, error::AppError, models::payment::PaymentStatus, models::user::NewUser};

/// Request body for payment initiation.
///
/// The amount is decided by the caller; the gateway later has to present
/// exactly this value or the callback is rejected.
#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub telegram_id: i64,
    /// Minor currency units, must be positive
    pub amount: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// Response for a freshly initiated payment.
#[derive(Debug, Serialize)]
pub struct PaymentCreatedResponse {
    pub payment_id: Uuid,
    pub order_ref: String,
    pub amount: i64,
    pub status: PaymentStatus,
    /// Hosted checkout link to hand to the buyer
    pub checkout_url: String,
}

/// Response for a payment status query.
#[derive(Debug, Serialize)]
pub struct PaymentStatusResponse {
    pub payment_id: Uuid,
    pub order_ref: String,
    pub amount: i64,
    pub status: PaymentStatus,
    pub gateway_tx_id: Option<String>,
    /// Whether the owning user currently has access
    pub has_paid: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Initiate a payment.
///
/// # Endpoint
///
/// `POST /api/v1/payments`
///
/// # Authentication
///
/// Requires the configured API key in the Authorization header.
///
/// # Request Body
///
/// ```json
/// {
///   "telegram_id": 880921832,
///   "amount": 1500000,
///   "username": "buyer"
/// }
/// ```
///
/// # Response
///
/// - **Success (201 Created)**: Returns the payment and checkout link
/// - **Error (400)**: Amount is zero or negative
/// - **Error (401)**: Invalid API key
///
/// ```json
/// {
///   "payment_id": "550e8400-e29b-41d4-a716-446655440000",
///   "order_ref": "k3J9mQ1xPbT7wLc0aZu4",
///   "amount": 1500000,
///   "status": "pending",
///   "checkout_url": "https://checkout.example/pay?service_id=12345&transaction_param=k3J9mQ1xPbT7wLc0aZu4&amount=1500000"
/// }
/// ```
pub async fn create_payment(
    State(state): State<AppState>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let initiated = state
        .payments
        .initiate(
            NewUser {
                telegram_id: request.telegram_id,
                username: request.username,
                first_name: request.first_name,
                last_name: request.last_name,
            },
            request.amount,
        )
        .await?;

    let body = PaymentCreatedResponse {
        payment_id: initiated.payment.id,
        order_ref: initiated.payment.order_ref,
        amount: initiated.payment.amount,
        status: initiated.payment.status,
        checkout_url: initiated.checkout_url,
    };
    Ok((StatusCode::CREATED, Json(body)))
}

/// Get a payment's status.
///
/// # Endpoint
///
/// `GET /api/v1/payments/:id`
///
/// Backs the dispatcher's "check payment" button: it polls here after
/// handing out the checkout link.
///
/// # Response
///
/// - **Success (200 OK)**: Payment fields plus the owner's `has_paid` flag
/// - **Error (404)**: No payment with this id
/// - **Error (401)**: Invalid API key
pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentStatusResponse>, AppError> {
    let view = state.payments.status(id).await?;

    Ok(Json(PaymentStatusResponse {
        payment_id: view.payment.id,
        order_ref: view.payment.order_ref,
        amount: view.payment.amount,
        status: view.payment.status,
        gateway_tx_id: view.payment.gateway_tx_id,
        has_paid: view.has_paid,
        created_at: view.payment.created_at,
        updated_at: view.payment.updated_at,
    }))
}
