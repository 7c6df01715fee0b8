//! Gateway callback wire types.
//!
//! This module defines:
//! - `CallbackRequest`: Raw callback body with every field optional
//! - `PrepareCallback` / `CompleteCallback`: Fully validated shapes
//! - `GatewayResponse` and the numeric result codes the gateway understands
//!
//! The gateway is an untrusted caller. Bodies are first deserialized into
//! `CallbackRequest`, then converted into the typed shape for their action.
//! Nothing past this module handles a callback with missing fields.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::payment::PaymentStatus;

/// `action` value for the reservation phase.
pub const ACTION_PREPARE: i32 = 0;
/// `action` value for the settlement phase.
pub const ACTION_COMPLETE: i32 = 1;

/// Numeric result codes for callback responses.
///
/// The gateway retries or reconciles based on these, so the values are part
/// of the external contract and must not be renumbered.
pub mod codes {
    /// Callback accepted (including idempotent replays).
    pub const SUCCESS: i32 = 0;
    /// Signature or service id did not verify.
    pub const SIGN_CHECK_FAILED: i32 = -1;
    /// Presented amount differs from the recorded amount.
    pub const INCORRECT_AMOUNT: i32 = -2;
    /// Unknown action, unreadable body, or a missing required parameter.
    pub const ACTION_NOT_FOUND: i32 = -3;
    /// The order is already settled as paid.
    pub const ALREADY_PAID: i32 = -4;
    /// No payment with this order reference exists.
    pub const TRANSACTION_NOT_FOUND: i32 = -5;
    /// The gateway transaction id does not correlate with the order:
    /// no prepare on record, or the order is bound to a different id.
    pub const UNKNOWN_GATEWAY_TRANSACTION: i32 = -6;
    /// Storage or serialization trouble on our side; safe to retry.
    pub const INTERNAL_ERROR: i32 = -8;
    /// The order is already settled as cancelled or failed.
    pub const TRANSACTION_CANCELLED: i32 = -9;
}

/// Raw callback body as received from the gateway.
///
/// Every field is optional so that a malformed callback still deserializes
/// and can be answered with a precise rejection instead of a generic 400.
/// Unknown extra fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackRequest {
    /// 0 = prepare, 1 = complete
    pub action: Option<i32>,
    pub service_id: Option<i64>,
    pub gateway_trans_id: Option<String>,
    /// Our `order_ref`
    pub merchant_trans_id: Option<String>,
    /// Echo of the prepare response, present on complete callbacks
    pub merchant_prepare_id: Option<String>,
    pub amount: Option<i64>,
    /// Gateway-side outcome, present on complete callbacks
    pub error: Option<i32>,
    pub sign_time: Option<String>,
    pub sign_string: Option<String>,
}

/// A required callback parameter was absent.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("missing required parameter: {0}")]
pub struct MissingParameter(pub &'static str);

fn require<T>(field: Option<T>, name: &'static str) -> Result<T, MissingParameter> {
    field.ok_or(MissingParameter(name))
}

/// A validated prepare (action=0) callback.
///
/// # JSON Example
///
/// ```json
/// {
///   "action": 0,
///   "service_id": 12345,
///   "gateway_trans_id": "2207183021",
///   "merchant_trans_id": "k3J9mQ1xPbT7wLc0aZu4",
///   "amount": 1500000,
///   "sign_time": "2026-08-26 12:00:00",
///   "sign_string": "9f2b..."
/// }
/// ```
#[derive(Debug, Clone)]
pub struct PrepareCallback {
    pub gateway_trans_id: String,
    pub service_id: i64,
    pub merchant_trans_id: String,
    pub amount: i64,
    pub sign_time: String,
    pub sign_string: String,
}

impl TryFrom<CallbackRequest> for PrepareCallback {
    type Error = MissingParameter;

    fn try_from(raw: CallbackRequest) -> Result<Self, Self::Error> {
        Ok(Self {
            gateway_trans_id: require(raw.gateway_trans_id, "gateway_trans_id")?,
            service_id: require(raw.service_id, "service_id")?,
            merchant_trans_id: require(raw.merchant_trans_id, "merchant_trans_id")?,
            amount: require(raw.amount, "amount")?,
            sign_time: require(raw.sign_time, "sign_time")?,
            sign_string: require(raw.sign_string, "sign_string")?,
        })
    }
}

/// A validated complete (action=1) callback.
///
/// Adds the prepare echo and the gateway-side outcome on top of the
/// prepare fields.
#[derive(Debug, Clone)]
pub struct CompleteCallback {
    pub gateway_trans_id: String,
    pub service_id: i64,
    pub merchant_trans_id: String,
    /// What we answered as `merchant_prepare_id` during prepare
    pub merchant_prepare_id: String,
    pub amount: i64,
    /// 0 = captured, -9 = cancelled by the payer, anything else = declined
    pub error: i32,
    pub sign_time: String,
    pub sign_string: String,
}

impl TryFrom<CallbackRequest> for CompleteCallback {
    type Error = MissingParameter;

    fn try_from(raw: CallbackRequest) -> Result<Self, Self::Error> {
        Ok(Self {
            gateway_trans_id: require(raw.gateway_trans_id, "gateway_trans_id")?,
            service_id: require(raw.service_id, "service_id")?,
            merchant_trans_id: require(raw.merchant_trans_id, "merchant_trans_id")?,
            merchant_prepare_id: require(raw.merchant_prepare_id, "merchant_prepare_id")?,
            amount: require(raw.amount, "amount")?,
            error: require(raw.error, "error")?,
            sign_time: require(raw.sign_time, "sign_time")?,
            sign_string: require(raw.sign_string, "sign_string")?,
        })
    }
}

/// Gateway-side outcome carried by a complete callback's `error` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteOutcome {
    /// The charge went through.
    Captured,
    /// The payer backed out before paying.
    Cancelled,
    /// The gateway declined the charge.
    Declined,
}

impl CompleteOutcome {
    pub fn from_code(error: i32) -> Self {
        match error {
            0 => CompleteOutcome::Captured,
            -9 => CompleteOutcome::Cancelled,
            _ => CompleteOutcome::Declined,
        }
    }

    /// The terminal status this outcome settles the payment into.
    pub fn target_status(self) -> PaymentStatus {
        match self {
            CompleteOutcome::Captured => PaymentStatus::Paid,
            CompleteOutcome::Cancelled => PaymentStatus::Cancelled,
            CompleteOutcome::Declined => PaymentStatus::Failed,
        }
    }
}

/// Response body for every callback, success or rejection.
///
/// # JSON Example (accepted prepare)
///
/// ```json
/// {
///   "error": 0,
///   "error_note": "Success",
///   "gateway_trans_id": "2207183021",
///   "merchant_trans_id": "k3J9mQ1xPbT7wLc0aZu4",
///   "merchant_prepare_id": "550e8400-e29b-41d4-a716-446655440000"
/// }
/// ```
///
/// Replayed callbacks produce a byte-identical body, which is what lets the
/// gateway treat retries as settled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayResponse {
    pub error: i32,
    pub error_note: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_trans_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_trans_id: Option<String>,

    /// Present on accepted prepares; the payment's internal id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_prepare_id: Option<String>,

    /// Present on accepted completes; the payment's internal id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_confirm_id: Option<String>,
}

impl GatewayResponse {
    /// A rejection with no echo fields.
    pub fn error(code: i32, note: impl Into<String>) -> Self {
        Self {
            error: code,
            error_note: note.into(),
            gateway_trans_id: None,
            merchant_trans_id: None,
            merchant_prepare_id: None,
            merchant_confirm_id: None,
        }
    }

    /// Success body for an accepted (or replayed) prepare.
    pub fn prepare_ok(cb: &PrepareCallback, payment_id: Uuid) -> Self {
        Self {
            error: codes::SUCCESS,
            error_note: "Success".to_string(),
            gateway_trans_id: Some(cb.gateway_trans_id.clone()),
            merchant_trans_id: Some(cb.merchant_trans_id.clone()),
            merchant_prepare_id: Some(payment_id.to_string()),
            merchant_confirm_id: None,
        }
    }

    /// Success body for an accepted (or replayed) complete.
    pub fn complete_ok(cb: &CompleteCallback, payment_id: Uuid) -> Self {
        Self {
            error: codes::SUCCESS,
            error_note: "Success".to_string(),
            gateway_trans_id: Some(cb.gateway_trans_id.clone()),
            merchant_trans_id: Some(cb.merchant_trans_id.clone()),
            merchant_prepare_id: None,
            merchant_confirm_id: Some(payment_id.to_string()),
        }
    }

    /// HTTP status paired with this body.
    ///
    /// Business rejections ride on 200 so the gateway reads the numeric
    /// code; only protocol misuse (-3) and our own trouble (-8) use HTTP
    /// status classes.
    pub fn http_status(&self) -> StatusCode {
        match self.error {
            codes::ACTION_NOT_FOUND => StatusCode::BAD_REQUEST,
            codes::INTERNAL_ERROR => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::OK,
        }
    }
}

impl IntoResponse for GatewayResponse {
    fn into_response(self) -> Response {
        let status = self.http_status();
        (status, Json(self)).into_response()
    }
}
