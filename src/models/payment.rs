//! Payment data model and status lifecycle.
//!
//! This module defines:
//! - `Payment`: Database entity for one expected charge
//! - `PaymentStatus`: The four lifecycle states and the legal transitions
//! - `NewPayment`: Insert data for payment creation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// Lifecycle state of a payment.
///
/// Stored as lowercase text in the `status` column. The lifecycle is
/// deliberately small:
///
/// ```text
/// pending ──> paid
///    ├──────> failed
///    └──────> cancelled
/// ```
///
/// `paid`, `failed` and `cancelled` are terminal. A record that reached a
/// terminal state never changes status again; duplicate gateway callbacks
/// are answered from the stored record instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Created, waiting for the gateway to call back
    Pending,
    /// Money captured, access granted (or being granted)
    Paid,
    /// Gateway reported the charge as declined
    Failed,
    /// Payer abandoned or cancelled the charge
    Cancelled,
}

impl PaymentStatus {
    /// Lowercase text form, matching the database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    /// True for every state except `Pending`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// The full transition table. Everything not listed here is illegal.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Paid)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
                | (PaymentStatus::Pending, PaymentStatus::Cancelled)
        )
    }
}

/// Represents a payment record from the database.
///
/// # Database Table
///
/// Maps to the `payments` table. Each payment:
/// - Belongs to one user (via `user_id`)
/// - Carries the expected amount in minor currency units (never floats)
/// - Is found by the gateway through `order_ref`, and once prepared also
///   through the `(order_ref, gateway_tx_id)` pair
///
/// # Immutable Fields
///
/// `id`, `order_ref`, `user_id` and `amount` never change after insert.
/// `gateway_tx_id` is written exactly once, by the first accepted prepare
/// callback. Only `status`, `merchant_ref_id`, `metadata` and `updated_at`
/// move after that.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Payment {
    /// Unique identifier for this payment
    ///
    /// Also echoed back to the gateway as `merchant_prepare_id` /
    /// `merchant_confirm_id` in callback responses.
    pub id: Uuid,

    /// Externally visible order reference
    ///
    /// Generated at initiation and embedded in the checkout link. The
    /// gateway carries it back as `merchant_trans_id` on every callback.
    pub order_ref: String,

    /// User who initiated this payment
    pub user_id: Uuid,

    /// Expected amount in minor currency units
    ///
    /// Every callback must present exactly this amount or it is rejected.
    pub amount: i64,

    /// Current lifecycle state
    pub status: PaymentStatus,

    /// Gateway-issued transaction id
    ///
    /// `None` until a prepare callback is accepted. Once set, a callback
    /// carrying a different id for the same order is a distinct gateway
    /// transaction and is rejected rather than merged.
    pub gateway_tx_id: Option<String>,

    /// The `merchant_prepare_id` the gateway echoed in its complete callback
    pub merchant_ref_id: Option<String>,

    /// Append-only audit trail of accepted callbacks (JSON array)
    ///
    /// Grows only on mutating transitions. Replayed callbacks leave it
    /// untouched.
    pub metadata: serde_json::Value,

    /// When the payment was created
    pub created_at: DateTime<Utc>,

    /// Bumped by every mutating write
    pub updated_at: DateTime<Utc>,
}

/// Insert data for a new payment. Status starts as `pending` and the
/// audit trail starts empty.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub order_ref: String,
    pub user_id: Uuid,
    pub amount: i64,
}

/// Build one audit entry for the payment's `metadata` trail.
///
/// Returned as a single-element JSON array so that appending with the
/// JSONB `||` operator (or the in-memory equivalent) extends the trail.
pub fn audit_entry(event: &str, gateway_tx_id: &str, detail: &str) -> serde_json::Value {
    json!([{
        "event": event,
        "gateway_tx_id": gateway_tx_id,
        "detail": detail,
        "received_at": Utc::now(),
    }])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_reaches_every_terminal_state() {
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Paid));
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Failed));
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Cancelled));
    }

    #[test]
    fn terminal_states_allow_no_transitions() {
        let all = [
            PaymentStatus::Pending,
            PaymentStatus::Paid,
            PaymentStatus::Failed,
            PaymentStatus::Cancelled,
        ];
        for from in [
            PaymentStatus::Paid,
            PaymentStatus::Failed,
            PaymentStatus::Cancelled,
        ] {
            for to in all {
                assert!(!from.can_transition_to(to), "{from:?} -> {to:?} must be illegal");
            }
        }
    }

    #[test]
    fn pending_cannot_loop_to_itself() {
        assert!(!PaymentStatus::Pending.can_transition_to(PaymentStatus::Pending));
    }

    #[test]
    fn terminal_flag_matches_table() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Paid.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(PaymentStatus::Cancelled.is_terminal());
    }

    #[test]
    fn audit_entries_are_single_element_arrays() {
        let entry = audit_entry("prepare", "gtx-1", "gateway id bound");
        let array = entry.as_array().expect("audit entry must be an array");
        assert_eq!(array.len(), 1);
        assert_eq!(array[0]["event"], "prepare");
        assert_eq!(array[0]["gateway_tx_id"], "gtx-1");
    }
}
