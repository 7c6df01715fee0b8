//! Pure transition decisions for the two-phase callback flow.
//!
//! These functions look at a payment snapshot and one callback's parameters
//! and decide what, if anything, may change. They perform no I/O; the
//! callback engine owns locking and persistence. Keeping the rules pure is
//! what makes every legal and illegal transition cheap to enumerate in
//! tests.
//!
//! # Outcome Identity
//!
//! A recorded outcome is identified by `(order_ref, gateway_tx_id,
//! resulting status)`. A callback that matches all three is a replay and is
//! re-acknowledged without side effects. A callback that matches the order
//! but contradicts the bound id or the recorded status is rejected; arrival
//! order never reopens a settled payment.

use crate::models::callback::CompleteOutcome;
use crate::models::payment::{Payment, PaymentStatus};

/// Decision for a prepare callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareDecision {
    /// First accepted prepare: bind the gateway transaction id.
    Bind,
    /// This exact prepare was accepted before: acknowledge again, write
    /// nothing.
    Replay,
}

/// Decision for a complete callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteDecision {
    /// Settle the pending payment into this terminal status.
    Finalize(PaymentStatus),
    /// This exact outcome is already recorded: acknowledge again, write
    /// nothing, grant nothing.
    Replay,
}

/// Refused transitions. Each variant maps onto one gateway result code.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransitionError {
    /// The order is bound to a different gateway transaction.
    #[error("order is bound to gateway transaction {bound}")]
    GatewayIdMismatch { bound: String },

    /// Complete arrived for an order that was never prepared.
    #[error("no prepare on record")]
    NoPrepare,

    /// Prepare arrived for an already settled order.
    #[error("already finalized as {}", .status.as_str())]
    AlreadyFinalized { status: PaymentStatus },

    /// Complete arrived whose outcome contradicts the settled one.
    #[error("already finalized as {} with a different outcome", .current.as_str())]
    ConflictingOutcome { current: PaymentStatus },
}

/// Decide a prepare (action=0) callback against the current record.
///
/// | record state                         | decision              |
/// |--------------------------------------|-----------------------|
/// | pending, no gateway id               | `Bind`                |
/// | pending, same gateway id             | `Replay`              |
/// | pending, different gateway id        | `GatewayIdMismatch`   |
/// | any terminal status                  | `AlreadyFinalized`    |
///
/// Terminal wins over the id comparison: once settled, even the original
/// gateway transaction cannot re-prepare the order.
pub fn decide_prepare(
    payment: &Payment,
    gateway_tx_id: &str,
) -> Result<PrepareDecision, TransitionError> {
    if payment.status.is_terminal() {
        return Err(TransitionError::AlreadyFinalized {
            status: payment.status,
        });
    }
    match payment.gateway_tx_id.as_deref() {
        None => Ok(PrepareDecision::Bind),
        Some(bound) if bound == gateway_tx_id => Ok(PrepareDecision::Replay),
        Some(bound) => Err(TransitionError::GatewayIdMismatch {
            bound: bound.to_string(),
        }),
    }
}

/// Decide a complete (action=1) callback against the current record.
///
/// The gateway id must correlate first: an unbound record means the prepare
/// never happened (`NoPrepare`), a different bound id means this callback
/// belongs to another gateway transaction (`GatewayIdMismatch`). Only then
/// is the status consulted:
///
/// | record status          | callback outcome      | decision              |
/// |------------------------|-----------------------|-----------------------|
/// | pending                | any                   | `Finalize(target)`    |
/// | terminal == target     | same as recorded      | `Replay`              |
/// | terminal != target     | contradicts recorded  | `ConflictingOutcome`  |
pub fn decide_complete(
    payment: &Payment,
    gateway_tx_id: &str,
    outcome: CompleteOutcome,
) -> Result<CompleteDecision, TransitionError> {
    let bound = match payment.gateway_tx_id.as_deref() {
        None => return Err(TransitionError::NoPrepare),
        Some(bound) => bound,
    };
    if bound != gateway_tx_id {
        return Err(TransitionError::GatewayIdMismatch {
            bound: bound.to_string(),
        });
    }

    let target = outcome.target_status();
    match payment.status {
        current if current.can_transition_to(target) => Ok(CompleteDecision::Finalize(target)),
        current if current == target => Ok(CompleteDecision::Replay),
        current => Err(TransitionError::ConflictingOutcome { current }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Value;
    use uuid::Uuid;

    fn payment(status: PaymentStatus, gateway_tx_id: Option<&str>) -> Payment {
        let now = Utc::now();
        Payment {
            id: Uuid::new_v4(),
            order_ref: "ref-1".to_string(),
            user_id: Uuid::new_v4(),
            amount: 1_500_000,
            status,
            gateway_tx_id: gateway_tx_id.map(str::to_string),
            merchant_ref_id: None,
            metadata: Value::Array(Vec::new()),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn first_prepare_binds() {
        let p = payment(PaymentStatus::Pending, None);
        assert_eq!(decide_prepare(&p, "gtx-1"), Ok(PrepareDecision::Bind));
    }

    #[test]
    fn repeated_prepare_replays() {
        let p = payment(PaymentStatus::Pending, Some("gtx-1"));
        assert_eq!(decide_prepare(&p, "gtx-1"), Ok(PrepareDecision::Replay));
    }

    #[test]
    fn prepare_with_foreign_gateway_id_is_refused() {
        let p = payment(PaymentStatus::Pending, Some("gtx-1"));
        assert_eq!(
            decide_prepare(&p, "gtx-2"),
            Err(TransitionError::GatewayIdMismatch {
                bound: "gtx-1".to_string()
            })
        );
    }

    #[test]
    fn prepare_on_settled_orders_is_refused_regardless_of_id() {
        for status in [
            PaymentStatus::Paid,
            PaymentStatus::Failed,
            PaymentStatus::Cancelled,
        ] {
            let p = payment(status, Some("gtx-1"));
            assert_eq!(
                decide_prepare(&p, "gtx-1"),
                Err(TransitionError::AlreadyFinalized { status })
            );
            assert_eq!(
                decide_prepare(&p, "gtx-2"),
                Err(TransitionError::AlreadyFinalized { status })
            );
        }
    }

    #[test]
    fn complete_without_prepare_is_refused() {
        let p = payment(PaymentStatus::Pending, None);
        assert_eq!(
            decide_complete(&p, "gtx-1", CompleteOutcome::Captured),
            Err(TransitionError::NoPrepare)
        );
    }

    #[test]
    fn complete_with_foreign_gateway_id_is_refused() {
        let p = payment(PaymentStatus::Pending, Some("gtx-1"));
        assert_eq!(
            decide_complete(&p, "gtx-2", CompleteOutcome::Captured),
            Err(TransitionError::GatewayIdMismatch {
                bound: "gtx-1".to_string()
            })
        );
    }

    #[test]
    fn pending_finalizes_into_the_outcome_target() {
        let p = payment(PaymentStatus::Pending, Some("gtx-1"));
        assert_eq!(
            decide_complete(&p, "gtx-1", CompleteOutcome::Captured),
            Ok(CompleteDecision::Finalize(PaymentStatus::Paid))
        );
        assert_eq!(
            decide_complete(&p, "gtx-1", CompleteOutcome::Cancelled),
            Ok(CompleteDecision::Finalize(PaymentStatus::Cancelled))
        );
        assert_eq!(
            decide_complete(&p, "gtx-1", CompleteOutcome::Declined),
            Ok(CompleteDecision::Finalize(PaymentStatus::Failed))
        );
    }

    #[test]
    fn matching_terminal_outcome_replays() {
        let cases = [
            (PaymentStatus::Paid, CompleteOutcome::Captured),
            (PaymentStatus::Cancelled, CompleteOutcome::Cancelled),
            (PaymentStatus::Failed, CompleteOutcome::Declined),
        ];
        for (status, outcome) in cases {
            let p = payment(status, Some("gtx-1"));
            assert_eq!(
                decide_complete(&p, "gtx-1", outcome),
                Ok(CompleteDecision::Replay),
                "{status:?} + {outcome:?} must replay"
            );
        }
    }

    #[test]
    fn contradicting_terminal_outcome_is_refused() {
        let cases = [
            (PaymentStatus::Paid, CompleteOutcome::Cancelled),
            (PaymentStatus::Paid, CompleteOutcome::Declined),
            (PaymentStatus::Cancelled, CompleteOutcome::Captured),
            (PaymentStatus::Cancelled, CompleteOutcome::Declined),
            (PaymentStatus::Failed, CompleteOutcome::Captured),
            (PaymentStatus::Failed, CompleteOutcome::Cancelled),
        ];
        for (status, outcome) in cases {
            let p = payment(status, Some("gtx-1"));
            assert_eq!(
                decide_complete(&p, "gtx-1", outcome),
                Err(TransitionError::ConflictingOutcome { current: status }),
                "{status:?} + {outcome:?} must conflict"
            );
        }
    }
}
