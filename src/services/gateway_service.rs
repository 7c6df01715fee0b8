//! Gateway callback protocol engine.
//!
//! Drives prepare and complete callbacks through signature validation, the
//! transition rules in `state_machine`, and the payment store. All work for
//! one order reference is serialized behind an advisory lock so duplicate
//! and out-of-order deliveries are observed one at a time; the store's
//! conditional writes remain the correctness backstop if more than one
//! process ever runs.
//!
//! The engine never returns `Result`: every path, including storage
//! failure, ends in a `GatewayResponse` the gateway can act on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;

use crate::models::callback::{
    CompleteCallback, CompleteOutcome, GatewayResponse, PrepareCallback, codes,
};
use crate::models::payment::{Payment, PaymentStatus, audit_entry};
use crate::services::access_service::AccessGrantNotifier;
use crate::services::signature::SignatureValidator;
use crate::services::state_machine::{self, CompleteDecision, PrepareDecision, TransitionError};
use crate::store::{AssignOutcome, CasOutcome, FinalizeFields, PaymentStore, StoreError};

/// Upper bound on waiting for another callback on the same order to finish.
/// Exceeding it answers -8 so the gateway retries instead of hanging.
const LOCK_WAIT: Duration = Duration::from_secs(5);

/// Per-order advisory locks, created on demand and removed once no
/// callback holds or waits on them.
#[derive(Default)]
struct OrderLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl OrderLocks {
    async fn acquire(&self, order_ref: &str) -> Option<OwnedMutexGuard<()>> {
        let entry = {
            let mut map = self.inner.lock().await;
            Arc::clone(map.entry(order_ref.to_string()).or_default())
        };
        timeout(LOCK_WAIT, entry.lock_owned()).await.ok()
    }

    async fn release(&self, order_ref: &str, guard: OwnedMutexGuard<()>) {
        let mut map = self.inner.lock().await;
        drop(guard);
        // a waiter still holds its own Arc; only an uncontended entry has
        // the map as its sole owner
        if map
            .get(order_ref)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            map.remove(order_ref);
        }
    }
}

/// Log a storage failure and answer -8.
fn internal(err: StoreError) -> GatewayResponse {
    tracing::error!(error = %err, "storage failure while handling callback");
    GatewayResponse::error(codes::INTERNAL_ERROR, "Internal server error")
}

/// Map a refused transition onto the gateway's numeric vocabulary. For
/// settled orders the note names the recorded outcome, whichever callback
/// tripped over it.
fn rejection(payment: &Payment, err: TransitionError) -> GatewayResponse {
    tracing::warn!(
        order_ref = %payment.order_ref,
        status = payment.status.as_str(),
        reason = %err,
        "callback rejected"
    );
    match err {
        TransitionError::NoPrepare => GatewayResponse::error(
            codes::UNKNOWN_GATEWAY_TRANSACTION,
            "No prepare on record for this order",
        ),
        TransitionError::GatewayIdMismatch { .. } => GatewayResponse::error(
            codes::UNKNOWN_GATEWAY_TRANSACTION,
            "Order is bound to another gateway transaction",
        ),
        TransitionError::AlreadyFinalized { status }
        | TransitionError::ConflictingOutcome { current: status } => match status {
            PaymentStatus::Paid => GatewayResponse::error(codes::ALREADY_PAID, "Already paid"),
            PaymentStatus::Failed => {
                GatewayResponse::error(codes::TRANSACTION_CANCELLED, "Transaction failed")
            }
            _ => GatewayResponse::error(codes::TRANSACTION_CANCELLED, "Transaction cancelled"),
        },
    }
}

/// Handles validated gateway callbacks end to end.
pub struct GatewayService {
    payments: Arc<dyn PaymentStore>,
    validator: SignatureValidator,
    notifier: Arc<AccessGrantNotifier>,
    locks: OrderLocks,
}

impl GatewayService {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        validator: SignatureValidator,
        notifier: Arc<AccessGrantNotifier>,
    ) -> Self {
        Self {
            payments,
            validator,
            notifier,
            locks: OrderLocks::default(),
        }
    }

    /// Handle a prepare (action=0) callback.
    ///
    /// # Process
    ///
    /// 1. Verify service id and signature (-1 on failure, no lock taken)
    /// 2. Serialize on the order lock (-8 if the wait times out)
    /// 3. Locate the payment by `merchant_trans_id` (-5 when unknown)
    /// 4. Compare amounts exactly (-2, nothing written)
    /// 5. Bind the gateway transaction id, or re-acknowledge a replay
    ///
    /// The bind is persisted before the response leaves: once the gateway
    /// has seen success, a crash cannot lose the reservation.
    pub async fn handle_prepare(&self, cb: PrepareCallback) -> GatewayResponse {
        if let Err(err) = self.validator.verify_prepare(&cb) {
            tracing::warn!(order_ref = %cb.merchant_trans_id, reason = %err, "prepare rejected");
            return GatewayResponse::error(codes::SIGN_CHECK_FAILED, "Signature check failed");
        }

        let guard = match self.locks.acquire(&cb.merchant_trans_id).await {
            Some(guard) => guard,
            None => {
                tracing::error!(order_ref = %cb.merchant_trans_id, "gave up waiting for the order lock");
                return GatewayResponse::error(codes::INTERNAL_ERROR, "Internal server error");
            }
        };
        let response = self.prepare_locked(&cb).await;
        self.locks.release(&cb.merchant_trans_id, guard).await;
        response
    }

    async fn prepare_locked(&self, cb: &PrepareCallback) -> GatewayResponse {
        let payment = match self.payments.find_by_order_ref(&cb.merchant_trans_id).await {
            Ok(Some(payment)) => payment,
            Ok(None) => {
                tracing::warn!(order_ref = %cb.merchant_trans_id, "prepare for unknown order");
                return GatewayResponse::error(
                    codes::TRANSACTION_NOT_FOUND,
                    "Transaction not found",
                );
            }
            Err(err) => return internal(err),
        };

        if payment.amount != cb.amount {
            tracing::warn!(
                order_ref = %payment.order_ref,
                expected = payment.amount,
                presented = cb.amount,
                "prepare rejected: amount mismatch"
            );
            return GatewayResponse::error(codes::INCORRECT_AMOUNT, "Incorrect amount");
        }

        match state_machine::decide_prepare(&payment, &cb.gateway_trans_id) {
            Ok(PrepareDecision::Bind) => {
                let audit = audit_entry("prepare", &cb.gateway_trans_id, "gateway id bound");
                match self
                    .payments
                    .assign_gateway_id(payment.id, &cb.gateway_trans_id, audit)
                    .await
                {
                    Ok(AssignOutcome::Assigned(updated)) => {
                        tracing::info!(
                            order_ref = %updated.order_ref,
                            gateway_tx_id = %cb.gateway_trans_id,
                            "prepare accepted"
                        );
                        GatewayResponse::prepare_ok(cb, updated.id)
                    }
                    // lost a cross-process race on the bind
                    Ok(AssignOutcome::AlreadyAssigned { existing }) => {
                        if existing.gateway_tx_id.as_deref() == Some(cb.gateway_trans_id.as_str()) {
                            GatewayResponse::prepare_ok(cb, existing.id)
                        } else {
                            GatewayResponse::error(
                                codes::UNKNOWN_GATEWAY_TRANSACTION,
                                "Order is bound to another gateway transaction",
                            )
                        }
                    }
                    Err(err) => internal(err),
                }
            }
            Ok(PrepareDecision::Replay) => {
                tracing::info!(order_ref = %payment.order_ref, "prepare replayed");
                GatewayResponse::prepare_ok(cb, payment.id)
            }
            Err(err) => rejection(&payment, err),
        }
    }

    /// Handle a complete (action=1) callback.
    ///
    /// # Process
    ///
    /// 1. Verify service id and signature (-1 on failure, no lock taken)
    /// 2. Serialize on the order lock (-8 if the wait times out)
    /// 3. Locate the payment by the `(order_ref, gateway_tx_id)` pair; on a
    ///    miss, the order-only lookup distinguishes -5 from -6
    /// 4. Compare amounts exactly (-2, nothing written)
    /// 5. Settle via compare-and-set, or re-acknowledge a replay
    ///
    /// A settlement to `paid` triggers the access grant before the response
    /// is produced, but a grant failure never changes the response and
    /// never rolls the settlement back.
    pub async fn handle_complete(&self, cb: CompleteCallback) -> GatewayResponse {
        if let Err(err) = self.validator.verify_complete(&cb) {
            tracing::warn!(order_ref = %cb.merchant_trans_id, reason = %err, "complete rejected");
            return GatewayResponse::error(codes::SIGN_CHECK_FAILED, "Signature check failed");
        }

        let guard = match self.locks.acquire(&cb.merchant_trans_id).await {
            Some(guard) => guard,
            None => {
                tracing::error!(order_ref = %cb.merchant_trans_id, "gave up waiting for the order lock");
                return GatewayResponse::error(codes::INTERNAL_ERROR, "Internal server error");
            }
        };
        let response = self.complete_locked(&cb).await;
        self.locks.release(&cb.merchant_trans_id, guard).await;
        response
    }

    async fn complete_locked(&self, cb: &CompleteCallback) -> GatewayResponse {
        let outcome = CompleteOutcome::from_code(cb.error);

        let payment = match self
            .payments
            .find_by_order_ref_and_gateway_id(&cb.merchant_trans_id, &cb.gateway_trans_id)
            .await
        {
            Ok(Some(payment)) => payment,
            Ok(None) => {
                // unknown order, or known order without this gateway id
                return match self.payments.find_by_order_ref(&cb.merchant_trans_id).await {
                    Ok(Some(other)) => {
                        match state_machine::decide_complete(&other, &cb.gateway_trans_id, outcome)
                        {
                            Err(err) => rejection(&other, err),
                            // the pair lookup missed, so the ids cannot match here
                            Ok(_) => GatewayResponse::error(
                                codes::INTERNAL_ERROR,
                                "Internal server error",
                            ),
                        }
                    }
                    Ok(None) => {
                        tracing::warn!(order_ref = %cb.merchant_trans_id, "complete for unknown order");
                        GatewayResponse::error(codes::TRANSACTION_NOT_FOUND, "Transaction not found")
                    }
                    Err(err) => internal(err),
                };
            }
            Err(err) => return internal(err),
        };

        if payment.amount != cb.amount {
            tracing::warn!(
                order_ref = %payment.order_ref,
                expected = payment.amount,
                presented = cb.amount,
                "complete rejected: amount mismatch"
            );
            return GatewayResponse::error(codes::INCORRECT_AMOUNT, "Incorrect amount");
        }

        match state_machine::decide_complete(&payment, &cb.gateway_trans_id, outcome) {
            Ok(CompleteDecision::Finalize(next)) => self.finalize(&payment, cb, next).await,
            Ok(CompleteDecision::Replay) => {
                tracing::info!(
                    order_ref = %payment.order_ref,
                    status = payment.status.as_str(),
                    "complete replayed"
                );
                GatewayResponse::complete_ok(cb, payment.id)
            }
            Err(err) => rejection(&payment, err),
        }
    }

    async fn finalize(
        &self,
        payment: &Payment,
        cb: &CompleteCallback,
        next: PaymentStatus,
    ) -> GatewayResponse {
        let fields = FinalizeFields {
            merchant_ref_id: Some(cb.merchant_prepare_id.clone()),
            audit: audit_entry("complete", &cb.gateway_trans_id, next.as_str()),
        };
        match self
            .payments
            .compare_and_set_status(payment.id, PaymentStatus::Pending, next, fields)
            .await
        {
            Ok(CasOutcome::Updated(updated)) => {
                tracing::info!(
                    order_ref = %updated.order_ref,
                    status = updated.status.as_str(),
                    "payment settled"
                );
                if updated.status == PaymentStatus::Paid {
                    self.notifier.grant(updated.user_id, updated.id).await;
                }
                GatewayResponse::complete_ok(cb, updated.id)
            }
            // another writer settled between our read and the update;
            // classify against what it left behind
            Ok(CasOutcome::Conflict { current }) => {
                match state_machine::decide_complete(&current, &cb.gateway_trans_id, CompleteOutcome::from_code(cb.error))
                {
                    Ok(CompleteDecision::Replay) => GatewayResponse::complete_ok(cb, current.id),
                    Err(err) => rejection(&current, err),
                    Ok(CompleteDecision::Finalize(_)) => {
                        tracing::error!(
                            order_ref = %current.order_ref,
                            "record changed under the order lock"
                        );
                        GatewayResponse::error(codes::INTERNAL_ERROR, "Internal server error")
                    }
                }
            }
            Err(err) => internal(err),
        }
    }
}
