//! Persistence contract for payments and users.
//!
//! The callback engine and the dispatcher API talk to storage only through
//! the traits here. Two implementations exist:
//! - `postgres`: sqlx-backed production stores
//! - `memory`: in-process stores for tests and local runs
//!
//! The contract is deliberately narrow. In particular, status is never
//! written blindly: `compare_and_set_status` is the only way to move a
//! payment out of `pending`, and `assign_gateway_id` is the only way to
//! bind a gateway transaction id. Both are single atomic writes, which is
//! what keeps concurrent callback delivery safe even across processes.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::models::payment::{NewPayment, Payment, PaymentStatus};
use crate::models::user::{NewUser, User};

/// Errors surfaced by store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Insert hit the `order_ref` uniqueness constraint.
    #[error("order reference already exists: {0}")]
    DuplicateOrderRef(String),

    /// A write addressed a payment id that does not exist.
    #[error("payment not found: {0}")]
    PaymentNotFound(Uuid),

    /// A write addressed a user id that does not exist.
    #[error("user not found: {0}")]
    UserNotFound(Uuid),
}

/// Outcome of the one-shot gateway id assignment.
#[derive(Debug, Clone)]
pub enum AssignOutcome {
    /// This call bound the id; the updated record is returned.
    Assigned(Payment),
    /// Some earlier write already bound an id. `existing` is the current
    /// record so the caller can tell a replay from a mismatch.
    AlreadyAssigned { existing: Payment },
}

/// Outcome of a compare-and-set status update.
#[derive(Debug, Clone)]
pub enum CasOutcome {
    Updated(Payment),
    /// The stored status no longer matched `expected`; nothing was written.
    Conflict { current: Payment },
}

/// Fields written together with a finalizing status change.
#[derive(Debug, Clone)]
pub struct FinalizeFields {
    /// The gateway's prepare echo; kept for reconciliation.
    pub merchant_ref_id: Option<String>,
    /// Audit entry to append to the payment's metadata trail.
    pub audit: Value,
}

/// Storage for payment records.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Insert a new `pending` payment.
    async fn create(&self, new: NewPayment) -> Result<Payment, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Payment>, StoreError>;

    async fn find_by_order_ref(&self, order_ref: &str) -> Result<Option<Payment>, StoreError>;

    /// Lookup by the `(order_ref, gateway_tx_id)` pair a complete callback
    /// names. Misses both when the order is unknown and when it is bound to
    /// a different gateway transaction.
    async fn find_by_order_ref_and_gateway_id(
        &self,
        order_ref: &str,
        gateway_tx_id: &str,
    ) -> Result<Option<Payment>, StoreError>;

    /// Bind the gateway transaction id, first writer wins.
    ///
    /// Appends `audit` to the metadata trail and bumps `updated_at` only
    /// when the bind happens.
    async fn assign_gateway_id(
        &self,
        id: Uuid,
        gateway_tx_id: &str,
        audit: Value,
    ) -> Result<AssignOutcome, StoreError>;

    /// Atomically move `status` from `expected` to `next`.
    ///
    /// When the stored status differs from `expected` the record is left
    /// untouched and returned as `CasOutcome::Conflict`.
    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        next: PaymentStatus,
        fields: FinalizeFields,
    ) -> Result<CasOutcome, StoreError>;

    /// Connectivity probe for the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Storage for user records.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert or refresh a user keyed on `telegram_id`.
    ///
    /// Profile fields in `new` only fill gaps; `None` never erases stored
    /// values.
    async fn upsert_by_telegram_id(&self, new: NewUser) -> Result<User, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Flip the access flag. Errors with `UserNotFound` when no row matches.
    async fn set_has_paid(&self, id: Uuid, has_paid: bool) -> Result<User, StoreError>;
}

pub mod memory;
pub mod postgres;
