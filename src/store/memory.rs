//! In-memory store implementations.
//!
//! Backed by `HashMap`s under a single `RwLock` per store, with a secondary
//! index from `order_ref` to payment id. Used by the test suite and handy
//! for running the service without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AssignOutcome, CasOutcome, FinalizeFields, PaymentStore, StoreError, UserStore};
use crate::models::payment::{NewPayment, Payment, PaymentStatus};
use crate::models::user::{NewUser, User};

/// Mirror of the JSONB `||` append: array-to-array concatenation.
fn append_audit(metadata: &mut Value, audit: Value) {
    match (metadata, audit) {
        (Value::Array(trail), Value::Array(entries)) => trail.extend(entries),
        (slot, entry) => *slot = entry,
    }
}

#[derive(Default)]
struct PaymentsInner {
    by_id: HashMap<Uuid, Payment>,
    by_order_ref: HashMap<String, Uuid>,
}

/// In-memory `PaymentStore`.
#[derive(Default)]
pub struct MemoryPaymentStore {
    inner: RwLock<PaymentsInner>,
}

impl MemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for MemoryPaymentStore {
    async fn create(&self, new: NewPayment) -> Result<Payment, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.by_order_ref.contains_key(&new.order_ref) {
            return Err(StoreError::DuplicateOrderRef(new.order_ref));
        }

        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            order_ref: new.order_ref,
            user_id: new.user_id,
            amount: new.amount,
            status: PaymentStatus::Pending,
            gateway_tx_id: None,
            merchant_ref_id: None,
            metadata: Value::Array(Vec::new()),
            created_at: now,
            updated_at: now,
        };
        inner
            .by_order_ref
            .insert(payment.order_ref.clone(), payment.id);
        inner.by_id.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        Ok(self.inner.read().await.by_id.get(&id).cloned())
    }

    async fn find_by_order_ref(&self, order_ref: &str) -> Result<Option<Payment>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_order_ref
            .get(order_ref)
            .and_then(|id| inner.by_id.get(id))
            .cloned())
    }

    async fn find_by_order_ref_and_gateway_id(
        &self,
        order_ref: &str,
        gateway_tx_id: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_order_ref
            .get(order_ref)
            .and_then(|id| inner.by_id.get(id))
            .filter(|payment| payment.gateway_tx_id.as_deref() == Some(gateway_tx_id))
            .cloned())
    }

    async fn assign_gateway_id(
        &self,
        id: Uuid,
        gateway_tx_id: &str,
        audit: Value,
    ) -> Result<AssignOutcome, StoreError> {
        let mut inner = self.inner.write().await;
        let payment = inner
            .by_id
            .get_mut(&id)
            .ok_or(StoreError::PaymentNotFound(id))?;

        if payment.gateway_tx_id.is_some() {
            return Ok(AssignOutcome::AlreadyAssigned {
                existing: payment.clone(),
            });
        }

        payment.gateway_tx_id = Some(gateway_tx_id.to_string());
        append_audit(&mut payment.metadata, audit);
        payment.updated_at = Utc::now();
        Ok(AssignOutcome::Assigned(payment.clone()))
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        next: PaymentStatus,
        fields: FinalizeFields,
    ) -> Result<CasOutcome, StoreError> {
        let mut inner = self.inner.write().await;
        let payment = inner
            .by_id
            .get_mut(&id)
            .ok_or(StoreError::PaymentNotFound(id))?;

        if payment.status != expected {
            return Ok(CasOutcome::Conflict {
                current: payment.clone(),
            });
        }

        payment.status = next;
        if let Some(merchant_ref_id) = fields.merchant_ref_id {
            payment.merchant_ref_id = Some(merchant_ref_id);
        }
        append_audit(&mut payment.metadata, fields.audit);
        payment.updated_at = Utc::now();
        Ok(CasOutcome::Updated(payment.clone()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Default)]
struct UsersInner {
    by_id: HashMap<Uuid, User>,
    by_telegram_id: HashMap<i64, Uuid>,
}

/// In-memory `UserStore`.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: RwLock<UsersInner>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn upsert_by_telegram_id(&self, new: NewUser) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;

        if let Some(id) = inner.by_telegram_id.get(&new.telegram_id).copied() {
            let user = inner
                .by_id
                .get_mut(&id)
                .ok_or(StoreError::UserNotFound(id))?;
            if new.username.is_some() {
                user.username = new.username;
            }
            if new.first_name.is_some() {
                user.first_name = new.first_name;
            }
            if new.last_name.is_some() {
                user.last_name = new.last_name;
            }
            user.updated_at = Utc::now();
            return Ok(user.clone());
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            telegram_id: new.telegram_id,
            username: new.username,
            first_name: new.first_name,
            last_name: new.last_name,
            has_paid: false,
            viewed_anecdotes: 0,
            created_at: now,
            updated_at: now,
        };
        inner.by_telegram_id.insert(user.telegram_id, user.id);
        inner.by_id.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().await.by_id.get(&id).cloned())
    }

    async fn set_has_paid(&self, id: Uuid, has_paid: bool) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;
        let user = inner
            .by_id
            .get_mut(&id)
            .ok_or(StoreError::UserNotFound(id))?;
        user.has_paid = has_paid;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::payment::audit_entry;

    fn new_payment(order_ref: &str) -> NewPayment {
        NewPayment {
            order_ref: order_ref.to_string(),
            user_id: Uuid::new_v4(),
            amount: 1_500_000,
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_order_ref() {
        let store = MemoryPaymentStore::new();
        store.create(new_payment("ref-1")).await.unwrap();

        let err = store.create(new_payment("ref-1")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateOrderRef(ref r) if r == "ref-1"));
    }

    #[tokio::test]
    async fn assign_gateway_id_is_first_writer_wins() {
        let store = MemoryPaymentStore::new();
        let payment = store.create(new_payment("ref-1")).await.unwrap();

        let first = store
            .assign_gateway_id(payment.id, "gtx-1", audit_entry("prepare", "gtx-1", "bound"))
            .await
            .unwrap();
        assert!(matches!(first, AssignOutcome::Assigned(_)));

        let second = store
            .assign_gateway_id(payment.id, "gtx-2", audit_entry("prepare", "gtx-2", "bound"))
            .await
            .unwrap();
        match second {
            AssignOutcome::AlreadyAssigned { existing } => {
                assert_eq!(existing.gateway_tx_id.as_deref(), Some("gtx-1"));
                // the losing write appended nothing
                assert_eq!(existing.metadata.as_array().unwrap().len(), 1);
            }
            AssignOutcome::Assigned(_) => panic!("second assignment must not win"),
        }
    }

    #[tokio::test]
    async fn pair_lookup_requires_the_bound_gateway_id() {
        let store = MemoryPaymentStore::new();
        let payment = store.create(new_payment("ref-1")).await.unwrap();

        assert!(
            store
                .find_by_order_ref_and_gateway_id("ref-1", "gtx-1")
                .await
                .unwrap()
                .is_none()
        );

        store
            .assign_gateway_id(payment.id, "gtx-1", audit_entry("prepare", "gtx-1", "bound"))
            .await
            .unwrap();

        assert!(
            store
                .find_by_order_ref_and_gateway_id("ref-1", "gtx-1")
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            store
                .find_by_order_ref_and_gateway_id("ref-1", "other")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn cas_refuses_stale_expectations() {
        let store = MemoryPaymentStore::new();
        let payment = store.create(new_payment("ref-1")).await.unwrap();

        let fields = FinalizeFields {
            merchant_ref_id: Some(payment.id.to_string()),
            audit: audit_entry("complete", "gtx-1", "paid"),
        };
        let updated = store
            .compare_and_set_status(
                payment.id,
                PaymentStatus::Pending,
                PaymentStatus::Paid,
                fields,
            )
            .await
            .unwrap();
        assert!(matches!(updated, CasOutcome::Updated(ref p) if p.status == PaymentStatus::Paid));

        // a second finalize sees the terminal record, untouched
        let fields = FinalizeFields {
            merchant_ref_id: None,
            audit: audit_entry("complete", "gtx-1", "cancelled"),
        };
        let conflict = store
            .compare_and_set_status(
                payment.id,
                PaymentStatus::Pending,
                PaymentStatus::Cancelled,
                fields,
            )
            .await
            .unwrap();
        match conflict {
            CasOutcome::Conflict { current } => {
                assert_eq!(current.status, PaymentStatus::Paid);
                assert_eq!(current.metadata.as_array().unwrap().len(), 1);
            }
            CasOutcome::Updated(_) => panic!("terminal record must not move"),
        }
    }

    #[tokio::test]
    async fn upsert_fills_profile_gaps_without_erasing() {
        let store = MemoryUserStore::new();
        let created = store
            .upsert_by_telegram_id(NewUser {
                telegram_id: 42,
                username: Some("teo".to_string()),
                first_name: None,
                last_name: None,
            })
            .await
            .unwrap();
        assert!(!created.has_paid);

        let refreshed = store
            .upsert_by_telegram_id(NewUser {
                telegram_id: 42,
                username: None,
                first_name: Some("Teo".to_string()),
                last_name: None,
            })
            .await
            .unwrap();
        assert_eq!(refreshed.id, created.id);
        assert_eq!(refreshed.username.as_deref(), Some("teo"));
        assert_eq!(refreshed.first_name.as_deref(), Some("Teo"));
    }

    #[tokio::test]
    async fn set_has_paid_requires_an_existing_user() {
        let store = MemoryUserStore::new();
        let missing = Uuid::new_v4();
        let err = store.set_has_paid(missing, true).await.unwrap_err();
        assert!(matches!(err, StoreError::UserNotFound(id) if id == missing));
    }
}
