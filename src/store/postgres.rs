//! sqlx-backed store implementations for PostgreSQL.
//!
//! Both conditional writes are single UPDATE statements so they stay atomic
//! without explicit transactions:
//! - `assign_gateway_id` guards on `gateway_tx_id IS NULL`
//! - `compare_and_set_status` guards on `status = $expected`
//!
//! A guarded UPDATE that matches zero rows re-reads the record once to tell
//! the caller what it lost against.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::{AssignOutcome, CasOutcome, FinalizeFields, PaymentStore, StoreError, UserStore};
use crate::db::DbPool;
use crate::models::payment::{NewPayment, Payment, PaymentStatus};
use crate::models::user::{NewUser, User};

/// PostgreSQL error code for unique constraint violations.
const UNIQUE_VIOLATION: &str = "23505";

/// `PaymentStore` over a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgPaymentStore {
    pool: DbPool,
}

impl PgPaymentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn create(&self, new: NewPayment) -> Result<Payment, StoreError> {
        sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (order_ref, user_id, amount, status, metadata)
            VALUES ($1, $2, $3, 'pending', '[]'::jsonb)
            RETURNING *
            "#,
        )
        .bind(&new.order_ref)
        .bind(new.user_id)
        .bind(new.amount)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(ref db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                StoreError::DuplicateOrderRef(new.order_ref.clone())
            }
            other => StoreError::Database(other),
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(payment)
    }

    async fn find_by_order_ref(&self, order_ref: &str) -> Result<Option<Payment>, StoreError> {
        let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE order_ref = $1")
            .bind(order_ref)
            .fetch_optional(&self.pool)
            .await?;
        Ok(payment)
    }

    async fn find_by_order_ref_and_gateway_id(
        &self,
        order_ref: &str,
        gateway_tx_id: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let payment = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE order_ref = $1 AND gateway_tx_id = $2",
        )
        .bind(order_ref)
        .bind(gateway_tx_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payment)
    }

    async fn assign_gateway_id(
        &self,
        id: Uuid,
        gateway_tx_id: &str,
        audit: Value,
    ) -> Result<AssignOutcome, StoreError> {
        let updated = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET gateway_tx_id = $2,
                metadata = metadata || $3::jsonb,
                updated_at = NOW()
            WHERE id = $1 AND gateway_tx_id IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(gateway_tx_id)
        .bind(&audit)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(payment) = updated {
            return Ok(AssignOutcome::Assigned(payment));
        }

        // Zero rows: either another writer bound an id first, or the record
        // is gone. Re-read to distinguish.
        let existing = self
            .get(id)
            .await?
            .ok_or(StoreError::PaymentNotFound(id))?;
        Ok(AssignOutcome::AlreadyAssigned { existing })
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        next: PaymentStatus,
        fields: FinalizeFields,
    ) -> Result<CasOutcome, StoreError> {
        let updated = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET status = $3,
                merchant_ref_id = COALESCE($4, merchant_ref_id),
                metadata = metadata || $5::jsonb,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(next)
        .bind(&fields.merchant_ref_id)
        .bind(&fields.audit)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(payment) = updated {
            return Ok(CasOutcome::Updated(payment));
        }

        let current = self
            .get(id)
            .await?
            .ok_or(StoreError::PaymentNotFound(id))?;
        Ok(CasOutcome::Conflict { current })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// `UserStore` over a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgUserStore {
    pool: DbPool,
}

impl PgUserStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn upsert_by_telegram_id(&self, new: NewUser) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (telegram_id, username, first_name, last_name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (telegram_id) DO UPDATE
            SET username = COALESCE(EXCLUDED.username, users.username),
                first_name = COALESCE(EXCLUDED.first_name, users.first_name),
                last_name = COALESCE(EXCLUDED.last_name, users.last_name),
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(new.telegram_id)
        .bind(&new.username)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn set_has_paid(&self, id: Uuid, has_paid: bool) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            "UPDATE users SET has_paid = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(has_paid)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::UserNotFound(id))
    }
}
