//! Payment initiation and status lookup for the internal API.
//!
//! This service owns the merchant side of an order's life: it mints the
//! order reference the gateway will echo back as `merchant_trans_id`, and
//! builds the hosted checkout link the chat dispatcher hands to the buyer.

use std::sync::Arc;

use rand::Rng;
use rand::distr::Alphanumeric;
use url::Url;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::payment::{NewPayment, Payment};
use crate::models::user::NewUser;
use crate::store::{PaymentStore, StoreError, UserStore};

/// Length of a generated order reference.
const ORDER_REF_LEN: usize = 20;

/// Mint an order reference: random alphanumeric, long enough that a
/// collision is a store-level rarity rather than something to plan around.
fn generate_order_ref() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(ORDER_REF_LEN)
        .map(char::from)
        .collect()
}

/// A freshly created payment plus the checkout link for the buyer.
#[derive(Debug, Clone)]
pub struct InitiatedPayment {
    pub payment: Payment,
    pub checkout_url: String,
}

/// A payment joined with the owner's access flag.
#[derive(Debug, Clone)]
pub struct PaymentWithAccess {
    pub payment: Payment,
    pub has_paid: bool,
}

/// Creates payments and answers status queries.
pub struct PaymentService {
    payments: Arc<dyn PaymentStore>,
    users: Arc<dyn UserStore>,
    checkout_base: Url,
    service_id: i64,
}

impl PaymentService {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        users: Arc<dyn UserStore>,
        checkout_base: Url,
        service_id: i64,
    ) -> Self {
        Self {
            payments,
            users,
            checkout_base,
            service_id,
        }
    }

    /// Create a `Pending` payment for the given buyer.
    ///
    /// # Process
    ///
    /// 1. Validate the amount
    /// 2. Upsert the user by `telegram_id`
    /// 3. Create the payment under a fresh order reference, regenerating
    ///    once if the reference collides
    /// 4. Build the hosted checkout link
    ///
    /// # Errors
    ///
    /// - `InvalidRequest`: amount is zero or negative
    /// - `Store`: the underlying store failed
    pub async fn initiate(&self, buyer: NewUser, amount: i64) -> Result<InitiatedPayment, AppError> {
        if amount <= 0 {
            return Err(AppError::InvalidRequest(
                "Amount must be positive".to_string(),
            ));
        }

        let user = self.users.upsert_by_telegram_id(buyer).await?;

        let mut retried = false;
        let payment = loop {
            let order_ref = generate_order_ref();
            match self
                .payments
                .create(NewPayment {
                    order_ref,
                    user_id: user.id,
                    amount,
                })
                .await
            {
                Ok(payment) => break payment,
                Err(StoreError::DuplicateOrderRef(order_ref)) if !retried => {
                    tracing::warn!(%order_ref, "order reference collided, regenerating");
                    retried = true;
                }
                Err(err) => return Err(err.into()),
            }
        };

        let checkout_url = self.checkout_url(&payment);
        tracing::info!(
            order_ref = %payment.order_ref,
            amount = payment.amount,
            telegram_id = user.telegram_id,
            "payment initiated"
        );

        Ok(InitiatedPayment {
            payment,
            checkout_url,
        })
    }

    /// Fetch a payment together with its owner's `has_paid` flag.
    ///
    /// # Errors
    ///
    /// - `PaymentNotFound`: no payment with this id
    /// - `Store`: the underlying store failed
    pub async fn status(&self, id: Uuid) -> Result<PaymentWithAccess, AppError> {
        let payment = self
            .payments
            .get(id)
            .await?
            .ok_or(AppError::PaymentNotFound)?;
        let has_paid = self
            .users
            .get(payment.user_id)
            .await?
            .map(|user| user.has_paid)
            .unwrap_or(false);
        Ok(PaymentWithAccess { payment, has_paid })
    }

    /// Hosted checkout link carrying the order reference the gateway will
    /// send back as `merchant_trans_id`.
    fn checkout_url(&self, payment: &Payment) -> String {
        let mut url = self.checkout_base.clone();
        url.query_pairs_mut()
            .append_pair("service_id", &self.service_id.to_string())
            .append_pair("transaction_param", &payment.order_ref)
            .append_pair("amount", &payment.amount.to_string());
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::payment::PaymentStatus;
    use crate::store::memory::{MemoryPaymentStore, MemoryUserStore};

    fn service(
        payments: Arc<MemoryPaymentStore>,
        users: Arc<MemoryUserStore>,
    ) -> PaymentService {
        PaymentService::new(
            payments as Arc<dyn PaymentStore>,
            users as Arc<dyn UserStore>,
            Url::parse("https://pay.example.com/services/pay").unwrap(),
            54321,
        )
    }

    fn buyer() -> NewUser {
        NewUser {
            telegram_id: 42,
            username: Some("buyer".to_string()),
            first_name: None,
            last_name: None,
        }
    }

    #[tokio::test]
    async fn initiate_creates_a_pending_payment_with_checkout_link() {
        let payments = Arc::new(MemoryPaymentStore::new());
        let users = Arc::new(MemoryUserStore::new());
        let svc = service(payments.clone(), users.clone());

        let initiated = svc.initiate(buyer(), 1_500_000).await.unwrap();
        assert_eq!(initiated.payment.status, PaymentStatus::Pending);
        assert_eq!(initiated.payment.amount, 1_500_000);
        assert_eq!(initiated.payment.order_ref.len(), ORDER_REF_LEN);
        assert!(
            initiated
                .payment
                .order_ref
                .chars()
                .all(|c| c.is_ascii_alphanumeric())
        );

        let url = Url::parse(&initiated.checkout_url).unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("service_id".to_string(), "54321".to_string())));
        assert!(pairs.contains(&(
            "transaction_param".to_string(),
            initiated.payment.order_ref.clone()
        )));
        assert!(pairs.contains(&("amount".to_string(), "1500000".to_string())));
    }

    #[tokio::test]
    async fn initiate_rejects_non_positive_amounts() {
        let svc = service(
            Arc::new(MemoryPaymentStore::new()),
            Arc::new(MemoryUserStore::new()),
        );

        for amount in [0, -1] {
            let err = svc.initiate(buyer(), amount).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidRequest(_)));
        }
    }

    #[tokio::test]
    async fn initiate_reuses_the_existing_user() {
        let users = Arc::new(MemoryUserStore::new());
        let svc = service(Arc::new(MemoryPaymentStore::new()), users.clone());

        let first = svc.initiate(buyer(), 100).await.unwrap();
        let second = svc.initiate(buyer(), 200).await.unwrap();
        assert_eq!(first.payment.user_id, second.payment.user_id);
        assert_ne!(first.payment.order_ref, second.payment.order_ref);
    }

    #[tokio::test]
    async fn status_reports_the_access_flag() {
        let payments = Arc::new(MemoryPaymentStore::new());
        let users = Arc::new(MemoryUserStore::new());
        let svc = service(payments.clone(), users.clone());

        let initiated = svc.initiate(buyer(), 100).await.unwrap();
        let view = svc.status(initiated.payment.id).await.unwrap();
        assert!(!view.has_paid);

        users
            .set_has_paid(initiated.payment.user_id, true)
            .await
            .unwrap();
        let view = svc.status(initiated.payment.id).await.unwrap();
        assert!(view.has_paid);
    }

    #[tokio::test]
    async fn status_for_unknown_payment_is_not_found() {
        let svc = service(
            Arc::new(MemoryPaymentStore::new()),
            Arc::new(MemoryUserStore::new()),
        );

        let err = svc.status(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::PaymentNotFound));
    }
}
