//! Access granting after a captured payment.
//!
//! When a payment settles as `paid`, the buyer's `has_paid` flag is set and
//! a Telegram notice is sent. Neither step may disturb the settlement: the
//! money moved, so the `paid` status stands even if granting access fails.
//! Failed grants are retried in the background until access truth catches
//! up with financial truth.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::user::User;
use crate::store::UserStore;

/// Bound on the inline grant attempt inside the callback path.
const GRANT_TIMEOUT: Duration = Duration::from_secs(3);
/// First retry delay; doubles on each further attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);
const RETRY_MAX_ATTEMPTS: u32 = 5;

/// Message shown to the buyer once access is live.
const PAID_MESSAGE: &str = "Payment received. Your access is now active, enjoy!";

/// A grant that could not be applied inline.
#[derive(Debug, Clone)]
struct RetryJob {
    user_id: Uuid,
    payment_id: Uuid,
    attempt: u32,
}

/// Best-effort Telegram `sendMessage` client.
///
/// Constructed only when a bot token is configured; without it the service
/// simply grants access silently.
#[derive(Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

impl TelegramNotifier {
    pub fn new(api_base: &str, token: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Fire-and-forget payment notice. Delivery failures are logged only;
    /// the grant does not depend on them.
    fn notify_paid(&self, user: &User) {
        let notifier = self.clone();
        let chat_id = user.telegram_id;
        tokio::spawn(async move {
            let url = format!("{}/bot{}/sendMessage", notifier.api_base, notifier.token);
            let body = serde_json::json!({
                "chat_id": chat_id,
                "text": PAID_MESSAGE,
            });
            match notifier.client.post(&url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    tracing::warn!(
                        chat_id,
                        status = %response.status(),
                        "telegram payment notice rejected"
                    );
                }
                Err(err) => {
                    tracing::warn!(chat_id, error = %err, "telegram payment notice failed");
                }
            }
        });
    }
}

/// Applies access grants and owns the retry queue.
pub struct AccessGrantNotifier {
    users: Arc<dyn UserStore>,
    telegram: Option<TelegramNotifier>,
    retry_tx: mpsc::UnboundedSender<RetryJob>,
}

impl AccessGrantNotifier {
    /// Creates the notifier and spawns its retry worker. Must be called
    /// from within a tokio runtime.
    pub fn new(users: Arc<dyn UserStore>, telegram: Option<TelegramNotifier>) -> Self {
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        tokio::spawn(retry_worker(
            Arc::clone(&users),
            telegram.clone(),
            retry_tx.clone(),
            retry_rx,
        ));
        Self {
            users,
            telegram,
            retry_tx,
        }
    }

    /// Marks the payment's owner as paid.
    ///
    /// Called from the callback path right after a settlement to `paid`.
    /// Bounded by `GRANT_TIMEOUT` so a struggling user store cannot stall
    /// the gateway response. Failures are queued for retry and never
    /// propagate to the caller.
    pub async fn grant(&self, user_id: Uuid, payment_id: Uuid) {
        let attempt = tokio::time::timeout(GRANT_TIMEOUT, self.users.set_has_paid(user_id, true));
        match attempt.await {
            Ok(Ok(user)) => {
                tracing::info!(%user_id, %payment_id, "access granted");
                if let Some(telegram) = &self.telegram {
                    telegram.notify_paid(&user);
                }
            }
            Ok(Err(err)) => {
                tracing::error!(%user_id, %payment_id, error = %err, "access grant failed, queueing retry");
                self.enqueue(user_id, payment_id);
            }
            Err(_) => {
                tracing::error!(%user_id, %payment_id, "access grant timed out, queueing retry");
                self.enqueue(user_id, payment_id);
            }
        }
    }

    fn enqueue(&self, user_id: Uuid, payment_id: Uuid) {
        let job = RetryJob {
            user_id,
            payment_id,
            attempt: 0,
        };
        // send only fails when the worker is gone, i.e. during shutdown
        if self.retry_tx.send(job).is_err() {
            tracing::error!(%user_id, %payment_id, "grant retry queue is closed");
        }
    }
}

/// Drains the retry queue. Re-queues failed jobs with a doubling delay up
/// to `RETRY_MAX_ATTEMPTS`.
async fn retry_worker(
    users: Arc<dyn UserStore>,
    telegram: Option<TelegramNotifier>,
    retry_tx: mpsc::UnboundedSender<RetryJob>,
    mut retry_rx: mpsc::UnboundedReceiver<RetryJob>,
) {
    while let Some(job) = retry_rx.recv().await {
        match users.set_has_paid(job.user_id, true).await {
            Ok(user) => {
                tracing::info!(
                    user_id = %job.user_id,
                    payment_id = %job.payment_id,
                    attempt = job.attempt,
                    "access grant retry succeeded"
                );
                if let Some(telegram) = &telegram {
                    telegram.notify_paid(&user);
                }
            }
            Err(err) if job.attempt + 1 < RETRY_MAX_ATTEMPTS => {
                let delay = RETRY_BASE_DELAY * 2u32.pow(job.attempt);
                tracing::warn!(
                    user_id = %job.user_id,
                    attempt = job.attempt,
                    error = %err,
                    "access grant retry failed, backing off"
                );
                let requeue = retry_tx.clone();
                let next = RetryJob {
                    attempt: job.attempt + 1,
                    ..job
                };
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = requeue.send(next);
                });
            }
            Err(err) => {
                tracing::error!(
                    user_id = %job.user_id,
                    payment_id = %job.payment_id,
                    error = %err,
                    "access grant abandoned after repeated failures"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::NewUser;
    use crate::store::StoreError;
    use crate::store::memory::MemoryUserStore;
    use async_trait::async_trait;

    struct FailingUserStore;

    #[async_trait]
    impl UserStore for FailingUserStore {
        async fn upsert_by_telegram_id(&self, _new: NewUser) -> Result<User, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }

        async fn get(&self, _id: Uuid) -> Result<Option<User>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }

        async fn set_has_paid(&self, _id: Uuid, _has_paid: bool) -> Result<User, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }
    }

    #[tokio::test]
    async fn grant_sets_the_flag() {
        let users = Arc::new(MemoryUserStore::new());
        let user = users
            .upsert_by_telegram_id(NewUser {
                telegram_id: 42,
                username: None,
                first_name: None,
                last_name: None,
            })
            .await
            .unwrap();

        let notifier = AccessGrantNotifier::new(users.clone() as Arc<dyn UserStore>, None);
        notifier.grant(user.id, Uuid::new_v4()).await;

        let user = users.get(user.id).await.unwrap().unwrap();
        assert!(user.has_paid);
    }

    #[tokio::test]
    async fn grant_swallows_store_failures() {
        let notifier = AccessGrantNotifier::new(Arc::new(FailingUserStore), None);
        // must return normally; the settlement that triggered it stands
        notifier.grant(Uuid::new_v4(), Uuid::new_v4()).await;
    }
}
