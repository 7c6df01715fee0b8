//! User data model.
//!
//! Users are buyers identified by their Telegram id. The only field this
//! service writes after creation is `has_paid`, flipped when a payment for
//! the user is captured.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Represents a user record from the database.
///
/// # Database Table
///
/// Maps to the `users` table. `telegram_id` is unique: the chat dispatcher
/// upserts by it, so repeated payment attempts by the same buyer reuse one
/// row.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct User {
    /// Unique identifier for this user
    pub id: Uuid,

    /// Telegram chat/user id, unique and immutable
    pub telegram_id: i64,

    /// Telegram handle, if the buyer has one
    pub username: Option<String>,

    pub first_name: Option<String>,

    pub last_name: Option<String>,

    /// Whether this user has a captured payment
    ///
    /// Written only by the access grant path, never cleared by it.
    pub has_paid: bool,

    /// Content consumption counter owned by the delivery side
    ///
    /// Carried in the row for the collaborating service; never touched here.
    pub viewed_anecdotes: i32,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Upsert data for a user, keyed on `telegram_id`.
///
/// Profile fields only fill gaps: a `None` here never erases a value an
/// earlier upsert stored.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}
