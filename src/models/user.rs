use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A user bound to a Telegram identity, keyed by canonical phone number.
/// Created on first successful verification, refreshed on later logins.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub phone: String,
    pub name: String,
    pub telegram_user_id: Option<i64>,
    pub last_auth_at: DateTime<Utc>,
}
