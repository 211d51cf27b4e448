use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One-time key binding a pending new-user authorization attempt to a phone
/// and the connection that requested it. Consumed exactly once; several
/// unused keys may coexist for one phone and resolution picks the most
/// recently created.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuthKey {
    pub key: String,
    pub phone: String,
    pub connection_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    /// Telegram user who opened the deep link, recorded before the contact
    /// card arrives.
    pub pending_telegram_user_id: Option<i64>,
}

impl AuthKey {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}
