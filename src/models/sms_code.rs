use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One-time numeric code delivered out of band to a known user's Telegram
/// account. Keyed by phone: requesting a new code overwrites the previous
/// one.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SmsCode {
    pub phone: String,
    pub code: String,
    pub connection_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

impl SmsCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}
