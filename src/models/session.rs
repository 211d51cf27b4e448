use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One realtime connection's authorization state. Not deleted on disconnect,
/// only on explicit logout or expiry, so a reconnect can restore it through
/// the long-term token.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub connection_id: String,
    pub phone: String,
    pub authorized: bool,
    pub name: Option<String>,
    pub telegram_user_id: Option<i64>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Renewable bearer token independent of any single connection. Presenting a
/// valid token silently re-authorizes a new connection.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LongTermSession {
    pub token: String,
    pub phone: String,
    pub name: String,
    pub telegram_user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LongTermSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}
