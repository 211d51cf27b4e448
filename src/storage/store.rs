use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::AppResult,
    models::{AuthKey, LongTermSession, Session, SmsCode, User},
};

/// Durable persistence contract for the auth entities. Backends are
/// swappable: Postgres in production, an in-process map for development and
/// tests. Callers pass canonical phone numbers only.
///
/// `consume_*` operations are atomic check-and-sets: of any number of
/// concurrent callers, exactly one observes `true`.
#[async_trait]
pub trait Store: Send + Sync {
    // Users
    async fn find_user_by_phone(&self, phone: &str) -> AppResult<Option<User>>;
    async fn find_user_by_telegram_id(&self, telegram_user_id: i64) -> AppResult<Option<User>>;
    async fn upsert_user(&self, user: &User) -> AppResult<()>;

    // Sessions
    async fn find_session_by_connection(&self, connection_id: &str) -> AppResult<Option<Session>>;
    async fn upsert_session(&self, session: &Session) -> AppResult<()>;
    async fn delete_session(&self, connection_id: &str) -> AppResult<()>;

    // Auth keys
    async fn create_auth_key(&self, key: &AuthKey) -> AppResult<()>;
    async fn find_auth_key(&self, key: &str) -> AppResult<Option<AuthKey>>;
    /// Most-recently-created unused key for this phone, expired or not; the
    /// caller decides how to report expiry.
    async fn find_latest_auth_key_by_phone(&self, phone: &str) -> AppResult<Option<AuthKey>>;
    async fn attach_telegram_user(&self, key: &str, telegram_user_id: i64) -> AppResult<()>;
    /// Marks the key used if and only if it is still unused.
    async fn consume_auth_key(&self, key: &str) -> AppResult<bool>;

    // Sms codes
    async fn upsert_sms_code(&self, code: &SmsCode) -> AppResult<()>;
    async fn find_sms_code(&self, phone: &str) -> AppResult<Option<SmsCode>>;
    /// Lookup by code value, for codes typed into the bot chat where the
    /// phone is unknown.
    async fn find_sms_code_by_code(&self, code: &str) -> AppResult<Option<SmsCode>>;
    /// Marks the code used if and only if it is still unused.
    async fn consume_sms_code(&self, phone: &str) -> AppResult<bool>;

    // Long-term sessions
    async fn create_long_term_session(&self, session: &LongTermSession) -> AppResult<()>;
    async fn find_long_term_session(&self, token: &str) -> AppResult<Option<LongTermSession>>;
    async fn delete_long_term_session(&self, token: &str) -> AppResult<()>;
    /// Pushes `expires_at` forward; returns the refreshed record, or `None`
    /// when the token does not exist (a no-op, not an error).
    async fn extend_long_term_session(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<Option<LongTermSession>>;

    // Cleanup
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> AppResult<u64>;
    async fn delete_expired_auth_keys(&self, now: DateTime<Utc>) -> AppResult<u64>;
    async fn delete_expired_sms_codes(&self, now: DateTime<Utc>) -> AppResult<u64>;
    async fn delete_expired_long_term_sessions(&self, now: DateTime<Utc>) -> AppResult<u64>;
}
