use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::AppResult,
    models::{AuthKey, LongTermSession, Session, SmsCode, User},
    storage::store::Store,
};

/// Postgres-backed [`Store`]. One-time-use guarantees rely on conditional
/// updates (`... AND used = FALSE`) rather than read-then-write.
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn find_user_by_phone(&self, phone: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as("SELECT * FROM users WHERE phone = $1")
            .bind(phone)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_user_by_telegram_id(&self, telegram_user_id: i64) -> AppResult<Option<User>> {
        let user = sqlx::query_as("SELECT * FROM users WHERE telegram_user_id = $1")
            .bind(telegram_user_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn upsert_user(&self, user: &User) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (phone, name, telegram_user_id, last_auth_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (phone)
            DO UPDATE SET name = $2, telegram_user_id = $3, last_auth_at = $4
            "#,
        )
        .bind(&user.phone)
        .bind(&user.name)
        .bind(user.telegram_user_id)
        .bind(user.last_auth_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn find_session_by_connection(&self, connection_id: &str) -> AppResult<Option<Session>> {
        let session = sqlx::query_as("SELECT * FROM sessions WHERE connection_id = $1")
            .bind(connection_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(session)
    }

    async fn upsert_session(&self, session: &Session) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (connection_id, phone, authorized, name, telegram_user_id, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (connection_id)
            DO UPDATE SET phone = $2, authorized = $3, name = $4, telegram_user_id = $5, expires_at = $6
            "#,
        )
        .bind(&session.connection_id)
        .bind(&session.phone)
        .bind(session.authorized)
        .bind(&session.name)
        .bind(session.telegram_user_id)
        .bind(session.expires_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn delete_session(&self, connection_id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM sessions WHERE connection_id = $1")
            .bind(connection_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn create_auth_key(&self, key: &AuthKey) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO auth_keys
                (key, phone, connection_id, created_at, expires_at, used, pending_telegram_user_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&key.key)
        .bind(&key.phone)
        .bind(&key.connection_id)
        .bind(key.created_at)
        .bind(key.expires_at)
        .bind(key.used)
        .bind(key.pending_telegram_user_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn find_auth_key(&self, key: &str) -> AppResult<Option<AuthKey>> {
        let auth_key = sqlx::query_as("SELECT * FROM auth_keys WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.db)
            .await?;
        Ok(auth_key)
    }

    async fn find_latest_auth_key_by_phone(&self, phone: &str) -> AppResult<Option<AuthKey>> {
        let auth_key = sqlx::query_as(
            r#"
            SELECT * FROM auth_keys
            WHERE phone = $1 AND used = FALSE
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(phone)
        .fetch_optional(&self.db)
        .await?;
        Ok(auth_key)
    }

    async fn attach_telegram_user(&self, key: &str, telegram_user_id: i64) -> AppResult<()> {
        sqlx::query("UPDATE auth_keys SET pending_telegram_user_id = $2 WHERE key = $1")
            .bind(key)
            .bind(telegram_user_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn consume_auth_key(&self, key: &str) -> AppResult<bool> {
        let result = sqlx::query("UPDATE auth_keys SET used = TRUE WHERE key = $1 AND used = FALSE")
            .bind(key)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn upsert_sms_code(&self, code: &SmsCode) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sms_codes (phone, code, connection_id, created_at, expires_at, used)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (phone)
            DO UPDATE SET code = $2, connection_id = $3, created_at = $4, expires_at = $5, used = $6
            "#,
        )
        .bind(&code.phone)
        .bind(&code.code)
        .bind(&code.connection_id)
        .bind(code.created_at)
        .bind(code.expires_at)
        .bind(code.used)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn find_sms_code(&self, phone: &str) -> AppResult<Option<SmsCode>> {
        let code = sqlx::query_as("SELECT * FROM sms_codes WHERE phone = $1")
            .bind(phone)
            .fetch_optional(&self.db)
            .await?;
        Ok(code)
    }

    async fn find_sms_code_by_code(&self, code: &str) -> AppResult<Option<SmsCode>> {
        let sms_code =
            sqlx::query_as("SELECT * FROM sms_codes WHERE code = $1 AND used = FALSE LIMIT 1")
                .bind(code)
                .fetch_optional(&self.db)
                .await?;
        Ok(sms_code)
    }

    async fn consume_sms_code(&self, phone: &str) -> AppResult<bool> {
        let result =
            sqlx::query("UPDATE sms_codes SET used = TRUE WHERE phone = $1 AND used = FALSE")
                .bind(phone)
                .execute(&self.db)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn create_long_term_session(&self, session: &LongTermSession) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO long_term_sessions (token, phone, name, telegram_user_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&session.token)
        .bind(&session.phone)
        .bind(&session.name)
        .bind(session.telegram_user_id)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn find_long_term_session(&self, token: &str) -> AppResult<Option<LongTermSession>> {
        let session = sqlx::query_as("SELECT * FROM long_term_sessions WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.db)
            .await?;
        Ok(session)
    }

    async fn delete_long_term_session(&self, token: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM long_term_sessions WHERE token = $1")
            .bind(token)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn extend_long_term_session(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<Option<LongTermSession>> {
        let session = sqlx::query_as(
            "UPDATE long_term_sessions SET expires_at = $2 WHERE token = $1 RETURNING *",
        )
        .bind(token)
        .bind(expires_at)
        .fetch_optional(&self.db)
        .await?;
        Ok(session)
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < $1")
            .bind(now)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired_auth_keys(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM auth_keys WHERE expires_at < $1")
            .bind(now)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired_sms_codes(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM sms_codes WHERE expires_at < $1")
            .bind(now)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired_long_term_sessions(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM long_term_sessions WHERE expires_at < $1")
            .bind(now)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }
}
