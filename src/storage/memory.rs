use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    error::AppResult,
    models::{AuthKey, LongTermSession, Session, SmsCode, User},
    storage::store::Store,
};

/// In-process [`Store`] for development and tests. Data does not survive a
/// restart. Check-and-set operations run under the table's write lock, so
/// the one-winner contract of `consume_*` holds here too.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, User>>,
    sessions: RwLock<HashMap<String, Session>>,
    auth_keys: RwLock<HashMap<String, AuthKey>>,
    sms_codes: RwLock<HashMap<String, SmsCode>>,
    long_term_sessions: RwLock<HashMap<String, LongTermSession>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_user_by_phone(&self, phone: &str) -> AppResult<Option<User>> {
        Ok(self.users.read().await.get(phone).cloned())
    }

    async fn find_user_by_telegram_id(&self, telegram_user_id: i64) -> AppResult<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.telegram_user_id == Some(telegram_user_id))
            .cloned())
    }

    async fn upsert_user(&self, user: &User) -> AppResult<()> {
        self.users
            .write()
            .await
            .insert(user.phone.clone(), user.clone());
        Ok(())
    }

    async fn find_session_by_connection(&self, connection_id: &str) -> AppResult<Option<Session>> {
        Ok(self.sessions.read().await.get(connection_id).cloned())
    }

    async fn upsert_session(&self, session: &Session) -> AppResult<()> {
        self.sessions
            .write()
            .await
            .insert(session.connection_id.clone(), session.clone());
        Ok(())
    }

    async fn delete_session(&self, connection_id: &str) -> AppResult<()> {
        self.sessions.write().await.remove(connection_id);
        Ok(())
    }

    async fn create_auth_key(&self, key: &AuthKey) -> AppResult<()> {
        self.auth_keys
            .write()
            .await
            .insert(key.key.clone(), key.clone());
        Ok(())
    }

    async fn find_auth_key(&self, key: &str) -> AppResult<Option<AuthKey>> {
        Ok(self.auth_keys.read().await.get(key).cloned())
    }

    async fn find_latest_auth_key_by_phone(&self, phone: &str) -> AppResult<Option<AuthKey>> {
        Ok(self
            .auth_keys
            .read()
            .await
            .values()
            .filter(|k| k.phone == phone && !k.used)
            .max_by_key(|k| k.created_at)
            .cloned())
    }

    async fn attach_telegram_user(&self, key: &str, telegram_user_id: i64) -> AppResult<()> {
        if let Some(auth_key) = self.auth_keys.write().await.get_mut(key) {
            auth_key.pending_telegram_user_id = Some(telegram_user_id);
        }
        Ok(())
    }

    async fn consume_auth_key(&self, key: &str) -> AppResult<bool> {
        let mut auth_keys = self.auth_keys.write().await;
        match auth_keys.get_mut(key) {
            Some(auth_key) if !auth_key.used => {
                auth_key.used = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn upsert_sms_code(&self, code: &SmsCode) -> AppResult<()> {
        self.sms_codes
            .write()
            .await
            .insert(code.phone.clone(), code.clone());
        Ok(())
    }

    async fn find_sms_code(&self, phone: &str) -> AppResult<Option<SmsCode>> {
        Ok(self.sms_codes.read().await.get(phone).cloned())
    }

    async fn find_sms_code_by_code(&self, code: &str) -> AppResult<Option<SmsCode>> {
        Ok(self
            .sms_codes
            .read()
            .await
            .values()
            .find(|c| c.code == code && !c.used)
            .cloned())
    }

    async fn consume_sms_code(&self, phone: &str) -> AppResult<bool> {
        let mut sms_codes = self.sms_codes.write().await;
        match sms_codes.get_mut(phone) {
            Some(code) if !code.used => {
                code.used = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_long_term_session(&self, session: &LongTermSession) -> AppResult<()> {
        self.long_term_sessions
            .write()
            .await
            .insert(session.token.clone(), session.clone());
        Ok(())
    }

    async fn find_long_term_session(&self, token: &str) -> AppResult<Option<LongTermSession>> {
        Ok(self.long_term_sessions.read().await.get(token).cloned())
    }

    async fn delete_long_term_session(&self, token: &str) -> AppResult<()> {
        self.long_term_sessions.write().await.remove(token);
        Ok(())
    }

    async fn extend_long_term_session(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<Option<LongTermSession>> {
        let mut sessions = self.long_term_sessions.write().await;
        Ok(sessions.get_mut(token).map(|session| {
            session.expires_at = expires_at;
            session.clone()
        }))
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at >= now);
        Ok((before - sessions.len()) as u64)
    }

    async fn delete_expired_auth_keys(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut auth_keys = self.auth_keys.write().await;
        let before = auth_keys.len();
        auth_keys.retain(|_, k| k.expires_at >= now);
        Ok((before - auth_keys.len()) as u64)
    }

    async fn delete_expired_sms_codes(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut sms_codes = self.sms_codes.write().await;
        let before = sms_codes.len();
        sms_codes.retain(|_, c| c.expires_at >= now);
        Ok((before - sms_codes.len()) as u64)
    }

    async fn delete_expired_long_term_sessions(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut sessions = self.long_term_sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at >= now);
        Ok((before - sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn auth_key(key: &str, phone: &str, created_at: DateTime<Utc>) -> AuthKey {
        AuthKey {
            key: key.to_string(),
            phone: phone.to_string(),
            connection_id: "conn-1".to_string(),
            created_at,
            expires_at: created_at + Duration::minutes(5),
            used: false,
            pending_telegram_user_id: None,
        }
    }

    #[tokio::test]
    async fn latest_auth_key_wins_for_same_phone() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .create_auth_key(&auth_key("older000", "+79817750018", now - Duration::minutes(2)))
            .await
            .unwrap();
        store
            .create_auth_key(&auth_key("newer000", "+79817750018", now))
            .await
            .unwrap();

        let found = store
            .find_latest_auth_key_by_phone("+79817750018")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.key, "newer000");
    }

    #[tokio::test]
    async fn consume_auth_key_is_one_shot() {
        let store = MemoryStore::new();
        store
            .create_auth_key(&auth_key("abc12345", "+79817750018", Utc::now()))
            .await
            .unwrap();

        assert!(store.consume_auth_key("abc12345").await.unwrap());
        assert!(!store.consume_auth_key("abc12345").await.unwrap());
        assert!(!store.consume_auth_key("missing0").await.unwrap());
    }

    #[tokio::test]
    async fn sms_code_upsert_overwrites_by_phone() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut code = SmsCode {
            phone: "+79817750018".to_string(),
            code: "1111".to_string(),
            connection_id: "conn-1".to_string(),
            created_at: now,
            expires_at: now + Duration::minutes(5),
            used: false,
        };
        store.upsert_sms_code(&code).await.unwrap();
        code.code = "2222".to_string();
        store.upsert_sms_code(&code).await.unwrap();

        let stored = store.find_sms_code("+79817750018").await.unwrap().unwrap();
        assert_eq!(stored.code, "2222");
        assert!(store.find_sms_code_by_code("1111").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_expired_removes_only_past_rows() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .create_auth_key(&auth_key("live0000", "+79817750018", now))
            .await
            .unwrap();
        let mut stale = auth_key("stale000", "+79817750019", now - Duration::minutes(10));
        stale.expires_at = now - Duration::minutes(5);
        store.create_auth_key(&stale).await.unwrap();

        let removed = store.delete_expired_auth_keys(now).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.find_auth_key("live0000").await.unwrap().is_some());
        assert!(store.find_auth_key("stale000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn extend_long_term_session_returns_none_for_missing_token() {
        let store = MemoryStore::new();
        let extended = store
            .extend_long_term_session("missing", Utc::now())
            .await
            .unwrap();
        assert!(extended.is_none());
    }
}
