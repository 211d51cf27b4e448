use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};

use crate::{
    config::AuthConfig,
    error::AppResult,
    models::{LongTermSession, Session},
    storage::{cache::CacheService, store::Store},
};

/// Long-term tokens are bearer credentials; 32 alphanumeric characters from
/// a CSPRNG (~190 bits) keep them unguessable.
const LONG_TERM_TOKEN_LEN: usize = 32;

/// Session lifecycle over Store + Cache: cache-aside reads, write-through
/// writes (store first, then cache).
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn Store>,
    cache: CacheService,
    config: AuthConfig,
}

impl SessionManager {
    pub fn new(store: Arc<dyn Store>, cache: CacheService, config: AuthConfig) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    pub async fn get_by_connection(&self, connection_id: &str) -> AppResult<Option<Session>> {
        if let Some(session) = self.cache.get_session(connection_id).await {
            return Ok(Some(session));
        }
        let session = self.store.find_session_by_connection(connection_id).await?;
        if let Some(session) = &session {
            self.cache.set_session(session, self.config.cache_ttl).await;
        }
        Ok(session)
    }

    pub async fn create(&self, session: &Session) -> AppResult<()> {
        self.save(session).await
    }

    pub async fn update(&self, session: &Session) -> AppResult<()> {
        self.save(session).await
    }

    async fn save(&self, session: &Session) -> AppResult<()> {
        self.store.upsert_session(session).await?;
        self.cache.set_session(session, self.config.cache_ttl).await;
        Ok(())
    }

    pub async fn delete(&self, connection_id: &str) -> AppResult<()> {
        self.store.delete_session(connection_id).await?;
        self.cache.invalidate_session(connection_id).await;
        Ok(())
    }

    pub async fn create_long_term(
        &self,
        phone: &str,
        name: &str,
        telegram_user_id: Option<i64>,
    ) -> AppResult<LongTermSession> {
        let now = Utc::now();
        let session = LongTermSession {
            token: generate_token(),
            phone: phone.to_string(),
            name: name.to_string(),
            telegram_user_id,
            created_at: now,
            expires_at: now + chrono_ttl(self.config.long_term_ttl),
        };
        self.store.create_long_term_session(&session).await?;
        self.cache
            .set_long_term(&session, self.config.long_term_ttl)
            .await;
        Ok(session)
    }

    pub async fn get_long_term(&self, token: &str) -> AppResult<Option<LongTermSession>> {
        if let Some(session) = self.cache.get_long_term(token).await {
            return Ok(Some(session));
        }
        let session = self.store.find_long_term_session(token).await?;
        if let Some(session) = &session {
            self.cache
                .set_long_term(session, self.config.long_term_ttl)
                .await;
        }
        Ok(session)
    }

    pub async fn delete_long_term(&self, token: &str) -> AppResult<()> {
        self.store.delete_long_term_session(token).await?;
        self.cache.invalidate_long_term(token).await;
        Ok(())
    }

    /// Pushes the token's expiry forward to `now + long_term_ttl`. Returns
    /// false when the token does not exist; that is a no-op, not an error.
    pub async fn extend_long_term(&self, token: &str) -> AppResult<bool> {
        let expires_at = Utc::now() + chrono_ttl(self.config.long_term_ttl);
        match self
            .store
            .extend_long_term_session(token, expires_at)
            .await?
        {
            Some(session) => {
                self.cache
                    .set_long_term(&session, self.config.long_term_ttl)
                    .await;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(LONG_TERM_TOKEN_LEN)
        .map(char::from)
        .collect()
}

pub(crate) fn chrono_ttl(ttl: Duration) -> chrono::Duration {
    chrono::Duration::seconds(ttl.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;

    fn manager() -> (SessionManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let config = AuthConfig {
            code_length: 4,
            code_ttl: Duration::from_secs(300),
            key_ttl: Duration::from_secs(300),
            session_ttl: Duration::from_secs(86400),
            long_term_ttl: Duration::from_secs(86400),
            cleanup_interval: Duration::from_secs(300),
            cache_ttl: Duration::from_secs(3600),
        };
        let manager = SessionManager::new(store.clone(), CacheService::in_memory(), config);
        (manager, store)
    }

    #[test]
    fn tokens_are_long_alphanumeric_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), LONG_TERM_TOKEN_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn session_roundtrip_and_delete() {
        let (manager, _store) = manager();
        let session = Session {
            connection_id: "conn-1".to_string(),
            phone: "+79817750018".to_string(),
            authorized: false,
            name: None,
            telegram_user_id: None,
            expires_at: Utc::now() + chrono::Duration::hours(24),
        };
        manager.create(&session).await.unwrap();

        let found = manager.get_by_connection("conn-1").await.unwrap().unwrap();
        assert_eq!(found.phone, "+79817750018");
        assert!(!found.authorized);

        manager.delete("conn-1").await.unwrap();
        assert!(manager.get_by_connection("conn-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn extend_refreshes_expiry_and_reports_missing_tokens() {
        let (manager, store) = manager();
        let created = manager
            .create_long_term("+79817750018", "Ivan", Some(100))
            .await
            .unwrap();

        // Age the record, then extend it back out.
        let aged = Utc::now() + chrono::Duration::minutes(1);
        store
            .extend_long_term_session(&created.token, aged)
            .await
            .unwrap();

        assert!(manager.extend_long_term(&created.token).await.unwrap());
        let refreshed = store
            .find_long_term_session(&created.token)
            .await
            .unwrap()
            .unwrap();
        assert!(refreshed.expires_at > aged);

        assert!(!manager.extend_long_term("missing-token").await.unwrap());
    }
}
