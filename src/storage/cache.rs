use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;

use crate::models::{AuthKey, LongTermSession, Session, SmsCode, User};

/// Fast-path lookup layer in front of the store. Backed by Redis when
/// reachable; any operational failure degrades transparently to an
/// in-process map with the same TTL semantics. No operation ever surfaces
/// an error to callers.
#[derive(Clone)]
pub struct CacheService {
    redis: Option<MultiplexedConnection>,
    fallback: Arc<Mutex<HashMap<String, FallbackEntry>>>,
}

struct FallbackEntry {
    value: String,
    expires_at: Instant,
}

impl CacheService {
    /// Connects to Redis; on failure the service starts in fallback-only
    /// mode rather than failing construction.
    pub async fn connect(url: &str) -> Self {
        let redis = match Client::open(url) {
            Ok(client) => match client.get_multiplexed_async_connection().await {
                Ok(conn) => Some(conn),
                Err(e) => {
                    tracing::warn!("Redis unavailable, using in-process cache: {}", e);
                    None
                }
            },
            Err(e) => {
                tracing::warn!("Invalid Redis URL, using in-process cache: {}", e);
                None
            }
        };

        Self {
            redis,
            fallback: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fallback-only cache, used when Redis is disabled and in tests.
    pub fn in_memory() -> Self {
        Self {
            redis: None,
            fallback: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Discarding malformed cache entry {}: {}", key, e);
                self.del(key).await;
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Failed to serialize cache entry {}: {}", key, e);
                return false;
            }
        };

        if let Some(conn) = &self.redis {
            let mut conn = conn.clone();
            match conn.set_ex::<_, _, ()>(key, &raw, ttl.as_secs()).await {
                Ok(()) => return true,
                Err(e) => tracing::warn!("Redis SET {} failed, using fallback map: {}", key, e),
            }
        }

        let mut map = self.fallback.lock().await;
        map.insert(
            key.to_string(),
            FallbackEntry {
                value: raw,
                expires_at: Instant::now() + ttl,
            },
        );
        true
    }

    pub async fn del(&self, key: &str) -> bool {
        if let Some(conn) = &self.redis {
            let mut conn = conn.clone();
            if let Err(e) = conn.del::<_, ()>(key).await {
                tracing::warn!("Redis DEL {} failed: {}", key, e);
            }
        }
        // The fallback map may hold an entry written during a Redis outage.
        self.fallback.lock().await.remove(key);
        true
    }

    pub async fn exists(&self, key: &str) -> bool {
        if let Some(conn) = &self.redis {
            let mut conn = conn.clone();
            match conn.exists::<_, bool>(key).await {
                Ok(found) => return found,
                Err(e) => tracing::warn!("Redis EXISTS {} failed, using fallback map: {}", key, e),
            }
        }
        self.get_raw_fallback(key).await.is_some()
    }

    pub async fn flush(&self) -> bool {
        if let Some(conn) = &self.redis {
            let mut conn = conn.clone();
            if let Err(e) = redis::cmd("FLUSHALL").query_async::<_, ()>(&mut conn).await {
                tracing::warn!("Redis FLUSHALL failed: {}", e);
            }
        }
        self.fallback.lock().await.clear();
        true
    }

    async fn get_raw(&self, key: &str) -> Option<String> {
        if let Some(conn) = &self.redis {
            let mut conn = conn.clone();
            match conn.get::<_, Option<String>>(key).await {
                Ok(value) => return value,
                Err(e) => tracing::warn!("Redis GET {} failed, using fallback map: {}", key, e),
            }
        }
        self.get_raw_fallback(key).await
    }

    // Expiry is lazy: entries past their TTL are dropped on first read.
    async fn get_raw_fallback(&self, key: &str) -> Option<String> {
        let mut map = self.fallback.lock().await;
        match map.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }

    // Typed helpers, one key namespace per entity.

    pub async fn get_user_by_phone(&self, phone: &str) -> Option<User> {
        self.get(&format!("user:phone:{}", phone)).await
    }

    pub async fn set_user(&self, user: &User, ttl: Duration) -> bool {
        self.set(&format!("user:phone:{}", user.phone), user, ttl)
            .await
    }

    pub async fn invalidate_user(&self, phone: &str) -> bool {
        self.del(&format!("user:phone:{}", phone)).await
    }

    pub async fn get_session(&self, connection_id: &str) -> Option<Session> {
        self.get(&format!("session:conn:{}", connection_id)).await
    }

    pub async fn set_session(&self, session: &Session, ttl: Duration) -> bool {
        self.set(
            &format!("session:conn:{}", session.connection_id),
            session,
            ttl,
        )
        .await
    }

    pub async fn invalidate_session(&self, connection_id: &str) -> bool {
        self.del(&format!("session:conn:{}", connection_id)).await
    }

    pub async fn get_auth_key(&self, key: &str) -> Option<AuthKey> {
        self.get(&format!("authkey:{}", key)).await
    }

    pub async fn set_auth_key(&self, auth_key: &AuthKey, ttl: Duration) -> bool {
        self.set(&format!("authkey:{}", auth_key.key), auth_key, ttl)
            .await
    }

    pub async fn invalidate_auth_key(&self, key: &str) -> bool {
        self.del(&format!("authkey:{}", key)).await
    }

    pub async fn get_sms_code(&self, phone: &str) -> Option<SmsCode> {
        self.get(&format!("smscode:{}", phone)).await
    }

    pub async fn set_sms_code(&self, code: &SmsCode, ttl: Duration) -> bool {
        self.set(&format!("smscode:{}", code.phone), code, ttl).await
    }

    pub async fn invalidate_sms_code(&self, phone: &str) -> bool {
        self.del(&format!("smscode:{}", phone)).await
    }

    pub async fn get_long_term(&self, token: &str) -> Option<LongTermSession> {
        self.get(&format!("longterm:{}", token)).await
    }

    pub async fn set_long_term(&self, session: &LongTermSession, ttl: Duration) -> bool {
        self.set(&format!("longterm:{}", session.token), session, ttl)
            .await
    }

    pub async fn invalidate_long_term(&self, token: &str) -> bool {
        self.del(&format!("longterm:{}", token)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_roundtrip() {
        let cache = CacheService::in_memory();
        assert!(
            cache
                .set("k", &"value".to_string(), Duration::from_secs(60))
                .await
        );
        assert_eq!(cache.get::<String>("k").await.as_deref(), Some("value"));
        assert!(cache.exists("k").await);
    }

    #[tokio::test]
    async fn expired_entries_are_absent_and_removed() {
        let cache = CacheService::in_memory();
        cache
            .set("k", &"value".to_string(), Duration::from_millis(10))
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get::<String>("k").await, None);
        assert!(!cache.exists("k").await);
    }

    #[tokio::test]
    async fn del_and_flush_remove_entries() {
        let cache = CacheService::in_memory();
        cache
            .set("a", &"1".to_string(), Duration::from_secs(60))
            .await;
        cache
            .set("b", &"2".to_string(), Duration::from_secs(60))
            .await;

        cache.del("a").await;
        assert_eq!(cache.get::<String>("a").await, None);
        assert!(cache.exists("b").await);

        cache.flush().await;
        assert!(!cache.exists("b").await);
    }

    #[tokio::test]
    async fn typed_helpers_use_entity_keys() {
        let cache = CacheService::in_memory();
        let user = User {
            phone: "+79817750018".to_string(),
            name: "Test".to_string(),
            telegram_user_id: Some(42),
            last_auth_at: chrono::Utc::now(),
        };
        cache.set_user(&user, Duration::from_secs(60)).await;

        let cached = cache.get_user_by_phone("+79817750018").await.unwrap();
        assert_eq!(cached.telegram_user_id, Some(42));

        cache.invalidate_user("+79817750018").await;
        assert!(cache.get_user_by_phone("+79817750018").await.is_none());
    }
}
