use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub telegram: TelegramConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub bot_username: String,
    pub poll_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub code_length: usize,
    pub code_ttl: Duration,
    pub key_ttl: Duration,
    pub session_ttl: Duration,
    pub long_term_ttl: Duration,
    pub cleanup_interval: Duration,
    pub cache_ttl: Duration,
}

impl Config {
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(3000),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            },
            database: DatabaseConfig {
                backend: match env::var("DB_BACKEND").as_deref() {
                    Ok("memory") => StoreBackend::Memory,
                    _ => StoreBackend::Postgres,
                },
                host: env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: env::var("DB_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(5432),
                user: env::var("DB_USER").unwrap_or_else(|_| "postgres".to_string()),
                password: env::var("DB_PASSWORD").unwrap_or_else(|_| "postgres".to_string()),
                database: env::var("DB_NAME").unwrap_or_else(|_| "tg_auth".to_string()),
                max_connections: env::var("DB_MAX_CONNS")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(25),
            },
            redis: RedisConfig {
                enabled: env::var("REDIS_ENABLED")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(true),
                host: env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: env::var("REDIS_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(6379),
                password: env::var("REDIS_PASSWORD").ok(),
                db: env::var("REDIS_DB")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(0),
            },
            telegram: TelegramConfig {
                bot_token: env::var("TELEGRAM_BOT_TOKEN").unwrap_or_default(),
                bot_username: env::var("BOT_USERNAME").unwrap_or_else(|_| "autor1z_bot".to_string()),
                poll_timeout: Duration::from_secs(
                    env::var("TELEGRAM_POLL_TIMEOUT")
                        .ok()
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(30),
                ),
            },
            auth: AuthConfig {
                code_length: env::var("SMS_CODE_LENGTH")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(4),
                code_ttl: Duration::from_secs(
                    env::var("SMS_CODE_TTL")
                        .ok()
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(5 * 60), // 5 minutes
                ),
                key_ttl: Duration::from_secs(
                    env::var("AUTH_KEY_TTL")
                        .ok()
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(5 * 60), // 5 minutes
                ),
                session_ttl: Duration::from_secs(
                    env::var("SESSION_TTL")
                        .ok()
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(24 * 60 * 60), // 24 hours
                ),
                long_term_ttl: Duration::from_secs(
                    env::var("LONG_TERM_SESSION_TTL")
                        .ok()
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(24 * 60 * 60), // 24 hours
                ),
                cleanup_interval: Duration::from_secs(
                    env::var("CLEANUP_INTERVAL")
                        .ok()
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(5 * 60), // 5 minutes
                ),
                cache_ttl: Duration::from_secs(
                    env::var("CACHE_TTL")
                        .ok()
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(60 * 60), // 1 hour
                ),
            },
        }
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.database.user,
            self.database.password,
            self.database.host,
            self.database.port,
            self.database.database,
        )
    }

    pub fn redis_url(&self) -> String {
        match &self.redis.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.redis.host, self.redis.port, self.redis.db
            ),
            None => format!(
                "redis://{}:{}/{}",
                self.redis.host, self.redis.port, self.redis.db
            ),
        }
    }
}
