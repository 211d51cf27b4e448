use std::sync::Arc;

use axum::{routing::get, Router};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod error;
mod models;
mod phone;
mod qr;
mod services;
mod storage;
mod telegram;

use api::ws::WsHub;
use config::{Config, StoreBackend};
use services::{auth_flow::AuthFlowEngine, cleanup::CleanupScheduler, sessions::SessionManager};
use storage::{cache::CacheService, memory::MemoryStore, postgres::PgStore, store::Store};
use telegram::{client::BotClient, poller::BotPoller};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AuthFlowEngine>,
    pub ws_hub: Arc<WsHub>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tg_auth_gateway=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::load());
    tracing::info!("Starting server in {} mode", config.server.environment);

    // Initialize the store backend
    let (store, db): (Arc<dyn Store>, Option<sqlx::PgPool>) = match config.database.backend {
        StoreBackend::Postgres => {
            let db = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .connect(&config.database_url())
                .await?;
            tracing::info!("Connected to PostgreSQL");

            sqlx::migrate!("./migrations").run(&db).await?;
            tracing::info!("Database migrations completed");

            (Arc::new(PgStore::new(db.clone())), Some(db))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; data will not survive a restart");
            (Arc::new(MemoryStore::new()), None)
        }
    };

    // Initialize the cache; an unreachable Redis degrades to the in-process
    // map instead of failing startup
    let cache = if config.redis.enabled {
        CacheService::connect(&config.redis_url()).await
    } else {
        tracing::info!("Redis disabled, using in-process cache");
        CacheService::in_memory()
    };

    // Wire up the auth core
    let ws_hub = Arc::new(WsHub::new());
    let sessions = SessionManager::new(store.clone(), cache.clone(), config.auth.clone());
    let bot = Arc::new(BotClient::new(&config.telegram.bot_token)?);
    let engine = Arc::new(AuthFlowEngine::new(
        store.clone(),
        cache.clone(),
        sessions,
        bot.clone(),
        ws_hub.clone(),
        config.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Periodic sweep of expired rows
    let cleanup = CleanupScheduler::new(
        store.clone(),
        config.auth.cleanup_interval,
        shutdown_rx.clone(),
    );
    tokio::spawn(cleanup.run());

    // Bot long-polling
    if config.telegram.bot_token.is_empty() {
        tracing::warn!("TELEGRAM_BOT_TOKEN not set; bot transport disabled");
    } else {
        let poller = BotPoller::new(
            bot,
            engine.clone(),
            config.telegram.poll_timeout,
            shutdown_rx.clone(),
        );
        tokio::spawn(poller.run());
    }

    // Create app state
    let state = AppState { engine, ws_hub };

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(api::ws::handle_websocket))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown signal received");
            // Poller and cleanup loops observe this and exit
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // In-flight handlers have finished; close storage, then drop cached
    // state so nothing stale survives the restart
    if let Some(db) = db {
        db.close().await;
        tracing::info!("Database connections closed");
    }
    cache.flush().await;
    tracing::info!("Server stopped");

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}
