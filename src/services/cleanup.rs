use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::sync::watch;

use crate::storage::store::Store;

/// Periodic removal of expired sessions, auth keys, codes and long-term
/// sessions from the store. Cache entries carry their own TTLs and need no
/// sweep. Safe to run interleaved with live requests: only rows already
/// past expiry are touched.
pub struct CleanupScheduler {
    store: Arc<dyn Store>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl CleanupScheduler {
    pub fn new(store: Arc<dyn Store>, interval: Duration, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            store,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            "Cleanup scheduler started, interval {}s",
            self.interval.as_secs()
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => break,
                _ = ticker.tick() => self.sweep().await,
            }
        }
        tracing::info!("Cleanup scheduler stopped");
    }

    // Per-entity failures are logged; one failing table never blocks the
    // others or the next tick.
    async fn sweep(&self) {
        let now = Utc::now();

        match self.store.delete_expired_sessions(now).await {
            Ok(0) => {}
            Ok(n) => tracing::info!("Removed {} expired sessions", n),
            Err(e) => tracing::warn!("Expired session cleanup failed: {}", e),
        }
        match self.store.delete_expired_auth_keys(now).await {
            Ok(0) => {}
            Ok(n) => tracing::info!("Removed {} expired auth keys", n),
            Err(e) => tracing::warn!("Expired auth key cleanup failed: {}", e),
        }
        match self.store.delete_expired_sms_codes(now).await {
            Ok(0) => {}
            Ok(n) => tracing::info!("Removed {} expired codes", n),
            Err(e) => tracing::warn!("Expired code cleanup failed: {}", e),
        }
        match self.store.delete_expired_long_term_sessions(now).await {
            Ok(0) => {}
            Ok(n) => tracing::info!("Removed {} expired long-term sessions", n),
            Err(e) => tracing::warn!("Expired long-term session cleanup failed: {}", e),
        }
    }
}
