pub mod client;
pub mod poller;

use async_trait::async_trait;

use crate::error::AppResult;

/// Options for an outbound bot message.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Attach a one-time keyboard with a "share contact" button.
    pub request_contact: bool,
}

/// Outbound message delivery to a Telegram user. The engine treats delivery
/// failures as non-fatal for already-persisted state.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(
        &self,
        recipient_id: i64,
        text: &str,
        options: SendOptions,
    ) -> AppResult<()>;
}

/// Inbound bot events, translated from raw Bot API updates by the poller.
/// The auth engine never sees the provider's wire format.
#[derive(Debug, Clone)]
pub enum BotEvent {
    /// `/start <key>` deep link opened from the site.
    StartWithKey {
        telegram_user_id: i64,
        name: String,
        key: String,
    },
    /// Bare `/start`, no key.
    Start { telegram_user_id: i64 },
    /// Contact card shared via the request-contact keyboard.
    ContactShared {
        telegram_user_id: i64,
        name: String,
        phone: String,
    },
    /// Any other plain text: a typed code or a typed phone number.
    Text {
        telegram_user_id: i64,
        name: String,
        text: String,
    },
}
