use std::{sync::Arc, time::Duration};

use tokio::sync::watch;

use crate::{
    services::auth_flow::AuthFlowEngine,
    telegram::{
        client::{BotClient, Update},
        BotEvent,
    },
};

const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Long-polls `getUpdates` and feeds translated events to the auth engine,
/// one spawned task per event so a slow handler never stalls the poll loop.
pub struct BotPoller {
    client: Arc<BotClient>,
    engine: Arc<AuthFlowEngine>,
    poll_timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

impl BotPoller {
    pub fn new(
        client: Arc<BotClient>,
        engine: Arc<AuthFlowEngine>,
        poll_timeout: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            engine,
            poll_timeout,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("Telegram bot polling started");
        let mut offset = 0i64;

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => break,
                result = self.client.get_updates(offset, self.poll_timeout) => match result {
                    Ok(updates) => {
                        for update in updates {
                            offset = offset.max(update.update_id + 1);
                            if let Some(event) = translate(update) {
                                let engine = self.engine.clone();
                                tokio::spawn(async move {
                                    engine.handle_bot_event(event).await;
                                });
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!("getUpdates failed, backing off: {}", e);
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                },
            }
        }

        tracing::info!("Telegram bot polling stopped");
    }
}

/// Maps a raw update onto one of the inbound event shapes the engine
/// handles. Updates without a sender, and commands other than `/start`, are
/// dropped.
fn translate(update: Update) -> Option<BotEvent> {
    let message = update.message?;
    let from = message.from?;
    let telegram_user_id = from.id;
    let name = from.full_name();

    if let Some(contact) = message.contact {
        // The card carries the owner's id; fall back to the sender.
        return Some(BotEvent::ContactShared {
            telegram_user_id: contact.user_id.unwrap_or(telegram_user_id),
            name,
            phone: contact.phone_number,
        });
    }

    let text = message.text?.trim().to_string();
    if let Some(rest) = text.strip_prefix("/start") {
        let key = rest.trim();
        return Some(if key.is_empty() {
            BotEvent::Start { telegram_user_id }
        } else {
            BotEvent::StartWithKey {
                telegram_user_id,
                name,
                key: key.to_string(),
            }
        });
    }
    if text.starts_with('/') {
        return None;
    }

    Some(BotEvent::Text {
        telegram_user_id,
        name,
        text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::client::{TgContact, TgMessage, TgUser};

    fn update(message: TgMessage) -> Update {
        Update {
            update_id: 1,
            message: Some(message),
        }
    }

    fn from_user() -> Option<TgUser> {
        Some(TgUser {
            id: 100,
            first_name: "Ivan".to_string(),
            last_name: Some("Petrov".to_string()),
        })
    }

    #[test]
    fn start_with_key_is_extracted() {
        let event = translate(update(TgMessage {
            from: from_user(),
            text: Some("/start abc12345".to_string()),
            contact: None,
        }));
        match event {
            Some(BotEvent::StartWithKey {
                telegram_user_id,
                name,
                key,
            }) => {
                assert_eq!(telegram_user_id, 100);
                assert_eq!(name, "Ivan Petrov");
                assert_eq!(key, "abc12345");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn bare_start_has_no_key() {
        let event = translate(update(TgMessage {
            from: from_user(),
            text: Some("/start".to_string()),
            contact: None,
        }));
        assert!(matches!(event, Some(BotEvent::Start { telegram_user_id: 100 })));
    }

    #[test]
    fn contact_beats_text() {
        let event = translate(update(TgMessage {
            from: from_user(),
            text: Some("ignored".to_string()),
            contact: Some(TgContact {
                phone_number: "79817750018".to_string(),
                user_id: Some(100),
            }),
        }));
        assert!(matches!(
            event,
            Some(BotEvent::ContactShared { ref phone, .. }) if phone == "79817750018"
        ));
    }

    #[test]
    fn other_commands_and_senderless_updates_are_dropped() {
        assert!(translate(update(TgMessage {
            from: from_user(),
            text: Some("/help".to_string()),
            contact: None,
        }))
        .is_none());
        assert!(translate(update(TgMessage {
            from: None,
            text: Some("1234".to_string()),
            contact: None,
        }))
        .is_none());
    }

    #[test]
    fn plain_text_passes_through() {
        let event = translate(update(TgMessage {
            from: from_user(),
            text: Some(" 1234 ".to_string()),
            contact: None,
        }));
        assert!(matches!(
            event,
            Some(BotEvent::Text { ref text, .. }) if text == "1234"
        ));
    }
}
