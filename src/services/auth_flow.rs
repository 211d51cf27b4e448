use std::{
    collections::hash_map::Entry,
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;

use crate::{
    api::events::ServerEvent,
    config::Config,
    error::{AppError, AppResult},
    models::{AuthKey, Session, SmsCode, User},
    phone, qr,
    services::sessions::{chrono_ttl, SessionManager},
    storage::{cache::CacheService, store::Store},
    telegram::{BotEvent, MessageSender, SendOptions},
};

const AUTH_KEY_LEN: usize = 8;

// Upstream transports may redeliver the same contact message; duplicates
// within this window are ignored.
const CONTACT_DEDUP_WINDOW: Duration = Duration::from_secs(10);

/// Channel back to connected web clients, keyed by connection id. Emission
/// is fire-and-forget; the implementation logs delivery problems.
#[async_trait]
pub trait ClientChannel: Send + Sync {
    async fn emit(&self, connection_id: &str, event: ServerEvent);
}

/// The authentication state machine. Per phone number the flow runs
/// `requestAuth -> {code path | key+contact path} -> verify -> authSuccess`,
/// ending in an authorized per-connection session plus a renewable
/// long-term token.
pub struct AuthFlowEngine {
    store: Arc<dyn Store>,
    cache: CacheService,
    sessions: SessionManager,
    sender: Arc<dyn MessageSender>,
    channel: Arc<dyn ClientChannel>,
    config: Arc<Config>,
    recent_contacts: Mutex<HashMap<(i64, String), Instant>>,
}

impl AuthFlowEngine {
    pub fn new(
        store: Arc<dyn Store>,
        cache: CacheService,
        sessions: SessionManager,
        sender: Arc<dyn MessageSender>,
        channel: Arc<dyn ClientChannel>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            cache,
            sessions,
            sender,
            channel,
            config,
            recent_contacts: Mutex::new(HashMap::new()),
        }
    }

    /// Entry point of the flow. Known users with a linked Telegram identity
    /// get a one-time code in their Telegram chat; everyone else gets a
    /// deep link + QR code that opens the bot.
    pub async fn request_auth(&self, connection_id: &str, raw_phone: &str) -> AppResult<()> {
        if raw_phone.trim().is_empty() {
            return Err(AppError::PhoneMissing);
        }
        let phone = phone::normalize(raw_phone);
        if !phone::is_canonical(&phone) {
            tracing::warn!("Rejecting non-canonical phone {:?} -> {:?}", raw_phone, phone);
            return Err(AppError::InvalidPhone);
        }

        match self.find_user(&phone).await? {
            Some(user) if user.telegram_user_id.is_some() => {
                self.issue_sms_code(connection_id, &user).await
            }
            _ => self.issue_auth_key(connection_id, &phone).await,
        }
    }

    /// Checks a code submitted from the web client against the stored one.
    /// Consumption is atomic: with two concurrent verifications of the same
    /// code exactly one succeeds, the other fails with `CodeAlreadyUsed`.
    pub async fn verify_code(
        &self,
        connection_id: &str,
        raw_phone: &str,
        submitted: &str,
    ) -> AppResult<()> {
        if raw_phone.trim().is_empty() {
            return Err(AppError::PhoneMissing);
        }
        if submitted.trim().is_empty() {
            return Err(AppError::CodeMissing);
        }
        let phone = phone::normalize(raw_phone);

        let code = match self.cache.get_sms_code(&phone).await {
            Some(code) => Some(code),
            None => self.store.find_sms_code(&phone).await?,
        };
        let code = code.ok_or(AppError::CodeNotFound)?;
        if code.used {
            return Err(AppError::CodeAlreadyUsed);
        }
        if code.is_expired(Utc::now()) {
            return Err(AppError::CodeExpired);
        }
        // Trimmed string comparison on both sides; codes are never compared
        // as numbers.
        if submitted.trim() != code.code.trim() {
            return Err(AppError::InvalidCode);
        }

        let user = self.find_user(&phone).await?.ok_or(AppError::UserNotFound)?;

        if !self.store.consume_sms_code(&phone).await? {
            return Err(AppError::CodeAlreadyUsed);
        }
        self.cache.invalidate_sms_code(&phone).await;

        self.authorize_connection(connection_id, &phone, &user.name, user.telegram_user_id)
            .await
    }

    /// Completes the new-user flow when the bot receives a contact card (or
    /// a typed phone number). All outcomes are reported back through the
    /// bot chat; success additionally notifies the originating connection.
    pub async fn complete_via_contact(
        &self,
        telegram_user_id: i64,
        user_name: &str,
        contact_phone: &str,
    ) -> AppResult<()> {
        let phone = phone::normalize(contact_phone);

        if !self.claim_contact(telegram_user_id, &phone) {
            tracing::debug!(
                "Ignoring duplicate contact delivery from telegram user {}",
                telegram_user_id
            );
            return Ok(());
        }

        match self
            .try_complete_contact(telegram_user_id, user_name, &phone)
            .await
        {
            Ok(()) => {
                self.reply(
                    telegram_user_id,
                    &format!("✅ Authorization successful! Welcome, {}!", user_name),
                )
                .await;
                tracing::info!("Contact authorization completed for {}", phone);
                Ok(())
            }
            Err(AppError::KeyNotFound) => {
                self.reply(
                    telegram_user_id,
                    &format!(
                        "❌ Number {} is not part of any active authorization request.\n\n\
                         Make sure you opened the link from the site and shared the same \
                         number you entered there.",
                        phone
                    ),
                )
                .await;
                Ok(())
            }
            Err(AppError::KeyExpired) => {
                self.reply(
                    telegram_user_id,
                    "❌ This authorization request has expired. Get a new link on the site.",
                )
                .await;
                Ok(())
            }
            Err(AppError::KeyAlreadyUsed) => {
                self.reply(telegram_user_id, "❌ This auth key was already used.")
                    .await;
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    async fn try_complete_contact(
        &self,
        telegram_user_id: i64,
        user_name: &str,
        phone: &str,
    ) -> AppResult<()> {
        let auth_key = self
            .store
            .find_latest_auth_key_by_phone(phone)
            .await?
            .ok_or(AppError::KeyNotFound)?;
        if auth_key.is_expired(Utc::now()) {
            return Err(AppError::KeyExpired);
        }
        // Lost races against a concurrent delivery of the same key land
        // here too.
        if !self.store.consume_auth_key(&auth_key.key).await? {
            return Err(AppError::KeyAlreadyUsed);
        }
        self.cache.invalidate_auth_key(&auth_key.key).await;

        self.authorize_connection(
            &auth_key.connection_id,
            phone,
            user_name,
            Some(telegram_user_id),
        )
        .await
    }

    /// Silent re-authorization on (re)connect. A valid long-term token wins
    /// and is refreshed; otherwise an authorized session for this
    /// connection id is enough. With neither, nothing is emitted.
    pub async fn check_auth(&self, connection_id: &str, token: Option<&str>) -> AppResult<()> {
        if let Some(token) = token {
            if let Some(long_term) = self.sessions.get_long_term(token).await? {
                if long_term.is_expired(Utc::now()) {
                    // Lazy expiry of the stale token.
                    self.sessions.delete_long_term(token).await?;
                } else {
                    let session = Session {
                        connection_id: connection_id.to_string(),
                        phone: long_term.phone.clone(),
                        authorized: true,
                        name: Some(long_term.name.clone()),
                        telegram_user_id: long_term.telegram_user_id,
                        expires_at: Utc::now() + chrono_ttl(self.config.auth.session_ttl),
                    };
                    self.sessions.update(&session).await?;
                    self.sessions.extend_long_term(token).await?;
                    self.channel
                        .emit(
                            connection_id,
                            ServerEvent::AlreadyAuthorized {
                                phone: long_term.phone,
                                name: long_term.name,
                                session_token: Some(long_term.token),
                            },
                        )
                        .await;
                    return Ok(());
                }
            }
        }

        if let Some(session) = self.sessions.get_by_connection(connection_id).await? {
            if session.authorized && !session.is_expired(Utc::now()) {
                self.channel
                    .emit(
                        connection_id,
                        ServerEvent::AlreadyAuthorized {
                            phone: session.phone,
                            name: session.name.unwrap_or_default(),
                            session_token: None,
                        },
                    )
                    .await;
            }
        }
        Ok(())
    }

    /// Connection-scoped logout. The long-term session deliberately
    /// survives; full revocation is a separate concern.
    pub async fn logout(&self, connection_id: &str) -> AppResult<()> {
        self.sessions.delete(connection_id).await?;
        self.channel
            .emit(connection_id, ServerEvent::LogoutSuccess)
            .await;
        tracing::info!("Logged out connection {}", connection_id);
        Ok(())
    }

    /// Drops the current session and, for users with a linked Telegram
    /// identity, immediately issues a fresh code.
    pub async fn reset_session(&self, connection_id: &str) -> AppResult<()> {
        let Some(session) = self.sessions.get_by_connection(connection_id).await? else {
            return Ok(());
        };
        self.sessions.delete(connection_id).await?;
        self.channel
            .emit(connection_id, ServerEvent::SessionReset)
            .await;

        if let Some(user) = self.find_user(&session.phone).await? {
            if user.telegram_user_id.is_some() {
                self.issue_sms_code(connection_id, &user).await?;
            }
        }
        Ok(())
    }

    /// Inbound bot events from the transport adapter. Errors end here: they
    /// are logged, never crash the poller.
    pub async fn handle_bot_event(&self, event: BotEvent) {
        let result = match event {
            BotEvent::Start { telegram_user_id } => self.handle_start(telegram_user_id).await,
            BotEvent::StartWithKey {
                telegram_user_id,
                key,
                ..
            } => self.handle_start_with_key(telegram_user_id, &key).await,
            BotEvent::ContactShared {
                telegram_user_id,
                name,
                phone,
            } => {
                self.complete_via_contact(telegram_user_id, &name, &phone)
                    .await
            }
            BotEvent::Text {
                telegram_user_id,
                name,
                text,
            } => self.handle_bot_text(telegram_user_id, &name, &text).await,
        };
        if let Err(e) = result {
            tracing::error!("Bot event handling failed: {}", e);
        }
    }

    async fn handle_start(&self, telegram_user_id: i64) -> AppResult<()> {
        let greeting = match self.store.find_user_by_telegram_id(telegram_user_id).await? {
            Some(user) => format!(
                "🤖 Authorization bot\n\nYou are registered as {} ({}).\n\
                 To sign in, open the link from the site.",
                user.name, user.phone
            ),
            None => format!(
                "🤖 Authorization bot\n\nTo sign in, open the link from the site.\n\n\
                 Your ID: {}",
                telegram_user_id
            ),
        };
        self.reply(telegram_user_id, &greeting).await;
        Ok(())
    }

    async fn handle_start_with_key(&self, telegram_user_id: i64, key: &str) -> AppResult<()> {
        let auth_key = match self.cache.get_auth_key(key).await {
            Some(auth_key) => Some(auth_key),
            None => self.store.find_auth_key(key).await?,
        };
        match auth_key {
            Some(auth_key) if !auth_key.used && !auth_key.is_expired(Utc::now()) => {
                self.store.attach_telegram_user(key, telegram_user_id).await?;
                self.cache.invalidate_auth_key(key).await;
                if let Err(e) = self
                    .sender
                    .send_message(
                        telegram_user_id,
                        &format!(
                            "🔐 Authorization\n\nKey: {}\nExpected number: {}\n\n\
                             Tap the button below to share your contact, or type your \
                             phone number:",
                            auth_key.key, auth_key.phone
                        ),
                        SendOptions {
                            request_contact: true,
                        },
                    )
                    .await
                {
                    tracing::warn!("Failed to send contact request: {}", e);
                }
            }
            _ => {
                self.reply(
                    telegram_user_id,
                    "❌ Invalid or expired auth key\n\nGet a new link on the site",
                )
                .await;
            }
        }
        Ok(())
    }

    // A plain text message is either a code or a phone number; the shapes
    // are mutually exclusive. Anything else is ignored.
    async fn handle_bot_text(
        &self,
        telegram_user_id: i64,
        name: &str,
        text: &str,
    ) -> AppResult<()> {
        let text = text.trim();
        if looks_like_code(text, self.config.auth.code_length) {
            self.verify_code_from_bot(telegram_user_id, name, text).await
        } else if looks_like_phone(text) {
            // A typed number completes the flow the same way a contact
            // card does.
            self.complete_via_contact(telegram_user_id, name, text).await
        } else {
            Ok(())
        }
    }

    async fn verify_code_from_bot(
        &self,
        telegram_user_id: i64,
        name: &str,
        submitted: &str,
    ) -> AppResult<()> {
        let Some(code) = self.store.find_sms_code_by_code(submitted).await? else {
            self.reply(
                telegram_user_id,
                "❌ Invalid code.\n\nMake sure the code is correct and was requested on the site.",
            )
            .await;
            return Ok(());
        };
        if code.is_expired(Utc::now()) {
            self.reply(
                telegram_user_id,
                "❌ The code has expired. Request a new one on the site.",
            )
            .await;
            return Ok(());
        }
        if !self.store.consume_sms_code(&code.phone).await? {
            self.reply(telegram_user_id, "❌ This code was already used.")
                .await;
            return Ok(());
        }
        self.cache.invalidate_sms_code(&code.phone).await;

        self.authorize_connection(
            &code.connection_id,
            &code.phone,
            name,
            Some(telegram_user_id),
        )
        .await?;
        self.reply(
            telegram_user_id,
            &format!("✅ Authorization successful! Welcome, {}!", name),
        )
        .await;
        Ok(())
    }

    async fn find_user(&self, phone: &str) -> AppResult<Option<User>> {
        if let Some(user) = self.cache.get_user_by_phone(phone).await {
            return Ok(Some(user));
        }
        let user = self.store.find_user_by_phone(phone).await?;
        if let Some(user) = &user {
            self.cache.set_user(user, self.config.auth.cache_ttl).await;
        }
        Ok(user)
    }

    // Keyed by phone, so this overwrites any previous code for the number.
    // The code stays persisted even when delivery fails: the client sees an
    // authError and a retry simply overwrites.
    async fn issue_sms_code(&self, connection_id: &str, user: &User) -> AppResult<()> {
        let recipient = match user.telegram_user_id {
            Some(id) => id,
            None => return Err(AppError::UserNotFound),
        };

        let now = Utc::now();
        let code = SmsCode {
            phone: user.phone.clone(),
            code: generate_code(self.config.auth.code_length),
            connection_id: connection_id.to_string(),
            created_at: now,
            expires_at: now + chrono_ttl(self.config.auth.code_ttl),
            used: false,
        };
        self.store.upsert_sms_code(&code).await?;
        self.cache
            .set_sms_code(&code, self.config.auth.code_ttl)
            .await;

        self.sender
            .send_message(
                recipient,
                &format!(
                    "🔐 Authorization code: {}\n\nEnter this code on the site to sign in.",
                    code.code
                ),
                SendOptions::default(),
            )
            .await?;
        tracing::info!("Authorization code sent to telegram user {}", recipient);

        self.channel
            .emit(
                connection_id,
                ServerEvent::SmsCodeSent {
                    phone: user.phone.clone(),
                },
            )
            .await;
        Ok(())
    }

    async fn issue_auth_key(&self, connection_id: &str, phone: &str) -> AppResult<()> {
        let now = Utc::now();
        let auth_key = AuthKey {
            key: generate_auth_key(),
            phone: phone.to_string(),
            connection_id: connection_id.to_string(),
            created_at: now,
            expires_at: now + chrono_ttl(self.config.auth.key_ttl),
            used: false,
            pending_telegram_user_id: None,
        };
        self.store.create_auth_key(&auth_key).await?;
        self.cache
            .set_auth_key(&auth_key, self.config.auth.key_ttl)
            .await;

        let session = Session {
            connection_id: connection_id.to_string(),
            phone: phone.to_string(),
            authorized: false,
            name: None,
            telegram_user_id: None,
            expires_at: now + chrono_ttl(self.config.auth.session_ttl),
        };
        self.sessions.create(&session).await?;

        let link = format!(
            "https://t.me/{}?start={}",
            self.config.telegram.bot_username, auth_key.key
        );
        let qr_code = match qr::render_data_url(&link) {
            Ok(data_url) => Some(data_url),
            Err(e) => {
                tracing::warn!("QR rendering failed, sending link only: {}", e);
                None
            }
        };
        tracing::info!("Issued auth key {} for {}", auth_key.key, phone);

        self.channel
            .emit(
                connection_id,
                ServerEvent::AuthKey {
                    key: auth_key.key,
                    link,
                    qr_code,
                },
            )
            .await;
        Ok(())
    }

    /// Shared tail of every successful verification: refreshed user record,
    /// authorized session (name and telegram identity populated in the same
    /// write), fresh long-term token, `authSuccess` to the client.
    async fn authorize_connection(
        &self,
        connection_id: &str,
        phone: &str,
        name: &str,
        telegram_user_id: Option<i64>,
    ) -> AppResult<()> {
        let now = Utc::now();
        let user = User {
            phone: phone.to_string(),
            name: name.to_string(),
            telegram_user_id,
            last_auth_at: now,
        };
        self.store.upsert_user(&user).await?;
        self.cache.set_user(&user, self.config.auth.cache_ttl).await;

        let session = Session {
            connection_id: connection_id.to_string(),
            phone: phone.to_string(),
            authorized: true,
            name: Some(name.to_string()),
            telegram_user_id,
            expires_at: now + chrono_ttl(self.config.auth.session_ttl),
        };
        self.sessions.update(&session).await?;

        let long_term = self
            .sessions
            .create_long_term(phone, name, telegram_user_id)
            .await?;

        self.channel
            .emit(
                connection_id,
                ServerEvent::AuthSuccess {
                    phone: phone.to_string(),
                    name: name.to_string(),
                    session_token: long_term.token,
                },
            )
            .await;
        tracing::info!(
            "Authorization successful for {} on connection {}",
            phone,
            connection_id
        );
        Ok(())
    }

    // Best-effort bot reply; delivery failures are logged, never propagated.
    async fn reply(&self, telegram_user_id: i64, text: &str) {
        if let Err(e) = self
            .sender
            .send_message(telegram_user_id, text, SendOptions::default())
            .await
        {
            tracing::warn!("Failed to reply to telegram user {}: {}", telegram_user_id, e);
        }
    }

    // True when this (telegram user, phone) pair has not been processed
    // within the dedup window. Stale entries are pruned on the way.
    fn claim_contact(&self, telegram_user_id: i64, phone: &str) -> bool {
        let mut recent = self.recent_contacts.lock().unwrap();
        let now = Instant::now();
        recent.retain(|_, seen| now.duration_since(*seen) < CONTACT_DEDUP_WINDOW);
        match recent.entry((telegram_user_id, phone.to_string())) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }
}

fn generate_auth_key() -> String {
    use rand::distributions::Alphanumeric;
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(AUTH_KEY_LEN)
        .map(char::from)
        .collect()
}

// Uniform draw over the full fixed-length range, e.g. 1000..=9999.
fn generate_code(length: usize) -> String {
    let low = 10u32.pow(length as u32 - 1);
    rand::thread_rng().gen_range(low..low * 10).to_string()
}

fn looks_like_code(text: &str, length: usize) -> bool {
    text.len() == length && text.chars().all(|c| c.is_ascii_digit())
}

// ^\+?[1-9]\d{1,14}$
fn looks_like_phone(text: &str) -> bool {
    let digits = text.strip_prefix('+').unwrap_or(text);
    (2..=15).contains(&digits.len())
        && !digits.starts_with('0')
        && digits.chars().all(|c| c.is_ascii_digit())
}
