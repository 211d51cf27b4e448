use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    error::{AppError, AppResult},
    telegram::{MessageSender, SendOptions},
};

const API_BASE: &str = "https://api.telegram.org";

// Must exceed the getUpdates long-poll timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(45);

/// Minimal Telegram Bot API client. Only the methods this gateway needs:
/// `getUpdates` for inbound events and `sendMessage` for replies and codes.
pub struct BotClient {
    http: reqwest::Client,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<TgMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgMessage {
    pub from: Option<TgUser>,
    pub text: Option<String>,
    pub contact: Option<TgContact>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgUser {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
}

impl TgUser {
    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last_name) => format!("{} {}", self.first_name, last_name),
            None => self.first_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgContact {
    pub phone_number: String,
    pub user_id: Option<i64>,
}

impl BotClient {
    pub fn new(token: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            token: token.to_string(),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &impl Serialize,
    ) -> AppResult<T> {
        let url = format!("{}/bot{}/{}", API_BASE, self.token, method);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::Telegram(format!("{} request failed: {}", method, e)))?;

        let api: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| AppError::Telegram(format!("{} response malformed: {}", method, e)))?;

        if !api.ok {
            return Err(AppError::Telegram(format!(
                "{} rejected: {}",
                method,
                api.description.unwrap_or_else(|| "unknown error".to_string())
            )));
        }
        api.result
            .ok_or_else(|| AppError::Telegram(format!("{} returned empty result", method)))
    }

    pub async fn get_updates(&self, offset: i64, timeout: Duration) -> AppResult<Vec<Update>> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": timeout.as_secs(),
                "allowed_updates": ["message"],
            }),
        )
        .await
    }
}

#[async_trait]
impl MessageSender for BotClient {
    async fn send_message(
        &self,
        recipient_id: i64,
        text: &str,
        options: SendOptions,
    ) -> AppResult<()> {
        let mut body = json!({
            "chat_id": recipient_id,
            "text": text,
        });
        if options.request_contact {
            body["reply_markup"] = json!({
                "keyboard": [[{ "text": "📱 Share contact", "request_contact": true }]],
                "resize_keyboard": true,
                "one_time_keyboard": true,
            });
        }
        let _: TgMessage = self.call("sendMessage", &body).await?;
        Ok(())
    }
}
