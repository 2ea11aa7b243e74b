//! Telegram Bot API HTTP client.

use crate::error::TelegramError;
use crate::types::*;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, instrument, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.telegram.org";

/// Telegram Bot API client.
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    base_url: String,
    bot_token: SecretString,
}

impl TelegramClient {
    pub fn new(
        bot_token: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TelegramError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bot_token: SecretString::new(bot_token.into()),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.base_url,
            self.bot_token.expose_secret(),
            method
        )
    }

    /// Send an HTML-formatted message to a chat.
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<Message, TelegramError> {
        let request = SendMessageRequest {
            chat_id,
            text,
            parse_mode: Some(ParseMode::Html),
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&request)
            .send()
            .await?;

        let message: Message = self.handle_response(response).await?;
        debug!("Sent message {} to chat {}", message.message_id, message.chat.id);
        Ok(message)
    }

    /// Fetch the bot's own account.
    #[instrument(skip(self))]
    pub async fn get_me(&self) -> Result<User, TelegramError> {
        let response = self.client.get(self.method_url("getMe")).send().await?;
        self.handle_response(response).await
    }

    /// Health check - returns true if the token is accepted.
    pub async fn health_check(&self) -> bool {
        self.get_me().await.is_ok()
    }

    /// Unwrap the `{ok, result, description}` envelope.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, TelegramError> {
        let status = response.status();
        let body = response.text().await?;

        let envelope: ApiResponse<T> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => return Err(e.into()),
            Err(_) => {
                return Err(TelegramError::Api {
                    status: status.as_u16(),
                    description: body,
                })
            }
        };

        if let (true, Some(result)) = (envelope.ok, envelope.result) {
            return Ok(result);
        }

        let description = envelope
            .description
            .unwrap_or_else(|| "Unknown error".into());

        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = envelope.parameters.and_then(|p| p.retry_after);
                warn!("Telegram rate limit, retry after {:?}s", retry_after);
                Err(TelegramError::RateLimit { retry_after })
            }
            StatusCode::UNAUTHORIZED => {
                warn!("Telegram rejected the bot token");
                Err(TelegramError::Unauthorized)
            }
            _ => Err(TelegramError::Api {
                status: envelope.error_code.unwrap_or(status.as_u16()),
                description,
            }),
        }
    }
}
