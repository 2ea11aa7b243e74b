//! Telegram client errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelegramError {
    /// Transport failure. The request URL is stripped since it embeds the bot token.
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("Rate limited, retry after {retry_after:?}s")]
    RateLimit { retry_after: Option<u64> },

    #[error("Invalid bot token")]
    Unauthorized,

    #[error("API error: {status} - {description}")]
    Api { status: u16, description: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for TelegramError {
    fn from(err: reqwest::Error) -> Self {
        TelegramError::Http(err.without_url())
    }
}
