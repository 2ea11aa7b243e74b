//! Minimal Telegram Bot API client.
//!
//! Covers what an operator notification channel needs: `sendMessage` with
//! HTML formatting and `getMe` for health checks.

mod client;
mod error;
mod types;

pub use client::{TelegramClient, DEFAULT_BASE_URL};
pub use error::TelegramError;
pub use types::*;
