//! Common test utilities for integration tests.

use payment_gateway::config::{LogConfig, ServerConfig};
use payment_gateway::Config;
use payment_sessions::PaymentsConfig;
use secrecy::SecretString;
use std::path::Path;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const BOT_TOKEN: &str = "123:test-token";
pub const CHAT_ID: &str = "-100200300";

/// Gateway configuration pointing at mock provider and Telegram servers.
pub fn test_config(provider: &MockServer, telegram: &MockServer, storage: &Path) -> Config {
    let mut payments = PaymentsConfig::with_api_key("test-api-key");
    payments.provider.base_url = provider.uri();
    payments.provider.timeout = Duration::from_secs(5);
    payments.polling.interval = Duration::from_millis(50);
    payments.storage.path = storage.to_path_buf();
    payments.callbacks.public_url = Some("https://pay.example.com".into());
    payments.notifications.enabled = true;
    payments.notifications.bot_token = Some(SecretString::new(BOT_TOKEN.into()));
    payments.notifications.chat_id = Some(CHAT_ID.into());
    payments.notifications.base_url = telegram.uri();

    Config {
        server: ServerConfig::default(),
        log: LogConfig::default(),
        payments,
    }
}

/// Accept every Telegram sendMessage call.
pub async fn mount_telegram(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(format!("/bot{}/sendMessage", BOT_TOKEN)))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "ok": true,
            "result": {"message_id": 1, "chat": {"id": -100200300}, "date": 1700000000}
        })))
        .mount(server)
        .await;
}

/// Telegram messages received so far, as text.
pub async fn telegram_texts(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter_map(|r| serde_json::from_slice::<serde_json::Value>(&r.body).ok())
        .filter_map(|body| body["text"].as_str().map(String::from))
        .collect()
}

/// A NOWPayments payment body.
pub fn payment_body(id: &str, status: &str) -> serde_json::Value {
    serde_json::json!({
        "payment_id": id,
        "payment_status": status,
        "pay_address": "bc1qtestaddress",
        "pay_amount": 0.0045,
        "pay_currency": "btc",
        "price_amount": 299.99,
        "price_currency": "usd"
    })
}
