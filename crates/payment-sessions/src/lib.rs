//! Crypto payment session tracking.
//!
//! This crate drives payment sessions against a crypto payment provider:
//!
//! - **Sessions**: at most one active session per crypto, network and package
//! - **Polling**: background status polling until a terminal status
//! - **Notifications**: lifecycle events delivered to a sink (Telegram or logs)
//! - **Card checkout**: fiat checkout links through a hosted on-ramp
//! - **HTTP API**: axum router for session, checkout and webhook endpoints
//!
//! # Example
//!
//! ```no_run
//! use payment_sessions::{build_state, create_router, PaymentsConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PaymentsConfig::with_api_key("np-api-key");
//! let state = build_state(config)?;
//! let app = create_router(Arc::new(state));
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod card;
pub mod catalog;
pub mod config;
pub mod error;
pub mod ipn;
pub mod manager;
pub mod money;
pub mod notify;
pub mod poller;
pub mod provider;

pub use api::{create_router, AppState};
pub use card::{CardCheckout, CardCheckoutLink, CardCheckoutRequest, FiatCurrency};
pub use config::PaymentsConfig;
pub use error::{ErrorResponse, PaymentError};
pub use manager::{CallbackUrls, PollOutcome, SessionManager, SessionOutcome, SessionRequest};
pub use notify::{EventDetails, LogNotifier, NotificationSink, PaymentEvent, TelegramNotifier};
pub use provider::{PaymentProvider, ProviderError};

use nowpayments_client::NowPaymentsClient;
use secrecy::ExposeSecret;
use session_store::SessionStore;
use std::sync::Arc;
use telegram_client::TelegramClient;
use tracing::{info, warn};

/// Notification sink for the configuration: Telegram when enabled and
/// complete, logs otherwise.
pub fn build_notifier(config: &PaymentsConfig) -> Result<Arc<dyn NotificationSink>, PaymentError> {
    let notifications = &config.notifications;
    if !notifications.enabled {
        return Ok(Arc::new(LogNotifier));
    }

    match (&notifications.bot_token, &notifications.chat_id) {
        (Some(token), Some(chat_id)) => {
            let client = TelegramClient::new(
                token.expose_secret(),
                &notifications.base_url,
                notifications.timeout,
            )
            .map_err(|e| PaymentError::Internal(format!("telegram client: {}", e)))?;

            info!("Telegram notifications enabled");
            Ok(Arc::new(TelegramNotifier::new(
                client,
                chat_id,
                notifications.footer.clone(),
            )))
        }
        _ => {
            warn!("Notifications enabled without bot token or chat id, logging only");
            Ok(Arc::new(LogNotifier))
        }
    }
}

/// Session store for the configuration.
pub fn build_store(config: &PaymentsConfig) -> SessionStore {
    let storage = &config.storage;
    let store = if storage.persist {
        SessionStore::file(&storage.path)
    } else {
        SessionStore::memory()
    };

    store
        .with_key_prefix(&storage.key_prefix)
        .with_retention(storage.retention)
}

/// Wire the provider client, store, notifier, manager and card checkout.
pub fn build_state(config: PaymentsConfig) -> Result<AppState, PaymentError> {
    let provider = NowPaymentsClient::new(
        config.provider.api_key.expose_secret(),
        &config.provider.base_url,
        config.provider.timeout,
    )
    .map_err(|e| PaymentError::Internal(format!("payment provider client: {}", e)))?;

    let notifier = build_notifier(&config)?;

    let manager = SessionManager::new(build_store(&config), Arc::new(provider), notifier.clone())
        .with_callbacks(CallbackUrls::from_config(&config.callbacks))
        .with_poll_interval(config.polling.interval);

    let card = if config.card.enabled {
        match CardCheckout::new(
            config.card.clone(),
            config.pricing.clone(),
            config.callbacks.public_url.clone(),
            notifier.clone(),
        ) {
            Ok(card) => Some(card),
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    } else {
        None
    };

    Ok(AppState::new(Arc::new(manager), card, notifier, config))
}
