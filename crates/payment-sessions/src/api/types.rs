//! API request/response types.

use crate::card::{CardProvider, FiatCurrency};
use crate::catalog::{CryptoOption, PackagePrices};
use crate::manager::PollOutcome;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use session_store::{PackageType, PaymentSession, PaymentStatus, SessionKey};

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub provider_healthy: bool,
    pub active_polls: usize,
    pub card_enabled: bool,
    pub notifications_enabled: bool,
}

/// Catalog response.
#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub cryptos: &'static [CryptoOption],
    /// USD price per package.
    pub prices: PackagePrices,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card: Option<CardCatalog>,
}

/// Card checkout options.
#[derive(Debug, Serialize)]
pub struct CardCatalog {
    pub providers: &'static [CardProvider],
    pub currencies: [FiatCurrency; 4],
    pub fee_percent: Decimal,
}

/// Session request.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Username; guest when absent.
    #[serde(default)]
    pub user: Option<String>,
    pub crypto_id: String,
    #[serde(default)]
    pub network_id: Option<String>,
    pub package_type: PackageType,
}

/// Session response.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session: PaymentSession,
    /// The session already existed.
    pub reused: bool,
    /// A background poller is tracking the session.
    pub polling: bool,
}

/// Sessions of one namespace.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionsResponse {
    pub namespace: String,
    pub active: Vec<PaymentSession>,
    /// Archived sessions, most recent first.
    pub history: Vec<PaymentSession>,
}

/// Identifies a session slot.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionKeyRequest {
    pub crypto_id: String,
    #[serde(default)]
    pub network_id: Option<String>,
    pub package_type: PackageType,
}

impl SessionKeyRequest {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(&self.crypto_id, self.network_id.as_deref(), self.package_type)
    }
}

/// Cancel response.
#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub cancelled: bool,
    pub session: Option<PaymentSession>,
}

/// Result of an on-demand status check.
#[derive(Debug, Serialize, Deserialize)]
pub struct PollResponse {
    /// `changed`, `unchanged`, `skipped` or `failed`.
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PaymentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<PollOutcome> for PollResponse {
    fn from(outcome: PollOutcome) -> Self {
        let (name, status, error) = match outcome {
            PollOutcome::Changed { session, .. } => ("changed", Some(session.status), None),
            PollOutcome::Unchanged(status) => ("unchanged", Some(status), None),
            PollOutcome::Skipped => ("skipped", None, None),
            PollOutcome::Failed(message) => ("failed", None, Some(message)),
        };

        Self {
            outcome: name.to_string(),
            status,
            error,
        }
    }
}

/// Card checkout request.
#[derive(Debug, Serialize, Deserialize)]
pub struct CardCheckoutBody {
    #[serde(default)]
    pub user: Option<String>,
    pub email: String,
    pub provider: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub package_type: PackageType,
}

fn default_currency() -> String {
    "USD".into()
}

/// Acknowledgement returned to webhook senders.
#[derive(Debug, Serialize, Deserialize)]
pub struct CallbackAck {
    pub success: bool,
}
