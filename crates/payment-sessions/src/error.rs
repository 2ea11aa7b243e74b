//! Payment session error types.

use crate::provider::ProviderError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use session_store::StoreError;
use thiserror::Error;

/// Errors surfaced by session and checkout operations.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Crypto id not in the catalog.
    #[error("Unsupported cryptocurrency: {0}")]
    UnsupportedCrypto(String),

    /// Network id not offered for the chosen crypto.
    #[error("Unsupported network {network} for {crypto}")]
    UnsupportedNetwork { crypto: String, network: String },

    /// The payment provider rejected or failed the request. Never retried.
    #[error("Payment provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Card checkout is disabled or missing its merchant wallet.
    #[error("Card checkout unavailable: {0}")]
    CardUnavailable(String),

    #[error("Unknown card provider: {0}")]
    UnknownCardProvider(String),

    #[error("Unsupported fiat currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Minimum amount for {provider} is ${minimum}")]
    BelowMinimum { provider: String, minimum: Decimal },

    #[error("{provider} supports {currency} currency only")]
    CurrencyRestricted { provider: String, currency: String },

    /// The wallet-encoding API did not return an address.
    #[error("Invalid payout wallet: {0}")]
    WalletEncoding(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PaymentError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            PaymentError::UnsupportedCrypto(_) => (StatusCode::BAD_REQUEST, "UNSUPPORTED_CRYPTO"),
            PaymentError::UnsupportedNetwork { .. } => {
                (StatusCode::BAD_REQUEST, "UNSUPPORTED_NETWORK")
            }
            PaymentError::Provider(_) => (StatusCode::BAD_GATEWAY, "PROVIDER_ERROR"),
            PaymentError::CardUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "CARD_UNAVAILABLE")
            }
            PaymentError::UnknownCardProvider(_) => {
                (StatusCode::BAD_REQUEST, "UNKNOWN_CARD_PROVIDER")
            }
            PaymentError::UnsupportedCurrency(_) => {
                (StatusCode::BAD_REQUEST, "UNSUPPORTED_CURRENCY")
            }
            PaymentError::BelowMinimum { .. } => (StatusCode::BAD_REQUEST, "BELOW_MINIMUM"),
            PaymentError::CurrencyRestricted { .. } => {
                (StatusCode::BAD_REQUEST, "CURRENCY_RESTRICTED")
            }
            PaymentError::WalletEncoding(_) => (StatusCode::BAD_GATEWAY, "WALLET_ENCODING_FAILED"),
            PaymentError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            PaymentError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            PaymentError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
        }
    }
}

impl IntoResponse for PaymentError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        (status, Json(ErrorResponse::new(self.to_string(), code))).into_response()
    }
}
