//! Wallet-encoding API client.

use crate::error::PaymentError;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Debug, Deserialize)]
struct WalletResponse {
    address_in: Option<String>,
}

/// Client for the card provider's wallet-encoding API.
///
/// The API turns a payout wallet plus a callback URL into an opaque
/// `address_in` used by the checkout pages.
#[derive(Debug, Clone)]
pub struct PayGateClient {
    client: reqwest::Client,
    api_url: String,
}

impl PayGateClient {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(client, api_url))
    }

    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Encode `address` with `callback` into a checkout `address_in`.
    #[instrument(skip(self))]
    pub async fn encode_wallet(&self, address: &str, callback: &str) -> Result<String, PaymentError> {
        let url = format!("{}/control/wallet.php", self.api_url);

        let response = self
            .client
            .get(&url)
            .query(&[("address", address), ("callback", callback)])
            .send()
            .await
            .map_err(|e| PaymentError::WalletEncoding(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PaymentError::WalletEncoding(e.to_string()))?;

        if !status.is_success() {
            return Err(PaymentError::WalletEncoding(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let address_in = match serde_json::from_str::<WalletResponse>(&body) {
            Ok(parsed) => parsed.address_in,
            Err(_) => Some(body.trim().to_string()),
        };

        let address_in = address_in
            .filter(|a| !a.is_empty())
            .ok_or_else(|| PaymentError::WalletEncoding("no address_in returned".into()))?;

        debug!("Encoded payout wallet");
        Ok(address_in)
    }
}
