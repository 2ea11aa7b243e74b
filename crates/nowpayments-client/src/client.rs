//! NOWPayments HTTP client.

use crate::error::NowPaymentsError;
use crate::types::*;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Default production API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.nowpayments.io/v1";

/// NOWPayments API client.
///
/// The API key is held as a `SecretString` and only exposed when the
/// `x-api-key` header is built.
#[derive(Clone)]
pub struct NowPaymentsClient {
    client: Client,
    base_url: String,
    api_key: SecretString,
}

impl NowPaymentsClient {
    /// Create a new client.
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NowPaymentsError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: SecretString::new(api_key.into()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Estimate how much `currency_to` corresponds to `amount` of `currency_from`.
    #[instrument(skip(self))]
    pub async fn estimate(
        &self,
        amount: Decimal,
        currency_from: &str,
        currency_to: &str,
    ) -> Result<EstimateResponse, NowPaymentsError> {
        let response = self
            .client
            .get(format!("{}/estimate", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .query(&[
                ("amount", amount.to_string().as_str()),
                ("currency_from", currency_from),
                ("currency_to", currency_to),
            ])
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Create a payment. Never retried: a retry could create a second payment.
    #[instrument(skip(self, request), fields(order_id = %request.order_id, pay_currency = %request.pay_currency))]
    pub async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<PaymentResponse, NowPaymentsError> {
        let response = self
            .client
            .post(format!("{}/payment", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .json(request)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Fetch a payment by id.
    #[instrument(skip(self))]
    pub async fn get_payment(&self, payment_id: &str) -> Result<PaymentResponse, NowPaymentsError> {
        let response = self
            .client
            .get(format!(
                "{}/payment/{}",
                self.base_url,
                urlencoding::encode(payment_id)
            ))
            .header("x-api-key", self.api_key.expose_secret())
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Fetch the API status.
    #[instrument(skip(self))]
    pub async fn status(&self) -> Result<ApiStatus, NowPaymentsError> {
        let response = self
            .client
            .get(format!("{}/status", self.base_url))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Health check - returns true if the API reports OK.
    pub async fn health_check(&self) -> bool {
        matches!(self.status().await, Ok(status) if status.message.eq_ignore_ascii_case("ok"))
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, NowPaymentsError> {
        let status = response.status();

        if status.is_success() {
            let body = response.text().await?;
            debug!("Response body: {}", truncate(&body, 200));
            serde_json::from_str(&body).map_err(NowPaymentsError::from)
        } else {
            Err(self.extract_error(response).await)
        }
    }

    /// Extract error information from a failed response.
    ///
    /// The API answers errors with `{"statusCode", "code", "message"}`; the
    /// message is used when present, else the raw body.
    async fn extract_error(&self, response: reqwest::Response) -> NowPaymentsError {
        let status = response.status();

        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                warn!("Rate limit exceeded");
                NowPaymentsError::RateLimit
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!("Authentication failed");
                NowPaymentsError::Unauthorized
            }
            _ => {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".into());

                let message = serde_json::from_str::<serde_json::Value>(&body)
                    .ok()
                    .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
                    .unwrap_or(body);

                NowPaymentsError::Api {
                    status: status.as_u16(),
                    message,
                }
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
