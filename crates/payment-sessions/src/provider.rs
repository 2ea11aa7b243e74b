//! Payment provider abstraction.
//!
//! The session manager only talks to a [`PaymentProvider`]; the NOWPayments
//! HTTP client implements it.

use async_trait::async_trait;
use nowpayments_client::{CreatePaymentRequest, NowPaymentsClient, NowPaymentsError};
use rust_decimal::Decimal;
use session_store::PaymentStatus;
use thiserror::Error;
use tracing::warn;

/// Errors from a payment provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The provider could not be reached. Safe to retry for reads only.
    #[error("provider unreachable: {0}")]
    Network(String),

    /// The provider answered with a non-2xx status.
    #[error("provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The provider answered 2xx with an unusable body.
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Network(_) => true,
            ProviderError::Rejected { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Malformed(_) => false,
        }
    }
}

impl From<NowPaymentsError> for ProviderError {
    fn from(err: NowPaymentsError) -> Self {
        match err {
            NowPaymentsError::Http(e) => ProviderError::Network(e.to_string()),
            NowPaymentsError::RateLimit => ProviderError::Rejected {
                status: 429,
                message: "rate limit exceeded".into(),
            },
            NowPaymentsError::Unauthorized => ProviderError::Rejected {
                status: 401,
                message: "authentication failed".into(),
            },
            NowPaymentsError::Api { status, message } => ProviderError::Rejected { status, message },
            NowPaymentsError::Json(e) => ProviderError::Malformed(e.to_string()),
        }
    }
}

/// Parameters of a new payment.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatePayment {
    pub usd_amount: Decimal,
    pub pay_currency: String,
    pub order_id: String,
    pub description: String,
    pub ipn_callback_url: Option<String>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

/// A payment as created by the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPayment {
    pub payment_id: String,
    pub pay_address: String,
    /// Amount the provider expects, when it says.
    pub pay_amount: Option<String>,
    pub status: PaymentStatus,
    pub qr_url: Option<String>,
}

/// A crypto payment provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Amount of `pay_currency` matching `usd_amount`, as a decimal string.
    async fn estimate(&self, usd_amount: Decimal, pay_currency: &str)
        -> Result<String, ProviderError>;

    /// Create a payment. Callers must not retry on failure.
    async fn create_payment(&self, request: CreatePayment) -> Result<ProviderPayment, ProviderError>;

    /// Current status of a payment. Idempotent.
    async fn get_status(&self, payment_id: &str) -> Result<PaymentStatus, ProviderError>;

    /// Whether the provider API is up.
    async fn health_check(&self) -> bool;
}

/// Map a provider status string onto the session lifecycle.
///
/// NOWPayments reports a few intermediate and closing states beyond the
/// session lifecycle; those are folded into the nearest session status.
pub fn map_status(raw: &str) -> Option<PaymentStatus> {
    if let Ok(status) = raw.parse() {
        return Some(status);
    }
    match raw.trim().to_ascii_lowercase().as_str() {
        "confirming" | "confirmed" | "partially_paid" => Some(PaymentStatus::Processing),
        "expired" => Some(PaymentStatus::Failed),
        "refunded" => Some(PaymentStatus::Rejected),
        _ => None,
    }
}

#[async_trait]
impl PaymentProvider for NowPaymentsClient {
    async fn estimate(
        &self,
        usd_amount: Decimal,
        pay_currency: &str,
    ) -> Result<String, ProviderError> {
        let estimate = NowPaymentsClient::estimate(self, usd_amount, "usd", pay_currency).await?;
        Ok(estimate.estimated_amount)
    }

    async fn create_payment(&self, request: CreatePayment) -> Result<ProviderPayment, ProviderError> {
        let body = CreatePaymentRequest {
            price_amount: request.usd_amount,
            price_currency: "usd".into(),
            pay_currency: request.pay_currency,
            order_id: request.order_id,
            order_description: request.description,
            ipn_callback_url: request.ipn_callback_url,
            success_url: request.success_url,
            cancel_url: request.cancel_url,
        };

        let payment = NowPaymentsClient::create_payment(self, &body).await?;

        let pay_address = payment
            .pay_address
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| ProviderError::Malformed("missing pay_address".into()))?;

        let status = match payment.payment_status.as_deref() {
            None => PaymentStatus::Waiting,
            Some(raw) => map_status(raw).unwrap_or_else(|| {
                warn!("Unknown status {:?} on new payment, assuming waiting", raw);
                PaymentStatus::Waiting
            }),
        };

        Ok(ProviderPayment {
            payment_id: payment.payment_id,
            pay_address,
            pay_amount: payment.pay_amount,
            status,
            qr_url: payment.qr_code_url.or(payment.invoice_url),
        })
    }

    async fn get_status(&self, payment_id: &str) -> Result<PaymentStatus, ProviderError> {
        let payment = self.get_payment(payment_id).await?;

        let raw = payment
            .payment_status
            .ok_or_else(|| ProviderError::Malformed("missing payment_status".into()))?;

        map_status(&raw).ok_or_else(|| ProviderError::Malformed(format!("unknown status {}", raw)))
    }

    async fn health_check(&self) -> bool {
        NowPaymentsClient::health_check(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> NowPaymentsClient {
        NowPaymentsClient::new("key", server.uri(), Duration::from_secs(5)).unwrap()
    }

    fn create_request() -> CreatePayment {
        CreatePayment {
            usd_amount: Decimal::from_str("299.99").unwrap(),
            pay_currency: "btc".into(),
            order_id: "ORDER-1".into(),
            description: "Panel Access".into(),
            ipn_callback_url: None,
            success_url: None,
            cancel_url: None,
        }
    }

    #[test]
    fn test_map_status() {
        assert_eq!(map_status("finished"), Some(PaymentStatus::Finished));
        assert_eq!(map_status("confirming"), Some(PaymentStatus::Processing));
        assert_eq!(map_status("expired"), Some(PaymentStatus::Failed));
        assert_eq!(map_status("bogus"), None);
    }

    #[tokio::test]
    async fn test_create_payment_defaults_status_and_prefers_qr_url() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/payment"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": 77,
                "pay_address": "addr1",
                "invoice_url": "https://nowpayments.io/payment/?iid=77"
            })))
            .mount(&server)
            .await;

        let payment = PaymentProvider::create_payment(&client(&server), create_request())
            .await
            .unwrap();

        assert_eq!(payment.payment_id, "77");
        assert_eq!(payment.status, PaymentStatus::Waiting);
        assert_eq!(
            payment.qr_url.as_deref(),
            Some("https://nowpayments.io/payment/?iid=77")
        );
    }

    #[tokio::test]
    async fn test_create_payment_without_address_is_malformed() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/payment"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "payment_id": "1",
                "payment_status": "waiting"
            })))
            .mount(&server)
            .await;

        let result = PaymentProvider::create_payment(&client(&server), create_request()).await;
        assert!(matches!(result, Err(ProviderError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_create_payment_rejection_carries_message() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/payment"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "statusCode": 400,
                "message": "Currency btc is unavailable"
            })))
            .mount(&server)
            .await;

        let err = PaymentProvider::create_payment(&client(&server), create_request())
            .await
            .unwrap_err();

        assert!(!err.is_transient());
        assert!(err.to_string().contains("Currency btc is unavailable"));
    }

    #[tokio::test]
    async fn test_get_status_unreachable_is_transient() {
        let client = NowPaymentsClient::new("key", "http://127.0.0.1:1", Duration::from_millis(200))
            .unwrap();

        let err = PaymentProvider::get_status(&client, "1").await.unwrap_err();
        assert!(err.is_transient());
    }
}
