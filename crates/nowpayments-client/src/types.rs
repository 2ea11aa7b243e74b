//! NOWPayments API types.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

/// Response of `GET /estimate`.
#[derive(Debug, Clone, Deserialize)]
pub struct EstimateResponse {
    #[serde(default)]
    pub currency_from: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub amount_from: Option<String>,
    #[serde(default)]
    pub currency_to: Option<String>,
    /// Amount of `currency_to` matching the requested price, as a decimal string.
    #[serde(deserialize_with = "string_or_number")]
    pub estimated_amount: String,
}

/// Body of `POST /payment`.
#[derive(Debug, Clone, Serialize)]
pub struct CreatePaymentRequest {
    #[serde(with = "rust_decimal::serde::float")]
    pub price_amount: Decimal,
    pub price_currency: String,
    pub pay_currency: String,
    pub order_id: String,
    pub order_description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipn_callback_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_url: Option<String>,
}

/// A payment as returned by `POST /payment` and `GET /payment/{id}`.
///
/// Fields other than the id are optional because the API omits them in
/// several states.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentResponse {
    #[serde(alias = "id", deserialize_with = "string_or_number")]
    pub payment_id: String,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub pay_address: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub pay_amount: Option<String>,
    #[serde(default)]
    pub pay_currency: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub price_amount: Option<String>,
    #[serde(default)]
    pub price_currency: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub actually_paid: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub qr_code_url: Option<String>,
    #[serde(default)]
    pub invoice_url: Option<String>,
}

/// Response of `GET /status`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiStatus {
    pub message: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Number(serde_json::Number),
}

impl From<StringOrNumber> for String {
    fn from(value: StringOrNumber) -> Self {
        match value {
            StringOrNumber::String(s) => s,
            StringOrNumber::Number(n) => n.to_string(),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    StringOrNumber::deserialize(deserializer).map(String::from)
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<StringOrNumber>::deserialize(deserializer).map(|v| v.map(String::from))
}
