//! Inbound payment webhooks: provider IPN and card callbacks.
//!
//! Webhooks are forwarded to the notification sink only. They never change
//! stored sessions; polling remains the source of truth.

use crate::notify::{EventDetails, PaymentEvent};
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha512;
use std::collections::{BTreeMap, HashMap};

/// Header carrying the IPN signature.
pub const SIGNATURE_HEADER: &str = "x-nowpayments-sig";

type HmacSha512 = Hmac<Sha512>;

/// Recursively order object keys alphabetically.
pub fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.into_iter().map(|(k, v)| (k, sort_keys(v))).collect();
            Value::Object(sorted.into_iter().collect::<Map<String, Value>>())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Verify an IPN signature: hex HMAC-SHA512 of the key-sorted JSON body.
pub fn verify_signature(body: &[u8], secret: &str, signature: &str) -> bool {
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        return false;
    };
    let Ok(canonical) = serde_json::to_string(&sort_keys(value)) else {
        return false;
    };

    let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(canonical.as_bytes());
    let computed = hex::encode(mac.finalize().into_bytes());

    secure_eq(
        computed.as_bytes(),
        signature.trim().to_ascii_lowercase().as_bytes(),
    )
}

fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0_u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// String form of a JSON scalar; numbers are accepted where ids are expected.
fn text(value: &Value, field: &str) -> Option<String> {
    match value.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Fields of a provider IPN.
#[derive(Debug, Clone, PartialEq)]
pub struct IpnNotification {
    pub payment_id: Option<String>,
    pub payment_status: Option<String>,
    pub pay_amount: Option<String>,
    pub pay_currency: Option<String>,
}

impl IpnNotification {
    pub fn from_value(value: &Value) -> Self {
        Self {
            payment_id: text(value, "payment_id"),
            payment_status: text(value, "payment_status"),
            pay_amount: text(value, "pay_amount"),
            pay_currency: text(value, "pay_currency"),
        }
    }

    pub fn into_event(self) -> PaymentEvent {
        let details = EventDetails::new(
            self.payment_id.unwrap_or_else(|| "N/A".into()),
            self.pay_amount.unwrap_or_else(|| "0".into()),
            self.pay_currency
                .map(|c| c.to_uppercase())
                .unwrap_or_else(|| "N/A".into()),
        );

        PaymentEvent::PaymentStatusChanged {
            details,
            status: self.payment_status.unwrap_or_else(|| "unknown".into()),
        }
    }
}

/// Fields of a card provider callback, from the query string or JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct CardCallback {
    pub tracking_id: Option<String>,
    pub status: String,
    pub amount: Option<String>,
    pub provider: Option<String>,
}

impl CardCallback {
    /// Query parameters win over body fields.
    pub fn from_parts(query: &HashMap<String, String>, body: Option<&Value>) -> Self {
        let field = |name: &str| {
            query
                .get(name)
                .filter(|v| !v.is_empty())
                .cloned()
                .or_else(|| body.and_then(|b| text(b, name)))
        };

        Self {
            tracking_id: field("payment"),
            status: field("status").unwrap_or_else(|| "completed".into()),
            amount: field("amount"),
            provider: field("provider"),
        }
    }

    pub fn into_event(self) -> PaymentEvent {
        let details = EventDetails::new(
            self.tracking_id.unwrap_or_else(|| "N/A".into()),
            self.amount.unwrap_or_else(|| "N/A".into()),
            "Card Payment",
        )
        .with_network(self.provider);

        PaymentEvent::PaymentStatusChanged {
            details,
            status: self.status,
        }
    }
}
