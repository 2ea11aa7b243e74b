//! Card on-ramp providers and fiat currencies.

use crate::error::PaymentError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fiat currency a card checkout can be priced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FiatCurrency {
    Usd,
    Eur,
    Cad,
    Inr,
}

impl FiatCurrency {
    pub const ALL: [FiatCurrency; 4] = [
        FiatCurrency::Usd,
        FiatCurrency::Eur,
        FiatCurrency::Cad,
        FiatCurrency::Inr,
    ];

    pub fn code(self) -> &'static str {
        match self {
            FiatCurrency::Usd => "USD",
            FiatCurrency::Eur => "EUR",
            FiatCurrency::Cad => "CAD",
            FiatCurrency::Inr => "INR",
        }
    }
}

impl fmt::Display for FiatCurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for FiatCurrency {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.code().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PaymentError::UnsupportedCurrency(s.to_string()))
    }
}

/// A card on-ramp provider.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CardProvider {
    pub id: &'static str,
    pub label: &'static str,
    /// Smallest accepted amount, in the checkout currency.
    pub min_amount: u32,
    /// The only currency this provider accepts, if restricted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub only_currency: Option<FiatCurrency>,
}

impl CardProvider {
    pub fn minimum(&self) -> Decimal {
        Decimal::from(self.min_amount)
    }

    /// Check an amount and currency against this provider's limits.
    ///
    /// The minimum is checked before the currency restriction.
    pub fn validate(&self, amount: Decimal, currency: FiatCurrency) -> Result<(), PaymentError> {
        if amount < self.minimum() {
            return Err(PaymentError::BelowMinimum {
                provider: self.label.to_string(),
                minimum: self.minimum(),
            });
        }

        match self.only_currency {
            Some(only) if only != currency => Err(PaymentError::CurrencyRestricted {
                provider: self.label.to_string(),
                currency: only.code().to_string(),
            }),
            _ => Ok(()),
        }
    }
}

const fn provider(id: &'static str, label: &'static str, min_amount: u32) -> CardProvider {
    CardProvider {
        id,
        label,
        min_amount,
        only_currency: None,
    }
}

const fn restricted(
    id: &'static str,
    label: &'static str,
    min_amount: u32,
    currency: FiatCurrency,
) -> CardProvider {
    CardProvider {
        id,
        label,
        min_amount,
        only_currency: Some(currency),
    }
}

/// Provider id whose checkout uses the hosted multi-provider page.
pub const HOSTED_PROVIDER: &str = "hosted";

pub const CARD_PROVIDERS: &[CardProvider] = &[
    provider(HOSTED_PROVIDER, "Multi Hosted Providers", 1),
    restricted("stripe", "Stripe (USA Only)", 2, FiatCurrency::Usd),
    provider("sardine", "Sardine.ai", 30),
    provider("revolut", "Revolut", 15),
    provider("guardarian", "Guardarian", 20),
    provider("particle", "particle.network", 30),
    provider("transak", "Transak", 15),
    provider("banxa", "Banxa", 20),
    provider("simplex", "Simplex", 50),
    provider("mercuryo", "mercuryo.io", 30),
    restricted("rampnetwork", "ramp.network (USD)", 4, FiatCurrency::Usd),
    provider("moonpay", "MoonPay", 20),
    provider("alchemypay", "Alchemy Pay", 15),
    restricted("robinhood", "Robinhood (USD)", 5, FiatCurrency::Usd),
    provider("utorg", "UTORG", 50),
    provider("unlimit", "Unlimit", 10),
    provider("bitnovo", "Bitnovo", 10),
    provider("topper", "Topper", 10),
    restricted("transfi", "Transfi (USD)", 70, FiatCurrency::Usd),
    restricted("interac", "Interac (CAD)", 100, FiatCurrency::Cad),
    restricted("upi", "UPI/IMPS (INR)", 100, FiatCurrency::Inr),
];

pub fn find_provider(id: &str) -> Result<&'static CardProvider, PaymentError> {
    CARD_PROVIDERS
        .iter()
        .find(|p| p.id.eq_ignore_ascii_case(id.trim()))
        .ok_or_else(|| PaymentError::UnknownCardProvider(id.to_string()))
}
