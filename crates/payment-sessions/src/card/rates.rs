//! USD exchange rates for card checkout pricing.

use super::providers::FiatCurrency;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// How long fetched rates are reused.
const RATES_TTL: Duration = Duration::from_secs(60 * 60);

/// Units of each currency per USD.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeRates {
    rates: HashMap<String, Decimal>,
}

impl ExchangeRates {
    /// Fixed rates used when every source fails.
    pub fn fallback() -> Self {
        Self::from_pairs([
            ("USD", Decimal::ONE),
            ("EUR", Decimal::new(93, 2)),
            ("CAD", Decimal::new(144, 2)),
            ("INR", Decimal::new(8450, 2)),
        ])
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, Decimal)>) -> Self {
        Self {
            rates: pairs
                .into_iter()
                .map(|(code, rate)| (code.to_ascii_uppercase(), rate))
                .collect(),
        }
    }

    /// Rate for `currency`. USD is always 1.
    pub fn rate(&self, currency: FiatCurrency) -> Option<Decimal> {
        if currency == FiatCurrency::Usd {
            return Some(Decimal::ONE);
        }
        self.rates.get(currency.code()).copied()
    }
}

#[derive(Debug, Deserialize)]
struct RatesBody {
    rates: HashMap<String, Decimal>,
}

/// Fetches rates from a list of sources, caching the result.
pub struct RateFetcher {
    client: reqwest::Client,
    sources: Vec<String>,
    cached: RwLock<Option<(Instant, ExchangeRates)>>,
}

impl RateFetcher {
    pub fn new(client: reqwest::Client, sources: Vec<String>) -> Self {
        Self {
            client,
            sources,
            cached: RwLock::new(None),
        }
    }

    /// Current rates: cached, else the first source that answers, else the fallback.
    pub async fn rates(&self) -> ExchangeRates {
        if let Some((fetched_at, rates)) = self.cached.read().await.as_ref() {
            if fetched_at.elapsed() < RATES_TTL {
                return rates.clone();
            }
        }

        for source in &self.sources {
            match self.fetch(source).await {
                Ok(rates) => {
                    debug!("Loaded {} exchange rates from {}", rates.rates.len(), source);
                    *self.cached.write().await = Some((Instant::now(), rates.clone()));
                    return rates;
                }
                Err(e) => warn!("Exchange rate source {} failed: {}", source, e),
            }
        }

        warn!("All exchange rate sources failed, using fallback rates");
        ExchangeRates::fallback()
    }

    async fn fetch(&self, source: &str) -> Result<ExchangeRates, reqwest::Error> {
        let body: RatesBody = self
            .client
            .get(source)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(ExchangeRates {
            rates: body
                .rates
                .into_iter()
                .map(|(code, rate)| (code.to_ascii_uppercase(), rate))
                .collect(),
        })
    }
}
