//! Card checkout link generation.

use super::client::PayGateClient;
use super::providers::{find_provider, FiatCurrency, HOSTED_PROVIDER};
use super::rates::RateFetcher;
use crate::config::{CardConfig, PricingConfig};
use crate::error::PaymentError;
use crate::money;
use crate::notify::{EventDetails, NotificationSink, PaymentEvent};
use rand::Rng;
use rust_decimal::Decimal;
use serde::Serialize;
use session_store::{now_millis, Namespace, PackageType};
use std::sync::Arc;
use tracing::{info, instrument};

/// A card checkout request.
#[derive(Debug, Clone)]
pub struct CardCheckoutRequest {
    pub email: String,
    pub provider: String,
    pub currency: String,
    pub package_type: PackageType,
}

/// A generated card checkout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardCheckoutLink {
    pub tracking_id: String,
    pub payment_link: String,
    /// Amount charged in `currency`, fee included.
    pub amount: Decimal,
    pub currency: FiatCurrency,
    pub provider: String,
    pub address_in: String,
}

/// Builds card checkout links.
pub struct CardCheckout {
    client: PayGateClient,
    rates: RateFetcher,
    config: CardConfig,
    pricing: PricingConfig,
    public_url: String,
    merchant_wallet: String,
    notifier: Arc<dyn NotificationSink>,
}

impl CardCheckout {
    /// Returns `CardUnavailable` when card checkout is disabled or lacks a
    /// merchant wallet or public URL.
    pub fn new(
        config: CardConfig,
        pricing: PricingConfig,
        public_url: Option<String>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Result<Self, PaymentError> {
        if !config.enabled {
            return Err(PaymentError::CardUnavailable("card payments are disabled".into()));
        }
        let merchant_wallet = config
            .merchant_wallet
            .clone()
            .filter(|w| !w.trim().is_empty())
            .ok_or_else(|| PaymentError::CardUnavailable("no merchant wallet configured".into()))?;
        let public_url = public_url
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| PaymentError::CardUnavailable("no public URL configured".into()))?;

        let client = PayGateClient::new(&config.api_url, config.timeout)?;
        let rates = RateFetcher::new(client.http_client().clone(), config.rate_sources.clone());

        Ok(Self {
            client,
            rates,
            config,
            pricing,
            public_url,
            merchant_wallet,
            notifier,
        })
    }

    pub fn fee_percent(&self) -> Decimal {
        self.pricing.card_fee_percent
    }

    /// Price of `package` in `currency`, fee included.
    pub async fn quote(&self, package: PackageType, currency: FiatCurrency) -> Decimal {
        let usd = money::with_fee(self.pricing.prices().price(package), self.pricing.card_fee_percent);

        match self.rates.rates().await.rate(currency) {
            Some(rate) => money::convert(usd, rate),
            None => usd,
        }
    }

    /// Validate the request, encode the payout wallet, and build the link.
    #[instrument(skip(self, request), fields(namespace = %namespace, provider = %request.provider))]
    pub async fn create(
        &self,
        namespace: &Namespace,
        request: CardCheckoutRequest,
    ) -> Result<CardCheckoutLink, PaymentError> {
        let email = request.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(PaymentError::InvalidRequest("a valid email is required".into()));
        }
        let provider = find_provider(&request.provider)?;
        let currency: FiatCurrency = request.currency.parse()?;

        let amount = self.quote(request.package_type, currency).await;
        provider.validate(amount, currency)?;

        let tracking_id = format!(
            "{}_{}",
            now_millis(),
            rand::thread_rng().gen_range(1_000_000..10_000_000)
        );
        let callback = format!(
            "{}/api/paygate-callback?payment={}",
            self.public_url, tracking_id
        );

        let address_in = self
            .client
            .encode_wallet(&self.merchant_wallet, &callback)
            .await?;

        let base_url = if provider.id == HOSTED_PROVIDER {
            &self.config.hosted_url
        } else {
            &self.config.process_url
        };
        let payment_link = format!(
            "{}?address={}&amount={}&provider={}&email={}&currency={}",
            base_url,
            address_in,
            money::to_plain(amount),
            provider.id,
            urlencoding::encode(email),
            currency
        );

        info!("Created card checkout {} ({} {})", tracking_id, amount, currency);

        let description = match request.package_type {
            PackageType::Full => &self.pricing.full_description,
            PackageType::Single => &self.pricing.single_description,
        };
        let details = EventDetails::new(
            &tracking_id,
            format!("{} {}", money::to_plain(amount), currency),
            format!("Card Payment ({})", currency),
        )
        .with_network(Some(provider.id))
        .with_username(namespace.username())
        .with_order_description(format!("{} - Card Payment", description))
        .with_pay_address(&address_in);
        self.notifier.notify(PaymentEvent::PaymentCreated(details)).await;

        Ok(CardCheckoutLink {
            tracking_id,
            payment_link,
            amount,
            currency,
            provider: provider.id.to_string(),
            address_in,
        })
    }
}
