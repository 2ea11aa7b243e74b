//! Payment session configuration.

use crate::catalog::PackagePrices;
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;

/// Main payments configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsConfig {
    /// Crypto payment provider (NOWPayments API).
    pub provider: ProviderConfig,

    /// Status polling.
    #[serde(default)]
    pub polling: PollingConfig,

    /// Session persistence.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Package prices and order descriptions.
    #[serde(default)]
    pub pricing: PricingConfig,

    /// URLs handed to payment providers.
    #[serde(default)]
    pub callbacks: CallbackConfig,

    /// Card checkout via the wallet-encoding API.
    #[serde(default)]
    pub card: CardConfig,

    /// Operator notifications.
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl PaymentsConfig {
    /// Configuration with every default and the given provider API key.
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            provider: ProviderConfig {
                api_key: SecretString::new(api_key.into()),
                base_url: default_provider_url(),
                timeout: default_timeout(),
                ipn_secret: None,
            },
            polling: PollingConfig::default(),
            storage: StorageConfig::default(),
            pricing: PricingConfig::default(),
            callbacks: CallbackConfig::default(),
            card: CardConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// API key sent as `x-api-key`.
    pub api_key: SecretString,

    #[serde(default = "default_provider_url")]
    pub base_url: String,

    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Secret used to verify IPN callback signatures. Unverified when unset.
    #[serde(default)]
    pub ipn_secret: Option<SecretString>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    /// Delay between status polls of one session.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub interval: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one JSON file per namespace.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,

    /// Keep sessions only in memory when false.
    #[serde(default = "default_true")]
    pub persist: bool,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Sessions older than this are purged on load.
    #[serde(default = "default_retention", with = "humantime_serde")]
    pub retention: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PricingConfig {
    /// Full panel access price in USD.
    #[serde(default = "default_full_usd")]
    pub full_usd: Decimal,

    /// Single report price in USD.
    #[serde(default = "default_single_usd")]
    pub single_usd: Decimal,

    /// Card processing fee, in percent of the USD price.
    #[serde(default = "default_card_fee")]
    pub card_fee_percent: Decimal,

    #[serde(default = "default_full_description")]
    pub full_description: String,

    #[serde(default = "default_single_description")]
    pub single_description: String,
}

impl PricingConfig {
    pub fn prices(&self) -> PackagePrices {
        PackagePrices {
            full: self.full_usd,
            single: self.single_usd,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackConfig {
    /// Public origin of this service, e.g. `https://pay.example.com`.
    /// IPN and card callback URLs are derived from it.
    #[serde(default)]
    pub public_url: Option<String>,

    /// Where the provider sends the buyer after paying. Defaults to `{public_url}/success`.
    #[serde(default)]
    pub success_url: Option<String>,

    /// Where the provider sends the buyer on cancel. Defaults to the public URL.
    #[serde(default)]
    pub cancel_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CardConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Wallet-encoding API origin.
    #[serde(default = "default_card_api_url")]
    pub api_url: String,

    /// Checkout page for the `hosted` provider.
    #[serde(default = "default_hosted_url")]
    pub hosted_url: String,

    /// Checkout page for every other provider.
    #[serde(default = "default_process_url")]
    pub process_url: String,

    /// Payout wallet the card provider settles to.
    #[serde(default)]
    pub merchant_wallet: Option<String>,

    /// Exchange-rate endpoints tried in order. Each must answer `{"rates": {...}}`.
    /// Accepts a list or a comma-separated string.
    #[serde(default = "default_rate_sources", deserialize_with = "string_or_list")]
    pub rate_sources: Vec<String>,

    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub bot_token: Option<SecretString>,

    #[serde(default)]
    pub chat_id: Option<String>,

    #[serde(default = "default_telegram_url")]
    pub base_url: String,

    /// Italic line appended under every message.
    #[serde(default)]
    pub footer: Option<String>,

    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            persist: true,
            key_prefix: default_key_prefix(),
            retention: default_retention(),
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            full_usd: default_full_usd(),
            single_usd: default_single_usd(),
            card_fee_percent: default_card_fee(),
            full_description: default_full_description(),
            single_description: default_single_description(),
        }
    }
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: default_card_api_url(),
            hosted_url: default_hosted_url(),
            process_url: default_process_url(),
            merchant_wallet: None,
            rate_sources: default_rate_sources(),
            timeout: default_timeout(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: None,
            chat_id: None,
            base_url: default_telegram_url(),
            footer: None,
            timeout: default_timeout(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrList {
    List(Vec<String>),
    Joined(String),
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = match StringOrList::deserialize(deserializer)? {
        StringOrList::List(items) => items,
        StringOrList::Joined(joined) => joined.split(',').map(String::from).collect(),
    };

    Ok(items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

// Default value functions
fn default_provider_url() -> String {
    nowpayments_client::DEFAULT_BASE_URL.into()
}

fn default_telegram_url() -> String {
    telegram_client::DEFAULT_BASE_URL.into()
}

fn default_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data/sessions")
}

fn default_key_prefix() -> String {
    session_store::DEFAULT_KEY_PREFIX.into()
}

fn default_retention() -> Duration {
    session_store::DEFAULT_RETENTION
}

fn default_true() -> bool {
    true
}

fn default_full_usd() -> Decimal {
    Decimal::new(29999, 2)
}

fn default_single_usd() -> Decimal {
    Decimal::new(9999, 2)
}

fn default_card_fee() -> Decimal {
    Decimal::from(5)
}

fn default_full_description() -> String {
    "Panel Access".into()
}

fn default_single_description() -> String {
    "Single Report".into()
}

fn default_card_api_url() -> String {
    "https://api.paygate.to".into()
}

fn default_hosted_url() -> String {
    "https://checkout.paygate.to/pay.php".into()
}

fn default_process_url() -> String {
    "https://checkout.paygate.to/process-payment.php".into()
}

fn default_rate_sources() -> Vec<String> {
    vec![
        "https://api.exchangerate-api.com/v4/latest/USD".into(),
        "https://api.exchangerate.host/latest?base=USD".into(),
    ]
}
