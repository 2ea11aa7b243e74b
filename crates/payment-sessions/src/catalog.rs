//! Supported cryptocurrencies, their networks, and provider currency codes.

use crate::error::PaymentError;
use rust_decimal::Decimal;
use serde::Serialize;
use session_store::PackageType;

/// A chain a crypto can be paid on.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct NetworkOption {
    pub id: &'static str,
    pub name: &'static str,
    /// Provider pay-currency code.
    pub code: &'static str,
    pub fee: &'static str,
}

/// A payable cryptocurrency.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CryptoOption {
    pub id: &'static str,
    pub name: &'static str,
    pub symbol: &'static str,
    #[serde(skip_serializing_if = "no_networks")]
    pub networks: &'static [NetworkOption],
}

fn no_networks(networks: &&[NetworkOption]) -> bool {
    networks.is_empty()
}

impl CryptoOption {
    pub fn network(&self, id: &str) -> Option<&'static NetworkOption> {
        self.networks.iter().find(|n| n.id.eq_ignore_ascii_case(id))
    }
}

const fn network(
    id: &'static str,
    name: &'static str,
    code: &'static str,
    fee: &'static str,
) -> NetworkOption {
    NetworkOption { id, name, code, fee }
}

pub const CRYPTOS: &[CryptoOption] = &[
    CryptoOption {
        id: "btc",
        name: "Bitcoin",
        symbol: "BTC",
        networks: &[],
    },
    CryptoOption {
        id: "eth",
        name: "Ethereum",
        symbol: "ETH",
        networks: &[
            network("erc20", "Ethereum Mainnet", "eth", "High"),
            network("arbitrum", "Arbitrum", "etharb", "Low"),
            network("bsc", "BNB Smart Chain (BEP20)", "ethbsc", "Low"),
        ],
    },
    CryptoOption {
        id: "usdt",
        name: "Tether",
        symbol: "USDT",
        networks: &[
            network("erc20", "Ethereum (ERC20)", "usdterc20", "High"),
            network("trc20", "Tron (TRC20)", "usdttrc20", "Low"),
            network("bsc", "BNB Chain (BEP20)", "usdtbsc", "Low"),
            network("polygon", "Polygon", "usdtmatic", "Low"),
        ],
    },
    CryptoOption {
        id: "bnb",
        name: "BNB",
        symbol: "BNB",
        networks: &[network("bsc", "BNB Smart Chain", "BNBBSC", "Low")],
    },
    CryptoOption {
        id: "sol",
        name: "Solana",
        symbol: "SOL",
        networks: &[],
    },
    CryptoOption {
        id: "usdc",
        name: "USD Coin",
        symbol: "USDC",
        networks: &[
            network("erc20", "Ethereum (ERC20)", "USDC", "High"),
            network("bsc", "BNB Chain (BEP20)", "USDCBSC", "Low"),
            network("polygon", "Polygon", "USDCMATIC", "Low"),
        ],
    },
    CryptoOption {
        id: "trx",
        name: "Tron",
        symbol: "TRX",
        networks: &[network("trc20", "Tron Network", "trx", "Low")],
    },
    CryptoOption {
        id: "xrp",
        name: "Ripple",
        symbol: "XRP",
        networks: &[],
    },
    CryptoOption {
        id: "ton",
        name: "Toncoin",
        symbol: "TON",
        networks: &[],
    },
];

/// Pay currency used when no network was chosen.
const DEFAULT_PAY_CURRENCIES: &[(&str, &str)] = &[
    ("btc", "btc"),
    ("eth", "eth"),
    ("bnb", "bnbbsc"),
    ("sol", "sol"),
    ("trx", "trx"),
    ("xrp", "xrp"),
    ("ton", "ton"),
];

pub fn find_crypto(id: &str) -> Option<&'static CryptoOption> {
    CRYPTOS.iter().find(|c| c.id.eq_ignore_ascii_case(id))
}

/// A crypto and optional network resolved against the catalog.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedCurrency {
    pub crypto: &'static CryptoOption,
    pub network: Option<&'static NetworkOption>,
    /// Provider pay-currency code.
    pub pay_currency: &'static str,
}

impl ResolvedCurrency {
    /// Human-readable label used in notifications, e.g. `USDT`.
    pub fn label(&self) -> &'static str {
        self.crypto.symbol
    }
}

/// Resolve the provider pay currency for a crypto and optional network.
pub fn resolve(crypto_id: &str, network_id: Option<&str>) -> Result<ResolvedCurrency, PaymentError> {
    let crypto =
        find_crypto(crypto_id).ok_or_else(|| PaymentError::UnsupportedCrypto(crypto_id.into()))?;

    let network = match network_id.map(str::trim).filter(|n| !n.is_empty()) {
        Some(id) => Some(crypto.network(id).ok_or_else(|| {
            PaymentError::UnsupportedNetwork {
                crypto: crypto.id.into(),
                network: id.into(),
            }
        })?),
        None => None,
    };

    let pay_currency = match network {
        Some(network) => network.code,
        None => DEFAULT_PAY_CURRENCIES
            .iter()
            .find(|(id, _)| *id == crypto.id)
            .map(|(_, code)| *code)
            .unwrap_or(crypto.id),
    };

    Ok(ResolvedCurrency {
        crypto,
        network,
        pay_currency,
    })
}

/// Whether a pay currency is a USD stablecoin, paid 1:1 without an estimate.
pub fn is_stablecoin(pay_currency: &str) -> bool {
    let code = pay_currency.to_ascii_lowercase();
    code.contains("usdt") || code.contains("usdc")
}

/// USD price per package.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PackagePrices {
    pub full: Decimal,
    pub single: Decimal,
}

impl PackagePrices {
    pub fn price(&self, package: PackageType) -> Decimal {
        match package {
            PackageType::Full => self.full,
            PackageType::Single => self.single,
        }
    }
}
