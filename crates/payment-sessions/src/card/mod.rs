//! Card checkout through a hosted on-ramp.
//!
//! A card checkout prices a package in fiat (fee included), encodes the
//! merchant payout wallet with a tracking callback, and returns a link to
//! the provider's checkout page. Card payments are not tracked as sessions;
//! their outcome arrives through the card callback.

pub mod checkout;
pub mod client;
pub mod providers;
pub mod rates;

pub use checkout::{CardCheckout, CardCheckoutLink, CardCheckoutRequest};
pub use client::PayGateClient;
pub use providers::{find_provider, CardProvider, FiatCurrency, CARD_PROVIDERS, HOSTED_PROVIDER};
pub use rates::{ExchangeRates, RateFetcher};
