//! Decimal money helpers. Display amounts use 2 decimals, midpoint away from zero.

use rust_decimal::{Decimal, RoundingStrategy};

/// Round to 2 decimal places.
pub fn round_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Add a percentage fee and round to cents.
pub fn with_fee(amount: Decimal, fee_percent: Decimal) -> Decimal {
    round_cents(amount * (Decimal::ONE + fee_percent / Decimal::ONE_HUNDRED))
}

/// Convert a USD amount with `rate` (units per USD) and round to cents.
pub fn convert(usd: Decimal, rate: Decimal) -> Decimal {
    round_cents(usd * rate)
}

/// Plain decimal string without trailing zeros, e.g. `99.99` or `100`.
pub fn to_plain(amount: Decimal) -> String {
    amount.normalize().to_string()
}

/// Fixed 2-decimal string, e.g. `100.00`.
pub fn to_cents_string(amount: Decimal) -> String {
    let mut rounded = round_cents(amount);
    rounded.rescale(2);
    rounded.to_string()
}
