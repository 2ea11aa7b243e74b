//! Client for the NOWPayments crypto payment API.

mod client;
mod error;
mod types;

pub use client::{NowPaymentsClient, DEFAULT_BASE_URL};
pub use error::NowPaymentsError;
pub use types::*;
