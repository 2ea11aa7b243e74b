//! Payment gateway service.
//!
//! Hosts the payment session API: configuration, router assembly and the
//! server lifecycle. The binary in `main.rs` only wires these together.

pub mod app;
pub mod config;
pub mod error;

pub use app::{build_app, router, serve};
pub use config::Config;
pub use error::{AppError, AppResult};
