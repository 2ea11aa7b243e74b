//! HTTP API for payment sessions.

mod handlers;
mod types;

pub use handlers::{create_router, AppState};
pub use types::*;
