//! Session store errors.

use thiserror::Error;

/// Errors raised while writing or removing persisted sessions.
///
/// Reads never surface these: a blob that cannot be read or decoded is
/// treated as an empty namespace.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised when parsing wire values into session types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown payment status: {0}")]
    Status(String),

    #[error("Unknown package type: {0}")]
    Package(String),
}
