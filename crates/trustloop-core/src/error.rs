//! Error types for trustloop-core.

use thiserror::Error;

use crate::signal::SignalStatus;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid instrument metadata: {0}")]
    InvalidMetadata(String),

    #[error("Illegal signal transition: {from} -> {to}")]
    IllegalTransition { from: SignalStatus, to: SignalStatus },

    #[error("Unknown signal status: {0}")]
    UnknownStatus(String),

    #[error("Decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
