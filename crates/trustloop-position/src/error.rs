//! Position guard error types.

use thiserror::Error;
use trustloop_core::ExchangeError;

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Invalid guard config: {0}")]
    InvalidConfig(String),
}

pub type GuardResult<T> = Result<T, GuardError>;
