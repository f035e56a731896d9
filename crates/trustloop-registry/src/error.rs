//! Registry error types.

use thiserror::Error;
use trustloop_core::{CoreError, ExchangeError};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Metadata fetch failed: {0}")]
    Fetch(#[from] ExchangeError),

    #[error("Invalid metadata: {0}")]
    Invalid(#[from] CoreError),
}

impl RegistryError {
    /// Whether retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_transient(),
            Self::Invalid(_) => false,
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
