//! Executor error types.

use thiserror::Error;
use trustloop_core::{ExchangeError, InstrumentId, PoolError};
use trustloop_registry::RegistryError;
use trustloop_store::StoreError;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Metadata error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Parameter pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Stale quote for {instrument}: {age_ms}ms old")]
    StalePrice { instrument: InstrumentId, age_ms: u64 },

    #[error("Invalid sizing input: {0}")]
    InvalidSizingInput(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl ExecutorError {
    /// Whether the failure should count toward the execution backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Exchange(e) => e.is_transient(),
            Self::Registry(e) => e.is_transient(),
            Self::Pool(e) => matches!(e, PoolError::Unavailable(_)),
            Self::StalePrice { .. } => true,
            Self::Store(_) | Self::InvalidSizingInput(_) | Self::InvariantViolation(_) => false,
        }
    }
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
