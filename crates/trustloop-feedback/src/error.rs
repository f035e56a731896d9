//! Feedback error types.

use thiserror::Error;
use trustloop_core::{ExchangeError, PoolError};
use trustloop_store::StoreError;

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Parameter pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

pub type FeedbackResult<T> = Result<T, FeedbackError>;
