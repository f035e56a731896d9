//! Store error types.

use thiserror::Error;
use trustloop_core::{CoreError, SignalId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unknown signal: {0}")]
    UnknownSignal(SignalId),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
