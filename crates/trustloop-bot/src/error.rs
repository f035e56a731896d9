//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Risk error: {0}")]
    Risk(#[from] trustloop_risk::RiskError),

    #[error("Guard error: {0}")]
    Guard(#[from] trustloop_position::GuardError),

    #[error("Feedback error: {0}")]
    Feedback(#[from] trustloop_feedback::FeedbackError),

    #[error("Store error: {0}")]
    Store(#[from] trustloop_store::StoreError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] trustloop_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
