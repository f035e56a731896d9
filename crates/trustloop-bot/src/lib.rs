//! trustloop application.
//!
//! Wires the pipeline stages into independent loops sharing one store:
//! - signal promotion and admission refresh
//! - order execution
//! - position protection
//! - outcome replay and trust weight updates

pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
