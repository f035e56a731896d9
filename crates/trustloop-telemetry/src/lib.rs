//! Prometheus metrics and structured logging for trustloop.
//!
//! - Structured logging with tracing (JSON in production)
//! - Prometheus counters for loop passes, orders and protections
//! - `record_pass`: the per-pass report every loop emits

pub mod error;
pub mod logging;
pub mod metrics;
pub mod pass;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
pub use pass::record_pass;
