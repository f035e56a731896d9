//! Risk gate for trustloop.
//!
//! A pure, deterministic function from (signal context, group parameters,
//! mode) to an allow/reject decision plus dynamic stop, take and trailing
//! distances. The same gate serves live pre-trade checks, backtest replay
//! and batch re-scoring.

pub mod error;
pub mod gate;

pub use error::{RiskError, RiskResult};
pub use gate::{RejectReason, RiskGate, RiskGateConfig, RiskInput, RiskMode, RiskPlan, RiskVerdict};
