//! Core domain types for the trustloop trading core.
//!
//! This crate provides the types shared by every stage of the pipeline:
//! - `Price`, `Size`: precision-safe numeric types
//! - `Signal`, `SignalStatus`: signals and their lifecycle graph
//! - `StrategyGroup`, `RiskParameters`: strategy candidates
//! - `TradeRecord`, `TradeOutcome`: executions and their labels
//! - `Exchange`, `ParameterPool`: collaborator capabilities
//! - `PaperExchange`: in-process exchange for paper mode and tests

pub mod candle;
pub mod decimal;
pub mod error;
pub mod exchange;
pub mod instrument;
pub mod order;
pub mod paper;
pub mod pass;
pub mod position;
pub mod signal;
pub mod strategy;
pub mod trade;
pub mod trust;

pub use candle::{Candle, Interval};
pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use exchange::{
    BoxFuture, DynExchange, DynParameterPool, Exchange, ExchangeError, ExchangeResult,
    ParameterPool, PoolError, PoolResult, Quote,
};
pub use instrument::{InstrumentId, InstrumentSpec};
pub use order::{
    ActiveProtection, ClientOrderId, FillState, MarginMode, OrderId, OrderRequest, OrderState,
    PositionSide, ProtectionRequest, Side,
};
pub use paper::{FillMode, PaperExchange};
pub use pass::PassReport;
pub use position::OpenPosition;
pub use signal::{NewSignal, Signal, SignalId, SignalMeta, SignalStatus, SkipReason};
pub use strategy::{CandidateFilter, GroupId, GroupStatus, RiskParameters, StrategyGroup};
pub use trade::{ExitReason, NewTrade, TradeId, TradeOutcome, TradeRecord};
pub use trust::{TrustWeightEntry, TrustWindow};

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}
