//! Capability interfaces for external collaborators.
//!
//! The core never talks to a venue or a parameter database directly; it
//! depends on these traits so that live adapters, the paper exchange and
//! test doubles are interchangeable.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

use crate::candle::{Candle, Interval};
use crate::order::{ActiveProtection, OrderId, OrderRequest, OrderState, PositionSide, ProtectionRequest};
use crate::position::OpenPosition;
use crate::strategy::{CandidateFilter, GroupId, StrategyGroup};
use crate::{InstrumentId, InstrumentSpec, Price};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

// ============================================================================
// Exchange
// ============================================================================

/// Errors returned by an exchange adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("exchange unavailable: {0}")]
    Unavailable(String),

    #[error("rate limited")]
    RateLimited,

    #[error("request timed out")]
    Timeout,

    #[error("unknown instrument: {0}")]
    UnknownInstrument(InstrumentId),

    #[error("unknown order: {0}")]
    UnknownOrder(OrderId),

    #[error("order rejected: {0}")]
    Rejected(String),
}

impl ExchangeError {
    /// Whether retrying after a backoff may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::RateLimited | Self::Timeout)
    }
}

pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

/// Last traded or mark price with its observation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub price: Price,
    pub ts_ms: u64,
}

impl Quote {
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.ts_ms)
    }
}

/// Exchange capability consumed by the core.
pub trait Exchange: Send + Sync {
    fn reference_price(&self, instrument: InstrumentId) -> BoxFuture<'_, ExchangeResult<Quote>>;

    fn instrument_spec(
        &self,
        instrument: InstrumentId,
    ) -> BoxFuture<'_, ExchangeResult<InstrumentSpec>>;

    /// Available margin balance in quote currency.
    fn available_balance(&self) -> BoxFuture<'_, ExchangeResult<Decimal>>;

    fn submit_order(&self, request: OrderRequest) -> BoxFuture<'_, ExchangeResult<OrderId>>;

    fn order_state(
        &self,
        instrument: InstrumentId,
        order_id: OrderId,
    ) -> BoxFuture<'_, ExchangeResult<OrderState>>;

    /// Candles with `start_ms <= ts_ms <= end_ms`, oldest first.
    fn historical_candles(
        &self,
        instrument: InstrumentId,
        interval: Interval,
        start_ms: u64,
        end_ms: u64,
    ) -> BoxFuture<'_, ExchangeResult<Vec<Candle>>>;

    fn open_positions(&self) -> BoxFuture<'_, ExchangeResult<Vec<OpenPosition>>>;

    /// Protection currently attached to a position, if any.
    fn active_protection(
        &self,
        instrument: InstrumentId,
        side: PositionSide,
    ) -> BoxFuture<'_, ExchangeResult<Option<ActiveProtection>>>;

    /// Install stop/take/trailing protection in one request.
    fn install_protection(&self, request: ProtectionRequest) -> BoxFuture<'_, ExchangeResult<()>>;
}

/// Arc wrapper for Exchange trait objects.
pub type DynExchange = Arc<dyn Exchange>;

// ============================================================================
// Parameter Pool
// ============================================================================

/// Errors returned by a parameter pool.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("parameter pool unavailable: {0}")]
    Unavailable(String),

    #[error("unknown strategy group: {0}")]
    UnknownGroup(GroupId),
}

pub type PoolResult<T> = std::result::Result<T, PoolError>;

/// Scored strategy candidates produced by the external parameter search.
pub trait ParameterPool: Send + Sync {
    /// Candidates passing `filter`, best score first.
    fn load_candidates(&self, filter: &CandidateFilter) -> PoolResult<Vec<StrategyGroup>>;

    /// Write realized performance back to a group.
    fn update_group_performance(
        &self,
        group: &GroupId,
        win_rate: Decimal,
        score: Decimal,
    ) -> PoolResult<()>;
}

/// Arc wrapper for ParameterPool trait objects.
pub type DynParameterPool = Arc<dyn ParameterPool>;
