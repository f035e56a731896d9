//! Store traits.
//!
//! Split by table so that each loop states what it touches. Any type
//! implementing all of them is a [`Store`].

use std::sync::Arc;
use trustloop_core::{
    Candle, GroupId, InstrumentId, Interval, NewSignal, NewTrade, Signal, SignalId,
    SignalStatus, TradeId, TradeOutcome, TradeRecord, TrustWeightEntry, TrustWindow,
};

use crate::error::StoreResult;

/// Ordering for signal queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOrder {
    /// Timestamp ascending, then id.
    Oldest,
    /// Priority asc, promotion level desc, timestamp asc.
    Execution,
}

pub trait SignalStore: Send + Sync {
    /// Insert a new signal with status `NEW`.
    fn insert_signal(&self, signal: NewSignal, now_ms: u64) -> StoreResult<SignalId>;

    fn get_signal(&self, id: SignalId) -> StoreResult<Option<Signal>>;

    fn signals_in_status(
        &self,
        status: SignalStatus,
        order: SignalOrder,
        limit: usize,
    ) -> StoreResult<Vec<Signal>>;

    /// Move a signal from `from` to `to` if it is still in `from`.
    ///
    /// Returns `Ok(false)` when another consumer moved it first. Edges
    /// outside the lifecycle graph are rejected with an error.
    fn transition_signal(
        &self,
        id: SignalId,
        from: SignalStatus,
        to: SignalStatus,
        now_ms: u64,
    ) -> StoreResult<bool>;

    /// Move a signal `NEW -> WAIT_REHEARSAL`, stamping `expiry_ms` unless
    /// the signal already carries one. Same race semantics as
    /// [`SignalStore::transition_signal`].
    fn begin_rehearsal(&self, id: SignalId, expiry_ms: u64, now_ms: u64) -> StoreResult<bool>;
}

pub trait TradeStore: Send + Sync {
    fn insert_trade(&self, trade: NewTrade) -> StoreResult<TradeId>;

    fn get_trade(&self, id: TradeId) -> StoreResult<Option<TradeRecord>>;

    /// Trades that may hold a position and have no outcome yet, oldest first.
    fn trades_pending_outcome(&self, limit: usize) -> StoreResult<Vec<TradeRecord>>;

    /// Trades opened by `group` at or after `since_ms`.
    fn count_trades_since(&self, group: &GroupId, since_ms: u64) -> StoreResult<u32>;
}

pub trait OutcomeStore: Send + Sync {
    /// Insert-or-ignore keyed by trade id. Returns `true` if inserted.
    fn insert_outcome(&self, outcome: TradeOutcome) -> StoreResult<bool>;

    fn outcome_for_trade(&self, trade: TradeId) -> StoreResult<Option<TradeOutcome>>;

    /// Outcomes whose trade opened at or after `since_ms`.
    fn outcomes_since(&self, since_ms: u64) -> StoreResult<Vec<TradeOutcome>>;
}

pub trait TrustWeightStore: Send + Sync {
    fn upsert_trust_weight(&self, entry: TrustWeightEntry) -> StoreResult<()>;

    fn trust_weight(
        &self,
        group: &GroupId,
        window: TrustWindow,
    ) -> StoreResult<Option<TrustWeightEntry>>;

    fn trust_weights(&self, window: TrustWindow) -> StoreResult<Vec<TrustWeightEntry>>;
}

pub trait CandleStore: Send + Sync {
    /// Cached candles with `start_ms <= ts_ms <= end_ms`, oldest first.
    fn cached_candles(
        &self,
        instrument: &InstrumentId,
        interval: Interval,
        start_ms: u64,
        end_ms: u64,
    ) -> StoreResult<Vec<Candle>>;

    /// Insert-or-ignore keyed by (instrument, interval, ts). Returns rows inserted.
    fn cache_candles(
        &self,
        instrument: &InstrumentId,
        interval: Interval,
        candles: &[Candle],
    ) -> StoreResult<usize>;
}

/// Everything the loops need.
pub trait Store: SignalStore + TradeStore + OutcomeStore + TrustWeightStore + CandleStore {}

impl<T> Store for T where T: SignalStore + TradeStore + OutcomeStore + TrustWeightStore + CandleStore
{}

/// Arc wrapper for Store trait objects.
pub type DynStore = Arc<dyn Store>;
