//! In-memory store.
//!
//! All tables sit behind one `RwLock`, so every write (including the
//! conditional signal transition) is atomic with respect to readers.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::{debug, trace};
use trustloop_core::{
    Candle, GroupId, InstrumentId, Interval, NewSignal, NewTrade, Signal, SignalId,
    SignalStatus, TradeId, TradeOutcome, TradeRecord, TrustWeightEntry, TrustWindow,
};

use crate::error::{StoreError, StoreResult};
use crate::store::{
    CandleStore, OutcomeStore, SignalOrder, SignalStore, TradeStore, TrustWeightStore,
};

type CandleKey = (InstrumentId, Interval, u64);

#[derive(Default)]
struct Tables {
    signals: BTreeMap<SignalId, Signal>,
    next_signal_id: u64,
    trades: BTreeMap<TradeId, TradeRecord>,
    next_trade_id: u64,
    outcomes: BTreeMap<TradeId, TradeOutcome>,
    trust_weights: BTreeMap<(GroupId, TrustWindow), TrustWeightEntry>,
    candles: BTreeMap<CandleKey, Candle>,
}

/// Store backed by process memory.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal_count(&self) -> usize {
        self.tables.read().signals.len()
    }

    pub fn outcome_count(&self) -> usize {
        self.tables.read().outcomes.len()
    }
}

impl SignalStore for MemoryStore {
    fn insert_signal(&self, signal: NewSignal, now_ms: u64) -> StoreResult<SignalId> {
        let mut tables = self.tables.write();
        tables.next_signal_id += 1;
        let id = SignalId(tables.next_signal_id);
        tables
            .signals
            .insert(id, Signal::from_new(id, signal, now_ms));
        trace!(signal_id = %id, "Signal inserted");
        Ok(id)
    }

    fn get_signal(&self, id: SignalId) -> StoreResult<Option<Signal>> {
        Ok(self.tables.read().signals.get(&id).cloned())
    }

    fn signals_in_status(
        &self,
        status: SignalStatus,
        order: SignalOrder,
        limit: usize,
    ) -> StoreResult<Vec<Signal>> {
        let tables = self.tables.read();
        let mut signals: Vec<Signal> = tables
            .signals
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect();
        match order {
            SignalOrder::Oldest => {
                signals.sort_by(|a, b| (a.timestamp_ms, a.id).cmp(&(b.timestamp_ms, b.id)))
            }
            SignalOrder::Execution => signals.sort_by(Signal::execution_order),
        }
        signals.truncate(limit);
        Ok(signals)
    }

    fn transition_signal(
        &self,
        id: SignalId,
        from: SignalStatus,
        to: SignalStatus,
        now_ms: u64,
    ) -> StoreResult<bool> {
        from.transition(to)?;

        let mut tables = self.tables.write();
        let signal = tables
            .signals
            .get_mut(&id)
            .ok_or(StoreError::UnknownSignal(id))?;
        if signal.status != from {
            debug!(
                signal_id = %id,
                expected = %from,
                actual = %signal.status,
                "Signal transition lost race"
            );
            return Ok(false);
        }
        signal.status = to;
        signal.updated_at_ms = now_ms;
        Ok(true)
    }

    fn begin_rehearsal(&self, id: SignalId, expiry_ms: u64, now_ms: u64) -> StoreResult<bool> {
        let mut tables = self.tables.write();
        let signal = tables
            .signals
            .get_mut(&id)
            .ok_or(StoreError::UnknownSignal(id))?;
        if signal.status != SignalStatus::New {
            return Ok(false);
        }
        signal.status = SignalStatus::WaitRehearsal;
        signal.expiry_ms.get_or_insert(expiry_ms);
        signal.updated_at_ms = now_ms;
        Ok(true)
    }
}

impl TradeStore for MemoryStore {
    fn insert_trade(&self, trade: NewTrade) -> StoreResult<TradeId> {
        let mut tables = self.tables.write();
        tables.next_trade_id += 1;
        let id = TradeId(tables.next_trade_id);
        tables.trades.insert(id, TradeRecord { id, trade });
        Ok(id)
    }

    fn get_trade(&self, id: TradeId) -> StoreResult<Option<TradeRecord>> {
        Ok(self.tables.read().trades.get(&id).cloned())
    }

    fn trades_pending_outcome(&self, limit: usize) -> StoreResult<Vec<TradeRecord>> {
        let tables = self.tables.read();
        let mut pending: Vec<TradeRecord> = tables
            .trades
            .values()
            .filter(|t| t.fill_state.may_hold_position() && !tables.outcomes.contains_key(&t.id))
            .cloned()
            .collect();
        pending.sort_by(|a, b| (a.opened_at_ms, a.id).cmp(&(b.opened_at_ms, b.id)));
        pending.truncate(limit);
        Ok(pending)
    }

    fn count_trades_since(&self, group: &GroupId, since_ms: u64) -> StoreResult<u32> {
        let count = self
            .tables
            .read()
            .trades
            .values()
            .filter(|t| &t.group_id == group && t.opened_at_ms >= since_ms)
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }
}

impl OutcomeStore for MemoryStore {
    fn insert_outcome(&self, outcome: TradeOutcome) -> StoreResult<bool> {
        let mut tables = self.tables.write();
        if tables.outcomes.contains_key(&outcome.trade_id) {
            return Ok(false);
        }
        tables.outcomes.insert(outcome.trade_id, outcome);
        Ok(true)
    }

    fn outcome_for_trade(&self, trade: TradeId) -> StoreResult<Option<TradeOutcome>> {
        Ok(self.tables.read().outcomes.get(&trade).cloned())
    }

    fn outcomes_since(&self, since_ms: u64) -> StoreResult<Vec<TradeOutcome>> {
        Ok(self
            .tables
            .read()
            .outcomes
            .values()
            .filter(|o| o.open_ts_ms >= since_ms)
            .cloned()
            .collect())
    }
}

impl TrustWeightStore for MemoryStore {
    fn upsert_trust_weight(&self, entry: TrustWeightEntry) -> StoreResult<()> {
        let key = (entry.group_id.clone(), entry.window);
        self.tables.write().trust_weights.insert(key, entry);
        Ok(())
    }

    fn trust_weight(
        &self,
        group: &GroupId,
        window: TrustWindow,
    ) -> StoreResult<Option<TrustWeightEntry>> {
        Ok(self
            .tables
            .read()
            .trust_weights
            .get(&(group.clone(), window))
            .cloned())
    }

    fn trust_weights(&self, window: TrustWindow) -> StoreResult<Vec<TrustWeightEntry>> {
        Ok(self
            .tables
            .read()
            .trust_weights
            .values()
            .filter(|e| e.window == window)
            .cloned()
            .collect())
    }
}

impl CandleStore for MemoryStore {
    fn cached_candles(
        &self,
        instrument: &InstrumentId,
        interval: Interval,
        start_ms: u64,
        end_ms: u64,
    ) -> StoreResult<Vec<Candle>> {
        if start_ms > end_ms {
            return Ok(Vec::new());
        }
        let lo = (instrument.clone(), interval, start_ms);
        let hi = (instrument.clone(), interval, end_ms);
        Ok(self
            .tables
            .read()
            .candles
            .range(lo..=hi)
            .map(|(_, c)| c.clone())
            .collect())
    }

    fn cache_candles(
        &self,
        instrument: &InstrumentId,
        interval: Interval,
        candles: &[Candle],
    ) -> StoreResult<usize> {
        let mut tables = self.tables.write();
        let mut inserted = 0;
        for candle in candles {
            let key = (instrument.clone(), interval, candle.ts_ms);
            if !tables.candles.contains_key(&key) {
                tables.candles.insert(key, candle.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}
