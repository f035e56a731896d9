//! Execution orchestrator.
//!
//! Each pass takes live signals in execution order and, for every signal,
//! claims it, re-checks admission, runs the risk gate, prices and sizes
//! the order, submits it and records the trade.
//!
//! Claiming is a conditional `WAIT_LIVE -> EXECUTING` transition, so two
//! orchestrators sharing a store never submit the same signal twice.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trustloop_core::{
    now_ms, ClientOrderId, DynExchange, GroupId, InstrumentSpec, MarginMode, NewTrade,
    OrderRequest, PassReport, Price, Side, Signal, SignalMeta, SignalStatus, SkipReason, TradeId,
};
use trustloop_registry::InstrumentCache;
use trustloop_risk::{RiskGate, RiskInput, RiskMode, RiskPlan, RiskVerdict};
use trustloop_store::{DynStore, SignalOrder, SignalStore, TradeStore};
use trustloop_telemetry::{record_pass, Metrics};

use crate::admission::{AdmissionGate, AdmissionSnapshot, BudgetConfig};
use crate::backoff::FailureBackoff;
use crate::error::{ExecutorError, ExecutorResult};
use crate::fill::FillPoller;
use crate::quantizer::{Quantization, Quantizer};

// ============================================================================
// ExecutorConfig
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Pass interval (ms).
    /// Default: 1,000.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Live signals taken per pass.
    /// Default: 50.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,

    /// Quotes older than this are treated as a transient failure (ms).
    /// Default: 5,000.
    #[serde(default = "default_max_quote_age_ms")]
    pub max_quote_age_ms: u64,

    /// Maximum drift between signal and live price.
    /// Default: 0.002 (0.2%).
    #[serde(default = "default_max_slippage_rate")]
    pub max_slippage_rate: Decimal,

    /// Period over which the risk gate counts trades per group (ms).
    /// Default: 86,400,000 (24 hours).
    #[serde(default = "default_risk_period_ms")]
    pub risk_period_ms: u64,

    /// Default: 20,000.
    #[serde(default = "default_fill_timeout_ms")]
    pub fill_timeout_ms: u64,

    /// Default: 500.
    #[serde(default = "default_fill_poll_interval_ms")]
    pub fill_poll_interval_ms: u64,

    /// Default: 1,000.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Default: 60,000.
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    #[serde(default)]
    pub margin_mode: MarginMode,
}

fn default_interval_ms() -> u64 {
    1_000
}

fn default_batch_limit() -> usize {
    50
}

fn default_max_quote_age_ms() -> u64 {
    5_000
}

fn default_max_slippage_rate() -> Decimal {
    dec!(0.002)
}

fn default_risk_period_ms() -> u64 {
    86_400_000
}

fn default_fill_timeout_ms() -> u64 {
    20_000
}

fn default_fill_poll_interval_ms() -> u64 {
    500
}

fn default_backoff_base_ms() -> u64 {
    crate::backoff::DEFAULT_BASE_MS
}

fn default_backoff_cap_ms() -> u64 {
    crate::backoff::DEFAULT_CAP_MS
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            batch_limit: default_batch_limit(),
            max_quote_age_ms: default_max_quote_age_ms(),
            max_slippage_rate: default_max_slippage_rate(),
            risk_period_ms: default_risk_period_ms(),
            fill_timeout_ms: default_fill_timeout_ms(),
            fill_poll_interval_ms: default_fill_poll_interval_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            margin_mode: MarginMode::default(),
        }
    }
}

// ============================================================================
// Protection sanity
// ============================================================================

/// Drop take-profit or stop-loss levels on the wrong side of `entry`.
///
/// For a buy, take-profit must be above entry and stop-loss below; a sell
/// mirrors this. A dropped level is never submitted.
pub fn sanitize_protection(
    side: Side,
    entry: Price,
    take_profit: Option<Price>,
    stop_loss: Option<Price>,
) -> (Option<Price>, Option<Price>) {
    let take_profit = take_profit.filter(|tp| {
        let valid = match side {
            Side::Buy => *tp > entry,
            Side::Sell => *tp < entry,
        };
        if !valid {
            warn!(%side, %entry, take_profit = %tp, "Dropping take-profit on wrong side of entry");
        }
        valid
    });
    let stop_loss = stop_loss.filter(|sl| {
        let valid = sl.is_positive()
            && match side {
                Side::Buy => *sl < entry,
                Side::Sell => *sl > entry,
            };
        if !valid {
            warn!(%side, %entry, stop_loss = %sl, "Dropping stop-loss on wrong side of entry");
        }
        valid
    });
    (take_profit, stop_loss)
}

/// Requested levels from the signal, falling back to the risk plan rates.
///
/// Levels are rounded away from entry onto the tick grid.
fn protection_targets(
    side: Side,
    entry: Price,
    meta: &SignalMeta,
    plan: &RiskPlan,
    spec: Option<&InstrumentSpec>,
) -> (Option<Price>, Option<Price>) {
    let (derived_tp, derived_sl) = plan.protection_levels(side, entry);
    let mut take_profit = meta.take_profit.unwrap_or(derived_tp);
    let mut stop_loss = meta.stop_loss.unwrap_or(derived_sl);

    if let Some(tick) = spec.map(|s| s.tick_size).filter(Price::is_positive) {
        match side {
            Side::Buy => {
                take_profit = take_profit.ceil_to_tick(tick);
                stop_loss = stop_loss.round_to_tick(tick);
            }
            Side::Sell => {
                take_profit = take_profit.round_to_tick(tick);
                stop_loss = stop_loss.ceil_to_tick(tick);
            }
        }
    }
    sanitize_protection(side, entry, Some(take_profit), Some(stop_loss))
}

/// Strategy group of a live signal.
///
/// Promotion guarantees a group before `WAIT_LIVE`, so a missing one here
/// is an invariant violation, not a skip.
pub fn require_group(signal: &Signal) -> ExecutorResult<GroupId> {
    signal.strategy_group_id.clone().ok_or_else(|| {
        ExecutorError::InvariantViolation(format!(
            "signal {} reached execution without a strategy group",
            signal.id
        ))
    })
}

// ============================================================================
// ExecutionOrchestrator
// ============================================================================

/// What happened to a claimed signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Execution {
    Submitted(TradeId),
    Skipped(SkipReason),
}

pub struct ExecutionOrchestrator {
    store: DynStore,
    exchange: DynExchange,
    admission: Arc<AdmissionGate>,
    quantizer: Quantizer,
    risk: RiskGate,
    budget: BudgetConfig,
    fill: FillPoller,
    backoff: FailureBackoff,
    config: ExecutorConfig,
}

impl ExecutionOrchestrator {
    #[must_use]
    pub fn new(
        store: DynStore,
        exchange: DynExchange,
        admission: Arc<AdmissionGate>,
        instruments: Arc<InstrumentCache>,
        risk: RiskGate,
        budget: BudgetConfig,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            quantizer: Quantizer::new(instruments, exchange.clone()),
            fill: FillPoller::new(config.fill_timeout_ms, config.fill_poll_interval_ms),
            backoff: FailureBackoff::new(config.backoff_base_ms, config.backoff_cap_ms),
            store,
            exchange,
            admission,
            risk,
            budget,
            config,
        }
    }

    pub fn backoff(&self) -> &FailureBackoff {
        &self.backoff
    }

    /// Mark signals left in `EXECUTING` by a previous process as `ERROR`.
    ///
    /// Their order may or may not have reached the exchange, so they are
    /// never re-submitted.
    pub fn recover_in_flight(&self, now_ms: u64) -> ExecutorResult<u32> {
        let stuck =
            self.store
                .signals_in_status(SignalStatus::Executing, SignalOrder::Oldest, usize::MAX)?;
        let mut recovered = 0;
        for signal in stuck {
            if self.store.transition_signal(
                signal.id,
                SignalStatus::Executing,
                SignalStatus::Error,
                now_ms,
            )? {
                warn!(
                    signal_id = %signal.id,
                    instrument = %signal.instrument,
                    "Signal was in flight at shutdown, fill state unknown; marked ERROR"
                );
                Metrics::signal_transition(&SignalStatus::Error.to_string());
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    /// One execution pass at `now_ms`.
    pub async fn run_pass(&self, now_ms: u64) -> ExecutorResult<PassReport> {
        let mut report = PassReport::default();

        if self.backoff.in_cooldown(now_ms) {
            debug!(
                remaining_ms = self.backoff.remaining_ms(now_ms),
                "Execution in backoff cooldown, skipping pass"
            );
            return Ok(report);
        }

        let signals = self.store.signals_in_status(
            SignalStatus::WaitLive,
            SignalOrder::Execution,
            self.config.batch_limit,
        )?;
        if signals.is_empty() {
            return Ok(report);
        }

        let snapshot = self.admission.snapshot();
        let balance = match self.exchange.available_balance().await {
            Ok(balance) => balance,
            Err(e) => {
                if e.is_transient() {
                    self.backoff.record_failure(now_ms);
                }
                return Err(e.into());
            }
        };
        debug!(signals = signals.len(), %balance, allowed = snapshot.len(), "Execution pass");

        for signal in &signals {
            if signal.is_past_expiry(now_ms) {
                if self.settle(signal, SignalStatus::WaitLive, SignalStatus::Expired, now_ms, &mut report) {
                    report.record_skipped();
                }
                continue;
            }

            if balance <= Decimal::ZERO {
                let skipped = SignalStatus::Skipped(SkipReason::NoBalance);
                if self.settle(signal, SignalStatus::WaitLive, skipped, now_ms, &mut report) {
                    report.record_skipped();
                }
                continue;
            }

            match self.store.transition_signal(
                signal.id,
                SignalStatus::WaitLive,
                SignalStatus::Executing,
                now_ms,
            ) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(signal_id = %signal.id, "Signal claimed elsewhere");
                    continue;
                }
                Err(e) => {
                    warn!(signal_id = %signal.id, error = %e, "Signal claim failed");
                    report.record_errored();
                    continue;
                }
            }

            match self.execute(signal, &snapshot, balance, now_ms).await {
                Ok(Execution::Submitted(trade_id)) => {
                    self.backoff.record_success();
                    debug!(signal_id = %signal.id, trade_id = %trade_id, "Signal executed");
                    if self.settle(signal, SignalStatus::Executing, SignalStatus::Done, now_ms, &mut report) {
                        report.record_processed();
                    }
                }
                Ok(Execution::Skipped(reason)) => {
                    info!(signal_id = %signal.id, reason = reason.as_str(), "Signal skipped");
                    let skipped = SignalStatus::Skipped(reason);
                    if self.settle(signal, SignalStatus::Executing, skipped, now_ms, &mut report) {
                        report.record_skipped();
                    }
                }
                Err(e) => {
                    warn!(signal_id = %signal.id, error = %e, "Signal execution failed");
                    if e.is_transient() {
                        self.backoff.record_failure(now_ms);
                    }
                    if self.settle(signal, SignalStatus::Executing, SignalStatus::Error, now_ms, &mut report) {
                        report.record_errored();
                    }
                }
            }
        }

        Ok(report)
    }

    /// Apply a status change for one signal. A store failure is logged and
    /// counted as errored so the rest of the pass still runs.
    fn settle(
        &self,
        signal: &Signal,
        from: SignalStatus,
        to: SignalStatus,
        now_ms: u64,
        report: &mut PassReport,
    ) -> bool {
        match self.store.transition_signal(signal.id, from, to, now_ms) {
            Ok(moved) => {
                if moved {
                    Metrics::signal_transition(&to.to_string());
                }
                moved
            }
            Err(e) => {
                warn!(signal_id = %signal.id, %from, %to, error = %e, "Signal status update failed");
                report.record_errored();
                false
            }
        }
    }

    async fn execute(
        &self,
        signal: &Signal,
        snapshot: &AdmissionSnapshot,
        balance: Decimal,
        now_ms: u64,
    ) -> ExecutorResult<Execution> {
        let group_id = require_group(signal)?;
        let Some(parameters) = snapshot.parameters(&group_id) else {
            return Ok(Execution::Skipped(SkipReason::NotAllowed));
        };
        let Some(side) = signal.resolve_side() else {
            return Ok(Execution::Skipped(SkipReason::NoSide));
        };

        let since_ms = now_ms.saturating_sub(self.config.risk_period_ms);
        let trades_in_period = self.store.count_trades_since(&group_id, since_ms)?;
        let input = RiskInput::from_signal(signal, trades_in_period);
        let plan = match self.risk.evaluate(&input, parameters, RiskMode::Open) {
            RiskVerdict::Allow(plan) => plan,
            RiskVerdict::Reject(reason) => {
                info!(signal_id = %signal.id, group = %group_id, ?reason, "Risk gate rejected signal");
                return Ok(Execution::Skipped(SkipReason::RiskRejected));
            }
        };

        let quote = self.exchange.reference_price(signal.instrument.clone()).await?;
        let age_ms = quote.age_ms(now_ms);
        if age_ms > self.config.max_quote_age_ms {
            return Err(ExecutorError::StalePrice {
                instrument: signal.instrument.clone(),
                age_ms,
            });
        }
        if let Some(drift) = quote.price.return_from(signal.reference_price) {
            if drift.abs() > self.config.max_slippage_rate {
                info!(
                    signal_id = %signal.id,
                    reference = %signal.reference_price,
                    live = %quote.price,
                    %drift,
                    "Price moved past slippage limit"
                );
                return Ok(Execution::Skipped(SkipReason::Slippage));
            }
        }

        let share = snapshot.share(&group_id).unwrap_or(Decimal::ZERO);
        let budget = self.budget.per_signal(balance, share);
        let quantization = match self
            .quantizer
            .quantize(&signal.instrument, budget, plan.leverage, Some(quote.price), now_ms)
            .await
        {
            Ok(q) => q,
            Err(ExecutorError::Registry(e)) if !e.is_transient() => {
                warn!(signal_id = %signal.id, error = %e, "Instrument metadata unavailable");
                return Ok(Execution::Skipped(SkipReason::NoMetadata));
            }
            Err(e) => return Err(e),
        };
        let contracts = match quantization {
            Quantization::Quantized { contracts, .. } => contracts,
            Quantization::Insufficient { minimum, .. } => {
                debug!(signal_id = %signal.id, %budget, %minimum, "Budget below minimum size");
                return Ok(Execution::Skipped(SkipReason::SizeZero));
            }
        };

        let spec = self.quantizer.instruments().get(&signal.instrument);
        let (take_profit, stop_loss) =
            protection_targets(side, quote.price, &signal.meta, &plan, spec.as_ref());

        let client_order_id = ClientOrderId::new();
        let request = OrderRequest {
            client_order_id: client_order_id.clone(),
            instrument: signal.instrument.clone(),
            side,
            contracts,
            leverage: plan.leverage,
            margin_mode: self.config.margin_mode,
            group_id: group_id.clone(),
            take_profit,
            stop_loss,
        };
        let order_id = self.exchange.submit_order(request).await?;
        Metrics::order_submitted(signal.instrument.as_str(), &side.to_string());
        info!(
            signal_id = %signal.id,
            order_id = %order_id,
            instrument = %signal.instrument,
            %side,
            %contracts,
            leverage = plan.leverage,
            %budget,
            "Order submitted"
        );

        let fill_state = self
            .fill
            .await_fill(self.exchange.as_ref(), &signal.instrument, &order_id)
            .await;
        Metrics::fill_state(&fill_state.to_string());

        let quantity = spec.map_or(contracts, |s| s.base_quantity(contracts));
        let trade_id = self.store.insert_trade(NewTrade {
            signal_id: signal.id,
            instrument: signal.instrument.clone(),
            group_id,
            side,
            contracts,
            quantity,
            entry_price: quote.price,
            leverage: plan.leverage,
            budget,
            order_id,
            client_order_id,
            fill_state,
            stop_loss,
            take_profit,
            add_on_size: plan.add_on_size,
            opened_at_ms: now_ms,
        })?;
        Ok(Execution::Submitted(trade_id))
    }

    /// Recover in-flight signals, then run passes until cancelled.
    ///
    /// While backing off the loop sleeps for the longer of the pass
    /// interval and the remaining cooldown.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_ms = self.config.interval_ms,
            batch_limit = self.config.batch_limit,
            "ExecutionOrchestrator started"
        );
        match self.recover_in_flight(now_ms()) {
            Ok(0) => {}
            Ok(recovered) => warn!(recovered, "Recovered in-flight signals"),
            Err(e) => warn!(error = %e, "In-flight recovery failed"),
        }

        let interval = Duration::from_millis(self.config.interval_ms);
        loop {
            let started = Instant::now();
            match self.run_pass(now_ms()).await {
                Ok(report) => record_pass("orchestrator", &report, started.elapsed()),
                Err(e) => warn!(error = %e, "Execution pass failed"),
            }

            let cooldown = Duration::from_millis(self.backoff.remaining_ms(now_ms()));
            tokio::select! {
                () = tokio::time::sleep(interval.max(cooldown)) => {}
                () = shutdown.cancelled() => {
                    info!("ExecutionOrchestrator stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionConfig;
    use parking_lot::Mutex;
    use trustloop_core::{
        Candle, FillMode, FillState, InstrumentId, Interval, NewSignal, PaperExchange, Size,
        StrategyGroup, TradeOutcome, TradeRecord, TrustWeightEntry, TrustWindow,
    };
    use trustloop_store::{
        CandleStore, MemoryParameterPool, MemoryStore, OutcomeStore, StoreError, StoreResult,
        TrustWeightStore,
    };

    const NOW: u64 = 1_700_000_000_000;

    struct Fixture {
        store: Arc<MemoryStore>,
        paper: Arc<PaperExchange>,
        orchestrator: ExecutionOrchestrator,
    }

    fn instrument() -> InstrumentId {
        InstrumentId::from("BTC-USDT-SWAP")
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let paper = Arc::new(PaperExchange::new());
        paper.set_balance(dec!(2000));
        paper.set_spec(
            instrument(),
            InstrumentSpec {
                contract_value: dec!(0.01),
                tick_size: Price::new(dec!(0.1)),
                ..Default::default()
            },
        );
        paper.set_quote(instrument(), Price::new(dec!(50000)), NOW);

        let exchange: DynExchange = paper.clone();
        let pool = Arc::new(MemoryParameterPool::new([StrategyGroup::new(GroupId::from("g1"))]));
        let admission = Arc::new(AdmissionGate::new(
            pool,
            store.clone(),
            AdmissionConfig::default(),
        ));
        admission.refresh(NOW).unwrap();
        let instruments = Arc::new(InstrumentCache::new(exchange.clone(), 60_000));
        let config = ExecutorConfig {
            fill_timeout_ms: 100,
            fill_poll_interval_ms: 10,
            ..Default::default()
        };
        let orchestrator = ExecutionOrchestrator::new(
            store.clone(),
            exchange,
            admission,
            instruments,
            RiskGate::default(),
            BudgetConfig::default(),
            config,
        );
        Fixture {
            store,
            paper,
            orchestrator,
        }
    }

    fn live_signal(f: &Fixture, new: NewSignal) -> trustloop_core::SignalId {
        let id = f.store.insert_signal(new, NOW).unwrap();
        for (from, to) in [
            (SignalStatus::New, SignalStatus::WaitRehearsal),
            (SignalStatus::WaitRehearsal, SignalStatus::WaitLive),
        ] {
            assert!(f.store.transition_signal(id, from, to, NOW).unwrap());
        }
        id
    }

    fn breakout(group: Option<&str>) -> NewSignal {
        let mut new = NewSignal::new(instrument(), "BREAKOUT_UP", Price::new(dec!(50000)), NOW);
        new.strategy_group_id = group.map(GroupId::from);
        new
    }

    fn status(f: &Fixture, id: trustloop_core::SignalId) -> SignalStatus {
        f.store.get_signal(id).unwrap().unwrap().status
    }

    #[test]
    fn test_sanitize_drops_wrong_side_levels() {
        let entry = Price::new(dec!(50000));
        let (tp, sl) = sanitize_protection(
            Side::Buy,
            entry,
            Some(Price::new(dec!(49000))),
            Some(Price::new(dec!(49500))),
        );
        assert_eq!(tp, None);
        assert_eq!(sl, Some(Price::new(dec!(49500))));

        let (tp, sl) = sanitize_protection(
            Side::Sell,
            entry,
            Some(Price::new(dec!(49000))),
            Some(Price::new(dec!(49500))),
        );
        assert_eq!(tp, Some(Price::new(dec!(49000))));
        assert_eq!(sl, None);
    }

    #[test]
    fn test_require_group() {
        let signal = Signal::from_new(trustloop_core::SignalId(7), breakout(None), NOW);
        assert!(matches!(
            require_group(&signal),
            Err(ExecutorError::InvariantViolation(_))
        ));
        let signal = Signal::from_new(trustloop_core::SignalId(8), breakout(Some("g1")), NOW);
        assert_eq!(require_group(&signal).unwrap(), GroupId::from("g1"));
    }

    #[tokio::test]
    async fn test_executes_live_signal() {
        let f = fixture();
        let id = live_signal(&f, breakout(Some("g1")));

        let report = f.orchestrator.run_pass(NOW).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(status(&f, id), SignalStatus::Done);

        let orders = f.paper.submitted_orders();
        assert_eq!(orders.len(), 1);
        // pool = max(10, 2000 * 0.05) = 100, share 1 -> budget 100
        // 100 * 10 / (50000 * 0.01) = 2 contracts
        assert_eq!(orders[0].contracts, Size::new(dec!(2)));
        assert_eq!(orders[0].side, Side::Buy);
        assert_eq!(orders[0].group_id, GroupId::from("g1"));
        assert!(orders[0].take_profit.unwrap() > Price::new(dec!(50000)));
        assert!(orders[0].stop_loss.unwrap() < Price::new(dec!(50000)));

        let pending = f.store.trades_pending_outcome(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].signal_id, id);
        assert_eq!(pending[0].fill_state, FillState::Filled);
        assert_eq!(pending[0].quantity, Size::new(dec!(0.02)));
    }

    #[tokio::test]
    async fn test_wrong_side_take_profit_is_not_submitted() {
        let f = fixture();
        let mut new = breakout(Some("g1"));
        new.meta.take_profit = Some(Price::new(dec!(49000)));
        live_signal(&f, new);

        f.orchestrator.run_pass(NOW).await.unwrap();
        let orders = f.paper.submitted_orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].take_profit, None);
    }

    #[tokio::test]
    async fn test_zero_balance_skips_every_signal() {
        let f = fixture();
        f.paper.set_balance(Decimal::ZERO);
        let a = live_signal(&f, breakout(Some("g1")));
        let b = live_signal(&f, breakout(Some("g1")));

        let report = f.orchestrator.run_pass(NOW).await.unwrap();
        assert_eq!(report.skipped, 2);
        for id in [a, b] {
            assert_eq!(status(&f, id), SignalStatus::Skipped(SkipReason::NoBalance));
        }
        assert!(f.paper.submitted_orders().is_empty());
    }

    #[tokio::test]
    async fn test_precondition_skips() {
        let f = fixture();
        let not_allowed = live_signal(&f, breakout(Some("g2")));
        let mut sideless = breakout(Some("g1"));
        sideless.kind = "RANGE".to_string();
        let sideless = live_signal(&f, sideless);
        let mut drifted = breakout(Some("g1"));
        drifted.reference_price = Price::new(dec!(49000));
        let drifted = live_signal(&f, drifted);

        let report = f.orchestrator.run_pass(NOW).await.unwrap();
        assert_eq!(report.skipped, 3);
        assert_eq!(status(&f, not_allowed), SignalStatus::Skipped(SkipReason::NotAllowed));
        assert_eq!(status(&f, sideless), SignalStatus::Skipped(SkipReason::NoSide));
        assert_eq!(status(&f, drifted), SignalStatus::Skipped(SkipReason::Slippage));
    }

    #[tokio::test]
    async fn test_missing_group_is_error() {
        let f = fixture();
        let id = live_signal(&f, breakout(None));
        let report = f.orchestrator.run_pass(NOW).await.unwrap();
        assert_eq!(report.errored, 1);
        assert_eq!(status(&f, id), SignalStatus::Error);
        // Invariant violations do not trip the backoff.
        assert_eq!(f.orchestrator.backoff().consecutive(), 0);
    }

    #[tokio::test]
    async fn test_stale_quote_backs_off() {
        let f = fixture();
        f.paper.set_quote(instrument(), Price::new(dec!(50000)), NOW - 10_000);
        let first = live_signal(&f, breakout(Some("g1")));
        let report = f.orchestrator.run_pass(NOW).await.unwrap();
        assert_eq!(report.errored, 1);
        assert_eq!(status(&f, first), SignalStatus::Error);
        assert_eq!(f.orchestrator.backoff().consecutive(), 1);

        // Next pass is skipped entirely while cooling down.
        let second = live_signal(&f, breakout(Some("g1")));
        let report = f.orchestrator.run_pass(NOW + 10).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(status(&f, second), SignalStatus::WaitLive);

        // After cooldown a fresh quote succeeds and resets the streak.
        f.paper.set_quote(instrument(), Price::new(dec!(50000)), NOW + 2_000);
        let report = f.orchestrator.run_pass(NOW + 2_000).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(f.orchestrator.backoff().consecutive(), 0);
    }

    #[tokio::test]
    async fn test_rejected_order_is_error_without_backoff() {
        let f = fixture();
        f.paper.set_fill_mode(FillMode::Reject);
        let id = live_signal(&f, breakout(Some("g1")));
        let report = f.orchestrator.run_pass(NOW).await.unwrap();
        assert_eq!(report.errored, 1);
        assert_eq!(status(&f, id), SignalStatus::Error);
        assert_eq!(f.orchestrator.backoff().consecutive(), 0);
    }

    #[tokio::test]
    async fn test_small_budget_skips_size_zero() {
        let f = fixture();
        f.paper.set_quote(instrument(), Price::new(dec!(500000)), NOW);
        let mut new = breakout(Some("g1"));
        new.reference_price = Price::new(dec!(500000));
        new.meta.leverage = Some(1);
        let id = live_signal(&f, new);

        f.orchestrator.run_pass(NOW).await.unwrap();
        assert_eq!(status(&f, id), SignalStatus::Skipped(SkipReason::SizeZero));
    }

    #[test]
    fn test_recover_in_flight_marks_error() {
        let f = fixture();
        let id = live_signal(&f, breakout(Some("g1")));
        assert!(f
            .store
            .transition_signal(id, SignalStatus::WaitLive, SignalStatus::Executing, NOW)
            .unwrap());

        assert_eq!(f.orchestrator.recover_in_flight(NOW + 1).unwrap(), 1);
        assert_eq!(status(&f, id), SignalStatus::Error);
        assert_eq!(f.orchestrator.recover_in_flight(NOW + 2).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_live_signal() {
        let f = fixture();
        let mut stale = breakout(Some("g1"));
        stale.expiry_ms = Some(NOW + 1_000);
        let stale = live_signal(&f, stale);
        let later = NOW + 1_001;
        f.paper.set_quote(instrument(), Price::new(dec!(50000)), later);
        let report = f.orchestrator.run_pass(later).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(status(&f, stale), SignalStatus::Expired);
    }

    #[tokio::test]
    async fn test_stored_expiry_outlives_default_ttl() {
        let f = fixture();
        let mut long_lived = breakout(Some("g1"));
        long_lived.expiry_ms = Some(NOW + 3_600_000);
        let id = live_signal(&f, long_lived);
        let later = NOW + 600_000;
        f.paper.set_quote(instrument(), Price::new(dec!(50000)), later);
        let report = f.orchestrator.run_pass(later).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(status(&f, id), SignalStatus::Done);
    }

    /// Fails every status change of one signal, forwards everything else.
    struct BrokenSignal {
        inner: MemoryStore,
        broken: Mutex<Option<trustloop_core::SignalId>>,
    }

    impl SignalStore for BrokenSignal {
        fn insert_signal(&self, signal: NewSignal, now_ms: u64) -> StoreResult<trustloop_core::SignalId> {
            self.inner.insert_signal(signal, now_ms)
        }

        fn get_signal(&self, id: trustloop_core::SignalId) -> StoreResult<Option<Signal>> {
            self.inner.get_signal(id)
        }

        fn signals_in_status(
            &self,
            status: SignalStatus,
            order: SignalOrder,
            limit: usize,
        ) -> StoreResult<Vec<Signal>> {
            self.inner.signals_in_status(status, order, limit)
        }

        fn transition_signal(
            &self,
            id: trustloop_core::SignalId,
            from: SignalStatus,
            to: SignalStatus,
            now_ms: u64,
        ) -> StoreResult<bool> {
            if *self.broken.lock() == Some(id) {
                return Err(StoreError::UnknownSignal(id));
            }
            self.inner.transition_signal(id, from, to, now_ms)
        }

        fn begin_rehearsal(
            &self,
            id: trustloop_core::SignalId,
            expiry_ms: u64,
            now_ms: u64,
        ) -> StoreResult<bool> {
            self.inner.begin_rehearsal(id, expiry_ms, now_ms)
        }
    }

    impl TradeStore for BrokenSignal {
        fn insert_trade(&self, trade: NewTrade) -> StoreResult<TradeId> {
            self.inner.insert_trade(trade)
        }

        fn get_trade(&self, id: TradeId) -> StoreResult<Option<TradeRecord>> {
            self.inner.get_trade(id)
        }

        fn trades_pending_outcome(&self, limit: usize) -> StoreResult<Vec<TradeRecord>> {
            self.inner.trades_pending_outcome(limit)
        }

        fn count_trades_since(&self, group: &GroupId, since_ms: u64) -> StoreResult<u32> {
            self.inner.count_trades_since(group, since_ms)
        }
    }

    impl OutcomeStore for BrokenSignal {
        fn insert_outcome(&self, outcome: TradeOutcome) -> StoreResult<bool> {
            self.inner.insert_outcome(outcome)
        }

        fn outcome_for_trade(&self, trade: TradeId) -> StoreResult<Option<TradeOutcome>> {
            self.inner.outcome_for_trade(trade)
        }

        fn outcomes_since(&self, since_ms: u64) -> StoreResult<Vec<TradeOutcome>> {
            self.inner.outcomes_since(since_ms)
        }
    }

    impl TrustWeightStore for BrokenSignal {
        fn upsert_trust_weight(&self, entry: TrustWeightEntry) -> StoreResult<()> {
            self.inner.upsert_trust_weight(entry)
        }

        fn trust_weight(
            &self,
            group: &GroupId,
            window: TrustWindow,
        ) -> StoreResult<Option<TrustWeightEntry>> {
            self.inner.trust_weight(group, window)
        }

        fn trust_weights(&self, window: TrustWindow) -> StoreResult<Vec<TrustWeightEntry>> {
            self.inner.trust_weights(window)
        }
    }

    impl CandleStore for BrokenSignal {
        fn cached_candles(
            &self,
            instrument: &InstrumentId,
            interval: Interval,
            start_ms: u64,
            end_ms: u64,
        ) -> StoreResult<Vec<Candle>> {
            self.inner.cached_candles(instrument, interval, start_ms, end_ms)
        }

        fn cache_candles(
            &self,
            instrument: &InstrumentId,
            interval: Interval,
            candles: &[Candle],
        ) -> StoreResult<usize> {
            self.inner.cache_candles(instrument, interval, candles)
        }
    }

    #[tokio::test]
    async fn test_store_failure_on_one_signal_does_not_abort_pass() {
        let f = fixture();
        let store = Arc::new(BrokenSignal {
            inner: MemoryStore::new(),
            broken: Mutex::new(None),
        });
        let exchange: DynExchange = f.paper.clone();
        let pool = Arc::new(MemoryParameterPool::new([StrategyGroup::new(GroupId::from("g1"))]));
        let admission = Arc::new(AdmissionGate::new(pool, store.clone(), AdmissionConfig::default()));
        admission.refresh(NOW).unwrap();
        let orchestrator = ExecutionOrchestrator::new(
            store.clone(),
            exchange.clone(),
            admission,
            Arc::new(InstrumentCache::new(exchange, 60_000)),
            RiskGate::default(),
            BudgetConfig::default(),
            ExecutorConfig {
                fill_timeout_ms: 100,
                fill_poll_interval_ms: 10,
                ..Default::default()
            },
        );

        let mut ids = Vec::new();
        for _ in 0..2 {
            let id = store.insert_signal(breakout(Some("g1")), NOW).unwrap();
            store
                .transition_signal(id, SignalStatus::New, SignalStatus::WaitRehearsal, NOW)
                .unwrap();
            store
                .transition_signal(id, SignalStatus::WaitRehearsal, SignalStatus::WaitLive, NOW)
                .unwrap();
            ids.push(id);
        }
        *store.broken.lock() = Some(ids[0]);

        let report = orchestrator.run_pass(NOW).await.unwrap();
        assert_eq!(report.errored, 1);
        assert_eq!(report.processed, 1);
        assert_eq!(store.get_signal(ids[0]).unwrap().unwrap().status, SignalStatus::WaitLive);
        assert_eq!(store.get_signal(ids[1]).unwrap().unwrap().status, SignalStatus::Done);
    }
}
