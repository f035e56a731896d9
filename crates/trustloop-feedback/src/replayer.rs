//! Counterfactual outcome replay.
//!
//! Walks every trade that may have opened a position and has no outcome
//! yet, replays it against historical candles and records exactly one
//! outcome per trade. Candles are read from the store cache first and
//! fetched from the exchange only on a shortfall.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trustloop_core::{
    now_ms, Candle, DynExchange, ExitReason, PassReport, TradeOutcome, TradeRecord,
};
use trustloop_store::{CandleStore, DynStore, JsonLinesWriter, OutcomeStore, TradeStore};
use trustloop_telemetry::{record_pass, Metrics};

use crate::barrier::{label, BarrierConfig, BarrierLabel, LabelResult};
use crate::error::FeedbackResult;

const JOURNAL_PREFIX: &str = "outcomes";
const JOURNAL_BUFFER: usize = 64;

// ============================================================================
// ReplayConfig
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Pass interval (ms).
    /// Default: 60,000.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Trades replayed per pass.
    /// Default: 100.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,

    #[serde(default)]
    pub barrier: BarrierConfig,

    /// Directory for the outcome journal. Disabled when unset.
    #[serde(default)]
    pub journal_dir: Option<PathBuf>,
}

fn default_interval_ms() -> u64 {
    60_000
}

fn default_batch_limit() -> usize {
    100
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            batch_limit: default_batch_limit(),
            barrier: BarrierConfig::default(),
            journal_dir: None,
        }
    }
}

/// Outcome for `trade` exiting as described by `label`.
///
/// Fees are charged at the taker rate on both legs. `NoData` exits carry
/// zero pnl and zero fees.
pub fn build_outcome(trade: &TradeRecord, label: &BarrierLabel, taker_fee_rate: Decimal) -> TradeOutcome {
    let entry = trade.entry_price;
    let exit = label.exit_price;
    let quantity = trade.quantity;
    let sign = trade.side.sign();

    let (fees, pnl, pnl_pct) = if label.exit_reason == ExitReason::NoData {
        (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO)
    } else {
        let fees = taker_fee_rate * (entry.inner() + exit.inner()) * quantity.inner();
        let gross = sign * (exit.inner() - entry.inner()) * quantity.inner();
        let pnl_pct = exit.return_from(entry).map_or(Decimal::ZERO, |r| r * sign);
        (fees, gross - fees, pnl_pct)
    };

    TradeOutcome {
        trade_id: trade.id,
        instrument: trade.instrument.clone(),
        group_id: trade.group_id.clone(),
        side: trade.side,
        open_ts_ms: trade.opened_at_ms,
        close_ts_ms: label.exit_ts_ms,
        entry_price: entry,
        exit_price: exit,
        quantity,
        hold_duration_ms: label.exit_ts_ms.saturating_sub(trade.opened_at_ms),
        exit_reason: label.exit_reason,
        fees,
        pnl,
        pnl_pct,
        max_favorable_excursion: label.max_favorable_excursion,
        max_adverse_excursion: label.max_adverse_excursion,
    }
}

// ============================================================================
// OutcomeReplayer
// ============================================================================

pub struct OutcomeReplayer {
    store: DynStore,
    exchange: DynExchange,
    config: ReplayConfig,
    journal: Option<Mutex<JsonLinesWriter<TradeOutcome>>>,
}

impl OutcomeReplayer {
    #[must_use]
    pub fn new(store: DynStore, exchange: DynExchange, config: ReplayConfig) -> Self {
        let journal = config
            .journal_dir
            .as_ref()
            .map(|dir| Mutex::new(JsonLinesWriter::new(dir, JOURNAL_PREFIX, JOURNAL_BUFFER)));
        Self {
            store,
            exchange,
            config,
            journal,
        }
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// One replay pass at `now_ms`.
    ///
    /// Processed counts labeled trades, skipped counts `NoData` labels and
    /// trades whose window is still open are left for a later pass.
    pub async fn run_pass(&self, now_ms: u64) -> FeedbackResult<PassReport> {
        let trades = self.store.trades_pending_outcome(self.config.batch_limit)?;
        let mut report = PassReport::default();

        for trade in &trades {
            match self.replay(trade, now_ms).await {
                Ok(Some(outcome)) => self.record(outcome, &mut report),
                Ok(None) => {
                    debug!(trade_id = %trade.id, "Barrier window still open");
                }
                Err(e) => {
                    warn!(trade_id = %trade.id, error = %e, "Replay failed");
                    report.record_errored();
                }
            }
        }

        self.flush_journal();
        Ok(report)
    }

    async fn replay(&self, trade: &TradeRecord, now_ms: u64) -> FeedbackResult<Option<TradeOutcome>> {
        let barrier = &self.config.barrier;
        let candles = self.price_path(trade, now_ms).await?;
        match label(
            trade.side,
            trade.entry_price,
            trade.opened_at_ms,
            &candles,
            now_ms,
            barrier,
        ) {
            LabelResult::Pending => Ok(None),
            LabelResult::Labeled(label) => {
                Ok(Some(build_outcome(trade, &label, barrier.taker_fee_rate)))
            }
        }
    }

    /// Candles from trade open to the earlier of the vertical barrier and now.
    ///
    /// Only closed bars are cached. A bar still forming at `now_ms` joins
    /// the path for this pass and is fetched again on the next one.
    async fn price_path(&self, trade: &TradeRecord, now_ms: u64) -> FeedbackResult<Vec<Candle>> {
        let interval = self.config.barrier.interval;
        let start = trade.opened_at_ms;
        let horizon = start
            .saturating_add(self.config.barrier.max_hold_ms())
            .min(now_ms);
        if horizon <= start {
            return Ok(Vec::new());
        }
        let end = horizon - 1;

        let cached = self
            .store
            .cached_candles(&trade.instrument, interval, start, end)?;
        let expected = usize::try_from(interval.bars_in(horizon - start)).unwrap_or(usize::MAX);
        if cached.len() >= expected {
            return Ok(cached);
        }

        let fetched = self
            .exchange
            .historical_candles(trade.instrument.clone(), interval, start, end)
            .await?;
        if fetched.is_empty() {
            return Ok(cached);
        }
        let (closed, forming): (Vec<Candle>, Vec<Candle>) = fetched
            .into_iter()
            .partition(|c| c.ts_ms.saturating_add(interval.as_millis()) <= now_ms);
        let inserted = self
            .store
            .cache_candles(&trade.instrument, interval, &closed)?;
        debug!(
            instrument = %trade.instrument,
            closed = closed.len(),
            forming = forming.len(),
            inserted,
            "Cached candles"
        );

        let mut path = self
            .store
            .cached_candles(&trade.instrument, interval, start, end)?;
        for candle in forming {
            if (start..=end).contains(&candle.ts_ms) && path.iter().all(|c| c.ts_ms != candle.ts_ms) {
                path.push(candle);
            }
        }
        path.sort_by_key(|c| c.ts_ms);
        Ok(path)
    }

    fn record(&self, outcome: TradeOutcome, report: &mut PassReport) {
        let trade_id = outcome.trade_id;
        let reason = outcome.exit_reason;
        match self.store.insert_outcome(outcome.clone()) {
            Ok(true) => {
                Metrics::outcome_labeled(&reason.to_string());
                debug!(
                    trade_id = %trade_id,
                    exit_reason = %reason,
                    pnl = %outcome.pnl,
                    "Outcome recorded"
                );
                if let Some(journal) = &self.journal {
                    if let Err(e) = journal.lock().append(outcome) {
                        warn!(trade_id = %trade_id, error = %e, "Outcome journal write failed");
                    }
                }
                if reason == ExitReason::NoData {
                    report.record_skipped();
                } else {
                    report.record_processed();
                }
            }
            Ok(false) => {
                debug!(trade_id = %trade_id, "Outcome already recorded");
            }
            Err(e) => {
                warn!(trade_id = %trade_id, error = %e, "Outcome insert failed");
                report.record_errored();
            }
        }
    }

    fn flush_journal(&self) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.lock().flush() {
                warn!(error = %e, "Outcome journal flush failed");
            }
        }
    }

    /// Run passes until cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_ms = self.config.interval_ms,
            max_hold_minutes = self.config.barrier.max_hold_minutes,
            journal = self.journal.is_some(),
            "OutcomeReplayer started"
        );
        let interval = Duration::from_millis(self.config.interval_ms);

        loop {
            let started = Instant::now();
            match self.run_pass(now_ms()).await {
                Ok(report) => record_pass("replayer", &report, started.elapsed()),
                Err(e) => warn!(error = %e, "Replay pass failed"),
            }

            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = shutdown.cancelled() => {
                    if let Some(journal) = &self.journal {
                        if let Err(e) = journal.lock().close() {
                            warn!(error = %e, "Outcome journal close failed");
                        }
                    }
                    info!("OutcomeReplayer stopped");
                    return;
                }
            }
        }
    }
}
