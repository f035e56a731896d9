//! Trust weights from labeled outcomes.
//!
//! For each lookback window the updater aggregates countable outcomes per
//! strategy group, turns the chosen statistic into a bounded weight around
//! the neutral 1.0, and upserts one row per (group, window). Groups with
//! too few trades keep whatever row they had.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trustloop_core::{
    now_ms, DynParameterPool, GroupId, PassReport, PoolError, TradeOutcome, TrustWeightEntry,
    TrustWindow,
};
use trustloop_store::{DynStore, OutcomeStore, TrustWeightStore};
use trustloop_telemetry::{record_pass, Metrics};

use crate::error::{FeedbackError, FeedbackResult};

// ============================================================================
// TrustConfig
// ============================================================================

/// Performance statistic a weight is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustStatistic {
    /// Sum of pnl, multiplied by `scale`.
    #[default]
    ProfitSum,
    /// `2 * (win_rate - 0.5)`, independent of `scale`.
    WinRate,
    /// Mean pnl_pct, multiplied by `scale`.
    MeanReturn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustConfig {
    /// Pass interval (ms).
    /// Default: 300,000 (5 minutes).
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Lookback windows in days.
    /// Default: [7, 30].
    #[serde(default = "default_windows")]
    pub windows: Vec<TrustWindow>,

    #[serde(default)]
    pub statistic: TrustStatistic,

    /// Multiplier applied to profit sums and mean returns.
    /// Default: 1.
    #[serde(default = "default_scale")]
    pub scale: Decimal,

    /// Default: 0.5.
    #[serde(default = "default_min_weight")]
    pub min_weight: Decimal,

    /// Default: 1.5.
    #[serde(default = "default_max_weight")]
    pub max_weight: Decimal,

    /// Countable outcomes required before a group's row is rewritten.
    /// Default: 3.
    #[serde(default = "default_min_trades")]
    pub min_trades: u32,

    /// Window whose win rate and score are written back to the pool.
    /// Default: 7.
    #[serde(default = "default_write_back_window")]
    pub write_back_window: TrustWindow,

    /// Default: "outcome_replay".
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_interval_ms() -> u64 {
    300_000
}

fn default_windows() -> Vec<TrustWindow> {
    vec![TrustWindow::WEEK, TrustWindow::MONTH]
}

fn default_scale() -> Decimal {
    Decimal::ONE
}

fn default_min_weight() -> Decimal {
    dec!(0.5)
}

fn default_max_weight() -> Decimal {
    dec!(1.5)
}

fn default_min_trades() -> u32 {
    3
}

fn default_write_back_window() -> TrustWindow {
    TrustWindow::WEEK
}

fn default_source() -> String {
    "outcome_replay".to_string()
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            windows: default_windows(),
            statistic: TrustStatistic::default(),
            scale: default_scale(),
            min_weight: default_min_weight(),
            max_weight: default_max_weight(),
            min_trades: default_min_trades(),
            write_back_window: default_write_back_window(),
            source: default_source(),
        }
    }
}

impl TrustConfig {
    pub fn validate(&self) -> FeedbackResult<()> {
        if self.min_weight < Decimal::ZERO || self.min_weight > self.max_weight {
            return Err(FeedbackError::InvalidConfig(format!(
                "weight bounds must satisfy 0 <= min_weight <= max_weight, got [{}, {}]",
                self.min_weight, self.max_weight
            )));
        }
        if self.windows.is_empty() || self.windows.iter().any(|w| w.days() == 0) {
            return Err(FeedbackError::InvalidConfig(
                "windows must be non-empty and positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Aggregation
// ============================================================================

/// Aggregate of one group's countable outcomes in one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupPerformance {
    pub trade_count: u32,
    pub wins: u32,
    pub profit_sum: Decimal,
    pub return_sum: Decimal,
}

impl GroupPerformance {
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a TradeOutcome>) -> Self {
        let mut perf = Self {
            trade_count: 0,
            wins: 0,
            profit_sum: Decimal::ZERO,
            return_sum: Decimal::ZERO,
        };
        for outcome in outcomes.into_iter().filter(|o| o.is_countable()) {
            perf.trade_count += 1;
            if outcome.is_win() {
                perf.wins += 1;
            }
            perf.profit_sum += outcome.pnl;
            perf.return_sum += outcome.pnl_pct;
        }
        perf
    }

    pub fn win_rate(&self) -> Decimal {
        if self.trade_count == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.wins) / Decimal::from(self.trade_count)
    }

    pub fn mean_return(&self) -> Decimal {
        if self.trade_count == 0 {
            return Decimal::ZERO;
        }
        self.return_sum / Decimal::from(self.trade_count)
    }

    /// Raw statistic stored as the entry score.
    pub fn score(&self, statistic: TrustStatistic) -> Decimal {
        match statistic {
            TrustStatistic::ProfitSum => self.profit_sum,
            TrustStatistic::WinRate => self.win_rate(),
            TrustStatistic::MeanReturn => self.mean_return(),
        }
    }
}

/// `clamp(1 + normalized, min_weight, max_weight)`.
pub fn trust_weight(perf: &GroupPerformance, config: &TrustConfig) -> Decimal {
    let normalized = match config.statistic {
        TrustStatistic::ProfitSum => perf.profit_sum * config.scale,
        TrustStatistic::WinRate => dec!(2) * (perf.win_rate() - dec!(0.5)),
        TrustStatistic::MeanReturn => perf.mean_return() * config.scale,
    };
    (Decimal::ONE + normalized).clamp(config.min_weight, config.max_weight)
}

// ============================================================================
// TrustWeightUpdater
// ============================================================================

pub struct TrustWeightUpdater {
    store: DynStore,
    pool: DynParameterPool,
    config: TrustConfig,
}

impl TrustWeightUpdater {
    #[must_use]
    pub fn new(store: DynStore, pool: DynParameterPool, config: TrustConfig) -> Self {
        Self {
            store,
            pool,
            config,
        }
    }

    /// One update pass at `now_ms`.
    ///
    /// Processed counts rows written; skipped counts groups below
    /// `min_trades`.
    pub fn run_pass(&self, now_ms: u64) -> FeedbackResult<PassReport> {
        let mut report = PassReport::default();

        for &window in &self.config.windows {
            let outcomes = self.store.outcomes_since(window.start_ms(now_ms))?;
            let mut by_group: BTreeMap<&GroupId, Vec<&TradeOutcome>> = BTreeMap::new();
            for outcome in outcomes.iter().filter(|o| o.is_countable()) {
                by_group.entry(&outcome.group_id).or_default().push(outcome);
            }

            for (group, outcomes) in by_group {
                let perf = GroupPerformance::from_outcomes(outcomes);
                if perf.trade_count < self.config.min_trades {
                    debug!(
                        group = %group,
                        window = %window,
                        trades = perf.trade_count,
                        "Too few outcomes, keeping previous weight"
                    );
                    report.record_skipped();
                    continue;
                }

                let score = perf.score(self.config.statistic);
                let weight = trust_weight(&perf, &self.config);
                let entry = TrustWeightEntry {
                    group_id: group.clone(),
                    window,
                    score,
                    trade_count: perf.trade_count,
                    weight,
                    source: self.config.source.clone(),
                    updated_at_ms: now_ms,
                };
                if let Err(e) = self.store.upsert_trust_weight(entry) {
                    warn!(group = %group, window = %window, error = %e, "Trust weight upsert failed");
                    report.record_errored();
                    continue;
                }
                Metrics::trust_weight(group.as_str(), &window.to_string(), weight);
                debug!(
                    group = %group,
                    window = %window,
                    trades = perf.trade_count,
                    score = %score,
                    weight = %weight,
                    "Trust weight updated"
                );
                report.record_processed();

                if window == self.config.write_back_window {
                    self.write_back(group, &perf, score);
                }
            }
        }

        Ok(report)
    }

    fn write_back(&self, group: &GroupId, perf: &GroupPerformance, score: Decimal) {
        match self
            .pool
            .update_group_performance(group, perf.win_rate(), score)
        {
            Ok(()) => {}
            Err(PoolError::UnknownGroup(_)) => {
                debug!(group = %group, "Group no longer in pool, write-back skipped");
            }
            Err(e) => {
                warn!(group = %group, error = %e, "Pool write-back failed");
            }
        }
    }

    /// Run passes until cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_ms = self.config.interval_ms,
            statistic = ?self.config.statistic,
            "TrustWeightUpdater started"
        );
        let interval = Duration::from_millis(self.config.interval_ms);

        loop {
            let started = Instant::now();
            match self.run_pass(now_ms()) {
                Ok(report) => record_pass("trust", &report, started.elapsed()),
                Err(e) => warn!(error = %e, "Trust pass failed"),
            }

            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = shutdown.cancelled() => {
                    info!("TrustWeightUpdater stopped");
                    return;
                }
            }
        }
    }
}
