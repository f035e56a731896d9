//! Triple-barrier labeling along a candle path.
//!
//! A trade exits at the first bar whose range crosses the take-profit or
//! stop-loss level; if neither is touched before `max_hold` elapses it
//! exits at the last close. Levels are mirrored for shorts.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use trustloop_core::{Candle, ExitReason, Interval, Price, Side};

use crate::error::{FeedbackError, FeedbackResult};

// ============================================================================
// BarrierConfig
// ============================================================================

/// Which barrier wins when one bar touches both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Assume the adverse move came first.
    #[default]
    StopLossFirst,
    TakeProfitFirst,
    /// Follow the bar body: a bar closing in the trade's favour took profit.
    BarDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarrierConfig {
    /// Default: 0.006 (0.6%).
    #[serde(default = "default_take_profit_rate")]
    pub take_profit_rate: Decimal,

    /// Default: 0.004 (0.4%).
    #[serde(default = "default_stop_loss_rate")]
    pub stop_loss_rate: Decimal,

    /// Trailing stop ratio; zero disables trailing.
    /// Default: 0.
    #[serde(default)]
    pub trailing_ratio: Decimal,

    /// Vertical barrier in minutes.
    /// Default: 240.
    #[serde(default = "default_max_hold_minutes")]
    pub max_hold_minutes: u64,

    /// Default: 1m.
    #[serde(default)]
    pub interval: Interval,

    /// Taker fee charged on entry and exit notional.
    /// Default: 0.0005.
    #[serde(default = "default_taker_fee_rate")]
    pub taker_fee_rate: Decimal,

    #[serde(default)]
    pub tie_break: TieBreak,
}

fn default_take_profit_rate() -> Decimal {
    dec!(0.006)
}

fn default_stop_loss_rate() -> Decimal {
    dec!(0.004)
}

fn default_max_hold_minutes() -> u64 {
    240
}

fn default_taker_fee_rate() -> Decimal {
    dec!(0.0005)
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self {
            take_profit_rate: default_take_profit_rate(),
            stop_loss_rate: default_stop_loss_rate(),
            trailing_ratio: Decimal::ZERO,
            max_hold_minutes: default_max_hold_minutes(),
            interval: Interval::default(),
            taker_fee_rate: default_taker_fee_rate(),
            tie_break: TieBreak::default(),
        }
    }
}

impl BarrierConfig {
    pub fn max_hold_ms(&self) -> u64 {
        self.max_hold_minutes.saturating_mul(60_000)
    }

    pub fn validate(&self) -> FeedbackResult<()> {
        for (name, value) in [
            ("take_profit_rate", self.take_profit_rate),
            ("stop_loss_rate", self.stop_loss_rate),
        ] {
            if value <= Decimal::ZERO || value >= Decimal::ONE {
                return Err(FeedbackError::InvalidConfig(format!(
                    "{name} must be in (0, 1), got {value}"
                )));
            }
        }
        if self.trailing_ratio < Decimal::ZERO || self.trailing_ratio >= Decimal::ONE {
            return Err(FeedbackError::InvalidConfig(format!(
                "trailing_ratio must be in [0, 1), got {}",
                self.trailing_ratio
            )));
        }
        if self.taker_fee_rate < Decimal::ZERO {
            return Err(FeedbackError::InvalidConfig(
                "taker_fee_rate must not be negative".to_string(),
            ));
        }
        if self.max_hold_minutes == 0 {
            return Err(FeedbackError::InvalidConfig(
                "max_hold_minutes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Labeling
// ============================================================================

/// Exit found on the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierLabel {
    pub exit_reason: ExitReason,
    pub exit_price: Price,
    pub exit_ts_ms: u64,
    /// Best sign-adjusted return seen on the path.
    pub max_favorable_excursion: Decimal,
    /// Worst adverse move from entry as a non-negative fraction.
    pub max_adverse_excursion: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelResult {
    Labeled(BarrierLabel),
    /// No barrier yet and the window is still open.
    Pending,
}

/// Label one trade.
///
/// `candles` may be unsorted and may extend past the window; only bars
/// opening in `[open_ts_ms, open_ts_ms + max_hold)` are walked.
pub fn label(
    side: Side,
    entry: Price,
    open_ts_ms: u64,
    candles: &[Candle],
    now_ms: u64,
    config: &BarrierConfig,
) -> LabelResult {
    let window_end = open_ts_ms.saturating_add(config.max_hold_ms());
    let bar_ms = config.interval.as_millis();
    let mut path: Vec<&Candle> = candles
        .iter()
        .filter(|c| c.ts_ms >= open_ts_ms && c.ts_ms < window_end)
        .collect();
    path.sort_by_key(|c| c.ts_ms);

    if !entry.is_positive() {
        return LabelResult::Labeled(no_data(entry, window_end));
    }

    let sign = side.sign();
    let take_profit = entry * (Decimal::ONE + sign * config.take_profit_rate);
    let mut stop_loss = entry * (Decimal::ONE - sign * config.stop_loss_rate);
    let mut best = entry;
    let mut mfe = Decimal::ZERO;
    let mut mae = Decimal::ZERO;

    for bar in &path {
        let (favorable, adverse) = match side {
            Side::Buy => (bar.high, bar.low),
            Side::Sell => (bar.low, bar.high),
        };
        mfe = mfe.max(signed_return(side, entry, favorable));
        mae = mae.max(-signed_return(side, entry, adverse));

        let hit_take = match side {
            Side::Buy => bar.high >= take_profit,
            Side::Sell => bar.low <= take_profit,
        };
        let hit_stop = match side {
            Side::Buy => bar.low <= stop_loss,
            Side::Sell => bar.high >= stop_loss,
        };

        let exit = match (hit_take, hit_stop) {
            (true, true) => Some(resolve_tie(side, bar, config.tie_break)),
            (true, false) => Some(ExitReason::TakeProfit),
            (false, true) => Some(ExitReason::StopLoss),
            (false, false) => None,
        };
        if let Some(reason) = exit {
            let exit_price = match reason {
                ExitReason::TakeProfit => take_profit,
                _ => stop_loss,
            };
            return LabelResult::Labeled(BarrierLabel {
                exit_reason: reason,
                exit_price,
                exit_ts_ms: bar.ts_ms.saturating_add(bar_ms).min(window_end),
                max_favorable_excursion: mfe,
                max_adverse_excursion: mae,
            });
        }

        if config.trailing_ratio > Decimal::ZERO {
            best = match side {
                Side::Buy => best.max(bar.high),
                Side::Sell => best.min(bar.low),
            };
            let trailed = best * (Decimal::ONE - sign * config.trailing_ratio);
            stop_loss = match side {
                Side::Buy => stop_loss.max(trailed),
                Side::Sell => stop_loss.min(trailed),
            };
        }
    }

    if now_ms < window_end {
        return LabelResult::Pending;
    }

    match path.last() {
        Some(last) => LabelResult::Labeled(BarrierLabel {
            exit_reason: ExitReason::Timeout,
            exit_price: last.close,
            exit_ts_ms: last.ts_ms.saturating_add(bar_ms).min(window_end),
            max_favorable_excursion: mfe,
            max_adverse_excursion: mae,
        }),
        None => LabelResult::Labeled(no_data(entry, window_end)),
    }
}

fn no_data(entry: Price, window_end: u64) -> BarrierLabel {
    BarrierLabel {
        exit_reason: ExitReason::NoData,
        exit_price: entry,
        exit_ts_ms: window_end,
        max_favorable_excursion: Decimal::ZERO,
        max_adverse_excursion: Decimal::ZERO,
    }
}

fn signed_return(side: Side, entry: Price, price: Price) -> Decimal {
    price
        .return_from(entry)
        .map_or(Decimal::ZERO, |r| r * side.sign())
}

fn resolve_tie(side: Side, bar: &Candle, tie_break: TieBreak) -> ExitReason {
    match tie_break {
        TieBreak::StopLossFirst => ExitReason::StopLoss,
        TieBreak::TakeProfitFirst => ExitReason::TakeProfit,
        TieBreak::BarDirection => {
            let in_favour = match side {
                Side::Buy => bar.close >= bar.open,
                Side::Sell => bar.close <= bar.open,
            };
            if in_favour {
                ExitReason::TakeProfit
            } else {
                ExitReason::StopLoss
            }
        }
    }
}
