//! Protection levels for open positions.
//!
//! Pure functions: given a position, a last price and the tick size,
//! decide which stop, take-profit and trailing levels to request.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use trustloop_core::{OpenPosition, PositionSide, Price};

use crate::error::{GuardError, GuardResult};

// ============================================================================
// GuardConfig
// ============================================================================

/// Configuration for the position guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Pass interval (ms).
    /// Default: 10,000.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Default take-profit distance from entry.
    /// Default: 0.012 (1.2%).
    #[serde(default = "default_take_profit_rate")]
    pub take_profit_rate: Decimal,

    /// Default stop-loss distance from entry.
    /// Default: 0.006 (0.6%).
    #[serde(default = "default_stop_loss_rate")]
    pub stop_loss_rate: Decimal,

    /// Trailing stop callback ratio.
    /// Default: 0.004 (0.4%).
    #[serde(default = "default_trailing_ratio")]
    pub trailing_ratio: Decimal,

    /// Unrealized return required before a trailing stop is requested.
    /// Default: 0.008 (0.8%).
    #[serde(default = "default_trailing_min_profit")]
    pub trailing_min_profit: Decimal,

    /// Unrealized return that moves the stop to breakeven.
    /// Default: 0.010 (1.0%).
    #[serde(default = "default_breakeven_trigger")]
    pub breakeven_trigger: Decimal,

    /// Breakeven offset used when the tick size is unknown.
    /// Default: 0.0002 (2 bps).
    #[serde(default = "default_breakeven_offset")]
    pub breakeven_offset: Decimal,
}

fn default_interval_ms() -> u64 {
    10_000
}

fn default_take_profit_rate() -> Decimal {
    dec!(0.012)
}

fn default_stop_loss_rate() -> Decimal {
    dec!(0.006)
}

fn default_trailing_ratio() -> Decimal {
    dec!(0.004)
}

fn default_trailing_min_profit() -> Decimal {
    dec!(0.008)
}

fn default_breakeven_trigger() -> Decimal {
    dec!(0.010)
}

fn default_breakeven_offset() -> Decimal {
    dec!(0.0002)
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            take_profit_rate: default_take_profit_rate(),
            stop_loss_rate: default_stop_loss_rate(),
            trailing_ratio: default_trailing_ratio(),
            trailing_min_profit: default_trailing_min_profit(),
            breakeven_trigger: default_breakeven_trigger(),
            breakeven_offset: default_breakeven_offset(),
        }
    }
}

impl GuardConfig {
    pub fn validate(&self) -> GuardResult<()> {
        let rates = [
            ("take_profit_rate", self.take_profit_rate),
            ("stop_loss_rate", self.stop_loss_rate),
            ("trailing_ratio", self.trailing_ratio),
            ("breakeven_trigger", self.breakeven_trigger),
        ];
        for (name, value) in rates {
            if value <= Decimal::ZERO || value >= Decimal::ONE {
                return Err(GuardError::InvalidConfig(format!(
                    "{name} must be in (0, 1), got {value}"
                )));
            }
        }
        if self.stop_loss_rate >= self.breakeven_trigger {
            return Err(GuardError::InvalidConfig(format!(
                "breakeven_trigger {} must exceed stop_loss_rate {}",
                self.breakeven_trigger, self.stop_loss_rate
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Levels
// ============================================================================

/// Stop level just past entry on the profitable side.
///
/// One tick beyond entry when the tick size is known, otherwise
/// `entry * (1 ± offset)`.
pub fn breakeven_stop(
    side: PositionSide,
    entry: Price,
    tick: Option<Price>,
    offset: Decimal,
) -> Price {
    match (side, tick.filter(Price::is_positive)) {
        (PositionSide::Long, Some(tick)) => (entry + tick).ceil_to_tick(tick),
        (PositionSide::Short, Some(tick)) => (entry - tick).round_to_tick(tick),
        (PositionSide::Long, None) => entry * (Decimal::ONE + offset),
        (PositionSide::Short, None) => entry * (Decimal::ONE - offset),
    }
}

/// Whether `candidate` is a tighter stop than `current` for `side`.
///
/// Stops only ever move toward profit: up for longs, down for shorts.
pub fn tightens(side: PositionSide, current: Option<Price>, candidate: Price) -> bool {
    match current {
        None => true,
        Some(current) => match side {
            PositionSide::Long => candidate > current,
            PositionSide::Short => candidate < current,
        },
    }
}

/// Whether `stop` already sits at or beyond entry on the profitable side.
pub fn is_at_breakeven(side: PositionSide, entry: Price, stop: Price) -> bool {
    match side {
        PositionSide::Long => stop >= entry,
        PositionSide::Short => stop <= entry,
    }
}

/// Levels requested for a position seen for the first time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectionPlan {
    pub stop_loss: Price,
    pub take_profit: Price,
    pub trailing_ratio: Option<Decimal>,
    pub breakeven_applied: bool,
}

/// Default protection for an unprotected position.
///
/// `unrealized` is the sign-adjusted return at the last price, if known.
pub fn initial_plan(
    position: &OpenPosition,
    unrealized: Option<Decimal>,
    tick: Option<Price>,
    config: &GuardConfig,
) -> ProtectionPlan {
    let entry = position.entry_price;
    let sign = position.side.sign();
    let mut stop_loss = entry * (Decimal::ONE - sign * config.stop_loss_rate);
    let mut take_profit = entry * (Decimal::ONE + sign * config.take_profit_rate);

    if let Some(tick) = tick.filter(Price::is_positive) {
        match position.side {
            PositionSide::Long => {
                stop_loss = stop_loss.round_to_tick(tick);
                take_profit = take_profit.ceil_to_tick(tick);
            }
            PositionSide::Short => {
                stop_loss = stop_loss.ceil_to_tick(tick);
                take_profit = take_profit.round_to_tick(tick);
            }
        }
    }

    let unrealized = unrealized.unwrap_or(Decimal::ZERO);
    let mut breakeven_applied = false;
    if unrealized >= config.breakeven_trigger {
        let breakeven = breakeven_stop(position.side, entry, tick, config.breakeven_offset);
        if tightens(position.side, Some(stop_loss), breakeven) {
            stop_loss = breakeven;
        }
        breakeven_applied = true;
    }

    let trailing_ratio =
        (unrealized >= config.trailing_min_profit).then_some(config.trailing_ratio);

    ProtectionPlan {
        stop_loss,
        take_profit,
        trailing_ratio,
        breakeven_applied,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use trustloop_core::{InstrumentId, Size};

    fn position(side: PositionSide, entry: Decimal) -> OpenPosition {
        OpenPosition {
            instrument: InstrumentId::from("BTC-USDT-SWAP"),
            side,
            contracts: Size::new(dec!(1)),
            entry_price: Price::new(entry),
            mark_price: None,
        }
    }

    #[test]
    fn test_default_levels() {
        let config = GuardConfig::default();
        let plan = initial_plan(&position(PositionSide::Long, dec!(100)), None, None, &config);
        assert_eq!(plan.stop_loss, Price::new(dec!(99.4)));
        assert_eq!(plan.take_profit, Price::new(dec!(101.2)));
        assert_eq!(plan.trailing_ratio, None);
        assert!(!plan.breakeven_applied);

        let plan = initial_plan(&position(PositionSide::Short, dec!(100)), None, None, &config);
        assert_eq!(plan.stop_loss, Price::new(dec!(100.6)));
        assert_eq!(plan.take_profit, Price::new(dec!(98.8)));
    }

    #[test]
    fn test_profitable_position_gets_trailing_and_breakeven() {
        let config = GuardConfig::default();
        let pos = position(PositionSide::Long, dec!(100));
        let tick = Some(Price::new(dec!(0.1)));

        let plan = initial_plan(&pos, Some(dec!(0.009)), tick, &config);
        assert_eq!(plan.trailing_ratio, Some(dec!(0.004)));
        assert!(!plan.breakeven_applied);

        let plan = initial_plan(&pos, Some(dec!(0.011)), tick, &config);
        assert!(plan.breakeven_applied);
        assert_eq!(plan.stop_loss, Price::new(dec!(100.1)));
    }

    #[test]
    fn test_breakeven_stop() {
        let entry = Price::new(dec!(100));
        let tick = Some(Price::new(dec!(0.5)));
        assert_eq!(
            breakeven_stop(PositionSide::Long, entry, tick, dec!(0.0002)),
            Price::new(dec!(100.5))
        );
        assert_eq!(
            breakeven_stop(PositionSide::Short, entry, tick, dec!(0.0002)),
            Price::new(dec!(99.5))
        );
        assert_eq!(
            breakeven_stop(PositionSide::Long, entry, None, dec!(0.0002)),
            Price::new(dec!(100.02))
        );
        assert_eq!(
            breakeven_stop(PositionSide::Short, entry, Some(Price::ZERO), dec!(0.0002)),
            Price::new(dec!(99.98))
        );
    }

    #[test]
    fn test_tightens() {
        let p = |d| Price::new(d);
        assert!(tightens(PositionSide::Long, None, p(dec!(1))));
        assert!(tightens(PositionSide::Long, Some(p(dec!(99))), p(dec!(100))));
        assert!(!tightens(PositionSide::Long, Some(p(dec!(101))), p(dec!(100))));
        assert!(tightens(PositionSide::Short, Some(p(dec!(101))), p(dec!(100))));
        assert!(!tightens(PositionSide::Short, Some(p(dec!(99))), p(dec!(100))));
    }

    #[test]
    fn test_config_validate() {
        assert!(GuardConfig::default().validate().is_ok());
        let config = GuardConfig {
            breakeven_trigger: dec!(0.005),
            ..Default::default()
        };
        assert!(config.validate().is_err());
        let config = GuardConfig {
            take_profit_rate: Decimal::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_partial_toml() {
        let config: GuardConfig = toml::from_str("breakeven_trigger = \"0.02\"").unwrap();
        assert_eq!(config.breakeven_trigger, dec!(0.02));
        assert_eq!(config.stop_loss_rate, dec!(0.006));
    }

    proptest! {
        #[test]
        fn prop_breakeven_stop_is_past_entry(
            entry_cents in 1i64..100_000_000,
            tick_exp in 0u32..4,
            long in any::<bool>(),
        ) {
            let entry = Price::new(Decimal::new(entry_cents, 2));
            let tick = Price::new(Decimal::new(1, tick_exp));
            let side = if long { PositionSide::Long } else { PositionSide::Short };
            let stop = breakeven_stop(side, entry, Some(tick), dec!(0.0002));
            match side {
                PositionSide::Long => prop_assert!(stop > entry),
                PositionSide::Short => prop_assert!(stop < entry),
            }
        }
    }
}
