//! Risk gate implementation.
//!
//! # Static rejects (first match wins)
//! 1. Leverage above the ceiling
//! 2. Position or loss ratio above the ceiling
//! 3. Stop or take distance outside bounds
//! 4. Per-period trade count reached
//!
//! # Dynamic distances
//! A quality score picks a tier. High quality tightens the stop and the
//! trailing distance; low quality widens both. Mid quality keeps the
//! group's parameters.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use trustloop_core::{Price, RiskParameters, Side, Signal, Size};

use crate::error::{RiskError, RiskResult};

// ============================================================================
// Configuration
// ============================================================================

/// Static ceilings and quality tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskGateConfig {
    #[serde(default = "default_max_leverage")]
    pub max_leverage: u32,
    #[serde(default = "default_max_position_ratio")]
    pub max_position_ratio: Decimal,
    #[serde(default = "default_max_loss_ratio")]
    pub max_loss_ratio: Decimal,
    #[serde(default = "default_max_stop_loss_rate")]
    pub max_stop_loss_rate: Decimal,
    #[serde(default = "default_max_take_profit_rate")]
    pub max_take_profit_rate: Decimal,
    /// Quality assumed when a signal carries none.
    #[serde(default = "default_quality")]
    pub default_quality: Decimal,
    #[serde(default = "default_high_quality_threshold")]
    pub high_quality_threshold: Decimal,
    #[serde(default = "default_high_quality_trailing")]
    pub high_quality_trailing: Decimal,
    #[serde(default = "default_high_quality_stop_cap")]
    pub high_quality_stop_cap: Decimal,
    #[serde(default = "default_low_quality_threshold")]
    pub low_quality_threshold: Decimal,
    #[serde(default = "default_low_quality_trailing")]
    pub low_quality_trailing: Decimal,
    #[serde(default = "default_low_quality_stop_floor")]
    pub low_quality_stop_floor: Decimal,
    #[serde(default = "default_add_on_quality_threshold")]
    pub add_on_quality_threshold: Decimal,
    /// Fraction of available volume used for an add-on.
    #[serde(default = "default_add_on_fraction")]
    pub add_on_fraction: Decimal,
}

fn default_max_leverage() -> u32 {
    20
}

fn default_max_position_ratio() -> Decimal {
    dec!(0.5)
}

fn default_max_loss_ratio() -> Decimal {
    dec!(0.2)
}

fn default_max_stop_loss_rate() -> Decimal {
    dec!(0.05)
}

fn default_max_take_profit_rate() -> Decimal {
    dec!(0.2)
}

fn default_quality() -> Decimal {
    dec!(8)
}

fn default_high_quality_threshold() -> Decimal {
    dec!(9)
}

fn default_high_quality_trailing() -> Decimal {
    dec!(0.008)
}

fn default_high_quality_stop_cap() -> Decimal {
    dec!(0.008)
}

fn default_low_quality_threshold() -> Decimal {
    dec!(6)
}

fn default_low_quality_trailing() -> Decimal {
    dec!(0.025)
}

fn default_low_quality_stop_floor() -> Decimal {
    dec!(0.025)
}

fn default_add_on_quality_threshold() -> Decimal {
    dec!(8)
}

fn default_add_on_fraction() -> Decimal {
    dec!(0.5)
}

impl Default for RiskGateConfig {
    fn default() -> Self {
        Self {
            max_leverage: default_max_leverage(),
            max_position_ratio: default_max_position_ratio(),
            max_loss_ratio: default_max_loss_ratio(),
            max_stop_loss_rate: default_max_stop_loss_rate(),
            max_take_profit_rate: default_max_take_profit_rate(),
            default_quality: default_quality(),
            high_quality_threshold: default_high_quality_threshold(),
            high_quality_trailing: default_high_quality_trailing(),
            high_quality_stop_cap: default_high_quality_stop_cap(),
            low_quality_threshold: default_low_quality_threshold(),
            low_quality_trailing: default_low_quality_trailing(),
            low_quality_stop_floor: default_low_quality_stop_floor(),
            add_on_quality_threshold: default_add_on_quality_threshold(),
            add_on_fraction: default_add_on_fraction(),
        }
    }
}

impl RiskGateConfig {
    pub fn validate(&self) -> RiskResult<()> {
        if self.max_leverage == 0 {
            return Err(RiskError::ConfigError("max_leverage must be positive".into()));
        }
        if self.low_quality_threshold >= self.high_quality_threshold {
            return Err(RiskError::ConfigError(format!(
                "low_quality_threshold {} must be below high_quality_threshold {}",
                self.low_quality_threshold, self.high_quality_threshold
            )));
        }
        if self.add_on_fraction < Decimal::ZERO || self.add_on_fraction > Decimal::ONE {
            return Err(RiskError::ConfigError(format!(
                "add_on_fraction {} outside [0, 1]",
                self.add_on_fraction
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Inputs and Decisions
// ============================================================================

/// Context in which the gate is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskMode {
    /// New entry.
    Open,
    /// Adding to an existing position.
    Add,
    /// Offline re-scoring; never sizes add-ons.
    Batch,
}

/// Signal-derived inputs to the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskInput {
    pub quality: Option<Decimal>,
    pub available_volume: Decimal,
    pub trades_in_period: u32,
    pub requested_leverage: Option<u32>,
}

impl RiskInput {
    #[must_use]
    pub fn from_signal(signal: &Signal, trades_in_period: u32) -> Self {
        Self {
            quality: signal.meta.quality,
            available_volume: signal.reference_size.inner(),
            trades_in_period,
            requested_leverage: signal.meta.leverage,
        }
    }
}

/// Why the gate rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    LeverageCeiling,
    PositionRatioCeiling,
    LossRatioCeiling,
    StopDistanceOutOfBounds,
    TakeDistanceOutOfBounds,
    TradeCountCap,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LeverageCeiling => "leverage_ceiling",
            Self::PositionRatioCeiling => "position_ratio_ceiling",
            Self::LossRatioCeiling => "loss_ratio_ceiling",
            Self::StopDistanceOutOfBounds => "stop_distance_out_of_bounds",
            Self::TakeDistanceOutOfBounds => "take_distance_out_of_bounds",
            Self::TradeCountCap => "trade_count_cap",
        };
        f.write_str(s)
    }
}

/// Approved trade shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskPlan {
    pub leverage: u32,
    pub quality: Decimal,
    pub stop_loss_rate: Decimal,
    pub take_profit_rate: Decimal,
    pub trailing_stop_rate: Decimal,
    /// Additional entry size, only for `RiskMode::Open`.
    pub add_on_size: Option<Size>,
}

impl RiskPlan {
    /// Absolute take-profit and stop-loss prices for an entry.
    pub fn protection_levels(&self, side: Side, entry: Price) -> (Price, Price) {
        let sign = side.sign();
        let take_profit = entry * (Decimal::ONE + sign * self.take_profit_rate);
        let stop_loss = entry * (Decimal::ONE - sign * self.stop_loss_rate);
        (take_profit, stop_loss)
    }
}

/// Gate decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskVerdict {
    Allow(RiskPlan),
    Reject(RejectReason),
}

impl RiskVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }

    pub fn plan(&self) -> Option<&RiskPlan> {
        match self {
            Self::Allow(plan) => Some(plan),
            Self::Reject(_) => None,
        }
    }
}

// ============================================================================
// Gate
// ============================================================================

/// Pure risk gate. Holds configuration only.
#[derive(Debug, Clone, Default)]
pub struct RiskGate {
    config: RiskGateConfig,
}

impl RiskGate {
    #[must_use]
    pub fn new(config: RiskGateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskGateConfig {
        &self.config
    }

    /// Evaluate a trade. Identical inputs always yield identical verdicts.
    pub fn evaluate(
        &self,
        input: &RiskInput,
        params: &RiskParameters,
        mode: RiskMode,
    ) -> RiskVerdict {
        if let Err(reason) = self.static_checks(input, params) {
            return RiskVerdict::Reject(reason);
        }

        let cfg = &self.config;
        let quality = input.quality.unwrap_or(cfg.default_quality);
        let mut stop_loss_rate = params.stop_loss_rate;
        let mut trailing_stop_rate = params.trailing_stop_rate;

        if quality >= cfg.high_quality_threshold {
            trailing_stop_rate = cfg.high_quality_trailing;
            stop_loss_rate = stop_loss_rate.min(cfg.high_quality_stop_cap);
        } else if quality <= cfg.low_quality_threshold {
            trailing_stop_rate = cfg.low_quality_trailing;
            stop_loss_rate = stop_loss_rate.max(cfg.low_quality_stop_floor);
        }

        let add_on_size = (mode == RiskMode::Open
            && quality >= cfg.add_on_quality_threshold
            && input.available_volume > Decimal::ZERO)
            .then(|| Size::new(input.available_volume * cfg.add_on_fraction));

        RiskVerdict::Allow(RiskPlan {
            leverage: self.effective_leverage(input, params),
            quality,
            stop_loss_rate,
            take_profit_rate: params.take_profit_rate,
            trailing_stop_rate,
            add_on_size,
        })
    }

    fn effective_leverage(&self, input: &RiskInput, params: &RiskParameters) -> u32 {
        input.requested_leverage.unwrap_or(params.default_leverage)
    }

    fn static_checks(
        &self,
        input: &RiskInput,
        params: &RiskParameters,
    ) -> Result<(), RejectReason> {
        let cfg = &self.config;
        let leverage = self.effective_leverage(input, params);
        if leverage == 0 || leverage > cfg.max_leverage {
            return Err(RejectReason::LeverageCeiling);
        }
        if params.max_position_ratio > cfg.max_position_ratio {
            return Err(RejectReason::PositionRatioCeiling);
        }
        if params.max_loss_ratio > cfg.max_loss_ratio {
            return Err(RejectReason::LossRatioCeiling);
        }
        if params.stop_loss_rate <= Decimal::ZERO || params.stop_loss_rate > cfg.max_stop_loss_rate
        {
            return Err(RejectReason::StopDistanceOutOfBounds);
        }
        if params.take_profit_rate <= Decimal::ZERO
            || params.take_profit_rate > cfg.max_take_profit_rate
        {
            return Err(RejectReason::TakeDistanceOutOfBounds);
        }
        if input.trades_in_period >= params.max_trades_per_period {
            return Err(RejectReason::TradeCountCap);
        }
        Ok(())
    }
}
