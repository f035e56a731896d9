//! Strategy groups and their risk parameters.
//!
//! A strategy group is an immutable snapshot of a parameter set produced
//! by the external parameter search. Evolution creates a new id; the core
//! only reads parameters and writes back realized performance.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Strategy group identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle status of a candidate in the parameter pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    #[default]
    Active,
    Paused,
    Retired,
}

/// Per-group risk parameters.
///
/// Defaults mirror the base parameter template handed to the search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskParameters {
    #[serde(default = "default_leverage")]
    pub default_leverage: u32,

    #[serde(default = "default_take_profit_rate")]
    pub take_profit_rate: Decimal,

    #[serde(default = "default_stop_loss_rate")]
    pub stop_loss_rate: Decimal,

    #[serde(default = "default_trailing_stop_rate")]
    pub trailing_stop_rate: Decimal,

    /// Fraction of equity a single position may occupy.
    #[serde(default = "default_max_position_ratio")]
    pub max_position_ratio: Decimal,

    /// Fraction of equity a single position may lose.
    #[serde(default = "default_max_loss_ratio")]
    pub max_loss_ratio: Decimal,

    /// Trade cap over the rolling risk period.
    #[serde(default = "default_max_trades_per_period")]
    pub max_trades_per_period: u32,
}

fn default_leverage() -> u32 {
    10
}

fn default_take_profit_rate() -> Decimal {
    dec!(0.03)
}

fn default_stop_loss_rate() -> Decimal {
    dec!(0.01)
}

fn default_trailing_stop_rate() -> Decimal {
    dec!(0.015)
}

fn default_max_position_ratio() -> Decimal {
    dec!(0.25)
}

fn default_max_loss_ratio() -> Decimal {
    dec!(0.1)
}

fn default_max_trades_per_period() -> u32 {
    30
}

impl Default for RiskParameters {
    fn default() -> Self {
        Self {
            default_leverage: default_leverage(),
            take_profit_rate: default_take_profit_rate(),
            stop_loss_rate: default_stop_loss_rate(),
            trailing_stop_rate: default_trailing_stop_rate(),
            max_position_ratio: default_max_position_ratio(),
            max_loss_ratio: default_max_loss_ratio(),
            max_trades_per_period: default_max_trades_per_period(),
        }
    }
}

/// Scored candidate record from the parameter pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyGroup {
    pub id: GroupId,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub score: Decimal,
    #[serde(default)]
    pub status: GroupStatus,
    #[serde(default)]
    pub parameters: RiskParameters,
    #[serde(default)]
    pub win_rate: Decimal,
    #[serde(default)]
    pub profit_rate: Decimal,
    #[serde(default)]
    pub trade_count: u32,
}

impl StrategyGroup {
    /// Active group with default parameters and zero performance.
    #[must_use]
    pub fn new(id: GroupId) -> Self {
        Self {
            id,
            version: 1,
            score: Decimal::ZERO,
            status: GroupStatus::Active,
            parameters: RiskParameters::default(),
            win_rate: Decimal::ZERO,
            profit_rate: Decimal::ZERO,
            trade_count: 0,
        }
    }
}

/// Filter for loading candidates from the parameter pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFilter {
    #[serde(default)]
    pub status: GroupStatus,
    #[serde(default)]
    pub min_score: Option<Decimal>,
    #[serde(default)]
    pub min_win_rate: Option<Decimal>,
    /// Keep only the best `top_k` by score.
    #[serde(default)]
    pub top_k: Option<usize>,
}

impl Default for CandidateFilter {
    fn default() -> Self {
        Self {
            status: GroupStatus::Active,
            min_score: None,
            min_win_rate: None,
            top_k: None,
        }
    }
}

impl CandidateFilter {
    /// Whether a single group passes the per-record predicates.
    ///
    /// `top_k` is applied by the pool after sorting.
    pub fn matches(&self, group: &StrategyGroup) -> bool {
        if group.status != self.status {
            return false;
        }
        if self.min_score.is_some_and(|min| group.score < min) {
            return false;
        }
        if self.min_win_rate.is_some_and(|min| group.win_rate < min) {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches() {
        let mut group = StrategyGroup::new(GroupId::from("g1"));
        group.score = dec!(7);
        group.win_rate = dec!(0.55);

        let filter = CandidateFilter {
            min_score: Some(dec!(5)),
            min_win_rate: Some(dec!(0.5)),
            ..Default::default()
        };
        assert!(filter.matches(&group));

        group.win_rate = dec!(0.4);
        assert!(!filter.matches(&group));

        group.win_rate = dec!(0.6);
        group.status = GroupStatus::Retired;
        assert!(!filter.matches(&group));
    }

    #[test]
    fn test_parameters_default_from_empty_toml_like_json() {
        let params: RiskParameters = serde_json::from_str("{}").unwrap();
        assert_eq!(params, RiskParameters::default());
        assert_eq!(params.default_leverage, 10);
        assert_eq!(params.max_trades_per_period, 30);
    }
}
