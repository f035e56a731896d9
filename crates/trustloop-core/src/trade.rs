//! Executed trades and their labeled outcomes.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::order::{ClientOrderId, FillState, OrderId, Side};
use crate::signal::SignalId;
use crate::strategy::GroupId;
use crate::{InstrumentId, Price, Size};

/// Auto-increment trade id assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TradeId(pub u64);

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Trade Record
// ============================================================================

/// Trade as persisted by the orchestrator, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTrade {
    pub signal_id: SignalId,
    pub instrument: InstrumentId,
    pub group_id: GroupId,
    pub side: Side,
    /// Contract count submitted.
    pub contracts: Size,
    /// Base-asset quantity (`contracts * contract_value`).
    pub quantity: Size,
    pub entry_price: Price,
    pub leverage: u32,
    /// Margin budget allocated to the trade.
    pub budget: Decimal,
    pub order_id: OrderId,
    pub client_order_id: ClientOrderId,
    pub fill_state: FillState,
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
    /// Additional entry size approved by the risk gate, if any.
    pub add_on_size: Option<Size>,
    pub opened_at_ms: u64,
}

/// Stored trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: TradeId,
    #[serde(flatten)]
    pub trade: NewTrade,
}

impl std::ops::Deref for TradeRecord {
    type Target = NewTrade;

    fn deref(&self) -> &Self::Target {
        &self.trade
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// How a labeled trade exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    Timeout,
    /// No price path was available; excluded from aggregation.
    NoData,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TakeProfit => "take_profit",
            Self::StopLoss => "stop_loss",
            Self::Timeout => "timeout",
            Self::NoData => "no_data",
        };
        f.write_str(s)
    }
}

/// Counterfactual outcome of one trade. Exactly one per trade id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub trade_id: TradeId,
    pub instrument: InstrumentId,
    pub group_id: GroupId,
    pub side: Side,
    pub open_ts_ms: u64,
    pub close_ts_ms: u64,
    pub entry_price: Price,
    pub exit_price: Price,
    pub quantity: Size,
    pub hold_duration_ms: u64,
    pub exit_reason: ExitReason,
    pub fees: Decimal,
    pub pnl: Decimal,
    pub pnl_pct: Decimal,
    /// Best favorable price distance from entry (>= 0).
    pub max_favorable_excursion: Decimal,
    /// Worst adverse price distance from entry (>= 0).
    pub max_adverse_excursion: Decimal,
}

impl TradeOutcome {
    /// Whether the outcome participates in performance aggregation.
    pub fn is_countable(&self) -> bool {
        self.exit_reason != ExitReason::NoData
    }

    pub fn is_win(&self) -> bool {
        self.pnl > Decimal::ZERO
    }
}
