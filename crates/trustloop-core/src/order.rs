//! Order-related types and identifiers.
//!
//! Provides order side, position side, order identifiers, the order
//! request submitted to an exchange, and the protection (stop/take/trail)
//! request used by the position guard.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::strategy::GroupId;
use crate::{InstrumentId, Price, Size};

// ============================================================================
// Sides
// ============================================================================

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// +1 for buy, -1 for sell.
    pub fn sign(&self) -> Decimal {
        match self {
            Self::Buy => Decimal::ONE,
            Self::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    /// Position side opened by an entry on this side.
    pub fn position_side(&self) -> PositionSide {
        match self {
            Self::Buy => PositionSide::Long,
            Self::Sell => PositionSide::Short,
        }
    }

    /// Infer direction from a signal kind such as `BREAKOUT_UP` or `MA_CROSS_SHORT`.
    ///
    /// Returns `None` when the suffix carries no direction.
    pub fn from_kind(kind: &str) -> Option<Self> {
        let upper = kind.trim().to_ascii_uppercase();
        if ["UP", "LONG", "BUY"].iter().any(|s| upper.ends_with(s)) {
            Some(Self::Buy)
        } else if ["DOWN", "SHORT", "SELL"].iter().any(|s| upper.ends_with(s)) {
            Some(Self::Sell)
        } else {
            None
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Side of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// +1 for long, -1 for short.
    pub fn sign(&self) -> Decimal {
        match self {
            Self::Long => Decimal::ONE,
            Self::Short => Decimal::NEGATIVE_ONE,
        }
    }

    /// Side of the order that closes this position.
    pub fn closing_side(&self) -> Side {
        match self {
            Self::Long => Side::Sell,
            Self::Short => Side::Buy,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Margin mode requested for a new position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginMode {
    #[default]
    Cross,
    Isolated,
}

// ============================================================================
// Identifiers
// ============================================================================

/// Client order ID for idempotency.
///
/// Every submission carries a fresh id so a retried request cannot open
/// a second position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientOrderId(String);

impl ClientOrderId {
    /// Format: `tl_{timestamp_ms}_{uuid_short}`
    pub fn new() -> Self {
        let ts = chrono::Utc::now().timestamp_millis();
        let uuid_short = &Uuid::new_v4().simple().to_string()[..8];
        Self(format!("tl_{ts}_{uuid_short}"))
    }

    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientOrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Exchange-assigned order id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Order State
// ============================================================================

/// Exchange-reported state of a submitted order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Accepted, resting or being matched.
    #[default]
    Live,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderState {
    /// Returns true if the order can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }
}

/// Fill state recorded on a trade after bounded polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillState {
    Filled,
    PartiallyFilled,
    Cancelled,
    Rejected,
    /// Polling timed out before the order reached a terminal state.
    Unknown,
}

impl FillState {
    /// Whether a position may exist as a result of the order.
    #[must_use]
    pub fn may_hold_position(&self) -> bool {
        matches!(self, Self::Filled | Self::PartiallyFilled | Self::Unknown)
    }
}

impl From<OrderState> for FillState {
    fn from(state: OrderState) -> Self {
        match state {
            OrderState::Filled => Self::Filled,
            OrderState::PartiallyFilled => Self::PartiallyFilled,
            OrderState::Cancelled => Self::Cancelled,
            OrderState::Rejected => Self::Rejected,
            OrderState::Live => Self::Unknown,
        }
    }
}

impl fmt::Display for FillState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Filled => "filled",
            Self::PartiallyFilled => "partially_filled",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Market entry order submitted by the orchestrator.
///
/// The strategy group is not optional here: a signal without attribution
/// never reaches submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: ClientOrderId,
    pub instrument: InstrumentId,
    pub side: Side,
    /// Contract count, a multiple of the instrument's lot step.
    pub contracts: Size,
    pub leverage: u32,
    pub margin_mode: MarginMode,
    pub group_id: GroupId,
    pub take_profit: Option<Price>,
    pub stop_loss: Option<Price>,
}

/// Protection attached to an open position in a single request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionRequest {
    pub instrument: InstrumentId,
    pub side: PositionSide,
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
    /// Trailing stop callback ratio (e.g. 0.004 = 0.4%).
    pub trailing_ratio: Option<Decimal>,
}

impl ProtectionRequest {
    /// Request that only moves the stop.
    #[must_use]
    pub fn stop_only(instrument: InstrumentId, side: PositionSide, stop_loss: Price) -> Self {
        Self {
            instrument,
            side,
            stop_loss: Some(stop_loss),
            take_profit: None,
            trailing_ratio: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stop_loss.is_none() && self.take_profit.is_none() && self.trailing_ratio.is_none()
    }
}

/// Protection currently live on the exchange for a position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveProtection {
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
    pub trailing_ratio: Option<Decimal>,
}

impl ActiveProtection {
    pub fn is_empty(&self) -> bool {
        self.stop_loss.is_none() && self.take_profit.is_none() && self.trailing_ratio.is_none()
    }
}
