//! Trading signals and their lifecycle.
//!
//! ```text
//! NEW ──► WAIT_REHEARSAL ──► WAIT_LIVE ──► EXECUTING ──► DONE
//!  │            │                │             │
//!  ├► EXPIRED ◄─┴────────────────┘             │
//!  └► SKIPPED_* / ERROR ◄──────────────────────┘ (from any non-terminal state)
//! ```
//!
//! Transitions only move forward along this graph and terminal statuses
//! never change. Stores enforce the graph through
//! [`SignalStatus::can_transition_to`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};
use crate::order::Side;
use crate::strategy::GroupId;
use crate::{InstrumentId, Price, Size};

/// Default priority (lower is more urgent).
pub const DEFAULT_PRIORITY: i32 = 3;

/// Auto-increment signal id assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalId(pub u64);

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Status
// ============================================================================

/// Why a signal was skipped. Each maps to a distinct `SKIPPED_*` status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    /// No strategy group attribution.
    NoGroup,
    /// Budget too small for the instrument minimum.
    SizeZero,
    /// Account balance exhausted.
    NoBalance,
    /// Group not on the allow-list at execution time.
    NotAllowed,
    /// Direction could not be resolved.
    NoSide,
    /// Risk gate rejected the trade.
    RiskRejected,
    /// Live price moved too far from the reference price.
    Slippage,
    /// Instrument metadata unavailable.
    NoMetadata,
}

impl SkipReason {
    pub const ALL: [SkipReason; 8] = [
        Self::NoGroup,
        Self::SizeZero,
        Self::NoBalance,
        Self::NotAllowed,
        Self::NoSide,
        Self::RiskRejected,
        Self::Slippage,
        Self::NoMetadata,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoGroup => "NO_GROUP",
            Self::SizeZero => "SIZE_ZERO",
            Self::NoBalance => "NO_BALANCE",
            Self::NotAllowed => "NOT_ALLOWED",
            Self::NoSide => "NO_SIDE",
            Self::RiskRejected => "RISK_REJECTED",
            Self::Slippage => "SLIPPAGE",
            Self::NoMetadata => "NO_METADATA",
        }
    }
}

/// Lifecycle status of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    New,
    WaitRehearsal,
    WaitLive,
    /// Claimed by an orchestrator pass; order submission may be in flight.
    Executing,
    Done,
    Expired,
    Skipped(SkipReason),
    Error,
}

impl SignalStatus {
    /// Terminal statuses are immutable.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done | Self::Expired | Self::Skipped(_) | Self::Error
        )
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    #[must_use]
    pub fn can_transition_to(&self, next: SignalStatus) -> bool {
        use SignalStatus::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Skipped(_)) | (_, Error) => true,
            (New, WaitRehearsal) | (New, Expired) => true,
            (WaitRehearsal, WaitLive) | (WaitRehearsal, Expired) => true,
            (WaitLive, Executing) | (WaitLive, Expired) => true,
            (Executing, Done) => true,
            _ => false,
        }
    }

    /// Validate a transition, returning the target on success.
    pub fn transition(&self, next: SignalStatus) -> Result<SignalStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::IllegalTransition {
                from: *self,
                to: next,
            })
        }
    }
}

impl fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "NEW"),
            Self::WaitRehearsal => write!(f, "WAIT_REHEARSAL"),
            Self::WaitLive => write!(f, "WAIT_LIVE"),
            Self::Executing => write!(f, "EXECUTING"),
            Self::Done => write!(f, "DONE"),
            Self::Expired => write!(f, "EXPIRED"),
            Self::Skipped(reason) => write!(f, "SKIPPED_{}", reason.as_str()),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for SignalStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let status = match s {
            "NEW" => Self::New,
            "WAIT_REHEARSAL" => Self::WaitRehearsal,
            "WAIT_LIVE" => Self::WaitLive,
            "EXECUTING" => Self::Executing,
            "DONE" => Self::Done,
            "EXPIRED" => Self::Expired,
            "ERROR" => Self::Error,
            other => {
                let reason = other
                    .strip_prefix("SKIPPED_")
                    .and_then(|r| SkipReason::ALL.into_iter().find(|k| k.as_str() == r))
                    .ok_or_else(|| CoreError::UnknownStatus(other.to_string()))?;
                Self::Skipped(reason)
            }
        };
        Ok(status)
    }
}

// ============================================================================
// Signal
// ============================================================================

/// Typed metadata carried with a signal.
///
/// Known keys are fields; anything else lands in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leverage: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Price>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Price>,
    /// Upstream quality score, typically 0..=10.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<Decimal>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Signal as submitted by the upstream generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSignal {
    pub instrument: InstrumentId,
    pub period: String,
    pub timestamp_ms: u64,
    pub reference_price: Price,
    /// Volume observed by the generator; drives add-on sizing.
    #[serde(default = "default_reference_size")]
    pub reference_size: Size,
    pub kind: String,
    #[serde(default)]
    pub strategy_group_id: Option<GroupId>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub promotion_level: i32,
    #[serde(default)]
    pub expiry_ms: Option<u64>,
    #[serde(default)]
    pub meta: SignalMeta,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

fn default_reference_size() -> Size {
    Size::ZERO
}

impl NewSignal {
    #[must_use]
    pub fn new(
        instrument: InstrumentId,
        kind: impl Into<String>,
        reference_price: Price,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            instrument,
            period: "1m".to_string(),
            timestamp_ms,
            reference_price,
            reference_size: Size::ZERO,
            kind: kind.into(),
            strategy_group_id: None,
            priority: DEFAULT_PRIORITY,
            promotion_level: 0,
            expiry_ms: None,
            meta: SignalMeta::default(),
        }
    }

    #[must_use]
    pub fn with_group(mut self, group: GroupId) -> Self {
        self.strategy_group_id = Some(group);
        self
    }
}

/// Stored signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub instrument: InstrumentId,
    pub period: String,
    pub timestamp_ms: u64,
    pub reference_price: Price,
    pub reference_size: Size,
    pub kind: String,
    pub strategy_group_id: Option<GroupId>,
    pub status: SignalStatus,
    pub priority: i32,
    pub promotion_level: i32,
    pub expiry_ms: Option<u64>,
    pub meta: SignalMeta,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl Signal {
    /// Materialize a submitted signal with status `NEW`.
    #[must_use]
    pub fn from_new(id: SignalId, new: NewSignal, now_ms: u64) -> Self {
        Self {
            id,
            instrument: new.instrument,
            period: new.period,
            timestamp_ms: new.timestamp_ms,
            reference_price: new.reference_price,
            reference_size: new.reference_size,
            kind: new.kind,
            strategy_group_id: new.strategy_group_id,
            status: SignalStatus::New,
            priority: new.priority,
            promotion_level: new.promotion_level,
            expiry_ms: new.expiry_ms,
            meta: new.meta,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    /// Expiry instant, falling back to `timestamp + ttl`.
    pub fn effective_expiry_ms(&self, ttl_ms: u64) -> u64 {
        self.expiry_ms
            .unwrap_or_else(|| self.timestamp_ms.saturating_add(ttl_ms))
    }

    pub fn is_expired(&self, now_ms: u64, ttl_ms: u64) -> bool {
        now_ms > self.effective_expiry_ms(ttl_ms)
    }

    /// Whether the stamped expiry has passed. A signal without one never expires here.
    pub fn is_past_expiry(&self, now_ms: u64) -> bool {
        self.expiry_ms.is_some_and(|expiry| now_ms > expiry)
    }

    /// Metadata side first, then the kind suffix.
    pub fn resolve_side(&self) -> Option<Side> {
        self.meta.side.or_else(|| Side::from_kind(&self.kind))
    }

    /// Execution order: priority asc, promotion level desc, timestamp asc, id asc.
    pub fn execution_order(a: &Signal, b: &Signal) -> Ordering {
        a.priority
            .cmp(&b.priority)
            .then_with(|| b.promotion_level.cmp(&a.promotion_level))
            .then_with(|| a.timestamp_ms.cmp(&b.timestamp_ms))
            .then_with(|| a.id.cmp(&b.id))
    }
}
