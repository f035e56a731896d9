//! Trust weights per strategy group and lookback window.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::strategy::GroupId;

const DAY_MS: u64 = 86_400_000;

/// Lookback window in whole days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrustWindow(pub u32);

impl TrustWindow {
    pub const WEEK: Self = Self(7);
    pub const MONTH: Self = Self(30);

    pub fn days(&self) -> u32 {
        self.0
    }

    pub fn as_millis(&self) -> u64 {
        u64::from(self.0) * DAY_MS
    }

    /// Start of the window ending at `now_ms`.
    pub fn start_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.as_millis())
    }
}

impl fmt::Display for TrustWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d", self.0)
    }
}

/// One row per (group, window), upserted by the trust weight updater.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustWeightEntry {
    pub group_id: GroupId,
    pub window: TrustWindow,
    /// Raw performance statistic the weight was derived from.
    pub score: Decimal,
    pub trade_count: u32,
    pub weight: Decimal,
    pub source: String,
    pub updated_at_ms: u64,
}
