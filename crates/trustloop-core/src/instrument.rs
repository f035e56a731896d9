//! Instrument identity and exchange metadata.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};
use crate::{Price, Size};

/// Exchange instrument identifier (e.g. `BTC-USDT-SWAP`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(String);

impl InstrumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstrumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Contract metadata needed to size and price orders.
///
/// Read-only from the core's point of view. Fields not reported by the
/// exchange fall back to [`InstrumentSpec::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    /// Base-asset quantity represented by one contract.
    #[serde(default = "default_contract_value")]
    pub contract_value: Decimal,

    /// Contract count increment.
    #[serde(default = "default_lot_step")]
    pub lot_step: Size,

    /// Minimum order size in contracts.
    #[serde(default = "default_minimum_size")]
    pub minimum_size: Size,

    /// Minimum price increment.
    #[serde(default = "default_tick_size")]
    pub tick_size: Price,
}

fn default_contract_value() -> Decimal {
    Decimal::ONE
}

fn default_lot_step() -> Size {
    Size::ONE
}

fn default_minimum_size() -> Size {
    Size::ONE
}

fn default_tick_size() -> Price {
    Price::new(dec!(0.01))
}

impl Default for InstrumentSpec {
    fn default() -> Self {
        Self {
            contract_value: default_contract_value(),
            lot_step: default_lot_step(),
            minimum_size: default_minimum_size(),
            tick_size: default_tick_size(),
        }
    }
}

impl InstrumentSpec {
    /// Reject metadata that would make sizing undefined.
    pub fn validate(&self) -> Result<()> {
        if self.contract_value <= Decimal::ZERO {
            return Err(CoreError::InvalidMetadata(format!(
                "contract_value must be positive, got {}",
                self.contract_value
            )));
        }
        if !self.lot_step.is_positive() {
            return Err(CoreError::InvalidMetadata(format!(
                "lot_step must be positive, got {}",
                self.lot_step
            )));
        }
        if self.minimum_size.inner() < Decimal::ZERO {
            return Err(CoreError::InvalidMetadata(format!(
                "minimum_size must not be negative, got {}",
                self.minimum_size
            )));
        }
        if self.tick_size.inner() < Decimal::ZERO {
            return Err(CoreError::InvalidMetadata(format!(
                "tick_size must not be negative, got {}",
                self.tick_size
            )));
        }
        Ok(())
    }

    /// Base-asset quantity for a contract count.
    pub fn base_quantity(&self, contracts: Size) -> Size {
        contracts * self.contract_value
    }

    /// Whether sizing-relevant fields differ.
    pub fn has_material_change(&self, other: &Self) -> bool {
        self.contract_value != other.contract_value
            || self.lot_step != other.lot_step
            || self.minimum_size != other.minimum_size
            || self.tick_size != other.tick_size
    }
}
