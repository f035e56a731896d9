//! Open positions as reported by the exchange.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::order::PositionSide;
use crate::{InstrumentId, Price, Size};

/// Open position snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub instrument: InstrumentId,
    pub side: PositionSide,
    /// Contract count, always positive for an open position.
    pub contracts: Size,
    pub entry_price: Price,
    /// Latest mark price, when the exchange reports one.
    pub mark_price: Option<Price>,
}

impl OpenPosition {
    /// Unrealized return relative to entry, sign-adjusted for the side.
    ///
    /// Positive means the position is in profit.
    pub fn unrealized_return(&self, last: Price) -> Option<Decimal> {
        last.return_from(self.entry_price)
            .map(|r| r * self.side.sign())
    }

    pub fn is_open(&self) -> bool {
        self.contracts.is_positive() && self.entry_price.is_positive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_unrealized_return_is_mirrored_for_shorts() {
        let mut position = OpenPosition {
            instrument: InstrumentId::from("ETH-USDT-SWAP"),
            side: PositionSide::Long,
            contracts: Size::new(dec!(2)),
            entry_price: Price::new(dec!(100)),
            mark_price: None,
        };
        assert_eq!(
            position.unrealized_return(Price::new(dec!(101))),
            Some(dec!(0.01))
        );

        position.side = PositionSide::Short;
        assert_eq!(
            position.unrealized_return(Price::new(dec!(101))),
            Some(dec!(-0.01))
        );
    }
}
