//! Budget to contract-count conversion.
//!
//! Sizing is floor-only: the resulting notional never exceeds
//! `budget * leverage`. All arithmetic is exact decimal.

use rust_decimal::Decimal;
use std::sync::Arc;
use trustloop_core::{DynExchange, InstrumentId, InstrumentSpec, Price, Size};
use trustloop_registry::InstrumentCache;

use crate::error::{ExecutorError, ExecutorResult};

// ============================================================================
// Quantization
// ============================================================================

/// Result of sizing a budget against instrument constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantization {
    /// Contract count on the lot grid, at or above the minimum.
    Quantized { contracts: Size, notional: Decimal },
    /// Budget cannot buy the minimum size.
    Insufficient { contracts: Size, minimum: Size },
}

impl Quantization {
    pub fn contracts(&self) -> Option<Size> {
        match self {
            Self::Quantized { contracts, .. } => Some(*contracts),
            Self::Insufficient { .. } => None,
        }
    }
}

/// Convert a quote-currency budget into a contract count.
///
/// `notional = budget * leverage`, then `notional / (price * contract_value)`
/// floored to the lot grid. When division rounding pushes the floored
/// count over the notional, one lot is removed.
pub fn quantity_for_budget(
    spec: &InstrumentSpec,
    budget: Decimal,
    leverage: u32,
    price: Price,
) -> ExecutorResult<Quantization> {
    if budget <= Decimal::ZERO {
        return Err(ExecutorError::InvalidSizingInput(format!(
            "budget must be positive, got {budget}"
        )));
    }
    if leverage == 0 {
        return Err(ExecutorError::InvalidSizingInput(
            "leverage must be at least 1".to_string(),
        ));
    }
    if !price.is_positive() {
        return Err(ExecutorError::InvalidSizingInput(format!(
            "price must be positive, got {price}"
        )));
    }
    spec.validate()
        .map_err(|e| ExecutorError::InvalidSizingInput(e.to_string()))?;

    let notional = budget * Decimal::from(leverage);
    let unit_value = price.inner() * spec.contract_value;
    let raw = Size::new(notional / unit_value);

    let mut contracts = raw.round_to_lot(spec.lot_step);
    if contracts.inner() * unit_value > notional {
        contracts = contracts - spec.lot_step;
    }

    if !contracts.is_positive() || contracts < spec.minimum_size {
        return Ok(Quantization::Insufficient {
            contracts: if contracts.is_positive() {
                contracts
            } else {
                Size::ZERO
            },
            minimum: spec.minimum_size,
        });
    }

    Ok(Quantization::Quantized {
        contracts,
        notional: contracts.inner() * unit_value,
    })
}

// ============================================================================
// Quantizer
// ============================================================================

/// Sizing with metadata from the instrument cache.
pub struct Quantizer {
    instruments: Arc<InstrumentCache>,
    exchange: DynExchange,
}

impl Quantizer {
    #[must_use]
    pub fn new(instruments: Arc<InstrumentCache>, exchange: DynExchange) -> Self {
        Self {
            instruments,
            exchange,
        }
    }

    pub fn instruments(&self) -> &Arc<InstrumentCache> {
        &self.instruments
    }

    /// Size a budget, looking up the reference price only when `price` is absent.
    pub async fn quantize(
        &self,
        instrument: &InstrumentId,
        budget: Decimal,
        leverage: u32,
        price: Option<Price>,
        now_ms: u64,
    ) -> ExecutorResult<Quantization> {
        let price = match price {
            Some(price) => price,
            None => self.exchange.reference_price(instrument.clone()).await?.price,
        };
        let spec = self.instruments.get_or_fetch(instrument, now_ms).await?;
        quantity_for_budget(&spec, budget, leverage, price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use trustloop_core::PaperExchange;

    fn spec(contract_value: Decimal, lot: Decimal, min: Decimal) -> InstrumentSpec {
        InstrumentSpec {
            contract_value,
            lot_step: Size::new(lot),
            minimum_size: Size::new(min),
            tick_size: Price::new(dec!(0.1)),
        }
    }

    #[test]
    fn test_reference_scenario() {
        let result =
            quantity_for_budget(&spec(dec!(0.01), dec!(1), dec!(1)), dec!(100), 10, Price::new(dec!(50000)))
                .unwrap();
        assert_eq!(
            result,
            Quantization::Quantized {
                contracts: Size::new(dec!(2)),
                notional: dec!(1000),
            }
        );
    }

    #[test]
    fn test_floors_to_lot() {
        // 1000 / (30000 * 0.01) = 3.33.. -> 3
        let result =
            quantity_for_budget(&spec(dec!(0.01), dec!(1), dec!(1)), dec!(100), 10, Price::new(dec!(30000)))
                .unwrap();
        assert_eq!(result.contracts(), Some(Size::new(dec!(3))));

        // fractional lots: 3.33.. -> 3.3
        let result = quantity_for_budget(
            &spec(dec!(0.01), dec!(0.1), dec!(0.1)),
            dec!(100),
            10,
            Price::new(dec!(30000)),
        )
        .unwrap();
        assert_eq!(result.contracts(), Some(Size::new(dec!(3.3))));
    }

    #[test]
    fn test_below_minimum_is_insufficient() {
        let result =
            quantity_for_budget(&spec(dec!(0.01), dec!(1), dec!(1)), dec!(10), 1, Price::new(dec!(50000)))
                .unwrap();
        assert!(matches!(result, Quantization::Insufficient { .. }));
        assert_eq!(result.contracts(), None);

        let result =
            quantity_for_budget(&spec(dec!(1), dec!(1), dec!(5)), dec!(100), 1, Price::new(dec!(25)))
                .unwrap();
        assert_eq!(
            result,
            Quantization::Insufficient {
                contracts: Size::new(dec!(4)),
                minimum: Size::new(dec!(5)),
            }
        );
    }

    #[test]
    fn test_invalid_inputs_are_errors() {
        let s = spec(dec!(0.01), dec!(1), dec!(1));
        let price = Price::new(dec!(50000));
        assert!(quantity_for_budget(&s, dec!(0), 10, price).is_err());
        assert!(quantity_for_budget(&s, dec!(-5), 10, price).is_err());
        assert!(quantity_for_budget(&s, dec!(100), 0, price).is_err());
        assert!(quantity_for_budget(&s, dec!(100), 10, Price::ZERO).is_err());
        assert!(quantity_for_budget(&spec(dec!(0), dec!(1), dec!(1)), dec!(100), 10, price).is_err());
        assert!(quantity_for_budget(&spec(dec!(1), dec!(0), dec!(1)), dec!(100), 10, price).is_err());
    }

    #[tokio::test]
    async fn test_quantizer_uses_cache_and_quote() {
        let paper = Arc::new(PaperExchange::new());
        let instrument = InstrumentId::from("BTC-USDT-SWAP");
        paper.set_spec(instrument.clone(), spec(dec!(0.01), dec!(1), dec!(1)));
        paper.set_quote(instrument.clone(), Price::new(dec!(50000)), 1_000);

        let exchange: DynExchange = paper.clone();
        let cache = Arc::new(InstrumentCache::new(exchange.clone(), 60_000));
        let quantizer = Quantizer::new(cache.clone(), exchange);

        let result = quantizer
            .quantize(&instrument, dec!(100), 10, None, 1_000)
            .await
            .unwrap();
        assert_eq!(result.contracts(), Some(Size::new(dec!(2))));
        assert!(cache.get(&instrument).is_some());

        let result = quantizer
            .quantize(&instrument, dec!(100), 10, Some(Price::new(dec!(25000))), 1_000)
            .await
            .unwrap();
        assert_eq!(result.contracts(), Some(Size::new(dec!(4))));
    }

    #[test]
    fn test_quantizer_unknown_instrument_is_error() {
        let paper = Arc::new(PaperExchange::new());
        let exchange: DynExchange = paper;
        let cache = Arc::new(InstrumentCache::new(exchange.clone(), 60_000));
        let quantizer = Quantizer::new(cache, exchange);

        let result = tokio_test::block_on(quantizer.quantize(
            &InstrumentId::from("DOGE-USDT-SWAP"),
            dec!(100),
            10,
            Some(Price::new(dec!(0.1))),
            1_000,
        ));
        let err = tokio_test::assert_err!(result);
        assert!(matches!(err, ExecutorError::Registry(_)));
    }

    proptest! {
        #[test]
        fn prop_notional_never_exceeds_budget(
            budget_cents in 1u64..10_000_000,
            leverage in 1u32..125,
            price_cents in 1u64..10_000_000,
            cv_exp in 0u32..5,
            lot_exp in 0u32..4,
        ) {
            let budget = Decimal::new(budget_cents as i64, 2);
            let price = Price::new(Decimal::new(price_cents as i64, 2));
            let contract_value = Decimal::new(1, cv_exp);
            let lot = Decimal::new(1, lot_exp);
            let s = spec(contract_value, lot, lot);

            if let Quantization::Quantized { contracts, notional } =
                quantity_for_budget(&s, budget, leverage, price).unwrap()
            {
                let cap = budget * Decimal::from(leverage);
                prop_assert!(notional <= cap);
                prop_assert!(contracts.inner() * price.inner() * contract_value <= cap);
                prop_assert!(contracts.is_multiple_of(s.lot_step));
                prop_assert!(contracts >= s.minimum_size);
            }
        }
    }
}
