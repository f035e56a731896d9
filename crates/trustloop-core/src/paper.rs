//! In-process paper exchange.
//!
//! Simulates fills at the current quote, tracks positions and attached
//! protection, and serves candles from memory. Used for paper trading and
//! as the exchange double in tests. Book state lives behind a private
//! struct; callers only see the [`Exchange`] surface plus test setters.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

use crate::candle::{Candle, Interval};
use crate::exchange::{BoxFuture, Exchange, ExchangeError, ExchangeResult, Quote};
use crate::order::{
    ActiveProtection, OrderId, OrderRequest, OrderState, PositionSide, ProtectionRequest,
};
use crate::position::OpenPosition;
use crate::{InstrumentId, InstrumentSpec, Price};

/// How the paper exchange treats new orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillMode {
    /// Fill completely at the current quote.
    #[default]
    Immediate,
    /// Accept but never fill.
    Resting,
    /// Reject every order.
    Reject,
}

type PositionKey = (InstrumentId, PositionSide);

#[derive(Default)]
struct PaperBook {
    quotes: HashMap<InstrumentId, Quote>,
    specs: HashMap<InstrumentId, InstrumentSpec>,
    balance: Decimal,
    orders: HashMap<OrderId, OrderState>,
    positions: HashMap<PositionKey, OpenPosition>,
    protections: HashMap<PositionKey, ActiveProtection>,
    candles: HashMap<(InstrumentId, Interval), Vec<Candle>>,
    fill_mode: FillMode,
    submitted: Vec<OrderRequest>,
    protection_requests: Vec<ProtectionRequest>,
}

impl PaperBook {
    fn quote(&self, instrument: &InstrumentId) -> ExchangeResult<Quote> {
        self.quotes
            .get(instrument)
            .copied()
            .ok_or_else(|| ExchangeError::UnknownInstrument(instrument.clone()))
    }

    fn fill(&mut self, request: &OrderRequest, price: Price, spec: &InstrumentSpec) {
        let key = (request.instrument.clone(), request.side.position_side());
        let margin = request.contracts.inner() * spec.contract_value * price.inner()
            / Decimal::from(request.leverage.max(1));
        self.balance -= margin;

        let position = self.positions.entry(key.clone()).or_insert(OpenPosition {
            instrument: request.instrument.clone(),
            side: request.side.position_side(),
            contracts: crate::Size::ZERO,
            entry_price: price,
            mark_price: Some(price),
        });
        let total = position.contracts + request.contracts;
        if total.is_positive() {
            let weighted = position.contracts.notional(position.entry_price)
                + request.contracts.notional(price);
            position.entry_price = Price::new(weighted / total.inner());
        }
        position.contracts = total;

        if request.stop_loss.is_some() || request.take_profit.is_some() {
            let protection = self.protections.entry(key).or_default();
            protection.stop_loss = request.stop_loss.or(protection.stop_loss);
            protection.take_profit = request.take_profit.or(protection.take_profit);
        }
    }
}

/// Paper exchange implementing [`Exchange`].
pub struct PaperExchange {
    book: Mutex<PaperBook>,
    next_order: AtomicU64,
    unavailable: AtomicBool,
    candle_requests: AtomicU64,
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperExchange {
    #[must_use]
    pub fn new() -> Self {
        Self {
            book: Mutex::new(PaperBook::default()),
            next_order: AtomicU64::new(1),
            unavailable: AtomicBool::new(false),
            candle_requests: AtomicU64::new(0),
        }
    }

    pub fn set_balance(&self, balance: Decimal) {
        self.book.lock().balance = balance;
    }

    pub fn set_quote(&self, instrument: InstrumentId, price: Price, ts_ms: u64) {
        let mut book = self.book.lock();
        for ((inst, _), position) in book.positions.iter_mut() {
            if *inst == instrument {
                position.mark_price = Some(price);
            }
        }
        book.quotes.insert(instrument, Quote { price, ts_ms });
    }

    pub fn set_spec(&self, instrument: InstrumentId, spec: InstrumentSpec) {
        self.book.lock().specs.insert(instrument, spec);
    }

    pub fn set_candles(&self, instrument: InstrumentId, interval: Interval, candles: Vec<Candle>) {
        self.book.lock().candles.insert((instrument, interval), candles);
    }

    pub fn set_fill_mode(&self, mode: FillMode) {
        self.book.lock().fill_mode = mode;
    }

    /// Make every call fail with a transient error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Seed an open position directly.
    pub fn open_position(&self, position: OpenPosition) {
        let key = (position.instrument.clone(), position.side);
        self.book.lock().positions.insert(key, position);
    }

    /// Seed protection directly, as if installed before a restart.
    pub fn attach_protection(
        &self,
        instrument: InstrumentId,
        side: PositionSide,
        protection: ActiveProtection,
    ) {
        self.book.lock().protections.insert((instrument, side), protection);
    }

    /// Remove a position and its protection.
    pub fn close_position(&self, instrument: &InstrumentId, side: PositionSide) {
        let key = (instrument.clone(), side);
        let mut book = self.book.lock();
        book.positions.remove(&key);
        book.protections.remove(&key);
    }

    pub fn submitted_orders(&self) -> Vec<OrderRequest> {
        self.book.lock().submitted.clone()
    }

    pub fn protection_requests(&self) -> Vec<ProtectionRequest> {
        self.book.lock().protection_requests.clone()
    }

    pub fn protection(&self, instrument: &InstrumentId, side: PositionSide) -> Option<ActiveProtection> {
        self.book
            .lock()
            .protections
            .get(&(instrument.clone(), side))
            .cloned()
    }

    pub fn balance(&self) -> Decimal {
        self.book.lock().balance
    }

    /// Number of `historical_candles` calls served.
    pub fn candle_requests(&self) -> u64 {
        self.candle_requests.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> ExchangeResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ExchangeError::Unavailable("paper exchange offline".to_string()));
        }
        Ok(())
    }
}

impl Exchange for PaperExchange {
    fn reference_price(&self, instrument: InstrumentId) -> BoxFuture<'_, ExchangeResult<Quote>> {
        Box::pin(async move {
            self.check_available()?;
            self.book.lock().quote(&instrument)
        })
    }

    fn instrument_spec(
        &self,
        instrument: InstrumentId,
    ) -> BoxFuture<'_, ExchangeResult<InstrumentSpec>> {
        Box::pin(async move {
            self.check_available()?;
            self.book
                .lock()
                .specs
                .get(&instrument)
                .cloned()
                .ok_or(ExchangeError::UnknownInstrument(instrument))
        })
    }

    fn available_balance(&self) -> BoxFuture<'_, ExchangeResult<Decimal>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.book.lock().balance)
        })
    }

    fn submit_order(&self, request: OrderRequest) -> BoxFuture<'_, ExchangeResult<OrderId>> {
        Box::pin(async move {
            self.check_available()?;
            let mut book = self.book.lock();
            let spec = book
                .specs
                .get(&request.instrument)
                .cloned()
                .ok_or_else(|| ExchangeError::UnknownInstrument(request.instrument.clone()))?;
            if !request.contracts.is_multiple_of(spec.lot_step)
                || request.contracts < spec.minimum_size
                || !request.contracts.is_positive()
            {
                return Err(ExchangeError::Rejected(format!(
                    "invalid size {} for lot {} min {}",
                    request.contracts, spec.lot_step, spec.minimum_size
                )));
            }
            if book.fill_mode == FillMode::Reject {
                return Err(ExchangeError::Rejected("paper fill mode rejects".to_string()));
            }
            let quote = book.quote(&request.instrument)?;

            let order_id = OrderId::new(format!(
                "paper-{}",
                self.next_order.fetch_add(1, Ordering::SeqCst)
            ));
            let state = match book.fill_mode {
                FillMode::Immediate => {
                    book.fill(&request, quote.price, &spec);
                    OrderState::Filled
                }
                _ => OrderState::Live,
            };
            debug!(
                order_id = %order_id,
                instrument = %request.instrument,
                side = %request.side,
                contracts = %request.contracts,
                price = %quote.price,
                ?state,
                "Paper order accepted"
            );
            book.orders.insert(order_id.clone(), state);
            book.submitted.push(request);
            Ok(order_id)
        })
    }

    fn order_state(
        &self,
        _instrument: InstrumentId,
        order_id: OrderId,
    ) -> BoxFuture<'_, ExchangeResult<OrderState>> {
        Box::pin(async move {
            self.check_available()?;
            self.book
                .lock()
                .orders
                .get(&order_id)
                .copied()
                .ok_or(ExchangeError::UnknownOrder(order_id))
        })
    }

    fn historical_candles(
        &self,
        instrument: InstrumentId,
        interval: Interval,
        start_ms: u64,
        end_ms: u64,
    ) -> BoxFuture<'_, ExchangeResult<Vec<Candle>>> {
        Box::pin(async move {
            self.check_available()?;
            self.candle_requests.fetch_add(1, Ordering::SeqCst);
            let book = self.book.lock();
            let candles = book
                .candles
                .get(&(instrument, interval))
                .map(|all| {
                    all.iter()
                        .filter(|c| c.ts_ms >= start_ms && c.ts_ms <= end_ms)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            Ok(candles)
        })
    }

    fn open_positions(&self) -> BoxFuture<'_, ExchangeResult<Vec<OpenPosition>>> {
        Box::pin(async move {
            self.check_available()?;
            let mut positions: Vec<OpenPosition> =
                self.book.lock().positions.values().cloned().collect();
            positions.sort_by(|a, b| (&a.instrument, a.side).cmp(&(&b.instrument, b.side)));
            Ok(positions)
        })
    }

    fn active_protection(
        &self,
        instrument: InstrumentId,
        side: PositionSide,
    ) -> BoxFuture<'_, ExchangeResult<Option<ActiveProtection>>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self
                .book
                .lock()
                .protections
                .get(&(instrument, side))
                .filter(|p| !p.is_empty())
                .cloned())
        })
    }

    fn install_protection(&self, request: ProtectionRequest) -> BoxFuture<'_, ExchangeResult<()>> {
        Box::pin(async move {
            self.check_available()?;
            let mut book = self.book.lock();
            let key = (request.instrument.clone(), request.side);
            if !book.positions.contains_key(&key) {
                return Err(ExchangeError::Rejected(format!(
                    "no {} position on {}",
                    request.side, request.instrument
                )));
            }
            let protection = book.protections.entry(key).or_default();
            if request.stop_loss.is_some() {
                protection.stop_loss = request.stop_loss;
            }
            if request.take_profit.is_some() {
                protection.take_profit = request.take_profit;
            }
            if request.trailing_ratio.is_some() {
                protection.trailing_ratio = request.trailing_ratio;
            }
            book.protection_requests.push(request);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{ClientOrderId, MarginMode, Side};
    use crate::strategy::GroupId;
    use crate::Size;
    use rust_decimal_macros::dec;

    fn instrument() -> InstrumentId {
        InstrumentId::from("BTC-USDT-SWAP")
    }

    fn exchange() -> PaperExchange {
        let exchange = PaperExchange::new();
        exchange.set_balance(dec!(1000));
        exchange.set_spec(
            instrument(),
            InstrumentSpec {
                contract_value: dec!(0.01),
                ..Default::default()
            },
        );
        exchange.set_quote(instrument(), Price::new(dec!(50000)), 1_000);
        exchange
    }

    fn request(contracts: Size) -> OrderRequest {
        OrderRequest {
            client_order_id: ClientOrderId::new(),
            instrument: instrument(),
            side: Side::Buy,
            contracts,
            leverage: 10,
            margin_mode: MarginMode::Cross,
            group_id: GroupId::from("g1"),
            take_profit: None,
            stop_loss: Some(Price::new(dec!(49500))),
        }
    }

    #[tokio::test]
    async fn test_immediate_fill_opens_position_with_attached_stop() {
        let exchange = exchange();
        let order_id = exchange.submit_order(request(Size::new(dec!(2)))).await.unwrap();

        assert_eq!(
            exchange.order_state(instrument(), order_id).await.unwrap(),
            OrderState::Filled
        );
        let positions = exchange.open_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].contracts, Size::new(dec!(2)));
        // margin = 2 * 0.01 * 50000 / 10
        assert_eq!(exchange.balance(), dec!(900));

        let protection = exchange
            .active_protection(instrument(), PositionSide::Long)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(protection.stop_loss, Some(Price::new(dec!(49500))));
    }

    #[tokio::test]
    async fn test_rejects_off_lot_size() {
        let exchange = exchange();
        let result = exchange.submit_order(request(Size::new(dec!(1.5)))).await;
        assert!(matches!(result, Err(ExchangeError::Rejected(_))));
        assert!(exchange.submitted_orders().is_empty());
    }

    #[tokio::test]
    async fn test_resting_mode_never_fills() {
        let exchange = exchange();
        exchange.set_fill_mode(FillMode::Resting);
        let order_id = exchange.submit_order(request(Size::ONE)).await.unwrap();
        assert_eq!(
            exchange.order_state(instrument(), order_id).await.unwrap(),
            OrderState::Live
        );
        assert!(exchange.open_positions().await.unwrap().is_empty());
    }

    #[test]
    fn test_unavailable_is_transient() {
        let exchange = exchange();
        exchange.set_unavailable(true);
        let err = tokio_test::assert_err!(tokio_test::block_on(exchange.available_balance()));
        assert!(err.is_transient());

        exchange.set_unavailable(false);
        tokio_test::assert_ok!(tokio_test::block_on(exchange.available_balance()));
    }

    #[tokio::test]
    async fn test_candles_filtered_by_range() {
        let exchange = exchange();
        let p = Price::new(dec!(100));
        exchange.set_candles(
            instrument(),
            Interval::OneMinute,
            (0..5).map(|i| Candle::new(i * 60_000, p, p, p, p)).collect(),
        );
        let candles = exchange
            .historical_candles(instrument(), Interval::OneMinute, 60_000, 180_000)
            .await
            .unwrap();
        assert_eq!(candles.len(), 3);
        assert_eq!(exchange.candle_requests(), 1);
    }
}
