//! Periodic position guard.
//!
//! Each pass reads open positions from the exchange and makes sure each
//! one carries a stop. State per (instrument, side) lives in a
//! [`GuardBook`] so a breakeven raise happens at most once, and it is
//! re-derived from exchange protection after a restart.

use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trustloop_core::{
    now_ms, ActiveProtection, DynExchange, InstrumentId, OpenPosition, PassReport, PositionSide,
    Price, ProtectionRequest,
};
use trustloop_registry::InstrumentCache;
use trustloop_telemetry::{record_pass, Metrics};

use crate::error::GuardResult;
use crate::protection::{breakeven_stop, initial_plan, is_at_breakeven, tightens, GuardConfig};

type GuardKey = (InstrumentId, PositionSide);

// ============================================================================
// GuardState / GuardBook
// ============================================================================

/// Protection state for one position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardState {
    pub instrument: InstrumentId,
    pub side: PositionSide,
    pub entry_price: Price,
    pub protection_installed: bool,
    pub breakeven_applied: bool,
    pub stop_loss: Option<Price>,
}

/// Guard state keyed by (instrument, side).
#[derive(Debug, Default)]
pub struct GuardBook {
    states: DashMap<GuardKey, GuardState>,
}

impl GuardBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, instrument: &InstrumentId, side: PositionSide) -> Option<GuardState> {
        self.states
            .get(&(instrument.clone(), side))
            .map(|s| s.value().clone())
    }

    pub fn insert(&self, state: GuardState) {
        self.states
            .insert((state.instrument.clone(), state.side), state);
    }

    /// Drop state for positions no longer open. Returns how many were dropped.
    fn retain_open(&self, open: &HashSet<GuardKey>) -> usize {
        let before = self.states.len();
        self.states.retain(|key, state| {
            let keep = open.contains(key);
            if !keep {
                debug!(
                    instrument = %state.instrument,
                    side = %state.side,
                    "Position closed, clearing guard state"
                );
            }
            keep
        });
        before.saturating_sub(self.states.len())
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

// ============================================================================
// PositionGuard
// ============================================================================

pub struct PositionGuard {
    exchange: DynExchange,
    instruments: Arc<InstrumentCache>,
    book: Arc<GuardBook>,
    config: GuardConfig,
}

impl PositionGuard {
    #[must_use]
    pub fn new(
        exchange: DynExchange,
        instruments: Arc<InstrumentCache>,
        book: Arc<GuardBook>,
        config: GuardConfig,
    ) -> Self {
        Self {
            exchange,
            instruments,
            book,
            config,
        }
    }

    pub fn book(&self) -> &Arc<GuardBook> {
        &self.book
    }

    /// One guard pass at `now_ms`.
    ///
    /// Failing to read positions fails the pass. A failure on one
    /// position is counted and the pass moves on.
    pub async fn run_pass(&self, now_ms: u64) -> GuardResult<PassReport> {
        let mut report = PassReport::default();
        let positions: Vec<OpenPosition> = self
            .exchange
            .open_positions()
            .await?
            .into_iter()
            .filter(OpenPosition::is_open)
            .collect();

        let open: HashSet<GuardKey> = positions
            .iter()
            .map(|p| (p.instrument.clone(), p.side))
            .collect();
        let cleared = self.book.retain_open(&open);
        if cleared > 0 {
            info!(cleared, "Cleared guard state for closed positions");
        }

        for position in &positions {
            match self.guard_position(position, now_ms).await {
                Ok(true) => report.record_processed(),
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        instrument = %position.instrument,
                        side = %position.side,
                        error = %e,
                        "Failed to guard position"
                    );
                    report.record_errored();
                }
            }
        }
        Ok(report)
    }

    /// Returns whether a protection request was sent.
    async fn guard_position(&self, position: &OpenPosition, now_ms: u64) -> GuardResult<bool> {
        let tick = match self.instruments.get_or_fetch(&position.instrument, now_ms).await {
            Ok(spec) => Some(spec.tick_size),
            Err(e) => {
                debug!(instrument = %position.instrument, error = %e, "Tick size unavailable");
                None
            }
        };
        let unrealized = self.unrealized_return(position).await;

        let state = match self.book.get(&position.instrument, position.side) {
            Some(state) if state.protection_installed => state,
            _ => match self.adopt_existing(position).await? {
                Some(state) => state,
                None => return self.protect_new(position, unrealized, tick).await,
            },
        };
        self.raise_to_breakeven(position, state, unrealized, tick)
            .await
    }

    async fn unrealized_return(&self, position: &OpenPosition) -> Option<Decimal> {
        let last = match position.mark_price {
            Some(mark) => mark,
            None => match self
                .exchange
                .reference_price(position.instrument.clone())
                .await
            {
                Ok(quote) => quote.price,
                Err(e) => {
                    debug!(instrument = %position.instrument, error = %e, "No price for position");
                    return None;
                }
            },
        };
        position.unrealized_return(last)
    }

    /// Pick up a stop already on the exchange, e.g. after a restart.
    async fn adopt_existing(&self, position: &OpenPosition) -> GuardResult<Option<GuardState>> {
        let existing: Option<ActiveProtection> = self
            .exchange
            .active_protection(position.instrument.clone(), position.side)
            .await?;
        let Some(stop_loss) = existing.and_then(|p| p.stop_loss) else {
            return Ok(None);
        };

        let state = GuardState {
            instrument: position.instrument.clone(),
            side: position.side,
            entry_price: position.entry_price,
            protection_installed: true,
            breakeven_applied: is_at_breakeven(position.side, position.entry_price, stop_loss),
            stop_loss: Some(stop_loss),
        };
        info!(
            instrument = %position.instrument,
            side = %position.side,
            %stop_loss,
            breakeven_applied = state.breakeven_applied,
            "Adopted existing protection"
        );
        Metrics::guard_protection("adopted");
        self.book.insert(state.clone());
        Ok(Some(state))
    }

    async fn protect_new(
        &self,
        position: &OpenPosition,
        unrealized: Option<Decimal>,
        tick: Option<Price>,
    ) -> GuardResult<bool> {
        let plan = initial_plan(position, unrealized, tick, &self.config);
        let request = ProtectionRequest {
            instrument: position.instrument.clone(),
            side: position.side,
            stop_loss: Some(plan.stop_loss),
            take_profit: Some(plan.take_profit),
            trailing_ratio: plan.trailing_ratio,
        };
        self.exchange.install_protection(request).await?;

        info!(
            instrument = %position.instrument,
            side = %position.side,
            entry = %position.entry_price,
            stop_loss = %plan.stop_loss,
            take_profit = %plan.take_profit,
            trailing_ratio = ?plan.trailing_ratio,
            breakeven_applied = plan.breakeven_applied,
            "Installed protection"
        );
        Metrics::guard_protection("initial");
        if plan.breakeven_applied {
            Metrics::guard_protection("breakeven");
        }
        if plan.trailing_ratio.is_some() {
            Metrics::guard_protection("trailing");
        }

        self.book.insert(GuardState {
            instrument: position.instrument.clone(),
            side: position.side,
            entry_price: position.entry_price,
            protection_installed: true,
            breakeven_applied: plan.breakeven_applied,
            stop_loss: Some(plan.stop_loss),
        });
        Ok(true)
    }

    /// Raise the stop to breakeven the first time the trigger is crossed.
    async fn raise_to_breakeven(
        &self,
        position: &OpenPosition,
        mut state: GuardState,
        unrealized: Option<Decimal>,
        tick: Option<Price>,
    ) -> GuardResult<bool> {
        if state.breakeven_applied
            || unrealized.map_or(true, |r| r < self.config.breakeven_trigger)
        {
            return Ok(false);
        }

        let candidate = breakeven_stop(
            position.side,
            position.entry_price,
            tick,
            self.config.breakeven_offset,
        );
        let sent = if tightens(position.side, state.stop_loss, candidate) {
            self.exchange
                .install_protection(ProtectionRequest::stop_only(
                    position.instrument.clone(),
                    position.side,
                    candidate,
                ))
                .await?;
            info!(
                instrument = %position.instrument,
                side = %position.side,
                previous = ?state.stop_loss,
                stop_loss = %candidate,
                "Raised stop to breakeven"
            );
            Metrics::guard_protection("breakeven");
            state.stop_loss = Some(candidate);
            true
        } else {
            debug!(
                instrument = %position.instrument,
                stop_loss = ?state.stop_loss,
                "Stop already past breakeven"
            );
            false
        };

        state.breakeven_applied = true;
        self.book.insert(state);
        Ok(sent)
    }

    /// Run passes until cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_ms = self.config.interval_ms,
            breakeven_trigger = %self.config.breakeven_trigger,
            "PositionGuard started"
        );
        let interval = Duration::from_millis(self.config.interval_ms);

        loop {
            let started = Instant::now();
            match self.run_pass(now_ms()).await {
                Ok(report) => record_pass("guard", &report, started.elapsed()),
                Err(e) => warn!(error = %e, "Guard pass failed"),
            }

            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = shutdown.cancelled() => {
                    info!("PositionGuard stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trustloop_core::{InstrumentSpec, PaperExchange, Size};

    fn instrument() -> InstrumentId {
        InstrumentId::from("ETH-USDT-SWAP")
    }

    fn setup() -> (Arc<PaperExchange>, PositionGuard) {
        let paper = Arc::new(PaperExchange::new());
        paper.set_spec(
            instrument(),
            InstrumentSpec {
                tick_size: Price::new(dec!(0.1)),
                ..Default::default()
            },
        );
        paper.set_quote(instrument(), Price::new(dec!(100)), 0);
        paper.open_position(OpenPosition {
            instrument: instrument(),
            side: PositionSide::Long,
            contracts: Size::new(dec!(3)),
            entry_price: Price::new(dec!(100)),
            mark_price: Some(Price::new(dec!(100))),
        });
        let exchange: DynExchange = paper.clone();
        let cache = Arc::new(InstrumentCache::new(exchange.clone(), 60_000));
        let guard = PositionGuard::new(
            exchange,
            cache,
            Arc::new(GuardBook::new()),
            GuardConfig::default(),
        );
        (paper, guard)
    }

    fn stop(paper: &PaperExchange) -> Option<Price> {
        paper
            .protection(&instrument(), PositionSide::Long)
            .and_then(|p| p.stop_loss)
    }

    #[tokio::test]
    async fn test_installs_default_protection_once() {
        let (paper, guard) = setup();

        let report = guard.run_pass(0).await.unwrap();
        assert_eq!(report.processed, 1);
        let protection = paper.protection(&instrument(), PositionSide::Long).unwrap();
        assert_eq!(protection.stop_loss, Some(Price::new(dec!(99.4))));
        assert_eq!(protection.take_profit, Some(Price::new(dec!(101.2))));
        assert_eq!(protection.trailing_ratio, None);

        let report = guard.run_pass(1).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(paper.protection_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_breakeven_raised_once_and_never_lowered() {
        let (paper, guard) = setup();
        guard.run_pass(0).await.unwrap();

        paper.set_quote(instrument(), Price::new(dec!(101.5)), 1);
        guard.run_pass(1).await.unwrap();
        assert_eq!(stop(&paper), Some(Price::new(dec!(100.1))));
        assert_eq!(paper.protection_requests().len(), 2);

        // Further passes do not re-issue, even after the price falls back.
        paper.set_quote(instrument(), Price::new(dec!(102)), 2);
        guard.run_pass(2).await.unwrap();
        paper.set_quote(instrument(), Price::new(dec!(100.5)), 3);
        guard.run_pass(3).await.unwrap();
        assert_eq!(paper.protection_requests().len(), 2);
        assert_eq!(stop(&paper), Some(Price::new(dec!(100.1))));
        assert!(guard
            .book()
            .get(&instrument(), PositionSide::Long)
            .unwrap()
            .breakeven_applied);
    }

    #[tokio::test]
    async fn test_profitable_first_sight_gets_trailing() {
        let (paper, guard) = setup();
        paper.set_quote(instrument(), Price::new(dec!(100.9)), 0);
        guard.run_pass(0).await.unwrap();
        let protection = paper.protection(&instrument(), PositionSide::Long).unwrap();
        assert_eq!(protection.trailing_ratio, Some(dec!(0.004)));
        assert_eq!(protection.stop_loss, Some(Price::new(dec!(99.4))));
    }

    #[tokio::test]
    async fn test_restart_adopts_existing_protection() {
        let (paper, guard) = setup();
        guard.run_pass(0).await.unwrap();

        let exchange: DynExchange = paper.clone();
        let restarted = PositionGuard::new(
            exchange.clone(),
            Arc::new(InstrumentCache::new(exchange, 60_000)),
            Arc::new(GuardBook::new()),
            GuardConfig::default(),
        );
        let report = restarted.run_pass(10).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(paper.protection_requests().len(), 1);
        let state = restarted
            .book()
            .get(&instrument(), PositionSide::Long)
            .unwrap();
        assert!(state.protection_installed);
        assert_eq!(state.stop_loss, Some(Price::new(dec!(99.4))));
    }

    #[tokio::test]
    async fn test_closed_position_clears_state() {
        let (paper, guard) = setup();
        guard.run_pass(0).await.unwrap();
        assert_eq!(guard.book().len(), 1);

        paper.close_position(&instrument(), PositionSide::Long);
        guard.run_pass(1).await.unwrap();
        assert!(guard.book().is_empty());
    }

    #[tokio::test]
    async fn test_short_breakeven_moves_down() {
        let (paper, guard) = setup();
        paper.close_position(&instrument(), PositionSide::Long);
        paper.open_position(OpenPosition {
            instrument: instrument(),
            side: PositionSide::Short,
            contracts: Size::new(dec!(1)),
            entry_price: Price::new(dec!(100)),
            mark_price: None,
        });
        guard.run_pass(0).await.unwrap();
        let initial = paper
            .protection(&instrument(), PositionSide::Short)
            .and_then(|p| p.stop_loss);
        assert_eq!(initial, Some(Price::new(dec!(100.6))));

        paper.set_quote(instrument(), Price::new(dec!(98.9)), 1);
        guard.run_pass(1).await.unwrap();
        let raised = paper
            .protection(&instrument(), PositionSide::Short)
            .and_then(|p| p.stop_loss);
        assert_eq!(raised, Some(Price::new(dec!(99.9))));
    }
}
