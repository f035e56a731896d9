//! Rehearsal to live promotion.
//!
//! New signals enter rehearsal on first sight, and their expiry is fixed
//! at that moment so later stages read it from the store. A rehearsal signal moves
//! to live only once its strategy group is on the allow-list; until then
//! it waits, and it is never dropped silently.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trustloop_core::{now_ms, PassReport, Signal, SignalStatus, SkipReason};
use trustloop_store::{DynStore, SignalOrder, SignalStore, StoreResult};
use trustloop_telemetry::{record_pass, Metrics};

use crate::admission::AdmissionGate;
use crate::error::ExecutorResult;

// ============================================================================
// PromoterConfig
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoterConfig {
    /// Lifetime of a signal without an explicit expiry (ms).
    /// Default: 300,000 (5 minutes).
    #[serde(default = "default_signal_ttl_ms")]
    pub signal_ttl_ms: u64,

    /// Signals examined per status per pass.
    /// Default: 200.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,

    /// Pass interval (ms).
    /// Default: 2,000.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

fn default_signal_ttl_ms() -> u64 {
    300_000
}

fn default_batch_limit() -> usize {
    200
}

fn default_interval_ms() -> u64 {
    2_000
}

impl Default for PromoterConfig {
    fn default() -> Self {
        Self {
            signal_ttl_ms: default_signal_ttl_ms(),
            batch_limit: default_batch_limit(),
            interval_ms: default_interval_ms(),
        }
    }
}

// ============================================================================
// SignalPromoter
// ============================================================================

pub struct SignalPromoter {
    store: DynStore,
    admission: Arc<AdmissionGate>,
    config: PromoterConfig,
}

impl SignalPromoter {
    #[must_use]
    pub fn new(store: DynStore, admission: Arc<AdmissionGate>, config: PromoterConfig) -> Self {
        Self {
            store,
            admission,
            config,
        }
    }

    /// One promotion pass at `now_ms`.
    pub fn run_pass(&self, now_ms: u64) -> ExecutorResult<PassReport> {
        let mut report = PassReport::default();

        let fresh = self
            .store
            .signals_in_status(SignalStatus::New, SignalOrder::Oldest, self.config.batch_limit)?;
        for signal in &fresh {
            if signal.is_expired(now_ms, self.config.signal_ttl_ms) {
                self.apply(signal, SignalStatus::Expired, now_ms, &mut report);
                continue;
            }
            let expiry_ms = signal.effective_expiry_ms(self.config.signal_ttl_ms);
            let result = self.store.begin_rehearsal(signal.id, expiry_ms, now_ms);
            self.settle(signal, SignalStatus::WaitRehearsal, result, &mut report);
        }

        let snapshot = self.admission.snapshot();
        let rehearsing = self.store.signals_in_status(
            SignalStatus::WaitRehearsal,
            SignalOrder::Oldest,
            self.config.batch_limit,
        )?;
        for signal in &rehearsing {
            let next = match &signal.strategy_group_id {
                None => SignalStatus::Skipped(SkipReason::NoGroup),
                Some(_) if signal.is_expired(now_ms, self.config.signal_ttl_ms) => {
                    SignalStatus::Expired
                }
                Some(group) if snapshot.is_allowed(group) => SignalStatus::WaitLive,
                Some(group) => {
                    debug!(signal_id = %signal.id, group = %group, "Group not allowed yet, waiting");
                    continue;
                }
            };
            self.apply(signal, next, now_ms, &mut report);
        }

        Ok(report)
    }

    fn apply(&self, signal: &Signal, next: SignalStatus, now_ms: u64, report: &mut PassReport) {
        let result = self
            .store
            .transition_signal(signal.id, signal.status, next, now_ms);
        self.settle(signal, next, result, report);
    }

    fn settle(
        &self,
        signal: &Signal,
        next: SignalStatus,
        result: StoreResult<bool>,
        report: &mut PassReport,
    ) {
        match result {
            Ok(true) => {
                Metrics::signal_transition(&next.to_string());
                debug!(signal_id = %signal.id, from = %signal.status, to = %next, "Signal promoted");
                match next {
                    SignalStatus::WaitRehearsal | SignalStatus::WaitLive => report.record_processed(),
                    _ => report.record_skipped(),
                }
            }
            Ok(false) => {
                debug!(signal_id = %signal.id, "Signal moved by another consumer");
            }
            Err(e) => {
                warn!(signal_id = %signal.id, error = %e, "Signal transition failed");
                report.record_errored();
            }
        }
    }

    /// Run passes until cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_ms = self.config.interval_ms,
            signal_ttl_ms = self.config.signal_ttl_ms,
            "SignalPromoter started"
        );
        let interval = Duration::from_millis(self.config.interval_ms);

        loop {
            let started = Instant::now();
            match self.run_pass(now_ms()) {
                Ok(report) => record_pass("promoter", &report, started.elapsed()),
                Err(e) => warn!(error = %e, "Promotion pass failed"),
            }

            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = shutdown.cancelled() => {
                    info!("SignalPromoter stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionConfig;
    use rust_decimal_macros::dec;
    use trustloop_core::{GroupId, InstrumentId, NewSignal, Price, StrategyGroup};
    use trustloop_store::{MemoryParameterPool, MemoryStore};

    struct Fixture {
        store: Arc<MemoryStore>,
        admission: Arc<AdmissionGate>,
        promoter: SignalPromoter,
    }

    fn fixture(allowed: &[&str]) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let pool = Arc::new(MemoryParameterPool::new(
            allowed.iter().map(|id| StrategyGroup::new(GroupId::from(*id))),
        ));
        let admission = Arc::new(AdmissionGate::new(
            pool,
            store.clone(),
            AdmissionConfig::default(),
        ));
        admission.refresh(0).unwrap();
        let promoter = SignalPromoter::new(store.clone(), admission.clone(), PromoterConfig::default());
        Fixture {
            store,
            admission,
            promoter,
        }
    }

    fn signal(group: Option<&str>, ts: u64) -> NewSignal {
        let mut new = NewSignal::new(
            InstrumentId::from("BTC-USDT-SWAP"),
            "BREAKOUT_UP",
            Price::new(dec!(50000)),
            ts,
        );
        new.strategy_group_id = group.map(GroupId::from);
        new
    }

    fn status(f: &Fixture, id: trustloop_core::SignalId) -> SignalStatus {
        f.store.get_signal(id).unwrap().unwrap().status
    }

    #[test]
    fn test_allowed_signal_reaches_live_in_two_passes() {
        let f = fixture(&["g1"]);
        let id = f.store.insert_signal(signal(Some("g1"), 1_000), 1_000).unwrap();

        let report = f.promoter.run_pass(1_000).unwrap();
        // NEW -> WAIT_REHEARSAL and WAIT_REHEARSAL -> WAIT_LIVE in the same pass
        assert_eq!(report.processed, 2);
        assert_eq!(status(&f, id), SignalStatus::WaitLive);
    }

    #[test]
    fn test_missing_group_is_skipped() {
        let f = fixture(&["g1"]);
        let id = f.store.insert_signal(signal(None, 1_000), 1_000).unwrap();
        let report = f.promoter.run_pass(1_000).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(status(&f, id), SignalStatus::Skipped(SkipReason::NoGroup));
    }

    #[test]
    fn test_unlisted_group_waits_then_promotes() {
        let f = fixture(&["g1"]);
        let id = f.store.insert_signal(signal(Some("g2"), 1_000), 1_000).unwrap();

        f.promoter.run_pass(1_000).unwrap();
        f.promoter.run_pass(2_000).unwrap();
        assert_eq!(status(&f, id), SignalStatus::WaitRehearsal);

        let pool = Arc::new(MemoryParameterPool::new([
            StrategyGroup::new(GroupId::from("g1")),
            StrategyGroup::new(GroupId::from("g2")),
        ]));
        let admission = Arc::new(AdmissionGate::new(
            pool,
            f.store.clone(),
            AdmissionConfig::default(),
        ));
        admission.refresh(3_000).unwrap();
        let promoter = SignalPromoter::new(f.store.clone(), admission, PromoterConfig::default());
        promoter.run_pass(3_000).unwrap();
        assert_eq!(status(&f, id), SignalStatus::WaitLive);
        assert_eq!(f.admission.snapshot().len(), 1);
    }

    #[test]
    fn test_rehearsal_stamps_expiry_from_promoter_ttl() {
        let f = fixture(&["g1"]);
        let promoter = SignalPromoter::new(
            f.store.clone(),
            f.admission.clone(),
            PromoterConfig {
                signal_ttl_ms: 10_000,
                ..Default::default()
            },
        );
        let open = f.store.insert_signal(signal(Some("g1"), 1_000), 1_000).unwrap();
        let mut fixed = signal(Some("g1"), 1_000);
        fixed.expiry_ms = Some(60_000);
        let fixed = f.store.insert_signal(fixed, 1_000).unwrap();

        promoter.run_pass(2_000).unwrap();

        let stored = f.store.get_signal(open).unwrap().unwrap();
        assert_eq!(stored.status, SignalStatus::WaitLive);
        assert_eq!(stored.expiry_ms, Some(11_000));
        assert!(stored.is_past_expiry(11_001));
        assert_eq!(f.store.get_signal(fixed).unwrap().unwrap().expiry_ms, Some(60_000));
    }

    #[test]
    fn test_expired_signals() {
        let f = fixture(&["g1"]);
        let ttl = PromoterConfig::default().signal_ttl_ms;
        let stale = f.store.insert_signal(signal(Some("g1"), 0), 0).unwrap();
        let id = f.store.insert_signal(signal(Some("g9"), 1_000), 1_000).unwrap();

        f.promoter.run_pass(ttl + 1).unwrap();
        assert_eq!(status(&f, stale), SignalStatus::Expired);
        assert_eq!(status(&f, id), SignalStatus::WaitRehearsal);

        f.promoter.run_pass(ttl + 1_001).unwrap();
        assert_eq!(status(&f, id), SignalStatus::Expired);
    }
}
