//! Admission gate: which strategy groups may trade live, and with what share.
//!
//! The allow-list is recomputed on a fixed interval from two sources:
//! - candidate groups from the parameter pool (status, score, win rate, top-k)
//! - trust weights in the admission window, which can demote a candidate
//!
//! Readers take an `Arc` snapshot, so one execution pass sees a single
//! consistent list even while a refresh lands.

use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trustloop_core::{
    now_ms, CandidateFilter, DynParameterPool, GroupId, RiskParameters, StrategyGroup,
    TrustWeightEntry, TrustWindow,
};
use trustloop_store::{DynStore, TrustWeightStore};
use trustloop_telemetry::Metrics;

use crate::error::ExecutorResult;

// ============================================================================
// AdmissionConfig
// ============================================================================

/// Configuration for allow-list computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Trust window consulted for demotion and shares, in days.
    /// Default: 7.
    #[serde(default = "default_window_days")]
    pub window_days: u32,

    /// Candidate filter passed to the parameter pool.
    #[serde(default)]
    pub filter: CandidateFilter,

    /// Groups whose weight is at or below this are demoted.
    /// Default: 0.6.
    #[serde(default = "default_demote_below")]
    pub demote_below: Decimal,

    /// Demotion only applies once a weight rests on this many trades.
    /// Default: 5.
    #[serde(default = "default_demote_min_trades")]
    pub demote_min_trades: u32,

    /// Refresh interval (ms).
    /// Default: 60,000.
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
}

fn default_window_days() -> u32 {
    TrustWindow::WEEK.days()
}

fn default_demote_below() -> Decimal {
    dec!(0.6)
}

fn default_demote_min_trades() -> u32 {
    5
}

fn default_refresh_interval_ms() -> u64 {
    60_000
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            filter: CandidateFilter::default(),
            demote_below: default_demote_below(),
            demote_min_trades: default_demote_min_trades(),
            refresh_interval_ms: default_refresh_interval_ms(),
        }
    }
}

impl AdmissionConfig {
    pub fn window(&self) -> TrustWindow {
        TrustWindow(self.window_days)
    }

    fn is_demoted(&self, entry: &TrustWeightEntry) -> bool {
        entry.trade_count >= self.demote_min_trades && entry.weight <= self.demote_below
    }
}

// ============================================================================
// BudgetConfig
// ============================================================================

/// Per-signal budget bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Default: 10.
    #[serde(default = "default_min_budget")]
    pub min_budget: Decimal,

    /// Default: 200.
    #[serde(default = "default_max_budget")]
    pub max_budget: Decimal,

    /// Fraction of available balance put at risk per pass.
    /// Default: 0.05.
    #[serde(default = "default_risk_fraction")]
    pub risk_fraction: Decimal,
}

fn default_min_budget() -> Decimal {
    dec!(10)
}

fn default_max_budget() -> Decimal {
    dec!(200)
}

fn default_risk_fraction() -> Decimal {
    dec!(0.05)
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            min_budget: default_min_budget(),
            max_budget: default_max_budget(),
            risk_fraction: default_risk_fraction(),
        }
    }
}

impl BudgetConfig {
    /// Budget pool for a balance: `max(min_budget, balance * risk_fraction)`.
    pub fn pool(&self, balance: Decimal) -> Decimal {
        (balance * self.risk_fraction).max(self.min_budget)
    }

    /// Budget for one signal: `clamp(pool * share, min_budget, max_budget)`.
    pub fn per_signal(&self, balance: Decimal, share: Decimal) -> Decimal {
        (self.pool(balance) * share).clamp(self.min_budget, self.max_budget)
    }
}

// ============================================================================
// AdmissionSnapshot
// ============================================================================

/// One allowed group with its effective weight.
#[derive(Debug, Clone, PartialEq)]
pub struct AllowedGroup {
    pub group: StrategyGroup,
    pub weight: Decimal,
}

/// Immutable allow-list as of one refresh.
#[derive(Debug, Clone, Default)]
pub struct AdmissionSnapshot {
    groups: BTreeMap<GroupId, AllowedGroup>,
    total_weight: Decimal,
    refreshed_at_ms: u64,
}

impl AdmissionSnapshot {
    #[must_use]
    pub fn new(allowed: Vec<AllowedGroup>, refreshed_at_ms: u64) -> Self {
        let total_weight = allowed.iter().map(|g| g.weight).sum();
        Self {
            groups: allowed
                .into_iter()
                .map(|g| (g.group.id.clone(), g))
                .collect(),
            total_weight,
            refreshed_at_ms,
        }
    }

    pub fn is_allowed(&self, group: &GroupId) -> bool {
        self.groups.contains_key(group)
    }

    /// Fraction of the budget pool for `group`, `None` if not allowed.
    ///
    /// With a zero weight total the split is equal.
    pub fn share(&self, group: &GroupId) -> Option<Decimal> {
        let allowed = self.groups.get(group)?;
        if self.total_weight > Decimal::ZERO {
            Some(allowed.weight / self.total_weight)
        } else {
            Some(Decimal::ONE / Decimal::from(self.groups.len()))
        }
    }

    pub fn weight(&self, group: &GroupId) -> Option<Decimal> {
        self.groups.get(group).map(|g| g.weight)
    }

    pub fn parameters(&self, group: &GroupId) -> Option<&RiskParameters> {
        self.groups.get(group).map(|g| &g.group.parameters)
    }

    pub fn group_ids(&self) -> impl Iterator<Item = &GroupId> {
        self.groups.keys()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn refreshed_at_ms(&self) -> u64 {
        self.refreshed_at_ms
    }
}

// ============================================================================
// AdmissionGate
// ============================================================================

pub struct AdmissionGate {
    pool: DynParameterPool,
    store: DynStore,
    config: AdmissionConfig,
    snapshot: RwLock<Arc<AdmissionSnapshot>>,
}

impl AdmissionGate {
    /// Create a gate with an empty allow-list. Call `refresh` before use.
    #[must_use]
    pub fn new(pool: DynParameterPool, store: DynStore, config: AdmissionConfig) -> Self {
        Self {
            pool,
            store,
            config,
            snapshot: RwLock::new(Arc::new(AdmissionSnapshot::default())),
        }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Current allow-list.
    pub fn snapshot(&self) -> Arc<AdmissionSnapshot> {
        self.snapshot.read().clone()
    }

    /// Recompute the allow-list from the pool and stored trust weights.
    pub fn refresh(&self, now_ms: u64) -> ExecutorResult<Arc<AdmissionSnapshot>> {
        let candidates = self.pool.load_candidates(&self.config.filter)?;
        let weights: HashMap<GroupId, TrustWeightEntry> = self
            .store
            .trust_weights(self.config.window())?
            .into_iter()
            .map(|entry| (entry.group_id.clone(), entry))
            .collect();

        let mut allowed = Vec::with_capacity(candidates.len());
        let mut demoted = 0usize;
        for group in candidates {
            let entry = weights.get(&group.id);
            if let Some(entry) = entry.filter(|e| self.config.is_demoted(e)) {
                debug!(
                    group = %group.id,
                    weight = %entry.weight,
                    trades = entry.trade_count,
                    "Group demoted by trust weight"
                );
                demoted += 1;
                continue;
            }
            let weight = entry.map_or(Decimal::ONE, |e| e.weight);
            allowed.push(AllowedGroup { group, weight });
        }

        let snapshot = Arc::new(AdmissionSnapshot::new(allowed, now_ms));
        let previous = std::mem::replace(&mut *self.snapshot.write(), snapshot.clone());
        Metrics::allowed_groups(snapshot.len());

        if previous.len() != snapshot.len() || !previous.group_ids().eq(snapshot.group_ids()) {
            info!(
                allowed = snapshot.len(),
                demoted,
                window = %self.config.window(),
                "Allow-list changed"
            );
        } else {
            debug!(allowed = snapshot.len(), demoted, "Allow-list refreshed");
        }
        Ok(snapshot)
    }

    /// Refresh on a fixed interval until cancelled.
    ///
    /// A failed refresh keeps the previous snapshot.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            refresh_interval_ms = self.config.refresh_interval_ms,
            window = %self.config.window(),
            "AdmissionGate started"
        );
        let interval = Duration::from_millis(self.config.refresh_interval_ms);

        loop {
            if let Err(e) = self.refresh(now_ms()) {
                warn!(error = %e, "Allow-list refresh failed, keeping previous snapshot");
            }

            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = shutdown.cancelled() => {
                    info!("AdmissionGate stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustloop_core::PoolError;
    use trustloop_store::{MemoryParameterPool, MemoryStore};

    fn group(id: &str, score: Decimal) -> StrategyGroup {
        let mut g = StrategyGroup::new(GroupId::from(id));
        g.score = score;
        g
    }

    fn weight(id: &str, weight: Decimal, trades: u32) -> TrustWeightEntry {
        TrustWeightEntry {
            group_id: GroupId::from(id),
            window: TrustWindow::WEEK,
            score: Decimal::ZERO,
            trade_count: trades,
            weight,
            source: "test".to_string(),
            updated_at_ms: 0,
        }
    }

    fn gate(store: Arc<MemoryStore>) -> AdmissionGate {
        let pool = Arc::new(MemoryParameterPool::new([
            group("a", dec!(3)),
            group("b", dec!(2)),
            group("c", dec!(1)),
        ]));
        AdmissionGate::new(pool, store, AdmissionConfig::default())
    }

    #[test]
    fn test_no_weights_split_equally() {
        let gate = gate(Arc::new(MemoryStore::new()));
        assert!(gate.snapshot().is_empty());

        let snapshot = gate.refresh(1_000).unwrap();
        assert_eq!(snapshot.len(), 3);
        let third = Decimal::ONE / dec!(3);
        for id in ["a", "b", "c"] {
            assert_eq!(snapshot.share(&GroupId::from(id)), Some(third));
        }
        assert_eq!(snapshot.share(&GroupId::from("zz")), None);
        assert_eq!(gate.snapshot().refreshed_at_ms(), 1_000);
    }

    #[test]
    fn test_weights_shape_shares_and_demote() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_trust_weight(weight("a", dec!(1.5), 10)).unwrap();
        // Low weight but too few trades to demote.
        store.upsert_trust_weight(weight("b", dec!(0.5), 2)).unwrap();
        store.upsert_trust_weight(weight("c", dec!(0.5), 8)).unwrap();

        let snapshot = gate(store).refresh(0).unwrap();
        assert!(snapshot.is_allowed(&GroupId::from("a")));
        assert!(snapshot.is_allowed(&GroupId::from("b")));
        assert!(!snapshot.is_allowed(&GroupId::from("c")));
        assert_eq!(snapshot.share(&GroupId::from("a")), Some(dec!(0.75)));
        assert_eq!(snapshot.share(&GroupId::from("b")), Some(dec!(0.25)));
    }

    #[test]
    fn test_failed_refresh_keeps_snapshot() {
        struct DownPool;
        impl trustloop_core::ParameterPool for DownPool {
            fn load_candidates(&self, _: &CandidateFilter) -> trustloop_core::PoolResult<Vec<StrategyGroup>> {
                Err(PoolError::Unavailable("down".to_string()))
            }
            fn update_group_performance(
                &self,
                _: &GroupId,
                _: Decimal,
                _: Decimal,
            ) -> trustloop_core::PoolResult<()> {
                Ok(())
            }
        }

        let gate = AdmissionGate::new(
            Arc::new(DownPool),
            Arc::new(MemoryStore::new()),
            AdmissionConfig::default(),
        );
        let err = gate.refresh(0).unwrap_err();
        assert!(err.is_transient());
        assert!(gate.snapshot().is_empty());
    }

    #[test]
    fn test_budget_pool_and_clamp() {
        let budget = BudgetConfig::default();
        assert_eq!(budget.pool(dec!(100)), dec!(10));
        assert_eq!(budget.pool(dec!(10000)), dec!(500));
        assert_eq!(budget.per_signal(dec!(10000), dec!(0.25)), dec!(125));
        assert_eq!(budget.per_signal(dec!(10000), dec!(1)), dec!(200));
        assert_eq!(budget.per_signal(dec!(100), dec!(0.1)), dec!(10));
    }
}
