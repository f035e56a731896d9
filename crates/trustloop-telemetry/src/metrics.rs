//! Prometheus metrics for trustloop.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration
//! failure means duplicate metric names, a startup bug that should crash
//! immediately. These panics only happen during lazy static init.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, register_int_gauge,
    CounterVec, Encoder, GaugeVec, HistogramVec, IntGauge, TextEncoder,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::{TelemetryError, TelemetryResult};

/// Items handled per loop pass.
/// Labels: loop, result (processed/skipped/errored)
pub static PASS_ITEMS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "trustloop_pass_items_total",
        "Items handled by periodic loop passes",
        &["loop", "result"]
    )
    .unwrap()
});

/// Wall time of one loop pass.
pub static PASS_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "trustloop_pass_duration_seconds",
        "Duration of one loop pass in seconds",
        &["loop"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 20.0, 60.0]
    )
    .unwrap()
});

/// Signal status transitions written.
pub static SIGNAL_TRANSITIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "trustloop_signal_transitions_total",
        "Signal status transitions by target status",
        &["status"]
    )
    .unwrap()
});

/// Orders submitted.
pub static ORDERS_SUBMITTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "trustloop_orders_submitted_total",
        "Entry orders submitted",
        &["instrument", "side"]
    )
    .unwrap()
});

/// Fill states observed after polling.
pub static FILL_STATES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "trustloop_fill_states_total",
        "Fill states recorded on trades",
        &["state"]
    )
    .unwrap()
});

/// Protection requests installed by the position guard.
/// Labels: kind (initial/breakeven/adopted)
pub static GUARD_PROTECTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "trustloop_guard_protections_total",
        "Position guard protection actions",
        &["kind"]
    )
    .unwrap()
});

/// Outcomes labeled by the replayer.
pub static OUTCOMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "trustloop_outcomes_total",
        "Trade outcomes labeled",
        &["exit_reason"]
    )
    .unwrap()
});

/// Current trust weight per group and window.
pub static TRUST_WEIGHT: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "trustloop_trust_weight",
        "Trust weight per strategy group and window",
        &["group", "window"]
    )
    .unwrap()
});

/// Consecutive transient execution failures.
pub static CONSECUTIVE_FAILURES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "trustloop_consecutive_failures",
        "Consecutive transient failures in the execution loop"
    )
    .unwrap()
});

/// Groups on the current allow-list.
pub static ALLOWED_GROUPS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "trustloop_allowed_groups",
        "Strategy groups currently allowed to trade live"
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    pub fn pass_items(loop_name: &str, result: &str, count: u32) {
        if count > 0 {
            PASS_ITEMS_TOTAL
                .with_label_values(&[loop_name, result])
                .inc_by(f64::from(count));
        }
    }

    pub fn pass_duration(loop_name: &str, seconds: f64) {
        PASS_DURATION_SECONDS
            .with_label_values(&[loop_name])
            .observe(seconds);
    }

    pub fn signal_transition(status: &str) {
        SIGNAL_TRANSITIONS_TOTAL.with_label_values(&[status]).inc();
    }

    pub fn order_submitted(instrument: &str, side: &str) {
        ORDERS_SUBMITTED_TOTAL
            .with_label_values(&[instrument, side])
            .inc();
    }

    pub fn fill_state(state: &str) {
        FILL_STATES_TOTAL.with_label_values(&[state]).inc();
    }

    pub fn guard_protection(kind: &str) {
        GUARD_PROTECTIONS_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn outcome_labeled(exit_reason: &str) {
        OUTCOMES_TOTAL.with_label_values(&[exit_reason]).inc();
    }

    pub fn trust_weight(group: &str, window: &str, weight: Decimal) {
        TRUST_WEIGHT
            .with_label_values(&[group, window])
            .set(weight.to_f64().unwrap_or(0.0));
    }

    pub fn consecutive_failures(count: u32) {
        CONSECUTIVE_FAILURES.set(i64::from(count));
    }

    pub fn allowed_groups(count: usize) {
        ALLOWED_GROUPS.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Render the default registry in Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}
