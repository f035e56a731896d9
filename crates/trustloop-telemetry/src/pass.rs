//! Per-pass reporting shared by every periodic loop.

use std::time::Duration;
use tracing::{debug, info};
use trustloop_core::PassReport;

use crate::metrics::Metrics;

/// Log and count one loop pass.
///
/// Empty passes are logged at debug so idle loops stay quiet.
pub fn record_pass(loop_name: &str, report: &PassReport, elapsed: Duration) {
    Metrics::pass_items(loop_name, "processed", report.processed);
    Metrics::pass_items(loop_name, "skipped", report.skipped);
    Metrics::pass_items(loop_name, "errored", report.errored);
    Metrics::pass_duration(loop_name, elapsed.as_secs_f64());

    if report.is_empty() {
        debug!(loop_name, elapsed_ms = elapsed.as_millis() as u64, "Pass idle");
    } else {
        info!(
            loop_name,
            processed = report.processed,
            skipped = report.skipped,
            errored = report.errored,
            elapsed_ms = elapsed.as_millis() as u64,
            "Pass complete"
        );
    }
}
