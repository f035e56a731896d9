//! Per-pass report emitted by every periodic loop.

use serde::{Deserialize, Serialize};

/// Counts of items handled in one loop pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    pub processed: u32,
    pub skipped: u32,
    pub errored: u32,
}

impl PassReport {
    pub fn record_processed(&mut self) {
        self.processed += 1;
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    pub fn record_errored(&mut self) {
        self.errored += 1;
    }

    pub fn total(&self) -> u32 {
        self.processed + self.skipped + self.errored
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}
