//! Capped exponential backoff on consecutive transient failures.
//!
//! The counter is global to the execution loop: any transient failure
//! bumps it and any successful submission resets it.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::{info, warn};
use trustloop_telemetry::Metrics;

/// Default base delay: 1 second.
pub const DEFAULT_BASE_MS: u64 = 1_000;

/// Default delay cap: 60 seconds.
pub const DEFAULT_CAP_MS: u64 = 60_000;

/// Exponent ceiling so the shift cannot overflow.
const MAX_EXPONENT: u32 = 6;

#[derive(Debug)]
pub struct FailureBackoff {
    consecutive: AtomicU32,
    last_failure_ms: AtomicU64,
    base_ms: u64,
    cap_ms: u64,
}

impl Default for FailureBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_MS, DEFAULT_CAP_MS)
    }
}

impl FailureBackoff {
    #[must_use]
    pub fn new(base_ms: u64, cap_ms: u64) -> Self {
        Self {
            consecutive: AtomicU32::new(0),
            last_failure_ms: AtomicU64::new(0),
            base_ms,
            cap_ms,
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive.load(Ordering::SeqCst)
    }

    /// Current delay: `min(cap, base * 2^(n-1))`, zero without failures.
    pub fn delay_ms(&self) -> u64 {
        match self.consecutive() {
            0 => 0,
            n => {
                let exponent = (n - 1).min(MAX_EXPONENT);
                self.base_ms.saturating_mul(1u64 << exponent).min(self.cap_ms)
            }
        }
    }

    /// Record a transient failure and return the new delay.
    pub fn record_failure(&self, now_ms: u64) -> u64 {
        let n = self.consecutive.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        self.last_failure_ms.store(now_ms, Ordering::SeqCst);
        Metrics::consecutive_failures(n);
        let delay_ms = self.delay_ms();
        warn!(consecutive = n, delay_ms, "Transient failure, backing off");
        delay_ms
    }

    pub fn record_success(&self) {
        let previous = self.consecutive.swap(0, Ordering::SeqCst);
        if previous > 0 {
            Metrics::consecutive_failures(0);
            info!(previous, "Failure streak cleared");
        }
    }

    /// Milliseconds left before the next pass may run.
    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        let delay_ms = self.delay_ms();
        if delay_ms == 0 {
            return 0;
        }
        let resume_at = self.last_failure_ms.load(Ordering::SeqCst).saturating_add(delay_ms);
        resume_at.saturating_sub(now_ms)
    }

    pub fn in_cooldown(&self, now_ms: u64) -> bool {
        self.remaining_ms(now_ms) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_and_caps() {
        let backoff = FailureBackoff::new(1_000, 10_000);
        assert_eq!(backoff.delay_ms(), 0);
        assert_eq!(backoff.record_failure(0), 1_000);
        assert_eq!(backoff.record_failure(0), 2_000);
        assert_eq!(backoff.record_failure(0), 4_000);
        assert_eq!(backoff.record_failure(0), 8_000);
        assert_eq!(backoff.record_failure(0), 10_000);
        for _ in 0..20 {
            backoff.record_failure(0);
        }
        assert_eq!(backoff.delay_ms(), 10_000);
    }

    #[test]
    fn test_success_resets() {
        let backoff = FailureBackoff::default();
        backoff.record_failure(0);
        backoff.record_failure(0);
        assert_eq!(backoff.consecutive(), 2);
        backoff.record_success();
        assert_eq!(backoff.consecutive(), 0);
        assert!(!backoff.in_cooldown(0));
    }

    #[test]
    fn test_cooldown_window() {
        let backoff = FailureBackoff::new(1_000, 60_000);
        backoff.record_failure(10_000);
        assert!(backoff.in_cooldown(10_500));
        assert_eq!(backoff.remaining_ms(10_500), 500);
        assert!(!backoff.in_cooldown(11_000));
    }
}
