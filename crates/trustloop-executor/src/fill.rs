//! Bounded fill polling.

use std::time::Duration;
use tracing::{debug, warn};
use trustloop_core::{Exchange, FillState, InstrumentId, OrderId, OrderState};

/// Polls order state at a fixed interval until terminal or timed out.
#[derive(Debug, Clone, Copy)]
pub struct FillPoller {
    timeout: Duration,
    interval: Duration,
}

impl FillPoller {
    #[must_use]
    pub fn new(timeout_ms: u64, interval_ms: u64) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms),
            interval: Duration::from_millis(interval_ms.max(1)),
        }
    }

    /// Wait for a terminal state.
    ///
    /// A timeout yields the last observed state, with a still-live order
    /// reported as `Unknown` so that downstream stages treat the position
    /// as possibly held.
    pub async fn await_fill(
        &self,
        exchange: &dyn Exchange,
        instrument: &InstrumentId,
        order_id: &OrderId,
    ) -> FillState {
        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut last = OrderState::Live;

        loop {
            match exchange
                .order_state(instrument.clone(), order_id.clone())
                .await
            {
                Ok(state) if state.is_terminal() => {
                    debug!(order_id = %order_id, ?state, "Order reached terminal state");
                    return FillState::from(state);
                }
                Ok(state) => last = state,
                Err(e) if e.is_transient() => {
                    debug!(order_id = %order_id, error = %e, "Fill poll failed, retrying");
                }
                Err(e) => {
                    warn!(order_id = %order_id, error = %e, "Fill poll failed permanently");
                    return FillState::Unknown;
                }
            }

            if tokio::time::Instant::now() + self.interval > deadline {
                let state = FillState::from(last);
                warn!(
                    order_id = %order_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    %state,
                    "Fill poll timed out"
                );
                return state;
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
