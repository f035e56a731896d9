//! Position guard for trustloop.
//!
//! Keeps every open position protected:
//! - default stop-loss and take-profit on first sight
//! - one breakeven stop raise once the position is far enough in profit
//! - a trailing stop for positions already in profit when first protected
//!
//! # Key Components
//!
//! - [`GuardConfig`]: protection percentages and pass interval
//! - [`GuardBook`]: per (instrument, side) protection state
//! - [`PositionGuard`]: periodic pass over open positions

pub mod error;
pub mod guard;
pub mod protection;

pub use error::{GuardError, GuardResult};
pub use guard::{GuardBook, GuardState, PositionGuard};
pub use protection::{breakeven_stop, initial_plan, tightens, GuardConfig, ProtectionPlan};
