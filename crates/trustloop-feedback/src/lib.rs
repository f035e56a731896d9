//! Outcome feedback for trustloop.
//!
//! Closes the loop from execution back to admission:
//! - `label`: triple-barrier labeling of a candle path
//! - `OutcomeReplayer`: one counterfactual outcome per executed trade
//! - `TrustWeightUpdater`: bounded per-group weights over lookback windows

pub mod barrier;
pub mod error;
pub mod replayer;
pub mod weights;

pub use barrier::{label, BarrierConfig, BarrierLabel, LabelResult, TieBreak};
pub use error::{FeedbackError, FeedbackResult};
pub use replayer::{build_outcome, OutcomeReplayer, ReplayConfig};
pub use weights::{trust_weight, GroupPerformance, TrustConfig, TrustStatistic, TrustWeightUpdater};
