//! Signal promotion, admission and order execution.
//!
//! Provides:
//! - `quantity_for_budget` / `Quantizer`: floor-only budget sizing
//! - `AdmissionGate`: periodic allow-list with trust-weighted shares
//! - `SignalPromoter`: NEW -> WAIT_REHEARSAL -> WAIT_LIVE
//! - `ExecutionOrchestrator`: claim, gate, size, submit and record
//! - `FailureBackoff`, `FillPoller`: retry and fill bookkeeping

pub mod admission;
pub mod backoff;
pub mod error;
pub mod fill;
pub mod orchestrator;
pub mod promoter;
pub mod quantizer;

pub use admission::{AdmissionConfig, AdmissionGate, AdmissionSnapshot, AllowedGroup, BudgetConfig};
pub use backoff::FailureBackoff;
pub use error::{ExecutorError, ExecutorResult};
pub use fill::FillPoller;
pub use orchestrator::{require_group, sanitize_protection, ExecutionOrchestrator, ExecutorConfig};
pub use promoter::{PromoterConfig, SignalPromoter};
pub use quantizer::{quantity_for_budget, Quantization, Quantizer};
