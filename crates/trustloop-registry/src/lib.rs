//! Instrument metadata management for trustloop.
//!
//! Caches exchange contract metadata (contract value, lot step, minimum
//! size, tick size) behind an explicit handle with TTL and invalidation.

pub mod error;
pub mod instrument_cache;

pub use error::{RegistryError, RegistryResult};
pub use instrument_cache::{InstrumentCache, InstrumentCacheEntry};
