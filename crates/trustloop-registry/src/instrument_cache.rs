//! Instrument metadata cache.
//!
//! Lookups hit the exchange at most once per TTL per instrument. When a
//! refresh fails and a previous entry exists, the stale entry is served
//! so sizing degrades instead of halting.

use dashmap::DashMap;
use tracing::{debug, warn};
use trustloop_core::{DynExchange, InstrumentId, InstrumentSpec};

use crate::error::RegistryResult;

/// Default metadata TTL: one hour.
pub const DEFAULT_TTL_MS: u64 = 3_600_000;

/// Cache entry with change tracking.
#[derive(Debug, Clone)]
pub struct InstrumentCacheEntry {
    pub spec: InstrumentSpec,
    pub fetched_at_ms: u64,
    pub version: u64,
}

/// Instrument metadata cache.
pub struct InstrumentCache {
    entries: DashMap<InstrumentId, InstrumentCacheEntry>,
    exchange: DynExchange,
    ttl_ms: u64,
}

impl InstrumentCache {
    #[must_use]
    pub fn new(exchange: DynExchange, ttl_ms: u64) -> Self {
        Self {
            entries: DashMap::new(),
            exchange,
            ttl_ms,
        }
    }

    /// Cached spec without touching the exchange.
    pub fn get(&self, instrument: &InstrumentId) -> Option<InstrumentSpec> {
        self.entries.get(instrument).map(|entry| entry.spec.clone())
    }

    /// Cached spec if fresh, otherwise fetched from the exchange.
    pub async fn get_or_fetch(
        &self,
        instrument: &InstrumentId,
        now_ms: u64,
    ) -> RegistryResult<InstrumentSpec> {
        let cached = self.entries.get(instrument).map(|e| e.value().clone());
        if let Some(entry) = &cached {
            if now_ms.saturating_sub(entry.fetched_at_ms) < self.ttl_ms {
                return Ok(entry.spec.clone());
            }
        }

        match self.exchange.instrument_spec(instrument.clone()).await {
            Ok(spec) => {
                spec.validate()?;
                self.update(instrument.clone(), spec.clone(), now_ms);
                Ok(spec)
            }
            Err(e) => match cached {
                Some(entry) if e.is_transient() => {
                    warn!(
                        instrument = %instrument,
                        error = %e,
                        age_ms = now_ms.saturating_sub(entry.fetched_at_ms),
                        "Metadata refresh failed, serving stale entry"
                    );
                    Ok(entry.spec)
                }
                _ => Err(e.into()),
            },
        }
    }

    /// Insert or replace a spec, bumping the version.
    pub fn update(&self, instrument: InstrumentId, spec: InstrumentSpec, now_ms: u64) {
        let version = match self.entries.get(&instrument) {
            Some(existing) => {
                if existing.spec.has_material_change(&spec) {
                    warn!(
                        instrument = %instrument,
                        lot_step = %format!("{}->{}", existing.spec.lot_step, spec.lot_step),
                        tick_size = %format!("{}->{}", existing.spec.tick_size, spec.tick_size),
                        "Instrument metadata changed"
                    );
                }
                existing.version + 1
            }
            None => 1,
        };
        debug!(instrument = %instrument, version, "Instrument metadata cached");
        self.entries.insert(
            instrument,
            InstrumentCacheEntry {
                spec,
                fetched_at_ms: now_ms,
                version,
            },
        );
    }

    pub fn version(&self, instrument: &InstrumentId) -> Option<u64> {
        self.entries.get(instrument).map(|e| e.version)
    }

    /// Drop one entry so the next lookup refetches.
    pub fn invalidate(&self, instrument: &InstrumentId) -> Option<InstrumentSpec> {
        self.entries.remove(instrument).map(|(_, entry)| entry.spec)
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use trustloop_core::{PaperExchange, Price, Size};

    fn instrument() -> InstrumentId {
        InstrumentId::from("BTC-USDT-SWAP")
    }

    fn setup() -> (Arc<PaperExchange>, InstrumentCache) {
        let exchange = Arc::new(PaperExchange::new());
        exchange.set_spec(
            instrument(),
            InstrumentSpec {
                contract_value: dec!(0.01),
                ..Default::default()
            },
        );
        let cache = InstrumentCache::new(exchange.clone(), 1_000);
        (exchange, cache)
    }

    #[tokio::test]
    async fn test_fetch_then_serve_from_cache() {
        let (exchange, cache) = setup();
        assert!(cache.get(&instrument()).is_none());

        let spec = cache.get_or_fetch(&instrument(), 0).await.unwrap();
        assert_eq!(spec.contract_value, dec!(0.01));

        // Exchange changes but the entry is still fresh.
        exchange.set_spec(
            instrument(),
            InstrumentSpec {
                lot_step: Size::new(dec!(0.1)),
                ..Default::default()
            },
        );
        let spec = cache.get_or_fetch(&instrument(), 500).await.unwrap();
        assert_eq!(spec.contract_value, dec!(0.01));
        assert_eq!(cache.version(&instrument()), Some(1));
    }

    #[tokio::test]
    async fn test_ttl_expiry_refetches_and_bumps_version() {
        let (exchange, cache) = setup();
        cache.get_or_fetch(&instrument(), 0).await.unwrap();

        exchange.set_spec(
            instrument(),
            InstrumentSpec {
                tick_size: Price::new(dec!(0.1)),
                ..Default::default()
            },
        );
        let spec = cache.get_or_fetch(&instrument(), 1_000).await.unwrap();
        assert_eq!(spec.tick_size, Price::new(dec!(0.1)));
        assert_eq!(cache.version(&instrument()), Some(2));
    }

    #[tokio::test]
    async fn test_stale_entry_served_when_exchange_down() {
        let (exchange, cache) = setup();
        cache.get_or_fetch(&instrument(), 0).await.unwrap();

        exchange.set_unavailable(true);
        let spec = cache.get_or_fetch(&instrument(), 5_000).await.unwrap();
        assert_eq!(spec.contract_value, dec!(0.01));
    }

    #[tokio::test]
    async fn test_unknown_instrument_is_error() {
        let (_exchange, cache) = setup();
        let result = cache
            .get_or_fetch(&InstrumentId::from("DOGE-USDT-SWAP"), 0)
            .await;
        assert!(result.is_err());
        assert!(!result.unwrap_err().is_transient());
    }

    #[test]
    fn test_invalidate() {
        let (_exchange, cache) = setup();
        tokio_test::assert_ok!(tokio_test::block_on(cache.get_or_fetch(&instrument(), 0)));
        assert_eq!(cache.len(), 1);

        assert!(cache.invalidate(&instrument()).is_some());
        assert!(cache.is_empty());

        tokio_test::assert_ok!(tokio_test::block_on(cache.get_or_fetch(&instrument(), 10)));
        cache.invalidate_all();
        assert!(cache.get(&instrument()).is_none());
    }
}
