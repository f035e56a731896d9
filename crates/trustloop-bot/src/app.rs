//! Main application orchestration.
//!
//! Builds the shared collaborators (store, exchange, parameter pool,
//! instrument cache, guard book), wires the six pipeline stages and runs
//! each as an independent task until Ctrl-C.

use crate::config::AppConfig;
use crate::error::AppResult;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use trustloop_core::{now_ms, DynExchange, DynParameterPool, PaperExchange};
use trustloop_executor::{AdmissionGate, ExecutionOrchestrator, SignalPromoter};
use trustloop_feedback::{OutcomeReplayer, TrustWeightUpdater};
use trustloop_position::{GuardBook, PositionGuard};
use trustloop_registry::InstrumentCache;
use trustloop_risk::RiskGate;
use trustloop_store::{DynStore, MemoryParameterPool, SignalStore, SqliteStore};
use trustloop_telemetry::Metrics;

/// Every pipeline stage, ready to run.
pub struct Pipeline {
    pub promoter: SignalPromoter,
    pub admission: Arc<AdmissionGate>,
    pub orchestrator: ExecutionOrchestrator,
    pub guard: PositionGuard,
    pub replayer: OutcomeReplayer,
    pub trust: TrustWeightUpdater,
}

/// Main application.
pub struct Application {
    config: AppConfig,
    store: Arc<SqliteStore>,
    exchange: Arc<PaperExchange>,
    pool: Arc<MemoryParameterPool>,
    instruments: Arc<InstrumentCache>,
    guard_book: Arc<GuardBook>,
}

impl Application {
    /// Open the store and create the application with a paper exchange
    /// seeded from config. Configured signals are only seeded into an
    /// empty database so restarts do not duplicate them.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let now = now_ms();
        let store = Arc::new(if config.store.is_in_memory() {
            SqliteStore::in_memory()?
        } else {
            SqliteStore::open(&config.store.path)?
        });
        let seed_signals = store.signal_count()? == 0;
        let exchange = Arc::new(PaperExchange::new());
        let pool = Arc::new(MemoryParameterPool::new(config.paper.groups.iter().cloned()));

        exchange.set_balance(config.paper.balance);
        for instrument in &config.paper.instruments {
            exchange.set_spec(instrument.id.clone(), instrument.spec.clone());
            exchange.set_quote(instrument.id.clone(), instrument.price, now);
        }
        let seeded = if seed_signals { config.paper.signals.as_slice() } else { &[] };
        for signal in seeded {
            let mut signal = signal.clone();
            if signal.timestamp_ms == 0 {
                signal.timestamp_ms = now;
            }
            let id = store.insert_signal(signal, now)?;
            info!(signal_id = %id, "Seeded signal");
        }

        let exchange_dyn: DynExchange = exchange.clone();
        let instruments = Arc::new(InstrumentCache::new(
            exchange_dyn,
            config.registry.instrument_ttl_ms,
        ));

        info!(
            balance = %config.paper.balance,
            instruments = config.paper.instruments.len(),
            groups = config.paper.groups.len(),
            signals = seeded.len(),
            "Paper exchange seeded"
        );

        Ok(Self {
            config,
            store,
            exchange,
            pool,
            instruments,
            guard_book: Arc::new(GuardBook::new()),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    pub fn exchange(&self) -> &Arc<PaperExchange> {
        &self.exchange
    }

    pub fn pool(&self) -> &Arc<MemoryParameterPool> {
        &self.pool
    }

    /// Build every stage over the shared collaborators.
    pub fn pipeline(&self) -> Pipeline {
        let store: DynStore = self.store.clone();
        let exchange: DynExchange = self.exchange.clone();
        let pool: DynParameterPool = self.pool.clone();

        let admission = Arc::new(AdmissionGate::new(
            pool.clone(),
            store.clone(),
            self.config.admission.clone(),
        ));
        let promoter = SignalPromoter::new(
            store.clone(),
            admission.clone(),
            self.config.promoter.clone(),
        );
        let orchestrator = ExecutionOrchestrator::new(
            store.clone(),
            exchange.clone(),
            admission.clone(),
            self.instruments.clone(),
            RiskGate::new(self.config.risk.clone()),
            self.config.budget.clone(),
            self.config.executor.clone(),
        );
        let guard = PositionGuard::new(
            exchange.clone(),
            self.instruments.clone(),
            self.guard_book.clone(),
            self.config.guard.clone(),
        );
        let replayer = OutcomeReplayer::new(store.clone(), exchange, self.config.replay.clone());
        let trust = TrustWeightUpdater::new(store, pool, self.config.trust.clone());

        Pipeline {
            promoter,
            admission,
            orchestrator,
            guard,
            replayer,
            trust,
        }
    }

    /// Load the initial allow-list and spawn every loop.
    ///
    /// The orchestrator recovers signals left in flight before its first pass.
    pub fn spawn(&self, pipeline: Pipeline, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        let now = now_ms();

        match pipeline.admission.refresh(now) {
            Ok(snapshot) => info!(allowed = snapshot.len(), "Initial allow-list loaded"),
            Err(e) => warn!(error = %e, "Initial allow-list refresh failed"),
        }

        vec![
            tokio::spawn(pipeline.promoter.run(shutdown.clone())),
            tokio::spawn(pipeline.admission.run(shutdown.clone())),
            tokio::spawn(pipeline.orchestrator.run(shutdown.clone())),
            tokio::spawn(pipeline.guard.run(shutdown.clone())),
            tokio::spawn(pipeline.replayer.run(shutdown.clone())),
            tokio::spawn(pipeline.trust.run(shutdown.clone())),
        ]
    }

    /// Run until Ctrl-C, then stop every loop and wait for them.
    pub async fn run(self) -> AppResult<()> {
        let shutdown = CancellationToken::new();
        let handles = self.spawn(self.pipeline(), &shutdown);
        info!(loops = handles.len(), "All loops started");

        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");
        shutdown.cancel();

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Loop task panicked");
            }
        }

        self.write_metrics()?;
        info!(
            signals = self.store.signal_count()?,
            outcomes = self.store.outcome_count()?,
            "Shutdown complete"
        );
        Ok(())
    }

    fn write_metrics(&self) -> AppResult<()> {
        let Some(path) = &self.config.telemetry.metrics_path else {
            return Ok(());
        };
        let rendered = Metrics::render()?;
        std::fs::write(path, rendered)?;
        info!(path = %path.display(), "Metrics written");
        Ok(())
    }
}
