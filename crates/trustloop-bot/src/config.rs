//! Application configuration.
//!
//! Loaded from a TOML file, then overridden by `TRUSTLOOP__*` environment
//! variables (e.g. `TRUSTLOOP__BUDGET__MAX_BUDGET=150`). Every section is
//! optional and falls back to its defaults.

use crate::error::{AppError, AppResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;
use trustloop_core::{InstrumentId, InstrumentSpec, NewSignal, Price, StrategyGroup};
use trustloop_executor::{AdmissionConfig, BudgetConfig, ExecutorConfig, PromoterConfig};
use trustloop_feedback::{ReplayConfig, TrustConfig};
use trustloop_position::GuardConfig;
use trustloop_risk::RiskGateConfig;

/// Environment override prefix.
pub const ENV_PREFIX: &str = "TRUSTLOOP";

/// Instrument metadata cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Metadata lifetime (ms).
    /// Default: 300,000 (5 minutes).
    #[serde(default = "default_instrument_ttl_ms")]
    pub instrument_ttl_ms: u64,
}

fn default_instrument_ttl_ms() -> u64 {
    300_000
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            instrument_ttl_ms: default_instrument_ttl_ms(),
        }
    }
}

/// Database location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite file, created with its parent directory if missing.
    /// `:memory:` keeps everything in process.
    /// Default: `data/trustloop.db`.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

/// Path value selecting a private in-memory database.
pub const IN_MEMORY_PATH: &str = ":memory:";

fn default_store_path() -> PathBuf {
    PathBuf::from("data/trustloop.db")
}

impl StoreConfig {
    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == IN_MEMORY_PATH
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Prometheus text exposition written here on shutdown, if set.
    #[serde(default)]
    pub metrics_path: Option<PathBuf>,
}

/// One instrument seeded into the paper exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperInstrument {
    pub id: InstrumentId,
    pub price: Price,
    #[serde(default)]
    pub spec: InstrumentSpec,
}

/// Paper exchange and parameter pool seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperConfig {
    /// Default: 1000.
    #[serde(default = "default_paper_balance")]
    pub balance: Decimal,

    #[serde(default)]
    pub instruments: Vec<PaperInstrument>,

    /// Strategy groups loaded into the parameter pool.
    #[serde(default)]
    pub groups: Vec<StrategyGroup>,

    /// Signals inserted at startup. A zero timestamp means "now".
    #[serde(default)]
    pub signals: Vec<NewSignal>,
}

fn default_paper_balance() -> Decimal {
    Decimal::from(1000)
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            balance: default_paper_balance(),
            instruments: Vec::new(),
            groups: Vec::new(),
            signals: Vec::new(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub promoter: PromoterConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub risk: RiskGateConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub trust: TrustConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub paper: PaperConfig,
}

impl AppConfig {
    /// Load from `path` with environment overrides, then validate.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AppError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        let config: Self = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML directly, without environment overrides.
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        let budget = &self.budget;
        if budget.min_budget <= Decimal::ZERO || budget.min_budget > budget.max_budget {
            return Err(AppError::Config(format!(
                "budget bounds must satisfy 0 < min_budget <= max_budget, got [{}, {}]",
                budget.min_budget, budget.max_budget
            )));
        }
        if budget.risk_fraction <= Decimal::ZERO || budget.risk_fraction > Decimal::ONE {
            return Err(AppError::Config(format!(
                "budget.risk_fraction must be in (0, 1], got {}",
                budget.risk_fraction
            )));
        }
        if self.admission.window_days == 0 {
            return Err(AppError::Config(
                "admission.window_days must be positive".to_string(),
            ));
        }

        let intervals = [
            ("promoter.interval_ms", self.promoter.interval_ms),
            ("admission.refresh_interval_ms", self.admission.refresh_interval_ms),
            ("executor.interval_ms", self.executor.interval_ms),
            ("guard.interval_ms", self.guard.interval_ms),
            ("replay.interval_ms", self.replay.interval_ms),
            ("trust.interval_ms", self.trust.interval_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(AppError::Config(format!("{name} must be positive")));
            }
        }

        self.risk.validate()?;
        self.guard.validate()?;
        self.replay.barrier.validate()?;
        self.trust.validate()?;

        for instrument in &self.paper.instruments {
            instrument.spec.validate().map_err(|e| {
                AppError::Config(format!("paper instrument {}: {e}", instrument.id))
            })?;
        }

        if !self.trust.windows.contains(&self.admission.window()) {
            warn!(
                window = %self.admission.window(),
                "Admission window is not computed by the trust updater; demotion is inactive"
            );
        }
        Ok(())
    }
}
