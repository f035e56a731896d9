//! trustloop trading core - entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Adaptive derivatives trading core (paper mode).
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via TRUSTLOOP_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    trustloop_telemetry::init_logging()?;

    info!("Starting trustloop v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > TRUSTLOOP_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("TRUSTLOOP_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = trustloop_bot::AppConfig::from_file(&config_path)?;
    info!(
        groups = config.paper.groups.len(),
        instruments = config.paper.instruments.len(),
        "Configuration loaded"
    );

    let app = trustloop_bot::Application::new(config)?;
    app.run().await?;

    Ok(())
}
