//! # librisd
//!
//! Runs the loan engine against the configured SQLite database until Ctrl-C.
//!
//! ## Usage
//! ```text
//! librisd                       # platform config dir, then LIBRIS_* env
//! librisd --config libris.toml  # explicit file
//! RUST_LOG=libris=trace librisd
//! ```

use std::path::PathBuf;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use libris_engine::{Engine, EngineConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = parse_config_arg()?;
    let config = EngineConfig::load(config_path)?;
    info!(
        database = %config.database_path()?.display(),
        sweep_interval_secs = config.workers.sweep_interval_secs,
        "Configuration loaded"
    );

    let engine = Engine::sqlite(config).await?;

    if !engine.health_check().await {
        error!("Database health check failed");
        engine.shutdown().await?;
        return Err("database health check failed".into());
    }

    info!("librisd running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    engine.shutdown().await?;
    Ok(())
}

/// Initializes the tracing subscriber for structured logging.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=libris=trace` - Show trace for libris crates only
/// - Default: INFO, DEBUG for libris crates
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,libris=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// `--config <path>` or `--config=<path>`.
fn parse_config_arg() -> Result<Option<PathBuf>, String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args
                .next()
                .map(|p| Some(PathBuf::from(p)))
                .ok_or_else(|| "--config needs a path".to_string());
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Ok(Some(PathBuf::from(path)));
        }
        return Err(format!("unknown argument: {}", arg));
    }
    Ok(None)
}
