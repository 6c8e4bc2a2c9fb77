//! Engine binary for the Ripen stage-progression engine.
//!
//! Loads the configuration, builds the registry, seeds the demo world and
//! drives it with the wake queue until nothing is left to age or the tick
//! limit is reached. The final instance snapshot is printed as JSON.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `RIPEN_CONFIG` (default `ripen-config.yaml`)
//! 2. Initialize structured logging (tracing)
//! 3. Build the registry and seed the world
//! 4. Run the driver loop
//! 5. Print the final snapshot and tear down

mod driver;
mod error;
mod sink;

use std::path::PathBuf;

use ripen_core::RipenConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::driver::Driver;
use crate::error::EngineError;
use crate::sink::LoggingSink;

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if configuration, seeding, or the run itself fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration (before logging so its level can be used).
    let (config, path, found) = load_config()?;

    // 2. Initialize structured logging. RUST_LOG wins over the config.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    info!("ripen-engine starting");
    if found {
        info!(path = %path.display(), "Configuration loaded");
    } else {
        info!(path = %path.display(), "Config file not found, using defaults");
    }
    info!(
        sources = config.sources.len(),
        catalogue = config.catalogue.len(),
        forgetting_window = config.engine.forgetting_window,
        time_step = config.driver.time_step,
        max_ticks = config.driver.max_ticks,
        "Engine settings"
    );

    // 3. Build the registry and seed the world.
    let mut driver = Driver::from_config(&config)?;
    info!(
        healthy = driver
            .registry()
            .sources()
            .filter(|source| driver.registry().is_healthy(*source))
            .count(),
        pending = driver.pending(),
        "Registry ready"
    );

    // 4. Run the driver loop.
    let mut sink = LoggingSink::new();
    let summary = driver.run(&mut sink).await?;
    let tally = sink.tally();
    info!(
        advanced = tally.advanced,
        regressed = tally.regressed,
        decayed = tally.decayed,
        transformed = tally.transformed,
        total = tally.total(),
        final_time = summary.final_time,
        "Simulation ended"
    );

    // 5. Print the final snapshot and tear down.
    let snapshot = serde_json::to_string_pretty(&driver.snapshot()).map_err(EngineError::from)?;
    println!("{snapshot}");
    let removed = driver.teardown();
    info!(removed, "Registry torn down");

    Ok(())
}

/// Load configuration from `RIPEN_CONFIG` or `ripen-config.yaml`.
///
/// A missing file yields the default configuration. Returns the config,
/// the path that was tried, and whether the file existed.
fn load_config() -> Result<(RipenConfig, PathBuf, bool), EngineError> {
    let path = std::env::var("RIPEN_CONFIG")
        .map_or_else(|_| PathBuf::from("ripen-config.yaml"), PathBuf::from);
    if path.exists() {
        let config = RipenConfig::from_file(&path)?;
        Ok((config, path, true))
    } else {
        let mut config = RipenConfig::default();
        config.logging.apply_env_overrides();
        Ok((config, path, false))
    }
}
