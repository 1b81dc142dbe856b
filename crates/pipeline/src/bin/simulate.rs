//! Telemetry simulator - publishes synthetic frames until Ctrl-C
//!
//! Usage: `hydro-simulate [config.json]`

use anyhow::Context;
use pipeline::init_logging;
use sensor_sim::{MqttPublisher, Simulation, SimulationConfig, SyntheticSensorGenerator};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;
    info!("=== Hydro Station Simulator v{} ===", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = SimulationConfig::load(config_path.as_deref())
        .context("loading simulator configuration")?;

    let mut publisher = MqttPublisher::connect(&config)
        .await
        .context("connecting to broker")?;

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            return;
        }
        info!("Stop requested");
        let _ = stop_tx.send(true);
    });

    let mut simulation = Simulation::new(SyntheticSensorGenerator::hydro(config.seed), &config);
    let stats = simulation.run(&mut publisher, stop_rx).await;
    info!(
        "Published {} frames ({} anomalous, {} failed)",
        stats.published, stats.anomalies, stats.failed
    );
    Ok(())
}
