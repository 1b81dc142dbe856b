//! Model trainer - fits the bundle on recorded frames and saves a snapshot
//!
//! Usage: `hydro-train <frames.jsonl> <snapshot-dir> [config.json]`
//!
//! Each input line is one broker payload. An existing snapshot is reused
//! while its retrain interval has not elapsed.

use anyhow::{bail, Context};
use chrono::Utc;
use model_store::PersistenceManager;
use pipeline::{init_logging, MaintenancePipeline};
use std::fs;
use std::path::{Path, PathBuf};
use telemetry::{PipelineConfig, SensorFrame};
use tracing::info;

fn read_frames(path: &Path) -> anyhow::Result<Vec<SensorFrame>> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            SensorFrame::from_payload(line.as_bytes())
                .with_context(|| format!("{} line {}", path.display(), n + 1))
        })
        .collect()
}

fn main() -> anyhow::Result<()> {
    init_logging()?;
    info!("=== Hydro Station Trainer v{} ===", env!("CARGO_PKG_VERSION"));

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        bail!("usage: {} <frames.jsonl> <snapshot-dir> [config.json]", args[0]);
    }
    let frames = read_frames(Path::new(&args[1]))?;
    let store = PersistenceManager::new(PathBuf::from(&args[2]));
    let config_path = args.get(3).map(PathBuf::from);
    let config = PipelineConfig::load(config_path.as_deref()).context("loading configuration")?;

    let mut pipeline = if store.exists() {
        MaintenancePipeline::load(&store)?
    } else {
        MaintenancePipeline::new(config.clone())
    };
    if pipeline.config() != &config {
        info!("Configuration changed since the last snapshot; starting fresh");
        pipeline = MaintenancePipeline::new(config);
    }

    if pipeline.needs_retrain(Utc::now()) {
        let metrics = pipeline.train(&frames)?;
        println!("Sequence model:\n{}", metrics.sequence_model.report);
        println!("Confusion matrix: {:?}", metrics.sequence_model.confusion_matrix.0);
        println!("Tree model:\n{}", metrics.tree_model.report);
        println!("Confusion matrix: {:?}", metrics.tree_model.confusion_matrix.0);
        pipeline.save(&store)?;
    } else {
        info!(
            "Snapshot from {:?} is current; skipping training",
            pipeline.last_training_time()
        );
    }

    let report = pipeline.predict(&frames)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
