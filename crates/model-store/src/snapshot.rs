//! Snapshot directory save/load

use crate::envelope::Envelope;
use crate::StoreError;
use chrono::{DateTime, Utc};
use feature_engine::{Scaler, ScalerState};
use inference_engine::{
    EnsembleModel, IsolationForest, ModelBundle, RandomForest, TemporalClassifier,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use telemetry::PipelineConfig;
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

/// The five files of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    SequenceModel,
    TreeModel,
    AnomalyModel,
    Scaler,
    Config,
}

impl Artifact {
    pub const ALL: [Artifact; 5] = [
        Artifact::SequenceModel,
        Artifact::TreeModel,
        Artifact::AnomalyModel,
        Artifact::Scaler,
        Artifact::Config,
    ];

    /// File name inside the snapshot directory
    pub fn file_name(&self) -> &'static str {
        match self {
            Artifact::SequenceModel => "sequence_model.json",
            Artifact::TreeModel => "random_forest.json",
            Artifact::AnomalyModel => "isolation_forest.json",
            Artifact::Scaler => "scaler.json",
            Artifact::Config => "config.json",
        }
    }

    /// Format tag written into the envelope
    pub fn format(&self) -> &'static str {
        match self {
            Artifact::SequenceModel => "hydro.temporal-classifier",
            Artifact::TreeModel => "hydro.random-forest",
            Artifact::AnomalyModel => "hydro.isolation-forest",
            Artifact::Scaler => "hydro.scaler",
            Artifact::Config => "hydro.pipeline-config",
        }
    }
}

/// Writes and reads model bundle snapshots in one directory.
///
/// A save stages all five artifacts in a sibling temporary directory and
/// renames it into place, so readers never see a mix of two snapshots.
/// Replacing an existing snapshot takes two renames; between them the
/// directory is briefly absent and [`exists`](Self::exists) is false.
pub struct PersistenceManager {
    dir: PathBuf,
}

impl PersistenceManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether every artifact of a snapshot is present
    pub fn exists(&self) -> bool {
        Artifact::ALL
            .iter()
            .all(|a| self.dir.join(a.file_name()).is_file())
    }

    /// Save a trained bundle, replacing any previous snapshot
    pub fn save(&self, bundle: &ModelBundle) -> Result<(), StoreError> {
        let ensemble = bundle.ensemble();
        let trained_at = ensemble.trained_at().ok_or(StoreError::NotTrained)?;
        let scaler = bundle.scaler().state().ok_or(StoreError::NotTrained)?;

        let parent = self.parent();
        fs::create_dir_all(&parent)?;
        let staging = tempfile::Builder::new()
            .prefix(".snapshot-staging-")
            .tempdir_in(&parent)?;
        let staged = staging.path().join("snapshot");
        fs::create_dir(&staged)?;

        let at = Some(trained_at);
        write_artifact(&staged, Artifact::SequenceModel, at, ensemble.sequence_model())?;
        write_artifact(&staged, Artifact::TreeModel, at, ensemble.tree_model())?;
        write_artifact(&staged, Artifact::AnomalyModel, at, ensemble.anomaly_model())?;
        write_artifact(&staged, Artifact::Scaler, at, scaler)?;
        write_artifact(&staged, Artifact::Config, at, bundle.config())?;

        self.publish(&parent, &staged)?;
        info!("Saved model snapshot to {}", self.dir.display());
        Ok(())
    }

    /// Load a snapshot; every artifact must be present and well-formed
    pub fn load(&self) -> Result<ModelBundle, StoreError> {
        for artifact in Artifact::ALL {
            if !self.dir.join(artifact.file_name()).is_file() {
                return Err(StoreError::MissingArtifact(artifact.file_name().to_string()));
            }
        }

        let config: Envelope<PipelineConfig> = self.read_artifact(Artifact::Config)?;
        let scaler: Envelope<ScalerState> = self.read_artifact(Artifact::Scaler)?;
        let sequence: Envelope<TemporalClassifier> = self.read_artifact(Artifact::SequenceModel)?;
        let tree: Envelope<RandomForest> = self.read_artifact(Artifact::TreeModel)?;
        let anomaly: Envelope<IsolationForest> = self.read_artifact(Artifact::AnomalyModel)?;

        let trained_at = consistent_training_time(&[
            config.trained_at,
            scaler.trained_at,
            sequence.trained_at,
            tree.trained_at,
            anomaly.trained_at,
        ])?;
        let config = config.payload;
        if scaler.payload.features != config.feature_list {
            return Err(StoreError::Inconsistent(format!(
                "scaler features {:?} differ from configured {:?}",
                scaler.payload.features, config.feature_list
            )));
        }

        let ensemble = EnsembleModel::from_trained(
            config,
            sequence.payload,
            tree.payload,
            anomaly.payload,
            trained_at,
        );
        info!(
            "Loaded model snapshot from {} (trained {})",
            self.dir.display(),
            trained_at
        );
        Ok(ModelBundle::from_parts(
            Scaler::from_state(scaler.payload),
            ensemble,
        ))
    }

    fn parent(&self) -> PathBuf {
        match self.dir.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Swap the staged directory into place, keeping the old snapshot until
    /// the new one is published
    fn publish(&self, parent: &Path, staged: &Path) -> Result<(), StoreError> {
        if !self.dir.exists() {
            fs::rename(staged, &self.dir)?;
            return Ok(());
        }

        let backup = tempfile::Builder::new()
            .prefix(".snapshot-previous-")
            .tempdir_in(parent)?;
        let previous = backup.path().join("snapshot");
        fs::rename(&self.dir, &previous)?;
        if let Err(e) = fs::rename(staged, &self.dir) {
            warn!("Publishing snapshot failed, restoring previous: {}", e);
            restore(backup, &previous, &self.dir)?;
            return Err(e.into());
        }
        debug!("Replaced previous snapshot at {}", self.dir.display());
        Ok(())
    }

    fn read_artifact<T: DeserializeOwned>(
        &self,
        artifact: Artifact,
    ) -> Result<Envelope<T>, StoreError> {
        let path = self.dir.join(artifact.file_name());
        let raw: Envelope<serde_json::Value> =
            serde_json::from_reader(BufReader::new(File::open(&path)?))?;
        debug!("Read {}", path.display());
        raw.open(artifact.file_name(), artifact.format())
    }
}

/// Move the previous snapshot back to `dir`. When that fails the backup
/// directory is left on disk instead of being deleted with `backup`.
fn restore(backup: TempDir, previous: &Path, dir: &Path) -> Result<(), StoreError> {
    if let Err(e) = fs::rename(previous, dir) {
        let kept = backup.into_path();
        error!(
            "Could not restore previous snapshot to {}; it remains at {}: {}",
            dir.display(),
            kept.join("snapshot").display(),
            e
        );
        return Err(e.into());
    }
    Ok(())
}

fn write_artifact<T: Serialize>(
    dir: &Path,
    artifact: Artifact,
    trained_at: Option<DateTime<Utc>>,
    payload: &T,
) -> Result<(), StoreError> {
    let file = File::create(dir.join(artifact.file_name()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, &Envelope::new(artifact.format(), trained_at, payload))?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

fn consistent_training_time(times: &[Option<DateTime<Utc>>]) -> Result<DateTime<Utc>, StoreError> {
    let first = times
        .first()
        .copied()
        .flatten()
        .ok_or_else(|| StoreError::Inconsistent("snapshot has no training time".to_string()))?;
    if times.iter().any(|t| *t != Some(first)) {
        return Err(StoreError::Inconsistent(
            "artifacts come from different training runs".to_string(),
        ));
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;
    use telemetry::{AnomalyModelConfig, SensorFrame, SequenceModelConfig, TreeModelConfig};

    fn config() -> PipelineConfig {
        PipelineConfig {
            feature_list: vec!["temperature".to_string(), "vibration".to_string()],
            sequence_length: 3,
            random_seed: 7,
            sequence_model: SequenceModelConfig {
                epochs: 3,
                ..SequenceModelConfig::default()
            },
            tree_model: TreeModelConfig {
                n_trees: 4,
                max_depth: Some(3),
            },
            anomaly_model: AnomalyModelConfig {
                n_trees: 8,
                ..AnomalyModelConfig::default()
            },
            ..PipelineConfig::default()
        }
    }

    fn frames(n: usize) -> Vec<SensorFrame> {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let mut values = BTreeMap::new();
                values.insert("temperature".to_string(), 55.0 + (i % 7) as f64 * 1.3);
                values.insert("vibration".to_string(), 4.0 + (i % 4) as f64 * 0.4);
                let status = if i % 5 == 0 { "maintenance" } else { "operational" };
                SensorFrame::new(start + Duration::seconds(5 * i as i64), values)
                    .with_status(status)
            })
            .collect()
    }

    fn trained_bundle() -> ModelBundle {
        let mut bundle = ModelBundle::new(config());
        bundle.train(&frames(30)).unwrap();
        bundle
    }

    #[test]
    fn test_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let store = PersistenceManager::new(root.path().join("models"));
        let bundle = trained_bundle();

        store.save(&bundle).unwrap();
        assert!(store.exists());
        let loaded = store.load().unwrap();

        assert_eq!(loaded.config(), bundle.config());
        assert_eq!(loaded.ensemble().trained_at(), bundle.ensemble().trained_at());
        let (a, b) = (bundle.scaler().state().unwrap(), loaded.scaler().state().unwrap());
        assert_eq!(a.features, b.features);
        for (x, y) in a.means.iter().chain(&a.std_devs).zip(b.means.iter().chain(&b.std_devs)) {
            assert!((x - y).abs() < 1e-9);
        }

        let recent = frames(12);
        let before = bundle.predict(&recent).unwrap();
        let after = loaded.predict(&recent).unwrap();
        assert_eq!(before.tree_predictions, after.tree_predictions);
        assert_eq!(before.anomalies, after.anomalies);
        for (p, q) in before
            .sequence_probabilities
            .iter()
            .zip(&after.sequence_probabilities)
        {
            assert!((p - q).abs() < 1e-9);
        }
    }

    #[test]
    fn test_untrained_bundle_rejected() {
        let root = tempfile::tempdir().unwrap();
        let store = PersistenceManager::new(root.path().join("models"));
        assert!(matches!(
            store.save(&ModelBundle::new(config())),
            Err(StoreError::NotTrained)
        ));
        assert!(!store.dir().exists());
    }

    #[test]
    fn test_missing_artifact() {
        let root = tempfile::tempdir().unwrap();
        let store = PersistenceManager::new(root.path().join("models"));
        store.save(&trained_bundle()).unwrap();

        fs::remove_file(store.dir().join("scaler.json")).unwrap();
        assert!(!store.exists());
        assert!(matches!(
            store.load(),
            Err(StoreError::MissingArtifact(name)) if name == "scaler.json"
        ));
    }

    #[test]
    fn test_format_mismatch() {
        let root = tempfile::tempdir().unwrap();
        let store = PersistenceManager::new(root.path().join("models"));
        store.save(&trained_bundle()).unwrap();

        // Config file replaced by a scaler envelope
        fs::copy(store.dir().join("scaler.json"), store.dir().join("config.json")).unwrap();
        assert!(matches!(
            store.load(),
            Err(StoreError::FormatMismatch { artifact, .. }) if artifact == "config.json"
        ));
    }

    #[test]
    fn test_overwrite_leaves_no_staging() {
        let root = tempfile::tempdir().unwrap();
        let store = PersistenceManager::new(root.path().join("models"));
        store.save(&trained_bundle()).unwrap();

        let mut retrained = ModelBundle::new(config());
        retrained.train(&frames(40)).unwrap();
        store.save(&retrained).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.ensemble().trained_at(), retrained.ensemble().trained_at());
        assert_eq!(loaded.scaler().state().unwrap().n_samples, 40);

        let entries: Vec<_> = fs::read_dir(root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("models")]);
    }

    #[test]
    fn test_failed_restore_keeps_backup() {
        let root = tempfile::tempdir().unwrap();
        let backup = tempfile::Builder::new()
            .prefix(".snapshot-previous-")
            .tempdir_in(root.path())
            .unwrap();
        let previous = backup.path().join("snapshot");
        fs::create_dir(&previous).unwrap();
        fs::write(previous.join("config.json"), b"{}").unwrap();

        // Target parent does not exist, so the rename back fails
        let target = root.path().join("absent").join("models");
        assert!(matches!(
            restore(backup, &previous, &target),
            Err(StoreError::Io(_))
        ));
        assert!(previous.join("config.json").is_file());
    }

    #[test]
    fn test_restore_moves_previous_back() {
        let root = tempfile::tempdir().unwrap();
        let backup = tempfile::tempdir_in(root.path()).unwrap();
        let previous = backup.path().join("snapshot");
        fs::create_dir(&previous).unwrap();
        let target = root.path().join("models");

        restore(backup, &previous, &target).unwrap();
        assert!(target.is_dir());
    }

    #[test]
    fn test_training_time_consistency() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(consistent_training_time(&[Some(t), Some(t)]).unwrap(), t);
        assert!(consistent_training_time(&[Some(t), None]).is_err());
        assert!(consistent_training_time(&[None]).is_err());
    }
}
