//! Pipeline configuration

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Environment variable prefix for overrides (e.g. `HYDRO_SEQUENCE_LENGTH=64`)
const ENV_PREFIX: &str = "HYDRO";

/// Interval between scheduled retrains, written as `<n><unit>` with unit
/// one of `s`, `m`, `h`, `d` (e.g. `"1d"`, `"12h"`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RetrainInterval(Duration);

impl RetrainInterval {
    pub fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl FromStr for RetrainInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in '{s}'"))?;
        let (count, unit) = s.split_at(split);
        let count: u64 = count
            .parse()
            .map_err(|_| format!("invalid count in '{s}'"))?;
        let scale = match unit {
            "s" => 1,
            "m" => 60,
            "h" => 3_600,
            "d" => 86_400,
            other => return Err(format!("unknown unit '{other}'")),
        };
        if count == 0 {
            return Err("interval must be positive".to_string());
        }
        Ok(Self::from_secs(count * scale))
    }
}

impl fmt::Display for RetrainInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        match secs {
            s if s % 86_400 == 0 => write!(f, "{}d", s / 86_400),
            s if s % 3_600 == 0 => write!(f, "{}h", s / 3_600),
            s if s % 60 == 0 => write!(f, "{}m", s / 60),
            s => write!(f, "{s}s"),
        }
    }
}

impl TryFrom<String> for RetrainInterval {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RetrainInterval> for String {
    fn from(value: RetrainInterval) -> Self {
        value.to_string()
    }
}

/// Sequence classifier hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceModelConfig {
    /// Width of the hidden layer
    pub hidden_units: usize,
    /// Training epochs
    pub epochs: usize,
    /// Mini-batch size
    pub batch_size: usize,
    /// Fraction of training samples held out for validation
    pub validation_split: f64,
    /// Adam learning rate
    pub learning_rate: f64,
}

impl Default for SequenceModelConfig {
    fn default() -> Self {
        Self {
            hidden_units: 16,
            epochs: 50,
            batch_size: 32,
            validation_split: 0.2,
            learning_rate: 0.001,
        }
    }
}

/// Tree ensemble hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeModelConfig {
    pub n_trees: usize,
    /// Maximum depth of each tree (unbounded when absent)
    pub max_depth: Option<u16>,
}

impl Default for TreeModelConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
        }
    }
}

/// Isolation forest hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyModelConfig {
    pub n_trees: usize,
    /// Sub-sample size per tree
    pub max_samples: usize,
    /// Expected share of anomalies in the training data
    pub contamination: f64,
}

impl Default for AnomalyModelConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_samples: 256,
            contamination: 0.1,
        }
    }
}

/// Immutable pipeline configuration.
///
/// Built once from defaults plus an optional file and environment overrides.
/// Keys absent from every source keep their defaults; unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Feature channels, in transform order
    #[serde(alias = "features")]
    pub feature_list: Vec<String>,
    /// Frames per window
    pub sequence_length: usize,
    /// Prediction horizon (hours)
    pub forecast_horizon: u32,
    /// Confidence at which a window is flagged
    pub confidence_threshold: f64,
    /// Time between scheduled retrains
    #[serde(alias = "retraining_interval")]
    pub retrain_interval: RetrainInterval,
    /// Seed shared by every stochastic stage
    #[serde(alias = "random_state")]
    pub random_seed: u64,
    /// Name of the status column used as label
    pub target: String,
    /// Status value that marks a frame as positive
    pub maintenance_label: String,
    pub sequence_model: SequenceModelConfig,
    pub tree_model: TreeModelConfig,
    pub anomaly_model: AnomalyModelConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            feature_list: crate::channel::hydro_channels()
                .into_iter()
                .map(|c| c.name)
                .collect(),
            sequence_length: 48,
            forecast_horizon: 24,
            confidence_threshold: 0.85,
            retrain_interval: RetrainInterval::from_secs(86_400),
            random_seed: 42,
            target: "equipment_status".to_string(),
            maintenance_label: crate::frame::MAINTENANCE_STATUS.to_string(),
            sequence_model: SequenceModelConfig::default(),
            tree_model: TreeModelConfig::default(),
            anomaly_model: AnomalyModelConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from an optional JSON file plus `HYDRO_*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            info!("Loading pipeline configuration from {}", path.display());
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Json)
                    .required(true),
            );
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: PipelineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from an in-memory JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = ::config::Config::builder()
            .add_source(::config::File::from_str(json, ::config::FileFormat::Json))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check value constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feature_list.is_empty() {
            return Err(ConfigError::invalid("feature_list", "must not be empty"));
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = self.feature_list.iter().find(|f| !seen.insert(f.as_str())) {
            return Err(ConfigError::invalid(
                "feature_list",
                format!("duplicate feature '{dup}'"),
            ));
        }
        if self.sequence_length == 0 {
            return Err(ConfigError::invalid("sequence_length", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::invalid(
                "confidence_threshold",
                format!("{} is outside [0, 1]", self.confidence_threshold),
            ));
        }
        let seq = &self.sequence_model;
        if seq.epochs == 0 || seq.batch_size == 0 || seq.hidden_units == 0 {
            return Err(ConfigError::invalid(
                "sequence_model",
                "epochs, batch_size and hidden_units must be positive",
            ));
        }
        if !(0.0..1.0).contains(&seq.validation_split) {
            return Err(ConfigError::invalid(
                "sequence_model.validation_split",
                "must be in [0, 1)",
            ));
        }
        if self.tree_model.n_trees == 0 {
            return Err(ConfigError::invalid("tree_model.n_trees", "must be positive"));
        }
        let anomaly = &self.anomaly_model;
        if anomaly.n_trees == 0 || anomaly.max_samples < 2 {
            return Err(ConfigError::invalid(
                "anomaly_model",
                "n_trees must be positive and max_samples at least 2",
            ));
        }
        if !(anomaly.contamination > 0.0 && anomaly.contamination <= 0.5) {
            return Err(ConfigError::invalid(
                "anomaly_model.contamination",
                "must be in (0, 0.5]",
            ));
        }
        Ok(())
    }

    /// Number of feature channels
    pub fn num_features(&self) -> usize {
        self.feature_list.len()
    }
}
