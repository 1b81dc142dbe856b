//! Simulator configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use telemetry::ConfigError;
use tracing::info;

/// Environment variable prefix for overrides (e.g. `HYDRO_SIM_BROKER_PORT=1884`)
const ENV_PREFIX: &str = "HYDRO_SIM";

/// Broker and loop settings for the telemetry simulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub broker_host: String,
    pub broker_port: u16,
    /// Topic every frame is published on
    pub topic: String,
    pub client_id: String,
    /// Seconds between frames
    pub interval_secs: u64,
    /// Chance that a frame carries an injected anomaly
    pub anomaly_probability: f64,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            topic: "hydro_station/sensors".to_string(),
            client_id: format!("hydro-sim-{}", uuid::Uuid::new_v4().simple()),
            interval_secs: 5,
            anomaly_probability: 0.1,
            seed: 42,
        }
    }
}

impl SimulationConfig {
    /// Load from an optional JSON file plus `HYDRO_SIM_*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            info!("Loading simulator configuration from {}", path.display());
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Json)
                    .required(true),
            );
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .try_parsing(true),
        );

        let config: SimulationConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.is_empty() {
            return Err(ConfigError::Invalid {
                field: "topic",
                reason: "must not be empty".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.anomaly_probability) {
            return Err(ConfigError::Invalid {
                field: "anomaly_probability",
                reason: format!("{} is outside [0, 1]", self.anomaly_probability),
            });
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SimulationConfig::default();
        assert_eq!(config.broker_host, "localhost");
        assert_eq!(config.broker_port, 1883);
        assert_eq!(config.topic, "hydro_station/sensors");
        assert_eq!(config.interval(), Duration::from_secs(5));
        assert!((config.anomaly_probability - 0.1).abs() < 1e-12);
        assert!(config.client_id.starts_with("hydro-sim-"));
    }

    #[test]
    fn test_load_file_overrides() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"broker_host": "broker.local", "interval_secs": 1, "unknown": true}}"#
        )
        .unwrap();

        let config = SimulationConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.broker_host, "broker.local");
        assert_eq!(config.interval_secs, 1);
        assert_eq!(config.broker_port, 1883);
    }

    #[test]
    fn test_invalid_probability() {
        let config = SimulationConfig {
            anomaly_probability: 1.5,
            ..SimulationConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "anomaly_probability",
                ..
            })
        ));
    }
}
