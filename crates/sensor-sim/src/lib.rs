//! Synthetic Sensor Simulator
//!
//! Generates hydro station telemetry with optional single-channel anomaly
//! injection and streams it to an MQTT broker.

mod generator;
mod publisher;
mod settings;
mod simulation;

pub use generator::{GeneratedFrame, SyntheticSensorGenerator};
pub use publisher::{MqttPublisher, Publisher, RecordingPublisher};
pub use settings::SimulationConfig;
pub use simulation::{Simulation, SimulationStats};

use thiserror::Error;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
