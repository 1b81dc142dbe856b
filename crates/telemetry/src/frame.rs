//! Sensor Frame

use crate::error::FrameError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status reported by healthy equipment
pub const DEFAULT_STATUS: &str = "operational";

/// Status that marks a frame as requiring maintenance
pub const MAINTENANCE_STATUS: &str = "maintenance";

/// One telemetry sample from the station.
///
/// Serializes to the flat broker payload: one numeric key per channel plus
/// `timestamp` and an optional `equipment_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorFrame {
    /// Sample time
    pub timestamp: DateTime<Utc>,
    /// Categorical status label
    #[serde(rename = "equipment_status", default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Channel readings keyed by channel name
    #[serde(flatten)]
    pub values: BTreeMap<String, f64>,
}

impl SensorFrame {
    /// Create a frame without a status label
    pub fn new(timestamp: DateTime<Utc>, values: BTreeMap<String, f64>) -> Self {
        Self {
            timestamp,
            status: None,
            values,
        }
    }

    /// Attach a status label
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Reading of one channel
    pub fn value(&self, channel: &str) -> Option<f64> {
        self.values.get(channel).copied()
    }

    /// Whether the frame's status equals the given label
    pub fn has_status(&self, label: &str) -> bool {
        self.status.as_deref() == Some(label)
    }

    /// Copy of the frame with every reading rounded to `decimals` places
    pub fn rounded(&self, decimals: i32) -> Self {
        let factor = 10f64.powi(decimals);
        Self {
            timestamp: self.timestamp,
            status: self.status.clone(),
            values: self
                .values
                .iter()
                .map(|(name, value)| (name.clone(), (value * factor).round() / factor))
                .collect(),
        }
    }

    /// Encode as the JSON broker payload
    pub fn to_payload(&self) -> Result<Vec<u8>, FrameError> {
        serde_json::to_vec(self).map_err(|e| FrameError::InvalidPayload(e.to_string()))
    }

    /// Decode a JSON broker payload
    pub fn from_payload(payload: &[u8]) -> Result<Self, FrameError> {
        serde_json::from_slice(payload).map_err(|e| FrameError::InvalidPayload(e.to_string()))
    }
}
