//! Telemetry Error Types

use thiserror::Error;

/// Errors raised while checking a sensor frame
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameError {
    /// Value out of the channel's absolute limits
    #[error("{channel} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        channel: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Configured channel absent from the frame
    #[error("Missing channel: {0}")]
    MissingChannel(String),

    /// Reading is NaN or infinite
    #[error("{channel} value {value} is not finite")]
    NonFinite { channel: String, value: f64 },

    /// Frame carries a channel that is not configured
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    /// Payload could not be decoded into a frame
    #[error("Invalid frame payload: {0}")]
    InvalidPayload(String),
}

/// Errors raised while building the pipeline configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Source could not be read or deserialized
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    /// A value was read but violates its constraints
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
