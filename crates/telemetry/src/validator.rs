//! Frame Validator for Channel and Range Checking

use crate::channel::Channel;
use crate::error::FrameError;
use crate::frame::SensorFrame;
use std::collections::BTreeSet;
use tracing::debug;

/// Result of validating one frame
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// Whether all readings are valid
    pub valid: bool,
    /// Problems found
    pub errors: Vec<FrameError>,
    /// Number of channels checked
    pub channels_checked: usize,
}

impl ValidationResult {
    fn from_errors(errors: Vec<FrameError>, channels_checked: usize) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            channels_checked,
        }
    }
}

/// Validator for incoming sensor frames
pub struct Validator {
    channels: Vec<Channel>,
}

impl Validator {
    /// Create a validator over the given channel catalog
    pub fn new(channels: Vec<Channel>) -> Self {
        Self { channels }
    }

    /// Check that a frame's channel names set-match the configured features.
    ///
    /// Ordering is irrelevant here; it is enforced at transform time.
    pub fn check_channels(frame: &SensorFrame, features: &[String]) -> Result<(), FrameError> {
        let expected: BTreeSet<&str> = features.iter().map(String::as_str).collect();
        let actual: BTreeSet<&str> = frame.values.keys().map(String::as_str).collect();

        if let Some(missing) = expected.difference(&actual).next() {
            return Err(FrameError::MissingChannel((*missing).to_string()));
        }
        if let Some(unknown) = actual.difference(&expected).next() {
            return Err(FrameError::UnknownChannel((*unknown).to_string()));
        }
        Ok(())
    }

    /// Reject NaN and infinite readings on any channel
    pub fn check_finite(frame: &SensorFrame) -> Result<(), FrameError> {
        match frame.values.iter().find(|(_, v)| !v.is_finite()) {
            Some((channel, &value)) => Err(FrameError::NonFinite {
                channel: channel.clone(),
                value,
            }),
            None => Ok(()),
        }
    }

    /// Validate every catalogued channel present in the frame against its limits
    pub fn validate_frame(&self, frame: &SensorFrame) -> ValidationResult {
        let mut errors = Vec::new();
        let mut checked = 0;

        for channel in &self.channels {
            let Some(value) = frame.value(&channel.name) else {
                continue;
            };
            checked += 1;
            if !value.is_finite() || !channel.range.contains(value) {
                errors.push(FrameError::OutOfRange {
                    channel: channel.name.clone(),
                    value,
                    min: channel.range.min,
                    max: channel.range.max,
                });
            }
        }

        if !errors.is_empty() {
            debug!("Frame at {} has {} invalid readings", frame.timestamp, errors.len());
        }
        ValidationResult::from_errors(errors, checked)
    }

    /// Channels whose readings fall outside the normal operating band
    pub fn abnormal_channels<'a>(&'a self, frame: &SensorFrame) -> Vec<&'a str> {
        self.channels
            .iter()
            .filter(|c| frame.value(&c.name).is_some_and(|v| !c.range.is_normal(v)))
            .map(|c| c.name.as_str())
            .collect()
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(crate::channel::hydro_channels())
    }
}
