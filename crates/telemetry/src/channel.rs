//! Sensor Channel Range Catalog

use crate::ConfigError;
use serde::{Deserialize, Serialize};

/// Valid range and nominal operating point of one sensor channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRange {
    /// Absolute lower limit
    pub min: f64,
    /// Absolute upper limit
    pub max: f64,
    /// Engineering unit
    pub unit: String,
    /// Nominal operating value
    pub nominal: f64,
}

impl ChannelRange {
    /// Create a channel range; needs `min < max` and `min <= nominal <= max`
    pub fn new(min: f64, max: f64, unit: &str, nominal: f64) -> Result<Self, ConfigError> {
        let range = Self::catalog(min, max, unit, nominal);
        range.validate()?;
        Ok(range)
    }

    fn catalog(min: f64, max: f64, unit: &str, nominal: f64) -> Self {
        Self {
            min,
            max,
            unit: unit.to_string(),
            nominal,
        }
    }

    /// Check the limits of a range built or deserialized elsewhere
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min.is_finite() && self.max.is_finite() && self.nominal.is_finite()) {
            return Err(ConfigError::invalid(
                "channel_range",
                format!(
                    "limits must be finite, got [{}, {}] nominal {}",
                    self.min, self.max, self.nominal
                ),
            ));
        }
        if self.min >= self.max {
            return Err(ConfigError::invalid(
                "channel_range",
                format!("min {} must be below max {}", self.min, self.max),
            ));
        }
        if !self.contains(self.nominal) {
            return Err(ConfigError::invalid(
                "channel_range",
                format!("nominal {} outside [{}, {}]", self.nominal, self.min, self.max),
            ));
        }
        Ok(())
    }

    /// Normal operating band `[low, high]` around the nominal value.
    ///
    /// Its edges sit halfway between the nominal value and each absolute limit.
    pub fn normal_band(&self) -> (f64, f64) {
        (
            self.min + (self.nominal - self.min) / 2.0,
            self.nominal + (self.max - self.nominal) / 2.0,
        )
    }

    /// Whether a value lies within the absolute limits
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Whether a value lies within the normal operating band
    pub fn is_normal(&self, value: f64) -> bool {
        let (low, high) = self.normal_band();
        value >= low && value <= high
    }

    /// Standard deviation of the measurement noise around the nominal value
    pub fn noise_std_dev(&self) -> f64 {
        (self.max - self.min) / 20.0
    }

    /// Clamp a value to the absolute limits
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// A named sensor channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub range: ChannelRange,
}

impl Channel {
    pub fn new(name: &str, range: ChannelRange) -> Self {
        Self {
            name: name.to_string(),
            range,
        }
    }
}

/// Channel catalog of the hydro station turbine set
pub fn hydro_channels() -> Vec<Channel> {
    let channel = |name, min, max, unit, nominal| {
        Channel::new(name, ChannelRange::catalog(min, max, unit, nominal))
    };
    vec![
        channel("temperature", 30.0, 90.0, "°C", 60.0),
        channel("pressure", 1.0, 3.0, "bar", 2.0),
        channel("vibration", 2.0, 8.0, "mm/s", 5.0),
        channel("flow_rate", 60.0, 140.0, "m³/s", 100.0),
        channel("power_output", 400.0, 600.0, "MW", 500.0),
        channel("turbine_efficiency", 75.0, 95.0, "%", 85.0),
        channel("water_level", 40.0, 60.0, "m", 50.0),
        channel("oil_temperature", 35.0, 55.0, "°C", 45.0),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_temperature_normal_band() {
        let range = ChannelRange::new(30.0, 90.0, "°C", 60.0).unwrap();
        assert_eq!(range.normal_band(), (45.0, 75.0));
        assert!(range.is_normal(45.0));
        assert!(range.is_normal(75.0));
        assert!(!range.is_normal(44.99));
        assert!(!range.is_normal(75.01));
    }

    #[test]
    fn test_noise_std_dev() {
        let range = ChannelRange::new(400.0, 600.0, "MW", 500.0).unwrap();
        assert!((range.noise_std_dev() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_catalog_nominals_inside_limits() {
        let channels = hydro_channels();
        assert_eq!(channels.len(), 8);
        for channel in &channels {
            assert!(channel.range.validate().is_ok(), "{}", channel.name);
            assert!(channel.range.is_normal(channel.range.nominal), "{}", channel.name);
        }
    }

    #[test]
    fn test_invalid_ranges_rejected() {
        assert!(matches!(
            ChannelRange::new(90.0, 30.0, "°C", 60.0),
            Err(ConfigError::Invalid { field: "channel_range", .. })
        ));
        assert!(ChannelRange::new(5.0, 5.0, "bar", 5.0).is_err());
        assert!(ChannelRange::new(0.0, 100.0, "%", 120.0).is_err());
        assert!(ChannelRange::new(0.0, f64::NAN, "%", 50.0).is_err());
    }

    #[test]
    fn test_nominal_on_limit() {
        let range = ChannelRange::new(0.0, 100.0, "%", 0.0).unwrap();
        assert_eq!(range.normal_band(), (0.0, 50.0));
        assert!(range.is_normal(0.0));
    }

    proptest! {
        #[test]
        fn prop_valid_range_band_inside_limits(
            min in -1000i32..1000,
            width in 1i32..500,
            at in 0.0f64..=1.0,
        ) {
            let offset = (at * f64::from(width)).round();
            let (min, max) = (f64::from(min), f64::from(min + width));
            let range = ChannelRange::new(min, max, "u", min + offset).unwrap();
            let (low, high) = range.normal_band();

            prop_assert!(range.min <= low && low <= range.nominal);
            prop_assert!(range.nominal <= high && high <= range.max);
            prop_assert!(range.is_normal(range.nominal));
        }
    }
}
