//! Synthetic telemetry generator

use chrono::{DateTime, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::collections::BTreeMap;
use telemetry::{hydro_channels, Channel, ChannelRange, SensorFrame, DEFAULT_STATUS};
use tracing::debug;

/// A generated frame and the channel that received an injected anomaly
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedFrame {
    pub frame: SensorFrame,
    /// Name of the anomalous channel, if one was injected
    pub anomaly: Option<String>,
}

impl GeneratedFrame {
    pub fn is_anomalous(&self) -> bool {
        self.anomaly.is_some()
    }
}

/// Seeded generator of hydro station telemetry.
///
/// Healthy channels read `nominal + N(0, (max - min) / 20)` clamped to the
/// absolute limits. An injected anomaly puts exactly one channel strictly
/// outside its normal band, inside its absolute limits.
pub struct SyntheticSensorGenerator {
    channels: Vec<Channel>,
    rng: ChaCha8Rng,
}

impl SyntheticSensorGenerator {
    /// Create a generator over the given channels
    pub fn new(channels: Vec<Channel>, seed: u64) -> Self {
        Self {
            channels,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Generator over the station's eight turbine channels
    pub fn hydro(seed: u64) -> Self {
        Self::new(hydro_channels(), seed)
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Generate a frame stamped with the current time
    pub fn generate(&mut self, inject_anomaly: bool) -> GeneratedFrame {
        self.generate_at(Utc::now(), inject_anomaly)
    }

    /// Generate a frame with an explicit timestamp.
    ///
    /// The anomaly target is drawn first, then every channel in catalog order,
    /// so a fixed seed and flag sequence reproduce the same values.
    pub fn generate_at(
        &mut self,
        timestamp: DateTime<Utc>,
        inject_anomaly: bool,
    ) -> GeneratedFrame {
        let target = (inject_anomaly && !self.channels.is_empty())
            .then(|| self.rng.gen_range(0..self.channels.len()));

        let mut values = BTreeMap::new();
        for (index, channel) in self.channels.iter().enumerate() {
            let value = if Some(index) == target {
                anomalous_value(&channel.range, &mut self.rng)
            } else {
                nominal_value(&channel.range, &mut self.rng)
            };
            values.insert(channel.name.clone(), value);
        }

        let anomaly = target.map(|index| self.channels[index].name.clone());
        if let Some(name) = &anomaly {
            debug!("Injected anomaly into {}", name);
        }
        GeneratedFrame {
            frame: SensorFrame::new(timestamp, values).with_status(DEFAULT_STATUS),
            anomaly,
        }
    }
}

fn nominal_value(range: &ChannelRange, rng: &mut ChaCha8Rng) -> f64 {
    let noise = match Normal::new(0.0, range.noise_std_dev()) {
        Ok(normal) => normal.sample(rng),
        // zero-width range
        Err(_) => 0.0,
    };
    range.clamp(range.nominal + noise)
}

/// Uniform draw from `[min, low)` or `(high, max]`, each side equally likely.
///
/// A nominal value sitting on a limit leaves that side empty; the other side
/// is used. A zero-width range yields its nominal value.
fn anomalous_value(range: &ChannelRange, rng: &mut ChaCha8Rng) -> f64 {
    let (low, high) = range.normal_band();
    let has_lower = low > range.min;
    let has_upper = range.max > high;
    let lower = match (has_lower, has_upper) {
        (true, true) => rng.gen_bool(0.5),
        (has_lower, _) => has_lower,
    };
    if lower {
        rng.gen_range(range.min..low)
    } else if has_upper {
        range.max - rng.gen_range(0.0..(range.max - high))
    } else {
        range.nominal
    }
}
