//! Cancellable publish loop

use crate::generator::{GeneratedFrame, SyntheticSensorGenerator};
use crate::publisher::Publisher;
use crate::settings::SimulationConfig;
use crate::TransportError;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Counters kept by a running simulation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationStats {
    /// Frames accepted by the publisher
    pub published: u64,
    /// Frames the publisher rejected
    pub failed: u64,
    /// Frames generated with an injected anomaly
    pub anomalies: u64,
}

/// Drives a generator into a publisher at a fixed interval
pub struct Simulation {
    generator: SyntheticSensorGenerator,
    /// Injection decisions, separate from the value stream
    rng: ChaCha8Rng,
    topic: String,
    interval: Duration,
    anomaly_probability: f64,
    stats: SimulationStats,
}

impl Simulation {
    pub fn new(generator: SyntheticSensorGenerator, config: &SimulationConfig) -> Self {
        Self {
            generator,
            rng: ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(1)),
            topic: config.topic.clone(),
            interval: config.interval(),
            anomaly_probability: config.anomaly_probability,
            stats: SimulationStats::default(),
        }
    }

    pub fn stats(&self) -> SimulationStats {
        self.stats
    }

    /// Generate one frame and publish it rounded to two decimals
    pub async fn step<P>(&mut self, publisher: &mut P) -> Result<GeneratedFrame, TransportError>
    where
        P: Publisher + ?Sized,
    {
        let inject = self.rng.gen::<f64>() < self.anomaly_probability;
        let generated = self.generator.generate(inject);
        if generated.is_anomalous() {
            self.stats.anomalies += 1;
        }

        let payload = generated
            .frame
            .rounded(2)
            .to_payload()
            .map_err(|e| TransportError::Serialization(e.to_string()))?;

        match publisher.publish(&self.topic, payload).await {
            Ok(()) => {
                self.stats.published += 1;
                let status = if inject { "ANOMALY INJECTED" } else { "NORMAL" };
                info!(
                    "Published frame {} to {}: {}",
                    self.stats.published, self.topic, status
                );
                Ok(generated)
            }
            Err(e) => {
                self.stats.failed += 1;
                Err(e)
            }
        }
    }

    /// Publish until `stop` turns true or its sender is dropped.
    ///
    /// Publish failures are logged and the loop continues. The publisher is
    /// disconnected before returning.
    pub async fn run<P>(
        &mut self,
        publisher: &mut P,
        mut stop: watch::Receiver<bool>,
    ) -> SimulationStats
    where
        P: Publisher + ?Sized,
    {
        info!(
            "Starting simulation on {} every {:?}, anomaly probability {}",
            self.topic, self.interval, self.anomaly_probability
        );

        loop {
            if *stop.borrow() {
                break;
            }
            if let Err(e) = self.step(publisher).await {
                warn!("Publish failed, continuing: {}", e);
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        if let Err(e) = publisher.disconnect().await {
            warn!("Disconnect failed: {}", e);
        }
        info!(
            "Simulation stopped: {} published, {} failed, {} anomalies",
            self.stats.published, self.stats.failed, self.stats.anomalies
        );
        self.stats
    }
}
