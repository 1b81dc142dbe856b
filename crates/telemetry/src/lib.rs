//! Hydro Station Telemetry
//!
//! Sensor frames, channel range catalog, frame validation and the
//! immutable pipeline configuration shared by every stage.

mod channel;
mod error;
mod frame;
mod settings;
mod validator;

pub use channel::{hydro_channels, Channel, ChannelRange};
pub use error::{ConfigError, FrameError};
pub use frame::{SensorFrame, DEFAULT_STATUS, MAINTENANCE_STATUS};
pub use settings::{
    AnomalyModelConfig, PipelineConfig, RetrainInterval, SequenceModelConfig, TreeModelConfig,
};
pub use validator::{ValidationResult, Validator};
