//! Model Store
//!
//! Saves and restores trained model bundles as five-artifact snapshot
//! directories, published atomically.

mod envelope;
mod snapshot;

pub use envelope::{Envelope, FORMAT_VERSION};
pub use snapshot::{Artifact, PersistenceManager};

use thiserror::Error;

/// Persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Snapshot is missing artifact '{0}'")]
    MissingArtifact(String),
    #[error("Artifact '{artifact}' has format {found}, expected {expected}")]
    FormatMismatch {
        artifact: String,
        expected: String,
        found: String,
    },
    #[error("Inconsistent snapshot: {0}")]
    Inconsistent(String),
    #[error("Cannot save an untrained bundle")]
    NotTrained,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
