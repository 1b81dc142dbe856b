//! Self-describing artifact wrapper

use crate::StoreError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Version written into every artifact envelope
pub const FORMAT_VERSION: u32 = 1;

/// Artifact payload tagged with its format and version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub format: String,
    pub version: u32,
    /// Completion time of the training run that produced the snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trained_at: Option<DateTime<Utc>>,
    pub payload: T,
}

impl<T> Envelope<T> {
    pub fn new(format: &str, trained_at: Option<DateTime<Utc>>, payload: T) -> Self {
        Self {
            format: format.to_string(),
            version: FORMAT_VERSION,
            trained_at,
            payload,
        }
    }
}

impl Envelope<serde_json::Value> {
    /// Check the tag, then decode the payload
    pub fn open<T: DeserializeOwned>(
        self,
        artifact: &str,
        format: &str,
    ) -> Result<Envelope<T>, StoreError> {
        if self.format != format || self.version != FORMAT_VERSION {
            return Err(StoreError::FormatMismatch {
                artifact: artifact.to_string(),
                expected: format!("{}/v{}", format, FORMAT_VERSION),
                found: format!("{}/v{}", self.format, self.version),
            });
        }
        Ok(Envelope {
            format: self.format,
            version: self.version,
            trained_at: self.trained_at,
            payload: serde_json::from_value(self.payload)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_checks_tag() {
        let raw: Envelope<serde_json::Value> =
            serde_json::from_str(r#"{"format": "scaler", "version": 1, "payload": [1, 2]}"#)
                .unwrap();
        let opened: Envelope<Vec<u8>> = raw.clone().open("scaler.json", "scaler").unwrap();
        assert_eq!(opened.payload, vec![1, 2]);
        assert!(opened.trained_at.is_none());

        assert!(matches!(
            raw.open::<Vec<u8>>("scaler.json", "config"),
            Err(StoreError::FormatMismatch { .. })
        ));
    }

    #[test]
    fn test_version_checked() {
        let raw: Envelope<serde_json::Value> =
            serde_json::from_str(r#"{"format": "scaler", "version": 7, "payload": null}"#).unwrap();
        assert!(matches!(
            raw.open::<()>("scaler.json", "scaler"),
            Err(StoreError::FormatMismatch { found, .. }) if found == "scaler/v7"
        ));
    }
}
