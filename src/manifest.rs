//! Processing manifest (the in-memory SIP draft)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sanitize::SanitizedMetadata;

/// Fixity digest, bounded metadata and file identity for one submission
///
/// Built once per processing run and never mutated; a restart builds a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingManifest {
    /// Lower-case hex SHA-256 of the full file
    pub hash: String,
    pub metadata: SanitizedMetadata,
    pub file_size: u64,
    pub file_name: String,
    pub timestamp: DateTime<Utc>,
}

impl ProcessingManifest {
    pub fn new(
        hash: impl Into<String>,
        metadata: SanitizedMetadata,
        file_size: u64,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            hash: hash.into(),
            metadata,
            file_size,
            file_name: file_name.into(),
            timestamp: Utc::now(),
        }
    }

    /// JSON text for the `manifest` multipart field
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{MetaValue, RawMetadata};
    use crate::sanitize::ManifestSanitizer;

    #[test]
    fn test_wire_names_are_camel_case() {
        let mut raw = RawMetadata::new();
        raw.insert("EXIF:Make".to_string(), MetaValue::text("Acme"));
        let manifest = ProcessingManifest::new(
            "ab".repeat(32),
            ManifestSanitizer::default().sanitize(&raw),
            1234,
            "scan.tif",
        );

        let json: serde_json::Value = serde_json::from_str(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(json["fileSize"], 1234);
        assert_eq!(json["fileName"], "scan.tif");
        assert_eq!(json["metadata"]["EXIF:Make"], "Acme");
        assert_eq!(json["hash"].as_str().unwrap().len(), 64);
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
    }
}
