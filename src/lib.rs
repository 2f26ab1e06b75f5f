//! SIP Ingest Client
//!
//! Prepares digitized image files for submission to a preservation ingest
//! service: checks layered PSD/PSB/TIFF containers, extracts and bounds
//! embedded metadata, computes a SHA-256 fixity digest and uploads the file
//! together with its processing manifest.
//!
//! # Modules
//!
//! - `inspect`: PSD/PSB/TIFF structure inspection (layer and page counts)
//! - `hashing`: Streaming SHA-256 fixity digests
//! - `metadata`: EXIF/XMP/IPTC/ICC extraction into a flat tag map
//! - `sanitize`: Size-bounded, JSON-safe manifest metadata
//! - `pipeline`: The ingest state machine
//! - `transport`: Multipart submission to the ingest endpoint

use std::path::Path;
use std::sync::Arc;

pub mod config;
pub mod error;
pub mod hashing;
pub mod inspect;
pub mod manifest;
pub mod metadata;
pub mod pipeline;
pub mod sanitize;
pub mod source;
pub mod transport;
pub mod worker;

pub use config::IngestConfig;
pub use error::{IngestError, Result};
pub use hashing::ContentHasher;
pub use inspect::{LayerCheckResult, LayerInspector};
pub use manifest::ProcessingManifest;
pub use metadata::MetadataExtractor;
pub use pipeline::{IngestPipeline, IngestReceipt, IngestState, Progress, ProgressStep, SelectionOutcome};
pub use sanitize::{ManifestSanitizer, SanitizedMetadata};
pub use source::SubmissionFile;
pub use transport::{HttpTransport, ServerVerification, SubmissionTransport, TransportError};

/// Pipeline wired to the HTTP ingest endpoint named by `config`
pub fn http_pipeline(config: IngestConfig) -> Result<IngestPipeline> {
    config.validate()?;
    let transport = HttpTransport::from_config(&config)?;
    Ok(IngestPipeline::new(config, Arc::new(transport)))
}

/// Fixity digest of a file on disk
pub fn fingerprint(path: impl AsRef<Path>, config: &IngestConfig) -> Result<String> {
    let file = SubmissionFile::from_path(path)?;
    let hasher = ContentHasher::from_config(&config.hashing);
    Ok(hasher.hash_file(&file, &worker::CancelFlag::new(), |_| {})?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_fingerprint_matches_in_memory_digest() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"preservation master").unwrap();

        let digest = fingerprint(tmp.path(), &IngestConfig::default()).unwrap();
        assert_eq!(digest, hashing::compute_hash(b"preservation master"));
    }

    #[test]
    fn test_fingerprint_missing_file_is_io_error() {
        let err = fingerprint("/nonexistent/scan.tif", &IngestConfig::default()).unwrap_err();
        assert!(matches!(err, IngestError::Io(_)));
    }

    #[test]
    fn test_http_pipeline_rejects_bad_base_url() {
        let mut config = IngestConfig::default();
        config.api.base_url = "not a url".to_string();
        assert!(matches!(http_pipeline(config), Err(IngestError::Config(_))));
    }

    #[test]
    fn test_http_pipeline_starts_idle() {
        let pipeline = http_pipeline(IngestConfig::default()).unwrap();
        assert_eq!(pipeline.state(), IngestState::Idle);
    }
}
