//! Submission Transport
//!
//! Packages the file and its manifest as multipart form data, posts it to the
//! ingest endpoint, and maps every outcome to either a `ServerVerification`
//! or one of the `TransportError` classes. Nothing is retried here.

use std::fmt;
use std::io::Read;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::IngestConfig;
use crate::manifest::ProcessingManifest;
use crate::source::SubmissionFile;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// 2xx with a body that is not the expected JSON
    #[error("Malformed server response: {0}")]
    MalformedResponse(String),

    /// Non-2xx with the server's `detail` (or the status reason)
    #[error("Server rejected submission ({status}): {detail}")]
    ServerRejected { status: u16, detail: String },

    /// Server answered but did not confirm the manifest digest
    #[error("Fixity verification failed: {0}")]
    FixityMismatch(String),

    /// No response: refused, unreachable, timed out
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The request could not be built or its body could not be read
    #[error("Request construction failed: {0}")]
    Request(String),
}

impl TransportError {
    /// Message shown to the user; distinct per class
    pub fn user_message(&self) -> String {
        match self {
            Self::MalformedResponse(_) => {
                "Server returned an unreadable response".to_string()
            }
            Self::ServerRejected { detail, .. } => {
                format!("Server verification failed: {}", detail)
            }
            Self::FixityMismatch(detail) => {
                format!("Server verification failed: {}", detail)
            }
            Self::Connection(_) => {
                "Cannot connect to server. Check that the ingest service is running.".to_string()
            }
            Self::Request(detail) => format!("Could not build upload request: {}", detail),
        }
    }
}

// ============================================================================
// Server verification
// ============================================================================

/// Asset identifier as returned by the backend (integer or string)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AssetId {
    Numeric(u64),
    Text(String),
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(id) => write!(f, "{}", id),
            Self::Text(id) => f.write_str(id),
        }
    }
}

/// Success payload of the ingest endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerVerification {
    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub message: String,

    pub asset_id: AssetId,

    /// `PASS` when the server's digest matched the manifest
    pub fixity_check: String,

    /// Digest computed by the server, when echoed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl ServerVerification {
    pub fn fixity_passed(&self) -> bool {
        self.fixity_check.eq_ignore_ascii_case("PASS")
    }

    /// IIIF presentation manifest for the stored asset
    pub fn iiif_manifest_url(&self, api_base: &Url) -> String {
        format!(
            "{}/iiif/{}/manifest",
            api_base.as_str().trim_end_matches('/'),
            self.asset_id
        )
    }

    fn confirm(&self, expected_hash: &str) -> Result<(), TransportError> {
        if !self.fixity_passed() {
            return Err(TransportError::FixityMismatch(format!(
                "server reported fixity check {}",
                self.fixity_check
            )));
        }
        if let Some(echoed) = &self.sha256 {
            if !echoed.eq_ignore_ascii_case(expected_hash) {
                return Err(TransportError::FixityMismatch(format!(
                    "server digest {} does not match {}",
                    echoed, expected_hash
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Transport trait
// ============================================================================

/// Upload/verify exchange with the ingest backend
#[async_trait]
pub trait SubmissionTransport: Send + Sync {
    async fn submit(
        &self,
        file: &SubmissionFile,
        manifest: &ProcessingManifest,
    ) -> Result<ServerVerification, TransportError>;
}

// ============================================================================
// HTTP transport
// ============================================================================

/// Multipart POST to `{api_base}{ingest_path}`
pub struct HttpTransport {
    client: reqwest::Client,
    ingest_url: Url,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, ingest_url: Url) -> Self {
        Self { client, ingest_url }
    }

    pub fn from_config(config: &IngestConfig) -> Result<Self, TransportError> {
        let ingest_url = config
            .ingest_url()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| TransportError::Request(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::new(client, ingest_url))
    }

    pub fn ingest_url(&self) -> &Url {
        &self.ingest_url
    }

    async fn file_part(file: &SubmissionFile) -> Result<Part, TransportError> {
        let part = match file.source().local_path() {
            Some(path) => {
                let handle = tokio::fs::File::open(path).await.map_err(|e| {
                    TransportError::Request(format!("Failed to open {}: {}", path.display(), e))
                })?;
                Part::stream_with_length(reqwest::Body::from(handle), file.size())
            }
            None => {
                let owned = file.clone();
                let bytes = tokio::task::spawn_blocking(move || {
                    let mut buf = Vec::new();
                    owned.open()?.read_to_end(&mut buf)?;
                    Ok::<_, std::io::Error>(buf)
                })
                .await
                .map_err(|e| TransportError::Request(format!("Task join error: {}", e)))?
                .map_err(|e| TransportError::Request(format!("Failed to read file: {}", e)))?;
                Part::bytes(bytes)
            }
        };

        part.file_name(file.name().to_string())
            .mime_str(file.content_type())
            .map_err(|e| TransportError::Request(format!("Invalid content type: {}", e)))
    }
}

#[async_trait]
impl SubmissionTransport for HttpTransport {
    async fn submit(
        &self,
        file: &SubmissionFile,
        manifest: &ProcessingManifest,
    ) -> Result<ServerVerification, TransportError> {
        let manifest_json = manifest
            .to_json()
            .map_err(|e| TransportError::Request(format!("Failed to serialize manifest: {}", e)))?;
        let manifest_part = Part::text(manifest_json)
            .mime_str("application/json")
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let form = Form::new()
            .part("file", Self::file_part(file).await?)
            .part("manifest", manifest_part);

        tracing::info!(
            url = %self.ingest_url,
            file_name = %file.name(),
            size = file.size(),
            "Uploading submission"
        );

        let response = self
            .client
            .post(self.ingest_url.clone())
            .multipart(form)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Connection(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            let detail = error_detail(&body).unwrap_or_else(|| reason(status));
            tracing::warn!(status = status.as_u16(), detail = %detail, "Submission rejected");
            return Err(TransportError::ServerRejected {
                status: status.as_u16(),
                detail,
            });
        }

        let verification: ServerVerification = serde_json::from_slice(&body)
            .map_err(|e| TransportError::MalformedResponse(e.to_string()))?;
        verification.confirm(&manifest.hash)?;

        tracing::info!(
            asset_id = %verification.asset_id,
            fixity = %verification.fixity_check,
            "Submission verified"
        );

        Ok(verification)
    }
}

fn classify_send_error(e: reqwest::Error) -> TransportError {
    if e.is_builder() || e.is_body() {
        TransportError::Request(e.to_string())
    } else {
        TransportError::Connection(e.to_string())
    }
}

/// `detail` from an error body: strings as-is, anything else as JSON
fn error_detail(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    match value.get("detail")? {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.is_empty() => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn reason(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

// ============================================================================
// Mock transport
// ============================================================================

/// Canned transport for state machine tests
#[cfg(test)]
pub struct MockTransport {
    pub response: Result<ServerVerification, TransportError>,
    pub delay: Option<std::time::Duration>,
    pub calls: std::sync::atomic::AtomicUsize,
    pub last_manifest: std::sync::Mutex<Option<ProcessingManifest>>,
}

#[cfg(test)]
impl MockTransport {
    pub fn succeeding() -> Self {
        Self::with_response(Ok(ServerVerification {
            status: "success".to_string(),
            message: "Ingested".to_string(),
            asset_id: AssetId::Numeric(7),
            fixity_check: "PASS".to_string(),
            sha256: None,
        }))
    }

    pub fn with_response(response: Result<ServerVerification, TransportError>) -> Self {
        Self {
            response,
            delay: None,
            calls: std::sync::atomic::AtomicUsize::new(0),
            last_manifest: std::sync::Mutex::new(None),
        }
    }

    pub fn delayed(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl SubmissionTransport for MockTransport {
    async fn submit(
        &self,
        _file: &SubmissionFile,
        manifest: &ProcessingManifest,
    ) -> Result<ServerVerification, TransportError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if let Ok(mut last) = self.last_manifest.lock() {
            *last = Some(manifest.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.response.clone()
    }
}
