//! Binary Structure Inspector
//!
//! Heuristic multi-layer detection for archival image masters:
//! - PSD/PSB: counts top-level children of the layer tree
//! - TIFF: counts IFDs (pages) in the main chain
//!
//! The check is advisory. Every parse failure degrades to "no layers"
//! so a corrupt or exotic file is never blocked here; files above the
//! size ceiling are not read at all.

mod reader;

pub mod psd;
pub mod tiff;

#[cfg(test)]
pub(crate) mod fixtures;

use serde::{Deserialize, Serialize};

use crate::config::InspectionConfig;
use crate::source::SubmissionFile;

/// Inspection errors. Never surfaced past `LayerInspector::check`.
#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bad signature: {0}")]
    BadSignature(String),

    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    #[error("Read at offset {offset} runs past end of file ({len} bytes)")]
    Truncated { offset: u64, len: u64 },

    #[error("Malformed structure: {0}")]
    Malformed(String),

    #[error("BigTIFF is not supported")]
    BigTiff,
}

/// Outcome of layer inspection for one selected file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerCheckResult {
    pub has_layers: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Inspection skipped because the file exceeded the size ceiling
    #[serde(default)]
    pub is_large_file: bool,
}

impl LayerCheckResult {
    fn flat() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerKind {
    Psd,
    Tiff,
}

impl ContainerKind {
    fn from_file(file: &SubmissionFile) -> Option<Self> {
        match file.extension()?.as_str() {
            ".psd" | ".psb" => Some(Self::Psd),
            ".tif" | ".tiff" => Some(Self::Tiff),
            _ => None,
        }
    }
}

/// Layer inspector with a fixed size ceiling
#[derive(Debug, Clone)]
pub struct LayerInspector {
    max_check_bytes: u64,
}

impl LayerInspector {
    pub fn new(max_check_bytes: u64) -> Self {
        Self { max_check_bytes }
    }

    pub fn from_config(config: &InspectionConfig) -> Self {
        Self::new(config.max_check_bytes)
    }

    /// Inspect a file by declared size and name, then by header bytes
    pub fn check(&self, file: &SubmissionFile) -> LayerCheckResult {
        if file.size() > self.max_check_bytes {
            tracing::info!(
                file_name = %file.name(),
                size = file.size(),
                ceiling = self.max_check_bytes,
                "Skipping layer check for large file"
            );
            return LayerCheckResult {
                has_layers: false,
                is_large_file: true,
                message: Some(format!(
                    "File is larger than {}; layer check skipped. Make sure layers are flattened before uploading.",
                    human_size(self.max_check_bytes)
                )),
            };
        }

        let Some(kind) = ContainerKind::from_file(file) else {
            return LayerCheckResult::flat();
        };

        let counted = file
            .open()
            .map_err(InspectError::from)
            .and_then(|reader| match kind {
                ContainerKind::Psd => psd::count_top_level_layers(reader),
                ContainerKind::Tiff => tiff::count_pages(reader),
            });

        match counted {
            Ok(count) if count > 1 => {
                tracing::info!(file_name = %file.name(), count, "Multi-layer content detected");
                LayerCheckResult {
                    has_layers: true,
                    is_large_file: false,
                    message: Some(match kind {
                        ContainerKind::Psd => format!(
                            "Detected {} layers. Flatten layers before uploading.",
                            count
                        ),
                        ContainerKind::Tiff => format!(
                            "Detected {} pages. Flatten or split the TIFF before uploading.",
                            count
                        ),
                    }),
                }
            }
            Ok(count) => {
                tracing::debug!(file_name = %file.name(), count, "No multi-layer content");
                LayerCheckResult::flat()
            }
            Err(e) => {
                tracing::warn!(
                    file_name = %file.name(),
                    error = %e,
                    "Layer inspection failed, assuming flattened"
                );
                LayerCheckResult::flat()
            }
        }
    }
}

pub(crate) fn human_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB && bytes % GB == 0 {
        format!("{}GB", bytes / GB)
    } else if bytes >= MB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
