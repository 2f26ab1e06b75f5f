//! Configuration management for the SIP ingest client

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

/// Layer inspection is skipped above this size: 1GB
pub const DEFAULT_LAYER_CHECK_MAX_BYTES: u64 = 1024 * 1024 * 1024;

/// Per-value serialized ceiling for sanitized metadata: 20KB
pub const DEFAULT_METADATA_VALUE_LIMIT: usize = 20 * 1024;

/// Read size for the streaming hasher: 64KB
pub const DEFAULT_HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Leading bytes handed to the metadata extractor: 64MB
pub const DEFAULT_METADATA_SCAN_LIMIT: u64 = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },

    #[error("Invalid API base URL {0}: {1}")]
    InvalidUrl(String, url::ParseError),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    pub api: ApiConfig,
    pub inspection: InspectionConfig,
    pub sanitizer: SanitizerConfig,
    pub hashing: HashingConfig,
    pub metadata: MetadataConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub ingest_path: String,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InspectionConfig {
    pub max_check_bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SanitizerConfig {
    pub max_value_len: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HashingConfig {
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    pub scan_limit: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            api: ApiConfig {
                base_url: "http://localhost:8000/api".to_string(),
                ingest_path: "/ingest/sip".to_string(),
                request_timeout_secs: 3600,
                connect_timeout_secs: 10,
            },
            inspection: InspectionConfig {
                max_check_bytes: DEFAULT_LAYER_CHECK_MAX_BYTES,
            },
            sanitizer: SanitizerConfig {
                max_value_len: DEFAULT_METADATA_VALUE_LIMIT,
            },
            hashing: HashingConfig {
                chunk_size: DEFAULT_HASH_CHUNK_SIZE,
            },
            metadata: MetadataConfig {
                scan_limit: DEFAULT_METADATA_SCAN_LIMIT,
            },
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = IngestConfig {
            api: ApiConfig {
                base_url: env::var("SIP_API_BASE_URL")
                    .unwrap_or_else(|_| "http://localhost:8000/api".to_string()),
                ingest_path: env::var("SIP_INGEST_PATH").unwrap_or_else(|_| "/ingest/sip".to_string()),
                request_timeout_secs: parse_var("SIP_REQUEST_TIMEOUT_SECS", 3600)?,
                connect_timeout_secs: parse_var("SIP_CONNECT_TIMEOUT_SECS", 10)?,
            },
            inspection: InspectionConfig {
                max_check_bytes: parse_var("SIP_LAYER_CHECK_MAX_BYTES", DEFAULT_LAYER_CHECK_MAX_BYTES)?,
            },
            sanitizer: SanitizerConfig {
                max_value_len: parse_var("SIP_METADATA_VALUE_LIMIT", DEFAULT_METADATA_VALUE_LIMIT)?,
            },
            hashing: HashingConfig {
                chunk_size: parse_var("SIP_HASH_CHUNK_SIZE", DEFAULT_HASH_CHUNK_SIZE)?,
            },
            metadata: MetadataConfig {
                scan_limit: parse_var("SIP_METADATA_SCAN_LIMIT", DEFAULT_METADATA_SCAN_LIMIT)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api_base()?;

        if self.hashing.chunk_size == 0 {
            return Err(ConfigError::Validation(
                "hash chunk size must be greater than zero".to_string(),
            ));
        }
        if self.sanitizer.max_value_len == 0 {
            return Err(ConfigError::Validation(
                "metadata value limit must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Parsed API base, without a trailing slash
    pub fn api_base(&self) -> Result<Url, ConfigError> {
        let trimmed = self.api.base_url.trim_end_matches('/');
        Url::parse(trimmed).map_err(|e| ConfigError::InvalidUrl(self.api.base_url.clone(), e))
    }

    /// Full URL of the upload/verify endpoint
    pub fn ingest_url(&self) -> Result<Url, ConfigError> {
        let base = self.api.base_url.trim_end_matches('/');
        let path = self.api.ingest_path.trim_start_matches('/');
        let joined = format!("{}/{}", base, path);
        Url::parse(&joined).map_err(|e| ConfigError::InvalidUrl(joined, e))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.api.connect_timeout_secs)
    }
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}
