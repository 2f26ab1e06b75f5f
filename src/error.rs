//! Error types for the SIP ingest client

use thiserror::Error;

use crate::config::ConfigError;
use crate::hashing::HashError;
use crate::transport::TransportError;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Hashing error: {0}")]
    Hash(#[from] HashError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Multi-layer file selected without confirmation
    #[error("Confirmation required: {0}")]
    ConfirmationRequired(String),

    #[error("Pipeline busy: a processing cycle is already in flight")]
    Busy,

    /// Run ended in the `Error` state with this display message
    #[error("Ingest failed: {0}")]
    Failed(String),
}
