//! Error types for the scanner core

use thiserror::Error;

/// Result type alias for scanner operations
pub type Result<T> = std::result::Result<T, ScannerError>;

/// Comprehensive error types for the scanner core.
///
/// Expected negative outcomes (pool full, unknown terminal id, non-object
/// finding) are `Option`/`bool` return values on the relevant APIs, never
/// error variants. This enum is the channel for integrity and operator
/// failures only.
#[derive(Error, Debug)]
pub enum ScannerError {
    #[error("Invalid scan mode: {0}")]
    InvalidMode(String),

    #[error("Invalid strategy: {0}")]
    InvalidStrategy(String),

    #[error("Corrupt checkpoint: {0}")]
    CorruptCheckpoint(String),

    #[error("Vault error: {0}")]
    Vault(#[from] aurum_vault::VaultError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScannerError {
    /// Create a corrupt-checkpoint error
    pub fn corrupt_checkpoint<S: Into<String>>(message: S) -> Self {
        Self::CorruptCheckpoint(message.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// True for errors that risk loss of committed state and must abort the
    /// caller, as opposed to per-candidate failures the scan loop absorbs.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScannerError::CorruptCheckpoint(_)
                | ScannerError::InvalidMode(_)
                | ScannerError::InvalidStrategy(_)
        )
    }
}
