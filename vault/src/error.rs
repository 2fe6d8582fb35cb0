//! Error types for the vault crate

use thiserror::Error;

/// Result type alias for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Error types for encryption and vault storage
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Tamper detected: {0}")]
    Tamper(String),

    #[error("No master password set")]
    NoMasterKey,

    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VaultError {
    /// Create a tamper error
    pub fn tamper<S: Into<String>>(message: S) -> Self {
        Self::Tamper(message.into())
    }

    /// Create a malformed-token error
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::MalformedToken(message.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Integrity/security failures must always be surfaced to the caller;
    /// everything else may be recovered locally.
    pub fn is_integrity(&self) -> bool {
        matches!(self, VaultError::Tamper(_) | VaultError::NoMasterKey)
    }
}
