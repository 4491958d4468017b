//! Error types for the Vaultaire monitoring subsystem.

use thiserror::Error;

/// Main error type for monitoring operations.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Collection error: {0}")]
    Collection(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MonitorError {
    /// Build a collection error.
    pub fn collection(message: impl Into<String>) -> Self {
        MonitorError::Collection(message.into())
    }

    /// Build an export error.
    pub fn export(message: impl Into<String>) -> Self {
        MonitorError::Export(message.into())
    }
}

/// Result type alias for monitoring operations.
pub type Result<T> = std::result::Result<T, MonitorError>;
