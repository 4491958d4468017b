//! Error types for the Vaultaire backup subsystem.

use thiserror::Error;

/// Main error type for backup and recovery-objective operations.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Backup config not found: {0}")]
    ConfigNotFound(String),

    #[error("Backup job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid job state: {0}")]
    InvalidState(String),

    #[error("Source region unavailable: {0}")]
    SourceRegionUnavailable(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Scheduling error: {0}")]
    Scheduling(String),

    #[error("Incident not found: {0}")]
    IncidentNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for backup operations.
pub type Result<T> = std::result::Result<T, BackupError>;
