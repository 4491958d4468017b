//! Error types for the Vaultaire HA control plane.

use thiserror::Error;

/// Main error type for HA operations.
#[derive(Error, Debug)]
pub enum HaError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Backend already registered: {0}")]
    DuplicateBackend(String),

    #[error("Backend not found: {0}")]
    BackendNotFound(String),

    #[error("Region not found: {0}")]
    RegionNotFound(String),

    #[error("No healthy backend available")]
    NoBackendAvailable,

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Failover error: {0}")]
    Failover(String),
}

/// Result type alias for HA operations.
pub type Result<T> = std::result::Result<T, HaError>;
