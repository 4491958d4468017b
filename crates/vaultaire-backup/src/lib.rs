//! # Vaultaire Backup
//!
//! Backup lifecycle management and recovery-objective tracking for the
//! Vaultaire storage platform.
//!
//! ## Features
//!
//! - **Backup Configurations**: Full, incremental, and snapshot strategies
//!   with source/target regions, retention, and compression/encryption flags
//! - **Job Lifecycle**: Running -> Completed | Failed with sticky terminal
//!   states, progress tracking, and post-completion verification
//! - **Lifecycle Callbacks**: Synchronous on-start / on-complete / on-failed
//!   hooks for audit and orchestration consumers
//! - **RTO/RPO Tracking**: Incident timing against per-tier recovery
//!   objectives, breach detection, and SLA reporting
//!
//! Scheduling is deliberately thin: cron expressions are validated and
//! projected (`next_run_time`), but the host supplies the tick.
//!
//! ## Example Usage
//!
//! ```rust
//! use vaultaire_backup::{BackupConfig, BackupManager, BackupType};
//!
//! # fn example() -> vaultaire_backup::Result<()> {
//! let manager = BackupManager::new();
//! manager.add_config(BackupConfig::daily_full("nyc", "la"))?;
//!
//! let job = manager.start_backup("daily-full")?;
//! manager.complete_backup(&job.id, 1024, 8)?;
//!
//! let result = manager.verify_backup(&job.id)?;
//! assert!(result.verified);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(dead_code)]

pub mod backup;
pub mod error;
pub mod rto;

// Re-export main types for convenience
pub use backup::{
    BackupConfig, BackupJob, BackupManager, BackupResult, BackupStats, BackupType, JobCallback,
    JobStatus, RegionGate,
};
pub use error::{BackupError, Result};
pub use rto::{
    Incident, ObjectiveHealth, RecoveryEvent, RecoveryResult, RtoRpoConfig, RtoRpoMetrics,
    RtoRpoTracker, ServiceTier, SlaReport, TrackerStatus,
};

/// Version information for the backup subsystem.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
