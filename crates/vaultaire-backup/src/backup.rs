//! Backup configuration and job lifecycle management.

use chrono::{DateTime, Utc};
use cron::Schedule;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{BackupError, Result};

/// Default retention applied when a config leaves it unset.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Default per-config concurrency cap applied when left unset.
pub const DEFAULT_MAX_CONCURRENT: u32 = 4;

/// Gate consulted before starting a backup: can the source region serve
/// reads right now? The HA region registry implements this.
pub trait RegionGate: Send + Sync {
    /// Returns true when the region can currently serve backup reads.
    fn region_available(&self, region: &str) -> bool;
}

/// Backup strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Full,
    Incremental,
    Snapshot,
}

/// Named backup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    pub name: String,
    pub backup_type: BackupType,
    pub source_region: String,
    pub target_region: String,
    /// Cron expression evaluated by the host's scheduler; validated here,
    /// never executed here.
    pub schedule: String,
    pub retention_days: u32,
    pub compression: bool,
    pub encryption: bool,
    pub max_concurrent: u32,
    pub verify_after_backup: bool,
}

impl BackupConfig {
    /// Create a config with platform defaults for the optional knobs.
    pub fn new(
        name: impl Into<String>,
        backup_type: BackupType,
        source_region: impl Into<String>,
        target_region: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            backup_type,
            source_region: source_region.into(),
            target_region: target_region.into(),
            schedule: String::new(),
            retention_days: DEFAULT_RETENTION_DAYS,
            compression: true,
            encryption: true,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            verify_after_backup: true,
        }
    }

    /// Set the cron schedule expression.
    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = schedule.into();
        self
    }

    /// Set the retention window in days.
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    /// Bootstrap default: full backup every day at 02:00.
    pub fn daily_full(source_region: &str, target_region: &str) -> Self {
        Self::new("daily-full", BackupType::Full, source_region, target_region)
            .with_schedule("0 0 2 * * *")
            .with_retention_days(30)
    }

    /// Bootstrap default: incremental backup at the top of every hour.
    pub fn hourly_incremental(source_region: &str, target_region: &str) -> Self {
        Self::new(
            "hourly-incremental",
            BackupType::Incremental,
            source_region,
            target_region,
        )
        .with_schedule("0 0 * * * *")
        .with_retention_days(7)
    }

    fn apply_defaults(&mut self) {
        if self.retention_days == 0 {
            self.retention_days = DEFAULT_RETENTION_DAYS;
        }
        if self.max_concurrent == 0 {
            self.max_concurrent = DEFAULT_MAX_CONCURRENT;
        }
    }
}

/// Status of a backup job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Terminal states are sticky: no further transitions are accepted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// A single backup execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupJob {
    pub id: String,
    pub config_name: String,
    pub backup_type: BackupType,
    pub status: JobStatus,
    pub source_region: String,
    pub target_region: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub bytes_total: u64,
    pub bytes_copied: u64,
    pub objects_total: u64,
    pub objects_copied: u64,
    pub error: Option<String>,
}

/// Outcome of verifying a completed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupResult {
    pub job_id: String,
    pub verified: bool,
    pub bytes_match: u64,
    pub objects_match: u64,
    pub verified_at: DateTime<Utc>,
}

/// Aggregate statistics over all jobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupStats {
    pub total_jobs: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    /// Bytes copied by Completed jobs only.
    pub bytes_copied: u64,
    /// Objects copied by Completed jobs only.
    pub objects_copied: u64,
}

/// Callback invoked synchronously on a job lifecycle transition.
pub type JobCallback = Arc<dyn Fn(&BackupJob) + Send + Sync>;

/// Manages backup configurations and drives job lifecycles.
///
/// The manager owns the job table; callers receive clones. Lifecycle
/// callbacks fire synchronously on the transition that caused them, after
/// the job table lock has been released, so a callback may call back into
/// the manager.
pub struct BackupManager {
    configs: RwLock<HashMap<String, BackupConfig>>,
    jobs: RwLock<HashMap<String, BackupJob>>,
    job_seq: AtomicU64,
    region_gate: Option<Arc<dyn RegionGate>>,
    on_start: RwLock<Option<JobCallback>>,
    on_complete: RwLock<Option<JobCallback>>,
    on_failed: RwLock<Option<JobCallback>>,
}

impl BackupManager {
    /// Create a manager with no region gate: backups start regardless of
    /// region health.
    pub fn new() -> Self {
        Self {
            configs: RwLock::new(HashMap::new()),
            jobs: RwLock::new(HashMap::new()),
            job_seq: AtomicU64::new(0),
            region_gate: None,
            on_start: RwLock::new(None),
            on_complete: RwLock::new(None),
            on_failed: RwLock::new(None),
        }
    }

    /// Create a manager that refuses to start backups out of unavailable
    /// source regions.
    pub fn with_region_gate(gate: Arc<dyn RegionGate>) -> Self {
        let mut manager = Self::new();
        manager.region_gate = Some(gate);
        manager
    }

    /// Register a backup configuration.
    ///
    /// Rejects an empty name and an unparseable schedule expression.
    /// Zero-valued retention and concurrency fall back to platform
    /// defaults.
    pub fn add_config(&self, mut config: BackupConfig) -> Result<()> {
        if config.name.trim().is_empty() {
            return Err(BackupError::Configuration(
                "backup config name must not be empty".to_string(),
            ));
        }

        if !config.schedule.is_empty() {
            Schedule::from_str(&config.schedule).map_err(|e| {
                BackupError::Scheduling(format!(
                    "invalid cron expression {:?}: {}",
                    config.schedule, e
                ))
            })?;
        }

        config.apply_defaults();

        tracing::info!(
            "Registered backup config {} ({} -> {})",
            config.name,
            config.source_region,
            config.target_region
        );

        self.configs.write().insert(config.name.clone(), config);
        Ok(())
    }

    /// Get a configuration by name.
    pub fn get_config(&self, name: &str) -> Option<BackupConfig> {
        self.configs.read().get(name).cloned()
    }

    /// Remove a configuration by name.
    pub fn remove_config(&self, name: &str) -> Result<()> {
        self.configs
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| BackupError::ConfigNotFound(name.to_string()))
    }

    /// List all registered configurations.
    pub fn list_configs(&self) -> Vec<BackupConfig> {
        self.configs.read().values().cloned().collect()
    }

    /// Next scheduled run for a named config, or None when it carries no
    /// schedule. The host owns the tick; this is a read-only projection.
    pub fn next_run_time(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        let config = self
            .get_config(name)
            .ok_or_else(|| BackupError::ConfigNotFound(name.to_string()))?;

        if config.schedule.is_empty() {
            return Ok(None);
        }

        let schedule = Schedule::from_str(&config.schedule)
            .map_err(|e| BackupError::Scheduling(format!("invalid cron expression: {}", e)))?;

        Ok(schedule.upcoming(Utc).next())
    }

    /// Start a backup for a named config.
    ///
    /// Fails when the config is absent or the source region cannot serve
    /// reads. Two consecutive starts always yield distinct job ids.
    pub fn start_backup(&self, config_name: &str) -> Result<BackupJob> {
        let config = self
            .get_config(config_name)
            .ok_or_else(|| BackupError::ConfigNotFound(config_name.to_string()))?;

        if let Some(gate) = &self.region_gate {
            if !gate.region_available(&config.source_region) {
                return Err(BackupError::SourceRegionUnavailable(
                    config.source_region.clone(),
                ));
            }
        }

        let job = BackupJob {
            id: self.next_job_id(),
            config_name: config.name.clone(),
            backup_type: config.backup_type,
            status: JobStatus::Running,
            source_region: config.source_region.clone(),
            target_region: config.target_region.clone(),
            started_at: Utc::now(),
            completed_at: None,
            bytes_total: 0,
            bytes_copied: 0,
            objects_total: 0,
            objects_copied: 0,
            error: None,
        };

        self.jobs.write().insert(job.id.clone(), job.clone());

        tracing::info!("Started backup job {} for config {}", job.id, config.name);
        self.fire(&self.on_start, &job);

        Ok(job)
    }

    /// Record copy progress for a running job. Non-blocking.
    pub fn update_progress(&self, job_id: &str, bytes_copied: u64, objects_copied: u64) -> Result<()> {
        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| BackupError::JobNotFound(job_id.to_string()))?;

        if job.status.is_terminal() {
            return Err(BackupError::InvalidState(format!(
                "job {} is already {:?}",
                job_id, job.status
            )));
        }

        job.bytes_copied = bytes_copied;
        job.objects_copied = objects_copied;
        Ok(())
    }

    /// Record the expected totals for a running job.
    pub fn set_totals(&self, job_id: &str, bytes_total: u64, objects_total: u64) -> Result<()> {
        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| BackupError::JobNotFound(job_id.to_string()))?;

        if job.status.is_terminal() {
            return Err(BackupError::InvalidState(format!(
                "job {} is already {:?}",
                job_id, job.status
            )));
        }

        job.bytes_total = bytes_total;
        job.objects_total = objects_total;
        Ok(())
    }

    /// Move a running job to Completed and stamp its completion metrics.
    pub fn complete_backup(&self, job_id: &str, bytes_copied: u64, objects_copied: u64) -> Result<BackupJob> {
        let job = {
            let mut jobs = self.jobs.write();
            let job = jobs
                .get_mut(job_id)
                .ok_or_else(|| BackupError::JobNotFound(job_id.to_string()))?;

            if job.status.is_terminal() {
                return Err(BackupError::InvalidState(format!(
                    "job {} is already {:?}",
                    job_id, job.status
                )));
            }

            job.status = JobStatus::Completed;
            job.completed_at = Some(Utc::now());
            job.bytes_copied = bytes_copied;
            job.objects_copied = objects_copied;
            if job.bytes_total == 0 {
                job.bytes_total = bytes_copied;
            }
            if job.objects_total == 0 {
                job.objects_total = objects_copied;
            }
            job.clone()
        };

        tracing::info!(
            "Completed backup job {} ({} bytes, {} objects)",
            job.id,
            job.bytes_copied,
            job.objects_copied
        );
        self.fire(&self.on_complete, &job);

        Ok(job)
    }

    /// Move a running job to Failed and record the error.
    pub fn fail_backup(&self, job_id: &str, error: impl Into<String>) -> Result<BackupJob> {
        let job = {
            let mut jobs = self.jobs.write();
            let job = jobs
                .get_mut(job_id)
                .ok_or_else(|| BackupError::JobNotFound(job_id.to_string()))?;

            if job.status.is_terminal() {
                return Err(BackupError::InvalidState(format!(
                    "job {} is already {:?}",
                    job_id, job.status
                )));
            }

            job.status = JobStatus::Failed;
            job.completed_at = Some(Utc::now());
            job.error = Some(error.into());
            job.clone()
        };

        tracing::warn!(
            "Backup job {} failed: {}",
            job.id,
            job.error.as_deref().unwrap_or("unknown")
        );
        self.fire(&self.on_failed, &job);

        Ok(job)
    }

    /// Cross-check a completed job's copied counts against its recorded
    /// totals.
    pub fn verify_backup(&self, job_id: &str) -> Result<BackupResult> {
        let job = self
            .get_job(job_id)
            .ok_or_else(|| BackupError::JobNotFound(job_id.to_string()))?;

        if job.status != JobStatus::Completed {
            return Err(BackupError::InvalidState(format!(
                "job {} is {:?}; only Completed jobs can be verified",
                job_id, job.status
            )));
        }

        let verified =
            job.bytes_copied == job.bytes_total && job.objects_copied == job.objects_total;

        Ok(BackupResult {
            job_id: job.id,
            verified,
            bytes_match: job.bytes_copied,
            objects_match: job.objects_copied,
            verified_at: Utc::now(),
        })
    }

    /// Get a job by id.
    pub fn get_job(&self, job_id: &str) -> Option<BackupJob> {
        self.jobs.read().get(job_id).cloned()
    }

    /// All jobs, newest first.
    pub fn list_jobs(&self) -> Vec<BackupJob> {
        let mut jobs: Vec<BackupJob> = self.jobs.read().values().cloned().collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        jobs
    }

    /// Jobs for a named config, newest first.
    pub fn jobs_for_config(&self, config_name: &str) -> Vec<BackupJob> {
        let mut jobs: Vec<BackupJob> = self
            .jobs
            .read()
            .values()
            .filter(|j| j.config_name == config_name)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        jobs
    }

    /// Aggregate statistics across all jobs. Copied bytes/objects are
    /// summed over Completed jobs only.
    pub fn get_stats(&self) -> BackupStats {
        let jobs = self.jobs.read();
        let mut stats = BackupStats {
            total_jobs: jobs.len(),
            ..BackupStats::default()
        };

        for job in jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => {
                    stats.completed += 1;
                    stats.bytes_copied += job.bytes_copied;
                    stats.objects_copied += job.objects_copied;
                }
                JobStatus::Failed => stats.failed += 1,
            }
        }

        stats
    }

    /// Set the callback fired when a job starts.
    pub fn on_start(&self, callback: JobCallback) {
        *self.on_start.write() = Some(callback);
    }

    /// Set the callback fired when a job completes.
    pub fn on_complete(&self, callback: JobCallback) {
        *self.on_complete.write() = Some(callback);
    }

    /// Set the callback fired when a job fails.
    pub fn on_failed(&self, callback: JobCallback) {
        *self.on_failed.write() = Some(callback);
    }

    fn fire(&self, slot: &RwLock<Option<JobCallback>>, job: &BackupJob) {
        let callback = slot.read().clone();
        if let Some(callback) = callback {
            callback(job);
        }
    }

    // Nanosecond seed plus an atomic counter: two starts within the same
    // nanosecond still get distinct ids.
    fn next_job_id(&self) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let seq = self.job_seq.fetch_add(1, Ordering::SeqCst);
        format!("backup-{}-{}", nanos, seq)
    }
}

impl Default for BackupManager {
    fn default() -> Self {
        Self::new()
    }
}
