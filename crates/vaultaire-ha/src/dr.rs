//! Region-scope disaster-recovery orchestration.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use vaultaire_backup::BackupManager;

use crate::backend::HealthState;
use crate::error::{HaError, Result};
use crate::event::{EventBus, EventHandler, HaEvent, HaEventType};
use crate::region::RegionRegistry;

/// Disaster-recovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrConfig {
    /// Consecutive bad ticks before an automatic region failover.
    pub failover_threshold: u32,
    pub failover_delay: Duration,
    pub auto_failover: bool,
    pub recovery_delay: Duration,
    pub health_check_period: Duration,
    /// Attempt a backup of the failing region before switching away.
    pub backup_before_failover: bool,
}

impl Default for DrConfig {
    fn default() -> Self {
        Self {
            failover_threshold: 3,
            failover_delay: Duration::from_secs(30),
            auto_failover: true,
            recovery_delay: Duration::from_secs(5 * 60),
            health_check_period: Duration::from_secs(10),
            backup_before_failover: true,
        }
    }
}

/// Disaster-recovery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrStatus {
    Normal,
    Alert,
    Failover,
    Recovering,
}

impl DrStatus {
    /// String form used in logs and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            DrStatus::Normal => "normal",
            DrStatus::Alert => "alert",
            DrStatus::Failover => "failover",
            DrStatus::Recovering => "recovering",
        }
    }
}

/// Derived snapshot of DR state. Never stored durably.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrStatusReport {
    pub status: DrStatus,
    pub active_region: String,
    pub region_health: HashMap<String, HealthState>,
    pub failure_counts: HashMap<String, u32>,
    pub last_event: Option<HaEvent>,
}

/// Escalates region health degradation through Normal -> Alert ->
/// Failover -> Recovering -> Normal, coordinating the region registry and
/// the backup manager.
pub struct DrOrchestrator {
    config: DrConfig,
    regions: Arc<RegionRegistry>,
    backups: Option<Arc<BackupManager>>,
    status: Arc<RwLock<DrStatus>>,
    active_region: Arc<RwLock<String>>,
    failure_counts: Arc<RwLock<HashMap<String, u32>>>,
    events: EventBus,
    cancel: CancellationToken,
}

impl DrOrchestrator {
    /// Create an orchestrator with `active_region` as the starting point.
    /// Must be called inside a Tokio runtime.
    pub fn new(
        config: DrConfig,
        regions: Arc<RegionRegistry>,
        active_region: &str,
    ) -> Result<Self> {
        if regions.get_region(active_region).is_none() {
            return Err(HaError::RegionNotFound(active_region.to_string()));
        }

        Ok(Self {
            config,
            regions,
            backups: None,
            status: Arc::new(RwLock::new(DrStatus::Normal)),
            active_region: Arc::new(RwLock::new(active_region.to_string())),
            failure_counts: Arc::new(RwLock::new(HashMap::new())),
            events: EventBus::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Wire in a backup manager for pre-failover backups.
    pub fn with_backup_manager(mut self, backups: Arc<BackupManager>) -> Self {
        self.backups = Some(backups);
        self
    }

    /// Start the periodic health loop.
    pub fn start(&self) {
        let orchestrator = self.clone();
        let cancel = self.cancel.clone();
        let period = self.config.health_check_period;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                orchestrator.check_health();
            }
        });
    }

    /// Stop the health loop at its next tick.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// One evaluation of the active region's health. The loop calls this
    /// every `health_check_period`; tests and operators may drive it
    /// directly.
    pub fn check_health(&self) {
        let active = self.active_region.read().clone();
        let health = self
            .regions
            .get_region(&active)
            .map(|r| r.health)
            .unwrap_or(HealthState::Unknown);
        let status = *self.status.read();

        match (health, status) {
            (HealthState::Healthy, DrStatus::Recovering) => {
                self.complete_recovery(&active);
            }
            (HealthState::Healthy, _) => {
                self.failure_counts.write().insert(active, 0);
            }
            (HealthState::Degraded, DrStatus::Normal) => {
                *self.status.write() = DrStatus::Alert;
                tracing::warn!("Region {} degraded, entering alert", active);
                self.events.emit(HaEvent::new(
                    HaEventType::RegionDown,
                    &active,
                    format!("region {} degraded", active),
                ));
            }
            (HealthState::Degraded, DrStatus::Alert) => {
                self.bump_failure_count(&active);
            }
            (HealthState::Failed, _) => {
                let count = self.bump_failure_count(&active);
                if count >= self.config.failover_threshold && self.config.auto_failover {
                    if let Err(e) = self.run_failover(&active, None) {
                        tracing::error!("Automatic region failover failed: {}", e);
                    }
                }
            }
            _ => {}
        }
    }

    /// Operator-initiated failover away from the active region, optionally
    /// to a named target. Rejected when the target is unknown, already
    /// active, or Failed; no state changes persist on rejection.
    pub fn force_failover(&self, target: Option<&str>) -> Result<String> {
        let from = self.active_region.read().clone();

        if let Some(target) = target {
            let region = self
                .regions
                .get_region(target)
                .ok_or_else(|| HaError::RegionNotFound(target.to_string()))?;
            if target == from {
                return Err(HaError::Precondition(format!(
                    "target region {} is already active",
                    target
                )));
            }
            if region.health == HealthState::Failed {
                return Err(HaError::Precondition(format!(
                    "target region {} is Failed",
                    target
                )));
            }
        }

        self.run_failover(&from, target)
    }

    /// Begin recovery toward a target region. Valid only from Failover or
    /// Alert, and only toward a currently Healthy region; completion is
    /// driven by subsequent healthy ticks of that region.
    pub fn initiate_recovery(&self, target: &str) -> Result<()> {
        let status = *self.status.read();
        if !matches!(status, DrStatus::Failover | DrStatus::Alert) {
            return Err(HaError::Precondition(format!(
                "recovery requires Failover or Alert status (current: {})",
                status.as_str()
            )));
        }

        let region = self
            .regions
            .get_region(target)
            .ok_or_else(|| HaError::RegionNotFound(target.to_string()))?;
        if region.health != HealthState::Healthy {
            return Err(HaError::Precondition(format!(
                "target region {} is not Healthy",
                target
            )));
        }

        *self.status.write() = DrStatus::Recovering;
        *self.active_region.write() = target.to_string();
        self.failure_counts.write().insert(target.to_string(), 0);

        tracing::info!("Recovery initiated toward region {}", target);
        self.events.emit(HaEvent::new(
            HaEventType::RecoveryStarted,
            target,
            format!("recovery initiated toward region {}", target),
        ));
        Ok(())
    }

    /// The region currently serving traffic.
    pub fn get_active_region(&self) -> String {
        self.active_region.read().clone()
    }

    /// Current DR status.
    pub fn status(&self) -> DrStatus {
        *self.status.read()
    }

    /// Derived snapshot of the DR state.
    pub fn status_report(&self) -> DrStatusReport {
        let region_health = self
            .regions
            .list_regions()
            .into_iter()
            .map(|r| (r.id, r.health))
            .collect();

        DrStatusReport {
            status: *self.status.read(),
            active_region: self.active_region.read().clone(),
            region_health,
            failure_counts: self.failure_counts.read().clone(),
            last_event: self.events.recent_events(1).pop(),
        }
    }

    /// Register an event handler.
    pub fn subscribe(&self, handler: EventHandler) {
        self.events.subscribe(handler);
    }

    /// The most recent events, oldest first.
    pub fn recent_events(&self, limit: usize) -> Vec<HaEvent> {
        self.events.recent_events(limit)
    }

    fn bump_failure_count(&self, region: &str) -> u32 {
        let mut counts = self.failure_counts.write();
        let count = counts.entry(region.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    // The failover sequence: enter Failover, best-effort backup, repoint
    // the registry and the active region, announce from/to.
    fn run_failover(&self, from: &str, target: Option<&str>) -> Result<String> {
        let to = match target {
            Some(target) => target.to_string(),
            None => self.regions.failover_candidate(from).ok_or_else(|| {
                HaError::Failover("no region available to fail over to".to_string())
            })?,
        };

        *self.status.write() = DrStatus::Failover;

        if self.config.backup_before_failover {
            if let Some(backups) = &self.backups {
                self.events.emit(HaEvent::new(
                    HaEventType::BackupStarted,
                    from,
                    format!("pre-failover backup of region {}", from),
                ));
                for config in backups.list_configs() {
                    if config.source_region == from {
                        if let Err(e) = backups.start_backup(&config.name) {
                            tracing::warn!(
                                "Pre-failover backup {} skipped: {}",
                                config.name,
                                e
                            );
                        }
                    }
                }
            }
        }

        self.regions.set_region_health(from, HealthState::Failed)?;
        *self.active_region.write() = to.clone();

        tracing::warn!("Region failover: {} -> {}", from, to);
        self.events.emit(
            HaEvent::new(
                HaEventType::FailoverCompleted,
                from,
                format!("region failover from {} to {} completed", from, to),
            )
            .with_detail("from", from)
            .with_detail("to", to.clone()),
        );

        Ok(to)
    }

    fn complete_recovery(&self, region: &str) {
        if let Err(e) = self.regions.recover_region(region) {
            tracing::error!("Recovery of region {} failed: {}", region, e);
            return;
        }

        *self.status.write() = DrStatus::Normal;
        self.failure_counts.write().insert(region.to_string(), 0);

        tracing::info!("Recovery of region {} completed", region);
        self.events.emit(HaEvent::new(
            HaEventType::RecoveryCompleted,
            region,
            format!("recovery of region {} completed", region),
        ));
    }
}

impl Clone for DrOrchestrator {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            regions: Arc::clone(&self.regions),
            backups: self.backups.clone(),
            status: Arc::clone(&self.status),
            active_region: Arc::clone(&self.active_region),
            failure_counts: Arc::clone(&self.failure_counts),
            events: self.events.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultaire_backup::{BackupConfig, JobStatus};

    fn orchestrator(threshold: u32) -> DrOrchestrator {
        let regions = Arc::new(RegionRegistry::with_defaults());
        DrOrchestrator::new(
            DrConfig {
                failover_threshold: threshold,
                ..DrConfig::default()
            },
            regions,
            "nyc",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_new_requires_known_region() {
        let regions = Arc::new(RegionRegistry::with_defaults());
        assert!(matches!(
            DrOrchestrator::new(DrConfig::default(), regions, "mars"),
            Err(HaError::RegionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_auto_failover_after_threshold() {
        let dr = orchestrator(2);
        dr.regions
            .set_region_health("nyc", HealthState::Failed)
            .unwrap();

        dr.check_health();
        assert_eq!(dr.get_active_region(), "nyc");
        assert_eq!(dr.status(), DrStatus::Normal);

        dr.check_health();
        assert_eq!(dr.get_active_region(), "la");
        assert_eq!(dr.status(), DrStatus::Failover);

        let completed: Vec<HaEvent> = dr
            .recent_events(10)
            .into_iter()
            .filter(|e| e.event_type == HaEventType::FailoverCompleted)
            .collect();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].details.get("from").unwrap(), "nyc");
        assert_eq!(completed[0].details.get("to").unwrap(), "la");
    }

    #[tokio::test]
    async fn test_degraded_escalates_to_alert() {
        let dr = orchestrator(3);
        dr.regions
            .set_region_health("nyc", HealthState::Degraded)
            .unwrap();

        dr.check_health();
        assert_eq!(dr.status(), DrStatus::Alert);
        assert!(dr
            .recent_events(10)
            .iter()
            .any(|e| e.event_type == HaEventType::RegionDown));

        // Subsequent degraded ticks only accumulate the count.
        dr.check_health();
        dr.check_health();
        assert_eq!(dr.status(), DrStatus::Alert);
        assert_eq!(dr.status_report().failure_counts.get("nyc"), Some(&2));
    }

    #[tokio::test]
    async fn test_status_report_serializes() {
        let dr = orchestrator(3);
        dr.regions
            .set_region_health("nyc", HealthState::Degraded)
            .unwrap();
        dr.check_health();

        let report = dr.status_report();
        assert_eq!(report.status, DrStatus::Alert);
        assert_eq!(report.active_region, "nyc");
        assert_eq!(report.region_health.get("la"), Some(&HealthState::Healthy));

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"alert\""));
    }

    #[tokio::test]
    async fn test_healthy_tick_resets_count() {
        let dr = orchestrator(3);
        dr.regions
            .set_region_health("nyc", HealthState::Degraded)
            .unwrap();
        dr.check_health();
        dr.check_health();

        dr.regions
            .set_region_health("nyc", HealthState::Healthy)
            .unwrap();
        dr.check_health();
        assert_eq!(dr.status_report().failure_counts.get("nyc"), Some(&0));
    }

    #[tokio::test]
    async fn test_force_failover_rejects_failed_target() {
        let dr = orchestrator(3);
        dr.regions
            .set_region_health("la", HealthState::Failed)
            .unwrap();

        let err = dr.force_failover(Some("la")).unwrap_err();
        assert!(matches!(err, HaError::Precondition(_)));
        // No partial state changes on rejection.
        assert_eq!(dr.status(), DrStatus::Normal);
        assert_eq!(dr.get_active_region(), "nyc");
    }

    #[tokio::test]
    async fn test_force_failover_to_degraded_target_is_permitted() {
        let dr = orchestrator(3);
        dr.regions
            .set_region_health("la", HealthState::Degraded)
            .unwrap();

        let to = dr.force_failover(Some("la")).unwrap();
        assert_eq!(to, "la");
        assert_eq!(dr.status(), DrStatus::Failover);
    }

    #[tokio::test]
    async fn test_recovery_cycle() {
        let dr = orchestrator(1);
        dr.regions
            .set_region_health("nyc", HealthState::Failed)
            .unwrap();
        dr.check_health();
        assert_eq!(dr.get_active_region(), "la");

        // Recovery toward a still-failed region is rejected.
        assert!(matches!(
            dr.initiate_recovery("nyc"),
            Err(HaError::Precondition(_))
        ));

        // The region comes back; the operator initiates recovery.
        dr.regions
            .set_region_health("nyc", HealthState::Healthy)
            .unwrap();
        dr.initiate_recovery("nyc").unwrap();
        assert_eq!(dr.status(), DrStatus::Recovering);
        assert_eq!(dr.get_active_region(), "nyc");

        // The next healthy tick completes recovery.
        dr.check_health();
        assert_eq!(dr.status(), DrStatus::Normal);
        assert!(dr
            .recent_events(10)
            .iter()
            .any(|e| e.event_type == HaEventType::RecoveryCompleted));
    }

    #[tokio::test]
    async fn test_initiate_recovery_requires_failover_or_alert() {
        let dr = orchestrator(3);
        assert!(matches!(
            dr.initiate_recovery("la"),
            Err(HaError::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn test_backup_before_failover() {
        let regions = Arc::new(RegionRegistry::with_defaults());
        let backups = Arc::new(BackupManager::new());
        backups
            .add_config(BackupConfig::daily_full("nyc", "la"))
            .unwrap();

        let dr = DrOrchestrator::new(
            DrConfig {
                failover_threshold: 1,
                ..DrConfig::default()
            },
            Arc::clone(&regions),
            "nyc",
        )
        .unwrap()
        .with_backup_manager(Arc::clone(&backups));

        regions.set_region_health("nyc", HealthState::Failed).unwrap();
        dr.check_health();

        assert_eq!(dr.get_active_region(), "la");
        assert!(dr
            .recent_events(10)
            .iter()
            .any(|e| e.event_type == HaEventType::BackupStarted));

        let jobs = backups.jobs_for_config("daily-full");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_backup_failure_does_not_block_failover() {
        let regions = Arc::new(RegionRegistry::with_defaults());
        // The gate sees nyc as Failed, so the pre-failover backup errors.
        let backups = Arc::new(BackupManager::with_region_gate(
            Arc::clone(&regions) as Arc<dyn vaultaire_backup::RegionGate>
        ));
        backups
            .add_config(BackupConfig::daily_full("nyc", "la"))
            .unwrap();

        let dr = DrOrchestrator::new(
            DrConfig {
                failover_threshold: 1,
                ..DrConfig::default()
            },
            Arc::clone(&regions),
            "nyc",
        )
        .unwrap()
        .with_backup_manager(Arc::clone(&backups));

        regions.set_region_health("nyc", HealthState::Failed).unwrap();
        dr.check_health();

        assert_eq!(dr.get_active_region(), "la");
        assert_eq!(dr.status(), DrStatus::Failover);
        assert!(backups.jobs_for_config("daily-full").is_empty());
    }

    #[tokio::test]
    async fn test_periodic_loop_drives_failover() {
        let regions = Arc::new(RegionRegistry::with_defaults());
        let dr = DrOrchestrator::new(
            DrConfig {
                failover_threshold: 2,
                health_check_period: Duration::from_millis(10),
                ..DrConfig::default()
            },
            Arc::clone(&regions),
            "nyc",
        )
        .unwrap();

        dr.start();
        regions.set_region_health("nyc", HealthState::Failed).unwrap();

        let mut switched = false;
        for _ in 0..50 {
            if dr.get_active_region() == "la" {
                switched = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        dr.stop();
        assert!(switched, "loop never performed the failover");
    }
}
