//! Recovery-objective tracking: incidents, RTO/RPO compliance, SLA reports.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{BackupError, Result};

/// Predefined service tiers with recovery objectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceTier {
    /// RTO 1 minute, RPO 30 seconds.
    Critical,
    /// RTO 15 minutes, RPO 5 minutes.
    Standard,
    /// RTO 4 hours, RPO 1 hour.
    BestEffort,
}

impl ServiceTier {
    /// The (RTO, RPO) pair for this tier.
    pub fn objectives(&self) -> (Duration, Duration) {
        match self {
            ServiceTier::Critical => (Duration::from_secs(60), Duration::from_secs(30)),
            ServiceTier::Standard => (Duration::from_secs(15 * 60), Duration::from_secs(5 * 60)),
            ServiceTier::BestEffort => {
                (Duration::from_secs(4 * 3600), Duration::from_secs(3600))
            }
        }
    }
}

/// Recovery objectives for a subject (a backend or a region).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtoRpoConfig {
    pub rto: Duration,
    pub rpo: Duration,
    pub tier: ServiceTier,
    /// Fraction of the RTO after which an active incident is flagged
    /// at-risk. Must be in (0, 1].
    pub alert_threshold: f64,
}

impl RtoRpoConfig {
    /// Build a config from a tier's predefined objectives.
    pub fn for_tier(tier: ServiceTier) -> Self {
        let (rto, rpo) = tier.objectives();
        Self {
            rto,
            rpo,
            tier,
            alert_threshold: 0.8,
        }
    }

    /// Validate the objectives: both positive, RPO no larger than RTO,
    /// alert threshold in (0, 1].
    pub fn validate(&self) -> Result<()> {
        if self.rto.is_zero() {
            return Err(BackupError::Configuration("RTO must be positive".into()));
        }
        if self.rpo.is_zero() {
            return Err(BackupError::Configuration("RPO must be positive".into()));
        }
        if self.rpo > self.rto {
            return Err(BackupError::Configuration(
                "RPO must not exceed RTO".into(),
            ));
        }
        if self.alert_threshold <= 0.0 || self.alert_threshold > 1.0 {
            return Err(BackupError::Configuration(
                "alert threshold must be in (0, 1]".into(),
            ));
        }
        Ok(())
    }
}

impl Default for RtoRpoConfig {
    fn default() -> Self {
        Self::for_tier(ServiceTier::Standard)
    }
}

/// An open incident being timed against its subject's RTO.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub subject: String,
    pub started_at: DateTime<Utc>,
}

/// The immutable record of a resolved incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryResult {
    pub incident_id: String,
    pub subject: String,
    pub actual_rto: Duration,
    pub actual_rpo: Duration,
    pub rto_met: bool,
    pub rpo_met: bool,
    pub timestamp: DateTime<Utc>,
}

/// A recovery observed elsewhere (e.g. by the health orchestrator), with
/// its own failure and recovery times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryEvent {
    pub incident_id: String,
    pub subject: String,
    pub failure_time: DateTime<Utc>,
    pub recovery_time: DateTime<Utc>,
    pub data_loss: Duration,
}

/// Tracker health derived from active incidents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectiveHealth {
    Healthy,
    Warning,
    Critical,
}

/// Snapshot of active-incident standing against objectives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerStatus {
    pub status: ObjectiveHealth,
    pub rto_at_risk: bool,
    pub rto_breached: bool,
    pub at_risk_incidents: Vec<String>,
    pub breached_incidents: Vec<String>,
    pub active_incidents: usize,
}

/// Aggregate compliance metrics over the recovery history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtoRpoMetrics {
    pub total_incidents: usize,
    pub rto_compliant: usize,
    pub rpo_compliant: usize,
    /// Percentage; 100 when the history is empty.
    pub rto_compliance_rate: f64,
    /// Percentage; 100 when the history is empty.
    pub rpo_compliance_rate: f64,
    pub average_rto: Duration,
    pub average_rpo: Duration,
    pub worst_rto: Duration,
    pub worst_rpo: Duration,
}

/// SLA report over a time range of the recovery history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaReport {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub total_incidents: usize,
    pub rto_compliant: usize,
    pub rpo_compliant: usize,
    pub rto_compliance_rate: f64,
    pub rpo_compliance_rate: f64,
    pub average_rto: Duration,
    pub average_rpo: Duration,
}

/// Tracks incidents against recovery objectives and keeps an append-only
/// history of recovery results.
pub struct RtoRpoTracker {
    config: RtoRpoConfig,
    overrides: RwLock<HashMap<String, RtoRpoConfig>>,
    active: RwLock<HashMap<String, Incident>>,
    history: RwLock<Vec<RecoveryResult>>,
}

impl RtoRpoTracker {
    /// Create a tracker with the given default objectives.
    pub fn new(config: RtoRpoConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            overrides: RwLock::new(HashMap::new()),
            active: RwLock::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
        })
    }

    /// Override the objectives for one subject.
    pub fn set_override(&self, subject: impl Into<String>, config: RtoRpoConfig) -> Result<()> {
        config.validate()?;
        self.overrides.write().insert(subject.into(), config);
        Ok(())
    }

    /// The objectives in force for a subject.
    pub fn objectives_for(&self, subject: &str) -> RtoRpoConfig {
        self.overrides
            .read()
            .get(subject)
            .cloned()
            .unwrap_or_else(|| self.config.clone())
    }

    /// Open an incident. Re-starting an existing id overwrites it.
    pub fn start_incident(
        &self,
        id: impl Into<String>,
        subject: impl Into<String>,
        failure_time: DateTime<Utc>,
    ) {
        let incident = Incident {
            id: id.into(),
            subject: subject.into(),
            started_at: failure_time,
        };
        tracing::warn!(
            "Incident {} opened for {} at {}",
            incident.id,
            incident.subject,
            incident.started_at
        );
        self.active.write().insert(incident.id.clone(), incident);
    }

    /// Close an incident: the recovery time is now, the data-loss window
    /// is supplied by the caller.
    pub fn resolve_incident(&self, id: &str, data_loss: Duration) -> Result<RecoveryResult> {
        let incident = self
            .active
            .write()
            .remove(id)
            .ok_or_else(|| BackupError::IncidentNotFound(id.to_string()))?;

        let now = Utc::now();
        let actual_rto = (now - incident.started_at).to_std().unwrap_or_default();
        let objectives = self.objectives_for(&incident.subject);

        let result = RecoveryResult {
            incident_id: incident.id,
            subject: incident.subject,
            actual_rto,
            actual_rpo: data_loss,
            rto_met: actual_rto <= objectives.rto,
            rpo_met: data_loss <= objectives.rpo,
            timestamp: now,
        };

        if !result.rto_met || !result.rpo_met {
            tracing::warn!(
                "Objectives missed for incident {}: RTO {:?} (target {:?}), RPO {:?} (target {:?})",
                result.incident_id,
                result.actual_rto,
                objectives.rto,
                result.actual_rpo,
                objectives.rpo
            );
        }

        self.history.write().push(result.clone());
        Ok(result)
    }

    /// Record a recovery observed elsewhere. The event's own recovery time
    /// becomes the history timestamp, which is what SLA report filtering
    /// keys on.
    pub fn record_recovery(&self, event: RecoveryEvent) -> RecoveryResult {
        let actual_rto = (event.recovery_time - event.failure_time)
            .to_std()
            .unwrap_or_default();
        let objectives = self.objectives_for(&event.subject);

        let result = RecoveryResult {
            incident_id: event.incident_id,
            subject: event.subject,
            actual_rto,
            actual_rpo: event.data_loss,
            rto_met: actual_rto <= objectives.rto,
            rpo_met: event.data_loss <= objectives.rpo,
            timestamp: event.recovery_time,
        };

        self.active.write().remove(&result.incident_id);
        self.history.write().push(result.clone());
        result
    }

    /// Walk active incidents and grade them against their RTO targets.
    pub fn check_status(&self) -> TrackerStatus {
        let now = Utc::now();
        let active = self.active.read();

        let mut at_risk = Vec::new();
        let mut breached = Vec::new();

        for incident in active.values() {
            let elapsed = (now - incident.started_at).to_std().unwrap_or_default();
            let objectives = self.objectives_for(&incident.subject);

            if elapsed > objectives.rto {
                breached.push(incident.id.clone());
            } else if elapsed > objectives.rto.mul_f64(objectives.alert_threshold) {
                at_risk.push(incident.id.clone());
            }
        }

        let status = if !breached.is_empty() {
            ObjectiveHealth::Critical
        } else if !at_risk.is_empty() {
            ObjectiveHealth::Warning
        } else {
            ObjectiveHealth::Healthy
        };

        TrackerStatus {
            status,
            rto_at_risk: !at_risk.is_empty(),
            rto_breached: !breached.is_empty(),
            at_risk_incidents: at_risk,
            breached_incidents: breached,
            active_incidents: active.len(),
        }
    }

    /// Aggregate the full history into compliance metrics.
    pub fn get_metrics(&self) -> RtoRpoMetrics {
        let history = self.history.read();
        Self::aggregate(&history)
    }

    /// Recompute compliance over the history entries whose timestamp falls
    /// in `[start, end]`.
    pub fn generate_sla_report(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> SlaReport {
        let history = self.history.read();
        let filtered: Vec<RecoveryResult> = history
            .iter()
            .filter(|r| r.timestamp >= start && r.timestamp <= end)
            .cloned()
            .collect();

        let metrics = Self::aggregate(&filtered);

        SlaReport {
            start,
            end,
            total_incidents: metrics.total_incidents,
            rto_compliant: metrics.rto_compliant,
            rpo_compliant: metrics.rpo_compliant,
            rto_compliance_rate: metrics.rto_compliance_rate,
            rpo_compliance_rate: metrics.rpo_compliance_rate,
            average_rto: metrics.average_rto,
            average_rpo: metrics.average_rpo,
        }
    }

    /// Snapshot of currently active incidents.
    pub fn active_incidents(&self) -> Vec<Incident> {
        self.active.read().values().cloned().collect()
    }

    /// Snapshot of the recovery history, oldest first.
    pub fn history(&self) -> Vec<RecoveryResult> {
        self.history.read().clone()
    }

    fn aggregate(results: &[RecoveryResult]) -> RtoRpoMetrics {
        let total = results.len();
        let rto_compliant = results.iter().filter(|r| r.rto_met).count();
        let rpo_compliant = results.iter().filter(|r| r.rpo_met).count();

        let (rto_rate, rpo_rate) = if total == 0 {
            (100.0, 100.0)
        } else {
            (
                rto_compliant as f64 / total as f64 * 100.0,
                rpo_compliant as f64 / total as f64 * 100.0,
            )
        };

        let (average_rto, average_rpo) = if total == 0 {
            (Duration::ZERO, Duration::ZERO)
        } else {
            let rto_sum: Duration = results.iter().map(|r| r.actual_rto).sum();
            let rpo_sum: Duration = results.iter().map(|r| r.actual_rpo).sum();
            (rto_sum / total as u32, rpo_sum / total as u32)
        };

        RtoRpoMetrics {
            total_incidents: total,
            rto_compliant,
            rpo_compliant,
            rto_compliance_rate: rto_rate,
            rpo_compliance_rate: rpo_rate,
            average_rto,
            average_rpo,
            worst_rto: results
                .iter()
                .map(|r| r.actual_rto)
                .max()
                .unwrap_or(Duration::ZERO),
            worst_rpo: results
                .iter()
                .map(|r| r.actual_rpo)
                .max()
                .unwrap_or(Duration::ZERO),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn tracker(rto_secs: u64, rpo_secs: u64) -> RtoRpoTracker {
        RtoRpoTracker::new(RtoRpoConfig {
            rto: Duration::from_secs(rto_secs),
            rpo: Duration::from_secs(rpo_secs),
            tier: ServiceTier::Standard,
            alert_threshold: 0.8,
        })
        .unwrap()
    }

    #[test]
    fn test_config_validation() {
        let mut config = RtoRpoConfig::for_tier(ServiceTier::Critical);
        assert!(config.validate().is_ok());

        config.rto = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = RtoRpoConfig::for_tier(ServiceTier::Critical);
        config.rpo = config.rto + Duration::from_secs(1);
        assert!(config.validate().is_err());

        let mut config = RtoRpoConfig::for_tier(ServiceTier::Critical);
        config.alert_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tier_objectives() {
        assert_eq!(
            ServiceTier::Critical.objectives(),
            (Duration::from_secs(60), Duration::from_secs(30))
        );
        assert_eq!(
            ServiceTier::Standard.objectives(),
            (Duration::from_secs(900), Duration::from_secs(300))
        );
        assert_eq!(
            ServiceTier::BestEffort.objectives(),
            (Duration::from_secs(14400), Duration::from_secs(3600))
        );
    }

    #[test]
    fn test_rto_breach_detection() {
        let tracker = tracker(300, 60);

        // Incident opened ten minutes ago against a five-minute RTO.
        tracker.start_incident(
            "inc-1",
            "backend-a",
            Utc::now() - ChronoDuration::minutes(10),
        );

        let status = tracker.check_status();
        assert_eq!(status.status, ObjectiveHealth::Critical);
        assert!(status.rto_breached);
        assert_eq!(status.breached_incidents, vec!["inc-1".to_string()]);

        let result = tracker.resolve_incident("inc-1", Duration::from_secs(30)).unwrap();
        assert!(!result.rto_met);
        assert!(result.rpo_met);
        assert!(tracker.active_incidents().is_empty());
    }

    #[test]
    fn test_at_risk_warning() {
        let tracker = tracker(600, 60);

        // 9 of 10 minutes elapsed: past the 80% threshold, not yet breached.
        tracker.start_incident(
            "inc-warn",
            "backend-a",
            Utc::now() - ChronoDuration::minutes(9),
        );

        let status = tracker.check_status();
        assert_eq!(status.status, ObjectiveHealth::Warning);
        assert!(status.rto_at_risk);
        assert!(!status.rto_breached);
    }

    #[test]
    fn test_restart_overwrites_incident() {
        let tracker = tracker(300, 60);
        tracker.start_incident("inc-1", "a", Utc::now() - ChronoDuration::minutes(10));
        tracker.start_incident("inc-1", "a", Utc::now());

        let status = tracker.check_status();
        assert_eq!(status.active_incidents, 1);
        assert_eq!(status.status, ObjectiveHealth::Healthy);
    }

    #[test]
    fn test_resolve_unknown_incident() {
        let tracker = tracker(300, 60);
        assert!(matches!(
            tracker.resolve_incident("missing", Duration::ZERO),
            Err(BackupError::IncidentNotFound(_))
        ));
    }

    #[test]
    fn test_metrics_empty_history_is_fully_compliant() {
        let tracker = tracker(300, 60);
        let metrics = tracker.get_metrics();
        assert_eq!(metrics.total_incidents, 0);
        assert_eq!(metrics.rto_compliance_rate, 100.0);
        assert_eq!(metrics.rpo_compliance_rate, 100.0);
    }

    #[test]
    fn test_metrics_aggregation() {
        let tracker = tracker(300, 60);
        let now = Utc::now();

        tracker.record_recovery(RecoveryEvent {
            incident_id: "fast".into(),
            subject: "a".into(),
            failure_time: now - ChronoDuration::seconds(100),
            recovery_time: now,
            data_loss: Duration::from_secs(10),
        });
        tracker.record_recovery(RecoveryEvent {
            incident_id: "slow".into(),
            subject: "a".into(),
            failure_time: now - ChronoDuration::seconds(400),
            recovery_time: now,
            data_loss: Duration::from_secs(90),
        });

        let metrics = tracker.get_metrics();
        assert_eq!(metrics.total_incidents, 2);
        assert_eq!(metrics.rto_compliant, 1);
        assert_eq!(metrics.rpo_compliant, 1);
        assert_eq!(metrics.rto_compliance_rate, 50.0);
        assert_eq!(metrics.worst_rto, Duration::from_secs(400));
        assert_eq!(metrics.worst_rpo, Duration::from_secs(90));
    }

    #[test]
    fn test_sla_report_filters_by_recovery_time() {
        let tracker = tracker(300, 60);
        let now = Utc::now();

        // One recovery last week, one today.
        tracker.record_recovery(RecoveryEvent {
            incident_id: "old".into(),
            subject: "a".into(),
            failure_time: now - ChronoDuration::days(7) - ChronoDuration::seconds(60),
            recovery_time: now - ChronoDuration::days(7),
            data_loss: Duration::from_secs(5),
        });
        tracker.record_recovery(RecoveryEvent {
            incident_id: "new".into(),
            subject: "a".into(),
            failure_time: now - ChronoDuration::seconds(60),
            recovery_time: now,
            data_loss: Duration::from_secs(5),
        });

        let report = tracker.generate_sla_report(now - ChronoDuration::days(1), now);
        assert_eq!(report.total_incidents, 1);
        assert_eq!(report.rto_compliance_rate, 100.0);

        let report = tracker.generate_sla_report(now - ChronoDuration::days(30), now);
        assert_eq!(report.total_incidents, 2);
    }

    #[test]
    fn test_per_subject_override() {
        let tracker = tracker(300, 60);
        tracker
            .set_override("tight", RtoRpoConfig::for_tier(ServiceTier::Critical))
            .unwrap();

        let now = Utc::now();
        let result = tracker.record_recovery(RecoveryEvent {
            incident_id: "inc".into(),
            subject: "tight".into(),
            failure_time: now - ChronoDuration::seconds(120),
            recovery_time: now,
            data_loss: Duration::from_secs(10),
        });

        // 120s recovery breaches the Critical tier's 60s RTO but would
        // have met the tracker-wide 300s default.
        assert!(!result.rto_met);
        assert!(result.rpo_met);
    }

    #[test]
    fn test_history_is_append_only() {
        let tracker = tracker(300, 60);
        tracker.start_incident("inc-1", "a", Utc::now());
        tracker.resolve_incident("inc-1", Duration::ZERO).unwrap();
        tracker.start_incident("inc-2", "a", Utc::now());
        tracker.resolve_incident("inc-2", Duration::ZERO).unwrap();

        let history = tracker.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].incident_id, "inc-1");
        assert_eq!(history[1].incident_id, "inc-2");
        assert_eq!(tracker.get_metrics().total_incidents, 2);
    }
}
