//! Monitoring types: snapshots, alerts, and thresholds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use vaultaire_backup::ObjectiveHealth;
use vaultaire_ha::HealthState;

/// Alert severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// What an alert is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Too large a fraction of backends is Failed.
    BackendFailure,
    /// Observed latency above the configured ceiling.
    HighLatency,
}

/// An alert raised during metric collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub details: HashMap<String, String>,
}

impl Alert {
    /// Build an alert stamped with the current time.
    pub fn new(kind: AlertKind, severity: AlertSeverity, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity,
            message: message.into(),
            timestamp: Utc::now(),
            details: HashMap::new(),
        }
    }

    /// Attach a detail key/value pair.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Alerting thresholds evaluated on each collection tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorThresholds {
    /// Failed-backend percentage at which a critical alert fires.
    pub failed_backend_percent: f64,
    /// Latency ceiling above which a warning fires.
    pub max_latency: Duration,
    /// Error-rate percentage ceiling.
    pub error_rate_percent: f64,
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self {
            failed_backend_percent: 30.0,
            max_latency: Duration::from_secs(2),
            error_rate_percent: 5.0,
        }
    }
}

/// Monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Collection cadence.
    pub collect_interval: Duration,
    /// Snapshots older than this are dropped by the cleanup pass.
    pub retention_period: Duration,
    pub thresholds: MonitorThresholds,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            collect_interval: Duration::from_secs(10),
            retention_period: Duration::from_secs(7 * 24 * 3600),
            thresholds: MonitorThresholds::default(),
        }
    }
}

/// Per-region data inside a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionSnapshot {
    pub health: HealthState,
    pub latency: Duration,
    pub active: bool,
}

/// One collected view of the HA plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub timestamp: DateTime<Utc>,
    pub total_backends: usize,
    pub healthy_backends: usize,
    pub degraded_backends: usize,
    pub failed_backends: usize,
    pub recovering_backends: usize,
    pub unknown_backends: usize,
    /// Max latency over backends with a positive measurement.
    pub max_latency: Duration,
    /// Average latency over backends with a positive measurement.
    pub avg_latency: Duration,
    pub system_status: String,
    pub regions: HashMap<String, RegionSnapshot>,
    /// Recovery-objective standing, when a tracker is wired in.
    pub objective_health: Option<ObjectiveHealth>,
}
