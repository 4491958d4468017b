//! Backend identity, configuration, and shared health-state types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Health state shared by backends and regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Serving normally.
    Healthy,
    /// Operational but showing consecutive failures below the threshold.
    Degraded,
    /// Past the failure threshold; excluded from traffic.
    Failed,
    /// Back from Failed, accumulating successes toward recovery.
    Recovering,
    /// Never probed, or no longer tracked.
    Unknown,
}

impl HealthState {
    /// String form used in logs and exports.
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Failed => "failed",
            HealthState::Recovering => "recovering",
            HealthState::Unknown => "unknown",
        }
    }

    /// Whether the state is eligible for any traffic at all.
    pub fn can_serve(&self) -> bool {
        matches!(
            self,
            HealthState::Healthy | HealthState::Degraded | HealthState::Recovering
        )
    }
}

/// Per-backend health-tracking configuration. Immutable after registration;
/// zero-valued thresholds fall back to platform defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub primary: bool,
    /// Consecutive failures that move a backend to Failed.
    pub failure_threshold: u32,
    /// Consecutive successes that move a Recovering backend to Healthy.
    pub recovery_threshold: u32,
    pub circuit_breaker_enabled: bool,
    /// Probe cadence used by the polling loop.
    pub check_interval: Duration,
}

impl BackendConfig {
    /// Return a copy with platform defaults applied to zero-valued fields.
    pub fn normalized(&self) -> Self {
        let mut config = self.clone();
        if config.failure_threshold == 0 {
            config.failure_threshold = 3;
        }
        if config.recovery_threshold == 0 {
            config.recovery_threshold = 2;
        }
        if config.check_interval.is_zero() {
            config.check_interval = Duration::from_secs(10);
        }
        config
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            primary: false,
            failure_threshold: 3,
            recovery_threshold: 2,
            circuit_breaker_enabled: true,
            check_interval: Duration::from_secs(10),
        }
    }
}

/// Live status of a tracked backend. Mutated only by the health
/// orchestrator; callers receive defensive copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendStatus {
    pub id: String,
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub latency: Duration,
    pub circuit_open: bool,
    pub config: BackendConfig,
}

impl BackendStatus {
    /// Fresh status for a newly registered backend.
    pub fn new(id: impl Into<String>, config: BackendConfig) -> Self {
        Self {
            id: id.into(),
            state: HealthState::Healthy,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_check: None,
            last_error: None,
            latency: Duration::ZERO,
            circuit_open: false,
            config: config.normalized(),
        }
    }
}

/// Automatic failover rule for a primary backend. At most one per primary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverRule {
    pub secondary_backend_id: String,
    pub auto_failover: bool,
    /// Grace period before the failover task re-validates and switches.
    pub failover_delay: Duration,
}

/// Aggregate system status across all backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemStatus {
    /// Every backend is Healthy.
    Healthy,
    /// At least one backend is not Healthy, but some still are.
    Degraded,
    /// No backend is Healthy.
    Critical,
}

impl SystemStatus {
    /// String form used in logs and exports.
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemStatus::Healthy => "healthy",
            SystemStatus::Degraded => "degraded",
            SystemStatus::Critical => "critical",
        }
    }
}

/// Result of one health probe, as supplied by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub healthy: bool,
    pub latency: Duration,
    pub error: Option<String>,
}

impl ProbeOutcome {
    /// A successful probe with the given latency.
    pub fn up(latency: Duration) -> Self {
        Self {
            healthy: true,
            latency,
            error: None,
        }
    }

    /// A failed probe with an error description.
    pub fn down(error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            latency: Duration::ZERO,
            error: Some(error.into()),
        }
    }
}

/// Host-supplied health probe. Timeouts and retries are the host's concern.
#[async_trait::async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe one backend and report the outcome.
    async fn probe(&self, backend_id: &str) -> ProbeOutcome;
}
