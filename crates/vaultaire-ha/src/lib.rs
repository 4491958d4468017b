//! # Vaultaire HA
//!
//! High-availability control plane for the Vaultaire storage platform.
//!
//! ## Features
//!
//! - **Health Orchestration**: Per-backend state machine (Healthy /
//!   Degraded / Failed / Recovering / Unknown) driven by host-supplied
//!   probes, with consecutive-failure thresholds and an advisory circuit
//!   breaker
//! - **Automatic Failover**: Delayed, re-validated primary-to-secondary
//!   redirection with event emission
//! - **Health-Aware Load Balancing**: Round-robin or weighted-random base
//!   balancing with state-driven effective weights
//! - **Geographic Redundancy**: Region registry with tiers, affinity rules,
//!   and replication policies
//! - **Disaster Recovery**: Region-scope escalation Normal -> Alert ->
//!   Failover -> Recovering -> Normal, with pre-failover backups
//! - **Failover Test Harness**: Scripted fault injection with verified
//!   outcomes and measured RTO
//!
//! ## Architecture
//!
//! - `backend`: backend identity, configuration, and health-state types
//! - `health`: the health orchestrator and its state machine
//! - `balancer`: base and health-aware load balancers
//! - `region`: region registry, affinity, and replication policy
//! - `dr`: the disaster-recovery orchestrator
//! - `event`: event payloads, bounded history, and subscriber fan-out
//! - `harness`: scripted failover scenarios
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use vaultaire_ha::{BackendConfig, FailoverRule, HealthOrchestrator};
//!
//! # async fn example() -> vaultaire_ha::Result<()> {
//! let orchestrator = HealthOrchestrator::new();
//! orchestrator.register_backend("s3-nyc", BackendConfig::default())?;
//! orchestrator.register_backend("s3-la", BackendConfig::default())?;
//! orchestrator.configure_failover(
//!     "s3-nyc",
//!     FailoverRule {
//!         secondary_backend_id: "s3-la".into(),
//!         auto_failover: true,
//!         failover_delay: Duration::from_secs(30),
//!     },
//! );
//!
//! orchestrator.report_health_check("s3-nyc", true, Duration::from_millis(12), None);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(dead_code)]

pub mod backend;
pub mod balancer;
pub mod dr;
pub mod error;
pub mod event;
pub mod harness;
pub mod health;
pub mod region;

// Re-export main types for convenience
pub use backend::{
    BackendConfig, BackendStatus, FailoverRule, HealthProbe, HealthState, ProbeOutcome,
    SystemStatus,
};
pub use balancer::{weight_multiplier, BalancerStrategy, BaseBalancer, HealthAwareBalancer};
pub use dr::{DrConfig, DrOrchestrator, DrStatus, DrStatusReport};
pub use error::{HaError, Result};
pub use event::{EventBus, EventHandler, HaEvent, HaEventType, EVENT_HISTORY_LIMIT};
pub use harness::{FailoverHarness, FailoverScenario, FailureKind, HarnessReport, ScenarioResult};
pub use health::HealthOrchestrator;
pub use region::{
    AffinityRule, Region, RegionRegistry, RegionTier, ReplicationMode, ReplicationPolicy,
};

/// Version information for the HA control plane.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
