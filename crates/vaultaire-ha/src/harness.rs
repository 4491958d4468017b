//! Scripted failover scenarios: inject faults, verify the orchestrator's
//! reaction, and measure recovery time.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::HealthState;
use crate::health::HealthOrchestrator;

/// Kind of failure a scenario injects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Hard-down target: failures until the threshold trips.
    Complete,
    /// Alternating failures and successes that stay below the threshold.
    Partial,
    /// Failures reported as network timeouts.
    Network,
    /// Successful probes with pathological latency.
    Latency,
    /// Several targets failed one after another.
    Cascading,
    /// Fail/recover flapping that must not trip the breaker.
    Intermittent,
}

/// One scripted scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverScenario {
    pub name: String,
    pub kind: FailureKind,
    /// Backends the injector afflicts, in order.
    pub targets: Vec<String>,
    /// Expected post-injection state of the first target, if asserted.
    pub expect_state: Option<HealthState>,
    /// Expected active backend for the first target, if asserted.
    pub expect_failover_to: Option<String>,
    /// Injected latency for `Latency` scenarios.
    pub injected_latency: Duration,
    /// Bound on how long the harness waits for expectations.
    pub timeout: Duration,
}

impl FailoverScenario {
    /// A scenario with no expectations and a one second timeout.
    pub fn new(name: impl Into<String>, kind: FailureKind, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            targets: vec![target.into()],
            expect_state: None,
            expect_failover_to: None,
            injected_latency: Duration::from_secs(3),
            timeout: Duration::from_secs(1),
        }
    }

    /// Assert the first target ends in `state`.
    pub fn expect_state(mut self, state: HealthState) -> Self {
        self.expect_state = Some(state);
        self
    }

    /// Assert traffic for the first target moves to `backend`.
    pub fn expect_failover_to(mut self, backend: impl Into<String>) -> Self {
        self.expect_failover_to = Some(backend.into());
        self
    }

    /// Afflict additional targets (for cascading scenarios).
    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.targets = targets;
        self
    }

    /// Override the expectation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Outcome of one scenario run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario: String,
    pub kind: FailureKind,
    pub passed: bool,
    /// Time from first injection to the observed failover, when one was
    /// expected and observed.
    pub measured_rto: Option<Duration>,
    pub observed_state: Option<HealthState>,
    pub failures: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Aggregate over a batch of scenarios.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<ScenarioResult>,
}

/// Drives scripted failure scenarios against a health orchestrator.
pub struct FailoverHarness {
    orchestrator: Arc<HealthOrchestrator>,
    results: RwLock<Vec<ScenarioResult>>,
}

impl FailoverHarness {
    /// Create a harness over an orchestrator.
    pub fn new(orchestrator: Arc<HealthOrchestrator>) -> Self {
        Self {
            orchestrator,
            results: RwLock::new(Vec::new()),
        }
    }

    /// Run one scenario to completion and record its result.
    pub async fn run_scenario(&self, scenario: FailoverScenario) -> ScenarioResult {
        tracing::info!("Running failover scenario {}", scenario.name);
        let started_at = Utc::now();
        let injection_start = Instant::now();
        let mut failures = Vec::new();

        self.inject(&scenario);

        let mut measured_rto = None;
        if let Some(expected) = &scenario.expect_failover_to {
            let primary = scenario.targets.first().cloned().unwrap_or_default();
            if self
                .wait_until(scenario.timeout, || {
                    self.orchestrator.get_active_backend(&primary) == *expected
                })
                .await
            {
                measured_rto = Some(injection_start.elapsed());
            } else {
                failures.push(format!(
                    "active backend for {} is {}, expected {}",
                    primary,
                    self.orchestrator.get_active_backend(&primary),
                    expected
                ));
            }
        }

        let observed_state = scenario
            .targets
            .first()
            .map(|t| self.orchestrator.backend_state(t));
        if let Some(expected) = scenario.expect_state {
            let primary = scenario.targets.first().cloned().unwrap_or_default();
            if !self
                .wait_until(scenario.timeout, || {
                    self.orchestrator.backend_state(&primary) == expected
                })
                .await
            {
                failures.push(format!(
                    "backend {} is {:?}, expected {:?}",
                    primary,
                    self.orchestrator.backend_state(&primary),
                    expected
                ));
            }
        }

        let result = ScenarioResult {
            scenario: scenario.name.clone(),
            kind: scenario.kind,
            passed: failures.is_empty(),
            measured_rto,
            observed_state: scenario
                .targets
                .first()
                .map(|t| self.orchestrator.backend_state(t))
                .or(observed_state),
            failures,
            started_at,
            completed_at: Utc::now(),
        };

        if result.passed {
            tracing::info!("Scenario {} passed", result.scenario);
        } else {
            tracing::warn!(
                "Scenario {} failed: {}",
                result.scenario,
                result.failures.join("; ")
            );
        }

        self.results.write().push(result.clone());
        result
    }

    /// Run a batch of scenarios in order.
    pub async fn run_all(&self, scenarios: Vec<FailoverScenario>) -> HarnessReport {
        for scenario in scenarios {
            self.run_scenario(scenario).await;
        }
        self.report()
    }

    /// Report over every scenario run so far.
    pub fn report(&self) -> HarnessReport {
        let results = self.results.read().clone();
        let passed = results.iter().filter(|r| r.passed).count();
        HarnessReport {
            total: results.len(),
            passed,
            failed: results.len() - passed,
            results,
        }
    }

    fn inject(&self, scenario: &FailoverScenario) {
        match scenario.kind {
            FailureKind::Complete => {
                for target in &scenario.targets {
                    self.fail_until_threshold(target, "backend unreachable");
                }
            }
            FailureKind::Network => {
                for target in &scenario.targets {
                    self.fail_until_threshold(target, "connection timed out");
                }
            }
            FailureKind::Cascading => {
                // Same injection as Complete, but the order is the point:
                // each target collapses before the next is touched.
                for target in &scenario.targets {
                    self.fail_until_threshold(target, "backend unreachable");
                }
            }
            FailureKind::Partial => {
                for target in &scenario.targets {
                    let threshold = self.failure_threshold(target);
                    for _ in 0..threshold.saturating_sub(1) {
                        self.orchestrator.report_health_check(
                            target,
                            false,
                            Duration::ZERO,
                            Some("intermittent 5xx".into()),
                        );
                    }
                }
            }
            FailureKind::Latency => {
                for target in &scenario.targets {
                    for _ in 0..3 {
                        self.orchestrator.report_health_check(
                            target,
                            true,
                            scenario.injected_latency,
                            None,
                        );
                    }
                }
            }
            FailureKind::Intermittent => {
                for target in &scenario.targets {
                    let threshold = self.failure_threshold(target);
                    for _ in 0..threshold {
                        self.orchestrator.report_health_check(
                            target,
                            false,
                            Duration::ZERO,
                            Some("flapping".into()),
                        );
                        self.orchestrator.report_health_check(
                            target,
                            true,
                            Duration::from_millis(5),
                            None,
                        );
                    }
                }
            }
        }
    }

    fn fail_until_threshold(&self, target: &str, error: &str) {
        let threshold = self.failure_threshold(target);
        for _ in 0..threshold {
            self.orchestrator.report_health_check(
                target,
                false,
                Duration::ZERO,
                Some(error.to_string()),
            );
        }
    }

    fn failure_threshold(&self, target: &str) -> u32 {
        self.orchestrator
            .get_backend_status(target)
            .map(|s| s.config.failure_threshold)
            .unwrap_or(3)
    }

    async fn wait_until<F>(&self, timeout: Duration, condition: F) -> bool
    where
        F: Fn() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if condition() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
