//! Backend health orchestration: per-backend state machine, event emission,
//! and automatic primary-to-secondary failover.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::backend::{
    BackendConfig, BackendStatus, FailoverRule, HealthProbe, HealthState, SystemStatus,
};
use crate::error::{HaError, Result};
use crate::event::{EventBus, EventHandler, HaEvent, HaEventType};

/// Translates per-backend probe results into stable health states.
///
/// State transitions are serialised per backend under one write lock; the
/// lock is released before events are emitted or callbacks run. The
/// circuit-breaker flag is advisory and is set/cleared only inside the
/// state-machine critical section, so it is always consistent with the
/// state.
pub struct HealthOrchestrator {
    backends: Arc<RwLock<HashMap<String, BackendStatus>>>,
    failover_rules: Arc<RwLock<HashMap<String, FailoverRule>>>,
    active_backends: Arc<RwLock<HashMap<String, String>>>,
    events: EventBus,
    cancel: CancellationToken,
}

impl HealthOrchestrator {
    /// Create an orchestrator. Must be called inside a Tokio runtime (the
    /// event bus spawns its dispatcher).
    pub fn new() -> Self {
        Self {
            backends: Arc::new(RwLock::new(HashMap::new())),
            failover_rules: Arc::new(RwLock::new(HashMap::new())),
            active_backends: Arc::new(RwLock::new(HashMap::new())),
            events: EventBus::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Register a backend. Fails on a duplicate id; the initial state is
    /// Healthy.
    pub fn register_backend(&self, id: &str, config: BackendConfig) -> Result<()> {
        {
            let mut backends = self.backends.write();
            if backends.contains_key(id) {
                return Err(HaError::DuplicateBackend(id.to_string()));
            }
            backends.insert(id.to_string(), BackendStatus::new(id, config));
        }

        tracing::info!("Registered backend {}", id);
        self.events.emit(HaEvent::new(
            HaEventType::BackendRegistered,
            id,
            format!("backend {} registered", id),
        ));
        Ok(())
    }

    /// Remove a backend along with its failover rule and active mapping.
    pub fn unregister_backend(&self, id: &str) -> Result<()> {
        {
            let mut backends = self.backends.write();
            if backends.remove(id).is_none() {
                return Err(HaError::BackendNotFound(id.to_string()));
            }
        }
        self.failover_rules.write().remove(id);
        self.active_backends.write().remove(id);

        tracing::info!("Unregistered backend {}", id);
        self.events.emit(HaEvent::new(
            HaEventType::BackendUnregistered,
            id,
            format!("backend {} unregistered", id),
        ));
        Ok(())
    }

    /// Store a failover rule for a primary backend. At most one rule per
    /// primary; a second call replaces the first.
    pub fn configure_failover(&self, primary_id: &str, rule: FailoverRule) {
        self.failover_rules
            .write()
            .insert(primary_id.to_string(), rule);
    }

    /// Feed one health-check result into the state machine.
    ///
    /// Unknown backend ids are a silent no-op. Repeated results that do not
    /// change the state emit no events.
    pub fn report_health_check(
        &self,
        id: &str,
        healthy: bool,
        latency: Duration,
        error: Option<String>,
    ) {
        let mut emitted: Vec<HaEvent> = Vec::new();
        let mut trigger_failover = false;

        {
            let mut backends = self.backends.write();
            let status = match backends.get_mut(id) {
                Some(status) => status,
                None => return,
            };

            status.last_check = Some(Utc::now());
            status.latency = latency;

            if healthy {
                status.consecutive_successes += 1;
                status.consecutive_failures = 0;
                status.last_error = None;

                if status.state == HealthState::Failed {
                    status.state = HealthState::Recovering;
                    // A backend answering probes again is no longer
                    // do-not-probe; the flag never outlives Failed.
                    status.circuit_open = false;
                    emitted.push(HaEvent::new(
                        HaEventType::BackendRecovering,
                        id,
                        format!("backend {} responding again, entering recovery", id),
                    ));
                }

                if status.state == HealthState::Recovering
                    && status.consecutive_successes >= status.config.recovery_threshold
                {
                    status.state = HealthState::Healthy;
                    emitted.push(HaEvent::new(
                        HaEventType::BackendRecovered,
                        id,
                        format!("backend {} recovered", id),
                    ));
                } else if matches!(status.state, HealthState::Degraded | HealthState::Unknown) {
                    // Success outside a recovery cycle returns the backend
                    // to Healthy without an event.
                    status.state = HealthState::Healthy;
                }
            } else {
                status.consecutive_failures += 1;
                status.consecutive_successes = 0;
                status.last_error = error;

                let threshold = status.config.failure_threshold;
                if status.state != HealthState::Failed {
                    if status.consecutive_failures >= threshold {
                        status.state = HealthState::Failed;
                        emitted.push(
                            HaEvent::new(
                                HaEventType::BackendFailed,
                                id,
                                format!(
                                    "backend {} failed after {} consecutive failures",
                                    id, status.consecutive_failures
                                ),
                            )
                            .with_detail(
                                "error",
                                status.last_error.clone().unwrap_or_default(),
                            ),
                        );
                        if status.config.circuit_breaker_enabled {
                            status.circuit_open = true;
                            emitted.push(HaEvent::new(
                                HaEventType::CircuitOpened,
                                id,
                                format!("circuit opened for backend {}", id),
                            ));
                        }
                        trigger_failover = true;
                    } else if status.state == HealthState::Healthy {
                        // Any sub-threshold failure leaves Healthy at
                        // once; Healthy never carries a failure count.
                        status.state = HealthState::Degraded;
                        emitted.push(HaEvent::new(
                            HaEventType::BackendDegraded,
                            id,
                            format!("backend {} degraded", id),
                        ));
                    }
                }
            }
        }

        for event in emitted {
            self.events.emit(event);
        }

        if trigger_failover {
            let rule = self.failover_rules.read().get(id).cloned();
            if let Some(rule) = rule {
                if rule.auto_failover {
                    self.spawn_failover(id, rule);
                }
            }
        }
    }

    // Delayed failover: wait out the grace period, re-validate that the
    // primary is still Failed and the secondary is usable, then swap the
    // active mapping. Aborts on shutdown.
    fn spawn_failover(&self, primary_id: &str, rule: FailoverRule) {
        let primary = primary_id.to_string();
        let backends = Arc::clone(&self.backends);
        let active_backends = Arc::clone(&self.active_backends);
        let events = self.events.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(rule.failover_delay) => {}
            }

            {
                let backends = backends.read();
                match backends.get(&primary) {
                    Some(status) if status.state == HealthState::Failed => {}
                    // Recovered (or gone) during the grace period.
                    _ => return,
                }
                match backends.get(&rule.secondary_backend_id) {
                    Some(status) if status.state != HealthState::Failed => {}
                    _ => {
                        tracing::warn!(
                            "Skipping failover for {}: secondary {} unavailable",
                            primary,
                            rule.secondary_backend_id
                        );
                        return;
                    }
                }
            }

            events.emit(
                HaEvent::new(
                    HaEventType::FailoverStarted,
                    &primary,
                    format!(
                        "failing over {} to {}",
                        primary, rule.secondary_backend_id
                    ),
                )
                .with_detail("to", rule.secondary_backend_id.clone()),
            );

            active_backends
                .write()
                .insert(primary.clone(), rule.secondary_backend_id.clone());

            tracing::info!(
                "Failover completed: {} now served by {}",
                primary,
                rule.secondary_backend_id
            );
            events.emit(
                HaEvent::new(
                    HaEventType::FailoverCompleted,
                    &primary,
                    format!(
                        "failover of {} to {} completed",
                        primary, rule.secondary_backend_id
                    ),
                )
                .with_detail("from", primary.clone())
                .with_detail("to", rule.secondary_backend_id.clone()),
            );
        });
    }

    /// Defensive copy of a backend's status.
    pub fn get_backend_status(&self, id: &str) -> Option<BackendStatus> {
        self.backends.read().get(id).cloned()
    }

    /// A backend's current state; Unknown when it is not tracked.
    pub fn backend_state(&self, id: &str) -> HealthState {
        self.backends
            .read()
            .get(id)
            .map(|status| status.state)
            .unwrap_or(HealthState::Unknown)
    }

    /// The backend currently serving a logical id: the id itself, or the
    /// secondary it was redirected to by a failover.
    pub fn get_active_backend(&self, logical_id: &str) -> String {
        self.active_backends
            .read()
            .get(logical_id)
            .cloned()
            .unwrap_or_else(|| logical_id.to_string())
    }

    /// Ids of backends in state Healthy or Recovering, sorted.
    pub fn get_healthy_backends(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .backends
            .read()
            .values()
            .filter(|s| matches!(s.state, HealthState::Healthy | HealthState::Recovering))
            .map(|s| s.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Ids of backends eligible for any traffic (Healthy, Degraded, or
    /// Recovering), sorted. The load balancer selects from this set.
    pub fn get_available_backends(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .backends
            .read()
            .values()
            .filter(|s| s.state.can_serve())
            .map(|s| s.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Snapshot of every tracked backend.
    pub fn all_statuses(&self) -> Vec<BackendStatus> {
        self.backends.read().values().cloned().collect()
    }

    /// Aggregate status: Healthy iff all backends are Healthy, Critical
    /// iff none are, Degraded otherwise. An empty registry is Healthy.
    pub fn get_system_status(&self) -> SystemStatus {
        let backends = self.backends.read();
        if backends.is_empty() {
            return SystemStatus::Healthy;
        }

        let healthy = backends
            .values()
            .filter(|s| s.state == HealthState::Healthy)
            .count();

        if healthy == backends.len() {
            SystemStatus::Healthy
        } else if healthy == 0 {
            SystemStatus::Critical
        } else {
            SystemStatus::Degraded
        }
    }

    /// Register an event handler. Handlers run on the dispatcher task and
    /// never block health reporting.
    pub fn subscribe(&self, handler: EventHandler) {
        self.events.subscribe(handler);
    }

    /// The most recent events, oldest first.
    pub fn recent_events(&self, limit: usize) -> Vec<HaEvent> {
        self.events.recent_events(limit)
    }

    /// Whether a backend's advisory circuit-breaker flag is set.
    pub fn is_circuit_open(&self, id: &str) -> bool {
        self.backends
            .read()
            .get(id)
            .map(|s| s.circuit_open)
            .unwrap_or(false)
    }

    /// Drive the state machine from a host-supplied probe. One polling
    /// task probes each backend on its own `check_interval`; it stops on
    /// `stop()`.
    pub fn start_probe_loop(&self, probe: Arc<dyn HealthProbe>) {
        let orchestrator = self.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(200));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let due: Vec<String> = {
                    let backends = orchestrator.backends.read();
                    backends
                        .values()
                        .filter(|s| match s.last_check {
                            None => true,
                            Some(checked) => {
                                (Utc::now() - checked).to_std().unwrap_or_default()
                                    >= s.config.check_interval
                            }
                        })
                        .map(|s| s.id.clone())
                        .collect()
                };

                for id in due {
                    let outcome = probe.probe(&id).await;
                    orchestrator.report_health_check(
                        &id,
                        outcome.healthy,
                        outcome.latency,
                        outcome.error,
                    );
                }
            }
        });
    }

    /// Stop background tasks and abort in-flight delayed failovers.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Default for HealthOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for HealthOrchestrator {
    fn clone(&self) -> Self {
        Self {
            backends: Arc::clone(&self.backends),
            failover_rules: Arc::clone(&self.failover_rules),
            active_backends: Arc::clone(&self.active_backends),
            events: self.events.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(failure_threshold: u32, recovery_threshold: u32) -> BackendConfig {
        BackendConfig {
            failure_threshold,
            recovery_threshold,
            ..BackendConfig::default()
        }
    }

    fn fail(orchestrator: &HealthOrchestrator, id: &str, times: u32) {
        for _ in 0..times {
            orchestrator.report_health_check(id, false, Duration::ZERO, Some("refused".into()));
        }
    }

    fn succeed(orchestrator: &HealthOrchestrator, id: &str, times: u32) {
        for _ in 0..times {
            orchestrator.report_health_check(id, true, Duration::from_millis(5), None);
        }
    }

    #[tokio::test]
    async fn test_duplicate_registration_fails() {
        let orchestrator = HealthOrchestrator::new();
        orchestrator
            .register_backend("b1", BackendConfig::default())
            .unwrap();
        assert!(matches!(
            orchestrator.register_backend("b1", BackendConfig::default()),
            Err(HaError::DuplicateBackend(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_backend_report_is_noop() {
        let orchestrator = HealthOrchestrator::new();
        orchestrator.report_health_check("ghost", false, Duration::ZERO, None);
        assert_eq!(orchestrator.backend_state("ghost"), HealthState::Unknown);
        assert!(orchestrator.recent_events(10).is_empty());
    }

    #[tokio::test]
    async fn test_degraded_then_failed() {
        let orchestrator = HealthOrchestrator::new();
        orchestrator.register_backend("b1", config(2, 2)).unwrap();

        fail(&orchestrator, "b1", 1);
        assert_eq!(orchestrator.backend_state("b1"), HealthState::Degraded);

        fail(&orchestrator, "b1", 1);
        let status = orchestrator.get_backend_status("b1").unwrap();
        assert_eq!(status.state, HealthState::Failed);
        // Failed implies the failure threshold was reached.
        assert!(status.consecutive_failures >= status.config.failure_threshold);
        assert!(status.circuit_open);

        let types: Vec<HaEventType> = orchestrator
            .recent_events(10)
            .iter()
            .map(|e| e.event_type)
            .collect();
        assert!(types.contains(&HaEventType::BackendDegraded));
        assert!(types.contains(&HaEventType::BackendFailed));
        assert!(types.contains(&HaEventType::CircuitOpened));
    }

    #[tokio::test]
    async fn test_first_failure_degrades_immediately() {
        let orchestrator = HealthOrchestrator::new();
        orchestrator.register_backend("b1", config(3, 2)).unwrap();

        fail(&orchestrator, "b1", 1);
        let status = orchestrator.get_backend_status("b1").unwrap();
        assert_eq!(status.state, HealthState::Degraded);
        assert_eq!(status.consecutive_failures, 1);

        // Further sub-threshold failures keep the state without new events.
        let events_before = orchestrator.recent_events(100).len();
        fail(&orchestrator, "b1", 1);
        assert_eq!(orchestrator.backend_state("b1"), HealthState::Degraded);
        assert_eq!(orchestrator.recent_events(100).len(), events_before);

        fail(&orchestrator, "b1", 1);
        assert_eq!(orchestrator.backend_state("b1"), HealthState::Failed);
    }

    #[tokio::test]
    async fn test_failed_stays_failed_without_new_events() {
        let orchestrator = HealthOrchestrator::new();
        orchestrator.register_backend("b1", config(2, 2)).unwrap();

        fail(&orchestrator, "b1", 2);
        let events_before = orchestrator.recent_events(100).len();

        fail(&orchestrator, "b1", 3);
        assert_eq!(orchestrator.backend_state("b1"), HealthState::Failed);
        assert_eq!(orchestrator.recent_events(100).len(), events_before);
    }

    #[tokio::test]
    async fn test_recovery_cycle() {
        let orchestrator = HealthOrchestrator::new();
        orchestrator.register_backend("b1", config(2, 2)).unwrap();

        fail(&orchestrator, "b1", 2);
        assert!(orchestrator.is_circuit_open("b1"));

        succeed(&orchestrator, "b1", 1);
        assert_eq!(orchestrator.backend_state("b1"), HealthState::Recovering);
        // The breaker clears as soon as the backend answers probes again.
        assert!(!orchestrator.is_circuit_open("b1"));

        succeed(&orchestrator, "b1", 1);
        let status = orchestrator.get_backend_status("b1").unwrap();
        assert_eq!(status.state, HealthState::Healthy);
        // Healthy implies the failure counter is reset.
        assert_eq!(status.consecutive_failures, 0);
        assert!(!status.circuit_open);
    }

    #[tokio::test]
    async fn test_failure_during_recovery_reverts_to_failed() {
        let orchestrator = HealthOrchestrator::new();
        orchestrator.register_backend("b1", config(2, 3)).unwrap();

        fail(&orchestrator, "b1", 2);
        succeed(&orchestrator, "b1", 1);
        assert_eq!(orchestrator.backend_state("b1"), HealthState::Recovering);

        fail(&orchestrator, "b1", 2);
        assert_eq!(orchestrator.backend_state("b1"), HealthState::Failed);
    }

    #[tokio::test]
    async fn test_degraded_success_returns_to_healthy_silently() {
        let orchestrator = HealthOrchestrator::new();
        orchestrator.register_backend("b1", config(3, 2)).unwrap();

        fail(&orchestrator, "b1", 2);
        assert_eq!(orchestrator.backend_state("b1"), HealthState::Degraded);
        let events_before = orchestrator.recent_events(100).len();

        succeed(&orchestrator, "b1", 1);
        let status = orchestrator.get_backend_status("b1").unwrap();
        assert_eq!(status.state, HealthState::Healthy);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(orchestrator.recent_events(100).len(), events_before);
    }

    #[tokio::test]
    async fn test_circuit_stays_closed_when_breaker_disabled() {
        let orchestrator = HealthOrchestrator::new();
        orchestrator
            .register_backend(
                "b1",
                BackendConfig {
                    circuit_breaker_enabled: false,
                    ..config(2, 2)
                },
            )
            .unwrap();

        fail(&orchestrator, "b1", 2);
        assert_eq!(orchestrator.backend_state("b1"), HealthState::Failed);
        // The flag only ever follows an enabled breaker.
        assert!(!orchestrator.is_circuit_open("b1"));
    }

    #[tokio::test]
    async fn test_automatic_failover() {
        let orchestrator = HealthOrchestrator::new();
        orchestrator.register_backend("primary", config(2, 2)).unwrap();
        orchestrator
            .register_backend("secondary", config(2, 2))
            .unwrap();
        orchestrator.configure_failover(
            "primary",
            FailoverRule {
                secondary_backend_id: "secondary".into(),
                auto_failover: true,
                failover_delay: Duration::from_millis(10),
            },
        );

        fail(&orchestrator, "primary", 2);

        let mut redirected = false;
        for _ in 0..20 {
            if orchestrator.get_active_backend("primary") == "secondary" {
                redirected = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(redirected, "failover did not complete within 100ms");

        let types: Vec<HaEventType> = orchestrator
            .recent_events(20)
            .iter()
            .map(|e| e.event_type)
            .collect();
        let started = types
            .iter()
            .position(|t| *t == HaEventType::FailoverStarted)
            .expect("FailoverStarted missing");
        let completed = types
            .iter()
            .position(|t| *t == HaEventType::FailoverCompleted)
            .expect("FailoverCompleted missing");
        assert!(started < completed);
    }

    #[tokio::test]
    async fn test_failover_aborts_if_primary_recovers_in_grace_period() {
        let orchestrator = HealthOrchestrator::new();
        orchestrator.register_backend("primary", config(2, 1)).unwrap();
        orchestrator
            .register_backend("secondary", config(2, 2))
            .unwrap();
        orchestrator.configure_failover(
            "primary",
            FailoverRule {
                secondary_backend_id: "secondary".into(),
                auto_failover: true,
                failover_delay: Duration::from_millis(50),
            },
        );

        fail(&orchestrator, "primary", 2);
        // Recover before the grace period elapses.
        succeed(&orchestrator, "primary", 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(orchestrator.get_active_backend("primary"), "primary");
    }

    #[tokio::test]
    async fn test_failover_skipped_when_secondary_failed() {
        let orchestrator = HealthOrchestrator::new();
        orchestrator.register_backend("primary", config(2, 2)).unwrap();
        orchestrator
            .register_backend("secondary", config(2, 2))
            .unwrap();
        orchestrator.configure_failover(
            "primary",
            FailoverRule {
                secondary_backend_id: "secondary".into(),
                auto_failover: true,
                failover_delay: Duration::from_millis(10),
            },
        );

        fail(&orchestrator, "secondary", 2);
        fail(&orchestrator, "primary", 2);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(orchestrator.get_active_backend("primary"), "primary");
    }

    #[tokio::test]
    async fn test_system_status() {
        let orchestrator = HealthOrchestrator::new();
        assert_eq!(orchestrator.get_system_status(), SystemStatus::Healthy);

        orchestrator.register_backend("a", config(2, 2)).unwrap();
        orchestrator.register_backend("b", config(2, 2)).unwrap();
        assert_eq!(orchestrator.get_system_status(), SystemStatus::Healthy);

        fail(&orchestrator, "a", 2);
        assert_eq!(orchestrator.get_system_status(), SystemStatus::Degraded);

        fail(&orchestrator, "b", 2);
        assert_eq!(orchestrator.get_system_status(), SystemStatus::Critical);
    }

    #[tokio::test]
    async fn test_healthy_set_includes_recovering() {
        let orchestrator = HealthOrchestrator::new();
        orchestrator.register_backend("a", config(2, 3)).unwrap();
        orchestrator.register_backend("b", config(2, 2)).unwrap();

        fail(&orchestrator, "a", 2);
        assert_eq!(orchestrator.get_healthy_backends(), vec!["b".to_string()]);

        succeed(&orchestrator, "a", 1);
        // The healthy set is exactly the Healthy and Recovering ids.
        assert_eq!(
            orchestrator.get_healthy_backends(),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unregister_clears_state() {
        let orchestrator = HealthOrchestrator::new();
        orchestrator.register_backend("b1", config(2, 2)).unwrap();
        orchestrator.unregister_backend("b1").unwrap();

        assert_eq!(orchestrator.backend_state("b1"), HealthState::Unknown);
        assert!(matches!(
            orchestrator.unregister_backend("b1"),
            Err(HaError::BackendNotFound(_))
        ));
    }

    struct FlakyProbe;

    #[async_trait::async_trait]
    impl HealthProbe for FlakyProbe {
        async fn probe(&self, _backend_id: &str) -> crate::backend::ProbeOutcome {
            crate::backend::ProbeOutcome::down("connection refused")
        }
    }

    #[tokio::test]
    async fn test_probe_loop_feeds_state_machine() {
        let orchestrator = HealthOrchestrator::new();
        orchestrator
            .register_backend(
                "b1",
                BackendConfig {
                    check_interval: Duration::from_millis(50),
                    ..config(2, 2)
                },
            )
            .unwrap();

        orchestrator.start_probe_loop(Arc::new(FlakyProbe));

        let mut failed = false;
        for _ in 0..40 {
            if orchestrator.backend_state("b1") == HealthState::Failed {
                failed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        orchestrator.stop();
        assert!(failed, "probe loop never drove the backend to Failed");
    }
}
