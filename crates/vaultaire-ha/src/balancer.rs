//! Weighted load balancing with health-aware effective weights.

use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::backend::HealthState;
use crate::error::{HaError, Result};
use crate::health::HealthOrchestrator;

/// Base balancing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalancerStrategy {
    /// Cycle through backends with non-zero weight.
    RoundRobin,
    /// Sample backends with probability proportional to weight.
    WeightedRandom,
}

#[derive(Debug, Clone)]
struct WeightedBackend {
    id: String,
    weight: f64,
}

/// Weight-driven backend selector. Knows nothing about health; the
/// health-aware wrapper keeps the weights current.
pub struct BaseBalancer {
    strategy: BalancerStrategy,
    backends: RwLock<Vec<WeightedBackend>>,
    cursor: AtomicUsize,
}

impl BaseBalancer {
    /// Create an empty balancer.
    pub fn new(strategy: BalancerStrategy) -> Self {
        Self {
            strategy,
            backends: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Add a backend with the given weight. Re-adding an id replaces its
    /// weight.
    pub fn add_backend(&self, id: impl Into<String>, weight: f64) {
        let id = id.into();
        let mut backends = self.backends.write();
        if let Some(backend) = backends.iter_mut().find(|b| b.id == id) {
            backend.weight = weight;
        } else {
            backends.push(WeightedBackend { id, weight });
        }
    }

    /// Remove a backend.
    pub fn remove_backend(&self, id: &str) {
        self.backends.write().retain(|b| b.id != id);
    }

    /// Update a backend's weight in place.
    pub fn set_weight(&self, id: &str, weight: f64) {
        let mut backends = self.backends.write();
        if let Some(backend) = backends.iter_mut().find(|b| b.id == id) {
            backend.weight = weight;
        }
    }

    /// The weight currently assigned to a backend.
    pub fn weight(&self, id: &str) -> Option<f64> {
        self.backends
            .read()
            .iter()
            .find(|b| b.id == id)
            .map(|b| b.weight)
    }

    /// Number of registered backends, including zero-weight ones.
    pub fn backend_count(&self) -> usize {
        self.backends.read().len()
    }

    /// Select a backend among those with positive weight.
    pub fn select(&self) -> Option<String> {
        let backends = self.backends.read();
        let eligible: Vec<&WeightedBackend> =
            backends.iter().filter(|b| b.weight > 0.0).collect();

        if eligible.is_empty() {
            return None;
        }

        let selected = match self.strategy {
            BalancerStrategy::RoundRobin => {
                let index = self.cursor.fetch_add(1, Ordering::SeqCst);
                eligible[index % eligible.len()]
            }
            BalancerStrategy::WeightedRandom => {
                let total: f64 = eligible.iter().map(|b| b.weight).sum();
                let mut target = rand::thread_rng().gen_range(0.0..total);
                let mut chosen = eligible[eligible.len() - 1];
                for &backend in &eligible {
                    if target < backend.weight {
                        chosen = backend;
                        break;
                    }
                    target -= backend.weight;
                }
                chosen
            }
        };

        Some(selected.id.clone())
    }
}

/// Effective-weight multiplier applied per health state.
pub fn weight_multiplier(state: HealthState) -> f64 {
    match state {
        HealthState::Healthy => 1.0,
        HealthState::Degraded => 0.5,
        HealthState::Recovering => 0.3,
        HealthState::Failed | HealthState::Unknown => 0.0,
    }
}

/// Wraps a base balancer and keeps each backend's effective weight at
/// `base_weight x multiplier(state)`.
///
/// The wrapper subscribes to orchestrator events, but on every event it
/// re-reads the backend's current state from the orchestrator instead of
/// trusting the event payload, so out-of-order delivery cannot leave a
/// stale weight in place.
pub struct HealthAwareBalancer {
    base: BaseBalancer,
    orchestrator: Arc<HealthOrchestrator>,
    base_weights: RwLock<HashMap<String, f64>>,
}

impl HealthAwareBalancer {
    /// Create the wrapper and wire it to the orchestrator's event stream.
    pub fn new(strategy: BalancerStrategy, orchestrator: Arc<HealthOrchestrator>) -> Arc<Self> {
        let balancer = Arc::new(Self {
            base: BaseBalancer::new(strategy),
            orchestrator: Arc::clone(&orchestrator),
            base_weights: RwLock::new(HashMap::new()),
        });

        let weak = Arc::downgrade(&balancer);
        orchestrator.subscribe(Arc::new(move |event| {
            if let Some(balancer) = weak.upgrade() {
                balancer.refresh_backend(&event.subject);
            }
        }));

        balancer
    }

    /// Track a backend with an immutable base weight.
    pub fn register_backend(&self, id: impl Into<String>, base_weight: f64) {
        let id = id.into();
        self.base_weights.write().insert(id.clone(), base_weight);

        let state = self.orchestrator.backend_state(&id);
        self.base.add_backend(&id, base_weight * weight_multiplier(state));
    }

    /// Stop tracking a backend.
    pub fn remove_backend(&self, id: &str) {
        self.base_weights.write().remove(id);
        self.base.remove_backend(id);
    }

    /// Recompute a backend's effective weight from its current state.
    pub fn refresh_backend(&self, id: &str) {
        let base_weight = match self.base_weights.read().get(id) {
            Some(weight) => *weight,
            None => return,
        };

        let state = self.orchestrator.backend_state(id);
        self.base
            .set_weight(id, base_weight * weight_multiplier(state));
    }

    /// A backend's current effective weight.
    pub fn effective_weight(&self, id: &str) -> Option<f64> {
        self.base.weight(id)
    }

    /// Pick a backend for the next request.
    ///
    /// Consults the base balancer up to N times (N = tracked backend
    /// count) for a member of the orchestrator's currently-available set;
    /// falls back to the first available backend, and reports
    /// `NoBackendAvailable` when the set is empty. Failed backends are
    /// never returned.
    pub fn next_healthy_backend(&self) -> Result<String> {
        let available = self.orchestrator.get_available_backends();
        if available.is_empty() {
            return Err(HaError::NoBackendAvailable);
        }

        let attempts = self.base.backend_count().max(1);
        for _ in 0..attempts {
            if let Some(id) = self.base.select() {
                if available.contains(&id) {
                    return Ok(id);
                }
            }
        }

        Ok(available[0].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendConfig;
    use std::collections::HashMap;
    use std::time::Duration;

    #[test]
    fn test_round_robin_cycles() {
        let balancer = BaseBalancer::new(BalancerStrategy::RoundRobin);
        balancer.add_backend("a", 1.0);
        balancer.add_backend("b", 1.0);
        balancer.add_backend("c", 1.0);

        let first = balancer.select().unwrap();
        let second = balancer.select().unwrap();
        let fourth = {
            balancer.select().unwrap();
            balancer.select().unwrap()
        };

        assert_ne!(first, second);
        assert_eq!(first, fourth);
    }

    #[test]
    fn test_zero_weight_excluded() {
        let balancer = BaseBalancer::new(BalancerStrategy::RoundRobin);
        balancer.add_backend("a", 1.0);
        balancer.add_backend("b", 0.0);

        for _ in 0..10 {
            assert_eq!(balancer.select().unwrap(), "a");
        }
    }

    #[test]
    fn test_select_empty() {
        let balancer = BaseBalancer::new(BalancerStrategy::WeightedRandom);
        assert!(balancer.select().is_none());

        balancer.add_backend("a", 0.0);
        assert!(balancer.select().is_none());
    }

    #[test]
    fn test_weighted_random_respects_weights() {
        let balancer = BaseBalancer::new(BalancerStrategy::WeightedRandom);
        balancer.add_backend("heavy", 0.9);
        balancer.add_backend("light", 0.1);

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..1000 {
            *counts.entry(balancer.select().unwrap()).or_default() += 1;
        }

        let heavy = counts.get("heavy").copied().unwrap_or(0);
        assert!(heavy > 700, "heavy backend picked only {} times", heavy);
    }

    #[test]
    fn test_multiplier_table() {
        assert_eq!(weight_multiplier(HealthState::Healthy), 1.0);
        assert_eq!(weight_multiplier(HealthState::Degraded), 0.5);
        assert_eq!(weight_multiplier(HealthState::Recovering), 0.3);
        assert_eq!(weight_multiplier(HealthState::Failed), 0.0);
        assert_eq!(weight_multiplier(HealthState::Unknown), 0.0);
    }

    fn setup_three() -> (Arc<HealthOrchestrator>, Arc<HealthAwareBalancer>) {
        let orchestrator = Arc::new(HealthOrchestrator::new());
        let config = BackendConfig {
            failure_threshold: 2,
            ..BackendConfig::default()
        };
        for id in ["backend-1", "backend-2", "backend-3"] {
            orchestrator.register_backend(id, config.clone()).unwrap();
        }

        let balancer =
            HealthAwareBalancer::new(BalancerStrategy::RoundRobin, Arc::clone(&orchestrator));
        for id in ["backend-1", "backend-2", "backend-3"] {
            balancer.register_backend(id, 1.0);
        }
        (orchestrator, balancer)
    }

    #[tokio::test]
    async fn test_failed_backend_never_selected() {
        let (orchestrator, balancer) = setup_three();

        orchestrator.report_health_check("backend-2", false, Duration::ZERO, None);
        orchestrator.report_health_check("backend-2", false, Duration::ZERO, None);
        // The subscriber refresh is asynchronous; force the re-read now.
        balancer.refresh_backend("backend-2");

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..100 {
            let id = balancer.next_healthy_backend().unwrap();
            *counts.entry(id).or_default() += 1;
        }

        assert_eq!(counts.get("backend-2"), None);
        assert!(counts.get("backend-1").copied().unwrap_or(0) > 0);
        assert!(counts.get("backend-3").copied().unwrap_or(0) > 0);
    }

    #[tokio::test]
    async fn test_no_backend_available() {
        let orchestrator = Arc::new(HealthOrchestrator::new());
        let balancer =
            HealthAwareBalancer::new(BalancerStrategy::RoundRobin, Arc::clone(&orchestrator));
        assert!(matches!(
            balancer.next_healthy_backend(),
            Err(HaError::NoBackendAvailable)
        ));
    }

    #[tokio::test]
    async fn test_event_driven_weight_refresh() {
        let (orchestrator, balancer) = setup_three();
        assert_eq!(balancer.effective_weight("backend-1"), Some(1.0));

        orchestrator.report_health_check("backend-1", false, Duration::ZERO, None);
        // One failure with threshold 2: Degraded.
        let mut refreshed = false;
        for _ in 0..50 {
            if balancer.effective_weight("backend-1") == Some(0.5) {
                refreshed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(refreshed, "weight was not refreshed from the event stream");
    }

    #[tokio::test]
    async fn test_recovering_weight() {
        let (orchestrator, balancer) = setup_three();

        orchestrator.report_health_check("backend-3", false, Duration::ZERO, None);
        orchestrator.report_health_check("backend-3", false, Duration::ZERO, None);
        orchestrator.report_health_check("backend-3", true, Duration::ZERO, None);
        balancer.refresh_backend("backend-3");

        assert_eq!(balancer.effective_weight("backend-3"), Some(0.3));
        // Recovering backends remain selectable.
        let mut seen = false;
        for _ in 0..50 {
            if balancer.next_healthy_backend().unwrap() == "backend-3" {
                seen = true;
                break;
            }
        }
        assert!(seen);
    }
}
