//! Periodic HA metric collection, alert evaluation, and history retention.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vaultaire_backup::RtoRpoTracker;
use vaultaire_ha::{HealthOrchestrator, HealthState, RegionRegistry};

use crate::types::{
    Alert, AlertKind, AlertSeverity, HealthSnapshot, MonitorConfig, RegionSnapshot,
};

/// Number of recent alerts retained in the ring.
const ALERT_RING_LIMIT: usize = 100;

/// Cleanup cadence for retention enforcement.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// A live alert subscription. Alerts are delivered over an unbounded
/// channel, so one slow consumer never delays another.
pub struct AlertSubscription {
    receiver: mpsc::UnboundedReceiver<Alert>,
}

impl AlertSubscription {
    /// Receive the next alert.
    pub async fn next(&mut self) -> Option<Alert> {
        self.receiver.recv().await
    }

    /// Receive an alert without waiting.
    pub fn try_next(&mut self) -> Option<Alert> {
        self.receiver.try_recv().ok()
    }
}

/// Aggregates orchestrator, region, and recovery-objective state into
/// periodic snapshots, evaluates alert thresholds, and retains a bounded
/// history.
pub struct HaMonitor {
    config: MonitorConfig,
    orchestrator: Arc<HealthOrchestrator>,
    regions: Arc<RegionRegistry>,
    tracker: Option<Arc<RtoRpoTracker>>,
    history: Arc<RwLock<VecDeque<HealthSnapshot>>>,
    alerts: Arc<RwLock<VecDeque<Alert>>>,
    subscribers: Arc<RwLock<Vec<mpsc::UnboundedSender<Alert>>>>,
    started_at: Instant,
    cancel: CancellationToken,
}

impl HaMonitor {
    /// Create a monitor over the HA orchestrator and region registry.
    pub fn new(
        config: MonitorConfig,
        orchestrator: Arc<HealthOrchestrator>,
        regions: Arc<RegionRegistry>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            regions,
            tracker: None,
            history: Arc::new(RwLock::new(VecDeque::new())),
            alerts: Arc::new(RwLock::new(VecDeque::new())),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            started_at: Instant::now(),
            cancel: CancellationToken::new(),
        }
    }

    /// Wire in a recovery-objective tracker.
    pub fn with_tracker(mut self, tracker: Arc<RtoRpoTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Start the collection tick and the hourly retention cleanup.
    pub fn start(self: &Arc<Self>) {
        let monitor = Arc::clone(self);
        let cancel = self.cancel.clone();
        let interval = self.config.collect_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                monitor.collect();
            }
        });

        let monitor = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                monitor.cleanup();
            }
        });
    }

    /// Stop both background loops at their next tick.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Assemble the current snapshot without recording it or evaluating
    /// alerts. The exporters use this.
    pub fn snapshot_now(&self) -> HealthSnapshot {
        let statuses = self.orchestrator.all_statuses();

        let mut healthy = 0;
        let mut degraded = 0;
        let mut failed = 0;
        let mut recovering = 0;
        let mut unknown = 0;
        for status in &statuses {
            match status.state {
                HealthState::Healthy => healthy += 1,
                HealthState::Degraded => degraded += 1,
                HealthState::Failed => failed += 1,
                HealthState::Recovering => recovering += 1,
                HealthState::Unknown => unknown += 1,
            }
        }

        let measured: Vec<Duration> = statuses
            .iter()
            .map(|s| s.latency)
            .filter(|l| !l.is_zero())
            .collect();
        let max_latency = measured.iter().copied().max().unwrap_or(Duration::ZERO);
        let avg_latency = if measured.is_empty() {
            Duration::ZERO
        } else {
            measured.iter().copied().sum::<Duration>() / measured.len() as u32
        };

        let regions: HashMap<String, RegionSnapshot> = self
            .regions
            .list_regions()
            .into_iter()
            .map(|r| {
                (
                    r.id,
                    RegionSnapshot {
                        health: r.health,
                        latency: r.latency,
                        active: r.active,
                    },
                )
            })
            .collect();

        HealthSnapshot {
            timestamp: Utc::now(),
            total_backends: statuses.len(),
            healthy_backends: healthy,
            degraded_backends: degraded,
            failed_backends: failed,
            recovering_backends: recovering,
            unknown_backends: unknown,
            max_latency,
            avg_latency,
            system_status: self.orchestrator.get_system_status().as_str().to_string(),
            regions,
            objective_health: self.tracker.as_ref().map(|t| t.check_status().status),
        }
    }

    /// One collection pass: snapshot, evaluate thresholds, record, and
    /// dispatch any alerts.
    pub fn collect(&self) -> HealthSnapshot {
        let snapshot = self.snapshot_now();

        for alert in self.evaluate(&snapshot) {
            self.raise(alert);
        }

        {
            let mut history = self.history.write();
            history.push_back(snapshot.clone());
            let cutoff = Utc::now()
                - chrono::Duration::from_std(self.config.retention_period)
                    .unwrap_or_else(|_| chrono::Duration::days(7));
            while history.front().map(|s| s.timestamp < cutoff).unwrap_or(false) {
                history.pop_front();
            }
        }

        snapshot
    }

    /// Drop snapshots older than the retention period.
    pub fn cleanup(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.retention_period)
                .unwrap_or_else(|_| chrono::Duration::days(7));
        let mut history = self.history.write();
        let before = history.len();
        while history.front().map(|s| s.timestamp < cutoff).unwrap_or(false) {
            history.pop_front();
        }
        let dropped = before - history.len();
        if dropped > 0 {
            tracing::debug!("Dropped {} expired snapshots", dropped);
        }
    }

    /// Health score in [0, 100]: full marks for all-healthy, penalised by
    /// failed and degraded fractions.
    pub fn health_score(&self) -> f64 {
        let statuses = self.orchestrator.all_statuses();
        let total = statuses.len();
        if total == 0 {
            return 100.0;
        }

        let healthy = statuses
            .iter()
            .filter(|s| s.state == HealthState::Healthy)
            .count() as f64;
        let failed = statuses
            .iter()
            .filter(|s| s.state == HealthState::Failed)
            .count() as f64;
        let degraded = statuses
            .iter()
            .filter(|s| s.state == HealthState::Degraded)
            .count() as f64;
        let total = total as f64;

        let score = 100.0 * healthy / total - 50.0 * failed / total - 20.0 * degraded / total;
        score.clamp(0.0, 100.0)
    }

    /// Seconds since the monitor was created.
    pub fn uptime_seconds(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    /// Retained snapshots, oldest first.
    pub fn snapshots(&self) -> Vec<HealthSnapshot> {
        self.history.read().iter().cloned().collect()
    }

    /// The most recently collected snapshot.
    pub fn latest_snapshot(&self) -> Option<HealthSnapshot> {
        self.history.read().back().cloned()
    }

    /// The most recent alerts, newest first.
    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        self.alerts.read().iter().rev().take(limit).cloned().collect()
    }

    /// Subscribe to alerts. Delivery is asynchronous per subscriber.
    pub fn subscribe_alerts(&self) -> AlertSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().push(tx);
        AlertSubscription { receiver: rx }
    }

    /// Reference to the orchestrator this monitor observes.
    pub fn orchestrator(&self) -> &Arc<HealthOrchestrator> {
        &self.orchestrator
    }

    /// Reference to the region registry this monitor observes.
    pub fn regions(&self) -> &Arc<RegionRegistry> {
        &self.regions
    }

    fn evaluate(&self, snapshot: &HealthSnapshot) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let thresholds = &self.config.thresholds;

        if snapshot.total_backends > 0 {
            let failed_percent =
                snapshot.failed_backends as f64 / snapshot.total_backends as f64 * 100.0;
            if failed_percent >= thresholds.failed_backend_percent {
                alerts.push(
                    Alert::new(
                        AlertKind::BackendFailure,
                        AlertSeverity::Critical,
                        format!(
                            "{} of {} backends failed ({:.0}%)",
                            snapshot.failed_backends, snapshot.total_backends, failed_percent
                        ),
                    )
                    .with_detail("failed", snapshot.failed_backends.to_string())
                    .with_detail("total", snapshot.total_backends.to_string()),
                );
            }
        }

        if snapshot.max_latency > thresholds.max_latency {
            alerts.push(
                Alert::new(
                    AlertKind::HighLatency,
                    AlertSeverity::Warning,
                    format!(
                        "max backend latency {}ms exceeds {}ms",
                        snapshot.max_latency.as_millis(),
                        thresholds.max_latency.as_millis()
                    ),
                )
                .with_detail("latency_ms", snapshot.max_latency.as_millis().to_string()),
            );
        }

        alerts
    }

    fn raise(&self, alert: Alert) {
        tracing::warn!("HA alert ({:?}): {}", alert.severity, alert.message);

        {
            let mut alerts = self.alerts.write();
            alerts.push_back(alert.clone());
            while alerts.len() > ALERT_RING_LIMIT {
                alerts.pop_front();
            }
        }

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(alert.clone()).is_ok());
    }
}
