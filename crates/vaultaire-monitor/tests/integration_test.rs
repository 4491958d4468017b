//! Integration tests for the Vaultaire monitoring subsystem.

use std::sync::Arc;
use std::time::Duration;

use vaultaire_backup::{RtoRpoConfig, RtoRpoTracker};
use vaultaire_ha::{BackendConfig, HealthOrchestrator, HealthState, RegionRegistry};
use vaultaire_monitor::{
    AlertKind, AlertSeverity, HaMonitor, MonitorConfig, PrometheusExporter,
};

fn plane_with_backends(count: usize) -> (Arc<HealthOrchestrator>, Arc<RegionRegistry>) {
    let orchestrator = Arc::new(HealthOrchestrator::new());
    for i in 0..count {
        orchestrator
            .register_backend(
                &format!("backend-{}", i),
                BackendConfig {
                    failure_threshold: 2,
                    ..BackendConfig::default()
                },
            )
            .unwrap();
    }
    (orchestrator, Arc::new(RegionRegistry::with_defaults()))
}

#[tokio::test]
async fn monitor_end_to_end() {
    let (orchestrator, regions) = plane_with_backends(4);
    let tracker = Arc::new(RtoRpoTracker::new(RtoRpoConfig::default()).unwrap());
    let monitor = Arc::new(
        HaMonitor::new(
            MonitorConfig::default(),
            Arc::clone(&orchestrator),
            Arc::clone(&regions),
        )
        .with_tracker(tracker),
    );
    let mut alerts = monitor.subscribe_alerts();

    // Two of four backends collapse: 50% failed crosses the 30% threshold.
    for id in ["backend-0", "backend-1"] {
        orchestrator.report_health_check(id, false, Duration::ZERO, Some("io error".into()));
        orchestrator.report_health_check(id, false, Duration::ZERO, Some("io error".into()));
    }
    orchestrator.report_health_check("backend-2", true, Duration::from_millis(25), None);
    orchestrator.report_health_check("backend-3", true, Duration::from_millis(35), None);

    let snapshot = monitor.collect();
    assert_eq!(snapshot.total_backends, 4);
    assert_eq!(snapshot.failed_backends, 2);
    assert_eq!(snapshot.healthy_backends, 2);
    assert_eq!(snapshot.avg_latency, Duration::from_millis(30));
    assert_eq!(snapshot.system_status, "degraded");

    let alert = alerts.next().await.expect("no alert delivered");
    assert_eq!(alert.kind, AlertKind::BackendFailure);
    assert_eq!(alert.severity, AlertSeverity::Critical);

    // 2/4 healthy, 2/4 failed: 50 - 25 = 25.
    assert_eq!(monitor.health_score(), 25.0);

    let exporter = PrometheusExporter::new(Arc::clone(&monitor));
    let output = exporter.export();
    assert!(output.contains("vaultaire_ha_backends_total 4"));
    assert!(output.contains("vaultaire_ha_backends_unhealthy 2"));
    assert!(output.contains("vaultaire_ha_health_score 25"));

    let dashboard = monitor.dashboard_snapshot();
    assert_eq!(dashboard.backend_status.len(), 4);
    assert_eq!(
        dashboard.backend_status.get("backend-0").unwrap().state,
        HealthState::Failed
    );
    assert!(!dashboard.recent_alerts.is_empty());
    assert!(dashboard.recent_alerts.len() <= 20);
}

#[tokio::test]
async fn metrics_endpoint_serves_text() {
    let (orchestrator, regions) = plane_with_backends(1);
    let monitor = Arc::new(HaMonitor::new(
        MonitorConfig::default(),
        orchestrator,
        regions,
    ));
    let exporter = Arc::new(PrometheusExporter::new(monitor));

    exporter.clone().serve("127.0.0.1:19821").await.unwrap();
    // Give the server a moment to accept connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut stream = tokio::net::TcpStream::connect("127.0.0.1:19821")
        .await
        .unwrap();
    tokio::io::AsyncWriteExt::write_all(
        &mut stream,
        b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await
    .unwrap();

    let mut body = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut body).await.unwrap();
    let body = String::from_utf8_lossy(&body);

    assert!(body.contains("200 OK"));
    assert!(body.contains("vaultaire_ha_backends_total"));
}
