//! Prometheus text exposition for the HA control plane.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{MonitorError, Result};
use crate::monitor::HaMonitor;

/// Exposes the HA gauges in Prometheus text format, with an optional
/// axum-served `/metrics` endpoint.
pub struct PrometheusExporter {
    monitor: Arc<HaMonitor>,
}

impl PrometheusExporter {
    /// Create an exporter over a monitor.
    pub fn new(monitor: Arc<HaMonitor>) -> Self {
        Self { monitor }
    }

    /// Render the current metrics as Prometheus text exposition.
    pub fn export(&self) -> String {
        let snapshot = self.monitor.snapshot_now();
        let unhealthy = snapshot.total_backends - snapshot.healthy_backends;

        let mut output = String::new();
        push_gauge(
            &mut output,
            "vaultaire_ha_backends_total",
            "Total number of registered backends",
            snapshot.total_backends as f64,
        );
        push_gauge(
            &mut output,
            "vaultaire_ha_backends_healthy",
            "Number of backends in the Healthy state",
            snapshot.healthy_backends as f64,
        );
        push_gauge(
            &mut output,
            "vaultaire_ha_backends_unhealthy",
            "Number of backends not in the Healthy state",
            unhealthy as f64,
        );
        push_gauge(
            &mut output,
            "vaultaire_ha_latency_avg_ms",
            "Average backend latency in milliseconds",
            snapshot.avg_latency.as_secs_f64() * 1000.0,
        );
        push_gauge(
            &mut output,
            "vaultaire_ha_health_score",
            "Overall health score from 0 to 100",
            self.monitor.health_score(),
        );
        push_metric(
            &mut output,
            "vaultaire_ha_uptime_seconds",
            "Seconds since the HA monitor started",
            "counter",
            self.monitor.uptime_seconds(),
        );

        output
    }

    /// Serve `/metrics` on the given address. The server runs on a
    /// background task.
    pub async fn serve(self: Arc<Self>, addr: &str) -> Result<()> {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(Arc::clone(&self));

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MonitorError::export(format!("failed to bind {}: {}", addr, e)))?;

        info!("Prometheus metrics server listening on {}", addr);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Prometheus server error: {}", e);
            }
        });

        Ok(())
    }
}

async fn metrics_handler(State(exporter): State<Arc<PrometheusExporter>>) -> impl IntoResponse {
    (StatusCode::OK, exporter.export())
}

fn push_gauge(output: &mut String, name: &str, help: &str, value: f64) {
    push_metric(output, name, help, "gauge", value);
}

fn push_metric(output: &mut String, name: &str, help: &str, kind: &str, value: f64) {
    output.push_str(&format!("# HELP {} {}\n", name, help));
    output.push_str(&format!("# TYPE {} {}\n", name, kind));
    output.push_str(&format!("{} {}\n", name, value));
}
