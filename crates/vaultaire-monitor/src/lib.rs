//! # Vaultaire Monitor
//!
//! Monitoring for the Vaultaire HA control plane.
//!
//! ## Features
//!
//! - **Periodic Collection**: A 10 s tick snapshots backend and region
//!   health, with retention-driven cleanup of old snapshots
//! - **Alerting**: Failed-backend-fraction and latency thresholds with
//!   asynchronous per-subscriber delivery
//! - **Health Score**: A single 0-100 signal derived from backend states
//! - **Prometheus Exposition**: Text-format gauges served at `/metrics`
//! - **Dashboard Snapshot**: A JSON-compatible view of backends, regions,
//!   and recent alerts

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(dead_code)]

pub mod dashboard;
pub mod error;
pub mod exporter;
pub mod monitor;
pub mod types;

// Re-export main types for convenience
pub use dashboard::{BackendPanel, DashboardSnapshot, RegionPanel};
pub use error::{MonitorError, Result};
pub use exporter::PrometheusExporter;
pub use monitor::{AlertSubscription, HaMonitor};
pub use types::{
    Alert, AlertKind, AlertSeverity, HealthSnapshot, MonitorConfig, MonitorThresholds,
    RegionSnapshot,
};

/// Version information for the monitoring subsystem.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
