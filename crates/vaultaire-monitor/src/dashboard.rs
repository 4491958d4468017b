//! JSON-compatible dashboard snapshot of the HA plane.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use vaultaire_ha::HealthState;

use crate::monitor::HaMonitor;
use crate::types::Alert;

/// Number of alerts carried on the dashboard.
const DASHBOARD_ALERT_LIMIT: usize = 20;

/// Per-backend dashboard panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendPanel {
    pub name: String,
    pub state: HealthState,
    pub latency_ms: u64,
    pub is_primary: bool,
    pub last_check: Option<DateTime<Utc>>,
}

/// Per-region dashboard panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionPanel {
    pub name: String,
    pub healthy: bool,
    pub latency_ms: u64,
}

/// One renderable view of the whole HA plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub generated_at: DateTime<Utc>,
    pub backend_status: HashMap<String, BackendPanel>,
    pub region_status: HashMap<String, RegionPanel>,
    /// At most the 20 most recent alerts, newest first.
    pub recent_alerts: Vec<Alert>,
    pub health_score: f64,
}

impl HaMonitor {
    /// Assemble the dashboard snapshot from current state.
    pub fn dashboard_snapshot(&self) -> DashboardSnapshot {
        let backend_status: HashMap<String, BackendPanel> = self
            .orchestrator()
            .all_statuses()
            .into_iter()
            .map(|status| {
                (
                    status.id.clone(),
                    BackendPanel {
                        name: status.id,
                        state: status.state,
                        latency_ms: status.latency.as_millis() as u64,
                        is_primary: status.config.primary,
                        last_check: status.last_check,
                    },
                )
            })
            .collect();

        let region_status: HashMap<String, RegionPanel> = self
            .regions()
            .list_regions()
            .into_iter()
            .map(|region| {
                (
                    region.id.clone(),
                    RegionPanel {
                        name: region.display_name,
                        healthy: region.health == HealthState::Healthy,
                        latency_ms: region.latency.as_millis() as u64,
                    },
                )
            })
            .collect();

        DashboardSnapshot {
            generated_at: Utc::now(),
            backend_status,
            region_status,
            recent_alerts: self.recent_alerts(DASHBOARD_ALERT_LIMIT),
            health_score: self.health_score(),
        }
    }
}
