//! Geographic regions: health, tiers, affinity, and replication policy.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use vaultaire_backup::RegionGate;

use crate::backend::HealthState;
use crate::error::{HaError, Result};

/// Role of a region within the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionTier {
    Primary,
    Secondary,
    Edge,
}

impl RegionTier {
    // Failover candidate ordering: secondaries first, the primary next,
    // edge regions last.
    fn failover_rank(&self) -> u8 {
        match self {
            RegionTier::Secondary => 0,
            RegionTier::Primary => 1,
            RegionTier::Edge => 2,
        }
    }
}

/// A geographic region with independent health tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub display_name: String,
    pub tier: RegionTier,
    /// Always `health != Failed`; maintained by the registry.
    pub active: bool,
    pub latency: Duration,
    pub health: HealthState,
}

impl Region {
    /// Create an active, healthy region.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, tier: RegionTier) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            tier,
            active: true,
            latency: Duration::ZERO,
            health: HealthState::Healthy,
        }
    }

    /// Set the measured latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

/// Cross-region replication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationMode {
    Sync,
    Async,
    Quorum,
}

/// Replication policy from a source region to its targets. Consulted
/// read-only during backup planning and region selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationPolicy {
    pub source_region: String,
    pub target_regions: Vec<String>,
    pub mode: ReplicationMode,
    pub max_lag: Duration,
    pub priority: u32,
}

/// Static affinity rule; first match wins during region selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffinityRule {
    pub source_regions: Vec<String>,
    pub target_region: String,
    pub weight: u32,
}

/// Registry of regions with selection, failover, and recovery operations.
///
/// Maintains the invariant `active <=> health != Failed` on every
/// mutation.
pub struct RegionRegistry {
    regions: RwLock<HashMap<String, Region>>,
    affinity_rules: RwLock<Vec<AffinityRule>>,
    replication_policies: RwLock<Vec<ReplicationPolicy>>,
}

impl RegionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            regions: RwLock::new(HashMap::new()),
            affinity_rules: RwLock::new(Vec::new()),
            replication_policies: RwLock::new(Vec::new()),
        }
    }

    /// Registry with the platform's bootstrap regions: `nyc` (primary) and
    /// `la` (secondary), both at 60 ms.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.add_region(
            Region::new("nyc", "New York", RegionTier::Primary)
                .with_latency(Duration::from_millis(60)),
        );
        registry.add_region(
            Region::new("la", "Los Angeles", RegionTier::Secondary)
                .with_latency(Duration::from_millis(60)),
        );
        registry
    }

    /// Add or replace a region.
    pub fn add_region(&self, mut region: Region) {
        region.active = region.health != HealthState::Failed;
        self.regions.write().insert(region.id.clone(), region);
    }

    /// Defensive copy of a region.
    pub fn get_region(&self, id: &str) -> Option<Region> {
        self.regions.read().get(id).cloned()
    }

    /// All regions, sorted by id.
    pub fn list_regions(&self) -> Vec<Region> {
        let mut regions: Vec<Region> = self.regions.read().values().cloned().collect();
        regions.sort_by(|a, b| a.id.cmp(&b.id));
        regions
    }

    /// Regions currently Healthy, sorted by id.
    pub fn healthy_regions(&self) -> Vec<Region> {
        self.list_regions()
            .into_iter()
            .filter(|r| r.health == HealthState::Healthy)
            .collect()
    }

    /// Set a region's health; the active flag follows.
    pub fn set_region_health(&self, id: &str, health: HealthState) -> Result<()> {
        let mut regions = self.regions.write();
        let region = regions
            .get_mut(id)
            .ok_or_else(|| HaError::RegionNotFound(id.to_string()))?;

        region.health = health;
        region.active = health != HealthState::Failed;
        Ok(())
    }

    /// Record a measured latency for a region.
    pub fn update_latency(&self, id: &str, latency: Duration) -> Result<()> {
        let mut regions = self.regions.write();
        let region = regions
            .get_mut(id)
            .ok_or_else(|| HaError::RegionNotFound(id.to_string()))?;
        region.latency = latency;
        Ok(())
    }

    /// Add an affinity rule. Rules are evaluated in insertion order.
    pub fn add_affinity_rule(&self, rule: AffinityRule) {
        self.affinity_rules.write().push(rule);
    }

    /// Add a replication policy.
    pub fn add_replication_policy(&self, policy: ReplicationPolicy) {
        self.replication_policies.write().push(policy);
    }

    /// Replication targets for a source region, highest priority first.
    pub fn replication_targets(&self, source: &str) -> Vec<String> {
        let mut policies: Vec<ReplicationPolicy> = self
            .replication_policies
            .read()
            .iter()
            .filter(|p| p.source_region == source)
            .cloned()
            .collect();
        policies.sort_by(|a, b| b.priority.cmp(&a.priority));
        policies
            .into_iter()
            .flat_map(|p| p.target_regions)
            .collect()
    }

    /// Choose the region to serve a client.
    ///
    /// Affinity rules are evaluated first (first matching source wins,
    /// provided the target is Healthy), then the primary if Healthy, then
    /// any other Healthy region, otherwise the primary regardless: the
    /// caller must handle the downstream failure.
    pub fn select_region(&self, client_region: &str) -> Option<String> {
        let regions = self.regions.read();

        for rule in self.affinity_rules.read().iter() {
            if rule.source_regions.iter().any(|s| s == client_region) {
                if let Some(target) = regions.get(&rule.target_region) {
                    if target.health == HealthState::Healthy {
                        return Some(target.id.clone());
                    }
                }
            }
        }

        let primary = regions.values().find(|r| r.tier == RegionTier::Primary);
        if let Some(primary) = primary {
            if primary.health == HealthState::Healthy {
                return Some(primary.id.clone());
            }
        }

        let mut healthy: Vec<&Region> = regions
            .values()
            .filter(|r| r.health == HealthState::Healthy)
            .collect();
        healthy.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(region) = healthy.first() {
            return Some(region.id.clone());
        }

        primary.map(|r| r.id.clone())
    }

    /// The region traffic would move to if `excluding` failed: the best
    /// non-Failed region, secondaries first.
    pub fn failover_candidate(&self, excluding: &str) -> Option<String> {
        let regions = self.regions.read();
        let mut candidates: Vec<&Region> = regions
            .values()
            .filter(|r| r.id != excluding && r.health != HealthState::Failed)
            .collect();
        candidates.sort_by(|a, b| {
            a.tier
                .failover_rank()
                .cmp(&b.tier.failover_rank())
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates.first().map(|r| r.id.clone())
    }

    /// Mark a region Failed and return the region traffic should move to.
    pub fn failover_region(&self, failed_id: &str) -> Result<String> {
        self.set_region_health(failed_id, HealthState::Failed)?;
        self.failover_candidate(failed_id)
            .ok_or_else(|| HaError::Failover("no region available to fail over to".to_string()))
    }

    /// Return a region to Healthy and active.
    pub fn recover_region(&self, id: &str) -> Result<()> {
        self.set_region_health(id, HealthState::Healthy)
    }
}

impl Default for RegionRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl RegionGate for RegionRegistry {
    // Backups only refuse to start out of a region known to be Failed.
    fn region_available(&self, region: &str) -> bool {
        self.regions
            .read()
            .get(region)
            .map(|r| r.health != HealthState::Failed)
            .unwrap_or(true)
    }
}
