//! In-memory projected state for every registered cluster.
//!
//! Owned by exactly one writer: the placement worker in production, or a
//! single replay run in the learner (each run works on its own clone).

use carbonetes_core::{ClusterRecord, ClusterState};
use tracing::debug;

use crate::error::{PlacementError, PlacementResult};

/// Per-cluster projected utilization and drain time, ordered by name.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterStateStore {
    clusters: Vec<ClusterState>,
}

impl ClusterStateStore {
    /// Build fresh state from registry rows. An empty registry is fatal.
    pub fn from_registry(
        records: &[ClusterRecord],
        intensity: impl Fn(&str) -> f64,
        now: u64,
    ) -> PlacementResult<Self> {
        let states = records
            .iter()
            .map(|r| ClusterState::new(&r.name, &r.region, intensity(&r.region), now))
            .collect();
        Self::from_snapshot(states)
    }

    /// Restore from persisted (or cloned) states.
    pub fn from_snapshot(mut states: Vec<ClusterState>) -> PlacementResult<Self> {
        if states.is_empty() {
            return Err(PlacementError::EmptyRegistry);
        }
        states.sort_by(|a, b| a.name.cmp(&b.name));
        states.dedup_by(|a, b| a.name == b.name);
        Ok(Self { clusters: states })
    }

    pub fn states(&self) -> &[ClusterState] {
        &self.clusters
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ClusterState> {
        self.clusters.iter().find(|c| c.name == name)
    }

    fn get_mut(&mut self, name: &str) -> PlacementResult<&mut ClusterState> {
        self.clusters
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| PlacementError::UnknownCluster(name.to_string()))
    }

    /// Let every cluster's backlog drain up to `now`.
    pub fn advance_to(&mut self, now: u64) {
        for c in &mut self.clusters {
            c.advance_to(now);
        }
    }

    /// Move every cluster's clock to `at` without draining, e.g. to start
    /// a replay at the first historical arrival.
    pub fn restamp(&mut self, at: u64) {
        for c in &mut self.clusters {
            c.updated_at = at;
        }
    }

    /// Record an assignment. Returns the utilization actually added.
    pub fn assign(
        &mut self,
        name: &str,
        increment_pct: f64,
        duration_secs: f64,
    ) -> PlacementResult<f64> {
        let cluster = self.get_mut(name)?;
        Ok(cluster.assign(increment_pct, duration_secs))
    }

    /// Give back utilization held by a finished job.
    pub fn release(&mut self, name: &str, pct: f64) -> PlacementResult<()> {
        self.get_mut(name)?.release(pct);
        Ok(())
    }

    /// Overwrite projected values with a fresh telemetry reading.
    pub fn apply_reading(
        &mut self,
        name: &str,
        utilization_pct: Option<f64>,
        carbon_intensity: Option<f64>,
        now: u64,
    ) -> PlacementResult<()> {
        let cluster = self.get_mut(name)?;
        cluster.advance_to(now);
        if let Some(u) = utilization_pct {
            cluster.utilization_pct = u.clamp(0.0, 100.0);
        }
        if let Some(ci) = carbon_intensity {
            cluster.carbon_intensity = ci;
        }
        Ok(())
    }

    /// Reconcile with the registry: add new clusters, drop removed ones,
    /// keep projected state for the rest.
    pub fn rebase(
        &mut self,
        records: &[ClusterRecord],
        intensity: impl Fn(&str) -> f64,
        now: u64,
    ) -> PlacementResult<()> {
        if records.is_empty() {
            return Err(PlacementError::EmptyRegistry);
        }
        let mut next: Vec<ClusterState> = records
            .iter()
            .map(|r| match self.get(&r.name) {
                Some(existing) => ClusterState {
                    region: r.region.clone(),
                    ..existing.clone()
                },
                None => {
                    debug!(cluster = %r.name, "cluster joined registry");
                    ClusterState::new(&r.name, &r.region, intensity(&r.region), now)
                }
            })
            .collect();
        next.sort_by(|a, b| a.name.cmp(&b.name));
        next.dedup_by(|a, b| a.name == b.name);
        self.clusters = next;
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<ClusterState> {
        self.clusters.clone()
    }
}
