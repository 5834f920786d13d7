//! Placement engine: picks a cluster for one job and commits the choice.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use carbonetes_core::{ClusterRecord, Dispatch, Job, WeightVector};
use carbonetes_state::PlacementAudit;
use carbonetes_telemetry::retry::validate_percent;
use carbonetes_telemetry::{
    RetryPolicy, TelemetryError, TelemetryProvider, node_emission_grams, with_retry,
};

use crate::cluster_state::ClusterStateStore;
use crate::error::{PlacementError, PlacementResult};
use crate::scorer::{JobProfile, ScoringParams, cpu_increment, select_cluster};

/// Outcome of a successful placement.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub job_id: String,
    pub task_name: String,
    pub cluster: String,
    pub score: f64,
    /// Utilization added to the cluster, in percent.
    pub increment_pct: f64,
    pub carbon_intensity: f64,
    /// Estimated emissions over the job's duration, grams.
    pub carbon_grams: f64,
    pub placed_at: u64,
}

impl Placement {
    pub fn dispatch(&self) -> Dispatch {
        Dispatch {
            cluster: self.cluster.clone(),
            task_name: self.task_name.clone(),
        }
    }

    pub fn audit(&self) -> PlacementAudit {
        PlacementAudit {
            job_id: self.job_id.clone(),
            cluster: self.cluster.clone(),
            score: self.score,
            carbon_intensity: self.carbon_intensity,
            carbon_grams: self.carbon_grams,
            placed_at: self.placed_at,
        }
    }
}

/// Scores clusters and owns their projected state.
///
/// `place` is synchronous and touches only in-memory state, so a single
/// owner serializes placements. Telemetry is pulled separately through
/// [`refresh`](PlacementEngine::refresh).
pub struct PlacementEngine {
    params: ScoringParams,
    clusters: ClusterStateStore,
    registry: HashMap<String, ClusterRecord>,
    telemetry: Arc<dyn TelemetryProvider>,
    retry: RetryPolicy,
}

impl PlacementEngine {
    pub fn new(
        params: ScoringParams,
        clusters: ClusterStateStore,
        registry: &[ClusterRecord],
        telemetry: Arc<dyn TelemetryProvider>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            params,
            clusters,
            registry: registry
                .iter()
                .map(|r| (r.name.clone(), r.clone()))
                .collect(),
            telemetry,
            retry,
        }
    }

    pub fn params(&self) -> &ScoringParams {
        &self.params
    }

    pub fn clusters(&self) -> &ClusterStateStore {
        &self.clusters
    }

    /// Registry rows the engine currently scores against, by name.
    pub fn registry(&self) -> Vec<ClusterRecord> {
        let mut records: Vec<ClusterRecord> = self.registry.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    /// Place `job` under `weights`.
    ///
    /// Returns `Infeasible` without touching state when every cluster is
    /// above the ceiling.
    pub fn place(
        &mut self,
        job: &Job,
        weights: &WeightVector,
        now: u64,
    ) -> PlacementResult<Placement> {
        self.clusters.advance_to(now);

        let profile = JobProfile::from_job(job);
        let Some(best) = select_cluster(self.clusters.states(), &profile, weights, &self.params)
        else {
            return Err(PlacementError::Infeasible {
                job: job.id.clone(),
                ceiling_pct: self.params.ceiling_pct,
            });
        };

        let increment = cpu_increment(&profile, &self.params);
        let applied = self
            .clusters
            .assign(&best.cluster, increment, profile.duration_secs)?;

        let tdp = self
            .registry
            .get(&best.cluster)
            .map(|r| r.tdp_watts)
            .unwrap_or(0.0);
        let carbon_grams = node_emission_grams(
            tdp,
            applied / 100.0,
            profile.duration_secs,
            best.carbon_intensity,
        );

        debug!(
            job = %job.id,
            cluster = %best.cluster,
            score = best.score,
            active_nodes = best.raw.active_nodes,
            penalty = best.raw.penalty,
            workspan = best.raw.workspan,
            carbon = best.raw.carbon,
            "cluster selected"
        );

        Ok(Placement {
            job_id: job.id.clone(),
            task_name: job.task_name.clone(),
            cluster: best.cluster,
            score: best.score,
            increment_pct: applied,
            carbon_intensity: best.carbon_intensity,
            carbon_grams,
            placed_at: now,
        })
    }

    /// Pull fresh utilization and carbon readings for every cluster.
    ///
    /// A cluster whose telemetry keeps failing keeps its cached values.
    /// Returns how many clusters got a utilization reading.
    pub async fn refresh(&mut self, now: u64) -> usize {
        let telemetry = self.telemetry.clone();
        let records: Vec<ClusterRecord> = self.registry.values().cloned().collect();
        let mut updated = 0;

        for record in &records {
            let utilization = with_retry(self.retry, &record.name, || {
                let telemetry = telemetry.clone();
                async move {
                    let reading = telemetry.cluster_utilization(record).await?;
                    if let Some(u) = reading {
                        validate_percent(u.cpu_pct)?;
                    }
                    Ok::<_, TelemetryError>(reading)
                }
            })
            .await;

            let carbon = with_retry(self.retry, &record.region, || {
                let telemetry = telemetry.clone();
                async move {
                    let ci = telemetry.carbon_intensity(&record.region).await?;
                    if !ci.is_finite() || ci < 0.0 {
                        return Err(TelemetryError::InvalidReading(format!(
                            "carbon intensity {ci}"
                        )));
                    }
                    Ok::<_, TelemetryError>(ci)
                }
            })
            .await;

            let cpu = match utilization {
                Ok(reading) => reading.map(|u| u.cpu_pct),
                Err(e) => {
                    warn!(cluster = %record.name, error = %e, "utilization unavailable, keeping cached value");
                    None
                }
            };
            let ci = match carbon {
                Ok(ci) => Some(ci),
                Err(e) => {
                    warn!(cluster = %record.name, region = %record.region, error = %e, "carbon intensity unavailable, keeping cached value");
                    None
                }
            };

            if cpu.is_some() {
                updated += 1;
            }
            if let Err(e) = self.clusters.apply_reading(&record.name, cpu, ci, now) {
                warn!(cluster = %record.name, error = %e, "reading for unknown cluster");
            }
        }

        debug!(updated, total = records.len(), "telemetry refresh complete");
        updated
    }

    /// Pick up registry changes made through the API, then refresh so new
    /// clusters get real readings.
    pub async fn sync_registry(
        &mut self,
        records: &[ClusterRecord],
        now: u64,
    ) -> PlacementResult<()> {
        let default_ci = |region: &str| {
            self.clusters
                .states()
                .iter()
                .find(|c| c.region == region)
                .map(|c| c.carbon_intensity)
                .unwrap_or(0.0)
        };
        let mut next = self.clusters.clone();
        next.rebase(records, default_ci, now)?;
        if next.len() != self.clusters.len() {
            info!(clusters = next.len(), "cluster registry changed");
        }
        self.clusters = next;
        self.registry = records
            .iter()
            .map(|r| (r.name.clone(), r.clone()))
            .collect();
        self.refresh(now).await;
        Ok(())
    }
}
