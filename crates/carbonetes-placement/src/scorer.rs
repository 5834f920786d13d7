//! Cluster scoring for placement decisions.
//!
//! Each candidate cluster gets four raw features:
//! - **ActiveNodes**: clusters at or above the activity threshold if the
//!   job landed on this candidate (a fixed bump on the target only)
//! - **Penalty**: `10^(4·u/100)` on the candidate's current utilization
//! - **Workspan**: projected drain time plus the job's duration
//! - **Carbon**: resolved intensity integrated over the job's duration
//!
//! Features are min–max normalized against fixed ranges and combined with
//! a [`WeightVector`]. Lower scores are better. A cluster above the
//! ceiling scores `f64::INFINITY` and is never selected.

use carbonetes_core::config::{FeatureRanges, PlacementConfig};
use carbonetes_core::{ClusterState, CpuUnit, HistoricalJob, Job, WeightVector};

/// Fixed parameters of the scoring function.
#[derive(Debug, Clone)]
pub struct ScoringParams {
    pub ceiling_pct: f64,
    pub activity_threshold_pct: f64,
    pub assumed_increment_pct: f64,
    pub default_increment_pct: f64,
    pub cpu_capacity_millicores: f64,
    pub job_cpu_unit: CpuUnit,
    pub ranges: FeatureRanges,
}

impl From<&PlacementConfig> for ScoringParams {
    fn from(config: &PlacementConfig) -> Self {
        Self {
            ceiling_pct: config.ceiling_pct,
            activity_threshold_pct: config.activity_threshold_pct,
            assumed_increment_pct: config.assumed_increment_pct,
            default_increment_pct: config.default_increment_pct,
            cpu_capacity_millicores: config.cpu_capacity_millicores,
            job_cpu_unit: config.job_cpu_unit,
            ranges: config.ranges.clone(),
        }
    }
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self::from(&PlacementConfig::default())
    }
}

/// The parts of a job the scoring function looks at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobProfile {
    pub duration_secs: f64,
    /// Raw CPU demand in the configured job unit.
    pub cpu_demand: Option<f64>,
    pub carbon_override: Option<f64>,
}

impl JobProfile {
    pub fn from_job(job: &Job) -> Self {
        Self {
            duration_secs: job.estimated_secs.max(0.0),
            cpu_demand: job.cpu_demand,
            carbon_override: job.carbon_override,
        }
    }

    /// Profile of a replayed job. A zero CPU or carbon reading means unknown.
    pub fn from_history(job: &HistoricalJob) -> Self {
        Self {
            duration_secs: job.duration_secs(),
            cpu_demand: (job.avg_cpu_usage > 0.0).then_some(job.avg_cpu_usage),
            carbon_override: (job.carbon_intensity > 0.0).then_some(job.carbon_intensity),
        }
    }
}

/// One value per scoring term.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Features {
    pub active_nodes: f64,
    pub penalty: f64,
    pub workspan: f64,
    pub carbon: f64,
}

impl Features {
    pub fn normalized(&self, ranges: &FeatureRanges) -> Features {
        Features {
            active_nodes: ranges.active_nodes.normalize(self.active_nodes),
            penalty: ranges.penalty.normalize(self.penalty),
            workspan: ranges.workspan.normalize(self.workspan),
            carbon: ranges.carbon.normalize(self.carbon),
        }
    }

    pub fn weighted(&self, w: &WeightVector) -> f64 {
        w.a * self.active_nodes + w.b * self.penalty + w.c * self.workspan + w.d * self.carbon
    }
}

/// Scored result for a single cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterScore {
    pub cluster: String,
    /// Weighted score (lower = better), `INFINITY` when over the ceiling.
    pub score: f64,
    pub feasible: bool,
    pub raw: Features,
    pub normalized: Features,
    /// Carbon intensity the job resolves to on this cluster.
    pub carbon_intensity: f64,
}

/// Exponential overload penalty, ≈1 at idle and 10⁴ at full load.
pub fn overload_penalty(utilization_pct: f64) -> f64 {
    10f64.powf(4.0 * utilization_pct / 100.0)
}

/// Clusters at or above the activity threshold if `target` took the job.
pub fn active_nodes_if_assigned(
    clusters: &[ClusterState],
    target: usize,
    params: &ScoringParams,
) -> f64 {
    clusters
        .iter()
        .enumerate()
        .filter(|(i, c)| {
            let bump = if *i == target {
                params.assumed_increment_pct
            } else {
                0.0
            };
            c.utilization_pct + bump >= params.activity_threshold_pct
        })
        .count() as f64
}

/// Job override when present and positive, otherwise the cluster's signal.
pub fn resolved_carbon_intensity(job: &JobProfile, cluster: &ClusterState) -> f64 {
    match job.carbon_override {
        Some(v) if v.is_finite() && v > 0.0 => v,
        _ => cluster.carbon_intensity,
    }
}

/// Utilization a job adds to its target, in percent.
pub fn cpu_increment(job: &JobProfile, params: &ScoringParams) -> f64 {
    match job.cpu_demand {
        Some(v) if v.is_finite() && v > 0.0 => {
            params.job_cpu_unit.to_percent(v, params.cpu_capacity_millicores)
        }
        _ => params.default_increment_pct,
    }
}

pub fn raw_features(
    clusters: &[ClusterState],
    target: usize,
    job: &JobProfile,
    params: &ScoringParams,
) -> Features {
    let cluster = &clusters[target];
    let hours = job.duration_secs / 3600.0;
    Features {
        active_nodes: active_nodes_if_assigned(clusters, target, params),
        penalty: overload_penalty(cluster.utilization_pct),
        workspan: cluster.drain_secs + job.duration_secs,
        carbon: resolved_carbon_intensity(job, cluster) * hours,
    }
}

/// Score `clusters[target]` for `job` under `weights`.
pub fn score_cluster(
    clusters: &[ClusterState],
    target: usize,
    job: &JobProfile,
    weights: &WeightVector,
    params: &ScoringParams,
) -> ClusterScore {
    let cluster = &clusters[target];
    let raw = raw_features(clusters, target, job, params);
    let normalized = raw.normalized(&params.ranges);
    let feasible = cluster.utilization_pct <= params.ceiling_pct;
    let score = if feasible {
        normalized.weighted(weights)
    } else {
        f64::INFINITY
    };

    ClusterScore {
        cluster: cluster.name.clone(),
        score,
        feasible,
        raw,
        normalized,
        carbon_intensity: resolved_carbon_intensity(job, cluster),
    }
}

/// Score every cluster, best first. Ties keep cluster order.
pub fn rank_clusters(
    clusters: &[ClusterState],
    job: &JobProfile,
    weights: &WeightVector,
    params: &ScoringParams,
) -> Vec<ClusterScore> {
    let mut scores: Vec<ClusterScore> = (0..clusters.len())
        .map(|i| score_cluster(clusters, i, job, weights, params))
        .collect();
    scores.sort_by(|a, b| a.score.total_cmp(&b.score));
    scores
}

/// The minimum-score feasible cluster, or `None` if every cluster is over
/// the ceiling.
pub fn select_cluster(
    clusters: &[ClusterState],
    job: &JobProfile,
    weights: &WeightVector,
    params: &ScoringParams,
) -> Option<ClusterScore> {
    rank_clusters(clusters, job, weights, params)
        .into_iter()
        .find(|s| s.feasible)
}
