//! Domain types for Carbonetes.
//!
//! These types describe jobs, clusters, the scoring weight vector, and the
//! historical job log. All are serializable to/from JSON so they can be
//! persisted by `carbonetes-state` and exchanged over the REST API.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Unique identifier for a job (the task name it was submitted under).
pub type JobId = String;

/// Unique identifier for a registered cluster.
pub type ClusterId = String;

/// Current wall-clock time as unix seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Weight vector ──────────────────────────────────────────────────

/// Scoring coefficients for the four placement features.
///
/// - `a`: active-node-count term
/// - `b`: CPU overload penalty term
/// - `c`: workspan term
/// - `d`: carbon term
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WeightVector {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

/// One component of a [`WeightVector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeightDim {
    A,
    B,
    C,
    D,
}

impl WeightDim {
    pub const ALL: [WeightDim; 4] = [WeightDim::A, WeightDim::B, WeightDim::C, WeightDim::D];
}

impl Default for WeightVector {
    fn default() -> Self {
        Self::new(0.25, 0.25, 0.25, 0.25)
    }
}

impl WeightVector {
    pub const fn new(a: f64, b: f64, c: f64, d: f64) -> Self {
        Self { a, b, c, d }
    }

    pub fn get(&self, dim: WeightDim) -> f64 {
        match dim {
            WeightDim::A => self.a,
            WeightDim::B => self.b,
            WeightDim::C => self.c,
            WeightDim::D => self.d,
        }
    }

    /// Return a copy with `dim` set to `value`.
    pub fn with(mut self, dim: WeightDim, value: f64) -> Self {
        match dim {
            WeightDim::A => self.a = value,
            WeightDim::B => self.b = value,
            WeightDim::C => self.c = value,
            WeightDim::D => self.d = value,
        }
        self
    }

    /// Return a copy with `dim` moved by `delta`, clamped to `[0, 1]`.
    pub fn nudged(self, dim: WeightDim, delta: f64) -> Self {
        let value = (self.get(dim) + delta).clamp(0.0, 1.0);
        self.with(dim, value)
    }

    /// Component-wise clamp to `[0, 1]`.
    pub fn clamped(self) -> Self {
        Self::new(
            self.a.clamp(0.0, 1.0),
            self.b.clamp(0.0, 1.0),
            self.c.clamp(0.0, 1.0),
            self.d.clamp(0.0, 1.0),
        )
    }

    /// Arithmetic mean of two vectors (crossover).
    pub fn midpoint(&self, other: &WeightVector) -> Self {
        Self::new(
            (self.a + other.a) / 2.0,
            (self.b + other.b) / 2.0,
            (self.c + other.c) / 2.0,
            (self.d + other.d) / 2.0,
        )
    }

    /// All components finite and non-negative.
    pub fn is_valid(&self) -> bool {
        WeightDim::ALL
            .iter()
            .map(|d| self.get(*d))
            .all(|v| v.is_finite() && v >= 0.0)
    }

    pub fn approx_eq(&self, other: &WeightVector, tolerance: f64) -> bool {
        WeightDim::ALL
            .iter()
            .all(|d| (self.get(*d) - other.get(*d)).abs() <= tolerance)
    }
}

// ── CPU units ──────────────────────────────────────────────────────

/// Unit a CPU figure is expressed in before it is turned into a percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CpuUnit {
    /// Millicores against a fixed capacity.
    #[default]
    Millicores,
    /// Already a percentage (0–100).
    Percent,
    /// Guess from the magnitude: `> 100` is millicores, `0..=1` is a
    /// fraction, anything else a percentage.
    Auto,
}

impl CpuUnit {
    /// Convert `value` to a utilization percentage clamped to `[0, 100]`.
    pub fn to_percent(self, value: f64, capacity_millicores: f64) -> f64 {
        if !value.is_finite() {
            return 0.0;
        }
        match self {
            CpuUnit::Millicores => millicores_to_percent(value, capacity_millicores),
            CpuUnit::Percent => value.clamp(0.0, 100.0),
            CpuUnit::Auto => {
                if value > 100.0 {
                    millicores_to_percent(value, capacity_millicores)
                } else if (0.0..=1.0).contains(&value) {
                    value * 100.0
                } else {
                    value.clamp(0.0, 100.0)
                }
            }
        }
    }
}

fn millicores_to_percent(value: f64, capacity_millicores: f64) -> f64 {
    if capacity_millicores <= 0.0 {
        return 0.0;
    }
    (value / capacity_millicores * 100.0).clamp(0.0, 100.0)
}

// ── Jobs ───────────────────────────────────────────────────────────

/// A computational job waiting for (or past) placement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub task_name: String,
    /// Unix timestamp (seconds) the job was submitted.
    pub arrival_at: u64,
    /// Estimated execution time in seconds.
    pub estimated_secs: f64,
    /// Average CPU demand, in the configured job CPU unit.
    #[serde(default)]
    pub cpu_demand: Option<f64>,
    /// Carbon intensity to use instead of the cluster's regional signal.
    #[serde(default)]
    pub carbon_override: Option<f64>,
    /// Deadline in seconds from arrival.
    #[serde(default)]
    pub sla_deadline_secs: Option<f64>,
    /// Set once the job has been placed.
    #[serde(default)]
    pub assigned_cluster: Option<ClusterId>,
}

impl Job {
    pub fn new(task_name: &str, estimated_secs: f64, arrival_at: u64) -> Self {
        Self {
            id: task_name.to_string(),
            task_name: task_name.to_string(),
            arrival_at,
            estimated_secs,
            cpu_demand: None,
            carbon_override: None,
            sla_deadline_secs: None,
            assigned_cluster: None,
        }
    }
}

/// Handoff tuple for the external deployer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dispatch {
    pub cluster: ClusterId,
    pub task_name: String,
}

// ── Clusters ───────────────────────────────────────────────────────

/// A row of the cluster registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterRecord {
    pub name: ClusterId,
    /// Node-exporter address(es), comma separated (`host:port,host:port`).
    pub endpoint: String,
    /// Region code used to look up carbon intensity (e.g. "KR").
    pub region: String,
    /// Thermal design power of a node, in watts.
    pub tdp_watts: f64,
}

impl ClusterRecord {
    /// Individual node-exporter addresses.
    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        self.endpoint
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Projected load of a single cluster, as seen by the placement engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterState {
    pub name: ClusterId,
    pub region: String,
    /// Projected CPU utilization in percent (0–100).
    pub utilization_pct: f64,
    /// Projected time until the current backlog drains, in seconds.
    pub drain_secs: f64,
    /// Regional carbon intensity (gCO2/kWh).
    pub carbon_intensity: f64,
    /// Unix timestamp (seconds) of the last update.
    pub updated_at: u64,
}

impl ClusterState {
    pub fn new(name: &str, region: &str, carbon_intensity: f64, now: u64) -> Self {
        Self {
            name: name.to_string(),
            region: region.to_string(),
            utilization_pct: 0.0,
            drain_secs: 0.0,
            carbon_intensity,
            updated_at: now,
        }
    }

    /// Let the backlog drain for the time elapsed since the last update.
    ///
    /// Time never runs backwards: an earlier `now` leaves the state alone.
    pub fn advance_to(&mut self, now: u64) {
        if now <= self.updated_at {
            return;
        }
        let elapsed = (now - self.updated_at) as f64;
        self.drain_secs = (self.drain_secs - elapsed).max(0.0);
        self.updated_at = now;
    }

    /// Account for a newly assigned job. Returns the utilization actually
    /// added after capping at 100%.
    pub fn assign(&mut self, increment_pct: f64, duration_secs: f64) -> f64 {
        let before = self.utilization_pct;
        self.utilization_pct = (before + increment_pct.max(0.0)).min(100.0);
        self.drain_secs += duration_secs.max(0.0);
        self.utilization_pct - before
    }

    /// Give back utilization held by a finished job.
    pub fn release(&mut self, pct: f64) {
        self.utilization_pct = (self.utilization_pct - pct.max(0.0)).max(0.0);
    }
}

// ── History ────────────────────────────────────────────────────────

/// One completed (or failed) job from the historical log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoricalJob {
    pub task_id: JobId,
    /// Unix timestamp (seconds) the job was handed to a cluster.
    pub dispatched_at: u64,
    /// Estimated execution time in seconds.
    pub estimated_time: f64,
    /// Observed runtime in seconds, when the job finished.
    #[serde(default)]
    pub actual_runtime: Option<f64>,
    /// Observed average CPU usage, in the configured job CPU unit.
    pub avg_cpu_usage: f64,
    pub cluster_name: ClusterId,
    /// Observed or estimated carbon intensity; `0` means "use the cluster's".
    #[serde(default)]
    pub carbon_intensity: f64,
    #[serde(default)]
    pub completed_at: Option<u64>,
    /// Seconds the job waited before dispatch.
    #[serde(default)]
    pub queue_delay: f64,
    #[serde(default)]
    pub sla_deadline_secs: Option<f64>,
}

impl HistoricalJob {
    /// Observed runtime if known, otherwise the estimate.
    pub fn duration_secs(&self) -> f64 {
        match self.actual_runtime {
            Some(actual) if actual > 0.0 => actual,
            _ => self.estimated_time,
        }
    }

    /// When the job entered the queue.
    pub fn arrival_at(&self) -> u64 {
        self.dispatched_at
            .saturating_sub(self.queue_delay.max(0.0) as u64)
    }

    /// Check the record is usable for replay. Returns the reason it is not.
    pub fn validate(&self) -> Result<(), String> {
        if self.task_id.trim().is_empty() {
            return Err("empty task id".to_string());
        }
        if !self.estimated_time.is_finite() || self.estimated_time < 0.0 {
            return Err(format!("invalid estimated_time {}", self.estimated_time));
        }
        if let Some(actual) = self.actual_runtime
            && (!actual.is_finite() || actual < 0.0)
        {
            return Err(format!("invalid actual_runtime {actual}"));
        }
        if self.duration_secs() <= 0.0 {
            return Err("zero duration".to_string());
        }
        if !self.avg_cpu_usage.is_finite() || self.avg_cpu_usage < 0.0 {
            return Err(format!("invalid avg_cpu_usage {}", self.avg_cpu_usage));
        }
        if !self.carbon_intensity.is_finite() || self.carbon_intensity < 0.0 {
            return Err(format!("invalid carbon_intensity {}", self.carbon_intensity));
        }
        if !self.queue_delay.is_finite() || self.queue_delay < 0.0 {
            return Err(format!("invalid queue_delay {}", self.queue_delay));
        }
        if let Some(deadline) = self.sla_deadline_secs
            && (!deadline.is_finite() || deadline < 0.0)
        {
            return Err(format!("invalid sla_deadline_secs {deadline}"));
        }
        Ok(())
    }

    /// Storage key: dispatch time first so a key-ordered scan is chronological.
    pub fn table_key(&self) -> String {
        format!("{:020}:{}", self.dispatched_at, self.task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_history(task_id: &str) -> HistoricalJob {
        HistoricalJob {
            task_id: task_id.to_string(),
            dispatched_at: 1_000,
            estimated_time: 60.0,
            actual_runtime: Some(90.0),
            avg_cpu_usage: 800.0,
            cluster_name: "k3s-1".to_string(),
            carbon_intensity: 0.0,
            completed_at: Some(1_090),
            queue_delay: 30.0,
            sla_deadline_secs: None,
        }
    }

    #[test]
    fn nudged_clamps_to_unit_interval() {
        let w = WeightVector::new(0.99, 0.01, 0.5, 0.5);
        assert_eq!(w.nudged(WeightDim::A, 0.05).a, 1.0);
        assert_eq!(w.nudged(WeightDim::B, -0.05).b, 0.0);
        assert_eq!(w.nudged(WeightDim::C, 0.1).c, 0.6);
    }

    #[test]
    fn midpoint_averages_components() {
        let w = WeightVector::new(0.2, 0.4, 0.6, 0.8).midpoint(&WeightVector::new(0.4, 0.4, 0.0, 0.0));
        assert!(w.approx_eq(&WeightVector::new(0.3, 0.4, 0.3, 0.4), 1e-12));
    }

    #[test]
    fn negative_or_nan_weights_are_invalid() {
        assert!(WeightVector::default().is_valid());
        assert!(!WeightVector::new(-0.1, 0.0, 0.0, 0.0).is_valid());
        assert!(!WeightVector::new(f64::NAN, 0.0, 0.0, 0.0).is_valid());
    }

    #[test]
    fn cpu_units_convert_to_percent() {
        assert_eq!(CpuUnit::Millicores.to_percent(1000.0, 4000.0), 25.0);
        assert_eq!(CpuUnit::Millicores.to_percent(9000.0, 4000.0), 100.0);
        assert_eq!(CpuUnit::Millicores.to_percent(1000.0, 0.0), 0.0);
        assert_eq!(CpuUnit::Percent.to_percent(42.0, 4000.0), 42.0);
        assert_eq!(CpuUnit::Auto.to_percent(2000.0, 4000.0), 50.0);
        assert_eq!(CpuUnit::Auto.to_percent(0.5, 4000.0), 50.0);
        assert_eq!(CpuUnit::Auto.to_percent(30.0, 4000.0), 30.0);
        assert_eq!(CpuUnit::Percent.to_percent(f64::NAN, 4000.0), 0.0);
    }

    #[test]
    fn cluster_drain_decays_with_time() {
        let mut c = ClusterState::new("k3s-1", "KR", 310.0, 100);
        c.drain_secs = 50.0;
        c.advance_to(130);
        assert_eq!(c.drain_secs, 20.0);
        c.advance_to(200);
        assert_eq!(c.drain_secs, 0.0);
        // Going backwards is a no-op.
        c.drain_secs = 10.0;
        c.advance_to(150);
        assert_eq!(c.drain_secs, 10.0);
        assert_eq!(c.updated_at, 200);
    }

    #[test]
    fn assign_caps_utilization_and_reports_applied_delta() {
        let mut c = ClusterState::new("k3s-1", "KR", 310.0, 0);
        c.utilization_pct = 90.0;
        let applied = c.assign(20.0, 60.0);
        assert_eq!(applied, 10.0);
        assert_eq!(c.utilization_pct, 100.0);
        assert_eq!(c.drain_secs, 60.0);
        c.release(applied);
        assert_eq!(c.utilization_pct, 90.0);
    }

    #[test]
    fn registry_endpoints_split_on_commas() {
        let rec = ClusterRecord {
            name: "k3s-1".to_string(),
            endpoint: "10.0.0.1:9100, 10.0.0.2:9100,".to_string(),
            region: "KR".to_string(),
            tdp_watts: 95.0,
        };
        let eps: Vec<&str> = rec.endpoints().collect();
        assert_eq!(eps, vec!["10.0.0.1:9100", "10.0.0.2:9100"]);
    }

    #[test]
    fn history_duration_prefers_actual_runtime() {
        let mut h = test_history("t1");
        assert_eq!(h.duration_secs(), 90.0);
        h.actual_runtime = None;
        assert_eq!(h.duration_secs(), 60.0);
        assert_eq!(h.arrival_at(), 970);
    }

    #[test]
    fn history_validation_rejects_malformed_rows() {
        assert!(test_history("t1").validate().is_ok());

        let mut h = test_history("t1");
        h.avg_cpu_usage = -1.0;
        assert!(h.validate().is_err());

        let mut h = test_history("");
        h.task_id = " ".to_string();
        assert!(h.validate().is_err());

        let mut h = test_history("t1");
        h.estimated_time = 0.0;
        h.actual_runtime = None;
        assert!(h.validate().is_err());

        let mut h = test_history("t1");
        h.queue_delay = f64::INFINITY;
        assert!(h.validate().is_err());
    }

    #[test]
    fn history_keys_sort_chronologically() {
        let mut early = test_history("b");
        early.dispatched_at = 9;
        let mut late = test_history("a");
        late.dispatched_at = 10;
        assert!(early.table_key() < late.table_key());
    }
}
