//! carbonetes.toml configuration parser.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{ClusterRecord, CpuUnit, WeightVector};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CarbonetesConfig {
    pub placement: PlacementConfig,
    pub policy: PolicyConfig,
    pub learner: LearnerConfig,
    pub admission: AdmissionConfig,
    pub telemetry: TelemetryConfig,
    pub dispatch: DispatchConfig,
    /// Cluster registry rows upserted into the store at bootstrap.
    pub registry: Vec<ClusterRecord>,
}

/// Fixed min–max range used to normalize a raw feature to `[0, 1]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct NormRange {
    pub lo: f64,
    pub hi: f64,
}

impl NormRange {
    pub const fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    /// Clamp `value` into the range and scale to `[0, 1]`.
    pub fn normalize(&self, value: f64) -> f64 {
        if self.hi <= self.lo {
            return 0.0;
        }
        (value.clamp(self.lo, self.hi) - self.lo) / (self.hi - self.lo)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeatureRanges {
    pub active_nodes: NormRange,
    pub penalty: NormRange,
    pub workspan: NormRange,
    pub carbon: NormRange,
}

impl Default for FeatureRanges {
    fn default() -> Self {
        Self {
            active_nodes: NormRange::new(0.0, 10.0),
            penalty: NormRange::new(1.0, 1e4),
            workspan: NormRange::new(0.0, 24.0 * 3600.0),
            carbon: NormRange::new(0.0, 24_000.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlacementConfig {
    /// Clusters above this utilization (percent) are excluded from scoring.
    pub ceiling_pct: f64,
    /// A cluster counts as active at or above this utilization (percent).
    pub activity_threshold_pct: f64,
    /// Utilization the active-node model assumes a placement adds.
    pub assumed_increment_pct: f64,
    /// Increment applied on assignment when the job's CPU demand is unknown.
    pub default_increment_pct: f64,
    pub cpu_capacity_millicores: f64,
    pub job_cpu_unit: CpuUnit,
    pub infeasible_backoff_secs: u64,
    pub refresh_interval_secs: u64,
    pub ranges: FeatureRanges,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            ceiling_pct: 85.0,
            activity_threshold_pct: 8.5,
            assumed_increment_pct: 30.0,
            default_increment_pct: 20.0,
            cpu_capacity_millicores: 4000.0,
            job_cpu_unit: CpuUnit::Millicores,
            infeasible_backoff_secs: 30,
            refresh_interval_secs: 15,
            ranges: FeatureRanges::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Seeded as the active policy when the store has none.
    pub initial: WeightVector,
}

/// Coefficients of the learner's fitness function (lower is better).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FitnessConfig {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub zeta: f64,
    pub latency_percentile: f64,
}

impl Default for FitnessConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 100.0,
            gamma: 0.1,
            zeta: 0.0,
            latency_percentile: 0.95,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LearnerConfig {
    pub history_limit: usize,
    pub population_size: usize,
    pub include_current: bool,
    pub mutation_rate: f64,
    pub local_search: bool,
    pub local_search_epsilon: f64,
    pub hill_climb_step: f64,
    pub max_hill_climb_sweeps: usize,
    pub seed: Option<u64>,
    pub interval_secs: u64,
    pub trigger_after_jobs: usize,
    pub check_interval_secs: u64,
    pub replay_backoff_secs: u64,
    pub max_replay_deferrals: u32,
    pub fitness: FitnessConfig,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            history_limit: 500,
            population_size: 5,
            include_current: true,
            mutation_rate: 0.05,
            local_search: true,
            local_search_epsilon: 0.01,
            hill_climb_step: 0.02,
            max_hill_climb_sweeps: 50,
            seed: None,
            interval_secs: 3600,
            trigger_after_jobs: 50,
            check_interval_secs: 60,
            replay_backoff_secs: 30,
            max_replay_deferrals: 20,
            fitness: FitnessConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Suspend above this aggregate CPU fraction.
    pub high_watermark: f64,
    /// Resume below this aggregate CPU fraction.
    pub low_watermark: f64,
    pub poll_interval_secs: u64,
    /// Orchestration bridge that applies suspend/resume patches.
    pub control_url: Option<String>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            high_watermark: 0.60,
            low_watermark: 0.50,
            poll_interval_secs: 10,
            control_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelemetryConfig {
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub default_carbon_intensity: f64,
    /// Region code → gCO2/kWh.
    pub carbon_intensity: HashMap<String, f64>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 3,
            max_attempts: 3,
            default_carbon_intensity: 400.0,
            carbon_intensity: HashMap::from([("KR".to_string(), 310.0), ("FR".to_string(), 18.0)]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    pub url: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            url: "http://dispatcher:5000/new-task".to_string(),
        }
    }
}

impl CarbonetesConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: CarbonetesConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject settings the scheduler cannot run under.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.placement;
        if !(p.ceiling_pct > 0.0 && p.ceiling_pct <= 100.0) {
            return Err(invalid(format!("placement.ceiling_pct {} not in (0, 100]", p.ceiling_pct)));
        }
        if p.cpu_capacity_millicores <= 0.0 {
            return Err(invalid("placement.cpu_capacity_millicores must be positive"));
        }
        for (name, range) in [
            ("active_nodes", p.ranges.active_nodes),
            ("penalty", p.ranges.penalty),
            ("workspan", p.ranges.workspan),
            ("carbon", p.ranges.carbon),
        ] {
            if !(range.hi > range.lo) {
                return Err(invalid(format!("placement.ranges.{name}: hi must exceed lo")));
            }
        }

        if !self.policy.initial.is_valid() {
            return Err(invalid("policy.initial weights must be finite and non-negative"));
        }

        let l = &self.learner;
        for (name, value) in [
            ("mutation_rate", l.mutation_rate),
            ("local_search_epsilon", l.local_search_epsilon),
            ("hill_climb_step", l.hill_climb_step),
            ("fitness.alpha", l.fitness.alpha),
            ("fitness.beta", l.fitness.beta),
            ("fitness.gamma", l.fitness.gamma),
            ("fitness.zeta", l.fitness.zeta),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(format!("learner.{name} must be finite and non-negative")));
            }
        }
        if !(l.fitness.latency_percentile > 0.0 && l.fitness.latency_percentile < 1.0) {
            return Err(invalid("learner.fitness.latency_percentile must be in (0, 1)"));
        }

        let a = &self.admission;
        if a.low_watermark >= a.high_watermark {
            return Err(invalid(format!(
                "admission.low_watermark {} must be below high_watermark {}",
                a.low_watermark, a.high_watermark
            )));
        }
        if a.poll_interval_secs == 0 {
            return Err(invalid("admission.poll_interval_secs must be positive"));
        }

        if self.telemetry.max_attempts == 0 {
            return Err(invalid("telemetry.max_attempts must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = CarbonetesConfig::from_toml_str("").unwrap();
        assert_eq!(config.placement.ceiling_pct, 85.0);
        assert_eq!(config.admission.high_watermark, 0.60);
        assert_eq!(config.admission.low_watermark, 0.50);
        assert_eq!(config.learner.fitness.beta, 100.0);
        assert_eq!(config.telemetry.carbon_intensity.get("KR"), Some(&310.0));
        assert!(config.registry.is_empty());
    }

    #[test]
    fn parses_sections_and_registry() {
        let toml_str = r#"
[placement]
ceiling_pct = 60.0
job_cpu_unit = "percent"

[placement.ranges]
workspan = { lo = 0.0, hi = 3600.0 }

[policy.initial]
a = 0.1
b = 0.2
c = 0.3
d = 0.4

[learner]
seed = 7

[[registry]]
name = "k3s-1"
endpoint = "10.0.0.1:9100"
region = "KR"
tdp_watts = 95.0
"#;
        let config = CarbonetesConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.placement.ceiling_pct, 60.0);
        assert_eq!(config.placement.job_cpu_unit, CpuUnit::Percent);
        assert_eq!(config.placement.ranges.workspan, NormRange::new(0.0, 3600.0));
        assert_eq!(config.placement.ranges.penalty, NormRange::new(1.0, 1e4));
        assert_eq!(config.policy.initial, WeightVector::new(0.1, 0.2, 0.3, 0.4));
        assert_eq!(config.learner.seed, Some(7));
        assert_eq!(config.registry.len(), 1);
        assert_eq!(config.registry[0].region, "KR");
    }

    #[test]
    fn rejects_inverted_watermarks() {
        let toml_str = "[admission]\nhigh_watermark = 0.5\nlow_watermark = 0.6\n";
        let err = CarbonetesConfig::from_toml_str(toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_degenerate_range() {
        let toml_str = "[placement.ranges]\ncarbon = { lo = 5.0, hi = 5.0 }\n";
        assert!(CarbonetesConfig::from_toml_str(toml_str).is_err());
    }

    #[test]
    fn rejects_ceiling_out_of_bounds() {
        assert!(CarbonetesConfig::from_toml_str("[placement]\nceiling_pct = 120.0\n").is_err());
        assert!(CarbonetesConfig::from_toml_str("[placement]\nceiling_pct = 0.0\n").is_err());
    }

    #[test]
    fn normalize_clamps_out_of_range_values() {
        let r = NormRange::new(1.0, 1e4);
        assert_eq!(r.normalize(0.5), 0.0);
        assert_eq!(r.normalize(1e5), 1.0);
        assert!((r.normalize(5000.5) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn roundtrips_through_toml() {
        let config = CarbonetesConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        let parsed = CarbonetesConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(parsed.placement, config.placement);
        assert_eq!(parsed.learner, config.learner);
    }
}
