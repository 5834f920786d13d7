//! The telemetry capability seen by placement and admission.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use carbonetes_core::ClusterRecord;
use carbonetes_core::config::TelemetryConfig;

use crate::carbon::{CarbonTable, integrated_emission};
use crate::error::{TelemetryError, TelemetryResult};
use crate::exporter::{CpuSampler, parse_cpu_times, parse_memory};
use crate::http;
use crate::retry::validate_percent;

/// Averaged utilization across a cluster's nodes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterUtilization {
    pub cpu_pct: f64,
    #[serde(default)]
    pub memory_pct: Option<f64>,
}

/// Source of utilization and carbon signals.
///
/// Implementations must be cheap to call repeatedly; callers apply their
/// own retry and timeout policy on top.
#[async_trait]
pub trait TelemetryProvider: Send + Sync {
    /// Current utilization of a cluster.
    ///
    /// `Ok(None)` means no reading is available yet, e.g. a sampler that
    /// needs a second scrape before it can compute a rate.
    async fn cluster_utilization(
        &self,
        cluster: &ClusterRecord,
    ) -> TelemetryResult<Option<ClusterUtilization>>;

    /// Carbon intensity (gCO2/kWh) for a region.
    async fn carbon_intensity(&self, region: &str) -> TelemetryResult<f64>;

    /// Intensity integrated over `duration_secs`.
    async fn carbon_estimate(&self, region: &str, duration_secs: f64) -> TelemetryResult<f64> {
        let intensity = self.carbon_intensity(region).await?;
        Ok(integrated_emission(intensity, duration_secs))
    }
}

/// Scrapes node-exporter `/metrics` and resolves carbon from a static table.
pub struct NodeExporterTelemetry {
    carbon: CarbonTable,
    timeout: Duration,
    sampler: Mutex<CpuSampler>,
}

impl NodeExporterTelemetry {
    pub fn new(carbon: CarbonTable, timeout: Duration) -> Self {
        Self {
            carbon,
            timeout,
            sampler: Mutex::new(CpuSampler::new()),
        }
    }

    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self::new(
            CarbonTable::from_config(config),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn carbon_table(&self) -> &CarbonTable {
        &self.carbon
    }
}

#[async_trait]
impl TelemetryProvider for NodeExporterTelemetry {
    async fn cluster_utilization(
        &self,
        cluster: &ClusterRecord,
    ) -> TelemetryResult<Option<ClusterUtilization>> {
        let endpoints: Vec<&str> = cluster.endpoints().collect();
        if endpoints.is_empty() {
            return Err(TelemetryError::NoEndpoints(cluster.name.clone()));
        }

        let mut cpu = Vec::new();
        let mut memory = Vec::new();
        let mut last_error = None;

        for endpoint in &endpoints {
            let text = match http::get_text(endpoint, "/metrics", self.timeout).await {
                Ok(text) => text,
                Err(e) => {
                    debug!(cluster = %cluster.name, %endpoint, error = %e, "scrape failed");
                    last_error = Some(e);
                    continue;
                }
            };
            let times = match parse_cpu_times(&text) {
                Ok(times) => times,
                Err(e) => {
                    warn!(cluster = %cluster.name, %endpoint, error = %e, "unparseable scrape");
                    last_error = Some(e);
                    continue;
                }
            };
            if let Some(pct) = self.sampler.lock().await.observe(endpoint, times) {
                cpu.push(pct);
            }
            if let Some(mem) = parse_memory(&text) {
                memory.push(mem.used_pct());
            }
        }

        if let Some(e) = last_error
            && cpu.is_empty()
            && memory.is_empty()
        {
            return Err(e);
        }
        if cpu.is_empty() {
            return Ok(None);
        }

        let cpu_pct = validate_percent(mean(&cpu))?;
        let memory_pct = (!memory.is_empty()).then(|| mean(&memory));
        Ok(Some(ClusterUtilization {
            cpu_pct,
            memory_pct,
        }))
    }

    async fn carbon_intensity(&self, region: &str) -> TelemetryResult<f64> {
        let value = self.carbon.intensity(region);
        if !value.is_finite() || value < 0.0 {
            return Err(TelemetryError::InvalidReading(format!(
                "carbon intensity {value} for {region}"
            )));
        }
        Ok(value)
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}
