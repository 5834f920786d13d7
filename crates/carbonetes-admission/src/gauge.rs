//! Aggregate CPU utilization source for the admission poll.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use carbonetes_state::StateStore;
use carbonetes_telemetry::{RetryPolicy, TelemetryError, TelemetryProvider, with_retry};

use crate::error::{AdmissionError, AdmissionResult};

/// Returns aggregate CPU utilization as a fraction in `[0, 1]`.
#[async_trait]
pub trait CpuGauge: Send + Sync {
    async fn utilization(&self) -> AdmissionResult<f64>;
}

/// Averages the CPU utilization of every registered cluster that reports
/// a reading.
pub struct TelemetryGauge {
    telemetry: Arc<dyn TelemetryProvider>,
    store: StateStore,
    retry: RetryPolicy,
}

impl TelemetryGauge {
    pub fn new(telemetry: Arc<dyn TelemetryProvider>, store: StateStore, retry: RetryPolicy) -> Self {
        Self {
            telemetry,
            store,
            retry,
        }
    }
}

#[async_trait]
impl CpuGauge for TelemetryGauge {
    /// Clusters are queried concurrently, each under its own retry policy,
    /// so a stalled cluster costs at most one retry budget and never
    /// hides the clusters that did answer.
    async fn utilization(&self) -> AdmissionResult<f64> {
        let clusters = self.store.list_clusters()?;
        let mut queries = JoinSet::new();

        for cluster in clusters {
            let telemetry = Arc::clone(&self.telemetry);
            let retry = self.retry;
            queries.spawn(async move {
                let reading = with_retry(retry, &cluster.name, || {
                    let telemetry = &telemetry;
                    let cluster = &cluster;
                    async move {
                        Ok::<_, TelemetryError>(telemetry.cluster_utilization(cluster).await?)
                    }
                })
                .await;
                (cluster.name, reading)
            });
        }

        let mut readings = Vec::with_capacity(queries.len());
        while let Some(joined) = queries.join_next().await {
            match joined {
                Ok((_, Ok(Some(u)))) => readings.push(u.cpu_pct),
                Ok((name, Ok(None))) => debug!(cluster = %name, "no utilization sample yet"),
                Ok((name, Err(e))) => debug!(cluster = %name, error = %e, "cluster skipped"),
                Err(e) => warn!(error = %e, "utilization query aborted"),
            }
        }

        if readings.is_empty() {
            return Err(AdmissionError::NoReading);
        }
        let mean = readings.iter().sum::<f64>() / readings.len() as f64;
        Ok((mean / 100.0).clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use carbonetes_core::ClusterRecord;
    use carbonetes_telemetry::{ClusterUtilization, TelemetryResult};

    struct FixedTelemetry {
        cpu: HashMap<String, Option<f64>>,
    }

    #[async_trait]
    impl TelemetryProvider for FixedTelemetry {
        async fn cluster_utilization(
            &self,
            cluster: &ClusterRecord,
        ) -> TelemetryResult<Option<ClusterUtilization>> {
            match self.cpu.get(&cluster.name) {
                Some(Some(cpu_pct)) => Ok(Some(ClusterUtilization {
                    cpu_pct: *cpu_pct,
                    memory_pct: None,
                })),
                Some(None) => Ok(None),
                None => Err(TelemetryError::Connect(cluster.name.clone())),
            }
        }

        async fn carbon_intensity(&self, _region: &str) -> TelemetryResult<f64> {
            Ok(0.0)
        }
    }

    fn store_with(names: &[&str]) -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        for name in names {
            store
                .put_cluster(&ClusterRecord {
                    name: name.to_string(),
                    endpoint: format!("{name}:9100"),
                    region: "KR".into(),
                    tdp_watts: 95.0,
                })
                .unwrap();
        }
        store
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            timeout: Duration::from_secs(1),
            pause: Duration::from_millis(1),
        }
    }

    fn gauge(names: &[&str], cpu: &[(&str, Option<f64>)]) -> TelemetryGauge {
        let telemetry = FixedTelemetry {
            cpu: cpu.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        };
        TelemetryGauge::new(Arc::new(telemetry), store_with(names), quick_retry())
    }

    #[tokio::test]
    async fn averages_reporting_clusters() {
        let g = gauge(
            &["a", "b", "c", "d"],
            &[("a", Some(40.0)), ("b", Some(80.0)), ("c", None)],
        );
        let u = g.utilization().await.unwrap();
        assert!((u - 0.6).abs() < 1e-12);
    }

    #[tokio::test]
    async fn no_readings_is_error() {
        let g = gauge(&["a", "b"], &[("a", None)]);
        assert!(matches!(g.utilization().await, Err(AdmissionError::NoReading)));

        let empty = gauge(&[], &[]);
        assert!(matches!(empty.utilization().await, Err(AdmissionError::NoReading)));
    }

    /// Never answers for `stuck*` clusters; every other cluster sits at 95%.
    struct StalledTelemetry;

    #[async_trait]
    impl TelemetryProvider for StalledTelemetry {
        async fn cluster_utilization(
            &self,
            cluster: &ClusterRecord,
        ) -> TelemetryResult<Option<ClusterUtilization>> {
            if cluster.name.starts_with("stuck") {
                return std::future::pending().await;
            }
            Ok(Some(ClusterUtilization {
                cpu_pct: 95.0,
                memory_pct: None,
            }))
        }

        async fn carbon_intensity(&self, _region: &str) -> TelemetryResult<f64> {
            Ok(0.0)
        }
    }

    #[tokio::test]
    async fn stalled_cluster_does_not_delay_the_others() {
        let retry = RetryPolicy {
            max_attempts: 2,
            timeout: Duration::from_millis(300),
            pause: Duration::from_millis(10),
        };
        let g = TelemetryGauge::new(
            Arc::new(StalledTelemetry),
            store_with(&["stuck", "hot", "stuck-too"]),
            retry,
        );

        // Two stalled clusters queried one after another would need 1.2s.
        let u = tokio::time::timeout(Duration::from_millis(1000), g.utilization())
            .await
            .expect("stalled clusters were queried serially")
            .unwrap();
        assert!((u - 0.95).abs() < 1e-12);
    }
}
