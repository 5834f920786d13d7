//! Bounded retry with a per-attempt timeout.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use carbonetes_core::config::TelemetryConfig;

use crate::error::{TelemetryError, TelemetryResult};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub timeout: Duration,
    pub pause: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            timeout: Duration::from_secs(config.timeout_secs),
            pause: Duration::from_millis(200),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&TelemetryConfig::default())
    }
}

/// Run `op` until it succeeds or `max_attempts` is exhausted.
///
/// Each attempt is wrapped in `policy.timeout`; a timed-out attempt counts
/// as a failure. The last error is returned.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> TelemetryResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TelemetryResult<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last = TelemetryError::Timeout(what.to_string());

    for attempt in 1..=attempts {
        match tokio::time::timeout(policy.timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                debug!(what, attempt, error = %e, "telemetry attempt failed");
                last = e;
            }
            Err(_) => {
                debug!(what, attempt, "telemetry attempt timed out");
                last = TelemetryError::Timeout(what.to_string());
            }
        }
        if attempt < attempts {
            tokio::time::sleep(policy.pause).await;
        }
    }

    warn!(what, attempts, error = %last, "telemetry retries exhausted");
    Err(last)
}

/// Reject readings that are not finite percentages.
pub fn validate_percent(value: f64) -> TelemetryResult<f64> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(value)
    } else {
        Err(TelemetryError::InvalidReading(format!("{value} is not a percentage")))
    }
}
