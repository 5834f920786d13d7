//! Applying suspend/resume to the orchestration layer.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::error::{AdmissionError, AdmissionResult};
use crate::state::AdmissionRecord;

/// Flips the suspend flag of a managed job.
#[async_trait]
pub trait JobControl: Send + Sync {
    async fn set_suspended(&self, record: &AdmissionRecord, suspend: bool) -> AdmissionResult<()>;
}

#[derive(Debug, Serialize)]
struct SuspendPatch<'a> {
    namespace: &'a str,
    name: &'a str,
    cluster: &'a str,
    suspend: bool,
}

/// Posts `{namespace, name, cluster, suspend}` to a bridge endpoint that
/// patches the job object.
#[derive(Debug, Clone)]
pub struct HttpJobControl {
    url: String,
    timeout: Duration,
}

impl HttpJobControl {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl JobControl for HttpJobControl {
    async fn set_suspended(&self, record: &AdmissionRecord, suspend: bool) -> AdmissionResult<()> {
        let patch = SuspendPatch {
            namespace: &record.namespace,
            name: &record.job_id,
            cluster: &record.cluster,
            suspend,
        };
        carbonetes_telemetry::http::post_json(&self.url, &patch, self.timeout)
            .await
            .map_err(|e| AdmissionError::Control {
                job: record.job_id.clone(),
                reason: e.to_string(),
            })?;
        debug!(job = %record.job_id, suspend, "suspend flag patched");
        Ok(())
    }
}
