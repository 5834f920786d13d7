//! Handoff of placed jobs to the external deployer.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use carbonetes_core::Dispatch;
use carbonetes_core::config::DispatchConfig;
use carbonetes_telemetry::http;

/// Receives `{cluster, task_name}` once a job is placed.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, dispatch: &Dispatch) -> anyhow::Result<()>;
}

/// POSTs the dispatch tuple as JSON to the deployer.
pub struct HttpDispatcher {
    url: String,
    timeout: Duration,
}

impl HttpDispatcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }

    pub fn from_config(config: &DispatchConfig, timeout: Duration) -> Self {
        Self::new(config.url.clone(), timeout)
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(&self, dispatch: &Dispatch) -> anyhow::Result<()> {
        http::post_json(&self.url, dispatch, self.timeout).await?;
        debug!(cluster = %dispatch.cluster, task = %dispatch.task_name, url = %self.url, "dispatched");
        Ok(())
    }
}
