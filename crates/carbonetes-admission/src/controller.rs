//! The admission control loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use carbonetes_core::config::AdmissionConfig;

use crate::control::JobControl;
use crate::error::{AdmissionError, AdmissionResult};
use crate::gauge::CpuGauge;
use crate::state::{AdmissionAction, AdmissionState, AdmissionView, JobEvent};

pub struct AdmissionController {
    state: AdmissionState,
    control: Arc<dyn JobControl>,
    gauge: Arc<dyn CpuGauge>,
    poll_interval: Duration,
    call_timeout: Duration,
    view: watch::Sender<AdmissionView>,
}

impl AdmissionController {
    /// Build a controller and the receiver its view is published on.
    pub fn new(
        config: &AdmissionConfig,
        control: Arc<dyn JobControl>,
        gauge: Arc<dyn CpuGauge>,
        call_timeout: Duration,
    ) -> (Self, watch::Receiver<AdmissionView>) {
        let state = AdmissionState::from_config(config);
        let (view, rx) = watch::channel(state.view());
        let controller = Self {
            state,
            control,
            gauge,
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            call_timeout,
            view,
        };
        (controller, rx)
    }

    pub fn view(&self) -> AdmissionView {
        self.state.view()
    }

    /// Apply a lifecycle event and publish the result.
    pub fn on_event(&mut self, event: JobEvent) {
        if self.state.on_event(event) {
            self.publish();
        }
    }

    /// Run one poll cycle.
    ///
    /// A failed gauge read skips the cycle with no state change. The gauge
    /// bounds its own reads; only the control call runs under
    /// `call_timeout`. A failed control call reverts the chosen action so
    /// the job stays where it was.
    pub async fn poll(&mut self) -> AdmissionResult<Option<AdmissionAction>> {
        let utilization = self.gauge.utilization().await?;

        let Some(action) = self.state.decide(utilization) else {
            debug!(utilization, "within watermarks");
            self.publish();
            return Ok(None);
        };

        let record = action.record();
        let outcome = tokio::time::timeout(
            self.call_timeout,
            self.control.set_suspended(record, action.suspend()),
        )
        .await
        .unwrap_or(Err(AdmissionError::Timeout("job control")));

        if let Err(e) = outcome {
            self.state.revert(&action);
            self.publish();
            return Err(match e {
                AdmissionError::Control { .. } => e,
                other => AdmissionError::Control {
                    job: record.job_id.clone(),
                    reason: other.to_string(),
                },
            });
        }

        match &action {
            AdmissionAction::Suspend(r) => {
                info!(job = %r.job_id, cluster = %r.cluster, utilization, "job suspended")
            }
            AdmissionAction::Resume(r) => {
                info!(job = %r.job_id, cluster = %r.cluster, utilization, "job resumed")
            }
        }
        self.publish();
        Ok(Some(action))
    }

    /// Multiplex lifecycle events and the poll timer until shutdown.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<JobEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> AdmissionResult<()> {
        info!(
            poll_secs = self.poll_interval.as_secs(),
            "admission controller started"
        );

        let mut tick = tokio::time::interval(self.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_open = true;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("admission controller shutting down");
                    return Ok(());
                }
                event = events.recv(), if events_open => match event {
                    Some(event) => self.on_event(event),
                    None => {
                        debug!("event channel closed");
                        events_open = false;
                    }
                },
                _ = tick.tick() => {
                    match self.poll().await {
                        Ok(_) => {}
                        Err(e @ AdmissionError::Control { .. }) => {
                            warn!(error = %e, "admission action reverted");
                        }
                        Err(e) => {
                            warn!(error = %e, "admission poll skipped");
                        }
                    }
                }
            }
        }
    }

    fn publish(&self) {
        self.view.send_replace(self.state.view());
    }
}
