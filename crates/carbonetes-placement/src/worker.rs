//! The placement worker.
//!
//! One task drains the [`JobQueue`] sequentially: read the active policy,
//! place, persist the audit and cluster snapshot, then hand off to the
//! deployer. Jobs that cannot be placed go back to the head of the queue
//! and the worker waits out a fixed backoff before trying again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use carbonetes_core::{ErrorKind, Job, epoch_secs};
use carbonetes_state::StateStore;

use crate::dispatch::Dispatcher;
use crate::engine::{Placement, PlacementEngine};
use crate::error::{PlacementError, PlacementResult};
use crate::queue::JobQueue;

pub struct PlacementWorker {
    engine: PlacementEngine,
    store: StateStore,
    queue: JobQueue,
    dispatcher: Arc<dyn Dispatcher>,
    backoff: Duration,
    refresh_interval: Duration,
}

impl PlacementWorker {
    pub fn new(
        engine: PlacementEngine,
        store: StateStore,
        queue: JobQueue,
        dispatcher: Arc<dyn Dispatcher>,
        backoff: Duration,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            engine,
            store,
            queue,
            dispatcher,
            backoff,
            refresh_interval,
        }
    }

    /// Run until shutdown. Returns an error only for fatal conditions,
    /// such as a missing active policy.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> PlacementResult<()> {
        info!(
            clusters = self.engine.clusters().len(),
            backoff_secs = self.backoff.as_secs(),
            "placement worker started"
        );

        let queue = self.queue.clone();
        let mut refresh = tokio::time::interval(self.refresh_interval);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("placement worker shutting down");
                    return Ok(());
                }
                _ = refresh.tick() => {
                    self.refresh().await;
                }
                job = queue.next() => {
                    let placed = match self.handle(job).await {
                        Ok(placed) => placed,
                        Err(e) => {
                            error!(error = %e, "placement worker stopped");
                            return Err(e);
                        }
                    };
                    if !placed {
                        tokio::select! {
                            _ = tokio::time::sleep(self.backoff) => self.refresh().await,
                            _ = shutdown.changed() => {
                                info!("placement worker shutting down");
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }

    /// Place one job. `Ok(false)` means it was requeued for a later retry.
    pub async fn handle(&mut self, job: Job) -> PlacementResult<bool> {
        let policy = match self.store.active_policy() {
            Ok(Some(policy)) => policy,
            Ok(None) => {
                self.queue.push_front(job).await;
                return Err(PlacementError::MissingPolicy);
            }
            Err(e) => {
                warn!(job = %job.id, error = %e, "could not read active policy, requeueing");
                self.queue.push_front(job).await;
                return Ok(false);
            }
        };

        match self.engine.place(&job, &policy.weights, epoch_secs()) {
            Ok(placement) => {
                self.commit(&placement).await;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::PlacementInfeasible => {
                warn!(job = %job.id, error = %e, "placement infeasible, retrying after backoff");
                self.queue.push_front(job).await;
                Ok(false)
            }
            Err(e) => {
                self.queue.push_front(job).await;
                Err(e)
            }
        }
    }

    async fn commit(&self, placement: &Placement) {
        if let Err(e) = self.store.put_placement_audit(&placement.audit()) {
            warn!(job = %placement.job_id, error = %e, "failed to persist placement audit");
        }
        if let Err(e) = self.store.put_cluster_states(&self.engine.clusters().snapshot()) {
            warn!(error = %e, "failed to persist cluster snapshot");
        }

        info!(
            job = %placement.job_id,
            cluster = %placement.cluster,
            score = placement.score,
            carbon_grams = placement.carbon_grams,
            "job placed"
        );

        // The assignment stands even if the deployer is unreachable.
        if let Err(e) = self.dispatcher.dispatch(&placement.dispatch()).await {
            warn!(job = %placement.job_id, cluster = %placement.cluster, error = %e, "dispatch failed");
        }
    }

    async fn refresh(&mut self) {
        let now = epoch_secs();
        match self.store.list_clusters() {
            Ok(records) if !records.is_empty() && records != self.engine.registry() => {
                if let Err(e) = self.engine.sync_registry(&records, now).await {
                    warn!(error = %e, "failed to apply registry change");
                }
            }
            Ok(_) => {
                self.engine.refresh(now).await;
            }
            Err(e) => {
                warn!(error = %e, "failed to read cluster registry");
                self.engine.refresh(now).await;
            }
        }
        if let Err(e) = self.store.put_cluster_states(&self.engine.clusters().snapshot()) {
            warn!(error = %e, "failed to persist cluster snapshot");
        }
    }
}
