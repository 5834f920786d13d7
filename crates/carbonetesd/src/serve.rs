//! `serve`: every loop plus the REST API in one process.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use carbonetes_admission::{
    AdmissionController, AdmissionView, HttpJobControl, JobEvent, TelemetryGauge,
};
use carbonetes_api::ApiState;
use carbonetes_core::{CarbonetesConfig, epoch_secs};
use carbonetes_placement::{
    HttpDispatcher, JobQueue, PlacementEngine, PlacementWorker, ScoringParams,
};
use carbonetes_telemetry::{NodeExporterTelemetry, RetryPolicy, TelemetryProvider};

use crate::bootstrap;

const EVENT_BUFFER: usize = 256;

pub async fn run(config: CarbonetesConfig, db: &Path, port: u16) -> anyhow::Result<()> {
    info!("Carbonetes daemon starting");

    let store = bootstrap::open_store(db)?;
    let now = epoch_secs();
    let registry = bootstrap::seed(&store, &config, now)?;

    // ── Telemetry ──────────────────────────────────────────────

    let telemetry = Arc::new(NodeExporterTelemetry::from_config(&config.telemetry));
    let carbon = telemetry.carbon_table().clone();
    let telemetry: Arc<dyn TelemetryProvider> = telemetry;
    let retry = RetryPolicy::from_config(&config.telemetry);
    let call_timeout = Duration::from_secs(config.telemetry.timeout_secs);

    // ── Placement ──────────────────────────────────────────────

    let clusters = bootstrap::cluster_state(&store, &registry, &carbon, now)?;
    let engine = PlacementEngine::new(
        ScoringParams::from(&config.placement),
        clusters,
        &registry,
        telemetry.clone(),
        retry,
    );
    let queue = JobQueue::new();
    let worker = PlacementWorker::new(
        engine,
        store.clone(),
        queue.clone(),
        Arc::new(HttpDispatcher::from_config(&config.dispatch, call_timeout)),
        Duration::from_secs(config.placement.infeasible_backoff_secs),
        Duration::from_secs(config.placement.refresh_interval_secs.max(1)),
    );
    info!(clusters = registry.len(), dispatch = %config.dispatch.url, "placement engine initialized");

    // ── Learner ────────────────────────────────────────────────

    let learner = Arc::new(bootstrap::learner(store.clone(), &config));

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    // ── Admission ──────────────────────────────────────────────

    let (events_tx, events_rx) = mpsc::channel::<JobEvent>(EVENT_BUFFER);
    let (admission_view, admission_handle) = match &config.admission.control_url {
        Some(url) => {
            let (controller, view) = AdmissionController::new(
                &config.admission,
                Arc::new(HttpJobControl::new(url.clone(), call_timeout)),
                Arc::new(TelemetryGauge::new(telemetry.clone(), store.clone(), retry)),
                call_timeout,
            );
            let shutdown = shutdown_rx.clone();
            let handle = tokio::spawn(async move {
                if let Err(e) = controller.run(events_rx, shutdown).await {
                    error!(error = %e, "admission controller stopped");
                }
            });
            info!(control = %url, "admission controller initialized");
            (view, Some(handle))
        }
        None => {
            info!("admission control disabled: no control_url configured");
            drop(events_rx);
            let (_, view) = watch::channel(AdmissionView::default());
            (view, None)
        }
    };

    // ── Start background tasks ─────────────────────────────────

    let worker_shutdown = shutdown_rx.clone();
    let worker_stop = Arc::clone(&shutdown_tx);
    let worker_handle = tokio::spawn(async move {
        let result = worker.run(worker_shutdown).await;
        if result.is_err() {
            worker_stop.send_replace(true);
        }
        result
    });

    let learner_handle = tokio::spawn(learner.run(shutdown_rx.clone()));

    // ── Start API server ───────────────────────────────────────

    let state = ApiState::new(store, queue, events_tx, admission_view);
    let router = carbonetes_api::build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let mut stopped = shutdown_rx.clone();
    let signal_tx = Arc::clone(&shutdown_tx);
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "failed to listen for ctrl-c");
                }
                info!("shutdown signal received");
            }
            _ = stopped.changed() => {
                info!("shutting down after fatal worker error");
            }
        }
        signal_tx.send_replace(true);
    });

    server.await?;

    // Wait for background tasks.
    let worker_result = worker_handle.await?;
    let _ = learner_handle.await;
    if let Some(handle) = admission_handle {
        let _ = handle.await;
    }

    info!("Carbonetes daemon stopped");
    worker_result.map_err(Into::into)
}
