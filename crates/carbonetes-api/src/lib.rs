//! carbonetes-api — REST API for Carbonetes.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/enqueue` | Submit a job for placement |
//! | GET | `/queue_size` | Jobs awaiting placement |
//! | GET | `/api/v1/policy` | Active weight vector |
//! | PUT | `/api/v1/policy` | Replace the active weight vector |
//! | GET | `/api/v1/policy/history` | Committed weight vectors, newest first |
//! | GET | `/api/v1/clusters` | Cluster registry |
//! | PUT | `/api/v1/clusters` | Upsert a registry row |
//! | DELETE | `/api/v1/clusters/{name}` | Remove a registry row |
//! | POST | `/api/v1/history` | Record a finished job |
//! | GET | `/api/v1/placements/{job_id}` | Placement carbon audit |
//! | GET | `/api/v1/admission` | Running stack and waiting queue |
//! | POST | `/api/v1/admission/events` | Job lifecycle event |

pub mod handlers;

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use axum::Router;
use axum::routing::{delete, get, post};
use tokio::sync::{mpsc, watch};

use carbonetes_admission::{AdmissionView, JobEvent};
use carbonetes_placement::JobQueue;
use carbonetes_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub queue: JobQueue,
    pub events: mpsc::Sender<JobEvent>,
    pub admission: watch::Receiver<AdmissionView>,
    pub(crate) next_id: Arc<AtomicU64>,
}

impl ApiState {
    pub fn new(
        store: StateStore,
        queue: JobQueue,
        events: mpsc::Sender<JobEvent>,
        admission: watch::Receiver<AdmissionView>,
    ) -> Self {
        Self {
            store,
            queue,
            events,
            admission,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/policy", get(handlers::get_policy).put(handlers::put_policy))
        .route("/policy/history", get(handlers::policy_history))
        .route("/clusters", get(handlers::list_clusters).put(handlers::put_cluster))
        .route("/clusters/{name}", delete(handlers::delete_cluster))
        .route("/history", post(handlers::record_history))
        .route("/placements/{job_id}", get(handlers::get_placement))
        .route("/admission", get(handlers::admission_view))
        .route("/admission/events", post(handlers::admission_event))
        .with_state(state.clone());

    Router::new()
        .route("/enqueue", post(handlers::enqueue))
        .route("/queue_size", get(handlers::queue_size))
        .with_state(state)
        .nest("/api/v1", api_routes)
}

