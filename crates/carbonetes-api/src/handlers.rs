//! REST API handlers.
//!
//! Intake endpoints answer with flat JSON for existing submitters. The
//! `/api/v1` endpoints wrap their payload in `{success, data, error}`.

use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use carbonetes_admission::JobEvent;
use carbonetes_core::{ClusterRecord, HistoricalJob, Job, WeightVector, epoch_secs};
use carbonetes_state::PolicyRecord;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Intake ─────────────────────────────────────────────────────

/// Job submission body.
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub task_name: String,
    #[serde(alias = "estimated_time")]
    pub estimated_time_seconds: f64,
    #[serde(default)]
    pub cpu_demand: Option<f64>,
    #[serde(default)]
    pub carbon_override: Option<f64>,
    #[serde(default)]
    pub sla_deadline_secs: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub status: String,
    pub job_id: String,
    pub queue_size: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueSize {
    pub queue_size: usize,
}

fn non_negative(value: Option<f64>) -> bool {
    value.is_none_or(|v| v.is_finite() && v >= 0.0)
}

/// POST /enqueue
pub async fn enqueue(
    State(state): State<ApiState>,
    Json(req): Json<EnqueueRequest>,
) -> impl IntoResponse {
    if req.task_name.trim().is_empty() {
        return error_response("task_name is required", StatusCode::BAD_REQUEST).into_response();
    }
    if !req.estimated_time_seconds.is_finite() || req.estimated_time_seconds < 0.0 {
        return error_response(
            "estimated_time_seconds must be a non-negative number",
            StatusCode::BAD_REQUEST,
        )
        .into_response();
    }
    if !non_negative(req.cpu_demand)
        || !non_negative(req.carbon_override)
        || !non_negative(req.sla_deadline_secs)
    {
        return error_response("optional fields must be non-negative", StatusCode::BAD_REQUEST)
            .into_response();
    }

    let seq = state.next_id.fetch_add(1, Ordering::Relaxed);
    let mut job = Job::new(&req.task_name, req.estimated_time_seconds, epoch_secs());
    job.id = format!("{}-{seq}", req.task_name);
    job.cpu_demand = req.cpu_demand;
    job.carbon_override = req.carbon_override;
    job.sla_deadline_secs = req.sla_deadline_secs;

    let job_id = job.id.clone();
    let queue_size = state.queue.push(job).await;
    debug!(job = %job_id, queue_size, "job enqueued");

    Json(EnqueueResponse {
        status: "queued".to_string(),
        job_id,
        queue_size,
    })
    .into_response()
}

/// GET /queue_size
pub async fn queue_size(State(state): State<ApiState>) -> impl IntoResponse {
    Json(QueueSize {
        queue_size: state.queue.depth().await,
    })
}

// ── Policy ─────────────────────────────────────────────────────

/// GET /api/v1/policy
pub async fn get_policy(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.active_policy() {
        Ok(Some(policy)) => ApiResponse::ok(policy).into_response(),
        Ok(None) => error_response("no active policy", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// PUT /api/v1/policy
pub async fn put_policy(
    State(state): State<ApiState>,
    Json(weights): Json<WeightVector>,
) -> impl IntoResponse {
    if !weights.is_valid() {
        return error_response(
            "weights must be finite and non-negative",
            StatusCode::BAD_REQUEST,
        )
        .into_response();
    }
    let record = PolicyRecord {
        weights,
        fitness: None,
        committed_at: epoch_secs(),
    };
    match state.store.replace_active_policy(&record) {
        Ok(()) => {
            info!(?weights, "active policy replaced via api");
            ApiResponse::ok(record).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

/// GET /api/v1/policy/history
pub async fn policy_history(
    State(state): State<ApiState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    match state.store.list_policy_audit(query.limit) {
        Ok(records) => ApiResponse::ok(records).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Clusters ───────────────────────────────────────────────────

/// GET /api/v1/clusters
pub async fn list_clusters(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_clusters() {
        Ok(clusters) => ApiResponse::ok(clusters).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// PUT /api/v1/clusters
///
/// The placement worker picks registry changes up on its next refresh.
pub async fn put_cluster(
    State(state): State<ApiState>,
    Json(record): Json<ClusterRecord>,
) -> impl IntoResponse {
    if record.name.trim().is_empty() || record.endpoint.trim().is_empty() {
        return error_response("name and endpoint are required", StatusCode::BAD_REQUEST)
            .into_response();
    }
    if !record.tdp_watts.is_finite() || record.tdp_watts < 0.0 {
        return error_response("tdp_watts must be non-negative", StatusCode::BAD_REQUEST)
            .into_response();
    }
    match state.store.put_cluster(&record) {
        Ok(()) => ApiResponse::ok(record).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// DELETE /api/v1/clusters/{name}
pub async fn delete_cluster(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.store.delete_cluster(&name) {
        Ok(true) => ApiResponse::ok("deleted").into_response(),
        Ok(false) => error_response("cluster not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── History ────────────────────────────────────────────────────

/// POST /api/v1/history
pub async fn record_history(
    State(state): State<ApiState>,
    Json(job): Json<HistoricalJob>,
) -> impl IntoResponse {
    if let Err(reason) = job.validate() {
        return error_response(&reason, StatusCode::BAD_REQUEST).into_response();
    }
    match state.store.append_history(&job) {
        Ok(()) => (StatusCode::CREATED, ApiResponse::ok(job.task_id)).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/placements/{job_id}
pub async fn get_placement(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_placement_audit(&job_id) {
        Ok(Some(audit)) => ApiResponse::ok(audit).into_response(),
        Ok(None) => error_response("placement not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Admission ──────────────────────────────────────────────────

/// GET /api/v1/admission
pub async fn admission_view(State(state): State<ApiState>) -> impl IntoResponse {
    let view = state.admission.borrow().clone();
    ApiResponse::ok(view)
}

/// POST /api/v1/admission/events
pub async fn admission_event(
    State(state): State<ApiState>,
    Json(event): Json<JobEvent>,
) -> impl IntoResponse {
    match state.events.send(event).await {
        Ok(()) => (StatusCode::ACCEPTED, ApiResponse::ok("accepted")).into_response(),
        Err(_) => error_response(
            "admission controller is not running",
            StatusCode::SERVICE_UNAVAILABLE,
        )
        .into_response(),
    }
}
