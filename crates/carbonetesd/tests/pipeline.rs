//! End-to-end: intake through placement, dispatch and learning, wired the
//! way `serve` wires them but with in-process telemetry and deployer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tower::ServiceExt;

use carbonetes_admission::AdmissionView;
use carbonetes_api::{ApiState, build_router};
use carbonetes_core::config::{LearnerConfig, TelemetryConfig};
use carbonetes_core::{ClusterRecord, Dispatch, WeightVector, epoch_secs};
use carbonetes_learner::PolicyLearner;
use carbonetes_placement::{
    ClusterStateStore, Dispatcher, JobQueue, PlacementEngine, PlacementWorker, ScoringParams,
};
use carbonetes_state::StateStore;
use carbonetes_telemetry::{
    CarbonTable, ClusterUtilization, RetryPolicy, TelemetryProvider, TelemetryResult,
};

/// Reports no utilization sample; intensity comes from the table.
struct IdleTelemetry(CarbonTable);

#[async_trait]
impl TelemetryProvider for IdleTelemetry {
    async fn cluster_utilization(
        &self,
        _cluster: &ClusterRecord,
    ) -> TelemetryResult<Option<ClusterUtilization>> {
        Ok(None)
    }

    async fn carbon_intensity(&self, region: &str) -> TelemetryResult<f64> {
        Ok(self.0.intensity(region))
    }
}

#[derive(Default)]
struct RecordingDispatcher {
    sent: Mutex<Vec<Dispatch>>,
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn dispatch(&self, dispatch: &Dispatch) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(dispatch.clone());
        Ok(())
    }
}

fn registry() -> Vec<ClusterRecord> {
    vec![
        ClusterRecord {
            name: "kr".into(),
            endpoint: "10.0.0.1:9100".into(),
            region: "KR".into(),
            tdp_watts: 95.0,
        },
        ClusterRecord {
            name: "fr".into(),
            endpoint: "10.0.1.1:9100".into(),
            region: "FR".into(),
            tdp_watts: 95.0,
        },
    ]
}

fn seeded_store(dir: &tempfile::TempDir, weights: WeightVector) -> StateStore {
    let store = StateStore::open(&dir.path().join("carbonetes.redb")).unwrap();
    for record in registry() {
        store.put_cluster(&record).unwrap();
    }
    store.seed_policy_if_absent(weights, 1).unwrap();
    store
}

fn router_for(store: &StateStore, queue: &JobQueue) -> axum::Router {
    let (events_tx, _events_rx) = mpsc::channel(1);
    let (_view_tx, view_rx) = watch::channel(AdmissionView::default());
    build_router(ApiState::new(store.clone(), queue.clone(), events_tx, view_rx))
}

async fn send(router: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn submitted_job_is_placed_on_cleanest_cluster() {
    let dir = tempfile::tempdir().unwrap();
    // Carbon only: the low-intensity region must win.
    let store = seeded_store(&dir, WeightVector::new(0.0, 0.0, 0.0, 1.0));
    let table = CarbonTable::from_config(&TelemetryConfig::default());
    let registry = store.list_clusters().unwrap();

    let clusters =
        ClusterStateStore::from_registry(&registry, |r| table.intensity(r), epoch_secs()).unwrap();
    let engine = PlacementEngine::new(
        ScoringParams::default(),
        clusters,
        &registry,
        Arc::new(IdleTelemetry(table.clone())),
        RetryPolicy {
            max_attempts: 1,
            timeout: Duration::from_secs(1),
            pause: Duration::from_millis(1),
        },
    );
    let queue = JobQueue::new();
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let worker = PlacementWorker::new(
        engine,
        store.clone(),
        queue.clone(),
        dispatcher.clone(),
        Duration::from_secs(1),
        Duration::from_secs(60),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(worker.run(shutdown_rx));

    let router = router_for(&store, &queue);
    let (status, body) = send(
        &router,
        "POST",
        "/enqueue",
        Some(json!({"task_name": "resnet", "estimated_time_seconds": 3600})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    tokio::time::timeout(Duration::from_secs(5), async {
        while dispatcher.sent.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("job was never dispatched");

    assert_eq!(
        dispatcher.sent.lock().unwrap()[0],
        Dispatch {
            cluster: "fr".into(),
            task_name: "resnet".into(),
        }
    );

    let (status, body) = send(&router, "GET", &format!("/api/v1/placements/{job_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["cluster"], "fr");
    assert_eq!(body["data"]["carbon_intensity"], 18.0);

    let (_, body) = send(&router, "GET", "/queue_size", None).await;
    assert_eq!(body["queue_size"], 0);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    let snapshot = store.list_cluster_states().unwrap();
    let fr = snapshot.iter().find(|c| c.name == "fr").unwrap();
    assert!(fr.utilization_pct > 0.0);
}

#[tokio::test]
async fn ingested_history_drives_a_policy_commit() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, WeightVector::default());
    let queue = JobQueue::new();
    let router = router_for(&store, &queue);

    for i in 0..12u64 {
        let cluster = if i % 2 == 0 { "kr" } else { "fr" };
        let (status, _) = send(
            &router,
            "POST",
            "/api/v1/history",
            Some(json!({
                "task_id": format!("t{i}"),
                "dispatched_at": 10_000 + i * 120,
                "estimated_time": 600.0,
                "actual_runtime": 540.0 + i as f64,
                "avg_cpu_usage": 1200.0,
                "cluster_name": cluster,
                "carbon_intensity": 0.0,
                "queue_delay": 3.0,
                "sla_deadline_secs": 900.0
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let config = LearnerConfig {
        seed: Some(42),
        ..LearnerConfig::default()
    };
    let learner = PolicyLearner::new(
        store.clone(),
        ScoringParams::default(),
        config,
        CarbonTable::from_config(&TelemetryConfig::default()),
    );
    let outcome = tokio::task::spawn_blocking(move || learner.learn())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.history_used, 12);
    assert!(outcome.metrics.fitness <= outcome.previous_fitness + 1e-9);

    let (status, body) = send(&router, "GET", "/api/v1/policy", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["fitness"].is_number());

    let (_, body) = send(&router, "GET", "/api/v1/policy/history", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}
