//! carbonetes-placement — carbon-aware, multi-objective cluster placement.
//!
//! Scores every registered cluster for one job at a time and hands the
//! winner to an external deployer. The scoring function in [`scorer`] is
//! pure and is reused verbatim by the replay simulator in
//! `carbonetes-learner`, so online placement and offline evaluation can
//! never drift apart.
//!
//! # Components
//!
//! - **`scorer`**: feature extraction, normalization, weighted score
//! - **`cluster_state`**: projected utilization / drain per cluster
//! - **`engine`**: `place()` plus telemetry refresh
//! - **`queue`**: inbound job queue
//! - **`dispatch`**: handoff of `{cluster, task_name}` to the deployer
//! - **`worker`**: the single sequential placement worker

pub mod cluster_state;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod queue;
pub mod scorer;
pub mod worker;

pub use cluster_state::ClusterStateStore;
pub use dispatch::{Dispatcher, HttpDispatcher};
pub use engine::{Placement, PlacementEngine};
pub use error::{PlacementError, PlacementResult};
pub use queue::JobQueue;
pub use scorer::{
    ClusterScore, Features, JobProfile, ScoringParams, cpu_increment, overload_penalty,
    rank_clusters, resolved_carbon_intensity, score_cluster, select_cluster,
};
pub use worker::PlacementWorker;
