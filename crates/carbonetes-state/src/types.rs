//! Records owned by the state store.
//!
//! Domain types shared with the rest of the workspace come from
//! `carbonetes-core` and are re-exported here for convenience.

use serde::{Deserialize, Serialize};

pub use carbonetes_core::types::*;

/// The active (or a previously active) weight policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyRecord {
    pub weights: WeightVector,
    /// Fitness of the vector when the learner committed it.
    pub fitness: Option<f64>,
    /// Unix timestamp (seconds) of the commit.
    pub committed_at: u64,
}

/// What a placement resolved to, kept for carbon accounting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlacementAudit {
    pub job_id: JobId,
    pub cluster: ClusterId,
    pub score: f64,
    /// Intensity used for the job (override or regional signal), gCO2/kWh.
    pub carbon_intensity: f64,
    /// Estimated emissions over the job's duration, grams.
    pub carbon_grams: f64,
    pub placed_at: u64,
}

/// Result of reading the tail of the history log.
#[derive(Debug, Clone, Default)]
pub struct HistoryBatch {
    /// Decoded records, oldest first.
    pub records: Vec<HistoricalJob>,
    /// Keys of rows that could not be decoded.
    pub malformed: Vec<String>,
}
