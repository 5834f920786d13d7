//! Placement error types.

use carbonetes_core::ErrorKind;
use carbonetes_state::StateError;
use carbonetes_telemetry::TelemetryError;
use thiserror::Error;

/// Errors that can occur during placement.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("no feasible cluster for job {job}: all above {ceiling_pct}% utilization")]
    Infeasible { job: String, ceiling_pct: f64 },

    #[error("no active weight policy")]
    MissingPolicy,

    #[error("cluster registry is empty")]
    EmptyRegistry,

    #[error("unknown cluster: {0}")]
    UnknownCluster(String),

    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("state error: {0}")]
    State(#[from] StateError),
}

impl PlacementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlacementError::Infeasible { .. } => ErrorKind::PlacementInfeasible,
            PlacementError::MissingPolicy | PlacementError::EmptyRegistry => {
                ErrorKind::ConfigurationFatal
            }
            PlacementError::UnknownCluster(_) => ErrorKind::ConfigurationFatal,
            PlacementError::Telemetry(e) => e.kind(),
            PlacementError::State(e) => e.kind(),
        }
    }
}

/// Result type alias for placement operations.
pub type PlacementResult<T> = Result<T, PlacementError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        let infeasible = PlacementError::Infeasible {
            job: "j".into(),
            ceiling_pct: 85.0,
        };
        assert_eq!(infeasible.kind(), ErrorKind::PlacementInfeasible);
        assert!(PlacementError::MissingPolicy.kind().is_fatal());
        assert!(PlacementError::EmptyRegistry.kind().is_fatal());
        assert_eq!(
            PlacementError::Telemetry(TelemetryError::Timeout("x".into())).kind(),
            ErrorKind::TransientIo
        );
    }
}
