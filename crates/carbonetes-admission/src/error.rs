//! Admission error types.

use carbonetes_core::ErrorKind;
use carbonetes_state::StateError;
use carbonetes_telemetry::TelemetryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("job control failed for {job}: {reason}")]
    Control { job: String, reason: String },

    #[error("no utilization reading available")]
    NoReading,

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("state error: {0}")]
    State(#[from] StateError),
}

impl AdmissionError {
    /// Every admission failure is transient: the poll cycle logs it and
    /// carries on.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::TransientIo
    }
}

pub type AdmissionResult<T> = Result<T, AdmissionError>;
