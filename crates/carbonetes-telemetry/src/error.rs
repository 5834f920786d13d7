//! Telemetry error types.

use carbonetes_core::ErrorKind;
use thiserror::Error;

/// Errors that can occur while fetching telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("request to {0} timed out")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("unexpected status {status} from {target}")]
    Status { target: String, status: u16 },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid reading: {0}")]
    InvalidReading(String),

    #[error("cluster {0} has no telemetry endpoints")]
    NoEndpoints(String),
}

impl TelemetryError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::TransientIo
    }
}

/// Result type alias for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
