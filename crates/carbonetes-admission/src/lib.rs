//! carbonetes-admission — protects clusters under load by suspending and
//! resuming managed jobs.
//!
//! Running jobs sit on a LIFO stack, suspended jobs in a FIFO queue. A
//! periodic poll of aggregate CPU utilization suspends the most recently
//! started job above the high watermark and resumes the longest-waiting
//! job below the low watermark. Between the two nothing happens.
//!
//! Job lifecycle events and the poll timer are multiplexed by a single
//! task ([`AdmissionController::run`]), so the stack and queue have one
//! writer and need no lock.

pub mod control;
pub mod controller;
pub mod error;
pub mod gauge;
pub mod state;

pub use control::{HttpJobControl, JobControl};
pub use controller::AdmissionController;
pub use error::{AdmissionError, AdmissionResult};
pub use gauge::{CpuGauge, TelemetryGauge};
pub use state::{AdmissionAction, AdmissionRecord, AdmissionState, AdmissionView, JobEvent, JobStatus};
