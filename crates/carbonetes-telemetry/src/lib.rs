//! carbonetes-telemetry — the Telemetry Provider capability.
//!
//! The placement engine and the admission controller only see the
//! [`TelemetryProvider`] trait. This crate ships the production
//! implementation, which scrapes node-exporter endpoints and derives CPU
//! utilization from two successive samples, plus a region table for
//! carbon intensity.
//!
//! # Architecture
//!
//! ```text
//! NodeExporterTelemetry
//!   ├── http::get_text()        (hyper http1, per-call timeout)
//!   ├── exporter::parse_*()     (text exposition → counters)
//!   ├── exporter::CpuSampler    (two-sample Δidle/Δtotal)
//!   └── carbon::CarbonTable     (region → gCO2/kWh)
//! retry::with_retry()           (bounded attempts, timeout = transient)
//! ```

pub mod carbon;
pub mod error;
pub mod exporter;
pub mod http;
pub mod provider;
pub mod retry;

pub use carbon::{CarbonTable, integrated_emission, node_emission_grams};
pub use error::{TelemetryError, TelemetryResult};
pub use exporter::{CpuSampler, CpuTimes, MemoryStats};
pub use provider::{ClusterUtilization, NodeExporterTelemetry, TelemetryProvider};
pub use retry::{RetryPolicy, with_retry};
