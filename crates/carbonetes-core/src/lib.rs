//! carbonetes-core — shared vocabulary for the Carbonetes scheduler.
//!
//! Holds the domain types every other crate speaks (jobs, clusters,
//! weight vectors, historical records), the error taxonomy callers branch
//! on, and the `carbonetes.toml` configuration model.

pub mod config;
pub mod error;
pub mod types;

pub use config::CarbonetesConfig;
pub use error::{ConfigError, ErrorKind};
pub use types::*;
