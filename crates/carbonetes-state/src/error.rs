//! Error types for the Carbonetes state store.

use carbonetes_core::ErrorKind;
use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

/// Storage failures. Only a database that cannot be opened is fatal;
/// everything else is a transient hiccup the caller may retry.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open state database: {0}")]
    Open(String),

    #[error("state transaction failed: {0}")]
    Transaction(String),

    #[error("state table unavailable: {0}")]
    Table(String),

    #[error("state read failed: {0}")]
    Read(String),

    #[error("state write failed: {0}")]
    Write(String),

    #[error("cannot encode record: {0}")]
    Serialize(String),

    #[error("cannot decode record: {0}")]
    Deserialize(String),
}

impl StateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StateError::Open(_) => ErrorKind::ConfigurationFatal,
            _ => ErrorKind::TransientIo,
        }
    }
}
