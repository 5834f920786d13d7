//! Learner error types.

use carbonetes_core::ErrorKind;
use carbonetes_state::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LearnerError {
    #[error("no active weight policy")]
    MissingPolicy,

    #[error("no clusters to replay against")]
    EmptyRegistry,

    #[error("candidate population is empty")]
    EmptyPopulation,

    #[error("no valid history records ({skipped} skipped)")]
    NoHistory { skipped: usize },

    #[error("state error: {0}")]
    State(#[from] StateError),
}

impl LearnerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LearnerError::MissingPolicy
            | LearnerError::EmptyRegistry
            | LearnerError::EmptyPopulation => ErrorKind::ConfigurationFatal,
            LearnerError::NoHistory { .. } => ErrorKind::SimulationInputInvalid,
            LearnerError::State(e) => e.kind(),
        }
    }
}

pub type LearnerResult<T> = Result<T, LearnerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert!(LearnerError::MissingPolicy.kind().is_fatal());
        assert!(LearnerError::EmptyPopulation.kind().is_fatal());
        assert_eq!(
            LearnerError::NoHistory { skipped: 3 }.kind(),
            ErrorKind::SimulationInputInvalid
        );
        assert_eq!(
            LearnerError::State(StateError::Write("disk full".into())).kind(),
            ErrorKind::TransientIo
        );
        assert_eq!(
            LearnerError::State(StateError::Open("locked".into())).kind(),
            ErrorKind::ConfigurationFatal
        );
    }
}
