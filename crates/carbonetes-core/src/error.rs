//! Error taxonomy shared by all Carbonetes crates.

use thiserror::Error;

/// Coarse classification of a failure.
///
/// Each crate's error type maps onto one of these through a `kind()`
/// method, so callers decide between retrying, skipping, and aborting
/// without looking at message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Telemetry, API, network or storage hiccup. Retry with bounded
    /// attempts, then degrade to a cached value or skip the cycle.
    TransientIo,
    /// Missing active policy, empty registry, empty population. The
    /// operation must abort rather than run with undefined state.
    ConfigurationFatal,
    /// Every cluster is above the ceiling. The caller retries later.
    PlacementInfeasible,
    /// A malformed historical record. Skip it and keep going.
    SimulationInputInvalid,
}

impl ErrorKind {
    /// Whether the operation that produced this error must abort.
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorKind::ConfigurationFatal)
    }
}

/// Errors raised while loading or validating `carbonetes.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ConfigurationFatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_configuration_errors_are_fatal() {
        assert!(ErrorKind::ConfigurationFatal.is_fatal());
        assert!(!ErrorKind::TransientIo.is_fatal());
        assert!(!ErrorKind::PlacementInfeasible.is_fatal());
        assert!(!ErrorKind::SimulationInputInvalid.is_fatal());
    }
}
