//! carbonetes-learner — offline tuning of the placement weight vector.
//!
//! A learning pass reads the tail of the historical job log, builds a
//! population of candidate weight vectors around the active policy,
//! replays the history for every candidate in parallel, refines the
//! winner by hill climbing and commits it as the new active policy.
//!
//! The replay uses the exact scoring function and state-mutation rules of
//! `carbonetes-placement`, on a private clone of the cluster snapshot per
//! run. It contains no randomness: the same inputs always produce the
//! same [`SimMetrics`]. Only population generation draws random numbers,
//! from a seedable `fastrand::Rng`.

pub mod error;
pub mod fitness;
pub mod learner;
pub mod population;
pub mod simulator;

pub use error::{LearnerError, LearnerResult};
pub use fitness::{exclusive_percentile, fitness};
pub use learner::{LearnOutcome, LearnTrigger, PolicyLearner};
pub use population::{generate_population, mutate};
pub use simulator::{ReplaySettings, ReplaySimulator, SimMetrics};
