//! Candidate generation around the active policy.

use carbonetes_core::config::LearnerConfig;
use carbonetes_core::{WeightDim, WeightVector};

/// Perturb every component by a uniform draw in `[-rate, rate]`, clamped
/// to `[0, 1]`.
pub fn mutate(base: &WeightVector, rate: f64, rng: &mut fastrand::Rng) -> WeightVector {
    let mut out = *base;
    for dim in WeightDim::ALL {
        let delta = (rng.f64() * 2.0 - 1.0) * rate;
        out = out.nudged(dim, delta);
    }
    out
}

/// The current vector (if configured) followed by `population_size`
/// mutants, each averaged with the current vector.
///
/// May return an empty population; callers treat that as fatal.
pub fn generate_population(
    current: &WeightVector,
    config: &LearnerConfig,
    rng: &mut fastrand::Rng,
) -> Vec<WeightVector> {
    let mut population = Vec::with_capacity(config.population_size + 1);
    if config.include_current {
        population.push(*current);
    }
    for _ in 0..config.population_size {
        let mutant = mutate(current, config.mutation_rate, rng);
        population.push(mutant.midpoint(current));
    }
    population
}
