//! Scalar fitness of a replay run (lower is better).

use carbonetes_core::config::FitnessConfig;

/// `α·carbon + β·slaMisses + γ·pXX + ζ·mean`.
pub fn fitness(
    config: &FitnessConfig,
    total_carbon: f64,
    sla_misses: usize,
    percentile_latency: f64,
    mean_latency: f64,
) -> f64 {
    config.alpha * total_carbon
        + config.beta * sla_misses as f64
        + config.gamma * percentile_latency
        + config.zeta * mean_latency
}

/// Percentile with the "exclusive" method over 100 cut points: rank
/// `i·(n+1)/100` with linear interpolation, clamped to the sample range.
///
/// A single sample is its own percentile; no samples give 0.
pub fn exclusive_percentile(samples: &[f64], p: f64) -> f64 {
    match samples.len() {
        0 => return 0.0,
        1 => return samples[0],
        _ => {}
    }

    let mut data = samples.to_vec();
    data.sort_by(f64::total_cmp);

    const N: usize = 100;
    let len = data.len();
    let m = len + 1;
    let i = ((p * N as f64).round() as usize).clamp(1, N - 1);

    let j = (i * m / N).clamp(1, len - 1);
    // i·m − j·n may be negative once j is clamped up to 1.
    let delta = (i * m) as f64 - (j * N) as f64;
    (data[j - 1] * (N as f64 - delta) + data[j] * delta) / N as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_single() {
        assert_eq!(exclusive_percentile(&[], 0.95), 0.0);
        assert_eq!(exclusive_percentile(&[7.0], 0.95), 7.0);
    }

    #[test]
    fn matches_exclusive_quantiles() {
        // statistics.quantiles(range(1, 11), n=100)[94] == 10.45
        let data: Vec<f64> = (1..=10).map(f64::from).collect();
        assert!((exclusive_percentile(&data, 0.95) - 10.45).abs() < 1e-9);
        // [49] == 5.5
        assert!((exclusive_percentile(&data, 0.50) - 5.5).abs() < 1e-9);
    }

    #[test]
    fn two_samples_extrapolate() {
        // quantiles([0, 10], n=100)[94] == 18.5
        assert!((exclusive_percentile(&[10.0, 0.0], 0.95) - 18.5).abs() < 1e-9);
    }

    #[test]
    fn order_independent() {
        let a = [5.0, 1.0, 9.0, 3.0, 7.0];
        let b = [9.0, 7.0, 5.0, 3.0, 1.0];
        assert_eq!(exclusive_percentile(&a, 0.95), exclusive_percentile(&b, 0.95));
    }

    #[test]
    fn weighted_sum() {
        let cfg = FitnessConfig::default();
        // 1·500 + 100·2 + 0.1·30 + 0·10
        assert!((fitness(&cfg, 500.0, 2, 30.0, 10.0) - 703.0).abs() < 1e-9);
    }
}
