//! Carbon intensity lookup and emission arithmetic.

use std::collections::HashMap;

use carbonetes_core::config::TelemetryConfig;

/// Static region → intensity table (gCO2/kWh) with a fallback value.
#[derive(Debug, Clone)]
pub struct CarbonTable {
    intensities: HashMap<String, f64>,
    default_intensity: f64,
}

impl CarbonTable {
    pub fn new(intensities: HashMap<String, f64>, default_intensity: f64) -> Self {
        Self {
            intensities,
            default_intensity,
        }
    }

    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self::new(
            config.carbon_intensity.clone(),
            config.default_carbon_intensity,
        )
    }

    /// Intensity for a region, falling back to the default.
    pub fn intensity(&self, region: &str) -> f64 {
        self.intensities
            .get(region)
            .copied()
            .unwrap_or(self.default_intensity)
    }

    /// Whether the region has an explicit entry.
    pub fn knows(&self, region: &str) -> bool {
        self.intensities.contains_key(region)
    }
}

/// Intensity integrated over a job's duration (gCO2/kWh · h).
pub fn integrated_emission(intensity: f64, duration_secs: f64) -> f64 {
    intensity * duration_secs / 3600.0
}

/// Grams of CO2 emitted by a node drawing `cpu_fraction` of its TDP.
pub fn node_emission_grams(
    tdp_watts: f64,
    cpu_fraction: f64,
    duration_secs: f64,
    intensity: f64,
) -> f64 {
    let kwh = tdp_watts * cpu_fraction.clamp(0.0, 1.0) * (duration_secs / 3600.0) / 1000.0;
    kwh * intensity
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_lookup() {
        let table = CarbonTable::from_config(&TelemetryConfig::default());
        assert_eq!(table.intensity("KR"), 310.0);
        assert_eq!(table.intensity("FR"), 18.0);
        assert!(!table.knows("DE"));
        assert_eq!(table.intensity("DE"), 400.0);
    }

    #[test]
    fn integrated_over_one_hour() {
        assert_eq!(integrated_emission(310.0, 3600.0), 310.0);
        assert_eq!(integrated_emission(18.0, 1800.0), 9.0);
    }

    #[test]
    fn node_emission_at_full_load() {
        // 95 W for one hour is 0.095 kWh.
        let g = node_emission_grams(95.0, 1.0, 3600.0, 310.0);
        assert!((g - 29.45).abs() < 1e-9);
        assert_eq!(node_emission_grams(95.0, 0.0, 3600.0, 310.0), 0.0);
    }
}
