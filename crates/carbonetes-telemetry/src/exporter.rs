//! Node-exporter text exposition parsing and CPU sampling.
//!
//! CPU utilization is not a gauge in node-exporter: it has to be derived
//! from two scrapes of the cumulative `node_cpu_seconds_total` counters.
//! [`CpuSampler`] remembers the previous scrape per endpoint.

use std::collections::HashMap;

use crate::error::{TelemetryError, TelemetryResult};

const CPU_METRIC: &str = "node_cpu_seconds_total";
const MEM_TOTAL_METRIC: &str = "node_memory_MemTotal_bytes";
const MEM_AVAILABLE_METRIC: &str = "node_memory_MemAvailable_bytes";

/// Cumulative CPU seconds summed over every core and mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuTimes {
    pub idle: f64,
    pub total: f64,
}

/// Memory gauges in bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryStats {
    pub total_bytes: f64,
    pub available_bytes: f64,
}

impl MemoryStats {
    /// Used memory as a percentage, 0 when the total is unknown.
    pub fn used_pct(&self) -> f64 {
        if self.total_bytes <= 0.0 {
            return 0.0;
        }
        ((self.total_bytes - self.available_bytes) / self.total_bytes * 100.0).clamp(0.0, 100.0)
    }
}

/// Split one exposition line into `(name, labels, value)`.
///
/// Comment lines and lines without a value yield `None`.
fn split_sample(line: &str) -> Option<(&str, &str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (head, rest) = match line.find('{') {
        Some(open) => {
            let close = line[open..].find('}')? + open;
            (&line[..open], (&line[open + 1..close], &line[close + 1..]))
        }
        None => {
            let split = line.find(char::is_whitespace)?;
            (&line[..split], ("", &line[split..]))
        }
    };
    let (labels, tail) = rest;
    // A trailing timestamp is allowed after the value.
    let value = tail.split_whitespace().next()?;
    Some((head, labels, value))
}

fn label<'a>(labels: &'a str, key: &str) -> Option<&'a str> {
    labels.split(',').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k.trim() == key).then(|| v.trim().trim_matches('"'))
    })
}

/// Sum `node_cpu_seconds_total` across cores and modes.
pub fn parse_cpu_times(text: &str) -> TelemetryResult<CpuTimes> {
    let mut idle = 0.0;
    let mut total = 0.0;
    let mut seen = false;

    for (name, labels, value) in text.lines().filter_map(split_sample) {
        if name != CPU_METRIC {
            continue;
        }
        let v: f64 = value
            .parse()
            .map_err(|_| TelemetryError::Parse(format!("bad {CPU_METRIC} value {value:?}")))?;
        seen = true;
        total += v;
        if label(labels, "mode") == Some("idle") {
            idle += v;
        }
    }

    if !seen {
        return Err(TelemetryError::Parse(format!("no {CPU_METRIC} samples")));
    }
    Ok(CpuTimes { idle, total })
}

/// Extract total and available memory, if both are exposed.
pub fn parse_memory(text: &str) -> Option<MemoryStats> {
    let mut total = None;
    let mut available = None;
    for (name, _, value) in text.lines().filter_map(split_sample) {
        match name {
            MEM_TOTAL_METRIC => total = value.parse::<f64>().ok(),
            MEM_AVAILABLE_METRIC => available = value.parse::<f64>().ok(),
            _ => {}
        }
    }
    Some(MemoryStats {
        total_bytes: total?,
        available_bytes: available?,
    })
}

/// Two-sample CPU utilization tracker keyed by endpoint.
#[derive(Debug, Default)]
pub struct CpuSampler {
    previous: HashMap<String, CpuTimes>,
}

impl CpuSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a scrape and return busy percentage since the previous one.
    ///
    /// The first scrape of an endpoint has nothing to compare against and
    /// returns `None`, as does a counter reset (node reboot).
    pub fn observe(&mut self, endpoint: &str, current: CpuTimes) -> Option<f64> {
        let prev = self.previous.insert(endpoint.to_string(), current)?;
        let d_total = current.total - prev.total;
        let d_idle = current.idle - prev.idle;
        if d_total <= 0.0 || d_idle < 0.0 {
            return None;
        }
        Some(((1.0 - d_idle / d_total) * 100.0).clamp(0.0, 100.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRAPE: &str = r#"
# HELP node_cpu_seconds_total Seconds the CPUs spent in each mode.
# TYPE node_cpu_seconds_total counter
node_cpu_seconds_total{cpu="0",mode="idle"} 100
node_cpu_seconds_total{cpu="0",mode="user"} 50
node_cpu_seconds_total{cpu="1",mode="idle"} 1.2e+02
node_cpu_seconds_total{mode="system",cpu="1"} 30
node_memory_MemTotal_bytes 1.6e+10
node_memory_MemAvailable_bytes 4e+09
node_load1 0.5
"#;

    #[test]
    fn cpu_times_sum_all_cores() {
        let t = parse_cpu_times(SCRAPE).unwrap();
        assert_eq!(t.idle, 220.0);
        assert_eq!(t.total, 300.0);
    }

    #[test]
    fn missing_cpu_metric_is_parse_error() {
        let err = parse_cpu_times("node_load1 0.5\n").unwrap_err();
        assert!(matches!(err, TelemetryError::Parse(_)));
    }

    #[test]
    fn garbage_cpu_value_is_parse_error() {
        let err = parse_cpu_times("node_cpu_seconds_total{cpu=\"0\",mode=\"idle\"} NaNx\n")
            .unwrap_err();
        assert!(matches!(err, TelemetryError::Parse(_)));
    }

    #[test]
    fn memory_scientific_notation() {
        let m = parse_memory(SCRAPE).unwrap();
        assert_eq!(m.total_bytes, 1.6e10);
        assert!((m.used_pct() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn memory_absent() {
        assert!(parse_memory("node_memory_MemTotal_bytes 100\n").is_none());
    }

    #[test]
    fn sampler_needs_two_samples() {
        let mut s = CpuSampler::new();
        assert_eq!(s.observe("n1:9100", CpuTimes { idle: 100.0, total: 200.0 }), None);
        // 100 more seconds, 25 of them idle.
        let pct = s
            .observe("n1:9100", CpuTimes { idle: 125.0, total: 300.0 })
            .unwrap();
        assert!((pct - 75.0).abs() < 1e-9);
    }

    #[test]
    fn sampler_counter_reset_returns_none() {
        let mut s = CpuSampler::new();
        s.observe("n1", CpuTimes { idle: 500.0, total: 1000.0 });
        assert_eq!(s.observe("n1", CpuTimes { idle: 5.0, total: 10.0 }), None);
        // The reset sample becomes the new baseline.
        assert!(s.observe("n1", CpuTimes { idle: 10.0, total: 20.0 }).is_some());
    }

    #[test]
    fn sampler_endpoints_are_independent() {
        let mut s = CpuSampler::new();
        s.observe("a", CpuTimes { idle: 0.0, total: 0.0 });
        assert_eq!(s.observe("b", CpuTimes { idle: 0.0, total: 0.0 }), None);
        assert!(s.observe("a", CpuTimes { idle: 1.0, total: 2.0 }).is_some());
    }
}
