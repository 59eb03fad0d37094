//! Run summary produced at the end of a measurement window.

use reqbench_core::PoolStats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Latency percentiles over every recorded request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    pub p50: Duration,
    pub p90: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub max: Duration,
}

impl LatencyPercentiles {
    /// Computes percentiles from an ascending-sorted slice.
    #[must_use]
    pub fn from_sorted(sorted: &[Duration]) -> Self {
        Self {
            p50: percentile(sorted, 0.50),
            p90: percentile(sorted, 0.90),
            p95: percentile(sorted, 0.95),
            p99: percentile(sorted, 0.99),
            max: sorted.last().copied().unwrap_or_default(),
        }
    }

    #[must_use]
    pub fn is_monotonic(&self) -> bool {
        self.p50 <= self.p90 && self.p90 <= self.p95 && self.p95 <= self.p99 && self.p99 <= self.max
    }
}

/// Nearest-rank percentile on a sorted slice; zero when empty.
#[must_use]
pub fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }

    let index = ((sorted.len() as f64) * p) as usize;
    let index = index.min(sorted.len() - 1);

    sorted[index]
}

/// Runtime memory accounting over the measurement window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Bytes allocated during the window (counting allocator).
    pub bytes_allocated: u64,
    /// Allocation calls during the window (counting allocator).
    pub allocations: u64,
    /// Live heap at the end of the window.
    pub heap_mb: f64,
    /// Reclaim cycles run during the window.
    pub reclaim_cycles: u64,
    pub reclaim_avg_pause: Duration,
}

/// Per-op-class breakdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OpClassStats {
    pub count: u64,
    pub success: u64,
    pub error: u64,
    pub p50: Duration,
    pub p95: Duration,
}

/// Structured result of one scenario.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub scenario: String,
    pub wall_duration: Duration,
    pub n_requests: u64,
    pub n_success: u64,
    pub n_error: u64,
    pub error_rate: f64,
    /// Completed requests per second of wall time.
    pub throughput: f64,
    pub latency_percentiles: LatencyPercentiles,
    pub avg_response_bytes: f64,
    pub db_pool: PoolStats,
    pub memory: MemoryStats,
    pub max_concurrent_observed: u64,
    /// Live runtime tasks when the window closed.
    pub task_count_end: u64,
    /// Live runtime tasks when the window opened.
    pub task_count_start: u64,
    pub worker_threads: u64,
    /// Sustained-load samples lost to channel overflow.
    pub dropped_samples: u64,
    pub op_classes: BTreeMap<String, OpClassStats>,
    pub errors_by_kind: BTreeMap<String, u64>,
    pub status_codes: BTreeMap<String, u64>,
}

impl RunSummary {
    /// Share of recorded samples whose op-class label matches `predicate`.
    #[must_use]
    pub fn op_share(&self, predicate: impl Fn(&str) -> bool) -> f64 {
        let total: u64 = self.op_classes.values().map(|s| s.count).sum();
        if total == 0 {
            return 0.0;
        }
        let matching: u64 = self
            .op_classes
            .iter()
            .filter(|(label, _)| predicate(label))
            .map(|(_, s)| s.count)
            .sum();
        matching as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentiles() {
        // 100 samples: 0us, 100us, ..., 9900us
        let sorted: Vec<Duration> = (0..100).map(|i| Duration::from_micros(i * 100)).collect();
        let p = LatencyPercentiles::from_sorted(&sorted);

        assert_eq!(p.p50, Duration::from_micros(5000));
        assert_eq!(p.p90, Duration::from_micros(9000));
        assert_eq!(p.p95, Duration::from_micros(9500));
        assert_eq!(p.p99, Duration::from_micros(9900));
        assert_eq!(p.max, Duration::from_micros(9900));
        assert!(p.is_monotonic());
    }

    #[test]
    fn test_percentiles_empty_and_single() {
        assert_eq!(LatencyPercentiles::from_sorted(&[]), LatencyPercentiles::default());

        let one = LatencyPercentiles::from_sorted(&[Duration::from_millis(7)]);
        assert_eq!(one.p50, Duration::from_millis(7));
        assert_eq!(one.p99, one.max);
    }

    #[test]
    fn test_op_share() {
        let mut summary = RunSummary::default();
        summary.op_classes.insert(
            "ListEpics".into(),
            OpClassStats {
                count: 8,
                ..Default::default()
            },
        );
        summary.op_classes.insert(
            "CreateEpic".into(),
            OpClassStats {
                count: 2,
                ..Default::default()
            },
        );

        assert_eq!(summary.op_share(|label| label.starts_with("List")), 0.8);
        assert_eq!(RunSummary::default().op_share(|_| true), 0.0);
    }
}
