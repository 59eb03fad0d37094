//! Thread-safe metrics collector shared by every request of a run.

use crate::runtime::RuntimeSnapshot;
use crate::summary::{percentile, LatencyPercentiles, MemoryStats, OpClassStats, RunSummary};
use parking_lot::Mutex;
use reqbench_core::{MetricSample, PoolStats, RequestObserver};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const BYTES_PER_MB: f64 = 1_048_576.0;
const SLOW_WARN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct Window {
    scenario: String,
    started: Option<Instant>,
    pool_start: PoolStats,
    runtime_start: RuntimeSnapshot,
}

/// Collects per-request outcomes and brackets a measurement window.
///
/// Counters are atomics; the latency array and sample list sit behind small
/// mutexes and are only sorted once, in [`MetricsCollector::end_measurement`].
pub struct MetricsCollector {
    success: AtomicU64,
    error: AtomicU64,
    responses: AtomicU64,
    response_bytes: AtomicU64,
    in_flight: AtomicU64,
    max_in_flight: AtomicU64,
    dropped: AtomicU64,
    latencies: Mutex<Vec<Duration>>,
    samples: Mutex<Vec<MetricSample>>,
    window: Mutex<Window>,
    slow_threshold: Duration,
    last_slow_warn: Mutex<Option<Instant>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl MetricsCollector {
    /// Creates a collector that warns about samples slower than `slow_threshold`.
    pub fn new(slow_threshold: Duration) -> Self {
        Self {
            success: AtomicU64::new(0),
            error: AtomicU64::new(0),
            responses: AtomicU64::new(0),
            response_bytes: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            max_in_flight: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            latencies: Mutex::new(Vec::new()),
            samples: Mutex::new(Vec::new()),
            window: Mutex::new(Window::default()),
            slow_threshold,
            last_slow_warn: Mutex::new(None),
        }
    }

    pub fn record_response(&self, duration: Duration, size_bytes: usize) {
        self.responses.fetch_add(1, Ordering::Relaxed);
        self.response_bytes
            .fetch_add(size_bytes as u64, Ordering::Relaxed);
        self.latencies.lock().push(duration);
    }

    pub fn record_success(&self) {
        self.success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.error.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a classified sample: latency, size, outcome and breakdown.
    pub fn record_sample(&self, sample: MetricSample) {
        self.record_response(sample.duration, sample.response_size);
        if sample.is_success() {
            self.record_success();
        } else {
            self.record_error();
        }

        if sample.duration > self.slow_threshold {
            self.warn_slow(&sample);
        }

        self.samples.lock().push(sample);
    }

    fn warn_slow(&self, sample: &MetricSample) {
        let mut last = self.last_slow_warn.lock();
        let now = Instant::now();
        if last.map_or(true, |at| now.duration_since(at) >= SLOW_WARN_INTERVAL) {
            *last = Some(now);
            warn!(
                op_class = %sample.op_class,
                path = %sample.path_template,
                duration_ms = sample.duration.as_millis() as u64,
                threshold_ms = self.slow_threshold.as_millis() as u64,
                "slow endpoint observed"
            );
        }
    }

    /// Counts samples lost before reaching the collector.
    pub fn record_dropped(&self, n: u64) {
        if n > 0 {
            self.dropped.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn inc_concurrent(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    pub fn dec_concurrent(&self) {
        // Saturate so an unmatched decrement cannot wrap.
        let _ = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(1))
            });
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> u64 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn n_requests(&self) -> u64 {
        self.success.load(Ordering::Relaxed) + self.error.load(Ordering::Relaxed)
    }

    /// Copy of every sample recorded so far.
    pub fn samples(&self) -> Vec<MetricSample> {
        self.samples.lock().clone()
    }

    /// Opens the measurement window and stores the start snapshots.
    pub fn start_measurement(
        &self,
        scenario: impl Into<String>,
        pool: PoolStats,
        runtime: RuntimeSnapshot,
    ) {
        let mut window = self.window.lock();
        window.scenario = scenario.into();
        window.started = Some(Instant::now());
        window.pool_start = pool;
        window.runtime_start = runtime;
        debug!(scenario = %window.scenario, "measurement started");
    }

    /// Closes the window and computes the run summary.
    pub fn end_measurement(&self, pool: PoolStats, runtime: RuntimeSnapshot) -> RunSummary {
        let (scenario, wall_duration, pool_start, runtime_start) = {
            let window = self.window.lock();
            let wall = window
                .started
                .map_or(Duration::ZERO, |started| started.elapsed());
            (
                window.scenario.clone(),
                wall,
                window.pool_start,
                window.runtime_start,
            )
        };

        let mut latencies = std::mem::take(&mut *self.latencies.lock());
        latencies.sort_unstable();
        let latency_percentiles = LatencyPercentiles::from_sorted(&latencies);
        // Restore so a later end_measurement sees the same data.
        *self.latencies.lock() = latencies;

        let n_success = self.success.load(Ordering::Relaxed);
        let n_error = self.error.load(Ordering::Relaxed);
        let n_requests = n_success + n_error;
        let responses = self.responses.load(Ordering::Relaxed);

        let error_rate = if n_requests == 0 {
            0.0
        } else {
            n_error as f64 / n_requests as f64
        };
        let secs = wall_duration.as_secs_f64();
        let throughput = if n_requests == 0 || secs == 0.0 {
            0.0
        } else {
            n_requests as f64 / secs
        };
        let avg_response_bytes = if responses == 0 {
            0.0
        } else {
            self.response_bytes.load(Ordering::Relaxed) as f64 / responses as f64
        };

        let (op_classes, errors_by_kind, status_codes) = self.breakdown();

        let summary = RunSummary {
            scenario,
            wall_duration,
            n_requests,
            n_success,
            n_error,
            error_rate,
            throughput,
            latency_percentiles,
            avg_response_bytes,
            db_pool: pool_delta(&pool_start, &pool),
            memory: memory_delta(&runtime_start, &runtime),
            max_concurrent_observed: self.max_concurrent(),
            task_count_end: runtime.alive_tasks as u64,
            task_count_start: runtime_start.alive_tasks as u64,
            worker_threads: runtime.workers as u64,
            dropped_samples: self.dropped.load(Ordering::Relaxed),
            op_classes,
            errors_by_kind,
            status_codes,
        };

        debug!(
            scenario = %summary.scenario,
            n_requests = summary.n_requests,
            "measurement ended"
        );
        summary
    }

    #[allow(clippy::type_complexity)]
    fn breakdown(
        &self,
    ) -> (
        BTreeMap<String, OpClassStats>,
        BTreeMap<String, u64>,
        BTreeMap<String, u64>,
    ) {
        let samples = self.samples.lock();

        let mut grouped: BTreeMap<String, (OpClassStats, Vec<Duration>)> = BTreeMap::new();
        let mut errors_by_kind = BTreeMap::new();
        let mut status_codes = BTreeMap::new();

        for sample in samples.iter() {
            let (stats, durations) = grouped.entry(sample.op_class.to_string()).or_default();
            stats.count += 1;
            if sample.is_success() {
                stats.success += 1;
            } else {
                stats.error += 1;
            }
            durations.push(sample.duration);

            if let Some(kind) = sample.error_kind {
                *errors_by_kind.entry(kind.to_string()).or_insert(0) += 1;
            }
            if let Some(status) = sample.status_code {
                *status_codes.entry(status.to_string()).or_insert(0) += 1;
            }
        }

        let op_classes = grouped
            .into_iter()
            .map(|(label, (mut stats, mut durations))| {
                durations.sort_unstable();
                stats.p50 = percentile(&durations, 0.50);
                stats.p95 = percentile(&durations, 0.95);
                (label, stats)
            })
            .collect();

        (op_classes, errors_by_kind, status_codes)
    }
}

impl RequestObserver for MetricsCollector {
    fn request_started(&self) {
        self.inc_concurrent();
    }

    fn request_finished(&self) {
        self.dec_concurrent();
    }
}

/// Gauges come from the end snapshot; wait counters are window deltas.
fn pool_delta(start: &PoolStats, end: &PoolStats) -> PoolStats {
    PoolStats {
        open: end.open,
        in_use: end.in_use,
        idle: end.idle,
        wait_count: end.wait_count.saturating_sub(start.wait_count),
        wait_duration: end.wait_duration.saturating_sub(start.wait_duration),
    }
}

fn memory_delta(start: &RuntimeSnapshot, end: &RuntimeSnapshot) -> MemoryStats {
    let reclaim_cycles = end.reclaim_cycles.saturating_sub(start.reclaim_cycles);
    let pause = end
        .reclaim_pause_total
        .saturating_sub(start.reclaim_pause_total);
    let reclaim_avg_pause = if reclaim_cycles == 0 {
        Duration::ZERO
    } else {
        pause / reclaim_cycles as u32
    };

    MemoryStats {
        bytes_allocated: end
            .alloc
            .allocated_bytes
            .saturating_sub(start.alloc.allocated_bytes),
        allocations: end.alloc.allocations.saturating_sub(start.alloc.allocations),
        heap_mb: end.heap_bytes() as f64 / BYTES_PER_MB,
        reclaim_cycles,
        reclaim_avg_pause,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqbench_core::{ErrorKind, OpClass};
    use std::sync::Arc;

    fn sample(op: OpClass, status: Option<u16>, millis: u64, error: Option<ErrorKind>) -> MetricSample {
        MetricSample {
            op_class: op,
            method: op.method(),
            path_template: op.path_template().to_string(),
            status_code: status,
            duration: Duration::from_millis(millis),
            response_size: 100,
            error_kind: error,
            attempts: 1,
        }
    }

    #[test]
    fn test_empty_run_is_all_zero() {
        let collector = MetricsCollector::default();
        collector.start_measurement("empty", PoolStats::default(), RuntimeSnapshot::default());
        let summary = collector.end_measurement(PoolStats::default(), RuntimeSnapshot::default());

        assert_eq!(summary.n_requests, 0);
        assert_eq!(summary.error_rate, 0.0);
        assert_eq!(summary.throughput, 0.0);
        assert_eq!(summary.latency_percentiles, LatencyPercentiles::default());
        assert!(summary.op_classes.is_empty());
    }

    #[test]
    fn test_counts_and_breakdown() {
        let collector = MetricsCollector::default();
        collector.start_measurement("mix", PoolStats::default(), RuntimeSnapshot::default());

        collector.record_sample(sample(OpClass::CreateEpic, Some(201), 10, None));
        collector.record_sample(sample(OpClass::GetEpic, Some(200), 5, None));
        collector.record_sample(sample(
            OpClass::GetEpic,
            Some(404),
            7,
            Some(ErrorKind::UnexpectedStatus),
        ));
        collector.record_sample(sample(OpClass::ListEpics, None, 30, Some(ErrorKind::Timeout)));

        let summary = collector.end_measurement(PoolStats::default(), RuntimeSnapshot::default());

        assert_eq!(summary.n_requests, 4);
        assert_eq!(summary.n_success + summary.n_error, summary.n_requests);
        assert_eq!(summary.error_rate, 0.5);
        assert_eq!(summary.avg_response_bytes, 100.0);
        assert_eq!(summary.latency_percentiles.max, Duration::from_millis(30));
        assert!(summary.latency_percentiles.is_monotonic());

        let get = summary.op_classes["GetEpic"];
        assert_eq!((get.count, get.success, get.error), (2, 1, 1));
        assert_eq!(summary.errors_by_kind["timeout"], 1);
        assert_eq!(summary.errors_by_kind["unexpected_status"], 1);
        assert_eq!(summary.status_codes["404"], 1);
    }

    #[test]
    fn test_pool_wait_is_window_delta() {
        let collector = MetricsCollector::default();
        let start = PoolStats {
            wait_count: 4,
            wait_duration: Duration::from_millis(40),
            ..Default::default()
        };
        let end = PoolStats {
            open: 5,
            in_use: 2,
            idle: 3,
            wait_count: 10,
            wait_duration: Duration::from_millis(100),
        };
        collector.start_measurement("pool", start, RuntimeSnapshot::default());
        let summary = collector.end_measurement(end, RuntimeSnapshot::default());

        assert_eq!(summary.db_pool.open, 5);
        assert_eq!(summary.db_pool.wait_count, 6);
        assert_eq!(summary.db_pool.wait_duration, Duration::from_millis(60));
    }

    #[test]
    fn test_dec_concurrent_saturates() {
        let collector = MetricsCollector::default();
        collector.dec_concurrent();
        assert_eq!(collector.in_flight(), 0);

        collector.inc_concurrent();
        collector.inc_concurrent();
        collector.dec_concurrent();
        assert_eq!(collector.in_flight(), 1);
        assert_eq!(collector.max_concurrent(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_recording() {
        let collector = Arc::new(MetricsCollector::default());
        let mut handles = Vec::new();

        for i in 0..16u64 {
            let collector = Arc::clone(&collector);
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    collector.inc_concurrent();
                    if i % 4 == 0 {
                        collector.record_sample(sample(
                            OpClass::ListEpics,
                            Some(500),
                            1,
                            Some(ErrorKind::UnexpectedStatus),
                        ));
                    } else {
                        collector.record_sample(sample(OpClass::ListEpics, Some(200), 1, None));
                    }
                    collector.dec_concurrent();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let summary = collector.end_measurement(PoolStats::default(), RuntimeSnapshot::default());
        assert_eq!(summary.n_requests, 800);
        assert_eq!(summary.n_error, 200);
        assert_eq!(collector.in_flight(), 0);
        assert!(summary.max_concurrent_observed >= 1);
        assert!(summary.max_concurrent_observed <= 16);
    }

    #[test]
    fn test_summary_json_round_trip() {
        let collector = MetricsCollector::default();
        collector.start_measurement("json", PoolStats::default(), RuntimeSnapshot::default());
        collector.record_sample(sample(OpClass::SearchKeyword, Some(200), 3, None));
        collector.record_dropped(2);
        let summary = collector.end_measurement(PoolStats::default(), RuntimeSnapshot::default());

        let json = serde_json::to_string(&summary).unwrap();
        let back: RunSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, summary);
        assert_eq!(back.dropped_samples, 2);
    }
}
