//! Metrics collection for benchmark runs: the shared collector, runtime and
//! allocator statistics, run summaries and report writers.

pub mod alloc;
pub mod collector;
pub mod report;
pub mod runtime;
pub mod summary;

pub use alloc::{AllocationCounters, CountingAllocator};
pub use collector::MetricsCollector;
pub use report::{ReportFormat, ResultWriter};
pub use runtime::{process_rss_bytes, ProcessSampler, ReclaimCycle, Reclaimer, RuntimeSnapshot};
pub use summary::{LatencyPercentiles, MemoryStats, OpClassStats, RunSummary};
