//! Runtime and memory statistics.
//!
//! Rust has no collector to trigger, so a "reclaim cycle" runs every
//! registered reclaim hook (drop idle pools, caches, buffers) and is timed
//! like a collection pause.

use crate::alloc::AllocationCounters;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::{get_current_pid, Pid, ProcessExt, System, SystemExt};
use tracing::debug;

const BYTES_PER_MB: f64 = 1_048_576.0;

/// Resident set size of the current process in bytes, zero if unavailable.
pub fn process_rss_bytes() -> u64 {
    let pid = match get_current_pid() {
        Ok(pid) => pid,
        Err(_) => return 0,
    };

    let mut system = System::new();
    system.refresh_process(pid);
    system.process(pid).map(|p| p.memory()).unwrap_or(0)
}

/// Samples the current process repeatedly through one `System`, refreshing
/// only this process on each read.
pub struct ProcessSampler {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl ProcessSampler {
    pub fn new() -> Self {
        Self {
            pid: get_current_pid().ok(),
            system: Mutex::new(System::new()),
        }
    }

    pub fn rss_bytes(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        let mut system = self.system.lock();
        system.refresh_process(pid);
        system.process(pid).map_or(0, |p| p.memory())
    }

    pub fn snapshot(&self, reclaimer: Option<&Reclaimer>) -> RuntimeSnapshot {
        RuntimeSnapshot::with_rss(self.rss_bytes(), reclaimer)
    }
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time runtime statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RuntimeSnapshot {
    pub rss_bytes: u64,
    pub alloc: AllocationCounters,
    /// Live tokio tasks, the analogue of a goroutine count.
    pub alive_tasks: usize,
    pub workers: usize,
    pub reclaim_cycles: u64,
    pub reclaim_pause_total: Duration,
}

impl RuntimeSnapshot {
    pub fn capture(reclaimer: Option<&Reclaimer>) -> Self {
        Self::with_rss(process_rss_bytes(), reclaimer)
    }

    fn with_rss(rss_bytes: u64, reclaimer: Option<&Reclaimer>) -> Self {
        let (alive_tasks, workers) = match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let metrics = handle.metrics();
                (metrics.num_alive_tasks(), metrics.num_workers())
            }
            Err(_) => (0, 0),
        };

        Self {
            rss_bytes,
            alloc: AllocationCounters::read(),
            alive_tasks,
            workers,
            reclaim_cycles: reclaimer.map_or(0, Reclaimer::cycles),
            reclaim_pause_total: reclaimer.map_or(Duration::ZERO, Reclaimer::total_pause),
        }
    }

    /// Live heap from the counting allocator, or RSS when it is not installed.
    pub fn heap_bytes(&self) -> u64 {
        if self.alloc.is_active() {
            self.alloc.live_bytes()
        } else {
            self.rss_bytes
        }
    }

    pub fn heap_mb(&self) -> f64 {
        self.heap_bytes() as f64 / BYTES_PER_MB
    }
}

type ReclaimHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Result of one reclaim cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimCycle {
    pub pause: Duration,
    pub bytes_freed: u64,
}

/// Registry of reclaim hooks plus cycle/pause counters.
#[derive(Default)]
pub struct Reclaimer {
    hooks: RwLock<Vec<(String, ReclaimHook)>>,
    cycles: AtomicU64,
    pause_total_us: AtomicU64,
}

impl Reclaimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&self, name: impl Into<String>, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: ReclaimHook = Arc::new(move || Box::pin(hook()));
        self.hooks.write().push((name.into(), hook));
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.read().len()
    }

    /// Run every hook once and account the pause.
    pub async fn reclaim(&self) -> ReclaimCycle {
        let hooks: Vec<(String, ReclaimHook)> = self.hooks.read().clone();
        let before = RuntimeSnapshot::capture(None).heap_bytes();
        let started = Instant::now();

        for (name, hook) in hooks {
            debug!(hook = %name, "running reclaim hook");
            hook().await;
        }

        let pause = started.elapsed();
        let after = RuntimeSnapshot::capture(None).heap_bytes();

        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.pause_total_us
            .fetch_add(pause.as_micros() as u64, Ordering::Relaxed);

        ReclaimCycle {
            pause,
            bytes_freed: before.saturating_sub(after),
        }
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn total_pause(&self) -> Duration {
        Duration::from_micros(self.pause_total_us.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_reclaim_runs_every_hook() {
        let reclaimer = Reclaimer::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for name in ["pool", "cache"] {
            let calls = Arc::clone(&calls);
            reclaimer.register(name, move || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        reclaimer.reclaim().await;
        reclaimer.reclaim().await;

        assert_eq!(reclaimer.hook_count(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(reclaimer.cycles(), 2);
    }

    #[tokio::test]
    async fn test_sampler_reuses_one_system() {
        let sampler = ProcessSampler::new();
        let first = sampler.rss_bytes();
        let second = sampler.snapshot(None);
        assert!(first > 0);
        assert!(second.rss_bytes > 0);
        assert!(second.workers >= 1);
    }

    #[tokio::test]
    async fn test_snapshot_inside_runtime() {
        let reclaimer = Reclaimer::new();
        reclaimer.reclaim().await;

        let snapshot = RuntimeSnapshot::capture(Some(&reclaimer));
        assert!(snapshot.workers >= 1);
        assert_eq!(snapshot.reclaim_cycles, 1);
    }
}
