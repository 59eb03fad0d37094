//! Ordered, once-only cleanup of everything a run created.
//!
//! Tasks run in ascending priority, each in its own tokio task under its own
//! timeout, so a hang or a panic in one never blocks the rest. Trackers run
//! after the tasks, then a configurable number of reclaim cycles.

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use reqbench_core::{HarnessError, HarnessResult, Stage};
use reqbench_metrics::{Reclaimer, RuntimeSnapshot};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::panic_message;

/// Conventional priorities; lower runs first.
pub mod priority {
    pub const SERVER: u32 = 0;
    pub const HTTP_CLIENT: u32 = 10;
    pub const MONITOR: u32 = 15;
    pub const DATABASE: u32 = 20;
    pub const CONTAINER: u32 = 30;
}

type CleanupFn = Box<dyn FnOnce() -> BoxFuture<'static, HarnessResult<()>> + Send>;

/// A single cleanup step.
pub struct CleanupTask {
    pub name: String,
    pub priority: u32,
    /// Falls back to the manager's cleanup-stage timeout when unset.
    pub timeout: Option<Duration>,
    pub required: bool,
    action: CleanupFn,
}

impl CleanupTask {
    pub fn new<F, Fut>(name: impl Into<String>, priority: u32, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = HarnessResult<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            priority,
            timeout: None,
            required: false,
            action: Box::new(move || Box::pin(action())),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

impl std::fmt::Debug for CleanupTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupTask")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("required", &self.required)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Completed,
    Failed(String),
    TimedOut,
    Panicked(String),
}

#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub name: String,
    pub priority: u32,
    pub required: bool,
    /// Timeout the task ran under.
    pub budget: Duration,
    pub duration: Duration,
    pub status: TaskStatus,
}

impl TaskOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// What a tracker released and what it could not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerReport {
    pub name: String,
    pub released: u64,
    pub residual: u64,
    pub detail: String,
}

/// Something that owns run-scoped resources and can release them.
#[async_trait]
pub trait ResourceTracker: Send + Sync {
    fn name(&self) -> &str;

    async fn cleanup(&self) -> HarnessResult<TrackerReport>;

    /// Used when force mode is set; defaults to a normal cleanup.
    async fn force_cleanup(&self) -> HarnessResult<TrackerReport> {
        self.cleanup().await
    }
}

#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub tasks: Vec<TaskOutcome>,
    pub trackers: Vec<TrackerReport>,
    pub reclaim_cycles: u32,
    pub bytes_freed: u64,
    /// Heap after cleanup minus heap before, in bytes.
    pub memory_delta_bytes: i64,
    /// Live runtime tasks after cleanup.
    pub task_count: usize,
    pub elapsed: Duration,
    pub failed_required: bool,
}

impl CleanupReport {
    pub fn failures(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.tasks.iter().filter(|t| !t.succeeded())
    }
}

/// Registry and executor for cleanup tasks and resource trackers.
pub struct CleanupManager {
    tasks: Mutex<Vec<CleanupTask>>,
    trackers: Mutex<Vec<Arc<dyn ResourceTracker>>>,
    reclaimer: Option<Arc<Reclaimer>>,
    reclaim_cycles: u32,
    stage_timeout: Duration,
    force: AtomicBool,
    done: tokio::sync::Mutex<Option<CleanupReport>>,
}

impl CleanupManager {
    /// `stage_timeout` bounds each tracker and every task registered
    /// without its own timeout.
    pub fn new(reclaimer: Option<Arc<Reclaimer>>, reclaim_cycles: u32, stage_timeout: Duration) -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            trackers: Mutex::new(Vec::new()),
            reclaimer,
            reclaim_cycles,
            stage_timeout,
            force: AtomicBool::new(false),
            done: tokio::sync::Mutex::new(None),
        }
    }

    pub fn add_cleanup_task(&self, task: CleanupTask) {
        self.tasks.lock().push(task);
    }

    pub fn add_resource_tracker(&self, tracker: Arc<dyn ResourceTracker>) {
        self.trackers.lock().push(tracker);
    }

    pub fn default_task_timeout(&self) -> Duration {
        self.stage_timeout
    }

    pub fn set_force_mode(&self, force: bool) {
        self.force.store(force, Ordering::SeqCst);
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Runs every registered task and tracker once. Later calls return the
    /// first report without running anything again.
    pub async fn execute_cleanup(&self) -> CleanupReport {
        let mut done = self.done.lock().await;
        if let Some(report) = done.as_ref() {
            return report.clone();
        }

        let started = Instant::now();
        let heap_before = RuntimeSnapshot::capture(None).heap_bytes();

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        tasks.sort_by_key(|t| t.priority);
        let trackers = std::mem::take(&mut *self.trackers.lock());

        let mut report = CleanupReport::default();
        info!(tasks = tasks.len(), trackers = trackers.len(), "starting cleanup");

        for task in tasks {
            let outcome = run_task(task, self.stage_timeout).await;
            if !outcome.succeeded() && outcome.required {
                report.failed_required = true;
            }
            report.tasks.push(outcome);
        }

        let force = self.force.load(Ordering::SeqCst);
        for tracker in trackers {
            report.trackers.push(self.run_tracker(tracker.as_ref(), force).await);
        }

        if let Some(reclaimer) = &self.reclaimer {
            for _ in 0..self.reclaim_cycles {
                let cycle = reclaimer.reclaim().await;
                report.reclaim_cycles += 1;
                report.bytes_freed += cycle.bytes_freed;
            }
        }

        let heap_after = RuntimeSnapshot::capture(None);
        report.memory_delta_bytes = heap_after.heap_bytes() as i64 - heap_before as i64;
        report.task_count = heap_after.alive_tasks;
        report.elapsed = started.elapsed();

        info!(
            elapsed_ms = report.elapsed.as_millis() as u64,
            failed = report.failures().count(),
            failed_required = report.failed_required,
            reclaim_cycles = report.reclaim_cycles,
            bytes_freed = report.bytes_freed,
            memory_delta_bytes = report.memory_delta_bytes,
            task_count = report.task_count,
            "cleanup finished"
        );

        *done = Some(report.clone());
        report
    }

    async fn run_tracker(&self, tracker: &dyn ResourceTracker, force: bool) -> TrackerReport {
        let name = tracker.name().to_string();
        let work = async {
            if force {
                tracker.force_cleanup().await
            } else {
                tracker.cleanup().await
            }
        };

        match timeout(self.stage_timeout, work).await {
            Ok(Ok(report)) => {
                info!(
                    tracker = %name,
                    released = report.released,
                    residual = report.residual,
                    "tracker cleaned up"
                );
                report
            }
            Ok(Err(err)) => {
                warn!(tracker = %name, error = %err, "tracker cleanup failed");
                TrackerReport {
                    name,
                    detail: err.to_string(),
                    ..Default::default()
                }
            }
            Err(_) => {
                let err = HarnessError::timeout(Stage::Cleanup.as_str(), self.stage_timeout);
                warn!(tracker = %name, error = %err, "tracker cleanup timed out");
                TrackerReport {
                    name,
                    detail: err.to_string(),
                    ..Default::default()
                }
            }
        }
    }
}

async fn run_task(task: CleanupTask, default_timeout: Duration) -> TaskOutcome {
    let CleanupTask {
        name,
        priority,
        timeout: budget,
        required,
        action,
    } = task;
    let budget = budget.unwrap_or(default_timeout);

    let started = Instant::now();
    let mut handle = tokio::spawn(async move { action().await });

    let status = match timeout(budget, &mut handle).await {
        Ok(Ok(Ok(()))) => TaskStatus::Completed,
        Ok(Ok(Err(err))) => TaskStatus::Failed(err.to_string()),
        Ok(Err(join_err)) if join_err.is_panic() => {
            TaskStatus::Panicked(panic_message(join_err.into_panic()))
        }
        Ok(Err(join_err)) => TaskStatus::Failed(join_err.to_string()),
        Err(_) => {
            handle.abort();
            TaskStatus::TimedOut
        }
    };

    let duration = started.elapsed();
    match &status {
        TaskStatus::Completed => {
            info!(task = %name, priority, duration_ms = duration.as_millis() as u64, "cleanup task completed");
        }
        TaskStatus::Panicked(message) => {
            let err = HarnessError::panic(&name, message.clone());
            error!(task = %name, required, error = %err, "cleanup task panicked");
        }
        TaskStatus::TimedOut => {
            let err = HarnessError::timeout(Stage::Cleanup.as_str(), budget);
            warn!(task = %name, required, error = %err, "cleanup task timed out");
        }
        TaskStatus::Failed(message) => {
            let err = HarnessError::cleanup(&name, message.clone());
            warn!(task = %name, required, error = %err, "cleanup task failed");
        }
    }

    TaskOutcome {
        name,
        priority,
        required,
        budget,
        duration,
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn manager() -> CleanupManager {
        CleanupManager::new(None, 0, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_tasks_run_in_priority_order() {
        let cleanup = manager();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (name, priority) in [("container", 30), ("server", 0), ("database", 20)] {
            let order = Arc::clone(&order);
            cleanup.add_cleanup_task(CleanupTask::new(name, priority, move || async move {
                order.lock().push(name);
                Ok(())
            }));
        }

        let report = cleanup.execute_cleanup().await;
        assert_eq!(*order.lock(), vec!["server", "database", "container"]);
        assert!(!report.failed_required);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_later_tasks() {
        fn explode() -> HarnessResult<()> {
            panic!("boom")
        }

        let cleanup = manager();
        let ran = Arc::new(AtomicUsize::new(0));

        cleanup.add_cleanup_task(
            CleanupTask::new("fails", 0, || async { Err(HarnessError::cleanup("fails", "nope")) }).required(),
        );
        cleanup.add_cleanup_task(CleanupTask::new("panics", 1, || async { explode() }));
        cleanup.add_cleanup_task(
            CleanupTask::new("hangs", 2, || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .with_timeout(Duration::from_millis(20)),
        );
        let counter = Arc::clone(&ran);
        cleanup.add_cleanup_task(CleanupTask::new("last", 3, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let report = cleanup.execute_cleanup().await;

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(report.failed_required);
        assert!(matches!(report.tasks[0].status, TaskStatus::Failed(_)));
        assert_eq!(report.tasks[1].status, TaskStatus::Panicked("boom".to_string()));
        assert_eq!(report.tasks[2].status, TaskStatus::TimedOut);
        assert!(report.tasks[3].succeeded());
    }

    #[tokio::test]
    async fn test_tasks_default_to_stage_timeout() {
        let cleanup = CleanupManager::new(None, 0, Duration::from_millis(750));
        assert_eq!(cleanup.default_task_timeout(), Duration::from_millis(750));
        cleanup.add_cleanup_task(CleanupTask::new("inherits", 0, || async { Ok(()) }));
        cleanup.add_cleanup_task(
            CleanupTask::new("explicit", 1, || async { Ok(()) }).with_timeout(Duration::from_secs(3)),
        );
        cleanup.add_cleanup_task(CleanupTask::new("slow", 2, || async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }));

        let report = cleanup.execute_cleanup().await;

        assert_eq!(report.tasks[0].budget, Duration::from_millis(750));
        assert_eq!(report.tasks[1].budget, Duration::from_secs(3));
        assert_eq!(report.tasks[2].status, TaskStatus::TimedOut);
        assert!(report.tasks[2].duration < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_runs_exactly_once() {
        let cleanup = manager();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        cleanup.add_cleanup_task(CleanupTask::new("once", 0, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let first = cleanup.execute_cleanup().await;
        let second = cleanup.execute_cleanup().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.tasks.len(), second.tasks.len());
        assert_eq!(cleanup.pending_tasks(), 0);
    }

    struct CountingTracker {
        forced: AtomicBool,
    }

    #[async_trait]
    impl ResourceTracker for CountingTracker {
        fn name(&self) -> &str {
            "counting"
        }

        async fn cleanup(&self) -> HarnessResult<TrackerReport> {
            Ok(TrackerReport {
                name: "counting".into(),
                released: 3,
                ..Default::default()
            })
        }

        async fn force_cleanup(&self) -> HarnessResult<TrackerReport> {
            self.forced.store(true, Ordering::SeqCst);
            self.cleanup().await
        }
    }

    #[tokio::test]
    async fn test_trackers_and_reclaim() {
        let reclaimer = Arc::new(Reclaimer::new());
        let cleanup = CleanupManager::new(Some(Arc::clone(&reclaimer)), 2, Duration::from_secs(1));
        let tracker = Arc::new(CountingTracker {
            forced: AtomicBool::new(false),
        });
        cleanup.add_resource_tracker(Arc::clone(&tracker) as Arc<dyn ResourceTracker>);
        cleanup.set_force_mode(true);

        let report = cleanup.execute_cleanup().await;

        assert!(tracker.forced.load(Ordering::SeqCst));
        assert_eq!(report.trackers[0].released, 3);
        assert_eq!(report.reclaim_cycles, 2);
        assert_eq!(reclaimer.cycles(), 2);
    }
}
