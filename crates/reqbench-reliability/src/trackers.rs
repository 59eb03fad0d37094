use crate::cleanup::{ResourceTracker, TrackerReport};
use async_trait::async_trait;
use reqbench_core::HarnessResult;
use reqbench_metrics::{Reclaimer, RuntimeSnapshot};
use std::sync::Arc;

/// Runs a reclaim cycle and reports heap change against the baseline taken
/// when the tracker was created.
pub struct MemoryTracker {
    reclaimer: Arc<Reclaimer>,
    baseline_bytes: u64,
}

impl MemoryTracker {
    pub fn new(reclaimer: Arc<Reclaimer>) -> Self {
        Self {
            reclaimer,
            baseline_bytes: RuntimeSnapshot::capture(None).heap_bytes(),
        }
    }

    pub fn baseline_bytes(&self) -> u64 {
        self.baseline_bytes
    }
}

#[async_trait]
impl ResourceTracker for MemoryTracker {
    fn name(&self) -> &str {
        "memory"
    }

    async fn cleanup(&self) -> HarnessResult<TrackerReport> {
        let cycle = self.reclaimer.reclaim().await;
        let now = RuntimeSnapshot::capture(None).heap_bytes();
        let delta = now as i64 - self.baseline_bytes as i64;

        Ok(TrackerReport {
            name: self.name().to_string(),
            released: cycle.bytes_freed,
            residual: now.saturating_sub(self.baseline_bytes),
            detail: format!(
                "heap delta {delta:+} bytes vs baseline, reclaim pause {}us",
                cycle.pause.as_micros()
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_tracker_runs_reclaim() {
        let reclaimer = Arc::new(Reclaimer::new());
        let tracker = MemoryTracker::new(Arc::clone(&reclaimer));

        let report = tracker.cleanup().await.unwrap();

        assert_eq!(report.name, "memory");
        assert!(report.detail.contains("heap delta"));
        assert_eq!(reclaimer.cycles(), 1);
    }
}
