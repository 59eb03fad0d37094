use crate::provision::TeardownHandle;
use crate::store::Store;
use async_trait::async_trait;
use reqbench_core::HarnessResult;
use reqbench_reliability::{priority, CleanupTask, ResourceTracker, TrackerReport};
use std::sync::Arc;
use tracing::{debug, warn};

/// Rolls back transactions left open, then closes the store's pool.
pub struct DatabaseTracker {
    store: Arc<dyn Store>,
}

impl DatabaseTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    fn report(&self, open: u64, rolled_back: u64, forced: bool) -> TrackerReport {
        TrackerReport {
            name: self.name().to_string(),
            released: open + rolled_back,
            residual: self.store.open_transactions(),
            detail: format!(
                "{} backend, {open} connection(s) closed, {rolled_back} transaction(s) rolled back{}",
                self.store.backend(),
                if forced { ", forced" } else { "" }
            ),
        }
    }

    async fn rollback_open(&self) -> u64 {
        let rolled_back = self.store.rollback_open_transactions().await;
        if rolled_back > 0 {
            warn!(rolled_back, "rolled back transactions left open");
        }
        rolled_back
    }
}

#[async_trait]
impl ResourceTracker for DatabaseTracker {
    fn name(&self) -> &str {
        "database"
    }

    async fn cleanup(&self) -> HarnessResult<TrackerReport> {
        if self.store.is_closed() {
            return Ok(self.report(0, 0, false));
        }
        let open = u64::from(self.store.pool_stats().open);
        let rolled_back = self.rollback_open().await;
        self.store.close().await;
        Ok(self.report(open, rolled_back, false))
    }

    /// Starts the close without waiting for checked-out connections.
    async fn force_cleanup(&self) -> HarnessResult<TrackerReport> {
        if self.store.is_closed() {
            return Ok(self.report(0, 0, true));
        }
        let open = u64::from(self.store.pool_stats().open);
        let rolled_back = self.rollback_open().await;
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            store.close().await;
            debug!("forced database close finished");
        });
        Ok(self.report(open, rolled_back, true))
    }
}

/// Cleanup task that removes the database container, if one was started.
pub fn container_teardown_task(handle: Arc<TeardownHandle>) -> CleanupTask {
    CleanupTask::new("database-container", priority::CONTAINER, move || async move {
        handle.teardown().await
    })
    .required()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn test_database_tracker_closes_store() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store.seed_defaults().await.unwrap();
        let tracker = DatabaseTracker::new(Arc::clone(&store));

        let report = tracker.cleanup().await.unwrap();
        assert!(store.is_closed());
        assert_eq!(report.residual, 0);
        assert!(report.detail.contains("memory"));
        assert!(report.detail.contains("0 transaction(s) rolled back"));

        // Second pass finds nothing to release.
        let again = tracker.cleanup().await.unwrap();
        assert_eq!(again.released, 0);
    }

    #[tokio::test]
    async fn test_container_task_runs_last_and_is_required() {
        let task = container_teardown_task(Arc::new(TeardownHandle::default()));
        assert!(task.required);
        assert_eq!(task.priority, priority::CONTAINER);
    }
}
