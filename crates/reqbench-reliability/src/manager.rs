use crate::monitor::{DegradationConfig, ProcessProbe, ResourceMonitor, ResourceProbe};
use crate::preflight::{PreflightRegistry, PreflightReport};
use crate::retry::{retry_with_backoff, with_timeout, RetryOutcome};
use crate::timeouts::StageTimeouts;
use parking_lot::RwLock;
use reqbench_core::{
    HarnessError, HarnessResult, OpClass, PoolStatsSource, ReliabilityConfig,
    ReliabilityOverrides, RetryPolicy, Stage,
};
use reqbench_metrics::Reclaimer;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Timeouts, retry, preflight and resource-driven degradation for one run.
///
/// Scoped to a single scenario; nothing here is global.
pub struct ReliabilityManager {
    timeouts: StageTimeouts,
    retry: RwLock<RetryPolicy>,
    preflight: PreflightRegistry,
    monitor: Arc<ResourceMonitor>,
    probe: Option<Arc<ProcessProbe>>,
    reclaimer: Arc<Reclaimer>,
}

impl Default for ReliabilityManager {
    fn default() -> Self {
        Self::from_config(&ReliabilityConfig::default())
    }
}

impl ReliabilityManager {
    /// Builds a manager whose monitor samples the current process.
    pub fn from_config(config: &ReliabilityConfig) -> Self {
        let reclaimer = Arc::new(Reclaimer::new());
        let probe = Arc::new(ProcessProbe::new());
        let monitor = ResourceMonitor::new(
            config.monitor.clone(),
            Arc::clone(&probe) as Arc<dyn ResourceProbe>,
            Some(Arc::clone(&reclaimer)),
        );

        Self {
            timeouts: StageTimeouts::from_config(&config.timeouts),
            retry: RwLock::new(config.retry.clone()),
            preflight: PreflightRegistry::new(),
            monitor: Arc::new(monitor),
            probe: Some(probe),
            reclaimer,
        }
    }

    /// Builds a manager around a caller-supplied probe.
    pub fn with_probe(config: &ReliabilityConfig, probe: Arc<dyn ResourceProbe>) -> Self {
        let reclaimer = Arc::new(Reclaimer::new());
        let monitor = ResourceMonitor::new(config.monitor.clone(), probe, Some(Arc::clone(&reclaimer)));

        Self {
            timeouts: StageTimeouts::from_config(&config.timeouts),
            retry: RwLock::new(config.retry.clone()),
            preflight: PreflightRegistry::new(),
            monitor: Arc::new(monitor),
            probe: None,
            reclaimer,
        }
    }

    pub fn apply_overrides(&self, overrides: &ReliabilityOverrides) {
        self.timeouts.apply(&overrides.timeouts);
        if let Some(retry) = &overrides.retry {
            *self.retry.write() = retry.clone();
        }
        debug!(
            timeouts = overrides.timeouts.len(),
            retry = overrides.retry.is_some(),
            "applied reliability overrides"
        );
    }

    pub fn timeout_for(&self, stage: Stage) -> Duration {
        self.timeouts.get(stage)
    }

    pub fn set_timeout(&self, stage: Stage, timeout: Duration) {
        self.timeouts.set(stage, timeout);
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.read().clone()
    }

    pub fn set_retry_policy(&self, policy: RetryPolicy) {
        *self.retry.write() = policy;
    }

    /// Runs `operation` under the stage timeout, retrying retryable errors
    /// with exponential backoff. The final error carries the attempt count.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        stage: Stage,
        name: &str,
        operation: F,
    ) -> HarnessResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = HarnessResult<T>>,
    {
        self.execute_with_retry_if(stage, name, HarnessError::is_retryable, operation)
            .await
            .into_result(name)
    }

    /// Like [`execute_with_retry`](Self::execute_with_retry) with a caller
    /// predicate deciding which errors may be retried.
    pub async fn execute_with_retry_if<T, F, Fut, P>(
        &self,
        stage: Stage,
        name: &str,
        should_retry: P,
        operation: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = HarnessResult<T>>,
        P: Fn(&HarnessError) -> bool,
    {
        let policy = self.retry_policy();
        let budget = self.timeout_for(stage);
        retry_with_backoff(&policy, stage, budget, name, should_retry, operation).await
    }

    /// Single attempt under the stage timeout.
    pub async fn execute_with_timeout<T, Fut>(&self, stage: Stage, name: &str, operation: Fut) -> HarnessResult<T>
    where
        Fut: Future<Output = HarnessResult<T>>,
    {
        let result = with_timeout(stage, self.timeout_for(stage), operation).await;
        if let Err(err) = &result {
            debug!(operation = name, stage = %stage, error = %err, "operation failed");
        }
        result
    }

    pub fn preflight(&self) -> &PreflightRegistry {
        &self.preflight
    }

    pub async fn run_preflight(&self) -> PreflightReport {
        self.preflight.run(self.timeout_for(Stage::Preflight)).await
    }

    pub fn monitor(&self) -> &Arc<ResourceMonitor> {
        &self.monitor
    }

    pub fn reclaimer(&self) -> &Arc<Reclaimer> {
        &self.reclaimer
    }

    /// Feeds connection counts from `pool` into the default process probe.
    pub fn attach_pool_stats(&self, pool: Arc<dyn PoolStatsSource>) {
        if let Some(probe) = &self.probe {
            probe.attach_pool(pool);
        }
    }

    pub fn detach_pool_stats(&self) {
        if let Some(probe) = &self.probe {
            probe.detach_pool();
        }
    }

    pub fn degradation(&self) -> DegradationConfig {
        self.monitor.degradation()
    }

    pub fn is_resource_constrained(&self) -> bool {
        self.degradation().is_active()
    }

    /// Halves `requested` (floor 1) while concurrency reduction is active.
    pub fn adjust_concurrency_for_constraints(&self, requested: usize) -> usize {
        if self.degradation().reduce_concurrency {
            (requested / 2).max(1)
        } else {
            requested.max(1)
        }
    }

    pub fn should_skip_operation(&self, op: OpClass) -> bool {
        self.degradation().skip_non_essential && !op.is_essential()
    }

    pub fn is_simplified_data(&self) -> bool {
        self.degradation().simplified_data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::Signal;
    use reqbench_core::ErrorKind;

    #[test]
    fn test_overrides() {
        let manager = ReliabilityManager::default();
        let overrides = ReliabilityOverrides::default()
            .with_timeout(Stage::Http, Duration::from_millis(1))
            .with_retry(RetryPolicy::no_retry());

        manager.apply_overrides(&overrides);

        assert_eq!(manager.timeout_for(Stage::Http), Duration::from_millis(1));
        assert_eq!(manager.timeout_for(Stage::Cleanup), Duration::from_secs(10));
        assert_eq!(manager.retry_policy().max_retries, 0);
    }

    #[test]
    fn test_constrained_concurrency() {
        let manager = ReliabilityManager::default();
        assert!(!manager.is_resource_constrained());
        assert_eq!(manager.adjust_concurrency_for_constraints(10), 10);

        manager.monitor().force_critical(Signal::MemoryMb);

        assert!(manager.is_resource_constrained());
        let effective = manager.adjust_concurrency_for_constraints(10);
        assert!((1..=5).contains(&effective));
        assert_eq!(manager.adjust_concurrency_for_constraints(1), 1);
        assert!(manager.is_simplified_data());
    }

    #[test]
    fn test_skip_non_essential_only() {
        let manager = ReliabilityManager::default();
        assert!(!manager.should_skip_operation(OpClass::SearchKeyword));

        manager.monitor().force_critical(Signal::DbConnections);

        assert!(manager.should_skip_operation(OpClass::SearchKeyword));
        assert!(manager.should_skip_operation(OpClass::HealthCheck));
        assert!(!manager.should_skip_operation(OpClass::CreateEpic));
        assert!(!manager.is_simplified_data());
    }

    #[tokio::test]
    async fn test_execute_with_timeout() {
        let manager = ReliabilityManager::default();
        manager.set_timeout(Stage::Database, Duration::from_millis(10));

        let err = manager
            .execute_with_timeout(Stage::Database, "slow query", async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_execute_with_retry_reports_attempts() {
        let manager = ReliabilityManager::default();
        manager.set_retry_policy(RetryPolicy {
            max_retries: 2,
            initial_delay_ms: 1,
            backoff_factor: 2.0,
            max_delay_ms: 5,
        });

        let err = manager
            .execute_with_retry(Stage::Default, "connect", |_| async {
                Err::<(), _>(HarnessError::TransientTransport {
                    message: "connection reset".into(),
                    during_connect: true,
                })
            })
            .await
            .unwrap_err();

        match err {
            HarnessError::Exhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
    }
}
