//! Preflight checks run before any workload is issued.

use futures::future::BoxFuture;
use parking_lot::RwLock;
use reqbench_core::{HarnessError, HarnessResult, Stage};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::panic_message;

type CheckFn = Arc<dyn Fn() -> BoxFuture<'static, HarnessResult<()>> + Send + Sync>;

/// A named check; required failures abort the run.
#[derive(Clone)]
pub struct PreflightCheck {
    pub name: String,
    pub required: bool,
    /// Falls back to the preflight stage budget when unset.
    pub timeout: Option<Duration>,
    check: CheckFn,
}

impl PreflightCheck {
    fn new<F, Fut>(name: impl Into<String>, required: bool, check: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HarnessResult<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            required,
            timeout: None,
            check: Arc::new(move || Box::pin(check())),
        }
    }

    pub fn required<F, Fut>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HarnessResult<()>> + Send + 'static,
    {
        Self::new(name, true, check)
    }

    pub fn optional<F, Fut>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HarnessResult<()>> + Send + 'static,
    {
        Self::new(name, false, check)
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl std::fmt::Debug for PreflightCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreflightCheck")
            .field("name", &self.name)
            .field("required", &self.required)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub name: String,
    pub required: bool,
    pub duration: Duration,
    /// `None` when the check passed.
    pub error: Option<String>,
}

impl CheckOutcome {
    pub fn passed(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PreflightReport {
    pub outcomes: Vec<CheckOutcome>,
}

impl PreflightReport {
    /// True unless a required check failed.
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed() || !o.required)
    }

    /// First required failure as a `Preflight` error.
    pub fn required_failure(&self) -> Option<HarnessError> {
        self.outcomes
            .iter()
            .find(|o| o.required && !o.passed())
            .map(|o| HarnessError::preflight(&o.name, o.error.clone().unwrap_or_default()))
    }

    pub fn optional_failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| !o.required && !o.passed())
            .count()
    }
}

/// Registry of checks, run in registration order.
#[derive(Default)]
pub struct PreflightRegistry {
    checks: RwLock<Vec<PreflightCheck>>,
}

impl PreflightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, check: PreflightCheck) {
        self.checks.write().push(check);
    }

    pub fn len(&self) -> usize {
        self.checks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.read().is_empty()
    }

    /// Runs every check; a required failure does not skip later checks so
    /// the report is complete.
    pub async fn run(&self, default_timeout: Duration) -> PreflightReport {
        let checks: Vec<PreflightCheck> = self.checks.read().clone();
        let mut report = PreflightReport::default();

        for check in checks {
            let budget = check.timeout.unwrap_or(default_timeout);
            let started = Instant::now();
            let future = (check.check)();
            let mut handle = tokio::spawn(future);

            let error = match timeout(budget, &mut handle).await {
                Ok(Ok(Ok(()))) => None,
                Ok(Ok(Err(err))) => Some(err.to_string()),
                Ok(Err(join_err)) if join_err.is_panic() => {
                    Some(format!("panicked: {}", panic_message(join_err.into_panic())))
                }
                Ok(Err(join_err)) => Some(join_err.to_string()),
                Err(_) => {
                    handle.abort();
                    Some(HarnessError::timeout(Stage::Preflight.as_str(), budget).to_string())
                }
            };

            let duration = started.elapsed();
            match &error {
                None => info!(
                    check = %check.name,
                    duration_ms = duration.as_millis() as u64,
                    "preflight check passed"
                ),
                Some(message) => warn!(
                    check = %check.name,
                    required = check.required,
                    error = %message,
                    "preflight check failed"
                ),
            }

            report.outcomes.push(CheckOutcome {
                name: check.name,
                required: check.required,
                duration,
                error,
            });
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqbench_core::ErrorKind;

    #[tokio::test]
    async fn test_optional_failure_does_not_fail_report() {
        let registry = PreflightRegistry::new();
        registry.register(PreflightCheck::required("db", || async { Ok(()) }));
        registry.register(PreflightCheck::optional("token", || async {
            Err(HarnessError::config("no token"))
        }));

        let report = registry.run(Duration::from_secs(1)).await;
        assert!(report.passed());
        assert_eq!(report.optional_failures(), 1);
        assert!(report.required_failure().is_none());
    }

    #[tokio::test]
    async fn test_required_timeout_fails_report() {
        let registry = PreflightRegistry::new();
        registry.register(
            PreflightCheck::required("health", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .with_timeout(Duration::from_millis(20)),
        );
        registry.register(PreflightCheck::optional("later", || async { Ok(()) }));

        let report = registry.run(Duration::from_secs(1)).await;
        assert!(!report.passed());
        assert_eq!(report.outcomes.len(), 2);

        let err = report.required_failure().unwrap();
        assert_eq!(err.kind(), ErrorKind::Preflight);
    }

    #[tokio::test]
    async fn test_panicking_check_is_recovered() {
        fn explode() -> HarnessResult<()> {
            panic!("probe exploded")
        }

        let registry = PreflightRegistry::new();
        registry.register(PreflightCheck::required("boom", || async { explode() }));

        let report = registry.run(Duration::from_secs(1)).await;
        let message = report.outcomes[0].error.clone().unwrap();
        assert!(message.contains("probe exploded"));
    }
}
