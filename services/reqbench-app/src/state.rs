//! Shared state for the REST handlers.

use reqbench_core::{AuthConfig, HarnessConfig};
use reqbench_db::Store;
use std::sync::Arc;
use std::time::Duration;

/// Handler state; cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

/// Router configuration.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub auth: AuthConfig,
    /// Delay injected before every route except `/health`.
    pub artificial_latency: Option<Duration>,
}

impl AppConfig {
    pub fn from_harness(config: &HarnessConfig) -> Self {
        Self {
            auth: config.auth.clone(),
            artificial_latency: config.server.artificial_latency(),
        }
    }

    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.artificial_latency = (!latency.is_zero()).then_some(latency);
        self
    }
}
