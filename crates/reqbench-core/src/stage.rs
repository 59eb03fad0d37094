use crate::error::HarnessError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Named stage whose operations share a timeout budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Default,
    Database,
    Http,
    Cleanup,
    Preflight,
    ServerStart,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Self::Default,
        Self::Database,
        Self::Http,
        Self::Cleanup,
        Self::Preflight,
        Self::ServerStart,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Database => "database",
            Self::Http => "http",
            Self::Cleanup => "cleanup",
            Self::Preflight => "preflight",
            Self::ServerStart => "server_start",
        }
    }

    /// Built-in budget used when nothing overrides the stage.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        match self {
            Self::Default | Self::Http => Duration::from_secs(30),
            Self::Database | Self::ServerStart => Duration::from_secs(60),
            Self::Cleanup => Duration::from_secs(10),
            Self::Preflight => Duration::from_secs(5),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| HarnessError::config(format!("unknown stage `{s}`")))
    }
}

/// Exponential backoff policy for retryable failures.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt; zero disables retry.
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,

    /// Multiplier applied per retry
    pub backoff_factor: f64,

    /// Upper bound on a single delay in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            backoff_factor: 2.0,
            max_delay_ms: 5000,
        }
    }
}

impl RetryPolicy {
    /// Policy that surfaces the first failure.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Delay before retry number `attempt` (0-based), capped at `max_delay`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = (self.initial_delay_ms as f64
            * self.backoff_factor.powi(attempt as i32))
        .min(self.max_delay_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_stage_timeouts() {
        assert_eq!(Stage::Default.default_timeout(), Duration::from_secs(30));
        assert_eq!(Stage::Database.default_timeout(), Duration::from_secs(60));
        assert_eq!(Stage::Http.default_timeout(), Duration::from_secs(30));
        assert_eq!(Stage::Cleanup.default_timeout(), Duration::from_secs(10));
        assert_eq!(Stage::Preflight.default_timeout(), Duration::from_secs(5));
        assert_eq!("server_start".parse::<Stage>().unwrap(), Stage::ServerStart);
        assert!("warmup".parse::<Stage>().is_err());
    }

    #[test]
    fn test_retry_policy_backoff() {
        let retry = RetryPolicy::default();

        assert_eq!(retry.backoff_for_attempt(0).as_millis(), 100);
        assert_eq!(retry.backoff_for_attempt(1).as_millis(), 200);
        assert_eq!(retry.backoff_for_attempt(2).as_millis(), 400);

        // Max delay cap
        assert_eq!(retry.backoff_for_attempt(10), retry.max_delay());
    }
}
