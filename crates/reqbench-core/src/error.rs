use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error classes the harness distinguishes when classifying an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport failure matching a retryable pattern.
    TransientTransport,
    /// Transport failure that is not eligible for retry.
    Transport,
    /// A stage timeout fired.
    Timeout,
    /// HTTP status outside the operation class's accepted set.
    UnexpectedStatus,
    /// Response body could not be decoded.
    Parse,
    /// Resource monitor entered its critical state.
    ResourceExhaustion,
    /// A preflight check failed.
    Preflight,
    /// A cleanup task or tracker failed.
    Cleanup,
    /// A task or worker panicked.
    Panic,
    /// Provisioning, configuration, or database plumbing failed.
    Infrastructure,
}

impl ErrorKind {
    /// Stable label used in summaries and report keys.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientTransport => "transient_transport",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::UnexpectedStatus => "unexpected_status",
            Self::Parse => "parse",
            Self::ResourceExhaustion => "resource_exhaustion",
            Self::Preflight => "preflight",
            Self::Cleanup => "cleanup",
            Self::Panic => "panic",
            Self::Infrastructure => "infrastructure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical error type for harness operations.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Transport failure that matched a retryable pattern.
    #[error("transient transport error: {message}")]
    TransientTransport {
        /// Rendered error chain.
        message: String,
        /// Whether the failure happened before the request was written.
        during_connect: bool,
    },

    /// Transport failure that must not be retried.
    #[error("transport error: {0}")]
    Transport(String),

    /// Stage timeout elapsed before the operation finished.
    #[error("{stage} stage timed out after {elapsed:?}")]
    Timeout {
        /// Stage whose budget was exceeded.
        stage: String,
        /// Budget that elapsed.
        elapsed: Duration,
    },

    /// Response status was outside the accepted set.
    #[error("unexpected status {status} for {op}")]
    UnexpectedStatus {
        /// Operation label.
        op: String,
        /// Status returned by the server.
        status: u16,
    },

    /// Body could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),

    /// Resource pressure crossed its critical threshold.
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),

    /// A required preflight check failed.
    #[error("preflight check `{name}` failed: {message}")]
    Preflight {
        /// Check name.
        name: String,
        /// Failure detail.
        message: String,
    },

    /// A cleanup task failed.
    #[error("cleanup `{name}` failed: {message}")]
    Cleanup {
        /// Task or tracker name.
        name: String,
        /// Failure detail.
        message: String,
    },

    /// A task panicked; the payload text is preserved.
    #[error("task `{name}` panicked: {message}")]
    Panic {
        /// Task name.
        name: String,
        /// Panic payload rendered as text.
        message: String,
    },

    /// Retry budget exhausted; wraps the final attempt's error.
    #[error("`{name}` failed after {attempts} attempt(s): {source}")]
    Exhausted {
        /// Operation name.
        name: String,
        /// Attempts made, including the first.
        attempts: u32,
        /// Error from the last attempt.
        #[source]
        source: Box<HarnessError>,
    },

    /// Database provisioning failed.
    #[error("provisioning failed: {0}")]
    Provision(String),

    /// Database query or pool failure.
    #[error("database error: {0}")]
    Database(String),

    /// Invalid configuration or scenario.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error while writing reports or binding sockets.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Creates a `Timeout` for the given stage label.
    #[must_use]
    pub fn timeout(stage: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            stage: stage.into(),
            elapsed,
        }
    }

    /// Creates a `Preflight` variant.
    #[must_use]
    pub fn preflight(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Preflight {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a `Cleanup` variant.
    #[must_use]
    pub fn cleanup(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Cleanup {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a `Panic` variant.
    #[must_use]
    pub fn panic(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Panic {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a `Config` variant.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Maps the error onto the taxonomy used by metric samples.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TransientTransport { .. } => ErrorKind::TransientTransport,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::UnexpectedStatus { .. } => ErrorKind::UnexpectedStatus,
            Self::Parse(_) => ErrorKind::Parse,
            Self::ResourceExhaustion(_) => ErrorKind::ResourceExhaustion,
            Self::Preflight { .. } => ErrorKind::Preflight,
            Self::Cleanup { .. } => ErrorKind::Cleanup,
            Self::Panic { .. } => ErrorKind::Panic,
            Self::Exhausted { source, .. } => source.kind(),
            Self::Provision(_) | Self::Database(_) | Self::Config(_) | Self::Io(_) => {
                ErrorKind::Infrastructure
            }
        }
    }

    /// Whether the retry loop may attempt the operation again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientTransport { .. } | Self::Timeout { .. })
    }

    /// Strips an `Exhausted` wrapper, returning the final attempt's error.
    #[must_use]
    pub fn into_root(self) -> Self {
        match self {
            Self::Exhausted { source, .. } => source.into_root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<config::ConfigError> for HarnessError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Convenient result alias for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_of_exhausted_follows_source() {
        let err = HarnessError::Exhausted {
            name: "GET /health".to_string(),
            attempts: 4,
            source: Box::new(HarnessError::timeout("http", Duration::from_millis(1))),
        };

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.to_string().contains("4 attempt(s)"));
        assert!(matches!(err.into_root(), HarnessError::Timeout { .. }));
    }

    #[test]
    fn test_retryable_classes() {
        assert!(HarnessError::TransientTransport {
            message: "connection refused".into(),
            during_connect: true,
        }
        .is_retryable());
        assert!(HarnessError::timeout("http", Duration::from_secs(1)).is_retryable());
        assert!(!HarnessError::Transport("closed".into()).is_retryable());
        assert!(!HarnessError::Parse("eof".into()).is_retryable());
    }

    #[test]
    fn test_error_kind_labels_are_snake_case() {
        assert_eq!(ErrorKind::UnexpectedStatus.as_str(), "unexpected_status");
        assert_eq!(
            serde_json::to_string(&ErrorKind::TransientTransport).unwrap(),
            "\"transient_transport\""
        );
    }
}
