use reqbench_core::HarnessError;
use std::error::Error as StdError;
use thiserror::Error;

/// Substrings (lower-case) that mark a transport failure as retryable.
pub const RETRYABLE_PATTERNS: &[&str] = &[
    "connection refused",
    "timed out",
    "timeout",
    "temporary failure",
    "network unreachable",
    "network is unreachable",
    "no such host",
    "host unknown",
    "failed to lookup address",
    "dns error",
    "connection reset",
    "broken pipe",
];

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to build http client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("invalid base url `{0}`")]
    InvalidUrl(String),

    #[error("client is closed")]
    Closed,
}

impl From<ClientError> for HarnessError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Closed => HarnessError::Transport(err.to_string()),
            other => HarnessError::config(other.to_string()),
        }
    }
}

/// True when `message` contains one of [`RETRYABLE_PATTERNS`].
pub fn matches_retryable_pattern(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Joins an error and all of its sources with `": "`.
pub fn render_chain(err: &(dyn StdError + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !rendered.contains(&text) {
            rendered.push_str(": ");
            rendered.push_str(&text);
        }
        source = cause.source();
    }
    rendered
}

/// Maps a reqwest failure onto the harness taxonomy.
///
/// Connect failures are flagged `during_connect`; the request was never
/// written, so even non-idempotent verbs may be retried.
pub fn classify_transport_error(err: &reqwest::Error) -> HarnessError {
    let message = render_chain(err);

    if err.is_decode() {
        return HarnessError::Parse(message);
    }

    if err.is_connect() || err.is_timeout() || matches_retryable_pattern(&message) {
        HarnessError::TransientTransport {
            message,
            during_connect: err.is_connect(),
        }
    } else {
        HarnessError::Transport(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Layer(&'static str, Option<Box<Layer>>);

    impl fmt::Display for Layer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.0)
        }
    }

    impl StdError for Layer {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            self.1.as_deref().map(|l| l as &(dyn StdError + 'static))
        }
    }

    #[test]
    fn test_patterns() {
        assert!(matches_retryable_pattern("tcp connect error: Connection refused (os error 111)"));
        assert!(matches_retryable_pattern("Temporary failure in name resolution"));
        assert!(matches_retryable_pattern("connection reset by peer"));
        assert!(!matches_retryable_pattern("invalid header value"));
    }

    #[test]
    fn test_render_chain_walks_sources() {
        let err = Layer(
            "error sending request",
            Some(Box::new(Layer("connection refused", None))),
        );
        let rendered = render_chain(&err);
        assert_eq!(rendered, "error sending request: connection refused");
        assert!(matches_retryable_pattern(&rendered));
    }
}
