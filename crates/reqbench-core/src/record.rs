use crate::error::{ErrorKind, HarnessError, HarnessResult};
use crate::method::Method;
use crate::op::OpClass;
use bytes::Bytes;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Input to the HTTP client.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestRecord {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub headers: Vec<(String, String)>,
}

impl RequestRecord {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    #[must_use]
    pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    #[must_use]
    pub fn patch(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::Patch, path).with_body(body)
    }

    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Output of the HTTP client for one logical request.
///
/// `outcome` holds either the final status code or the final error, never
/// both.
#[derive(Debug)]
pub struct ResponseRecord {
    pub outcome: Result<u16, HarnessError>,
    pub body: Bytes,
    pub duration: Duration,
    pub attempts: u32,
}

impl ResponseRecord {
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        self.outcome.as_ref().ok().copied()
    }

    #[must_use]
    pub fn error(&self) -> Option<&HarnessError> {
        self.outcome.as_ref().err()
    }

    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.body.len()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Ok(status) if (200..300).contains(&status))
    }

    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> HarnessResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| HarnessError::Parse(e.to_string()))
    }
}

/// One completed request as seen by the metrics collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub op_class: OpClass,
    pub method: Method,
    pub path_template: String,
    pub status_code: Option<u16>,
    pub duration: Duration,
    pub response_size: usize,
    pub error_kind: Option<ErrorKind>,
    pub attempts: u32,
}

impl MetricSample {
    /// Classifies a response against the op class's accepted statuses.
    /// An accepted status whose body does not decode as JSON is a parse
    /// error for classes that return one.
    #[must_use]
    pub fn classify(op: OpClass, response: &ResponseRecord) -> Self {
        let error_kind = match &response.outcome {
            Ok(status) if op.accepts(*status) => {
                if op.expects_json_body()
                    && serde_json::from_slice::<IgnoredAny>(&response.body).is_err()
                {
                    Some(ErrorKind::Parse)
                } else {
                    None
                }
            }
            Ok(_) => Some(ErrorKind::UnexpectedStatus),
            Err(err) => Some(err.kind()),
        };

        Self {
            op_class: op,
            method: op.method(),
            path_template: op.path_template().to_string(),
            status_code: response.status_code(),
            duration: response.duration,
            response_size: response.size_bytes(),
            error_kind,
            attempts: response.attempts,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error_kind.is_none()
    }
}

/// Connection-pool statistics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub open: u32,
    pub in_use: u32,
    pub idle: u32,
    pub wait_count: u64,
    pub wait_duration: Duration,
}
