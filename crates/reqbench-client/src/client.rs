//! HTTP client used by the workload driver.

use crate::error::{classify_transport_error, ClientError};
use bytes::Bytes;
use parking_lot::RwLock;
use reqbench_core::{
    ClientConfig, HarnessError, HarnessResult, Method, RequestObserver, RequestRecord,
    ResponseRecord, Stage,
};
use reqbench_reliability::{panic_message, ReliabilityManager};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn build_http(config: &ClientConfig) -> Result<reqwest::Client, ClientError> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
        .tcp_keepalive(Duration::from_secs(config.tcp_keepalive_secs))
        .build()
        .map_err(ClientError::Build)
}

/// Increments the observer on creation and decrements on drop, so a
/// cancelled request still releases its in-flight slot.
struct InFlightGuard<'a> {
    observer: Option<&'a dyn RequestObserver>,
}

impl<'a> InFlightGuard<'a> {
    fn new(observer: Option<&'a dyn RequestObserver>) -> Self {
        if let Some(observer) = observer {
            observer.request_started();
        }
        Self { observer }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Some(observer) = self.observer {
            observer.request_finished();
        }
    }
}

/// Concurrent-safe HTTP client with a shared keep-alive pool, bearer auth
/// and retry through the [`ReliabilityManager`].
pub struct HarnessClient {
    base_url: String,
    config: ClientConfig,
    http: RwLock<reqwest::Client>,
    token: RwLock<String>,
    reliability: Arc<ReliabilityManager>,
    observer: Option<Arc<dyn RequestObserver>>,
    closed: AtomicBool,
    requests_sent: AtomicU64,
}

impl HarnessClient {
    pub fn new(
        base_url: impl Into<String>,
        config: ClientConfig,
        reliability: Arc<ReliabilityManager>,
    ) -> HarnessResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ClientError::InvalidUrl(base_url).into());
        }

        let http = build_http(&config)?;
        Ok(Self {
            base_url,
            config,
            http: RwLock::new(http),
            token: RwLock::new(String::new()),
            reliability,
            observer: None,
            closed: AtomicBool::new(false),
            requests_sent: AtomicU64::new(0),
        })
    }

    /// Reports in-flight changes to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RequestObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = token.into();
    }

    pub fn token(&self) -> String {
        self.token.read().clone()
    }

    pub fn has_token(&self) -> bool {
        !self.token.read().is_empty()
    }

    pub fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Drops the keep-alive pool by swapping in a fresh client.
    pub fn reset_pool(&self) -> HarnessResult<()> {
        let fresh = build_http(&self.config)?;
        *self.http.write() = fresh;
        debug!(base_url = %self.base_url, "http client pool reset");
        Ok(())
    }

    /// Refuses further requests and releases pooled connections.
    pub fn close(&self) -> HarnessResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.reset_pool()
    }

    /// Issues one logical request, retrying retryable transport failures.
    ///
    /// POST and PATCH are only retried when the failure happened while
    /// connecting; once the request may have reached the server a
    /// transient failure is reported as a plain transport error.
    pub async fn execute(&self, request: &RequestRecord) -> ResponseRecord {
        let _guard = InFlightGuard::new(self.observer.as_deref());
        let started = Instant::now();

        if self.is_closed() {
            return ResponseRecord {
                outcome: Err(ClientError::Closed.into()),
                body: Bytes::new(),
                duration: started.elapsed(),
                attempts: 0,
            };
        }

        let idempotent = request.method.is_idempotent();
        let name = format!("{} {}", request.method, request.path);
        let should_retry = |err: &HarnessError| {
            err.is_retryable()
                && (idempotent
                    || matches!(
                        err,
                        HarnessError::TransientTransport {
                            during_connect: true,
                            ..
                        }
                    ))
        };

        let outcome = self
            .reliability
            .execute_with_retry_if(Stage::Http, &name, should_retry, |_| self.send_once(request))
            .await;

        let attempts = outcome.attempts;
        let duration = started.elapsed();

        match outcome.result {
            Ok((status, body)) => ResponseRecord {
                outcome: Ok(status),
                body,
                duration,
                attempts,
            },
            Err(err) => {
                let err = match err {
                    HarnessError::TransientTransport {
                        message,
                        during_connect: false,
                    } if !idempotent => HarnessError::Transport(message),
                    other => other,
                };
                debug!(request = %name, attempts, error = %err, "request failed");
                ResponseRecord {
                    outcome: Err(err),
                    body: Bytes::new(),
                    duration,
                    attempts,
                }
            }
        }
    }

    async fn send_once(&self, request: &RequestRecord) -> HarnessResult<(u16, Bytes)> {
        let http = self.http.read().clone();
        let url = format!("{}{}", self.base_url, request.path);

        let mut builder = http.request(to_reqwest(request.method), &url);
        {
            let token = self.token.read();
            if !token.is_empty() {
                builder = builder.bearer_auth(token.as_str());
            }
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        let response = builder
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        Ok((status, body))
    }

    pub async fn get(&self, path: &str) -> ResponseRecord {
        self.execute(&RequestRecord::get(path)).await
    }

    pub async fn post(&self, path: &str, body: serde_json::Value) -> ResponseRecord {
        self.execute(&RequestRecord::post(path, body)).await
    }

    pub async fn put(&self, path: &str, body: serde_json::Value) -> ResponseRecord {
        self.execute(&RequestRecord::put(path, body)).await
    }

    pub async fn patch(&self, path: &str, body: serde_json::Value) -> ResponseRecord {
        self.execute(&RequestRecord::patch(path, body)).await
    }

    pub async fn delete(&self, path: &str) -> ResponseRecord {
        self.execute(&RequestRecord::delete(path)).await
    }

    /// Runs `requests` with at most `concurrency` in flight. `response[i]`
    /// always answers `request[i]`; completion order is not preserved.
    pub async fn run_parallel(
        self: &Arc<Self>,
        requests: Vec<RequestRecord>,
        concurrency: usize,
    ) -> Vec<ResponseRecord> {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut handles = Vec::with_capacity(requests.len());

        for request in requests {
            // Acquire before spawning so idle requests hold no task.
            let permit = Arc::clone(&semaphore).acquire_owned().await.ok();
            let client = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                client.execute(&request).await
            }));
        }

        let mut responses = Vec::with_capacity(handles.len());
        for (index, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(response) => responses.push(response),
                Err(join_err) => {
                    let message = if join_err.is_panic() {
                        panic_message(join_err.into_panic())
                    } else {
                        join_err.to_string()
                    };
                    warn!(index, error = %message, "parallel request task failed");
                    responses.push(ResponseRecord {
                        outcome: Err(HarnessError::panic(format!("request #{index}"), message)),
                        body: Bytes::new(),
                        duration: Duration::ZERO,
                        attempts: 0,
                    });
                }
            }
        }

        responses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_base_url() {
        let err = HarnessClient::new(
            "localhost:8080",
            ClientConfig::default(),
            Arc::new(ReliabilityManager::default()),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("invalid base url"));
    }

    #[tokio::test]
    async fn test_token_is_swappable() {
        let client = HarnessClient::new(
            "http://127.0.0.1:1/",
            ClientConfig::default(),
            Arc::new(ReliabilityManager::default()),
        )
        .unwrap();

        assert_eq!(client.base_url(), "http://127.0.0.1:1");
        assert!(!client.has_token());
        client.set_token("abc");
        assert_eq!(client.token(), "abc");
    }

    #[tokio::test]
    async fn test_closed_client_refuses_requests() {
        let client = HarnessClient::new(
            "http://127.0.0.1:1",
            ClientConfig::default(),
            Arc::new(ReliabilityManager::default()),
        )
        .unwrap();
        client.close().unwrap();

        let response = client.get("/health").await;
        assert!(response.error().is_some());
        assert_eq!(response.attempts, 0);
        assert_eq!(client.requests_sent(), 0);
    }
}
