//! Client behaviour against an in-process axum stub.

use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use reqbench_client::HarnessClient;
use reqbench_core::{
    ClientConfig, ErrorKind, MetricSample, OpClass, RequestObserver, RequestRecord, RetryPolicy,
    Stage,
};
use reqbench_metrics::MetricsCollector;
use reqbench_reliability::ReliabilityManager;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

async fn spawn_stub() -> SocketAddr {
    let app = Router::new()
        .route("/ok", get(|| async { Json(json!({"ok": true})) }))
        .route(
            "/items",
            post(|Json(body): Json<Value>| async move { (StatusCode::CREATED, Json(body)) }),
        )
        .route("/html", get(|| async { "<html>not json</html>" }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                "done"
            }),
        )
        .route(
            "/echo-auth",
            get(|headers: HeaderMap| async move {
                headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string()
            }),
        )
        .route(
            "/status/:code",
            get(|Path(code): Path<u16>| async move {
                StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }),
        )
        .route(
            "/index/:i",
            get(|Path(i): Path<u64>| async move {
                tokio::time::sleep(Duration::from_millis(20 - (i % 20))).await;
                i.to_string()
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        initial_delay_ms: 1,
        backoff_factor: 2.0,
        max_delay_ms: 10,
    }
}

fn client_for(addr: &str, reliability: Arc<ReliabilityManager>) -> HarnessClient {
    HarnessClient::new(addr, ClientConfig::default(), reliability).unwrap()
}

async fn refused_addr() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

#[tokio::test]
async fn test_verbs_and_statuses() {
    let addr = spawn_stub().await;
    let client = client_for(&format!("http://{addr}"), Arc::new(ReliabilityManager::default()));

    let ok = client.get("/ok").await;
    assert_eq!(ok.status_code(), Some(200));
    assert_eq!(ok.attempts, 1);
    assert_eq!(ok.json::<Value>().unwrap()["ok"], true);

    let created = client.post("/items", json!({"title": "x"})).await;
    assert_eq!(created.status_code(), Some(201));
    assert_eq!(created.json::<Value>().unwrap()["title"], "x");

    // HTTP statuses are returned, never retried.
    let missing = client.get("/status/503").await;
    assert_eq!(missing.status_code(), Some(503));
    assert_eq!(missing.attempts, 1);
}

#[tokio::test]
async fn test_ok_status_with_html_body_is_parse_error() {
    let addr = spawn_stub().await;
    let client = client_for(&format!("http://{addr}"), Arc::new(ReliabilityManager::default()));

    let response = client.get("/html").await;
    assert_eq!(response.status_code(), Some(200));
    assert_eq!(response.attempts, 1);

    let sample = MetricSample::classify(OpClass::ListEpics, &response);
    assert!(!sample.is_success());
    assert_eq!(sample.error_kind, Some(ErrorKind::Parse));

    let json = MetricSample::classify(OpClass::ListEpics, &client.get("/ok").await);
    assert!(json.is_success());
}

#[tokio::test]
async fn test_bearer_token_attached_when_set() {
    let addr = spawn_stub().await;
    let client = client_for(&format!("http://{addr}"), Arc::new(ReliabilityManager::default()));

    let anonymous = client.get("/echo-auth").await;
    assert_eq!(&anonymous.body[..], b"");

    client.set_token("t0ken");
    let authed = client.get("/echo-auth").await;
    assert_eq!(&authed.body[..], b"Bearer t0ken");
}

#[tokio::test]
async fn test_run_parallel_preserves_order_and_cap() {
    let addr = spawn_stub().await;
    let collector = Arc::new(MetricsCollector::default());
    let client = Arc::new(
        client_for(&format!("http://{addr}"), Arc::new(ReliabilityManager::default()))
            .with_observer(Arc::clone(&collector) as Arc<dyn RequestObserver>),
    );

    let requests: Vec<RequestRecord> = (0..40).map(|i| RequestRecord::get(format!("/index/{i}"))).collect();
    let responses = client.run_parallel(requests, 4).await;

    assert_eq!(responses.len(), 40);
    for (i, response) in responses.iter().enumerate() {
        assert_eq!(response.status_code(), Some(200));
        assert_eq!(String::from_utf8_lossy(&response.body), i.to_string());
    }
    assert!(collector.max_concurrent() <= 4);
    assert!(collector.max_concurrent() >= 1);
    assert_eq!(collector.in_flight(), 0);
}

#[tokio::test]
async fn test_concurrency_one_is_serial() {
    let addr = spawn_stub().await;
    let collector = Arc::new(MetricsCollector::default());
    let client = Arc::new(
        client_for(&format!("http://{addr}"), Arc::new(ReliabilityManager::default()))
            .with_observer(Arc::clone(&collector) as Arc<dyn RequestObserver>),
    );

    let requests = (0..8).map(|_| RequestRecord::get("/ok")).collect();
    client.run_parallel(requests, 1).await;

    assert_eq!(collector.max_concurrent(), 1);
}

#[tokio::test]
async fn test_connection_refused_is_retried() {
    let reliability = Arc::new(ReliabilityManager::default());
    reliability.set_retry_policy(fast_retry());
    let client = client_for(&refused_addr().await, reliability);

    let response = client.get("/ok").await;

    assert_eq!(response.attempts, 3);
    assert_eq!(response.error().unwrap().kind(), ErrorKind::TransientTransport);
    assert_eq!(client.requests_sent(), 3);

    // Connect failures never reached the server, so POST is retried too.
    let post = client.post("/items", json!({})).await;
    assert_eq!(post.attempts, 3);
}

#[tokio::test]
async fn test_zero_retry_budget_surfaces_immediately() {
    let reliability = Arc::new(ReliabilityManager::default());
    reliability.set_retry_policy(RetryPolicy::no_retry());
    let client = client_for(&refused_addr().await, reliability);

    let response = client.get("/ok").await;

    assert_eq!(response.attempts, 1);
    assert!(response.error().unwrap().is_retryable());
}

#[tokio::test]
async fn test_stage_timeout_is_classified() {
    let addr = spawn_stub().await;
    let reliability = Arc::new(ReliabilityManager::default());
    reliability.set_timeout(Stage::Http, Duration::from_millis(1));
    reliability.set_retry_policy(fast_retry());
    let client = client_for(&format!("http://{addr}"), reliability);

    let response = client.get("/slow").await;

    assert_eq!(response.error().unwrap().kind(), ErrorKind::Timeout);
    assert_eq!(response.attempts, 3);
    assert_eq!(response.status_code(), None);
}

#[tokio::test]
async fn test_post_timeout_is_not_retried() {
    let addr = spawn_stub().await;
    let reliability = Arc::new(ReliabilityManager::default());
    reliability.set_timeout(Stage::Http, Duration::from_millis(1));
    reliability.set_retry_policy(fast_retry());
    let client = client_for(&format!("http://{addr}"), reliability);

    let response = client
        .execute(&RequestRecord::post("/items", json!({})).with_header("x-slow", "1"))
        .await;

    // Either it made it in under 1 ms or it timed out once; never retried.
    assert_eq!(response.attempts, 1);
}
