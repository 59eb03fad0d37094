//! Router tests over the in-memory store.

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use reqbench_app::{build_router, mint_token, AppConfig, AppState};
use reqbench_core::AuthConfig;
use reqbench_db::{MemoryStore, Store};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceExt;

struct TestApp {
    router: Router,
    token: String,
}

async fn test_app(config: AppConfig) -> TestApp {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let system = store.seed_defaults().await.unwrap();
    let token = mint_token(&config.auth, system, "system").unwrap();
    TestApp {
        router: build_router(AppState::new(store), &config),
        token,
    }
}

impl TestApp {
    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token));
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create(&self, path: &str, body: Value) -> Value {
        let (status, value) = self.send(Method::POST, path, Some(body)).await;
        assert_eq!(status, StatusCode::CREATED, "POST {path}: {value}");
        value
    }
}

#[tokio::test]
async fn test_health_is_public() {
    let app = test_app(AppConfig::default()).await;
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_token_uses_error_body() {
    let app = test_app(AppConfig::default()).await;
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/api/v1/epics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["code"], "unauthorized");
    assert!(body["error"]["message"].is_string());
}

#[tokio::test]
async fn test_token_signed_with_other_secret_rejected() {
    let mut app = test_app(AppConfig::default()).await;
    let other = AuthConfig {
        secret: "another-secret".into(),
        token_ttl_secs: 60,
    };
    app.token = mint_token(&other, uuid::Uuid::new_v4(), "intruder").unwrap();

    let (status, _) = app.send(Method::GET, "/api/v1/epics", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_entity_lifecycle() {
    let app = test_app(AppConfig::default()).await;

    let epic = app.create("/api/v1/epics", json!({"title": "Checkout"})).await;
    assert_eq!(epic["reference_id"], "EP-001");
    let epic_id = epic["id"].as_str().unwrap().to_string();

    let story = app
        .create(
            "/api/v1/user-stories",
            json!({"title": "Pay by card", "parent_id": epic_id}),
        )
        .await;
    assert_eq!(story["reference_id"], "US-001");

    let (status, fetched) = app
        .send(Method::GET, &format!("/api/v1/epics/{epic_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["title"], "Checkout");

    let (status, replaced) = app
        .send(
            Method::PUT,
            &format!("/api/v1/epics/{epic_id}"),
            Some(json!({"title": "Checkout v2", "status": "Draft"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replaced["title"], "Checkout v2");

    let (status, patched) = app
        .send(
            Method::PATCH,
            &format!("/api/v1/epics/{epic_id}"),
            Some(json!({"priority": "High"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["priority"], "High");
    assert_eq!(patched["title"], "Checkout v2");

    let (status, stories) = app
        .send(
            Method::GET,
            &format!("/api/v1/user-stories?parent_id={epic_id}&limit=10"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stories.as_array().unwrap().len(), 1);

    let (status, blocked) = app
        .send(Method::DELETE, &format!("/api/v1/epics/{epic_id}"), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(blocked["error"]["code"], "has_dependencies");

    let (status, _) = app
        .send(
            Method::DELETE,
            &format!("/api/v1/epics/{epic_id}?force=true"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, missing) = app
        .send(Method::GET, &format!("/api/v1/epics/{epic_id}"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(missing["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_duplicate_relationship_conflicts() {
    let app = test_app(AppConfig::default()).await;
    let epic = app.create("/api/v1/epics", json!({"title": "Platform"})).await;
    let story = app
        .create(
            "/api/v1/user-stories",
            json!({"title": "Login", "parent_id": epic["id"]}),
        )
        .await;
    let source = app
        .create(
            "/api/v1/requirements",
            json!({"title": "Hash passwords", "parent_id": story["id"]}),
        )
        .await;
    let target = app
        .create(
            "/api/v1/requirements",
            json!({"title": "Rotate keys", "parent_id": story["id"]}),
        )
        .await;
    assert_eq!(source["reference_id"], "REQ-001");

    let path = format!("/api/v1/requirements/{}/relationships", source["id"].as_str().unwrap());
    let body = json!({"target_id": target["id"], "relationship_type": "depends_on"});

    let (status, _) = app.send(Method::POST, &path, Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, duplicate) = app.send(Method::POST, &path, Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(duplicate["error"]["code"], "conflict");
}

#[tokio::test]
async fn test_search_and_suggestions() {
    let app = test_app(AppConfig::default()).await;
    app.create("/api/v1/epics", json!({"title": "Payments platform"})).await;
    app.create("/api/v1/epics", json!({"title": "Payroll export"})).await;
    app.create("/api/v1/epics", json!({"title": "Reporting"})).await;

    let (status, hits) = app
        .send(Method::GET, "/api/v1/search?query=pay&limit=10&offset=0", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hits.as_array().unwrap().len(), 2);

    let (status, titles) = app
        .send(Method::GET, "/api/v1/search/suggestions?query=Pay", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(titles, json!(["Payments platform", "Payroll export"]));
}

#[tokio::test]
async fn test_invalid_input() {
    let app = test_app(AppConfig::default()).await;

    let (status, body) = app
        .send(Method::POST, "/api/v1/epics", Some(json!({"description": "no title"})))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "unprocessable");

    let (status, body) = app
        .send(Method::POST, "/api/v1/user-stories", Some(json!({"title": "orphan"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_input");

    let (status, _) = app.send(Method::GET, "/api/v1/epics/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_artificial_latency_skips_health() {
    let app = test_app(AppConfig::default().with_latency(Duration::from_millis(150))).await;

    let started = Instant::now();
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(started.elapsed() < Duration::from_millis(150));

    let started = Instant::now();
    let (status, _) = app.send(Method::GET, "/api/v1/epics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(started.elapsed() >= Duration::from_millis(150));
}
