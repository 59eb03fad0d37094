use crate::rest::HEALTH_PATH;
use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Duration;

/// Sleeps `delay` before every route except the health probe.
pub async fn latency_middleware(delay: Duration, request: Request, next: Next) -> Response {
    if request.uri().path() != HEALTH_PATH {
        tokio::time::sleep(delay).await;
    }
    next.run(request).await
}
