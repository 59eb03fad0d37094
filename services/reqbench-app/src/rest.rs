use crate::{
    error::{ApiJson, ApiQuery},
    handlers::{
        create_entity, create_relationship, delete_entity, get_entity, health, list_entities,
        patch_entity, replace_entity, search, suggestions, DeleteParams, ListParams,
    },
    middleware::{auth_middleware, latency_middleware, Caller, TokenVerifier},
    state::{AppConfig, AppState},
};
use axum::{
    extract::{Path, Request, State},
    middleware,
    response::Response,
    routing::{get, post},
    Extension, Router,
};
use reqbench_core::EntityKind;
use reqbench_db::{EntityPatch, NewEntity};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{classify::ServerErrorsFailureClass, trace::TraceLayer};
use tracing::{info_span, Span};
use uuid::Uuid;

pub const HEALTH_PATH: &str = "/health";

/// Collection and item routes for one entity kind.
fn entity_routes(router: Router<AppState>, kind: EntityKind) -> Router<AppState> {
    let collection = format!("/api/v1/{}", kind.path_segment());
    let item = format!("{collection}/:id");

    router
        .route(
            &collection,
            get(move |state: State<AppState>, query: ApiQuery<ListParams>| {
                list_entities(kind, state, query)
            })
            .post(
                move |state: State<AppState>, caller: Extension<Caller>, body: ApiJson<NewEntity>| {
                    create_entity(kind, state, caller, body)
                },
            ),
        )
        .route(
            &item,
            get(move |state: State<AppState>, id: Path<String>| get_entity(kind, state, id))
                .put(
                    move |state: State<AppState>, id: Path<String>, body: ApiJson<EntityPatch>| {
                        replace_entity(kind, state, id, body)
                    },
                )
                .patch(
                    move |state: State<AppState>, id: Path<String>, body: ApiJson<EntityPatch>| {
                        patch_entity(kind, state, id, body)
                    },
                )
                .delete(
                    move |state: State<AppState>, id: Path<String>, params: ApiQuery<DeleteParams>| {
                        delete_entity(kind, state, id, params)
                    },
                ),
        )
}

/// Builds the application router over `state.store`.
pub fn build_router(state: AppState, config: &AppConfig) -> Router {
    let verifier = Arc::new(TokenVerifier::new(&config.auth.secret));

    let mut router = Router::new()
        .route(HEALTH_PATH, get(health))
        .route("/api/v1/search", get(search))
        .route("/api/v1/search/suggestions", get(suggestions))
        .route(
            "/api/v1/requirements/:id/relationships",
            post(create_relationship),
        );
    for kind in EntityKind::ALL {
        router = entity_routes(router, kind);
    }

    let mut router = router.with_state(state);
    if let Some(delay) = config.artificial_latency {
        router = router.layer(middleware::from_fn(move |req, next| {
            latency_middleware(delay, req, next)
        }));
    }

    router
        .layer(middleware::from_fn(move |req, next| {
            let verifier = Arc::clone(&verifier);
            auth_middleware(verifier, req, next)
        }))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request| {
                    info_span!(
                        "http_request",
                        request_id = %Uuid::new_v4(),
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                })
                .on_request(|_request: &Request, _span: &Span| {})
                .on_response(|response: &Response, latency: Duration, _span: &Span| {
                    let status = response.status();
                    let latency_ms = latency.as_millis() as u64;
                    if status.is_server_error() {
                        tracing::error!(status = %status, latency_ms, "request failed with server error");
                    } else {
                        tracing::debug!(status = %status, latency_ms, "request completed");
                    }
                })
                .on_failure(
                    |failure_class: ServerErrorsFailureClass, latency: Duration, _span: &Span| {
                        tracing::error!(
                            failure_class = ?failure_class,
                            latency_ms = latency.as_millis() as u64,
                            "request failed"
                        );
                    },
                ),
        )
}
