use crate::error::{ApiError, ApiQuery};
use crate::state::AppState;
use axum::{extract::State, Json};
use reqbench_db::{ListQuery, SearchHit};
use serde::Deserialize;

const DEFAULT_SUGGESTIONS: u32 = 10;

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default, alias = "q")]
    pub query: String,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Case-insensitive match on title or description across every entity
/// that carries a reference id.
pub async fn search(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<SearchParams>,
) -> Result<Json<Vec<SearchHit>>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(ListQuery::default().limit)
        .clamp(1, ListQuery::MAX_LIMIT);
    let hits = state
        .store
        .search(params.query.trim(), limit, params.offset.unwrap_or(0))
        .await?;
    Ok(Json(hits))
}

/// Distinct titles starting with `query`.
pub async fn suggestions(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<SearchParams>,
) -> Result<Json<Vec<String>>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_SUGGESTIONS)
        .clamp(1, ListQuery::MAX_LIMIT);
    let titles = state.store.suggestions(params.query.trim(), limit).await?;
    Ok(Json(titles))
}
