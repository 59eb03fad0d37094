//! CRUD handlers shared by the five entity collections.
//!
//! Each handler takes the [`EntityKind`] bound by the router, so one set
//! of functions serves `/api/v1/epics`, `/api/v1/user-stories` and the rest.

use crate::error::{ApiError, ApiJson, ApiQuery};
use crate::middleware::Caller;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use reqbench_core::EntityKind;
use reqbench_db::{Entity, EntityPatch, ListQuery, NewEntity, NewRelationship, Relationship};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub parent_id: Option<Uuid>,
}

impl ListParams {
    fn into_query(self) -> ListQuery {
        let defaults = ListQuery::default();
        ListQuery {
            limit: self.limit.unwrap_or(defaults.limit).clamp(1, ListQuery::MAX_LIMIT),
            offset: self.offset.unwrap_or(0),
            parent_id: self.parent_id,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteParams {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct RelationshipRequest {
    pub target_id: Uuid,
    #[serde(default = "default_relationship_type")]
    pub relationship_type: String,
}

fn default_relationship_type() -> String {
    "relates_to".to_string()
}

fn parse_id(kind: EntityKind, raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("`{raw}` is not a valid {kind} id")))
}

pub async fn list_entities(
    kind: EntityKind,
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<ListParams>,
) -> Result<Json<Vec<Entity>>, ApiError> {
    let rows = state.store.list(kind, params.into_query()).await?;
    debug!(kind = %kind, rows = rows.len(), "listed entities");
    Ok(Json(rows))
}

pub async fn create_entity(
    kind: EntityKind,
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    ApiJson(mut new): ApiJson<NewEntity>,
) -> Result<(StatusCode, Json<Entity>), ApiError> {
    new.creator_id.get_or_insert(caller.user_id);
    new.reference_id = None;
    let entity = state.store.create(kind, new).await?;
    Ok((StatusCode::CREATED, Json(entity)))
}

pub async fn get_entity(
    kind: EntityKind,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Entity>, ApiError> {
    let id = parse_id(kind, &id)?;
    Ok(Json(state.store.get(kind, id).await?))
}

/// PUT replaces the editable fields and therefore requires a title.
pub async fn replace_entity(
    kind: EntityKind,
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<EntityPatch>,
) -> Result<Json<Entity>, ApiError> {
    let id = parse_id(kind, &id)?;
    if patch.title.is_none() {
        return Err(ApiError::BadRequest("PUT requires a title".into()));
    }
    Ok(Json(state.store.update(kind, id, patch).await?))
}

pub async fn patch_entity(
    kind: EntityKind,
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<EntityPatch>,
) -> Result<Json<Entity>, ApiError> {
    let id = parse_id(kind, &id)?;
    if patch.is_empty() {
        return Err(ApiError::BadRequest("patch contains no fields".into()));
    }
    Ok(Json(state.store.update(kind, id, patch).await?))
}

/// 409 when dependents exist, unless `?force=true` cascades the delete.
pub async fn delete_entity(
    kind: EntityKind,
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiQuery(params): ApiQuery<DeleteParams>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(kind, &id)?;
    state.store.delete(kind, id, params.force).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_relationship(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<RelationshipRequest>,
) -> Result<(StatusCode, Json<Relationship>), ApiError> {
    let source_id = parse_id(EntityKind::Requirement, &id)?;
    let relationship = state
        .store
        .create_relationship(NewRelationship {
            source_id,
            target_id: body.target_id,
            relationship_type: body.relationship_type,
            created_by: Some(caller.user_id),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(relationship)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_params_clamped() {
        let query = ListParams {
            limit: Some(10_000),
            offset: None,
            parent_id: None,
        }
        .into_query();
        assert_eq!(query.limit, ListQuery::MAX_LIMIT);
        assert_eq!(query.offset, 0);

        assert_eq!(ListParams::default().into_query().limit, 50);
        let zero = ListParams {
            limit: Some(0),
            ..ListParams::default()
        };
        assert_eq!(zero.into_query().limit, 1);
    }

    #[test]
    fn test_parse_id() {
        assert!(parse_id(EntityKind::Epic, "not-a-uuid").is_err());
        let id = Uuid::new_v4();
        assert_eq!(parse_id(EntityKind::Epic, &id.to_string()).unwrap(), id);
    }
}
