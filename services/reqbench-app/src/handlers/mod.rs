//! HTTP handlers for REST API endpoints

pub mod entities;
pub mod health;
pub mod search;

pub use entities::{
    create_entity, create_relationship, delete_entity, get_entity, list_entities, patch_entity,
    replace_entity, DeleteParams, ListParams, RelationshipRequest,
};
pub use health::{health, HealthResponse};
pub use search::{search, suggestions, SearchParams};
