use crate::error::StoreResult;
use crate::model::{
    Entity, EntityPatch, ListQuery, NewEntity, NewRelationship, Relationship, SearchHit, User,
};
use async_trait::async_trait;
use reqbench_core::{EntityKind, PoolStats};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Persistence seam shared by the application under test, the data
/// generator and the provisioner.
#[async_trait]
pub trait Store: Send + Sync {
    /// `memory` or `postgres`.
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> StoreResult<()>;

    /// Inserts requirement types, relationship types and the system user.
    /// Safe to call more than once. Returns the system user's id.
    async fn seed_defaults(&self) -> StoreResult<Uuid>;

    async fn system_user_id(&self) -> StoreResult<Uuid>;

    async fn insert_users(&self, users: &[User]) -> StoreResult<()>;

    async fn user_ids(&self) -> StoreResult<Vec<Uuid>>;

    async fn count(&self, kind: EntityKind) -> StoreResult<u64>;

    /// Inserts pre-numbered rows in one transaction. Every row must carry
    /// its creator and, for kinds with a reference prefix, its reference id.
    async fn insert_batch(&self, kind: EntityKind, rows: Vec<NewEntity>) -> StoreResult<Vec<Uuid>>;

    /// Inserts one row, assigning the next free reference id.
    async fn create(&self, kind: EntityKind, new: NewEntity) -> StoreResult<Entity>;

    async fn get(&self, kind: EntityKind, id: Uuid) -> StoreResult<Entity>;

    async fn list(&self, kind: EntityKind, query: ListQuery) -> StoreResult<Vec<Entity>>;

    async fn update(&self, kind: EntityKind, id: Uuid, patch: EntityPatch) -> StoreResult<Entity>;

    /// Without `force`, refuses when dependent rows exist.
    async fn delete(&self, kind: EntityKind, id: Uuid, force: bool) -> StoreResult<()>;

    /// Fails with `Conflict` when the same (source, target, type) exists.
    async fn create_relationship(&self, new: NewRelationship) -> StoreResult<Relationship>;

    async fn search(&self, query: &str, limit: u32, offset: u32) -> StoreResult<Vec<SearchHit>>;

    async fn suggestions(&self, prefix: &str, limit: u32) -> StoreResult<Vec<String>>;

    /// Row counts keyed by table name, including `users` and
    /// `requirement_relationships`.
    async fn counts(&self) -> StoreResult<BTreeMap<String, u64>>;

    fn pool_stats(&self) -> PoolStats;

    /// Transactions begun and not yet finished.
    fn open_transactions(&self) -> u64 {
        0
    }

    /// Rolls back transactions still open and returns how many.
    async fn rollback_open_transactions(&self) -> u64 {
        0
    }

    async fn close(&self);

    fn is_closed(&self) -> bool;
}
