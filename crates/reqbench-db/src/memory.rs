//! In-process store used when no container runtime is available.

use crate::error::{StoreError, StoreResult};
use crate::model::{
    Entity, EntityPatch, ListQuery, NewEntity, NewRelationship, Relationship, SearchHit, User,
    DEFAULT_PRIORITY, DEFAULT_REQUIREMENT_TYPE, DEFAULT_STATUS, RELATIONSHIP_TYPES,
    REQUIREMENT_TYPES, SYSTEM_USERNAME,
};
use crate::store::Store;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use reqbench_core::{EntityKind, PoolStats};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Row {
    seq: u64,
    entity: Entity,
}

#[derive(Default)]
struct Table {
    rows: HashMap<Uuid, Row>,
    references: HashSet<String>,
    /// Highest reference number handed out so far.
    last_reference: u64,
}

impl Table {
    fn ordered(&self) -> Vec<&Row> {
        let mut rows: Vec<&Row> = self.rows.values().collect();
        rows.sort_by_key(|r| r.seq);
        rows
    }
}

#[derive(Default)]
struct State {
    users: BTreeMap<Uuid, User>,
    usernames: HashSet<String>,
    system_user: Option<Uuid>,
    requirement_types: BTreeSet<String>,
    relationship_types: BTreeSet<String>,
    tables: HashMap<EntityKind, Table>,
    relationships: HashMap<(Uuid, Uuid, String), Relationship>,
    next_seq: u64,
}

impl State {
    fn table(&self, kind: EntityKind) -> Option<&Table> {
        self.tables.get(&kind)
    }

    fn table_mut(&mut self, kind: EntityKind) -> &mut Table {
        self.tables.entry(kind).or_default()
    }

    fn exists(&self, kind: EntityKind, id: Uuid) -> bool {
        self.table(kind).is_some_and(|t| t.rows.contains_key(&id))
    }

    fn children_of(&self, kind: EntityKind, id: Uuid) -> Vec<(EntityKind, Uuid)> {
        kind.children()
            .iter()
            .flat_map(|child| {
                self.table(*child)
                    .into_iter()
                    .flat_map(|t| t.rows.values())
                    .filter(move |row| row.entity.parent_id == Some(id))
                    .map(move |row| (*child, row.entity.id))
            })
            .collect()
    }

    /// Validates references and inserts one row.
    fn insert(&mut self, kind: EntityKind, new: NewEntity, reference_id: Option<String>) -> StoreResult<Entity> {
        new.validate(kind).map_err(StoreError::Invalid)?;

        if let (Some(parent_kind), Some(parent_id)) = (kind.parent(), new.parent_id) {
            if !self.exists(parent_kind, parent_id) {
                return Err(StoreError::invalid(format!(
                    "{parent_kind} `{parent_id}` does not exist"
                )));
            }
        }

        let creator_id = new
            .creator_id
            .ok_or_else(|| StoreError::invalid("creator is required"))?;
        if !self.users.contains_key(&creator_id) {
            return Err(StoreError::invalid(format!("user `{creator_id}` does not exist")));
        }
        if let Some(assignee) = new.assignee_id {
            if !self.users.contains_key(&assignee) {
                return Err(StoreError::invalid(format!("user `{assignee}` does not exist")));
            }
        }

        let requirement_type = if kind == EntityKind::Requirement {
            let name = new
                .requirement_type
                .clone()
                .unwrap_or_else(|| DEFAULT_REQUIREMENT_TYPE.to_string());
            if !self.requirement_types.contains(&name) {
                return Err(StoreError::invalid(format!("unknown requirement type `{name}`")));
            }
            Some(name)
        } else {
            None
        };

        match (&reference_id, kind.reference_prefix()) {
            (None, Some(_)) => {
                return Err(StoreError::invalid(format!("{kind} requires a reference id")))
            }
            (Some(reference), _) if self.table(kind).is_some_and(|t| t.references.contains(reference)) => {
                return Err(StoreError::Conflict(format!(
                    "{kind} reference `{reference}` already exists"
                )))
            }
            _ => {}
        }

        let now = Utc::now();
        let entity = Entity {
            id: Uuid::new_v4(),
            kind,
            reference_id: reference_id.clone(),
            parent_id: new.parent_id,
            title: new.title,
            description: new.description,
            status: new.status.unwrap_or_else(|| DEFAULT_STATUS.to_string()),
            priority: new.priority.unwrap_or_else(|| DEFAULT_PRIORITY.to_string()),
            creator_id,
            assignee_id: new.assignee_id,
            requirement_type,
            created_at: now,
            updated_at: now,
        };

        self.next_seq += 1;
        let seq = self.next_seq;
        let table = self.table_mut(kind);
        if let Some(reference) = reference_id {
            if let Some(n) = reference_number(&reference) {
                table.last_reference = table.last_reference.max(n);
            }
            table.references.insert(reference);
        }
        table.rows.insert(
            entity.id,
            Row {
                seq,
                entity: entity.clone(),
            },
        );
        Ok(entity)
    }

    fn remove(&mut self, kind: EntityKind, id: Uuid) {
        for (child_kind, child_id) in self.children_of(kind, id) {
            self.remove(child_kind, child_id);
        }
        if let Some(table) = self.tables.get_mut(&kind) {
            if let Some(row) = table.rows.remove(&id) {
                if let Some(reference) = &row.entity.reference_id {
                    table.references.remove(reference);
                }
            }
        }
        if kind == EntityKind::Requirement {
            self.relationships
                .retain(|(source, target, _), _| *source != id && *target != id);
        }
    }
}

/// Parses the numeric suffix of `EP-012` style ids.
pub(crate) fn reference_number(reference: &str) -> Option<u64> {
    reference.rsplit('-').next().and_then(|n| n.parse().ok())
}

/// Thread-safe in-memory store with the same semantics as the Postgres one.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        self.ensure_open()
    }

    async fn seed_defaults(&self) -> StoreResult<Uuid> {
        self.ensure_open()?;
        let mut state = self.state.write();

        for (name, _) in REQUIREMENT_TYPES {
            state.requirement_types.insert((*name).to_string());
        }
        for (name, _) in RELATIONSHIP_TYPES {
            state.relationship_types.insert((*name).to_string());
        }

        if let Some(id) = state.system_user {
            return Ok(id);
        }
        let user = User::new(SYSTEM_USERNAME, "admin");
        let id = user.id;
        state.usernames.insert(user.username.clone());
        state.users.insert(id, user);
        state.system_user = Some(id);
        debug!(user_id = %id, "seeded defaults");
        Ok(id)
    }

    async fn system_user_id(&self) -> StoreResult<Uuid> {
        self.ensure_open()?;
        self.state
            .read()
            .system_user
            .ok_or_else(|| StoreError::not_found("user", SYSTEM_USERNAME))
    }

    async fn insert_users(&self, users: &[User]) -> StoreResult<()> {
        self.ensure_open()?;
        let mut state = self.state.write();
        if let Some(dup) = users.iter().find(|u| state.usernames.contains(&u.username)) {
            return Err(StoreError::Conflict(format!(
                "user `{}` already exists",
                dup.username
            )));
        }
        for user in users {
            state.usernames.insert(user.username.clone());
            state.users.insert(user.id, user.clone());
        }
        Ok(())
    }

    async fn user_ids(&self) -> StoreResult<Vec<Uuid>> {
        self.ensure_open()?;
        Ok(self.state.read().users.keys().copied().collect())
    }

    async fn count(&self, kind: EntityKind) -> StoreResult<u64> {
        self.ensure_open()?;
        Ok(self
            .state
            .read()
            .table(kind)
            .map_or(0, |t| t.rows.len() as u64))
    }

    async fn insert_batch(&self, kind: EntityKind, rows: Vec<NewEntity>) -> StoreResult<Vec<Uuid>> {
        self.ensure_open()?;
        let mut state = self.state.write();

        // All-or-nothing, like the transactional backend.
        let mut ids = Vec::with_capacity(rows.len());
        for new in rows {
            let reference = new.reference_id.clone();
            match state.insert(kind, new, reference) {
                Ok(entity) => ids.push(entity.id),
                Err(err) => {
                    for id in &ids {
                        state.remove(kind, *id);
                    }
                    return Err(err);
                }
            }
        }
        Ok(ids)
    }

    async fn create(&self, kind: EntityKind, new: NewEntity) -> StoreResult<Entity> {
        self.ensure_open()?;
        let mut state = self.state.write();
        let reference = kind.reference_prefix().and_then(|_| {
            let table = state.table(kind);
            let next = table.map_or(0, |t| t.last_reference.max(t.rows.len() as u64)) + 1;
            kind.reference_id(next)
        });
        state.insert(kind, new, reference)
    }

    async fn get(&self, kind: EntityKind, id: Uuid) -> StoreResult<Entity> {
        self.ensure_open()?;
        self.state
            .read()
            .table(kind)
            .and_then(|t| t.rows.get(&id))
            .map(|row| row.entity.clone())
            .ok_or_else(|| StoreError::not_found(kind.as_str(), id))
    }

    async fn list(&self, kind: EntityKind, query: ListQuery) -> StoreResult<Vec<Entity>> {
        self.ensure_open()?;
        let state = self.state.read();
        let Some(table) = state.table(kind) else {
            return Ok(Vec::new());
        };
        Ok(table
            .ordered()
            .into_iter()
            .filter(|row| query.parent_id.is_none() || row.entity.parent_id == query.parent_id)
            .skip(query.offset as usize)
            .take(query.limit.min(ListQuery::MAX_LIMIT) as usize)
            .map(|row| row.entity.clone())
            .collect())
    }

    async fn update(&self, kind: EntityKind, id: Uuid, patch: EntityPatch) -> StoreResult<Entity> {
        self.ensure_open()?;
        patch.validate().map_err(StoreError::Invalid)?;
        let mut state = self.state.write();
        if let Some(assignee) = patch.assignee_id {
            if !state.users.contains_key(&assignee) {
                return Err(StoreError::invalid(format!("user `{assignee}` does not exist")));
            }
        }
        let row = state
            .tables
            .get_mut(&kind)
            .and_then(|t| t.rows.get_mut(&id))
            .ok_or_else(|| StoreError::not_found(kind.as_str(), id))?;
        patch.apply(&mut row.entity, Utc::now());
        Ok(row.entity.clone())
    }

    async fn delete(&self, kind: EntityKind, id: Uuid, force: bool) -> StoreResult<()> {
        self.ensure_open()?;
        let mut state = self.state.write();
        if !state.exists(kind, id) {
            return Err(StoreError::not_found(kind.as_str(), id));
        }
        let children = state.children_of(kind, id).len() as u64;
        if children > 0 && !force {
            return Err(StoreError::HasChildren {
                entity: kind.as_str(),
                id: id.to_string(),
                children,
            });
        }
        state.remove(kind, id);
        Ok(())
    }

    async fn create_relationship(&self, new: NewRelationship) -> StoreResult<Relationship> {
        self.ensure_open()?;
        let mut state = self.state.write();

        for id in [new.source_id, new.target_id] {
            if !state.exists(EntityKind::Requirement, id) {
                return Err(StoreError::not_found("requirement", id));
            }
        }
        if new.source_id == new.target_id {
            return Err(StoreError::invalid("a requirement cannot relate to itself"));
        }
        if !state.relationship_types.contains(&new.relationship_type) {
            return Err(StoreError::invalid(format!(
                "unknown relationship type `{}`",
                new.relationship_type
            )));
        }
        let created_by = match new.created_by.or(state.system_user) {
            Some(user) => user,
            None => return Err(StoreError::invalid("creator is required")),
        };

        let key = (new.source_id, new.target_id, new.relationship_type.clone());
        if state.relationships.contains_key(&key) {
            return Err(StoreError::Conflict(format!(
                "relationship `{}` from `{}` to `{}` already exists",
                new.relationship_type, new.source_id, new.target_id
            )));
        }

        let relationship = Relationship {
            id: Uuid::new_v4(),
            source_id: new.source_id,
            target_id: new.target_id,
            relationship_type: new.relationship_type,
            created_by,
            created_at: Utc::now(),
        };
        state.relationships.insert(key, relationship.clone());
        Ok(relationship)
    }

    async fn search(&self, query: &str, limit: u32, offset: u32) -> StoreResult<Vec<SearchHit>> {
        self.ensure_open()?;
        let needle = query.to_lowercase();
        let state = self.state.read();

        let hits = EntityKind::ALL
            .into_iter()
            .filter(|kind| kind.reference_prefix().is_some())
            .filter_map(|kind| state.table(kind).map(|t| (kind, t)))
            .flat_map(|(kind, table)| {
                table
                    .ordered()
                    .into_iter()
                    .filter(|row| {
                        row.entity.title.to_lowercase().contains(&needle)
                            || row
                                .entity
                                .description
                                .as_deref()
                                .is_some_and(|d| d.to_lowercase().contains(&needle))
                    })
                    .map(move |row| SearchHit {
                        kind,
                        id: row.entity.id,
                        reference_id: row.entity.reference_id.clone(),
                        title: row.entity.title.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .skip(offset as usize)
            .take(limit.min(ListQuery::MAX_LIMIT) as usize)
            .collect();
        Ok(hits)
    }

    async fn suggestions(&self, prefix: &str, limit: u32) -> StoreResult<Vec<String>> {
        self.ensure_open()?;
        let prefix = prefix.to_lowercase();
        let state = self.state.read();

        let titles: BTreeSet<String> = EntityKind::ALL
            .into_iter()
            .filter(|kind| kind.reference_prefix().is_some())
            .filter_map(|kind| state.table(kind))
            .flat_map(|table| table.rows.values())
            .filter(|row| row.entity.title.to_lowercase().starts_with(&prefix))
            .map(|row| row.entity.title.clone())
            .collect();
        Ok(titles
            .into_iter()
            .take(limit.min(ListQuery::MAX_LIMIT) as usize)
            .collect())
    }

    async fn counts(&self) -> StoreResult<BTreeMap<String, u64>> {
        self.ensure_open()?;
        let state = self.state.read();
        let mut counts = BTreeMap::new();
        counts.insert("users".to_string(), state.users.len() as u64);
        for kind in EntityKind::ALL {
            counts.insert(
                kind.table().to_string(),
                state.table(kind).map_or(0, |t| t.rows.len() as u64),
            );
        }
        counts.insert(
            "requirement_relationships".to_string(),
            state.relationships.len() as u64,
        );
        Ok(counts)
    }

    fn pool_stats(&self) -> PoolStats {
        PoolStats::default()
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            *self.state.write() = State::default();
            debug!("memory store closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
