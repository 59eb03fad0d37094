//! Postgres-backed [`Store`].
//!
//! Each entity kind lives in its own table with a kind-specific parent
//! column; rows are read back through a common projection so one decoder
//! serves all five tables.

use crate::error::{map_sqlx_error, StoreError, StoreResult};
use crate::model::{
    Entity, EntityPatch, ListQuery, NewEntity, NewRelationship, Relationship, SearchHit, User,
    DEFAULT_PRIORITY, DEFAULT_REQUIREMENT_TYPE, DEFAULT_STATUS, RELATIONSHIP_TYPES,
    REQUIREMENT_TYPES, SYSTEM_USERNAME,
};
use crate::pool::TrackedPool;
use crate::store::Store;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use reqbench_core::{EntityKind, PoolStats};
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{query, query_scalar, Row};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Embedded SQL migrations for the requirements schema.
pub const MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

fn parent_column(kind: EntityKind) -> Option<&'static str> {
    match kind {
        EntityKind::Epic => None,
        EntityKind::UserStory => Some("epic_id"),
        EntityKind::Requirement | EntityKind::AcceptanceCriteria => Some("user_story_id"),
        EntityKind::Comment => Some("requirement_id"),
    }
}

fn projection(kind: EntityKind) -> String {
    format!(
        "id, reference_id, {} AS parent_id, title, description, status, priority, \
         creator_id, assignee_id, {} AS requirement_type, created_at, updated_at",
        parent_column(kind).unwrap_or("NULL::uuid"),
        if kind == EntityKind::Requirement {
            "requirement_type"
        } else {
            "NULL::text"
        }
    )
}

fn entity_from_row(kind: EntityKind, row: &PgRow) -> Result<Entity, sqlx::Error> {
    Ok(Entity {
        id: row.try_get("id")?,
        kind,
        reference_id: row.try_get("reference_id")?,
        parent_id: row.try_get("parent_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        status: row.try_get("status")?,
        priority: row.try_get("priority")?,
        creator_id: row.try_get("creator_id")?,
        assignee_id: row.try_get("assignee_id")?,
        requirement_type: row.try_get("requirement_type")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Escapes `%`, `_` and `\` for use inside an `ILIKE` pattern.
fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn searchable_union() -> String {
    EntityKind::ALL
        .into_iter()
        .filter(|kind| kind.reference_prefix().is_some())
        .map(|kind| {
            format!(
                "SELECT '{}' AS kind, id, reference_id, title, description FROM {}",
                kind.as_str(),
                kind.table()
            )
        })
        .collect::<Vec<_>>()
        .join(" UNION ALL ")
}

fn kind_from_str(raw: &str) -> Option<EntityKind> {
    EntityKind::ALL.into_iter().find(|k| k.as_str() == raw)
}

async fn insert_row(
    conn: &mut PgConnection,
    kind: EntityKind,
    new: NewEntity,
    reference_id: Option<String>,
) -> StoreResult<Entity> {
    new.validate(kind).map_err(StoreError::Invalid)?;
    if kind.reference_prefix().is_some() && reference_id.is_none() {
        return Err(StoreError::invalid(format!("{kind} requires a reference id")));
    }
    let creator_id = new
        .creator_id
        .ok_or_else(|| StoreError::invalid("creator is required"))?;

    let id = Uuid::new_v4();
    let now = Utc::now();
    let mut columns = vec![
        "id",
        "reference_id",
        "title",
        "description",
        "status",
        "priority",
        "creator_id",
        "assignee_id",
        "created_at",
        "updated_at",
    ];
    if let Some(parent) = parent_column(kind) {
        columns.push(parent);
    }
    if kind == EntityKind::Requirement {
        columns.push("requirement_type");
    }
    let placeholders = (1..=columns.len())
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        kind.table(),
        columns.join(", "),
        placeholders,
        projection(kind)
    );

    let label = reference_id.clone().unwrap_or_else(|| id.to_string());
    let mut statement = query(&sql)
        .bind(id)
        .bind(reference_id)
        .bind(new.title)
        .bind(new.description)
        .bind(new.status.unwrap_or_else(|| DEFAULT_STATUS.to_string()))
        .bind(new.priority.unwrap_or_else(|| DEFAULT_PRIORITY.to_string()))
        .bind(creator_id)
        .bind(new.assignee_id)
        .bind(now)
        .bind(now);
    if parent_column(kind).is_some() {
        statement = statement.bind(new.parent_id);
    }
    if kind == EntityKind::Requirement {
        statement = statement.bind(
            new.requirement_type
                .unwrap_or_else(|| DEFAULT_REQUIREMENT_TYPE.to_string()),
        );
    }

    let row = statement
        .fetch_one(&mut *conn)
        .await
        .map_err(|err| map_sqlx_error(kind.as_str(), &label, err))?;
    Ok(entity_from_row(kind, &row)?)
}

pub struct PgStore {
    pool: Arc<TrackedPool>,
    system_user: RwLock<Option<Uuid>>,
}

impl PgStore {
    pub fn new(pool: Arc<TrackedPool>) -> Self {
        Self {
            pool,
            system_user: RwLock::new(None),
        }
    }

    pub fn pool(&self) -> &Arc<TrackedPool> {
        &self.pool
    }

    pub async fn run_migrations(&self) -> StoreResult<()> {
        MIGRATOR.run(self.pool.inner()).await?;
        Ok(())
    }

    async fn exists(conn: &mut PgConnection, kind: EntityKind, id: Uuid) -> StoreResult<bool> {
        let sql = format!("SELECT EXISTS (SELECT 1 FROM {} WHERE id = $1)", kind.table());
        Ok(query_scalar::<_, bool>(&sql).bind(id).fetch_one(conn).await?)
    }
}

#[async_trait]
impl Store for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await?;
        query("SELECT 1").execute(&mut *conn).await?;
        Ok(())
    }

    async fn seed_defaults(&self) -> StoreResult<Uuid> {
        let tx = self.pool.begin().await?;

        for (name, description) in REQUIREMENT_TYPES {
            query("INSERT INTO requirement_types (name, description) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING")
                .bind(*name)
                .bind(*description)
                .execute(&mut **tx.conn().await?)
                .await?;
        }
        for (name, description) in RELATIONSHIP_TYPES {
            query("INSERT INTO relationship_types (name, description) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING")
                .bind(*name)
                .bind(*description)
                .execute(&mut **tx.conn().await?)
                .await?;
        }

        let system = User::new(SYSTEM_USERNAME, "admin");
        query(
            r#"
            INSERT INTO users (id, username, email, full_name, role)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (username) DO NOTHING
            "#,
        )
        .bind(system.id)
        .bind(&system.username)
        .bind(&system.email)
        .bind(&system.full_name)
        .bind(&system.role)
        .execute(&mut **tx.conn().await?)
        .await?;

        let id: Uuid = query_scalar("SELECT id FROM users WHERE username = $1")
            .bind(SYSTEM_USERNAME)
            .fetch_one(&mut **tx.conn().await?)
            .await?;
        tx.commit().await?;

        *self.system_user.write() = Some(id);
        debug!(user_id = %id, "seeded defaults");
        Ok(id)
    }

    async fn system_user_id(&self) -> StoreResult<Uuid> {
        if let Some(id) = *self.system_user.read() {
            return Ok(id);
        }
        let mut conn = self.pool.acquire().await?;
        let id: Option<Uuid> = query_scalar("SELECT id FROM users WHERE username = $1")
            .bind(SYSTEM_USERNAME)
            .fetch_optional(&mut *conn)
            .await?;
        let id = id.ok_or_else(|| StoreError::not_found("user", SYSTEM_USERNAME))?;
        *self.system_user.write() = Some(id);
        Ok(id)
    }

    async fn insert_users(&self, users: &[User]) -> StoreResult<()> {
        let tx = self.pool.begin().await?;
        for user in users {
            query("INSERT INTO users (id, username, email, full_name, role) VALUES ($1, $2, $3, $4, $5)")
                .bind(user.id)
                .bind(&user.username)
                .bind(&user.email)
                .bind(&user.full_name)
                .bind(&user.role)
                .execute(&mut **tx.conn().await?)
                .await
                .map_err(|err| map_sqlx_error("user", &user.username, err))?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn user_ids(&self) -> StoreResult<Vec<Uuid>> {
        let mut conn = self.pool.acquire().await?;
        Ok(query_scalar("SELECT id FROM users ORDER BY created_at, id")
            .fetch_all(&mut *conn)
            .await?)
    }

    async fn count(&self, kind: EntityKind) -> StoreResult<u64> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("SELECT COUNT(*) FROM {}", kind.table());
        let count: i64 = query_scalar(&sql).fetch_one(&mut *conn).await?;
        Ok(count.max(0) as u64)
    }

    async fn insert_batch(&self, kind: EntityKind, rows: Vec<NewEntity>) -> StoreResult<Vec<Uuid>> {
        let tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(rows.len());
        for mut new in rows {
            let reference = new.reference_id.take();
            ids.push(insert_row(&mut **tx.conn().await?, kind, new, reference).await?.id);
        }
        tx.commit().await?;
        Ok(ids)
    }

    async fn create(&self, kind: EntityKind, new: NewEntity) -> StoreResult<Entity> {
        let tx = self.pool.begin().await?;

        let reference = if kind.reference_prefix().is_some() {
            // Serialises numbering per table for the life of the transaction.
            query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind(kind.table())
                .execute(&mut **tx.conn().await?)
                .await?;
            let sql = format!(
                "SELECT COALESCE(MAX(CAST(SUBSTRING(reference_id FROM '[0-9]+$') AS BIGINT)), 0) FROM {}",
                kind.table()
            );
            let last: i64 = query_scalar(&sql).fetch_one(&mut **tx.conn().await?).await?;
            kind.reference_id(last.max(0) as u64 + 1)
        } else {
            None
        };

        let entity = insert_row(&mut **tx.conn().await?, kind, new, reference).await?;
        tx.commit().await?;
        Ok(entity)
    }

    async fn get(&self, kind: EntityKind, id: Uuid) -> StoreResult<Entity> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("SELECT {} FROM {} WHERE id = $1", projection(kind), kind.table());
        let row = query(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| StoreError::not_found(kind.as_str(), id))?;
        Ok(entity_from_row(kind, &row)?)
    }

    async fn list(&self, kind: EntityKind, list: ListQuery) -> StoreResult<Vec<Entity>> {
        let mut conn = self.pool.acquire().await?;
        let filter = match (parent_column(kind), list.parent_id) {
            (Some(column), Some(_)) => format!("WHERE {column} = $3"),
            _ => String::new(),
        };
        let sql = format!(
            "SELECT {} FROM {} {} ORDER BY created_at, id LIMIT $1 OFFSET $2",
            projection(kind),
            kind.table(),
            filter
        );
        let mut statement = query(&sql)
            .bind(i64::from(list.limit.min(ListQuery::MAX_LIMIT)))
            .bind(i64::from(list.offset));
        if !filter.is_empty() {
            statement = statement.bind(list.parent_id);
        }
        let rows = statement.fetch_all(&mut *conn).await?;
        rows.iter()
            .map(|row| entity_from_row(kind, row).map_err(StoreError::from))
            .collect()
    }

    async fn update(&self, kind: EntityKind, id: Uuid, patch: EntityPatch) -> StoreResult<Entity> {
        patch.validate().map_err(StoreError::Invalid)?;
        let mut conn = self.pool.acquire().await?;
        let sql = format!(
            r#"
            UPDATE {}
               SET title = COALESCE($2, title),
                   description = COALESCE($3, description),
                   status = COALESCE($4, status),
                   priority = COALESCE($5, priority),
                   assignee_id = COALESCE($6, assignee_id),
                   updated_at = $7
             WHERE id = $1
            RETURNING {}
            "#,
            kind.table(),
            projection(kind)
        );
        let row = query(&sql)
            .bind(id)
            .bind(patch.title)
            .bind(patch.description)
            .bind(patch.status)
            .bind(patch.priority)
            .bind(patch.assignee_id)
            .bind(Utc::now())
            .fetch_optional(&mut *conn)
            .await
            .map_err(|err| map_sqlx_error(kind.as_str(), id, err))?
            .ok_or_else(|| StoreError::not_found(kind.as_str(), id))?;
        Ok(entity_from_row(kind, &row)?)
    }

    async fn delete(&self, kind: EntityKind, id: Uuid, force: bool) -> StoreResult<()> {
        let tx = self.pool.begin().await?;
        if !Self::exists(&mut **tx.conn().await?, kind, id).await? {
            return Err(StoreError::not_found(kind.as_str(), id));
        }

        if !force {
            let mut children = 0u64;
            for child in kind.children() {
                let Some(column) = parent_column(*child) else {
                    continue;
                };
                let sql = format!("SELECT COUNT(*) FROM {} WHERE {column} = $1", child.table());
                let n: i64 = query_scalar(&sql).bind(id).fetch_one(&mut **tx.conn().await?).await?;
                children += n.max(0) as u64;
            }
            if children > 0 {
                return Err(StoreError::HasChildren {
                    entity: kind.as_str(),
                    id: id.to_string(),
                    children,
                });
            }
        }

        // Dependent rows go with it via ON DELETE CASCADE.
        let sql = format!("DELETE FROM {} WHERE id = $1", kind.table());
        query(&sql).bind(id).execute(&mut **tx.conn().await?).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn create_relationship(&self, new: NewRelationship) -> StoreResult<Relationship> {
        if new.source_id == new.target_id {
            return Err(StoreError::invalid("a requirement cannot relate to itself"));
        }
        let created_by = match new.created_by {
            Some(user) => user,
            None => self.system_user_id().await?,
        };

        let mut conn = self.pool.acquire().await?;
        for id in [new.source_id, new.target_id] {
            if !Self::exists(&mut conn, EntityKind::Requirement, id).await? {
                return Err(StoreError::not_found("requirement", id));
            }
        }

        let label = format!("{}:{}:{}", new.source_id, new.target_id, new.relationship_type);
        let row = query(
            r#"
            INSERT INTO requirement_relationships (id, source_id, target_id, relationship_type, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, source_id, target_id, relationship_type, created_by, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.source_id)
        .bind(new.target_id)
        .bind(&new.relationship_type)
        .bind(created_by)
        .bind(Utc::now())
        .fetch_one(&mut *conn)
        .await
        .map_err(|err| map_sqlx_error("relationship", &label, err))?;

        Ok(Relationship {
            id: row.try_get("id")?,
            source_id: row.try_get("source_id")?,
            target_id: row.try_get("target_id")?,
            relationship_type: row.try_get("relationship_type")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn search(&self, text: &str, limit: u32, offset: u32) -> StoreResult<Vec<SearchHit>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT kind, id, reference_id, title FROM ({}) AS entities \
             WHERE title ILIKE $1 OR description ILIKE $1 \
             ORDER BY kind, reference_id LIMIT $2 OFFSET $3",
            searchable_union()
        );
        let rows = query(&sql)
            .bind(format!("%{}%", escape_like(text)))
            .bind(i64::from(limit.min(ListQuery::MAX_LIMIT)))
            .bind(i64::from(offset))
            .fetch_all(&mut *conn)
            .await?;

        rows.iter()
            .map(|row| -> StoreResult<SearchHit> {
                let raw: String = row.try_get("kind")?;
                let kind = kind_from_str(&raw)
                    .ok_or_else(|| StoreError::invalid(format!("unknown entity kind `{raw}`")))?;
                Ok(SearchHit {
                    kind,
                    id: row.try_get("id")?,
                    reference_id: row.try_get("reference_id")?,
                    title: row.try_get("title")?,
                })
            })
            .collect()
    }

    async fn suggestions(&self, prefix: &str, limit: u32) -> StoreResult<Vec<String>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT DISTINCT title FROM ({}) AS entities WHERE title ILIKE $1 ORDER BY title LIMIT $2",
            searchable_union()
        );
        Ok(query_scalar(&sql)
            .bind(format!("{}%", escape_like(prefix)))
            .bind(i64::from(limit.min(ListQuery::MAX_LIMIT)))
            .fetch_all(&mut *conn)
            .await?)
    }

    async fn counts(&self) -> StoreResult<BTreeMap<String, u64>> {
        let mut conn = self.pool.acquire().await?;
        let tables = std::iter::once("users")
            .chain(EntityKind::ALL.iter().map(|k| k.table()))
            .chain(std::iter::once("requirement_relationships"));

        let mut counts = BTreeMap::new();
        for table in tables {
            let sql = format!("SELECT COUNT(*) FROM {table}");
            let n: i64 = query_scalar(&sql).fetch_one(&mut *conn).await?;
            counts.insert(table.to_string(), n.max(0) as u64);
        }
        Ok(counts)
    }

    fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    fn open_transactions(&self) -> u64 {
        self.pool.open_transactions()
    }

    async fn rollback_open_transactions(&self) -> u64 {
        self.pool.rollback_open_transactions().await
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_fills_missing_columns() {
        let epic = projection(EntityKind::Epic);
        assert!(epic.contains("NULL::uuid AS parent_id"));
        assert!(epic.contains("NULL::text AS requirement_type"));

        let requirement = projection(EntityKind::Requirement);
        assert!(requirement.contains("user_story_id AS parent_id"));
        assert!(requirement.contains("requirement_type AS requirement_type"));
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn test_search_union_skips_comments() {
        let union = searchable_union();
        assert_eq!(union.matches("UNION ALL").count(), 3);
        assert!(!union.contains("FROM comments"));
    }
}
