//! Store behaviour shared by both backends.
//!
//! The Postgres tests start a container and are ignored by default:
//! `cargo test -p reqbench-db -- --ignored`.

use reqbench_core::{DatabaseConfig, DatasetSize, EntityKind};
use reqbench_db::{
    DataGenerator, DatabaseBackend, EntityPatch, ListQuery, NewEntity, NewRelationship,
    DatabaseTracker, ProvisionedDatabase, Provisioner, Store, StoreError,
};
use reqbench_reliability::{ReliabilityManager, ResourceTracker};
use std::sync::Arc;

async fn provision(backend: DatabaseBackend) -> ProvisionedDatabase {
    Provisioner::new(
        DatabaseConfig::default(),
        Arc::new(ReliabilityManager::default()),
    )
    .provision(&backend)
    .await
    .expect("provision database")
}

async fn exercise_crud(store: Arc<dyn Store>) {
    let system = store.system_user_id().await.unwrap();

    let epic = store
        .create(EntityKind::Epic, NewEntity::titled("Checkout").with_creator(system))
        .await
        .unwrap();
    assert!(epic.reference_id.as_deref().unwrap().starts_with("EP-"));
    assert_eq!(epic.status, "Backlog");

    let story = store
        .create(
            EntityKind::UserStory,
            NewEntity::titled("Pay by card")
                .with_parent(epic.id)
                .with_creator(system),
        )
        .await
        .unwrap();
    assert_eq!(story.parent_id, Some(epic.id));

    let updated = store
        .update(
            EntityKind::Epic,
            epic.id,
            EntityPatch {
                status: Some("In Progress".into()),
                ..EntityPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.status, "In Progress");
    assert_eq!(updated.title, "Checkout");

    let stories = store
        .list(
            EntityKind::UserStory,
            ListQuery {
                parent_id: Some(epic.id),
                ..ListQuery::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(stories.len(), 1);

    let refused = store.delete(EntityKind::Epic, epic.id, false).await;
    assert!(matches!(refused, Err(StoreError::HasChildren { .. })));

    store.delete(EntityKind::Epic, epic.id, true).await.unwrap();
    assert!(matches!(
        store.get(EntityKind::UserStory, story.id).await,
        Err(StoreError::NotFound { .. })
    ));
}

async fn exercise_generator(store: Arc<dyn Store>) {
    let summary = DataGenerator::new(Arc::clone(&store), 7)
        .with_batch_size(40)
        .generate(DatasetSize::Small)
        .await
        .unwrap();

    let counts = store.counts().await.unwrap();
    assert_eq!(counts["epics"], 25);
    assert_eq!(counts["user_stories"], 100);
    assert_eq!(counts["requirements"], 300);
    assert_eq!(counts["acceptance_criteria"], 100);
    assert_eq!(counts["comments"], 50);
    assert_eq!(counts["requirement_relationships"], summary.relationships as u64);

    // Generated links pair (0, 1), (2, 3), ... so (0, 2) is free.
    let link = NewRelationship {
        source_id: summary.requirements[0],
        target_id: summary.requirements[2],
        relationship_type: "depends_on".into(),
        created_by: None,
    };
    let created = store.create_relationship(link.clone()).await.unwrap();
    assert_eq!(created.created_by, summary.system_user);

    let duplicate = store.create_relationship(link).await;
    assert!(matches!(duplicate, Err(StoreError::Conflict(_))));

    let hits = store.search("", 10, 0).await.unwrap();
    assert_eq!(hits.len(), 10);
}

#[tokio::test]
async fn test_memory_crud_flow() {
    let db = provision(DatabaseBackend::Memory).await;
    exercise_crud(Arc::clone(&db.store)).await;
}

#[tokio::test]
async fn test_memory_generator_counts() {
    let db = provision(DatabaseBackend::Memory).await;
    exercise_generator(Arc::clone(&db.store)).await;
}

#[tokio::test]
async fn test_memory_seed_is_idempotent() {
    let db = provision(DatabaseBackend::Memory).await;
    let again = db.store.seed_defaults().await.unwrap();
    assert_eq!(again, db.system_user);
    assert_eq!(db.store.counts().await.unwrap()["users"], 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_postgres_container_crud_flow() {
    let db = provision(DatabaseBackend::Container).await;
    assert_eq!(db.store.backend(), "postgres");
    assert!(db.teardown.has_container());

    exercise_crud(Arc::clone(&db.store)).await;

    db.store.close().await;
    db.teardown.teardown().await.unwrap();
    assert!(!db.teardown.has_container());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_postgres_container_generator_counts() {
    let db = provision(DatabaseBackend::Container).await;

    exercise_generator(Arc::clone(&db.store)).await;

    let stats = db.store.pool_stats();
    assert!(stats.open >= 1);
    assert_eq!(db.store.open_transactions(), 0);

    db.store.close().await;
    db.teardown.teardown().await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_database_tracker_rolls_back_open_transaction() {
    let db = provision(DatabaseBackend::Container).await;
    let pool = Arc::clone(db.pool.as_ref().unwrap());

    let tx = pool.begin().await.unwrap();
    sqlx::query("INSERT INTO users (id, username, email, full_name, role) VALUES (gen_random_uuid(), 'left-open', 'o@x', 'Left Open', 'viewer')")
        .execute(&mut **tx.conn().await.unwrap())
        .await
        .unwrap();
    assert_eq!(db.store.open_transactions(), 1);

    let report = DatabaseTracker::new(Arc::clone(&db.store))
        .cleanup()
        .await
        .unwrap();

    assert!(report.detail.contains("1 transaction(s) rolled back"), "{}", report.detail);
    assert_eq!(report.residual, 0);
    assert!(db.store.is_closed());
    assert!(matches!(tx.commit().await, Err(StoreError::RolledBack)));

    db.teardown.teardown().await.unwrap();
}
