//! Seeds a store with a named dataset size.

use crate::error::StoreResult;
use crate::model::{NewEntity, NewRelationship, User, RELATIONSHIP_TYPES, REQUIREMENT_TYPES};
use crate::store::Store;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use reqbench_core::{DatasetSize, EntityKind};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

pub const DEFAULT_BATCH_SIZE: usize = 250;

const SUBJECTS: &[&str] = &[
    "Checkout", "Login", "Search", "Billing", "Reporting", "Onboarding", "Notifications",
    "Export", "Audit", "Permissions", "Dashboard", "Inventory",
];
const QUALIFIERS: &[&str] = &[
    "flow", "latency", "validation", "history", "retry", "limits", "layout", "import", "sync",
];

/// Row counts for one dataset size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SizeProfile {
    pub users: usize,
    pub epics: usize,
    pub stories_per_epic: usize,
    pub requirements_per_story: usize,
    pub acceptance_criteria: usize,
    pub comments: usize,
    pub relationships: usize,
}

impl SizeProfile {
    pub fn for_size(size: DatasetSize) -> Self {
        match size {
            DatasetSize::Small => Self {
                users: 10,
                epics: 25,
                stories_per_epic: 4,
                requirements_per_story: 3,
                acceptance_criteria: 100,
                comments: 50,
                relationships: 25,
            },
            DatasetSize::Medium => Self {
                users: 50,
                epics: 100,
                stories_per_epic: 5,
                requirements_per_story: 3,
                acceptance_criteria: 500,
                comments: 250,
                relationships: 100,
            },
            DatasetSize::Large => Self {
                users: 200,
                epics: 500,
                stories_per_epic: 4,
                requirements_per_story: 3,
                acceptance_criteria: 2000,
                comments: 1000,
                relationships: 500,
            },
        }
    }

    pub fn user_stories(&self) -> usize {
        self.epics * self.stories_per_epic
    }

    pub fn requirements(&self) -> usize {
        self.user_stories() * self.requirements_per_story
    }
}

/// IDs of everything the generator inserted.
#[derive(Debug, Clone, Default)]
pub struct SeedSummary {
    pub system_user: Uuid,
    pub users: Vec<Uuid>,
    pub epics: Vec<Uuid>,
    pub user_stories: Vec<Uuid>,
    pub requirements: Vec<Uuid>,
    pub acceptance_criteria: Vec<Uuid>,
    pub comments: Vec<Uuid>,
    pub relationships: usize,
    pub elapsed: Duration,
}

impl SeedSummary {
    pub fn ids(&self, kind: EntityKind) -> &[Uuid] {
        match kind {
            EntityKind::Epic => &self.epics,
            EntityKind::UserStory => &self.user_stories,
            EntityKind::Requirement => &self.requirements,
            EntityKind::AcceptanceCriteria => &self.acceptance_criteria,
            EntityKind::Comment => &self.comments,
        }
    }
}

pub struct DataGenerator {
    store: Arc<dyn Store>,
    rng: StdRng,
    batch_size: usize,
    simplified: bool,
}

impl DataGenerator {
    pub fn new(store: Arc<dyn Store>, seed: u64) -> Self {
        Self {
            store,
            rng: StdRng::seed_from_u64(seed),
            batch_size: DEFAULT_BATCH_SIZE,
            simplified: false,
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Skips descriptions to shrink the dataset's footprint.
    #[must_use]
    pub fn simplified(mut self, simplified: bool) -> Self {
        self.simplified = simplified;
        self
    }

    fn title(&mut self, kind: EntityKind, n: usize) -> String {
        let subject = SUBJECTS.choose(&mut self.rng).copied().unwrap_or("Feature");
        let qualifier = QUALIFIERS.choose(&mut self.rng).copied().unwrap_or("work");
        format!("{subject} {qualifier} {} {n}", kind.as_str().replace('_', " "))
    }

    fn row(&mut self, kind: EntityKind, n: usize, parent: Option<Uuid>, users: &[Uuid]) -> NewEntity {
        let creator = users.choose(&mut self.rng).copied();
        let assignee = users.choose(&mut self.rng).copied();
        let title = self.title(kind, n);
        let description = (!self.simplified).then(|| {
            format!(
                "Generated {} {n} for benchmark seeding; covers {}.",
                kind.as_str(),
                title.to_lowercase()
            )
        });
        let requirement_type = (kind == EntityKind::Requirement).then(|| {
            REQUIREMENT_TYPES
                .choose(&mut self.rng)
                .map_or("functional", |(name, _)| *name)
                .to_string()
        });

        NewEntity {
            parent_id: parent,
            title,
            description,
            status: None,
            priority: None,
            creator_id: creator,
            assignee_id: assignee,
            requirement_type,
            reference_id: None,
        }
    }

    /// Inserts `rows` in batches. Each batch reads the row count once and
    /// numbers its reference ids consecutively from there.
    async fn insert_batched(&self, kind: EntityKind, rows: Vec<NewEntity>) -> StoreResult<Vec<Uuid>> {
        let mut ids = Vec::with_capacity(rows.len());
        let mut rows = rows.into_iter().peekable();

        while rows.peek().is_some() {
            let mut batch: Vec<NewEntity> = rows.by_ref().take(self.batch_size).collect();
            let existing = self.store.count(kind).await?;
            for (offset, row) in batch.iter_mut().enumerate() {
                row.reference_id = kind.reference_id(existing + offset as u64 + 1);
            }
            let inserted = self.store.insert_batch(kind, batch).await?;
            debug!(kind = %kind, rows = inserted.len(), first = existing + 1, "inserted batch");
            ids.extend(inserted);
        }
        Ok(ids)
    }

    pub async fn generate(&mut self, size: DatasetSize) -> StoreResult<SeedSummary> {
        let started = Instant::now();
        let profile = SizeProfile::for_size(size);
        let system_user = self.store.system_user_id().await?;

        let users: Vec<User> = (1..=profile.users)
            .map(|i| User::new(format!("bench_user_{i:04}"), "user"))
            .collect();
        self.store.insert_users(&users).await?;
        let user_ids: Vec<Uuid> = users.iter().map(|u| u.id).collect();

        let rows: Vec<NewEntity> = (1..=profile.epics)
            .map(|n| self.row(EntityKind::Epic, n, None, &user_ids))
            .collect();
        let epics = self.insert_batched(EntityKind::Epic, rows).await?;

        let mut rows = Vec::with_capacity(profile.user_stories());
        for epic in &epics {
            for _ in 0..profile.stories_per_epic {
                let n = rows.len() + 1;
                rows.push(self.row(EntityKind::UserStory, n, Some(*epic), &user_ids));
            }
        }
        let user_stories = self.insert_batched(EntityKind::UserStory, rows).await?;

        let mut rows = Vec::with_capacity(profile.requirements());
        for story in &user_stories {
            for _ in 0..profile.requirements_per_story {
                let n = rows.len() + 1;
                rows.push(self.row(EntityKind::Requirement, n, Some(*story), &user_ids));
            }
        }
        let requirements = self.insert_batched(EntityKind::Requirement, rows).await?;

        let rows: Vec<NewEntity> = (1..=profile.acceptance_criteria)
            .map(|n| {
                let story = user_stories[(n - 1) % user_stories.len().max(1)];
                self.row(EntityKind::AcceptanceCriteria, n, Some(story), &user_ids)
            })
            .collect();
        let acceptance_criteria = self.insert_batched(EntityKind::AcceptanceCriteria, rows).await?;

        let mut rows = Vec::with_capacity(profile.comments);
        for n in 1..=profile.comments {
            if requirements.is_empty() {
                break;
            }
            let requirement = requirements[self.rng.gen_range(0..requirements.len())];
            rows.push(self.row(EntityKind::Comment, n, Some(requirement), &user_ids));
        }
        let comments = self.insert_batched(EntityKind::Comment, rows).await?;

        let relationships = self.seed_relationships(&requirements, profile.relationships, system_user).await?;

        let summary = SeedSummary {
            system_user,
            users: user_ids,
            epics,
            user_stories,
            requirements,
            acceptance_criteria,
            comments,
            relationships,
            elapsed: started.elapsed(),
        };
        info!(
            size = %size,
            users = summary.users.len(),
            epics = summary.epics.len(),
            user_stories = summary.user_stories.len(),
            requirements = summary.requirements.len(),
            acceptance_criteria = summary.acceptance_criteria.len(),
            comments = summary.comments.len(),
            relationships = summary.relationships,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "dataset seeded"
        );
        Ok(summary)
    }

    /// Links disjoint requirement pairs so no two links collide.
    async fn seed_relationships(&mut self, requirements: &[Uuid], count: usize, creator: Uuid) -> StoreResult<usize> {
        let pairs = requirements.chunks_exact(2).take(count);
        let mut created = 0;
        for pair in pairs {
            let relationship_type = RELATIONSHIP_TYPES
                .choose(&mut self.rng)
                .map_or("relates_to", |(name, _)| *name)
                .to_string();
            self.store
                .create_relationship(NewRelationship {
                    source_id: pair[0],
                    target_id: pair[1],
                    relationship_type,
                    created_by: Some(creator),
                })
                .await?;
            created += 1;
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use std::collections::HashSet;

    async fn generate(batch_size: usize) -> (Arc<dyn Store>, SeedSummary) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store.seed_defaults().await.unwrap();
        let summary = DataGenerator::new(Arc::clone(&store), 7)
            .with_batch_size(batch_size)
            .generate(DatasetSize::Small)
            .await
            .unwrap();
        (store, summary)
    }

    #[test]
    fn test_profiles() {
        let small = SizeProfile::for_size(DatasetSize::Small);
        assert_eq!(small.user_stories(), 100);
        assert_eq!(small.requirements(), 300);

        let large = SizeProfile::for_size(DatasetSize::Large);
        assert_eq!(large.user_stories(), 2000);
        assert_eq!(large.acceptance_criteria, 2000);
    }

    #[tokio::test]
    async fn test_small_dataset_counts() {
        let (store, summary) = generate(DEFAULT_BATCH_SIZE).await;
        let counts = store.counts().await.unwrap();

        assert_eq!(counts["users"], 11);
        assert_eq!(counts["epics"], 25);
        assert_eq!(counts["user_stories"], 100);
        assert_eq!(counts["requirements"], 300);
        assert_eq!(counts["acceptance_criteria"], 100);
        assert_eq!(counts["comments"], 50);
        assert_eq!(counts["requirement_relationships"], 25);
        assert_eq!(summary.ids(EntityKind::Comment).len(), 50);
    }

    #[tokio::test]
    async fn test_reference_ids_unique_across_batches() {
        let (store, summary) = generate(7).await;

        for kind in [EntityKind::Epic, EntityKind::UserStory, EntityKind::Requirement] {
            let mut seen = HashSet::new();
            for id in summary.ids(kind) {
                let entity = store.get(kind, *id).await.unwrap();
                assert!(seen.insert(entity.reference_id.unwrap()));
            }
            assert_eq!(seen.len(), summary.ids(kind).len());
        }

        let first = store.get(EntityKind::Epic, summary.epics[0]).await.unwrap();
        let last = store.get(EntityKind::Epic, summary.epics[24]).await.unwrap();
        assert_eq!(first.reference_id.as_deref(), Some("EP-001"));
        assert_eq!(last.reference_id.as_deref(), Some("EP-025"));
    }

    #[tokio::test]
    async fn test_children_reference_committed_parents() {
        let (store, summary) = generate(DEFAULT_BATCH_SIZE).await;
        let epics: HashSet<_> = summary.epics.iter().copied().collect();
        for id in summary.user_stories.iter().take(10) {
            let story = store.get(EntityKind::UserStory, *id).await.unwrap();
            assert!(epics.contains(&story.parent_id.unwrap()));
            assert_eq!(story.priority, "Medium");
            assert_eq!(story.status, "Backlog");
        }
    }
}
