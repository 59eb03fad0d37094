//! Request templates for every operation class.

use reqbench_core::{EntityKind, HarnessError, HarnessResult, OpClass, RequestRecord};
use reqbench_db::{NewEntity, SeedSummary, Store};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const SEARCH_TERMS: &[&str] = &[
    "checkout", "login", "billing", "report", "audit", "sync", "export", "latency",
];
const SUGGESTION_PREFIXES: &[&str] = &["Ch", "Lo", "Bi", "Re", "Au", "Se", "Ex", "In"];
const STATUSES: &[&str] = &["Backlog", "Draft", "In Progress", "Review", "Done"];
const PRIORITIES: &[&str] = &["Low", "Medium", "High", "Critical"];
const PAGE_SIZE: usize = 20;

/// Spreads consecutive slots across the id space.
const STRIDE: usize = 7919;

/// Seeded ids plus the store handle used for disposable rows.
///
/// Requests are a pure function of `(op, slot)` except for `DeleteEpic`,
/// which targets a childless epic. Those come from a reserve created ahead
/// of the measurement window, or from the store once the reserve runs dry.
pub struct WorkloadContext {
    store: Arc<dyn Store>,
    creator: Uuid,
    epics: Vec<Uuid>,
    user_stories: Vec<Uuid>,
    requirements: Vec<Uuid>,
    spare_epics: Mutex<Vec<Uuid>>,
    simplified: bool,
}

impl WorkloadContext {
    pub fn new(store: Arc<dyn Store>, seed: &SeedSummary) -> Self {
        Self {
            store,
            creator: seed.system_user,
            epics: seed.epics.clone(),
            user_stories: seed.user_stories.clone(),
            requirements: seed.requirements.clone(),
            spare_epics: Mutex::new(Vec::new()),
            simplified: false,
        }
    }

    /// Drops descriptions from generated payloads.
    #[must_use]
    pub fn simplified(mut self, simplified: bool) -> Self {
        self.simplified = simplified;
        self
    }

    fn pick(&self, kind: EntityKind, slot: usize) -> HarnessResult<Uuid> {
        let ids = match kind {
            EntityKind::Epic => &self.epics,
            EntityKind::UserStory => &self.user_stories,
            EntityKind::Requirement => &self.requirements,
            other => {
                return Err(HarnessError::config(format!("{other} ids are not tracked")));
            }
        };
        if ids.is_empty() {
            return Err(HarnessError::config(format!("dataset has no {kind} rows")));
        }
        Ok(ids[slot.wrapping_mul(STRIDE) % ids.len()])
    }

    /// Source and target for a relationship. Slots `2k` and `2k + 1` share
    /// a pair, so the second POST of each pair is a duplicate. The seeder
    /// links `(even, odd)` neighbours; this runs the other direction.
    fn relationship_pair(&self, slot: usize) -> HarnessResult<(Uuid, Uuid)> {
        let pairs = self.requirements.len() / 2;
        if pairs == 0 {
            return Err(HarnessError::config("relationships need at least two requirements"));
        }
        let k = (slot / 2) % pairs;
        Ok((self.requirements[2 * k + 1], self.requirements[2 * k]))
    }

    fn payload(&self, title: String, description: &str) -> Value {
        if self.simplified {
            json!({ "title": title })
        } else {
            json!({ "title": title, "description": description })
        }
    }

    fn with_parent(&self, title: String, description: &str, parent: Uuid) -> Value {
        let mut body = self.payload(title, description);
        body["parent_id"] = json!(parent);
        body
    }

    /// Creates `count` childless epics for later deletes.
    pub async fn reserve_disposable_epics(&self, count: usize) -> HarnessResult<()> {
        let mut created = Vec::with_capacity(count);
        for n in 0..count {
            let entity = self
                .store
                .create(
                    EntityKind::Epic,
                    NewEntity::titled(format!("Reserved epic {n}")).with_creator(self.creator),
                )
                .await?;
            created.push(entity.id);
        }
        // Popped from the back, so reverse to hand them out in creation order.
        created.reverse();
        self.spare_epics.lock().extend(created);
        debug!(count, "reserved disposable epics");
        Ok(())
    }

    pub fn spare_epics(&self) -> usize {
        self.spare_epics.lock().len()
    }

    async fn disposable_epic(&self, slot: usize) -> HarnessResult<Uuid> {
        if let Some(id) = self.spare_epics.lock().pop() {
            return Ok(id);
        }
        let entity = self
            .store
            .create(
                EntityKind::Epic,
                NewEntity::titled(format!("Disposable epic {slot}")).with_creator(self.creator),
            )
            .await?;
        Ok(entity.id)
    }

    /// Builds the request issued for `op` in slot `slot`.
    pub async fn build(&self, op: OpClass, slot: usize) -> HarnessResult<RequestRecord> {
        let offset = (slot % 5) * PAGE_SIZE;
        let record = match op {
            OpClass::CreateEpic => RequestRecord::post(
                "/api/v1/epics",
                self.payload(format!("Bench epic {slot}"), "Epic created by the workload driver"),
            ),
            OpClass::GetEpic => {
                RequestRecord::get(format!("/api/v1/epics/{}", self.pick(EntityKind::Epic, slot)?))
            }
            OpClass::ListEpics => {
                RequestRecord::get(format!("/api/v1/epics?limit={PAGE_SIZE}&offset={offset}"))
            }
            OpClass::UpdateEpic => RequestRecord::put(
                format!("/api/v1/epics/{}", self.pick(EntityKind::Epic, slot)?),
                json!({
                    "title": format!("Epic revision {slot}"),
                    "status": "In Progress",
                    "priority": PRIORITIES[slot % PRIORITIES.len()],
                }),
            ),
            OpClass::PatchEpic => RequestRecord::patch(
                format!("/api/v1/epics/{}", self.pick(EntityKind::Epic, slot)?),
                json!({ "priority": PRIORITIES[slot % PRIORITIES.len()] }),
            ),
            OpClass::DeleteEpic => {
                RequestRecord::delete(format!("/api/v1/epics/{}", self.disposable_epic(slot).await?))
            }
            OpClass::CreateUserStory => RequestRecord::post(
                "/api/v1/user-stories",
                self.with_parent(
                    format!("Bench story {slot}"),
                    "As a user I want the workload to exercise stories",
                    self.pick(EntityKind::Epic, slot)?,
                ),
            ),
            OpClass::GetUserStory => RequestRecord::get(format!(
                "/api/v1/user-stories/{}",
                self.pick(EntityKind::UserStory, slot)?
            )),
            OpClass::ListUserStories => RequestRecord::get(format!(
                "/api/v1/user-stories?parent_id={}&limit={PAGE_SIZE}",
                self.pick(EntityKind::Epic, slot)?
            )),
            OpClass::UpdateUserStory => RequestRecord::put(
                format!("/api/v1/user-stories/{}", self.pick(EntityKind::UserStory, slot)?),
                json!({ "title": format!("Story revision {slot}"), "status": "Review" }),
            ),
            OpClass::CreateRequirement => {
                let mut body = self.with_parent(
                    format!("Bench requirement {slot}"),
                    "The system shall sustain the benchmark workload",
                    self.pick(EntityKind::UserStory, slot)?,
                );
                body["requirement_type"] = json!("functional");
                RequestRecord::post("/api/v1/requirements", body)
            }
            OpClass::GetRequirement => RequestRecord::get(format!(
                "/api/v1/requirements/{}",
                self.pick(EntityKind::Requirement, slot)?
            )),
            OpClass::ListRequirements => RequestRecord::get(format!(
                "/api/v1/requirements?limit={PAGE_SIZE}&offset={offset}"
            )),
            OpClass::PatchRequirement => RequestRecord::patch(
                format!("/api/v1/requirements/{}", self.pick(EntityKind::Requirement, slot)?),
                json!({ "status": STATUSES[slot % STATUSES.len()] }),
            ),
            OpClass::CreateAcceptanceCriteria => RequestRecord::post(
                "/api/v1/acceptance-criteria",
                self.with_parent(
                    format!("Given slot {slot} when submitted then accepted"),
                    "Acceptance criterion created by the workload driver",
                    self.pick(EntityKind::UserStory, slot)?,
                ),
            ),
            OpClass::ListAcceptanceCriteria => RequestRecord::get(format!(
                "/api/v1/acceptance-criteria?parent_id={}&limit={PAGE_SIZE}",
                self.pick(EntityKind::UserStory, slot)?
            )),
            OpClass::CreateComment => RequestRecord::post(
                "/api/v1/comments",
                self.with_parent(
                    format!("Comment {slot}"),
                    "Looks good, one question about the edge cases",
                    self.pick(EntityKind::Requirement, slot)?,
                ),
            ),
            OpClass::ListComments => RequestRecord::get(format!(
                "/api/v1/comments?parent_id={}&limit={PAGE_SIZE}",
                self.pick(EntityKind::Requirement, slot)?
            )),
            OpClass::CreateRelationship => {
                let (source, target) = self.relationship_pair(slot)?;
                RequestRecord::post(
                    format!("/api/v1/requirements/{source}/relationships"),
                    json!({ "target_id": target, "relationship_type": "relates_to" }),
                )
            }
            OpClass::SearchKeyword => RequestRecord::get(format!(
                "/api/v1/search?query={}&limit={PAGE_SIZE}&offset=0",
                SEARCH_TERMS[slot % SEARCH_TERMS.len()]
            )),
            OpClass::SearchSuggestions => RequestRecord::get(format!(
                "/api/v1/search/suggestions?query={}&limit=10",
                SUGGESTION_PREFIXES[slot % SUGGESTION_PREFIXES.len()]
            )),
            OpClass::HealthCheck => RequestRecord::get("/health"),
        };

        debug_assert_eq!(record.method, op.method());
        Ok(record)
    }
}
