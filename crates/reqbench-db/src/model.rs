//! Row types shared by the store backends and the application router.

use chrono::{DateTime, Utc};
use reqbench_core::EntityKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_STATUS: &str = "Backlog";
pub const DEFAULT_PRIORITY: &str = "Medium";
pub const DEFAULT_REQUIREMENT_TYPE: &str = "functional";
pub const SYSTEM_USERNAME: &str = "system";

pub const REQUIREMENT_TYPES: &[(&str, &str)] = &[
    ("functional", "Behaviour the system must provide"),
    ("non_functional", "Quality attribute or constraint"),
    ("business", "Business rule or policy"),
    ("technical", "Implementation or platform constraint"),
];

pub const RELATIONSHIP_TYPES: &[(&str, &str)] = &[
    ("depends_on", "Source cannot be delivered before target"),
    ("blocks", "Source prevents progress on target"),
    ("relates_to", "Loose association"),
    ("conflicts_with", "Source and target cannot both hold"),
    ("derives_from", "Source refines target"),
];

pub const STATUSES: &[&str] = &["Backlog", "Draft", "In Progress", "Review", "Done"];
pub const PRIORITIES: &[&str] = &["Low", "Medium", "High", "Critical"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub role: String,
}

impl User {
    pub fn new(username: impl Into<String>, role: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            id: Uuid::new_v4(),
            email: format!("{username}@reqbench.local"),
            full_name: username.clone(),
            username,
            role: role.into(),
        }
    }
}

/// One row of any of the five entity tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub kind: EntityKind,
    /// Absent only for comments.
    pub reference_id: Option<String>,
    pub parent_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: String,
    pub creator_id: Uuid,
    pub assignee_id: Option<Uuid>,
    /// Set only for requirements.
    pub requirement_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntity {
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    /// Filled in from the caller's identity when absent.
    #[serde(default)]
    pub creator_id: Option<Uuid>,
    #[serde(default)]
    pub assignee_id: Option<Uuid>,
    #[serde(default)]
    pub requirement_type: Option<String>,
    /// Assigned by the store when absent.
    #[serde(default, skip_serializing)]
    pub reference_id: Option<String>,
}

impl NewEntity {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            parent_id: None,
            title: title.into(),
            description: None,
            status: None,
            priority: None,
            creator_id: None,
            assignee_id: None,
            requirement_type: None,
            reference_id: None,
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent: Uuid) -> Self {
        self.parent_id = Some(parent);
        self
    }

    #[must_use]
    pub fn with_creator(mut self, creator: Uuid) -> Self {
        self.creator_id = Some(creator);
        self
    }

    /// Checks the fields that do not need a store lookup.
    pub fn validate(&self, kind: EntityKind) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title must not be empty".to_string());
        }
        match (kind.parent(), self.parent_id) {
            (Some(parent), None) => Err(format!("{kind} requires a parent {parent}")),
            (None, Some(_)) => Err(format!("{kind} does not take a parent")),
            _ => Ok(()),
        }?;
        if let Some(status) = &self.status {
            if !STATUSES.contains(&status.as_str()) {
                return Err(format!("unknown status `{status}`"));
            }
        }
        if let Some(priority) = &self.priority {
            if !PRIORITIES.contains(&priority.as_str()) {
                return Err(format!("unknown priority `{priority}`"));
            }
        }
        if self.requirement_type.is_some() && kind != EntityKind::Requirement {
            return Err(format!("{kind} does not take a requirement type"));
        }
        Ok(())
    }
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub assignee_id: Option<Uuid>,
}

impl EntityPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.assignee_id.is_none()
    }

    pub fn validate(&self) -> Result<(), String> {
        if matches!(&self.title, Some(t) if t.trim().is_empty()) {
            return Err("title must not be empty".to_string());
        }
        if let Some(status) = &self.status {
            if !STATUSES.contains(&status.as_str()) {
                return Err(format!("unknown status `{status}`"));
            }
        }
        if let Some(priority) = &self.priority {
            if !PRIORITIES.contains(&priority.as_str()) {
                return Err(format!("unknown priority `{priority}`"));
            }
        }
        Ok(())
    }

    pub(crate) fn apply(&self, entity: &mut Entity, now: DateTime<Utc>) {
        if let Some(title) = &self.title {
            entity.title = title.clone();
        }
        if let Some(description) = &self.description {
            entity.description = Some(description.clone());
        }
        if let Some(status) = &self.status {
            entity.status = status.clone();
        }
        if let Some(priority) = &self.priority {
            entity.priority = priority.clone();
        }
        if let Some(assignee) = self.assignee_id {
            entity.assignee_id = Some(assignee);
        }
        entity.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRelationship {
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub relationship_type: String,
    #[serde(default)]
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: Uuid,
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub relationship_type: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListQuery {
    pub limit: u32,
    pub offset: u32,
    pub parent_id: Option<Uuid>,
}

impl ListQuery {
    pub const MAX_LIMIT: u32 = 200;
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
            parent_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub kind: EntityKind,
    pub id: Uuid,
    pub reference_id: Option<String>,
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entity_parent_rules() {
        assert!(NewEntity::titled("Checkout").validate(EntityKind::Epic).is_ok());
        assert!(NewEntity::titled("Story").validate(EntityKind::UserStory).is_err());
        assert!(NewEntity::titled("Epic")
            .with_parent(Uuid::new_v4())
            .validate(EntityKind::Epic)
            .is_err());
        assert!(NewEntity::titled("  ").validate(EntityKind::Epic).is_err());
    }

    #[test]
    fn test_patch_applies_only_set_fields() {
        let now = Utc::now();
        let mut entity = Entity {
            id: Uuid::new_v4(),
            kind: EntityKind::Epic,
            reference_id: Some("EP-001".into()),
            parent_id: None,
            title: "Old".into(),
            description: Some("kept".into()),
            status: DEFAULT_STATUS.into(),
            priority: DEFAULT_PRIORITY.into(),
            creator_id: Uuid::new_v4(),
            assignee_id: None,
            requirement_type: None,
            created_at: now,
            updated_at: now,
        };
        let patch = EntityPatch {
            title: Some("New".into()),
            status: Some("Done".into()),
            ..EntityPatch::default()
        };
        assert!(patch.validate().is_ok());
        patch.apply(&mut entity, now);

        assert_eq!(entity.title, "New");
        assert_eq!(entity.status, "Done");
        assert_eq!(entity.description.as_deref(), Some("kept"));
        assert_eq!(entity.priority, DEFAULT_PRIORITY);
    }

    #[test]
    fn test_patch_rejects_unknown_status() {
        let patch = EntityPatch {
            status: Some("Shipped".into()),
            ..EntityPatch::default()
        };
        assert!(patch.validate().is_err());
        assert!(EntityPatch::default().is_empty());
    }
}
