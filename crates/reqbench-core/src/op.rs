//! Entity kinds and the logical operation classes the driver issues.

use crate::error::HarnessError;
use crate::method::Method;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Core entities of the requirements service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Epic,
    UserStory,
    Requirement,
    AcceptanceCriteria,
    Comment,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        Self::Epic,
        Self::UserStory,
        Self::Requirement,
        Self::AcceptanceCriteria,
        Self::Comment,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Epic => "epic",
            Self::UserStory => "user_story",
            Self::Requirement => "requirement",
            Self::AcceptanceCriteria => "acceptance_criteria",
            Self::Comment => "comment",
        }
    }

    /// URL segment under `/api/v1`.
    #[must_use]
    pub fn path_segment(&self) -> &'static str {
        match self {
            Self::Epic => "epics",
            Self::UserStory => "user-stories",
            Self::Requirement => "requirements",
            Self::AcceptanceCriteria => "acceptance-criteria",
            Self::Comment => "comments",
        }
    }

    /// Relational table backing the entity.
    #[must_use]
    pub fn table(&self) -> &'static str {
        match self {
            Self::Epic => "epics",
            Self::UserStory => "user_stories",
            Self::Requirement => "requirements",
            Self::AcceptanceCriteria => "acceptance_criteria",
            Self::Comment => "comments",
        }
    }

    /// Prefix of generated reference IDs; comments carry none.
    #[must_use]
    pub fn reference_prefix(&self) -> Option<&'static str> {
        match self {
            Self::Epic => Some("EP"),
            Self::UserStory => Some("US"),
            Self::Requirement => Some("REQ"),
            Self::AcceptanceCriteria => Some("AC"),
            Self::Comment => None,
        }
    }

    #[must_use]
    pub fn parent(&self) -> Option<EntityKind> {
        match self {
            Self::Epic => None,
            Self::UserStory => Some(Self::Epic),
            Self::Requirement | Self::AcceptanceCriteria => Some(Self::UserStory),
            Self::Comment => Some(Self::Requirement),
        }
    }

    /// Kinds whose rows block deletion of this kind unless forced.
    #[must_use]
    pub fn children(&self) -> &'static [EntityKind] {
        match self {
            Self::Epic => &[Self::UserStory],
            Self::UserStory => &[Self::Requirement, Self::AcceptanceCriteria],
            Self::Requirement => &[Self::Comment],
            Self::AcceptanceCriteria | Self::Comment => &[],
        }
    }

    #[must_use]
    pub fn from_path_segment(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.path_segment() == segment)
    }

    /// Formats the `n`th reference ID, e.g. `EP-001`.
    #[must_use]
    pub fn reference_id(&self, n: u64) -> Option<String> {
        self.reference_prefix().map(|p| format!("{p}-{n:03}"))
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical label for a request template; partitions metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OpClass {
    CreateEpic,
    GetEpic,
    ListEpics,
    UpdateEpic,
    PatchEpic,
    DeleteEpic,
    CreateUserStory,
    GetUserStory,
    ListUserStories,
    UpdateUserStory,
    CreateRequirement,
    GetRequirement,
    ListRequirements,
    PatchRequirement,
    CreateAcceptanceCriteria,
    ListAcceptanceCriteria,
    CreateComment,
    ListComments,
    CreateRelationship,
    SearchKeyword,
    SearchSuggestions,
    HealthCheck,
}

const CREATED: &[u16] = &[201];
const OK: &[u16] = &[200];
const NO_CONTENT: &[u16] = &[204];
const CREATED_OR_DUPLICATE: &[u16] = &[201, 409];

impl OpClass {
    pub const ALL: [OpClass; 22] = [
        Self::CreateEpic,
        Self::GetEpic,
        Self::ListEpics,
        Self::UpdateEpic,
        Self::PatchEpic,
        Self::DeleteEpic,
        Self::CreateUserStory,
        Self::GetUserStory,
        Self::ListUserStories,
        Self::UpdateUserStory,
        Self::CreateRequirement,
        Self::GetRequirement,
        Self::ListRequirements,
        Self::PatchRequirement,
        Self::CreateAcceptanceCriteria,
        Self::ListAcceptanceCriteria,
        Self::CreateComment,
        Self::ListComments,
        Self::CreateRelationship,
        Self::SearchKeyword,
        Self::SearchSuggestions,
        Self::HealthCheck,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateEpic => "CreateEpic",
            Self::GetEpic => "GetEpic",
            Self::ListEpics => "ListEpics",
            Self::UpdateEpic => "UpdateEpic",
            Self::PatchEpic => "PatchEpic",
            Self::DeleteEpic => "DeleteEpic",
            Self::CreateUserStory => "CreateUserStory",
            Self::GetUserStory => "GetUserStory",
            Self::ListUserStories => "ListUserStories",
            Self::UpdateUserStory => "UpdateUserStory",
            Self::CreateRequirement => "CreateRequirement",
            Self::GetRequirement => "GetRequirement",
            Self::ListRequirements => "ListRequirements",
            Self::PatchRequirement => "PatchRequirement",
            Self::CreateAcceptanceCriteria => "CreateAcceptanceCriteria",
            Self::ListAcceptanceCriteria => "ListAcceptanceCriteria",
            Self::CreateComment => "CreateComment",
            Self::ListComments => "ListComments",
            Self::CreateRelationship => "CreateRelationship",
            Self::SearchKeyword => "SearchKeyword",
            Self::SearchSuggestions => "SearchSuggestions",
            Self::HealthCheck => "HealthCheck",
        }
    }

    #[must_use]
    pub fn method(&self) -> Method {
        match self {
            Self::CreateEpic
            | Self::CreateUserStory
            | Self::CreateRequirement
            | Self::CreateAcceptanceCriteria
            | Self::CreateComment
            | Self::CreateRelationship => Method::Post,
            Self::UpdateEpic | Self::UpdateUserStory => Method::Put,
            Self::PatchEpic | Self::PatchRequirement => Method::Patch,
            Self::DeleteEpic => Method::Delete,
            _ => Method::Get,
        }
    }

    /// Entity the operation targets, if any.
    #[must_use]
    pub fn entity(&self) -> Option<EntityKind> {
        match self {
            Self::CreateEpic
            | Self::GetEpic
            | Self::ListEpics
            | Self::UpdateEpic
            | Self::PatchEpic
            | Self::DeleteEpic => Some(EntityKind::Epic),
            Self::CreateUserStory
            | Self::GetUserStory
            | Self::ListUserStories
            | Self::UpdateUserStory => Some(EntityKind::UserStory),
            Self::CreateRequirement
            | Self::GetRequirement
            | Self::ListRequirements
            | Self::PatchRequirement
            | Self::CreateRelationship => Some(EntityKind::Requirement),
            Self::CreateAcceptanceCriteria | Self::ListAcceptanceCriteria => {
                Some(EntityKind::AcceptanceCriteria)
            }
            Self::CreateComment | Self::ListComments => Some(EntityKind::Comment),
            Self::SearchKeyword | Self::SearchSuggestions | Self::HealthCheck => None,
        }
    }

    /// Route template with `{id}` placeholders, used to group samples.
    #[must_use]
    pub fn path_template(&self) -> &'static str {
        match self {
            Self::CreateEpic | Self::ListEpics => "/api/v1/epics",
            Self::GetEpic | Self::UpdateEpic | Self::PatchEpic | Self::DeleteEpic => {
                "/api/v1/epics/{id}"
            }
            Self::CreateUserStory | Self::ListUserStories => "/api/v1/user-stories",
            Self::GetUserStory | Self::UpdateUserStory => "/api/v1/user-stories/{id}",
            Self::CreateRequirement | Self::ListRequirements => "/api/v1/requirements",
            Self::GetRequirement | Self::PatchRequirement => "/api/v1/requirements/{id}",
            Self::CreateAcceptanceCriteria | Self::ListAcceptanceCriteria => {
                "/api/v1/acceptance-criteria"
            }
            Self::CreateComment | Self::ListComments => "/api/v1/comments",
            Self::CreateRelationship => "/api/v1/requirements/{id}/relationships",
            Self::SearchKeyword => "/api/v1/search",
            Self::SearchSuggestions => "/api/v1/search/suggestions",
            Self::HealthCheck => "/health",
        }
    }

    #[must_use]
    pub fn is_read(&self) -> bool {
        self.method() == Method::Get
    }

    /// Non-essential classes are shed first under resource pressure.
    #[must_use]
    pub fn is_essential(&self) -> bool {
        !matches!(
            self,
            Self::SearchKeyword | Self::SearchSuggestions | Self::HealthCheck
        )
    }

    /// Statuses that count as success for this class.
    #[must_use]
    pub fn accepted_statuses(&self) -> &'static [u16] {
        match self {
            Self::CreateRelationship => CREATED_OR_DUPLICATE,
            Self::CreateEpic
            | Self::CreateUserStory
            | Self::CreateRequirement
            | Self::CreateAcceptanceCriteria
            | Self::CreateComment => CREATED,
            Self::DeleteEpic => NO_CONTENT,
            _ => OK,
        }
    }

    #[must_use]
    pub fn accepts(&self, status: u16) -> bool {
        self.accepted_statuses().contains(&status)
    }

    /// Whether an accepted response carries a JSON body.
    #[must_use]
    pub fn expects_json_body(&self) -> bool {
        !matches!(self, Self::DeleteEpic | Self::HealthCheck)
    }
}

impl fmt::Display for OpClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpClass {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| HarnessError::config(format!("unknown operation class `{s}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_reference_ids() {
        assert_eq!(EntityKind::Epic.reference_id(1).as_deref(), Some("EP-001"));
        assert_eq!(
            EntityKind::AcceptanceCriteria.reference_id(1234).as_deref(),
            Some("AC-1234")
        );
        assert_eq!(EntityKind::Comment.reference_id(7), None);
    }

    #[test]
    fn test_parent_child_symmetry() {
        for kind in EntityKind::ALL {
            for child in kind.children() {
                assert_eq!(child.parent(), Some(kind));
            }
        }
    }

    #[test]
    fn test_accepted_statuses() {
        assert!(OpClass::CreateEpic.accepts(201));
        assert!(!OpClass::CreateEpic.accepts(200));
        assert!(OpClass::DeleteEpic.accepts(204));
        assert!(OpClass::CreateRelationship.accepts(201));
        assert!(OpClass::CreateRelationship.accepts(409));
        assert!(!OpClass::ListEpics.accepts(409));
    }

    #[test]
    fn test_labels_round_trip_and_are_unique() {
        let labels: HashSet<_> = OpClass::ALL.iter().map(|op| op.as_str()).collect();
        assert_eq!(labels.len(), OpClass::ALL.len());
        for op in OpClass::ALL {
            assert_eq!(op.as_str().parse::<OpClass>().unwrap(), op);
        }
        assert!("DropTables".parse::<OpClass>().is_err());
    }

    #[test]
    fn test_read_and_essential_classes() {
        assert!(OpClass::ListEpics.is_read());
        assert!(!OpClass::PatchRequirement.is_read());
        assert!(!OpClass::SearchKeyword.is_essential());
        assert!(OpClass::CreateComment.is_essential());
    }
}
