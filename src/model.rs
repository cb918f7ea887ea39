//! Value models returned by the façade. These are the shapes external
//! callers see; the Store's row shapes stay private to `crate::store`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A list's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListStatus {
    Active,
    Archived,
}

impl std::fmt::Display for ListStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for ListStatus {
    type Err = crate::error::TodoError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            other => Err(crate::error::TodoError::InvalidArgument(format!(
                "unknown list status '{other}'"
            ))),
        }
    }
}

/// The only list type this engine recognizes (spec.md restricts the
/// original's richer type enum to `sequential`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListType {
    Sequential,
}

impl std::fmt::Display for ListType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sequential")
    }
}

/// An item's completion state. Non-leaf items carry a *derived* status;
/// direct mutation of a non-leaf item's status is rejected by the
/// Hierarchy Engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = crate::error::TodoError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(crate::error::TodoError::InvalidArgument(format!(
                "unknown item status '{other}'"
            ))),
        }
    }
}

/// The kind of a cross-item dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    Blocks,
    Requires,
    /// Informational only: never enforced by selection or blocking (§4.4,
    /// Open Question #2).
    Related,
}

impl DependencyType {
    /// `true` for edge kinds the Dependency/Selection Engines enforce.
    pub fn is_enforced(self) -> bool {
        matches!(self, Self::Blocks | Self::Requires)
    }
}

impl std::fmt::Display for DependencyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Blocks => "blocks",
            Self::Requires => "requires",
            Self::Related => "related",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for DependencyType {
    type Err = crate::error::TodoError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blocks" => Ok(Self::Blocks),
            "requires" => Ok(Self::Requires),
            "related" => Ok(Self::Related),
            other => Err(crate::error::TodoError::InvalidArgument(format!(
                "unknown dependency type '{other}'"
            ))),
        }
    }
}

/// A `completion_states` value: the original tolerates both booleans and
/// strings in this map (spec.md Open Question #1). Preserved verbatim,
/// with no aggregation semantics beyond pass-through storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompletionStateValue {
    Bool(bool),
    Text(String),
}

pub type Metadata = HashMap<String, serde_json::Value>;
pub type CompletionStates = HashMap<String, CompletionStateValue>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoList {
    pub id: i64,
    pub list_key: String,
    pub title: String,
    pub description: Option<String>,
    pub list_type: ListType,
    pub status: ListStatus,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: i64,
    pub list_id: i64,
    pub item_key: String,
    pub content: String,
    pub position: i64,
    pub status: ItemStatus,
    pub parent_item_id: Option<i64>,
    pub completion_states: CompletionStates,
    pub metadata: Metadata,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemProperty {
    pub id: i64,
    pub item_id: i64,
    pub property_key: String,
    pub property_value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListProperty {
    pub id: i64,
    pub list_id: i64,
    pub property_key: String,
    pub property_value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTagAssignment {
    pub list_id: i64,
    pub tag_id: i64,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDependency {
    pub id: i64,
    pub dependent_item_id: i64,
    pub required_item_id: i64,
    pub dependency_type: DependencyType,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub item_id: Option<i64>,
    pub list_id: Option<i64>,
    pub action: String,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub user_context: String,
    pub timestamp: DateTime<Utc>,
}

/// Direct-children-only status aggregate (§4.1's
/// `get_children_status_summary`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChildrenStatusSummary {
    pub total: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
}

impl ChildrenStatusSummary {
    /// The four-way derivation rule from §4.2: any `failed` child wins;
    /// else all-`pending`; else all-`completed`; else `in_progress`.
    pub fn derive(&self) -> ItemStatus {
        if self.failed > 0 {
            ItemStatus::Failed
        } else if self.pending == self.total {
            ItemStatus::Pending
        } else if self.completed == self.total {
            ItemStatus::Completed
        } else {
            ItemStatus::InProgress
        }
    }
}

/// Whole-subtree aggregate (SPEC_FULL.md §3 supplement, grounded in the
/// original's `get_item_hierarchy`). Read-only; never used for status
/// derivation, which is strictly direct-children (§4.2).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HierarchyStats {
    pub total_subitems: i64,
    pub pending_subitems: i64,
    pub in_progress_subitems: i64,
    pub completed_subitems: i64,
    pub failed_subitems: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_failed_dominates() {
        let s = ChildrenStatusSummary {
            total: 3,
            pending: 1,
            in_progress: 0,
            completed: 1,
            failed: 1,
        };
        assert_eq!(s.derive(), ItemStatus::Failed);
    }

    #[test]
    fn derive_all_pending() {
        let s = ChildrenStatusSummary {
            total: 2,
            pending: 2,
            ..Default::default()
        };
        assert_eq!(s.derive(), ItemStatus::Pending);
    }

    #[test]
    fn derive_all_completed() {
        let s = ChildrenStatusSummary {
            total: 2,
            completed: 2,
            ..Default::default()
        };
        assert_eq!(s.derive(), ItemStatus::Completed);
    }

    #[test]
    fn derive_mixed_is_in_progress() {
        let s = ChildrenStatusSummary {
            total: 2,
            pending: 1,
            completed: 1,
            ..Default::default()
        };
        assert_eq!(s.derive(), ItemStatus::InProgress);
    }

    #[test]
    fn completion_state_value_roundtrips_bool_and_text() {
        let v = CompletionStateValue::Bool(true);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "true");
        let back: CompletionStateValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);

        let v = CompletionStateValue::Text("partial".into());
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"partial\"");
    }

    #[test]
    fn dependency_type_enforcement() {
        assert!(DependencyType::Blocks.is_enforced());
        assert!(DependencyType::Requires.is_enforced());
        assert!(!DependencyType::Related.is_enforced());
    }
}
