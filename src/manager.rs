//! The single public façade (§4.7): composes the Store, Hierarchy Engine,
//! Dependency Engine, Selection Engine, property/tag validation, and
//! Access Scope into the one entry point callers use.
//!
//! Every mutating method follows the original's eight-step order: validate
//! input (shape, lengths, character classes) → Access Scope check → load
//! via Store → apply business rule → persist → run status sync → emit
//! exactly one `HistoryEntry` → return a value model.
//!
//! Addressing items by key supports at most one level of nesting
//! (`parent_key`); deeper subitems are reached by walking
//! [`TodoManager::list_items`] and addressing by the `TodoItem.id` a
//! caller already holds. This mirrors how the CLI in `main.rs` navigates —
//! one `--parent` flag, not a path of keys.

use std::collections::{BTreeMap, HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::Transaction;
use serde::{Deserialize, Serialize};

use crate::config::{AccessScope, Config};
use crate::dependency;
use crate::error::{Result, TodoError};
use crate::hierarchy;
use crate::model::{
    ChildrenStatusSummary, CompletionStates, DependencyType, HierarchyStats, HistoryEntry,
    ItemDependency, ItemProperty, ItemStatus, ListProperty, ListStatus, Metadata, Tag, TodoItem,
    TodoList,
};
use crate::properties;
use crate::selection;
use crate::store::history;
use crate::store::items;
use crate::store::lists;
use crate::store::properties as store_properties;
use crate::store::tags as store_tags;
use crate::store::Store;

static LIST_KEY_LETTER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-zA-Z]").unwrap());
static KEY_CHARSET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_\-.]+$").unwrap());

const MAX_KEY_LEN: usize = 100;
const MAX_TITLE_LEN: usize = 500;
const MAX_CONTENT_LEN: usize = 10_000;

/// Whole-list status counts (SPEC_FULL.md "stats progress"), distinct from
/// [`HierarchyStats`] which is scoped to one item's subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressStats {
    pub total: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
}

/// A self-contained dump of one list used by `io export`/`io import`
/// (SPEC_FULL.md ambient CLI surface). Round-trips through JSON or YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListExport {
    pub list_key: String,
    pub title: String,
    pub description: Option<String>,
    pub metadata: Metadata,
    pub tags: Vec<String>,
    pub items: Vec<ItemExport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemExport {
    pub item_key: String,
    pub content: String,
    pub parent_item_key: Option<String>,
    pub status: ItemStatus,
    pub completion_states: CompletionStates,
    pub metadata: Metadata,
    pub properties: BTreeMap<String, String>,
}

pub struct TodoManager {
    store: Store,
    access_scope: AccessScope,
}

impl TodoManager {
    pub fn new(config: &Config) -> Result<Self> {
        let store = Store::open(std::path::Path::new(&config.db_path))?;
        Ok(Self {
            store,
            access_scope: config.access_scope.clone(),
        })
    }

    /// In-memory instance for tests and short-lived CLI invocations like
    /// `schema`.
    pub fn open_in_memory(access_scope: AccessScope) -> Result<Self> {
        Ok(Self {
            store: Store::open_in_memory()?,
            access_scope,
        })
    }

    fn user_context(&self) -> String {
        std::env::var("USER").unwrap_or_else(|_| "todoit".to_string())
    }

    fn validate_key(key: &str, label: &str) -> Result<()> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(TodoError::InvalidArgument(format!(
                "{label} must be 1-{MAX_KEY_LEN} characters"
            )));
        }
        if !KEY_CHARSET_RE.is_match(key) {
            return Err(TodoError::InvalidArgument(format!(
                "{label} '{key}' contains disallowed characters"
            )));
        }
        Ok(())
    }

    /// List keys additionally require at least one letter, distinguishing
    /// them from bare numeric IDs (spec.md §3 Invariants; ported from
    /// `manager_lists.py::create_list`'s `re.search(r"[a-zA-Z]", list_key)`).
    fn validate_list_key(list_key: &str) -> Result<()> {
        Self::validate_key(list_key, "list key")?;
        if !LIST_KEY_LETTER_RE.is_match(list_key) {
            return Err(TodoError::InvalidArgument(format!(
                "list key '{list_key}' must contain at least one letter (a-z) to distinguish from numeric IDs"
            )));
        }
        Ok(())
    }

    fn validate_title(title: &str) -> Result<()> {
        if title.trim().is_empty() || title.len() > MAX_TITLE_LEN {
            return Err(TodoError::InvalidArgument(format!(
                "title must be 1-{MAX_TITLE_LEN} characters"
            )));
        }
        Ok(())
    }

    fn validate_content(content: &str) -> Result<()> {
        if content.trim().is_empty() || content.len() > MAX_CONTENT_LEN {
            return Err(TodoError::InvalidArgument(format!(
                "content must be 1-{MAX_CONTENT_LEN} characters"
            )));
        }
        Ok(())
    }

    /// Resolves a list by key subject to the Access Scope. In `Forced`
    /// mode a list outside the scope is reported as `ListNotFound` rather
    /// than `AccessDenied` — by-key addressing never reveals that an
    /// out-of-scope list exists (SPEC_FULL.md §4.6, Open Question #3).
    fn resolve_list(&self, list_key: &str) -> Result<TodoList> {
        let list = self
            .store
            .get_list_by_key(list_key)?
            .ok_or_else(|| TodoError::ListNotFound(list_key.to_string()))?;
        self.check_forced_scope(&list)?;
        Ok(list)
    }

    fn check_forced_scope(&self, list: &TodoList) -> Result<()> {
        if let Some(forced) = self.access_scope.forced_tags() {
            let tags: HashSet<String> = self
                .store
                .tags_for_list(list.id)?
                .into_iter()
                .map(|t| t.name)
                .collect();
            if !forced.iter().all(|t| tags.contains(t)) {
                return Err(TodoError::ListNotFound(list.list_key.clone()));
            }
        }
        Ok(())
    }

    fn resolve_item(
        &self,
        list_key: &str,
        item_key: &str,
        parent_key: Option<&str>,
    ) -> Result<(TodoList, TodoItem)> {
        let list = self.resolve_list(list_key)?;
        let parent_id = match parent_key {
            Some(pk) => {
                let parent = self
                    .store
                    .get_item_by_key(list.id, pk)?
                    .ok_or_else(|| TodoError::ItemNotFound {
                        list: list_key.to_string(),
                        item: pk.to_string(),
                    })?;
                Some(parent.id)
            }
            None => None,
        };
        let item = self
            .store
            .get_item_by_key_and_parent(list.id, item_key, parent_id)?
            .ok_or_else(|| TodoError::ItemNotFound {
                list: list_key.to_string(),
                item: item_key.to_string(),
            })?;
        Ok((list, item))
    }

    /// Records one `HistoryEntry` against the same `tx` a façade method is
    /// using for its mutation, so the audit row commits or rolls back with
    /// the write it describes (spec.md §4.7/§5, §8 invariant 5).
    fn record_history(
        &self,
        tx: &Transaction,
        item_id: Option<i64>,
        list_id: Option<i64>,
        action: &str,
        old_value: Option<serde_json::Value>,
        new_value: Option<serde_json::Value>,
    ) -> Result<HistoryEntry> {
        history::create_history_entry(
            tx,
            item_id,
            list_id,
            action,
            old_value.as_ref(),
            new_value.as_ref(),
            &self.user_context(),
        )
    }

    // ---- Lists ---------------------------------------------------------

    pub fn create_list(
        &self,
        list_key: &str,
        title: &str,
        description: Option<&str>,
        metadata: &Metadata,
    ) -> Result<TodoList> {
        Self::validate_list_key(list_key)?;
        Self::validate_title(title)?;
        let auto_tags = self.access_scope.auto_tags();
        self.store.with_transaction(|tx| {
            let list = lists::create_list(
                tx,
                list_key,
                title,
                description,
                crate::model::ListType::Sequential,
                metadata,
            )?;
            for tag_name in &auto_tags {
                let tag = properties::get_or_create_tag(tx, tag_name)?;
                store_tags::assign_tag(tx, list.id, tag.id)?;
            }
            self.record_history(
                tx,
                None,
                Some(list.id),
                "list_created",
                None,
                Some(serde_json::json!({"list_key": list.list_key, "title": list.title})),
            )?;
            Ok(list)
        })
    }

    pub fn get_list(&self, list_key: &str) -> Result<TodoList> {
        self.resolve_list(list_key)
    }

    /// All visible lists in natural order. `Forced` scope restricts to
    /// lists carrying every forced tag; `Filtered` scope widens to lists
    /// carrying any filter tag (read-only breadth, §4.6).
    pub fn list_lists(&self, limit: Option<i64>) -> Result<Vec<TodoList>> {
        let mut lists = match &self.access_scope {
            AccessScope::Unrestricted => self.store.list_all(None)?,
            AccessScope::Forced(tags) => {
                let names: Vec<String> = tags.iter().cloned().collect();
                self.store.get_lists_by_tags_all(&names)?
            }
            AccessScope::Filtered(tags) => {
                let names: Vec<String> = tags.iter().cloned().collect();
                self.store.get_lists_by_tags_any(&names)?
            }
        };
        if let Some(limit) = limit {
            lists.truncate(limit.max(0) as usize);
        }
        Ok(lists)
    }

    pub fn update_list(
        &self,
        list_key: &str,
        title: Option<&str>,
        description: Option<Option<&str>>,
        status: Option<ListStatus>,
        metadata: Option<&Metadata>,
    ) -> Result<TodoList> {
        let before = self.resolve_list(list_key)?;
        if let Some(title) = title {
            Self::validate_title(title)?;
        }
        self.store.with_transaction(|tx| {
            let updated = lists::update_list(tx, before.id, title, description, status, metadata)?
                .ok_or_else(|| TodoError::ListNotFound(list_key.to_string()))?;
            self.record_history(
                tx,
                None,
                Some(before.id),
                "list_updated",
                Some(serde_json::json!({"title": before.title, "status": before.status.to_string()})),
                Some(serde_json::json!({"title": updated.title, "status": updated.status.to_string()})),
            )?;
            Ok(updated)
        })
    }

    /// Convenience over [`TodoManager::update_list`] for the CLI's `list
    /// archive` subcommand (§6).
    pub fn archive_list(&self, list_key: &str) -> Result<TodoList> {
        self.update_list(list_key, None, None, Some(ListStatus::Archived), None)
    }

    /// Convenience over [`TodoManager::update_list`] for the CLI's `list
    /// unarchive` subcommand (§6).
    pub fn unarchive_list(&self, list_key: &str) -> Result<TodoList> {
        self.update_list(list_key, None, None, Some(ListStatus::Active), None)
    }

    pub fn delete_list(&self, list_key: &str) -> Result<()> {
        let list = self.resolve_list(list_key)?;
        self.store.with_transaction(|tx| {
            lists::delete_list(tx, list.id)?;
            self.record_history(
                tx,
                None,
                None,
                "list_deleted",
                Some(serde_json::json!({"list_key": list.list_key})),
                None,
            )?;
            Ok(())
        })
    }

    // ---- Items ----------------------------------------------------------

    pub fn add_item(
        &self,
        list_key: &str,
        item_key: &str,
        content: &str,
        parent_key: Option<&str>,
        metadata: &Metadata,
    ) -> Result<TodoItem> {
        Self::validate_key(item_key, "item key")?;
        Self::validate_content(content)?;
        let list = self.resolve_list(list_key)?;
        let parent_id = match parent_key {
            Some(pk) => Some(
                self.store
                    .get_item_by_key(list.id, pk)?
                    .ok_or_else(|| TodoError::ItemNotFound {
                        list: list_key.to_string(),
                        item: pk.to_string(),
                    })?
                    .id,
            ),
            None => None,
        };
        self.store.with_transaction(|tx| {
            let item = hierarchy::create_item_checked(tx, list.id, item_key, content, parent_id, metadata)?;
            self.record_history(
                tx,
                Some(item.id),
                Some(list.id),
                "item_created",
                None,
                Some(serde_json::json!({"item_key": item.item_key, "content": item.content})),
            )?;
            Ok(item)
        })
    }

    pub fn get_item(&self, list_key: &str, item_key: &str, parent_key: Option<&str>) -> Result<TodoItem> {
        Ok(self.resolve_item(list_key, item_key, parent_key)?.1)
    }

    pub fn list_items(
        &self,
        list_key: &str,
        status: Option<ItemStatus>,
        limit: Option<i64>,
    ) -> Result<Vec<TodoItem>> {
        let list = self.resolve_list(list_key)?;
        self.store.get_list_items(list.id, status, limit)
    }

    pub fn set_item_status(
        &self,
        list_key: &str,
        item_key: &str,
        parent_key: Option<&str>,
        new_status: ItemStatus,
        completion_states: Option<&CompletionStates>,
    ) -> Result<TodoItem> {
        let (list, item) = self.resolve_item(list_key, item_key, parent_key)?;
        let before_status = item.status;
        self.store.with_transaction(|tx| {
            let updated = hierarchy::update_item_status(tx, item.id, new_status, completion_states)?;
            self.record_history(
                tx,
                Some(item.id),
                Some(list.id),
                "item_status_changed",
                Some(serde_json::json!(before_status.to_string())),
                Some(serde_json::json!(updated.status.to_string())),
            )?;
            Ok(updated)
        })
    }

    pub fn move_item(
        &self,
        list_key: &str,
        item_key: &str,
        parent_key: Option<&str>,
        new_parent_key: Option<&str>,
    ) -> Result<TodoItem> {
        let (list, item) = self.resolve_item(list_key, item_key, parent_key)?;
        let new_parent_id = match new_parent_key {
            Some(pk) => Some(
                self.store
                    .get_item_by_key(list.id, pk)?
                    .ok_or_else(|| TodoError::ItemNotFound {
                        list: list_key.to_string(),
                        item: pk.to_string(),
                    })?
                    .id,
            ),
            None => None,
        };
        self.store.with_transaction(|tx| {
            let updated = hierarchy::move_to_subitem(tx, item.id, new_parent_id)?;
            self.record_history(
                tx,
                Some(item.id),
                Some(list.id),
                "item_moved",
                Some(serde_json::json!({"parent_item_id": item.parent_item_id})),
                Some(serde_json::json!({"parent_item_id": updated.parent_item_id})),
            )?;
            Ok(updated)
        })
    }

    pub fn delete_item(&self, list_key: &str, item_key: &str, parent_key: Option<&str>) -> Result<()> {
        let (list, item) = self.resolve_item(list_key, item_key, parent_key)?;
        self.store.with_transaction(|tx| {
            hierarchy::delete_item_checked(tx, item.id)?;
            self.record_history(
                tx,
                None,
                Some(list.id),
                "item_deleted",
                Some(serde_json::json!({"item_key": item.item_key})),
                None,
            )?;
            Ok(())
        })
    }

    /// Edits an item's content and/or metadata in place (`item edit`, §6).
    /// Does not touch status or position — use
    /// [`TodoManager::set_item_status`] / [`TodoManager::move_item`] for
    /// those.
    pub fn edit_item(
        &self,
        list_key: &str,
        item_key: &str,
        parent_key: Option<&str>,
        content: Option<&str>,
        metadata: Option<&Metadata>,
    ) -> Result<TodoItem> {
        let (list, item) = self.resolve_item(list_key, item_key, parent_key)?;
        if let Some(content) = content {
            Self::validate_content(content)?;
        }
        self.store.with_transaction(|tx| {
            let updated = items::update_item(tx, item.id, content, None, None, metadata, None, None)?
                .ok_or_else(|| TodoError::ItemNotFound {
                    list: list_key.to_string(),
                    item: item_key.to_string(),
                })?;
            self.record_history(
                tx,
                Some(item.id),
                Some(list.id),
                "item_edited",
                Some(serde_json::json!({"content": item.content})),
                Some(serde_json::json!({"content": updated.content})),
            )?;
            Ok(updated)
        })
    }

    /// Direct children of `item_key` in natural order (`item subtasks`, §6).
    pub fn item_children(
        &self,
        list_key: &str,
        item_key: &str,
        parent_key: Option<&str>,
    ) -> Result<Vec<TodoItem>> {
        let (_, item) = self.resolve_item(list_key, item_key, parent_key)?;
        self.store.get_item_children(item.id)
    }

    /// The root→item path followed by the item's direct children — enough
    /// to render one level of `item tree` (§6) without the CLI needing to
    /// re-walk the hierarchy itself.
    pub fn item_tree(
        &self,
        list_key: &str,
        item_key: &str,
        parent_key: Option<&str>,
    ) -> Result<(Vec<TodoItem>, Vec<TodoItem>)> {
        let (_, item) = self.resolve_item(list_key, item_key, parent_key)?;
        let path = self.store.get_item_path(item.id)?;
        let children = self.store.get_item_children(item.id)?;
        Ok((path, children))
    }

    /// Items in `list_key` carrying `property_key == property_value`
    /// (`item find`, §6, §4.1).
    pub fn find_items_by_property(
        &self,
        list_key: &str,
        property_key: &str,
        property_value: &str,
        limit: Option<i64>,
    ) -> Result<Vec<TodoItem>> {
        let list = self.resolve_list(list_key)?;
        self.store
            .find_items_by_property(list.id, property_key, property_value, limit)
    }

    /// Parents whose children jointly satisfy every `item_key: status`
    /// condition given (`item find-status`, §6, §4.1).
    pub fn find_subitems_by_status(
        &self,
        list_key: &str,
        conditions: &HashMap<String, ItemStatus>,
        limit: Option<i64>,
    ) -> Result<Vec<(TodoItem, Vec<TodoItem>)>> {
        let list = self.resolve_list(list_key)?;
        self.store.find_subitems_by_status(list.id, conditions, limit)
    }

    /// The raw `completion_states` map (`item state list`, §6).
    pub fn list_completion_states(
        &self,
        list_key: &str,
        item_key: &str,
        parent_key: Option<&str>,
    ) -> Result<CompletionStates> {
        let (_, item) = self.resolve_item(list_key, item_key, parent_key)?;
        Ok(item.completion_states)
    }

    /// Removes one key from `completion_states` (`item state remove`, §6).
    /// A no-op (returns `false`) if the key wasn't present.
    pub fn remove_completion_state(
        &self,
        list_key: &str,
        item_key: &str,
        parent_key: Option<&str>,
        key: &str,
    ) -> Result<bool> {
        let (list, item) = self.resolve_item(list_key, item_key, parent_key)?;
        let mut states = item.completion_states.clone();
        if states.remove(key).is_none() {
            return Ok(false);
        }
        self.store.with_transaction(|tx| {
            items::update_item(tx, item.id, None, None, Some(&states), None, None, None)?;
            self.record_history(
                tx,
                Some(item.id),
                Some(list.id),
                "completion_state_removed",
                Some(serde_json::json!({"key": key})),
                None,
            )?;
            Ok(true)
        })
    }

    /// Clears the entire `completion_states` map (`item state clear`, §6).
    pub fn clear_completion_states(
        &self,
        list_key: &str,
        item_key: &str,
        parent_key: Option<&str>,
    ) -> Result<()> {
        let (list, item) = self.resolve_item(list_key, item_key, parent_key)?;
        self.store.with_transaction(|tx| {
            items::update_item(tx, item.id, None, None, Some(&CompletionStates::new()), None, None, None)?;
            self.record_history(
                tx,
                Some(item.id),
                Some(list.id),
                "completion_states_cleared",
                None,
                None,
            )?;
            Ok(())
        })
    }

    /// The engine's default selection; `smart = false` falls back to the
    /// simple first-unblocked-pending rule (§4.3).
    pub fn next_pending_item(&self, list_key: &str, smart: bool) -> Result<Option<TodoItem>> {
        let list = self.resolve_list(list_key)?;
        if smart {
            selection::next_pending_smart(&self.store, list.id)
        } else {
            selection::next_pending_simple(&self.store, list.id)
        }
    }

    pub fn children_status_summary(
        &self,
        list_key: &str,
        item_key: &str,
        parent_key: Option<&str>,
    ) -> Result<ChildrenStatusSummary> {
        let (_, item) = self.resolve_item(list_key, item_key, parent_key)?;
        self.store.get_children_status_summary(item.id)
    }

    pub fn item_hierarchy_stats(
        &self,
        list_key: &str,
        item_key: &str,
        parent_key: Option<&str>,
    ) -> Result<HierarchyStats> {
        let (_, item) = self.resolve_item(list_key, item_key, parent_key)?;
        self.store.item_hierarchy_stats(item.id)
    }

    /// Whole-list status counts, flattening the hierarchy (SPEC_FULL.md
    /// "stats progress").
    pub fn list_progress(&self, list_key: &str) -> Result<ProgressStats> {
        let list = self.resolve_list(list_key)?;
        let mut stats = ProgressStats::default();
        for item in self.store.get_list_items(list.id, None, None)? {
            stats.total += 1;
            match item.status {
                ItemStatus::Pending => stats.pending += 1,
                ItemStatus::InProgress => stats.in_progress += 1,
                ItemStatus::Completed => stats.completed += 1,
                ItemStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    // ---- Dependencies -----------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn add_dependency(
        &self,
        dependent_list: &str,
        dependent_item: &str,
        dependent_parent: Option<&str>,
        required_list: &str,
        required_item: &str,
        required_parent: Option<&str>,
        dependency_type: DependencyType,
        metadata: &Metadata,
    ) -> Result<ItemDependency> {
        let (_, dep) = self.resolve_item(dependent_list, dependent_item, dependent_parent)?;
        let (_, req) = self.resolve_item(required_list, required_item, required_parent)?;
        self.store.with_transaction(|tx| {
            let created = dependency::add_dependency(tx, dep.id, req.id, dependency_type, metadata)?;
            self.record_history(
                tx,
                Some(dep.id),
                None,
                "dependency_added",
                None,
                Some(serde_json::json!({
                    "required_item_id": req.id,
                    "dependency_type": dependency_type.to_string(),
                })),
            )?;
            Ok(created)
        })
    }

    pub fn remove_dependency(
        &self,
        dependent_list: &str,
        dependent_item: &str,
        dependent_parent: Option<&str>,
        required_list: &str,
        required_item: &str,
        required_parent: Option<&str>,
    ) -> Result<()> {
        let (_, dep) = self.resolve_item(dependent_list, dependent_item, dependent_parent)?;
        let (_, req) = self.resolve_item(required_list, required_item, required_parent)?;
        self.store.with_transaction(|tx| {
            dependency::remove_dependency(tx, dep.id, req.id)?;
            self.record_history(
                tx,
                Some(dep.id),
                None,
                "dependency_removed",
                Some(serde_json::json!({"required_item_id": req.id})),
                None,
            )?;
            Ok(())
        })
    }

    pub fn can_start_item(&self, list_key: &str, item_key: &str, parent_key: Option<&str>) -> Result<bool> {
        let (_, item) = self.resolve_item(list_key, item_key, parent_key)?;
        dependency::can_start_item(self.store.conn(), item.id)
    }

    pub fn can_complete_item(&self, list_key: &str, item_key: &str, parent_key: Option<&str>) -> Result<bool> {
        let (_, item) = self.resolve_item(list_key, item_key, parent_key)?;
        dependency::can_complete_item(self.store.conn(), item.id)
    }

    /// Human-readable reason `item_key` can't start yet (empty-ish "not
    /// blocked" if it can). Advisory, used by `reports errors`-style CLI
    /// output.
    pub fn blocking_reason(&self, list_key: &str, item_key: &str, parent_key: Option<&str>) -> Result<String> {
        let (_, item) = self.resolve_item(list_key, item_key, parent_key)?;
        let blockers = self.store.get_item_blockers(item.id)?;
        let children = self.store.get_item_children(item.id)?;
        let pending: Vec<TodoItem> = children
            .into_iter()
            .filter(|c| c.status != ItemStatus::Completed)
            .collect();
        Ok(dependency::describe_blocking(&blockers, &pending))
    }

    // ---- Properties ---------------------------------------------------

    pub fn set_item_property(
        &self,
        list_key: &str,
        item_key: &str,
        parent_key: Option<&str>,
        key: &str,
        value: &str,
    ) -> Result<ItemProperty> {
        let (list, item) = self.resolve_item(list_key, item_key, parent_key)?;
        self.store.with_transaction(|tx| {
            let prop = properties::set_item_property_checked(tx, item.id, key, value)?;
            self.record_history(
                tx,
                Some(item.id),
                Some(list.id),
                "item_property_set",
                None,
                Some(serde_json::json!({"key": key, "value": value})),
            )?;
            Ok(prop)
        })
    }

    pub fn get_item_property(
        &self,
        list_key: &str,
        item_key: &str,
        parent_key: Option<&str>,
        key: &str,
    ) -> Result<Option<ItemProperty>> {
        let (_, item) = self.resolve_item(list_key, item_key, parent_key)?;
        self.store.get_item_property(item.id, key)
    }

    pub fn list_item_properties(
        &self,
        list_key: &str,
        item_key: &str,
        parent_key: Option<&str>,
    ) -> Result<Vec<ItemProperty>> {
        let (_, item) = self.resolve_item(list_key, item_key, parent_key)?;
        self.store.list_item_properties(item.id)
    }

    pub fn delete_item_property(
        &self,
        list_key: &str,
        item_key: &str,
        parent_key: Option<&str>,
        key: &str,
    ) -> Result<bool> {
        let (list, item) = self.resolve_item(list_key, item_key, parent_key)?;
        self.store.with_transaction(|tx| {
            let removed = store_properties::delete_item_property(tx, item.id, key)?;
            if removed {
                self.record_history(
                    tx,
                    Some(item.id),
                    Some(list.id),
                    "item_property_deleted",
                    Some(serde_json::json!({"key": key})),
                    None,
                )?;
            }
            Ok(removed)
        })
    }

    pub fn set_list_property(&self, list_key: &str, key: &str, value: &str) -> Result<ListProperty> {
        let list = self.resolve_list(list_key)?;
        self.store.with_transaction(|tx| {
            let prop = properties::set_list_property_checked(tx, list.id, key, value)?;
            self.record_history(
                tx,
                None,
                Some(list.id),
                "list_property_set",
                None,
                Some(serde_json::json!({"key": key, "value": value})),
            )?;
            Ok(prop)
        })
    }

    pub fn get_list_property(&self, list_key: &str, key: &str) -> Result<Option<ListProperty>> {
        let list = self.resolve_list(list_key)?;
        self.store.get_list_property(list.id, key)
    }

    pub fn list_list_properties(&self, list_key: &str) -> Result<Vec<ListProperty>> {
        let list = self.resolve_list(list_key)?;
        self.store.list_list_properties(list.id)
    }

    pub fn delete_list_property(&self, list_key: &str, key: &str) -> Result<bool> {
        let list = self.resolve_list(list_key)?;
        self.store.with_transaction(|tx| {
            let removed = store_properties::delete_list_property(tx, list.id, key)?;
            if removed {
                self.record_history(
                    tx,
                    None,
                    Some(list.id),
                    "list_property_deleted",
                    Some(serde_json::json!({"key": key})),
                    None,
                )?;
            }
            Ok(removed)
        })
    }

    // ---- Tags -----------------------------------------------------------

    pub fn add_tag(&self, list_key: &str, tag_name: &str) -> Result<Tag> {
        let list = self.resolve_list(list_key)?;
        self.store.with_transaction(|tx| {
            let tag = properties::get_or_create_tag(tx, tag_name)?;
            store_tags::assign_tag(tx, list.id, tag.id)?;
            self.record_history(
                tx,
                None,
                Some(list.id),
                "tag_assigned",
                None,
                Some(serde_json::json!({"tag": tag.name})),
            )?;
            Ok(tag)
        })
    }

    /// Rejects removal of a tag in the force-tags scope — those tags are
    /// an environment boundary, not a user-editable label (§4.6 effect 4).
    pub fn remove_tag(&self, list_key: &str, tag_name: &str) -> Result<()> {
        let list = self.resolve_list(list_key)?;
        let tag_name = tag_name.trim().to_lowercase();
        if self.access_scope.forbids_tag_removal(&tag_name) {
            return Err(TodoError::CannotRemoveForceTag {
                list: list_key.to_string(),
                tag: tag_name,
            });
        }
        self.store.with_transaction(|tx| {
            let tag = store_tags::get_tag_by_name(tx, &tag_name)?
                .ok_or_else(|| TodoError::TagNotFound(tag_name.clone()))?;
            store_tags::remove_tag_assignment(tx, list.id, tag.id)?;
            self.record_history(
                tx,
                None,
                Some(list.id),
                "tag_removed",
                Some(serde_json::json!({"tag": tag_name.clone()})),
                None,
            )?;
            Ok(())
        })
    }

    pub fn list_tags_for(&self, list_key: &str) -> Result<Vec<Tag>> {
        let list = self.resolve_list(list_key)?;
        self.store.tags_for_list(list.id)
    }

    pub fn all_tags(&self) -> Result<Vec<Tag>> {
        self.store.list_tags()
    }

    // ---- History ----------------------------------------------------------

    pub fn item_history(
        &self,
        list_key: &str,
        item_key: &str,
        parent_key: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<HistoryEntry>> {
        let (_, item) = self.resolve_item(list_key, item_key, parent_key)?;
        self.store.get_item_history(item.id, limit)
    }

    pub fn list_history(&self, list_key: &str, limit: Option<i64>) -> Result<Vec<HistoryEntry>> {
        let list = self.resolve_list(list_key)?;
        self.store.get_list_history(list.id, limit)
    }

    // ---- Import / export --------------------------------------------------

    /// A self-contained snapshot of `list_key`: the list, its tags, and
    /// every item (one level of nesting) with its properties. Round-trips
    /// through `import_list` (SPEC_FULL.md "io export/import").
    pub fn export_list(&self, list_key: &str) -> Result<ListExport> {
        let list = self.resolve_list(list_key)?;
        let tags = self.store.tags_for_list(list.id)?.into_iter().map(|t| t.name).collect();
        let mut items = Vec::new();
        for root in self.store.get_root_items(list.id)? {
            items.push(self.export_item(&root, None)?);
            for child in self.store.get_item_children(root.id)? {
                items.push(self.export_item(&child, Some(root.item_key.clone()))?);
            }
        }
        Ok(ListExport {
            list_key: list.list_key,
            title: list.title,
            description: list.description,
            metadata: list.metadata,
            tags,
            items,
        })
    }

    fn export_item(&self, item: &TodoItem, parent_item_key: Option<String>) -> Result<ItemExport> {
        let properties = self
            .store
            .list_item_properties(item.id)?
            .into_iter()
            .map(|p| (p.property_key, p.property_value))
            .collect();
        Ok(ItemExport {
            item_key: item.item_key.clone(),
            content: item.content.clone(),
            parent_item_key,
            status: item.status,
            completion_states: item.completion_states.clone(),
            metadata: item.metadata.clone(),
            properties,
        })
    }

    /// Recreates a list from a [`ListExport`]. Fails with `DuplicateListKey`
    /// if `export.list_key` already exists — import never silently
    /// overwrites (mirrors the original's explicit-conflict import mode).
    pub fn import_list(&self, export: &ListExport) -> Result<TodoList> {
        let list = self.create_list(
            &export.list_key,
            &export.title,
            export.description.as_deref(),
            &export.metadata,
        )?;
        for tag_name in &export.tags {
            self.add_tag(&export.list_key, tag_name)?;
        }
        for item in &export.items {
            self.add_item(
                &export.list_key,
                &item.item_key,
                &item.content,
                item.parent_item_key.as_deref(),
                &item.metadata,
            )?;
            for (key, value) in &item.properties {
                self.set_item_property(
                    &export.list_key,
                    &item.item_key,
                    item.parent_item_key.as_deref(),
                    key,
                    value,
                )?;
            }
            if item.status != ItemStatus::Pending {
                self.set_item_status(
                    &export.list_key,
                    &item.item_key,
                    item.parent_item_key.as_deref(),
                    item.status,
                    Some(&item.completion_states),
                )?;
            }
        }
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn manager() -> TodoManager {
        TodoManager::open_in_memory(AccessScope::Unrestricted).unwrap()
    }

    #[test]
    fn list_key_without_letter_rejected() {
        let mgr = manager();
        let err = mgr.create_list("12345", "Numeric", None, &HashMap::new()).unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }

    #[test]
    fn create_list_and_add_item_round_trip() {
        let mgr = manager();
        let list = mgr.create_list("proj1", "Project One", None, &HashMap::new()).unwrap();
        assert_eq!(list.list_key, "proj1");
        let item = mgr.add_item("proj1", "task1", "Do the thing", None, &HashMap::new()).unwrap();
        assert_eq!(item.status, ItemStatus::Pending);
        let fetched = mgr.get_item("proj1", "task1", None).unwrap();
        assert_eq!(fetched.id, item.id);
    }

    #[test]
    fn status_change_emits_history_and_syncs_parent() {
        let mgr = manager();
        mgr.create_list("proj1", "Project One", None, &HashMap::new()).unwrap();
        mgr.add_item("proj1", "parent", "Parent", None, &HashMap::new()).unwrap();
        mgr.add_item("proj1", "child", "Child", Some("parent"), &HashMap::new()).unwrap();
        mgr.set_item_status("proj1", "child", Some("parent"), ItemStatus::Completed, None)
            .unwrap();
        let parent = mgr.get_item("proj1", "parent", None).unwrap();
        assert_eq!(parent.status, ItemStatus::Completed);
        let history = mgr.item_history("proj1", "child", Some("parent"), None).unwrap();
        assert!(history.iter().any(|h| h.action == "item_status_changed"));
    }

    #[test]
    fn forced_scope_masks_out_of_scope_list_as_not_found() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_list("untagged", "Untagged", None, crate::model::ListType::Sequential, &HashMap::new())
            .unwrap();
        let scoped = TodoManager {
            store,
            access_scope: AccessScope::resolve("restricted", ""),
        };
        let err = scoped.get_list("untagged").unwrap_err();
        assert!(matches!(err, TodoError::ListNotFound(_)));
    }

    #[test]
    fn removing_a_force_tag_is_rejected() {
        let scope = AccessScope::resolve("dev", "");
        let mgr = TodoManager::open_in_memory(scope).unwrap();
        mgr.create_list("proj1", "Project One", None, &HashMap::new()).unwrap();
        let err = mgr.remove_tag("proj1", "dev").unwrap_err();
        assert_eq!(err.code(), "cannot_remove_force_tag");
    }

    #[test]
    fn export_then_import_round_trips() {
        let mgr = manager();
        mgr.create_list("proj1", "Project One", Some("desc"), &HashMap::new()).unwrap();
        mgr.add_item("proj1", "a", "Task A", None, &HashMap::new()).unwrap();
        mgr.set_item_property("proj1", "a", None, "priority", "high").unwrap();
        mgr.set_item_status("proj1", "a", None, ItemStatus::Completed, None).unwrap();
        let export = mgr.export_list("proj1").unwrap();

        let mgr2 = manager();
        mgr2.import_list(&export).unwrap();
        let item = mgr2.get_item("proj1", "a", None).unwrap();
        assert_eq!(item.status, ItemStatus::Completed);
        let prop = mgr2.get_item_property("proj1", "a", None, "priority").unwrap().unwrap();
        assert_eq!(prop.property_value, "high");
    }

    #[test]
    fn duplicate_import_rejected() {
        let mgr = manager();
        mgr.create_list("proj1", "Project One", None, &HashMap::new()).unwrap();
        let export = mgr.export_list("proj1").unwrap();
        let err = mgr.import_list(&export).unwrap_err();
        assert_eq!(err.code(), "duplicate_key");
    }

    #[test]
    fn archive_and_unarchive_round_trip() {
        let mgr = manager();
        mgr.create_list("proj1", "Project One", None, &HashMap::new()).unwrap();
        let archived = mgr.archive_list("proj1").unwrap();
        assert_eq!(archived.status, ListStatus::Archived);
        let unarchived = mgr.unarchive_list("proj1").unwrap();
        assert_eq!(unarchived.status, ListStatus::Active);
    }

    #[test]
    fn edit_item_changes_content_not_status() {
        let mgr = manager();
        mgr.create_list("proj1", "Project One", None, &HashMap::new()).unwrap();
        mgr.add_item("proj1", "a", "Old content", None, &HashMap::new()).unwrap();
        let updated = mgr.edit_item("proj1", "a", None, Some("New content"), None).unwrap();
        assert_eq!(updated.content, "New content");
        assert_eq!(updated.status, ItemStatus::Pending);
    }

    #[test]
    fn item_children_lists_direct_children_only() {
        let mgr = manager();
        mgr.create_list("proj1", "Project One", None, &HashMap::new()).unwrap();
        mgr.add_item("proj1", "p1", "Parent", None, &HashMap::new()).unwrap();
        mgr.add_item("proj1", "a", "A", Some("p1"), &HashMap::new()).unwrap();
        mgr.add_item("proj1", "b", "B", Some("p1"), &HashMap::new()).unwrap();
        let children = mgr.item_children("proj1", "p1", None).unwrap();
        let keys: Vec<&str> = children.iter().map(|c| c.item_key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn find_items_by_property_matches_exact_value() {
        let mgr = manager();
        mgr.create_list("proj1", "Project One", None, &HashMap::new()).unwrap();
        mgr.add_item("proj1", "a", "A", None, &HashMap::new()).unwrap();
        mgr.add_item("proj1", "b", "B", None, &HashMap::new()).unwrap();
        mgr.set_item_property("proj1", "a", None, "priority", "high").unwrap();
        mgr.set_item_property("proj1", "b", None, "priority", "low").unwrap();
        let found = mgr.find_items_by_property("proj1", "priority", "high", None).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].item_key, "a");
    }

    #[test]
    fn find_subitems_by_status_requires_all_conditions() {
        let mgr = manager();
        mgr.create_list("proj1", "Project One", None, &HashMap::new()).unwrap();
        mgr.add_item("proj1", "p1", "Parent", None, &HashMap::new()).unwrap();
        mgr.add_item("proj1", "a", "A", Some("p1"), &HashMap::new()).unwrap();
        mgr.add_item("proj1", "b", "B", Some("p1"), &HashMap::new()).unwrap();
        mgr.set_item_status("proj1", "a", Some("p1"), ItemStatus::Completed, None).unwrap();
        let mut conditions = HashMap::new();
        conditions.insert("a".to_string(), ItemStatus::Completed);
        let matched = mgr.find_subitems_by_status("proj1", &conditions, None).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].0.item_key, "p1");

        conditions.insert("b".to_string(), ItemStatus::Completed);
        let none_matched = mgr.find_subitems_by_status("proj1", &conditions, None).unwrap();
        assert!(none_matched.is_empty());
    }

    #[test]
    fn completion_state_remove_and_clear() {
        let mgr = manager();
        mgr.create_list("proj1", "Project One", None, &HashMap::new()).unwrap();
        mgr.add_item("proj1", "a", "A", None, &HashMap::new()).unwrap();
        let mut states = CompletionStates::new();
        states.insert("reviewed".to_string(), crate::model::CompletionStateValue::Bool(true));
        states.insert("signed_off".to_string(), crate::model::CompletionStateValue::Text("bob".into()));
        mgr.set_item_status("proj1", "a", None, ItemStatus::InProgress, Some(&states)).unwrap();

        let removed = mgr.remove_completion_state("proj1", "a", None, "reviewed").unwrap();
        assert!(removed);
        let remaining = mgr.list_completion_states("proj1", "a", None).unwrap();
        assert!(!remaining.contains_key("reviewed"));
        assert!(remaining.contains_key("signed_off"));

        mgr.clear_completion_states("proj1", "a", None).unwrap();
        let cleared = mgr.list_completion_states("proj1", "a", None).unwrap();
        assert!(cleared.is_empty());
    }
}
