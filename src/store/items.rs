use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::{Result, TodoError};
use crate::model::{ChildrenStatusSummary, HierarchyStats, ItemStatus, TodoItem};
use crate::natural_sort::sort_by_natural_key;

use super::{Store, json_to_map, now_rfc3339, parse_ts};

const ITEM_COLUMNS: &str = "id, list_id, item_key, content, position, status, completion_states_json, parent_item_id, metadata_json, started_at, completed_at, created_at, updated_at";

pub(super) fn row_to_item(row: &Row) -> rusqlite::Result<TodoItem> {
    let status_str: String = row.get("status")?;
    let completion_str: String = row.get("completion_states_json")?;
    let metadata_str: String = row.get("metadata_json")?;
    let started: Option<String> = row.get("started_at")?;
    let completed: Option<String> = row.get("completed_at")?;
    let created: String = row.get("created_at")?;
    let updated: String = row.get("updated_at")?;
    Ok(TodoItem {
        id: row.get("id")?,
        list_id: row.get("list_id")?,
        item_key: row.get("item_key")?,
        content: row.get("content")?,
        position: row.get("position")?,
        status: status_str.parse().unwrap_or(ItemStatus::Pending),
        parent_item_id: row.get("parent_item_id")?,
        completion_states: serde_json::from_str(&completion_str).unwrap_or_default(),
        metadata: json_to_map(&metadata_str),
        started_at: started.map(|s| parse_ts(&s)),
        completed_at: completed.map(|s| parse_ts(&s)),
        created_at: parse_ts(&created),
        updated_at: parse_ts(&updated),
    })
}

/// Free-function core of every `Store` item operation, parameterized over
/// `&Connection` so callers composing a larger transaction (`manager.rs`
/// façade methods, `hierarchy.rs` ancestor sync) can pass `&Transaction`
/// (which derefs to `&Connection`) instead. `impl Store` below is a thin
/// wrapper delegating to these for direct/standalone use.
pub(crate) fn create_item(
    conn: &Connection,
    list_id: i64,
    item_key: &str,
    content: &str,
    parent_item_id: Option<i64>,
    position: i64,
    metadata: &crate::model::Metadata,
) -> Result<TodoItem> {
    if get_item_by_key_and_parent(conn, list_id, item_key, parent_item_id)?.is_some() {
        return Err(TodoError::DuplicateItemKey {
            list: list_id.to_string(),
            key: item_key.to_string(),
        });
    }
    let now = now_rfc3339();
    let metadata_json = serde_json::to_string(metadata)?;
    conn.execute(
        "INSERT INTO todo_items (list_id, item_key, content, position, status, completion_states_json, parent_item_id, metadata_json, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', '{}', ?5, ?6, ?7, ?7)",
        params![list_id, item_key, content, position, parent_item_id, metadata_json, now],
    )?;
    let id = conn.last_insert_rowid();
    get_item_by_id(conn, id)?.ok_or_else(|| TodoError::StorageFailure("item vanished after insert".into()))
}

pub(crate) fn get_item_by_id(conn: &Connection, id: i64) -> Result<Option<TodoItem>> {
    let mut stmt = conn.prepare(&format!("SELECT {ITEM_COLUMNS} FROM todo_items WHERE id = ?1"))?;
    Ok(stmt.query_row(params![id], row_to_item).optional()?)
}

/// Precise lookup when subitem keys repeat across parents (§4.1).
pub(crate) fn get_item_by_key_and_parent(
    conn: &Connection,
    list_id: i64,
    item_key: &str,
    parent_item_id: Option<i64>,
) -> Result<Option<TodoItem>> {
    let sql = match parent_item_id {
        Some(_) => format!(
            "SELECT {ITEM_COLUMNS} FROM todo_items WHERE list_id = ?1 AND item_key = ?2 AND parent_item_id = ?3"
        ),
        None => format!(
            "SELECT {ITEM_COLUMNS} FROM todo_items WHERE list_id = ?1 AND item_key = ?2 AND parent_item_id IS NULL"
        ),
    };
    let mut stmt = conn.prepare(&sql)?;
    let row = match parent_item_id {
        Some(p) => stmt.query_row(params![list_id, item_key, p], row_to_item).optional()?,
        None => stmt.query_row(params![list_id, item_key], row_to_item).optional()?,
    };
    Ok(row)
}

/// Looks up a root item by key; returns `None` if the key only exists
/// under some parent.
pub(crate) fn get_item_by_key(conn: &Connection, list_id: i64, item_key: &str) -> Result<Option<TodoItem>> {
    get_item_by_key_and_parent(conn, list_id, item_key, None)
}

/// Returns root items in natural order, each immediately followed by
/// its children in natural order (DFS-grouped); children of missing
/// roots (orphans) are appended at the end (§4.1).
pub(crate) fn get_list_items(
    conn: &Connection,
    list_id: i64,
    status: Option<ItemStatus>,
    limit: Option<i64>,
) -> Result<Vec<TodoItem>> {
    let mut stmt = conn.prepare(&format!("SELECT {ITEM_COLUMNS} FROM todo_items WHERE list_id = ?1"))?;
    let all = stmt
        .query_map(params![list_id], row_to_item)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut by_parent: HashMap<Option<i64>, Vec<TodoItem>> = HashMap::new();
    let ids: std::collections::HashSet<i64> = all.iter().map(|i| i.id).collect();
    for item in all {
        let parent_key = match item.parent_item_id {
            Some(p) if ids.contains(&p) => Some(p),
            Some(_) => None, // orphan: parent missing from this list
            None => None,
        };
        by_parent.entry(parent_key).or_default().push(item);
    }
    for group in by_parent.values_mut() {
        sort_by_natural_key(group, |i| i.item_key.as_str());
    }

    let mut ordered = Vec::new();
    fn walk(
        parent: Option<i64>,
        by_parent: &mut HashMap<Option<i64>, Vec<TodoItem>>,
        out: &mut Vec<TodoItem>,
    ) {
        let Some(children) = by_parent.remove(&parent) else {
            return;
        };
        for child in children {
            let id = child.id;
            out.push(child);
            walk(Some(id), by_parent, out);
        }
    }
    walk(None, &mut by_parent, &mut ordered);
    // Any remaining groups are orphans whose parent_item_id pointed
    // outside this list (or was already consumed); append them last.
    let mut leftover_keys: Vec<Option<i64>> = by_parent.keys().cloned().collect();
    leftover_keys.sort();
    for key in leftover_keys {
        if let Some(group) = by_parent.remove(&key) {
            ordered.extend(group);
        }
    }

    let mut filtered: Vec<TodoItem> = match status {
        Some(s) => ordered.into_iter().filter(|i| i.status == s).collect(),
        None => ordered,
    };
    if let Some(limit) = limit {
        filtered.truncate(limit.max(0) as usize);
    }
    Ok(filtered)
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn update_item(
    conn: &Connection,
    id: i64,
    content: Option<&str>,
    status: Option<ItemStatus>,
    completion_states: Option<&crate::model::CompletionStates>,
    metadata: Option<&crate::model::Metadata>,
    started_at: Option<Option<chrono::DateTime<chrono::Utc>>>,
    completed_at: Option<Option<chrono::DateTime<chrono::Utc>>>,
) -> Result<Option<TodoItem>> {
    let Some(current) = get_item_by_id(conn, id)? else {
        return Ok(None);
    };
    let new_content = content.unwrap_or(&current.content);
    let new_status = status.unwrap_or(current.status);
    let new_completion_json = match completion_states {
        Some(m) => serde_json::to_string(m)?,
        None => serde_json::to_string(&current.completion_states)?,
    };
    let new_metadata_json = match metadata {
        Some(m) => serde_json::to_string(m)?,
        None => serde_json::to_string(&current.metadata)?,
    };
    let new_started = match started_at {
        Some(v) => v,
        None => current.started_at,
    };
    let new_completed = match completed_at {
        Some(v) => v,
        None => current.completed_at,
    };
    let now = now_rfc3339();
    conn.execute(
        "UPDATE todo_items SET content = ?1, status = ?2, completion_states_json = ?3, metadata_json = ?4, started_at = ?5, completed_at = ?6, updated_at = ?7 WHERE id = ?8",
        params![
            new_content,
            new_status.to_string(),
            new_completion_json,
            new_metadata_json,
            new_started.map(|t| t.to_rfc3339()),
            new_completed.map(|t| t.to_rfc3339()),
            now,
            id,
        ],
    )?;
    get_item_by_id(conn, id)
}

pub(crate) fn set_item_parent_and_position(
    conn: &Connection,
    id: i64,
    parent_item_id: Option<i64>,
    position: i64,
) -> Result<()> {
    let now = now_rfc3339();
    conn.execute(
        "UPDATE todo_items SET parent_item_id = ?1, position = ?2, updated_at = ?3 WHERE id = ?4",
        params![parent_item_id, position, now, id],
    )?;
    Ok(())
}

/// Removes dependent history, item properties, and any dependency
/// referencing `id` before deleting it (§4.1). Caller must have already
/// confirmed the item has no children (`HasChildren` enforcement lives
/// in the Hierarchy Engine). Issues its deletes directly against `conn`
/// without opening its own transaction — callers that need standalone
/// atomicity go through `Store::delete_item`, which wraps this in
/// `with_transaction`; callers already inside a façade transaction
/// (`hierarchy::delete_item_checked`) pass that transaction straight
/// through, since SQLite cannot nest `BEGIN`.
pub(crate) fn delete_item(conn: &Connection, id: i64) -> Result<bool> {
    if get_item_by_id(conn, id)?.is_none() {
        return Ok(false);
    }
    conn.execute(
        "DELETE FROM item_dependencies WHERE dependent_item_id = ?1 OR required_item_id = ?1",
        params![id],
    )?;
    conn.execute("DELETE FROM item_properties WHERE item_id = ?1", params![id])?;
    conn.execute("DELETE FROM todo_history WHERE item_id = ?1", params![id])?;
    conn.execute("DELETE FROM todo_items WHERE id = ?1", params![id])?;
    Ok(true)
}

/// Max sibling position + 1 (§4.1).
pub(crate) fn get_next_position(conn: &Connection, list_id: i64, parent_item_id: Option<i64>) -> Result<i64> {
    let max: Option<i64> = match parent_item_id {
        Some(p) => conn.query_row(
            "SELECT MAX(position) FROM todo_items WHERE list_id = ?1 AND parent_item_id = ?2",
            params![list_id, p],
            |r| r.get(0),
        )?,
        None => conn.query_row(
            "SELECT MAX(position) FROM todo_items WHERE list_id = ?1 AND parent_item_id IS NULL",
            params![list_id],
            |r| r.get(0),
        )?,
    };
    Ok(max.unwrap_or(0) + 1)
}

pub(crate) fn get_item_children(conn: &Connection, id: i64) -> Result<Vec<TodoItem>> {
    let mut stmt = conn.prepare(&format!("SELECT {ITEM_COLUMNS} FROM todo_items WHERE parent_item_id = ?1"))?;
    let mut children = stmt
        .query_map(params![id], row_to_item)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    sort_by_natural_key(&mut children, |i| i.item_key.as_str());
    Ok(children)
}

pub(crate) fn get_root_items(conn: &Connection, list_id: i64) -> Result<Vec<TodoItem>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ITEM_COLUMNS} FROM todo_items WHERE list_id = ?1 AND parent_item_id IS NULL"
    ))?;
    let mut roots = stmt
        .query_map(params![list_id], row_to_item)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    sort_by_natural_key(&mut roots, |i| i.item_key.as_str());
    Ok(roots)
}

/// Single aggregate query over direct children only (§4.1).
pub(crate) fn get_children_status_summary(conn: &Connection, id: i64) -> Result<ChildrenStatusSummary> {
    let row = conn.query_row(
        "SELECT
            COUNT(*) as total,
            SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END) as pending,
            SUM(CASE WHEN status = 'in_progress' THEN 1 ELSE 0 END) as in_progress,
            SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END) as completed,
            SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) as failed
         FROM todo_items WHERE parent_item_id = ?1",
        params![id],
        |r| {
            Ok(ChildrenStatusSummary {
                total: r.get(0)?,
                pending: r.get::<_, Option<i64>>(1)?.unwrap_or(0),
                in_progress: r.get::<_, Option<i64>>(2)?.unwrap_or(0),
                completed: r.get::<_, Option<i64>>(3)?.unwrap_or(0),
                failed: r.get::<_, Option<i64>>(4)?.unwrap_or(0),
            })
        },
    )?;
    Ok(row)
}

pub(crate) fn has_pending_children(conn: &Connection, id: i64) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM todo_items WHERE parent_item_id = ?1 AND status = 'pending')",
        params![id],
        |r| r.get(0),
    )?;
    Ok(exists)
}

pub(crate) fn has_any_children(conn: &Connection, id: i64) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM todo_items WHERE parent_item_id = ?1)",
        params![id],
        |r| r.get(0),
    )?;
    Ok(exists)
}

/// Depth of `id` in its parent chain, root = 0, capped at 10 (§4.1,
/// §8 invariant 2). Returns the cap if the true depth would exceed it
/// (indicates an invariant violation upstream; callers should log).
pub(crate) fn get_item_depth(conn: &Connection, id: i64) -> Result<u32> {
    Ok(get_item_path(conn, id)?.len().saturating_sub(1) as u32)
}

/// Root-to-item path, capped at 10 entries.
pub(crate) fn get_item_path(conn: &Connection, id: i64) -> Result<Vec<TodoItem>> {
    const DEPTH_CAP: usize = 10;
    let mut path = Vec::new();
    let mut current = get_item_by_id(conn, id)?;
    while let Some(item) = current {
        let parent_id = item.parent_item_id;
        path.push(item);
        if path.len() >= DEPTH_CAP {
            break;
        }
        current = match parent_id {
            Some(p) => get_item_by_id(conn, p)?,
            None => None,
        };
    }
    path.reverse();
    Ok(path)
}

/// Whole-subtree status aggregate (SPEC_FULL.md §3 supplement).
pub(crate) fn item_hierarchy_stats(conn: &Connection, id: i64) -> Result<HierarchyStats> {
    const DEPTH_CAP: usize = 10;
    let mut stats = HierarchyStats::default();
    let mut frontier = vec![id];
    let mut depth = 0;
    while !frontier.is_empty() && depth < DEPTH_CAP {
        let mut next = Vec::new();
        for parent in frontier {
            for child in get_item_children(conn, parent)? {
                stats.total_subitems += 1;
                match child.status {
                    ItemStatus::Pending => stats.pending_subitems += 1,
                    ItemStatus::InProgress => stats.in_progress_subitems += 1,
                    ItemStatus::Completed => stats.completed_subitems += 1,
                    ItemStatus::Failed => stats.failed_subitems += 1,
                }
                next.push(child.id);
            }
        }
        frontier = next;
        depth += 1;
    }
    Ok(stats)
}

/// Exact property-match filter (§4.1).
pub(crate) fn find_items_by_property(
    conn: &Connection,
    list_id: i64,
    key: &str,
    value: &str,
    limit: Option<i64>,
) -> Result<Vec<TodoItem>> {
    let sql = format!(
        "SELECT {cols} FROM todo_items i
         JOIN item_properties p ON p.item_id = i.id
         WHERE i.list_id = ?1 AND p.property_key = ?2 AND p.property_value = ?3",
        cols = ITEM_COLUMNS
            .split(", ")
            .map(|c| format!("i.{c}"))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut items = stmt
        .query_map(params![list_id, key, value], row_to_item)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    sort_by_natural_key(&mut items, |i| i.item_key.as_str());
    if let Some(limit) = limit {
        items.truncate(limit.max(0) as usize);
    }
    Ok(items)
}

/// Returns, per parent, the group `{parent, matching_subitems}` for
/// parents whose children satisfy ALL the given `subitem_key: expected
/// status` conditions (§4.1).
pub(crate) fn find_subitems_by_status(
    conn: &Connection,
    list_id: i64,
    conditions: &HashMap<String, ItemStatus>,
    limit: Option<i64>,
) -> Result<Vec<(TodoItem, Vec<TodoItem>)>> {
    let mut out = Vec::new();
    for root in get_root_items(conn, list_id)? {
        let children = get_item_children(conn, root.id)?;
        let mut matching = Vec::new();
        let mut satisfies_all = true;
        for (key, expected) in conditions {
            match children.iter().find(|c| &c.item_key == key) {
                Some(c) if c.status == *expected => matching.push(c.clone()),
                _ => {
                    satisfies_all = false;
                    break;
                }
            }
        }
        if satisfies_all && !conditions.is_empty() {
            out.push((root, matching));
        }
        if let Some(limit) = limit {
            if out.len() as i64 >= limit {
                break;
            }
        }
    }
    Ok(out)
}

impl Store {
    pub fn create_item(
        &self,
        list_id: i64,
        item_key: &str,
        content: &str,
        parent_item_id: Option<i64>,
        position: i64,
        metadata: &crate::model::Metadata,
    ) -> Result<TodoItem> {
        create_item(&self.conn, list_id, item_key, content, parent_item_id, position, metadata)
    }

    pub fn get_item_by_id(&self, id: i64) -> Result<Option<TodoItem>> {
        get_item_by_id(&self.conn, id)
    }

    pub fn get_item_by_key_and_parent(
        &self,
        list_id: i64,
        item_key: &str,
        parent_item_id: Option<i64>,
    ) -> Result<Option<TodoItem>> {
        get_item_by_key_and_parent(&self.conn, list_id, item_key, parent_item_id)
    }

    pub fn get_item_by_key(&self, list_id: i64, item_key: &str) -> Result<Option<TodoItem>> {
        get_item_by_key(&self.conn, list_id, item_key)
    }

    pub fn get_list_items(
        &self,
        list_id: i64,
        status: Option<ItemStatus>,
        limit: Option<i64>,
    ) -> Result<Vec<TodoItem>> {
        get_list_items(&self.conn, list_id, status, limit)
    }

    pub fn update_item(
        &self,
        id: i64,
        content: Option<&str>,
        status: Option<ItemStatus>,
        completion_states: Option<&crate::model::CompletionStates>,
        metadata: Option<&crate::model::Metadata>,
        started_at: Option<Option<chrono::DateTime<chrono::Utc>>>,
        completed_at: Option<Option<chrono::DateTime<chrono::Utc>>>,
    ) -> Result<Option<TodoItem>> {
        update_item(&self.conn, id, content, status, completion_states, metadata, started_at, completed_at)
    }

    pub fn set_item_parent_and_position(
        &self,
        id: i64,
        parent_item_id: Option<i64>,
        position: i64,
    ) -> Result<()> {
        set_item_parent_and_position(&self.conn, id, parent_item_id, position)
    }

    /// Standalone atomic delete. Façade callers inside a larger transaction
    /// call the free function `delete_item` directly against their own
    /// `Transaction` instead of going through this wrapper.
    pub fn delete_item(&self, id: i64) -> Result<bool> {
        self.with_transaction(|tx| delete_item(tx, id))
    }

    pub fn get_next_position(&self, list_id: i64, parent_item_id: Option<i64>) -> Result<i64> {
        get_next_position(&self.conn, list_id, parent_item_id)
    }

    pub fn get_item_children(&self, id: i64) -> Result<Vec<TodoItem>> {
        get_item_children(&self.conn, id)
    }

    pub fn get_root_items(&self, list_id: i64) -> Result<Vec<TodoItem>> {
        get_root_items(&self.conn, list_id)
    }

    pub fn get_children_status_summary(&self, id: i64) -> Result<ChildrenStatusSummary> {
        get_children_status_summary(&self.conn, id)
    }

    pub fn has_pending_children(&self, id: i64) -> Result<bool> {
        has_pending_children(&self.conn, id)
    }

    pub fn has_any_children(&self, id: i64) -> Result<bool> {
        has_any_children(&self.conn, id)
    }

    pub fn get_item_depth(&self, id: i64) -> Result<u32> {
        get_item_depth(&self.conn, id)
    }

    pub fn get_item_path(&self, id: i64) -> Result<Vec<TodoItem>> {
        get_item_path(&self.conn, id)
    }

    pub fn item_hierarchy_stats(&self, id: i64) -> Result<HierarchyStats> {
        item_hierarchy_stats(&self.conn, id)
    }

    pub fn find_items_by_property(
        &self,
        list_id: i64,
        key: &str,
        value: &str,
        limit: Option<i64>,
    ) -> Result<Vec<TodoItem>> {
        find_items_by_property(&self.conn, list_id, key, value, limit)
    }

    pub fn find_subitems_by_status(
        &self,
        list_id: i64,
        conditions: &HashMap<String, ItemStatus>,
        limit: Option<i64>,
    ) -> Result<Vec<(TodoItem, Vec<TodoItem>)>> {
        find_subitems_by_status(&self.conn, list_id, conditions, limit)
    }
}
