//! Cross-item `blocks`/`requires`/`related` edges (§4.4). Cycle detection
//! and enforced-vs-informational typing live on `Store`
//! (`store::dependencies`); this module adds the composition rules the
//! Selection Engine and façade consume.
//!
//! `add_dependency`/`remove_dependency` take `conn: &Connection` so a
//! façade mutation can record its history entry in the same transaction as
//! the edge write (spec.md §4.7/§5, §8 invariant 5).

use rusqlite::Connection;

use crate::error::Result;
use crate::model::{DependencyType, ItemDependency, Metadata, TodoItem};
use crate::store::dependencies;
use crate::store::items;

pub fn add_dependency(
    conn: &Connection,
    dependent_item_id: i64,
    required_item_id: i64,
    dependency_type: DependencyType,
    metadata: &Metadata,
) -> Result<ItemDependency> {
    dependencies::create_item_dependency(conn, dependent_item_id, required_item_id, dependency_type, metadata)
}

pub fn remove_dependency(conn: &Connection, dependent_item_id: i64, required_item_id: i64) -> Result<bool> {
    dependencies::delete_item_dependency(conn, dependent_item_id, required_item_id)
}

/// `true` iff no unfinished blocker and no unfinished subitem stands in
/// the way of starting `item_id` (§4.4).
pub fn can_start_item(conn: &Connection, item_id: i64) -> Result<bool> {
    if dependencies::is_item_blocked(conn, item_id)? {
        return Ok(false);
    }
    let summary = items::get_children_status_summary(conn, item_id)?;
    if summary.total > 0 && summary.completed < summary.total {
        return Ok(false);
    }
    Ok(true)
}

/// Solely a function of subitem completion — an item with any
/// non-`completed` child cannot be completed (and, per the Hierarchy
/// Engine, is derived-status anyway so this rarely needs an explicit
/// check outside of defensive callers).
pub fn can_complete_item(conn: &Connection, item_id: i64) -> Result<bool> {
    let summary = items::get_children_status_summary(conn, item_id)?;
    Ok(summary.total == 0 || summary.completed == summary.total)
}

/// Human-readable summary of why `item_id` can't start yet, grounded in
/// the original's `_get_blocking_reason`. Advisory only.
pub fn describe_blocking(blockers: &[TodoItem], pending_subtasks: &[TodoItem]) -> String {
    let mut parts = Vec::new();
    if !blockers.is_empty() {
        parts.push(format!("blocked by {} dependency(ies)", blockers.len()));
    }
    if !pending_subtasks.is_empty() {
        parts.push(format!("{} pending subtask(s)", pending_subtasks.len()));
    }
    if parts.is_empty() {
        "not blocked".to_string()
    } else {
        format!("blocked: {}", parts.join(" and "))
    }
}
