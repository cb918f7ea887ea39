//! Parent/child operations and status synchronization (§4.2).
//!
//! Leaf items carry a user-set status; non-leaf items carry a *derived*
//! one. Every operation that can change a leaf's status, position, or
//! parentage re-derives and propagates the affected ancestor chain(s) via
//! `sync`, ported from the pseudocode in `manager_helpers.py::_sync_parent_status`.
//!
//! Every function here takes `conn: &Connection` rather than `&Store` so a
//! façade mutation in `manager.rs` can pass its own open `&Transaction`
//! (which derefs to `&Connection`) straight through the whole
//! mutate-then-sync sequence — `sync`'s ancestor-chain writes land in the
//! same transaction as the leaf mutation that triggered them, per
//! spec.md:224 and §8 invariant 5.

use std::collections::HashSet;

use chrono::Utc;
use rusqlite::Connection;

use crate::error::{Result, TodoError};
use crate::model::{CompletionStates, ItemStatus, Metadata, TodoItem};
use crate::store::items;

/// Walks up from `parent_id`, re-deriving and writing status where it has
/// changed, stopping at the first ancestor whose status doesn't change or
/// at the root. `visited` guards against revisiting a node within one
/// propagation (defends a corrupted parent chain from looping forever).
pub fn sync(conn: &Connection, parent_id: Option<i64>, visited: &mut HashSet<i64>) -> Result<()> {
    let Some(parent_id) = parent_id else {
        return Ok(());
    };
    if !visited.insert(parent_id) {
        return Ok(());
    }
    let summary = items::get_children_status_summary(conn, parent_id)?;
    if summary.total == 0 {
        return Ok(());
    }
    let derived = summary.derive();
    let Some(parent) = items::get_item_by_id(conn, parent_id)? else {
        return Ok(());
    };
    if derived != parent.status {
        items::update_item(conn, parent_id, None, Some(derived), None, None, None, None)?;
        sync(conn, parent.parent_item_id, visited)?;
    }
    Ok(())
}

/// User-driven status change on a leaf item. Rejects with `HasChildren` if
/// `item_id` has any children — their status is derived, not settable
/// (§4.2). Applies the timestamp semantics (`started_at` set once,
/// `completed_at` set on every transition into `completed`) then
/// propagates the new status to ancestors.
pub fn update_item_status(
    conn: &Connection,
    item_id: i64,
    new_status: ItemStatus,
    completion_states: Option<&CompletionStates>,
) -> Result<TodoItem> {
    let Some(item) = items::get_item_by_id(conn, item_id)? else {
        return Err(TodoError::ItemNotFound {
            list: item_id.to_string(),
            item: item_id.to_string(),
        });
    };
    if items::has_any_children(conn, item_id)? {
        return Err(TodoError::HasChildren(item.item_key.clone()));
    }

    let now = Utc::now();
    let started_at = match (item.started_at, new_status) {
        (None, ItemStatus::InProgress) => Some(Some(now)),
        _ => None,
    };
    let completed_at = match new_status {
        ItemStatus::Completed => Some(Some(now)),
        _ => None,
    };

    items::update_item(
        conn,
        item_id,
        None,
        Some(new_status),
        completion_states,
        None,
        started_at,
        completed_at,
    )?;

    let mut visited = HashSet::new();
    sync(conn, item.parent_item_id, &mut visited)?;

    Ok(items::get_item_by_id(conn, item_id)?.expect("item just updated"))
}

/// Re-parents `item_id` under `new_parent_id` (or to root when `None`).
/// Rejects a move that would introduce a cycle in the parent chain, and
/// rejects moving across lists. On success both the old and new parent
/// chains are synchronized (§4.2).
pub fn move_to_subitem(conn: &Connection, item_id: i64, new_parent_id: Option<i64>) -> Result<TodoItem> {
    let Some(item) = items::get_item_by_id(conn, item_id)? else {
        return Err(TodoError::ItemNotFound {
            list: item_id.to_string(),
            item: item_id.to_string(),
        });
    };
    let old_parent_id = item.parent_item_id;

    if let Some(new_parent_id) = new_parent_id {
        if new_parent_id == item_id {
            return Err(TodoError::WouldCreateCycle);
        }
        let Some(new_parent) = items::get_item_by_id(conn, new_parent_id)? else {
            return Err(TodoError::ItemNotFound {
                list: item.list_id.to_string(),
                item: new_parent_id.to_string(),
            });
        };
        if new_parent.list_id != item.list_id {
            return Err(TodoError::InvalidArgument(
                "move_to_subitem cannot cross lists".into(),
            ));
        }
        // Would `new_parent_id` become a descendant of `item_id`? Walk the
        // candidate parent's path to root and check for `item_id`.
        let path = items::get_item_path(conn, new_parent_id)?;
        if path.iter().any(|i| i.id == item_id) {
            return Err(TodoError::WouldCreateCycle);
        }
    }

    let position = items::get_next_position(conn, item.list_id, new_parent_id)?;
    items::set_item_parent_and_position(conn, item_id, new_parent_id, position)?;

    let mut visited = HashSet::new();
    sync(conn, old_parent_id, &mut visited)?;
    sync(conn, new_parent_id, &mut visited)?;

    Ok(items::get_item_by_id(conn, item_id)?.expect("item just moved"))
}

/// Rejects deleting an item with children (§4.2, §8 invariant). On
/// success, synchronizes the old parent chain.
pub fn delete_item_checked(conn: &Connection, item_id: i64) -> Result<TodoItem> {
    let Some(item) = items::get_item_by_id(conn, item_id)? else {
        return Err(TodoError::ItemNotFound {
            list: item_id.to_string(),
            item: item_id.to_string(),
        });
    };
    if items::has_any_children(conn, item_id)? {
        return Err(TodoError::HasChildren(item.item_key.clone()));
    }
    items::delete_item(conn, item_id)?;
    let mut visited = HashSet::new();
    sync(conn, item.parent_item_id, &mut visited)?;
    Ok(item)
}

/// Inserts a new item and syncs the parent chain (a new pending child can
/// flip a `completed`/`pending` parent to `in_progress`... actually a new
/// `pending` child only ever widens the summary, so the common case is a
/// no-op; still run it for correctness when inserting under a non-`pending`
/// parent).
pub fn create_item_checked(
    conn: &Connection,
    list_id: i64,
    item_key: &str,
    content: &str,
    parent_item_id: Option<i64>,
    metadata: &Metadata,
) -> Result<TodoItem> {
    if let Some(parent_id) = parent_item_id {
        let Some(parent) = items::get_item_by_id(conn, parent_id)? else {
            return Err(TodoError::ItemNotFound {
                list: list_id.to_string(),
                item: parent_id.to_string(),
            });
        };
        if parent.list_id != list_id {
            return Err(TodoError::InvalidArgument(
                "parent_item_id must belong to the same list".into(),
            ));
        }
        if items::get_item_path(conn, parent_id)?.len() >= 10 {
            tracing::warn!(parent_id, "item depth cap reached while inserting a subitem");
        }
    }
    let position = items::get_next_position(conn, list_id, parent_item_id)?;
    let item = items::create_item(conn, list_id, item_key, content, parent_item_id, position, metadata)?;
    let mut visited = HashSet::new();
    sync(conn, parent_item_id, &mut visited)?;
    Ok(item)
}
