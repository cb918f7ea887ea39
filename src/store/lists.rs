use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::{Result, TodoError};
use crate::model::{ListStatus, ListType, TodoList};
use crate::natural_sort::sort_by_natural_key;

use super::{Store, json_to_map, now_rfc3339, parse_ts};

pub(super) fn row_to_list(row: &Row) -> rusqlite::Result<TodoList> {
    let status_str: String = row.get("status")?;
    let metadata_str: String = row.get("metadata_json")?;
    let created: String = row.get("created_at")?;
    let updated: String = row.get("updated_at")?;
    Ok(TodoList {
        id: row.get("id")?,
        list_key: row.get("list_key")?,
        title: row.get("title")?,
        description: row.get("description")?,
        list_type: ListType::Sequential,
        status: status_str.parse().unwrap_or(ListStatus::Active),
        metadata: json_to_map(&metadata_str),
        created_at: parse_ts(&created),
        updated_at: parse_ts(&updated),
    })
}

const LIST_COLUMNS: &str = "id, list_key, title, description, list_type, status, metadata_json, created_at, updated_at";

pub(crate) fn create_list(
    conn: &Connection,
    list_key: &str,
    title: &str,
    description: Option<&str>,
    list_type: ListType,
    metadata: &crate::model::Metadata,
) -> Result<TodoList> {
    if get_list_by_key(conn, list_key)?.is_some() {
        return Err(TodoError::DuplicateListKey(list_key.to_string()));
    }
    let now = now_rfc3339();
    let metadata_json = serde_json::to_string(metadata)?;
    conn.execute(
        "INSERT INTO todo_lists (list_key, title, description, list_type, status, metadata_json, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?6, ?6)",
        params![list_key, title, description, list_type.to_string(), metadata_json, now],
    )?;
    let id = conn.last_insert_rowid();
    get_list_by_id(conn, id)?.ok_or_else(|| TodoError::StorageFailure("list vanished after insert".into()))
}

pub(crate) fn get_list_by_id(conn: &Connection, id: i64) -> Result<Option<TodoList>> {
    let mut stmt = conn.prepare(&format!("SELECT {LIST_COLUMNS} FROM todo_lists WHERE id = ?1"))?;
    Ok(stmt.query_row(params![id], row_to_list).optional()?)
}

pub(crate) fn get_list_by_key(conn: &Connection, list_key: &str) -> Result<Option<TodoList>> {
    let mut stmt = conn.prepare(&format!("SELECT {LIST_COLUMNS} FROM todo_lists WHERE list_key = ?1"))?;
    Ok(stmt.query_row(params![list_key], row_to_list).optional()?)
}

pub(crate) fn list_all(conn: &Connection, limit: Option<i64>) -> Result<Vec<TodoList>> {
    let mut stmt = conn.prepare(&format!("SELECT {LIST_COLUMNS} FROM todo_lists"))?;
    let mut lists = stmt
        .query_map([], row_to_list)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    sort_by_natural_key(&mut lists, |l| l.list_key.as_str());
    if let Some(limit) = limit {
        lists.truncate(limit.max(0) as usize);
    }
    Ok(lists)
}

/// Update a list's `title`/`description`/`status`/`metadata`. Passing
/// `None` for a field leaves it unchanged.
pub(crate) fn update_list(
    conn: &Connection,
    id: i64,
    title: Option<&str>,
    description: Option<Option<&str>>,
    status: Option<ListStatus>,
    metadata: Option<&crate::model::Metadata>,
) -> Result<Option<TodoList>> {
    let Some(current) = get_list_by_id(conn, id)? else {
        return Ok(None);
    };
    let new_title = title.unwrap_or(&current.title);
    let new_description = match description {
        Some(d) => d.map(|s| s.to_string()),
        None => current.description.clone(),
    };
    let new_status = status.unwrap_or(current.status);
    let new_metadata_json = match metadata {
        Some(m) => serde_json::to_string(m)?,
        None => serde_json::to_string(&current.metadata)?,
    };
    let now = now_rfc3339();
    conn.execute(
        "UPDATE todo_lists SET title = ?1, description = ?2, status = ?3, metadata_json = ?4, updated_at = ?5 WHERE id = ?6",
        params![new_title, new_description, new_status.to_string(), new_metadata_json, now, id],
    )?;
    get_list_by_id(conn, id)
}

/// Cascades to items, item properties, list properties, tag
/// assignments, and history referencing the list, as owned by it (§3
/// ownership rules). Issues its deletes directly against `conn` without
/// opening its own transaction — see `delete_item`'s analogous note.
pub(crate) fn delete_list(conn: &Connection, id: i64) -> Result<bool> {
    if get_list_by_id(conn, id)?.is_none() {
        return Ok(false);
    }
    let item_ids: Vec<i64> = conn
        .prepare("SELECT id FROM todo_items WHERE list_id = ?1")?
        .query_map(params![id], |r| r.get(0))?
        .collect::<std::result::Result<_, _>>()?;
    for item_id in &item_ids {
        conn.execute(
            "DELETE FROM item_dependencies WHERE dependent_item_id = ?1 OR required_item_id = ?1",
            params![item_id],
        )?;
        conn.execute("DELETE FROM item_properties WHERE item_id = ?1", params![item_id])?;
        conn.execute("DELETE FROM todo_history WHERE item_id = ?1", params![item_id])?;
    }
    conn.execute("DELETE FROM todo_items WHERE list_id = ?1", params![id])?;
    conn.execute("DELETE FROM list_properties WHERE list_id = ?1", params![id])?;
    conn.execute("DELETE FROM list_tag_assignments WHERE list_id = ?1", params![id])?;
    conn.execute("DELETE FROM todo_history WHERE list_id = ?1", params![id])?;
    conn.execute("DELETE FROM todo_lists WHERE id = ?1", params![id])?;
    Ok(true)
}

impl Store {
    pub fn create_list(
        &self,
        list_key: &str,
        title: &str,
        description: Option<&str>,
        list_type: ListType,
        metadata: &crate::model::Metadata,
    ) -> Result<TodoList> {
        create_list(&self.conn, list_key, title, description, list_type, metadata)
    }

    pub fn get_list_by_id(&self, id: i64) -> Result<Option<TodoList>> {
        get_list_by_id(&self.conn, id)
    }

    pub fn get_list_by_key(&self, list_key: &str) -> Result<Option<TodoList>> {
        get_list_by_key(&self.conn, list_key)
    }

    pub fn list_all(&self, limit: Option<i64>) -> Result<Vec<TodoList>> {
        list_all(&self.conn, limit)
    }

    pub fn update_list(
        &self,
        id: i64,
        title: Option<&str>,
        description: Option<Option<&str>>,
        status: Option<ListStatus>,
        metadata: Option<&crate::model::Metadata>,
    ) -> Result<Option<TodoList>> {
        update_list(&self.conn, id, title, description, status, metadata)
    }

    /// Standalone atomic delete; façade callers inside a larger transaction
    /// call the free function `delete_list` against their own `Transaction`.
    pub fn delete_list(&self, id: i64) -> Result<bool> {
        self.with_transaction(|tx| delete_list(tx, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn create_and_fetch_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let list = store
            .create_list("proj1", "Project One", None, ListType::Sequential, &HashMap::new())
            .unwrap();
        assert_eq!(list.list_key, "proj1");
        let fetched = store.get_list_by_key("proj1").unwrap().unwrap();
        assert_eq!(fetched.id, list.id);
    }

    #[test]
    fn duplicate_key_rejected() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_list("dup", "One", None, ListType::Sequential, &HashMap::new())
            .unwrap();
        let err = store
            .create_list("dup", "Two", None, ListType::Sequential, &HashMap::new())
            .unwrap_err();
        assert_eq!(err.code(), "duplicate_key");
    }

    #[test]
    fn list_all_natural_order() {
        let store = Store::open_in_memory().unwrap();
        for key in ["scene_10", "scene_2", "scene_1"] {
            store
                .create_list(key, key, None, ListType::Sequential, &HashMap::new())
                .unwrap();
        }
        let keys: Vec<_> = store.list_all(None).unwrap().into_iter().map(|l| l.list_key).collect();
        assert_eq!(keys, vec!["scene_1", "scene_2", "scene_10"]);
    }

    #[test]
    fn delete_cascades_to_items() {
        let store = Store::open_in_memory().unwrap();
        let list = store
            .create_list("l1", "L1", None, ListType::Sequential, &HashMap::new())
            .unwrap();
        store
            .create_item(list.id, "i1", "content", None, 1, &HashMap::new())
            .unwrap();
        assert!(store.delete_list(list.id).unwrap());
        assert!(store.get_list_by_id(list.id).unwrap().is_none());
        assert!(store.get_list_items(list.id, None, None).unwrap().is_empty());
    }

    #[test]
    fn update_list_changes_only_given_fields() {
        let store = Store::open_in_memory().unwrap();
        let list = store
            .create_list("l1", "Title", Some("desc"), ListType::Sequential, &HashMap::new())
            .unwrap();
        let updated = store
            .update_list(list.id, None, None, Some(ListStatus::Archived), None)
            .unwrap()
            .unwrap();
        assert_eq!(updated.title, "Title");
        assert_eq!(updated.description.as_deref(), Some("desc"));
        assert_eq!(updated.status, ListStatus::Archived);
    }
}
