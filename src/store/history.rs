use rusqlite::{Connection, OptionalExtension, params};

use crate::error::Result;
use crate::model::HistoryEntry;

use super::{now_rfc3339, parse_ts};
use super::Store;

/// Append-only: there is no update or delete for history rows (§4.6).
/// Runs against whatever `conn` it is given — a bare `&Store::conn()` for
/// standalone use, or the same `&Transaction` a façade mutation is using,
/// so the history row commits or rolls back with the mutation it records
/// (§4.7, §5, §8 invariant 5).
pub(crate) fn create_history_entry(
    conn: &Connection,
    item_id: Option<i64>,
    list_id: Option<i64>,
    action: &str,
    old_value: Option<&serde_json::Value>,
    new_value: Option<&serde_json::Value>,
    user_context: &str,
) -> Result<HistoryEntry> {
    let now = now_rfc3339();
    let old_json = old_value.map(serde_json::to_string).transpose()?;
    let new_json = new_value.map(serde_json::to_string).transpose()?;
    conn.execute(
        "INSERT INTO todo_history (item_id, list_id, action, old_value_json, new_value_json, user_context, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![item_id, list_id, action, old_json, new_json, user_context, now],
    )?;
    let id = conn.last_insert_rowid();
    get_history_entry(conn, id)?
        .ok_or_else(|| crate::error::TodoError::StorageFailure("history entry vanished after insert".into()))
}

pub(crate) fn get_history_entry(conn: &Connection, id: i64) -> Result<Option<HistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, item_id, list_id, action, old_value_json, new_value_json, user_context, timestamp FROM todo_history WHERE id = ?1",
    )?;
    Ok(stmt.query_row(params![id], row_to_history).optional()?)
}

/// Newest-first, matching the original's audit-trail read pattern.
pub(crate) fn get_item_history(conn: &Connection, item_id: i64, limit: Option<i64>) -> Result<Vec<HistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, item_id, list_id, action, old_value_json, new_value_json, user_context, timestamp
         FROM todo_history WHERE item_id = ?1 ORDER BY timestamp DESC, id DESC",
    )?;
    let mut rows = stmt
        .query_map(params![item_id], row_to_history)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if let Some(limit) = limit {
        rows.truncate(limit.max(0) as usize);
    }
    Ok(rows)
}

pub(crate) fn get_list_history(conn: &Connection, list_id: i64, limit: Option<i64>) -> Result<Vec<HistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, item_id, list_id, action, old_value_json, new_value_json, user_context, timestamp
         FROM todo_history WHERE list_id = ?1 ORDER BY timestamp DESC, id DESC",
    )?;
    let mut rows = stmt
        .query_map(params![list_id], row_to_history)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if let Some(limit) = limit {
        rows.truncate(limit.max(0) as usize);
    }
    Ok(rows)
}

impl Store {
    pub fn create_history_entry(
        &self,
        item_id: Option<i64>,
        list_id: Option<i64>,
        action: &str,
        old_value: Option<&serde_json::Value>,
        new_value: Option<&serde_json::Value>,
        user_context: &str,
    ) -> Result<HistoryEntry> {
        create_history_entry(&self.conn, item_id, list_id, action, old_value, new_value, user_context)
    }

    pub fn get_history_entry(&self, id: i64) -> Result<Option<HistoryEntry>> {
        get_history_entry(&self.conn, id)
    }

    pub fn get_item_history(&self, item_id: i64, limit: Option<i64>) -> Result<Vec<HistoryEntry>> {
        get_item_history(&self.conn, item_id, limit)
    }

    pub fn get_list_history(&self, list_id: i64, limit: Option<i64>) -> Result<Vec<HistoryEntry>> {
        get_list_history(&self.conn, list_id, limit)
    }
}

fn row_to_history(row: &rusqlite::Row) -> rusqlite::Result<HistoryEntry> {
    let old_json: Option<String> = row.get("old_value_json")?;
    let new_json: Option<String> = row.get("new_value_json")?;
    let ts: String = row.get("timestamp")?;
    Ok(HistoryEntry {
        id: row.get("id")?,
        item_id: row.get("item_id")?,
        list_id: row.get("list_id")?,
        action: row.get("action")?,
        old_value: old_json.and_then(|s| serde_json::from_str(&s).ok()),
        new_value: new_json.and_then(|s| serde_json::from_str(&s).ok()),
        user_context: row.get("user_context")?,
        timestamp: parse_ts(&ts),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ListType;
    use std::collections::HashMap;

    #[test]
    fn append_and_read_item_history() {
        let store = Store::open_in_memory().unwrap();
        let list = store.create_list("l1", "L1", None, ListType::Sequential, &HashMap::new()).unwrap();
        let item = store.create_item(list.id, "a", "A", None, 1, &HashMap::new()).unwrap();
        store
            .create_history_entry(Some(item.id), Some(list.id), "created", None, None, "cli")
            .unwrap();
        store
            .create_history_entry(
                Some(item.id),
                Some(list.id),
                "status_changed",
                Some(&serde_json::json!("pending")),
                Some(&serde_json::json!("completed")),
                "cli",
            )
            .unwrap();
        let history = store.get_item_history(item.id, None).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, "status_changed");
    }

    #[test]
    fn list_history_scoped_to_list() {
        let store = Store::open_in_memory().unwrap();
        let list = store.create_list("l1", "L1", None, ListType::Sequential, &HashMap::new()).unwrap();
        store
            .create_history_entry(None, Some(list.id), "list_created", None, None, "cli")
            .unwrap();
        let history = store.get_list_history(list.id, None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].item_id, None);
    }

    #[test]
    fn history_limit_truncates() {
        let store = Store::open_in_memory().unwrap();
        let list = store.create_list("l1", "L1", None, ListType::Sequential, &HashMap::new()).unwrap();
        for i in 0..5 {
            store
                .create_history_entry(None, Some(list.id), &format!("action_{i}"), None, None, "cli")
                .unwrap();
        }
        let history = store.get_list_history(list.id, Some(2)).unwrap();
        assert_eq!(history.len(), 2);
    }
}
