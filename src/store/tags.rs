use rusqlite::{Connection, OptionalExtension, params};

use crate::error::Result;
use crate::model::{ListTagAssignment, Tag, TodoList};

use super::{now_rfc3339, parse_ts};
use super::Store;

pub(crate) fn create_tag(conn: &Connection, name: &str, color: &str) -> Result<Tag> {
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO list_tags (name, color, created_at) VALUES (?1, ?2, ?3)",
        params![name, color, now],
    )?;
    let id = conn.last_insert_rowid();
    get_tag_by_id(conn, id)?.ok_or_else(|| crate::error::TodoError::StorageFailure("tag vanished after insert".into()))
}

pub(crate) fn get_tag_by_id(conn: &Connection, id: i64) -> Result<Option<Tag>> {
    let mut stmt = conn.prepare("SELECT id, name, color, created_at FROM list_tags WHERE id = ?1")?;
    Ok(stmt.query_row(params![id], row_to_tag).optional()?)
}

pub(crate) fn get_tag_by_name(conn: &Connection, name: &str) -> Result<Option<Tag>> {
    let mut stmt = conn.prepare("SELECT id, name, color, created_at FROM list_tags WHERE name = ?1")?;
    Ok(stmt.query_row(params![name], row_to_tag).optional()?)
}

/// All tags, ordered by name — the order the §4.5 positional palette
/// assignment is computed over.
pub(crate) fn list_tags(conn: &Connection) -> Result<Vec<Tag>> {
    let mut stmt = conn.prepare("SELECT id, name, color, created_at FROM list_tags ORDER BY name")?;
    let tags = stmt.query_map([], row_to_tag)?.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tags)
}

pub(crate) fn tag_count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM list_tags", [], |r| r.get(0))?)
}

/// Removes the tag and all its assignments (§3 ownership rules). Issues
/// its deletes directly against `conn`; see `delete_item`'s analogous
/// note on why no transaction is opened here.
pub(crate) fn delete_tag(conn: &Connection, id: i64) -> Result<bool> {
    if get_tag_by_id(conn, id)?.is_none() {
        return Ok(false);
    }
    conn.execute("DELETE FROM list_tag_assignments WHERE tag_id = ?1", params![id])?;
    conn.execute("DELETE FROM list_tags WHERE id = ?1", params![id])?;
    Ok(true)
}

pub(crate) fn assign_tag(conn: &Connection, list_id: i64, tag_id: i64) -> Result<ListTagAssignment> {
    let now = now_rfc3339();
    conn.execute(
        "INSERT OR IGNORE INTO list_tag_assignments (list_id, tag_id, assigned_at) VALUES (?1, ?2, ?3)",
        params![list_id, tag_id, now],
    )?;
    Ok(ListTagAssignment {
        list_id,
        tag_id,
        assigned_at: parse_ts(&now),
    })
}

pub(crate) fn remove_tag_assignment(conn: &Connection, list_id: i64, tag_id: i64) -> Result<bool> {
    let n = conn.execute(
        "DELETE FROM list_tag_assignments WHERE list_id = ?1 AND tag_id = ?2",
        params![list_id, tag_id],
    )?;
    Ok(n > 0)
}

pub(crate) fn tags_for_list(conn: &Connection, list_id: i64) -> Result<Vec<Tag>> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.name, t.color, t.created_at FROM list_tags t
         JOIN list_tag_assignments a ON a.tag_id = t.id
         WHERE a.list_id = ?1 ORDER BY t.name",
    )?;
    let tags = stmt.query_map(params![list_id], row_to_tag)?.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tags)
}

/// OR semantics: lists carrying at least one of `names`.
pub(crate) fn get_lists_by_tags_any(conn: &Connection, names: &[String]) -> Result<Vec<TodoList>> {
    if names.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = names.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT DISTINCT l.id, l.list_key, l.title, l.description, l.list_type, l.status, l.metadata_json, l.created_at, l.updated_at
         FROM todo_lists l
         JOIN list_tag_assignments a ON a.list_id = l.id
         JOIN list_tags t ON t.id = a.tag_id
         WHERE t.name IN ({placeholders})"
    );
    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::ToSql> = names.iter().map(|n| n as &dyn rusqlite::ToSql).collect();
    let mut lists = stmt
        .query_map(params.as_slice(), super::lists::row_to_list)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    crate::natural_sort::sort_by_natural_key(&mut lists, |l| l.list_key.as_str());
    Ok(lists)
}

/// AND semantics: lists carrying ALL of `names`. Used by the
/// force-tags predicate.
pub(crate) fn get_lists_by_tags_all(conn: &Connection, names: &[String]) -> Result<Vec<TodoList>> {
    if names.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = names.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT l.id, l.list_key, l.title, l.description, l.list_type, l.status, l.metadata_json, l.created_at, l.updated_at
         FROM todo_lists l
         WHERE (
            SELECT COUNT(DISTINCT t.name) FROM list_tag_assignments a
            JOIN list_tags t ON t.id = a.tag_id
            WHERE a.list_id = l.id AND t.name IN ({placeholders})
         ) = ?"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut bound: Vec<&dyn rusqlite::ToSql> = names.iter().map(|n| n as &dyn rusqlite::ToSql).collect();
    let count = names.len() as i64;
    bound.push(&count);
    let mut lists = stmt
        .query_map(bound.as_slice(), super::lists::row_to_list)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    crate::natural_sort::sort_by_natural_key(&mut lists, |l| l.list_key.as_str());
    Ok(lists)
}

impl Store {
    pub fn create_tag(&self, name: &str, color: &str) -> Result<Tag> {
        create_tag(&self.conn, name, color)
    }

    pub fn get_tag_by_id(&self, id: i64) -> Result<Option<Tag>> {
        get_tag_by_id(&self.conn, id)
    }

    pub fn get_tag_by_name(&self, name: &str) -> Result<Option<Tag>> {
        get_tag_by_name(&self.conn, name)
    }

    pub fn list_tags(&self) -> Result<Vec<Tag>> {
        list_tags(&self.conn)
    }

    pub fn tag_count(&self) -> Result<i64> {
        tag_count(&self.conn)
    }

    /// Standalone atomic delete; façade callers inside a larger transaction
    /// call the free function `delete_tag` against their own `Transaction`.
    pub fn delete_tag(&self, id: i64) -> Result<bool> {
        self.with_transaction(|tx| delete_tag(tx, id))
    }

    pub fn assign_tag(&self, list_id: i64, tag_id: i64) -> Result<ListTagAssignment> {
        assign_tag(&self.conn, list_id, tag_id)
    }

    pub fn remove_tag_assignment(&self, list_id: i64, tag_id: i64) -> Result<bool> {
        remove_tag_assignment(&self.conn, list_id, tag_id)
    }

    pub fn tags_for_list(&self, list_id: i64) -> Result<Vec<Tag>> {
        tags_for_list(&self.conn, list_id)
    }

    pub fn get_lists_by_tags_any(&self, names: &[String]) -> Result<Vec<TodoList>> {
        get_lists_by_tags_any(&self.conn, names)
    }

    pub fn get_lists_by_tags_all(&self, names: &[String]) -> Result<Vec<TodoList>> {
        get_lists_by_tags_all(&self.conn, names)
    }
}

fn row_to_tag(row: &rusqlite::Row) -> rusqlite::Result<Tag> {
    let created: String = row.get("created_at")?;
    Ok(Tag {
        id: row.get("id")?,
        name: row.get("name")?,
        color: row.get("color")?,
        created_at: parse_ts(&created),
    })
}
