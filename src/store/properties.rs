use rusqlite::{Connection, OptionalExtension, params};

use crate::error::Result;
use crate::model::{ItemProperty, ListProperty};

use super::Store;

pub(crate) fn set_item_property(conn: &Connection, item_id: i64, key: &str, value: &str) -> Result<ItemProperty> {
    conn.execute(
        "INSERT INTO item_properties (item_id, property_key, property_value) VALUES (?1, ?2, ?3)
         ON CONFLICT(item_id, property_key) DO UPDATE SET property_value = excluded.property_value",
        params![item_id, key, value],
    )?;
    get_item_property(conn, item_id, key)?
        .ok_or_else(|| crate::error::TodoError::StorageFailure("property vanished after upsert".into()))
}

pub(crate) fn get_item_property(conn: &Connection, item_id: i64, key: &str) -> Result<Option<ItemProperty>> {
    let mut stmt = conn.prepare(
        "SELECT id, item_id, property_key, property_value FROM item_properties WHERE item_id = ?1 AND property_key = ?2",
    )?;
    Ok(stmt
        .query_row(params![item_id, key], |r| {
            Ok(ItemProperty {
                id: r.get(0)?,
                item_id: r.get(1)?,
                property_key: r.get(2)?,
                property_value: r.get(3)?,
            })
        })
        .optional()?)
}

pub(crate) fn list_item_properties(conn: &Connection, item_id: i64) -> Result<Vec<ItemProperty>> {
    let mut stmt = conn.prepare(
        "SELECT id, item_id, property_key, property_value FROM item_properties WHERE item_id = ?1 ORDER BY property_key",
    )?;
    let props = stmt
        .query_map(params![item_id], |r| {
            Ok(ItemProperty {
                id: r.get(0)?,
                item_id: r.get(1)?,
                property_key: r.get(2)?,
                property_value: r.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(props)
}

pub(crate) fn delete_item_property(conn: &Connection, item_id: i64, key: &str) -> Result<bool> {
    let n = conn.execute(
        "DELETE FROM item_properties WHERE item_id = ?1 AND property_key = ?2",
        params![item_id, key],
    )?;
    Ok(n > 0)
}

pub(crate) fn set_list_property(conn: &Connection, list_id: i64, key: &str, value: &str) -> Result<ListProperty> {
    conn.execute(
        "INSERT INTO list_properties (list_id, property_key, property_value) VALUES (?1, ?2, ?3)
         ON CONFLICT(list_id, property_key) DO UPDATE SET property_value = excluded.property_value",
        params![list_id, key, value],
    )?;
    get_list_property(conn, list_id, key)?
        .ok_or_else(|| crate::error::TodoError::StorageFailure("property vanished after upsert".into()))
}

pub(crate) fn get_list_property(conn: &Connection, list_id: i64, key: &str) -> Result<Option<ListProperty>> {
    let mut stmt = conn.prepare(
        "SELECT id, list_id, property_key, property_value FROM list_properties WHERE list_id = ?1 AND property_key = ?2",
    )?;
    Ok(stmt
        .query_row(params![list_id, key], |r| {
            Ok(ListProperty {
                id: r.get(0)?,
                list_id: r.get(1)?,
                property_key: r.get(2)?,
                property_value: r.get(3)?,
            })
        })
        .optional()?)
}

pub(crate) fn list_list_properties(conn: &Connection, list_id: i64) -> Result<Vec<ListProperty>> {
    let mut stmt = conn.prepare(
        "SELECT id, list_id, property_key, property_value FROM list_properties WHERE list_id = ?1 ORDER BY property_key",
    )?;
    let props = stmt
        .query_map(params![list_id], |r| {
            Ok(ListProperty {
                id: r.get(0)?,
                list_id: r.get(1)?,
                property_key: r.get(2)?,
                property_value: r.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(props)
}

pub(crate) fn delete_list_property(conn: &Connection, list_id: i64, key: &str) -> Result<bool> {
    let n = conn.execute(
        "DELETE FROM list_properties WHERE list_id = ?1 AND property_key = ?2",
        params![list_id, key],
    )?;
    Ok(n > 0)
}

impl Store {
    pub fn set_item_property(&self, item_id: i64, key: &str, value: &str) -> Result<ItemProperty> {
        set_item_property(&self.conn, item_id, key, value)
    }

    pub fn get_item_property(&self, item_id: i64, key: &str) -> Result<Option<ItemProperty>> {
        get_item_property(&self.conn, item_id, key)
    }

    pub fn list_item_properties(&self, item_id: i64) -> Result<Vec<ItemProperty>> {
        list_item_properties(&self.conn, item_id)
    }

    pub fn delete_item_property(&self, item_id: i64, key: &str) -> Result<bool> {
        delete_item_property(&self.conn, item_id, key)
    }

    pub fn set_list_property(&self, list_id: i64, key: &str, value: &str) -> Result<ListProperty> {
        set_list_property(&self.conn, list_id, key, value)
    }

    pub fn get_list_property(&self, list_id: i64, key: &str) -> Result<Option<ListProperty>> {
        get_list_property(&self.conn, list_id, key)
    }

    pub fn list_list_properties(&self, list_id: i64) -> Result<Vec<ListProperty>> {
        list_list_properties(&self.conn, list_id)
    }

    pub fn delete_list_property(&self, list_id: i64, key: &str) -> Result<bool> {
        delete_list_property(&self.conn, list_id, key)
    }
}
