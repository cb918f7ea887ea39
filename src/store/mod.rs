//! Relational persistence layer (§4.1, §6 "Persisted state layout").
//!
//! A single `rusqlite::Connection` owned by `Store`, schema created
//! idempotently at open (`CREATE TABLE IF NOT EXISTS` — the forward-only
//! "schema-level migration" spec.md calls for), `WITH RECURSIVE` CTEs for
//! cycle/ancestor checks, explicit short transactions per mutating
//! operation. Grounded in the teacher's `store/index.rs`, generalized from
//! a single `tasks` table to the full List/Item/Property/Tag/Dependency/
//! History schema this engine needs.

pub(crate) mod dependencies;
pub(crate) mod history;
pub(crate) mod items;
pub(crate) mod lists;
pub(crate) mod properties;
pub(crate) mod tags;

use std::path::Path;

use rusqlite::{Connection, Transaction};

use crate::error::Result;

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Self { conn };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Runs `f` against one `rusqlite` transaction, committing on `Ok` and
    /// rolling back on `Err` (an uncommitted `Transaction` rolls back on
    /// drop). Every façade operation in `manager.rs` that writes a row and
    /// records history runs the whole sequence — business-rule writes,
    /// status synchronization, and the history insert — through this one
    /// transaction, per spec.md §4.7/§5 and §8 invariant 5: a
    /// `StorageFailure` partway through leaves storage exactly as it was.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// The persisted schema (§6 "Persisted state layout"), exposed for the
/// `schema` CLI command as well as `create_schema`.
pub const SCHEMA_SQL: &str = "CREATE TABLE IF NOT EXISTS todo_lists (
                id INTEGER PRIMARY KEY,
                list_key TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                description TEXT,
                list_type TEXT NOT NULL DEFAULT 'sequential',
                status TEXT NOT NULL DEFAULT 'active',
                metadata_json TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_todo_lists_list_key ON todo_lists(list_key);

            CREATE TABLE IF NOT EXISTS todo_items (
                id INTEGER PRIMARY KEY,
                list_id INTEGER NOT NULL REFERENCES todo_lists(id),
                item_key TEXT NOT NULL,
                content TEXT NOT NULL,
                position INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                completion_states_json TEXT NOT NULL DEFAULT '{}',
                parent_item_id INTEGER REFERENCES todo_items(id),
                metadata_json TEXT NOT NULL DEFAULT '{}',
                started_at TEXT,
                completed_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(list_id, parent_item_id, item_key)
            );
            CREATE INDEX IF NOT EXISTS idx_todo_items_list_status ON todo_items(list_id, status);
            CREATE INDEX IF NOT EXISTS idx_todo_items_list_position ON todo_items(list_id, position);
            CREATE INDEX IF NOT EXISTS idx_todo_items_parent_status ON todo_items(parent_item_id, status);

            CREATE TABLE IF NOT EXISTS list_properties (
                id INTEGER PRIMARY KEY,
                list_id INTEGER NOT NULL REFERENCES todo_lists(id),
                property_key TEXT NOT NULL,
                property_value TEXT NOT NULL,
                UNIQUE(list_id, property_key)
            );

            CREATE TABLE IF NOT EXISTS item_properties (
                id INTEGER PRIMARY KEY,
                item_id INTEGER NOT NULL REFERENCES todo_items(id),
                property_key TEXT NOT NULL,
                property_value TEXT NOT NULL,
                UNIQUE(item_id, property_key)
            );
            CREATE INDEX IF NOT EXISTS idx_item_properties_key_value ON item_properties(property_key, property_value);

            CREATE TABLE IF NOT EXISTS list_tags (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                color TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS list_tag_assignments (
                id INTEGER PRIMARY KEY,
                list_id INTEGER NOT NULL REFERENCES todo_lists(id),
                tag_id INTEGER NOT NULL REFERENCES list_tags(id),
                assigned_at TEXT NOT NULL,
                UNIQUE(list_id, tag_id)
            );

            CREATE TABLE IF NOT EXISTS item_dependencies (
                id INTEGER PRIMARY KEY,
                dependent_item_id INTEGER NOT NULL REFERENCES todo_items(id),
                required_item_id INTEGER NOT NULL REFERENCES todo_items(id),
                dependency_type TEXT NOT NULL DEFAULT 'blocks',
                metadata_json TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                UNIQUE(dependent_item_id, required_item_id)
            );

            CREATE TABLE IF NOT EXISTS todo_history (
                id INTEGER PRIMARY KEY,
                item_id INTEGER,
                list_id INTEGER,
                action TEXT NOT NULL,
                old_value_json TEXT,
                new_value_json TEXT,
                user_context TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_todo_history_item ON todo_history(item_id);
            CREATE INDEX IF NOT EXISTS idx_todo_history_list ON todo_history(list_id);
            CREATE INDEX IF NOT EXISTS idx_todo_history_timestamp ON todo_history(timestamp);";

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub(crate) fn parse_ts(s: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now())
}

pub(crate) fn json_to_map(s: &str) -> crate::model::Metadata {
    serde_json::from_str(s).unwrap_or_default()
}
