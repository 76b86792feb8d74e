#![forbid(unsafe_code)]

use super::StoreError;
use arbor_core::Hierarchy;
use rusqlite::{Connection, OptionalExtension, params};

const SCHEMA_VERSION: &str = "1";

const SQL: &str = r#"
        CREATE TABLE IF NOT EXISTS meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        -- One row per node of every tree. Rows are only removed by a tombstone
        -- purge; children go with their parent.
        CREATE TABLE IF NOT EXISTS nodes (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          parent_id INTEGER REFERENCES nodes(id) ON DELETE CASCADE,
          level INTEGER NOT NULL CHECK (level >= 0 AND level < 256),
          created_at_ms INTEGER NOT NULL,
          last_modified_ms INTEGER NOT NULL,
          deleted_at_ms INTEGER,
          order_value REAL,
          fields_json TEXT NOT NULL,
          CHECK (deleted_at_ms IS NULL OR deleted_at_ms >= created_at_ms)
        );

        CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_id, order_value, id);
        CREATE INDEX IF NOT EXISTS idx_nodes_deleted ON nodes(deleted_at_ms)
          WHERE deleted_at_ms IS NOT NULL;
"#;

pub(super) fn install_schema(conn: &Connection, hierarchy: &Hierarchy) -> Result<(), StoreError> {
    conn.execute_batch(SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
        params!["schema_version", SCHEMA_VERSION],
    )?;
    hierarchy_gate(conn, hierarchy)
}

/// A database is bound to the level chain it was created with; opening it with
/// a different one would misread every stored level.
fn hierarchy_gate(conn: &Connection, hierarchy: &Hierarchy) -> Result<(), StoreError> {
    let expected = serde_json::to_string(hierarchy)?;
    let stored: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'hierarchy'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    match stored {
        None => {
            conn.execute(
                "INSERT INTO meta(key, value) VALUES ('hierarchy', ?1)",
                params![expected],
            )?;
            Ok(())
        }
        Some(stored) if stored == expected => Ok(()),
        Some(stored) => Err(StoreError::HierarchyMismatch { expected, stored }),
    }
}
