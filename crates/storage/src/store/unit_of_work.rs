#![forbid(unsafe_code)]

use super::StoreError;
use arbor_core::{Fields, Level, NodeRecord, NodeStore, ServerId, StoredNode, Timestamp};
use rusqlite::{Connection, OptionalExtension, Row, params};

const NODE_COLUMNS: &str = "id, parent_id, level, created_at_ms, last_modified_ms, deleted_at_ms, order_value, fields_json";

/// [`NodeStore`] over an open transaction. Every read and write goes through
/// the borrowed connection, so the caller's commit or rollback covers all of
/// them.
pub(super) struct UnitOfWork<'a> {
    conn: &'a Connection,
}

impl<'a> UnitOfWork<'a> {
    pub(super) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Ids of `root` and every descendant, root first.
    pub(super) fn subtree_ids(&self, root: ServerId) -> Result<Vec<ServerId>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id FROM nodes WHERE parent_id = ?1")?;
        let mut out = vec![root];
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let children = stmt
                .query_map(params![id.get()], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            for child in children {
                let child = server_id(child)?;
                out.push(child);
                stack.push(child);
            }
        }
        Ok(out)
    }

    /// Raises `last_modified` of every ancestor of `start` (inclusive) to at
    /// least `at`.
    pub(super) fn bump_chain(&mut self, start: Option<ServerId>, at: Timestamp) -> Result<usize, StoreError> {
        let mut bumped = 0;
        let mut cursor = start;
        while let Some(id) = cursor {
            let node = self.find_by_id(id)?.ok_or(StoreError::UnknownId(id))?;
            if node.record.last_modified < at {
                self.set_last_modified(id, at)?;
                bumped += 1;
            }
            cursor = node.record.parent_id;
        }
        Ok(bumped)
    }

    pub(super) fn hard_delete(&mut self, id: ServerId) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute("DELETE FROM nodes WHERE id = ?1", params![id.get()])?;
        if changed == 0 {
            return Err(StoreError::UnknownId(id));
        }
        Ok(())
    }
}

impl NodeStore for UnitOfWork<'_> {
    type Error = StoreError;

    fn find_by_id(&self, id: ServerId) -> Result<Option<StoredNode>, StoreError> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"),
                params![id.get()],
                RawNode::from_row,
            )
            .optional()?;
        raw.map(RawNode::into_stored).transpose()
    }

    fn find_many_by_parent(&self, parent: ServerId) -> Result<Vec<StoredNode>, StoreError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE parent_id = ?1 \
             ORDER BY order_value IS NULL, order_value, id"
        ))?;
        let rows = stmt
            .query_map(params![parent.get()], RawNode::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawNode::into_stored).collect()
    }

    fn create(&mut self, record: &NodeRecord) -> Result<ServerId, StoreError> {
        let fields_json = serde_json::to_string(&record.fields)?;
        self.conn.execute(
            "INSERT INTO nodes(parent_id, level, created_at_ms, last_modified_ms, deleted_at_ms, order_value, fields_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.parent_id.map(ServerId::get),
                record.level.depth(),
                record.created_at.as_millis(),
                record.last_modified.as_millis(),
                record.deleted_at.map(Timestamp::as_millis),
                record.order,
                fields_json,
            ],
        )?;
        server_id(self.conn.last_insert_rowid())
    }

    fn update(&mut self, id: ServerId, record: &NodeRecord) -> Result<(), StoreError> {
        let fields_json = serde_json::to_string(&record.fields)?;
        let changed = self.conn.execute(
            "UPDATE nodes SET parent_id = ?2, level = ?3, created_at_ms = ?4, last_modified_ms = ?5, \
             deleted_at_ms = ?6, order_value = ?7, fields_json = ?8 WHERE id = ?1",
            params![
                id.get(),
                record.parent_id.map(ServerId::get),
                record.level.depth(),
                record.created_at.as_millis(),
                record.last_modified.as_millis(),
                record.deleted_at.map(Timestamp::as_millis),
                record.order,
                fields_json,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownId(id));
        }
        Ok(())
    }

    fn set_last_modified(&mut self, id: ServerId, at: Timestamp) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE nodes SET last_modified_ms = ?2 WHERE id = ?1",
            params![id.get(), at.as_millis()],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownId(id));
        }
        Ok(())
    }

    fn soft_delete_by_id(&mut self, id: ServerId, at: Timestamp) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE nodes SET deleted_at_ms = ?2, last_modified_ms = MAX(last_modified_ms, ?2) \
             WHERE id = ?1",
            params![id.get(), at.as_millis()],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownId(id));
        }
        Ok(())
    }
}

struct RawNode {
    id: i64,
    parent_id: Option<i64>,
    level: i64,
    created_at_ms: i64,
    last_modified_ms: i64,
    deleted_at_ms: Option<i64>,
    order_value: Option<f64>,
    fields_json: String,
}

impl RawNode {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            parent_id: row.get(1)?,
            level: row.get(2)?,
            created_at_ms: row.get(3)?,
            last_modified_ms: row.get(4)?,
            deleted_at_ms: row.get(5)?,
            order_value: row.get(6)?,
            fields_json: row.get(7)?,
        })
    }

    fn into_stored(self) -> Result<StoredNode, StoreError> {
        let level = u8::try_from(self.level).map_err(|_| StoreError::CorruptRow {
            id: self.id,
            reason: "level out of range",
        })?;
        let fields: Fields = serde_json::from_str(&self.fields_json)?;
        Ok(StoredNode {
            id: server_id(self.id)?,
            record: NodeRecord {
                parent_id: self.parent_id.map(server_id).transpose()?,
                level: Level::new(level),
                created_at: Timestamp::from_millis(self.created_at_ms),
                last_modified: Timestamp::from_millis(self.last_modified_ms),
                deleted_at: self.deleted_at_ms.map(Timestamp::from_millis),
                order: self.order_value,
                fields,
            },
        })
    }
}

fn server_id(raw: i64) -> Result<ServerId, StoreError> {
    ServerId::try_new(raw).map_err(|_| StoreError::CorruptRow {
        id: raw,
        reason: "non-positive id",
    })
}
