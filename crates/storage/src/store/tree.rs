#![forbid(unsafe_code)]

use super::unit_of_work::UnitOfWork;
use super::{SqliteStore, StoreError};
use arbor_core::authority::{self, PushOutcome};
use arbor_core::cascade::soft_delete_subtree;
use arbor_core::{NodeSnapshot, NodeStore, ServerId, StoredNode, Timestamp};
use rusqlite::{TransactionBehavior, params};
use std::collections::HashMap;

impl SqliteStore {
    /// Reconciles a pushed subtree. The whole merge runs in one IMMEDIATE
    /// transaction, so racing pushes on the same tree serialize and a failed
    /// merge leaves nothing behind.
    pub fn push(&mut self, submitted: &NodeSnapshot) -> Result<PushOutcome, StoreError> {
        let now = self.clock.now();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = {
            let mut uow = UnitOfWork::new(&tx);
            authority::push(&mut uow, &self.hierarchy, now, submitted)?
        };
        tx.commit()?;

        tracing::info!(
            target: "arbor::store",
            outcome = outcome.kind(),
            root = ?submitted.server_id.map(ServerId::get),
            "push committed"
        );
        Ok(outcome)
    }

    /// Canonical subtree for `root`, or `None` once the root row is gone.
    pub fn pull(&mut self, root: ServerId) -> Result<Option<NodeSnapshot>, StoreError> {
        let tx = self.conn.transaction()?;
        let subtree = {
            let uow = UnitOfWork::new(&tx);
            authority::load_subtree(&uow, root, &HashMap::new())?
        };
        tx.commit()?;
        tracing::debug!(
            target: "arbor::store",
            root = root.get(),
            found = subtree.is_some(),
            "pull"
        );
        Ok(subtree)
    }

    pub fn node(&self, id: ServerId) -> Result<Option<StoredNode>, StoreError> {
        UnitOfWork::new(&self.conn).find_by_id(id)
    }

    /// Server-initiated cascade delete of `id` and its descendants. Every
    /// ancestor is raised to the deletion time so replicas re-absorb the
    /// change. An already tombstoned node is left as it is.
    pub fn soft_delete(&mut self, id: ServerId) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let count = {
            let mut uow = UnitOfWork::new(&tx);
            let node = uow.find_by_id(id)?.ok_or(StoreError::UnknownId(id))?;
            if node.record.deleted_at.is_some() {
                0
            } else {
                let count = soft_delete_subtree(&mut uow, id, now)?;
                uow.bump_chain(node.record.parent_id, now)?;
                count
            }
        };
        tx.commit()?;

        tracing::info!(
            target: "arbor::store",
            server_id = id.get(),
            count,
            "soft delete committed"
        );
        Ok(count)
    }

    /// Hard-deletes tombstones whose `deleted_at` precedes `older_than`,
    /// together with their subtrees, and raises each surviving parent chain
    /// to now. Returns the number of rows removed.
    pub fn purge_tombstones(&mut self, older_than: Timestamp) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let candidates = {
            let mut stmt = tx.prepare(
                "SELECT id FROM nodes WHERE deleted_at_ms IS NOT NULL AND deleted_at_ms < ?1 \
                 ORDER BY level, id",
            )?;
            let ids = stmt
                .query_map(params![older_than.as_millis()], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };

        let mut removed = 0;
        {
            let mut uow = UnitOfWork::new(&tx);
            for raw in candidates {
                let id = ServerId::try_new(raw).map_err(|_| StoreError::CorruptRow {
                    id: raw,
                    reason: "non-positive id",
                })?;
                // Already taken out with an ancestor purged earlier in the loop.
                let Some(node) = uow.find_by_id(id)? else {
                    continue;
                };
                removed += uow.subtree_ids(id)?.len();
                uow.hard_delete(id)?;
                uow.bump_chain(node.record.parent_id, now)?;
            }
        }
        tx.commit()?;

        tracing::info!(
            target: "arbor::store",
            removed,
            older_than = %older_than,
            "tombstones purged"
        );
        Ok(removed)
    }
}
