#![forbid(unsafe_code)]

use super::{Replica, cover_pending, respace, settle};
use crate::authority::validate_payload;
use crate::disposition::Disposition;
use crate::error::{InvariantViolation, ReplicaError};
use crate::hierarchy::Hierarchy;
use crate::ids::ClientId;
use crate::node::{Node, NodeSnapshot};
use crate::order::OrderValueManager;
use crate::timestamp::Timestamp;
use rand::rngs::StdRng;
use serde::Serialize;

/// What one [`Replica::apply`] did to the local tree.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReplicaMergeReport {
    /// Nodes that took the authority's version.
    pub adopted: usize,
    /// Matched nodes kept as-is because their local edits are newer.
    pub kept_local: usize,
    /// Nodes first seen in the authority's subtree.
    pub materialized: usize,
    pub settled: usize,
    /// Roots of the local subtrees dropped as unknown to the authority.
    pub obsoleted: Vec<ClientId>,
    /// Siblings whose order value was repaired after the merge.
    pub reordered: usize,
}

impl Replica {
    /// Folds an authoritative subtree (a push result or a pull) into the
    /// replica.
    pub fn apply(&mut self, snapshot: &NodeSnapshot) -> Result<ReplicaMergeReport, ReplicaError> {
        let server_id = snapshot.server_id.ok_or(ReplicaError::MissingServerId)?;
        if let Some(local) = self.root.server_id() {
            if local != server_id {
                return Err(ReplicaError::RootMismatch {
                    local,
                    server: server_id,
                });
            }
        }
        validate_payload(&self.hierarchy, snapshot, None)?;
        // Merged into a copy so a failed merge leaves the replica untouched.
        let mut root = self.root.clone();
        let mut merge = ReplicaMerge {
            hierarchy: &self.hierarchy,
            orders: &self.orders,
            rng: &mut self.rng,
            now: self.clock.now(),
            report: ReplicaMergeReport::default(),
        };
        merge.merge_node(&mut root, snapshot)?;
        let report = merge.report;
        self.check_node(&root)?;
        self.root = root;
        tracing::info!(
            target: "arbor::replica",
            root = server_id.get(),
            adopted = report.adopted,
            kept_local = report.kept_local,
            materialized = report.materialized,
            settled = report.settled,
            obsoleted = report.obsoleted.len(),
            reordered = report.reordered,
            "authoritative subtree applied"
        );
        Ok(report)
    }
}

enum Tombstone {
    /// Take the authority's `deleted_at`.
    Adopt,
    /// A local edit postdates the authority's tombstone.
    Resurrect,
    /// An unsynced local tombstone outlives the authority's state.
    Redeclare,
}

struct ReplicaMerge<'a> {
    hierarchy: &'a Hierarchy,
    orders: &'a OrderValueManager,
    rng: &'a mut StdRng,
    now: Timestamp,
    report: ReplicaMergeReport,
}

impl ReplicaMerge<'_> {
    fn merge_node(&mut self, local: &mut Node, server: &NodeSnapshot) -> Result<(), ReplicaError> {
        if local.level != server.level {
            return Err(ReplicaError::LevelMismatch {
                client_id: local.client_id,
                expected: local.level,
                found: server.level,
            });
        }
        let server_id = server.server_id.ok_or(ReplicaError::MissingServerId)?;
        let same_identity = local.server_id() == Some(server_id)
            && local.parent_server_id == server.parent_server_id;
        if same_identity && server.last_modified <= local.last_modified {
            if server.last_modified == local.last_modified {
                self.report.settled += settle(local, server.last_modified)?;
            }
            return Ok(());
        }

        local.assign_server_id(server_id)?;
        local.parent_server_id = server.parent_server_id;
        self.merge_children(local, server)?;
        self.adopt_fields(local, server)?;

        let pending = local
            .children
            .iter()
            .filter(|c| c.disposition.has_local_changes())
            .map(|c| c.last_modified)
            .max();
        if let Some(at) = pending {
            cover_pending(local, at)?;
        }
        Ok(())
    }

    fn merge_children(&mut self, local: &mut Node, server: &NodeSnapshot) -> Result<(), ReplicaError> {
        let child_level = self.hierarchy.child_of(local.level);
        let mut remaining = std::mem::take(&mut local.children);
        let mut merged = Vec::with_capacity(server.children.len().max(remaining.len()));

        for incoming in &server.children {
            let expected = child_level.ok_or_else(|| {
                ReplicaError::LeafLevel(self.hierarchy.name(local.level).to_string())
            })?;
            if incoming.level != expected {
                return Err(ReplicaError::LevelMismatch {
                    client_id: local.client_id,
                    expected,
                    found: incoming.level,
                });
            }

            let by_server = incoming
                .server_id
                .and_then(|id| remaining.iter().position(|c| c.server_id() == Some(id)));
            let by_client = || {
                incoming
                    .client_id
                    .and_then(|id| remaining.iter().position(|c| c.client_id == id))
            };
            let Some(index) = by_server.or_else(by_client) else {
                let node = Node::hydrate(incoming, Some(local.client_id), Disposition::Synced);
                self.report.materialized += node.subtree_len();
                merged.push(node);
                continue;
            };

            let mut child = remaining.remove(index);
            if child.last_modified > incoming.last_modified {
                if !child.disposition.has_local_changes() {
                    return Err(InvariantViolation::NewerButUnmodified {
                        client_id: child.client_id,
                        local: child.last_modified,
                        server: incoming.last_modified,
                        disposition: child.disposition,
                    }
                    .into());
                }
                graft(&mut child, incoming)?;
                self.report.kept_local += 1;
            } else {
                self.merge_node(&mut child, incoming)?;
            }
            merged.push(child);
        }

        for mut child in remaining {
            let unsent = child.disposition == Disposition::New && child.server_id().is_none();
            let edited_since = child.disposition.has_local_changes()
                && child.last_modified > server.last_modified;
            if unsent || edited_since {
                merged.push(child);
                continue;
            }
            child.disposition = child.disposition.on_obsoleted()?;
            tracing::warn!(
                target: "arbor::replica",
                client_id = %child.client_id,
                server_id = ?child.server_id().map(|id| id.get()),
                parent = %local.client_id,
                disposition = child.disposition.as_str(),
                "dropping node unknown to the authority"
            );
            self.report.obsoleted.push(child.client_id);
        }

        local.children = merged;
        if child_level.is_some_and(|level| self.hierarchy.is_orderable(level)) {
            self.repair_orders(local)?;
        }
        Ok(())
    }

    /// Sorts an orderable child list by order value and repairs the spacing
    /// when independently appended siblings collide.
    fn repair_orders(&mut self, parent: &mut Node) -> Result<(), ReplicaError> {
        parent.children.sort_by(|a, b| {
            let a = a.order.unwrap_or(f64::MAX);
            let b = b.order.unwrap_or(f64::MAX);
            a.total_cmp(&b)
        });
        let values: Vec<f64> = parent
            .children
            .iter()
            .map(|c| c.order.unwrap_or(f64::NAN))
            .collect();
        if self.orders.validate(&values).is_ok() {
            return Ok(());
        }
        let stamp = parent
            .children
            .iter()
            .map(|c| c.last_modified.plus_millis(1))
            .fold(self.now, Timestamp::max);
        let orders = self.orders;
        let rng = &mut *self.rng;
        let changed = respace(&mut parent.children, stamp, |values| {
            orders.adjust_after_reorder(values, rng)
        })?;
        tracing::debug!(
            target: "arbor::replica",
            parent = %parent.client_id,
            changed = changed.len(),
            "repaired colliding order values"
        );
        self.report.reordered += changed.len();
        Ok(())
    }

    fn adopt_fields(&mut self, local: &mut Node, server: &NodeSnapshot) -> Result<(), ReplicaError> {
        let tombstone = resolve_tombstone(local, server);
        local.created_at = server.created_at;
        local.last_modified = server.last_modified;
        local.deleted_at = server.deleted_at;
        local.order = server.order;
        local.fields = server.fields.clone();
        local.disposition = local.disposition.on_merged()?;
        self.report.adopted += 1;

        let stamp = self.now.max(server.last_modified.plus_millis(1));
        match tombstone {
            Tombstone::Adopt => {}
            Tombstone::Resurrect => {
                local.deleted_at = None;
                local.disposition = local.disposition.on_local_edit()?;
                local.last_modified = stamp;
            }
            Tombstone::Redeclare => {
                local.deleted_at = Some(stamp);
                local.disposition = local.disposition.on_local_edit()?;
                local.last_modified = stamp;
            }
        }
        if !matches!(tombstone, Tombstone::Adopt) {
            tracing::debug!(
                target: "arbor::replica",
                client_id = %local.client_id,
                resurrected = local.deleted_at.is_none(),
                "local tombstone intent kept for the next push"
            );
        }
        Ok(())
    }
}

fn resolve_tombstone(local: &Node, server: &NodeSnapshot) -> Tombstone {
    let pending = local.disposition.has_local_changes();
    match (server.deleted_at, local.deleted_at) {
        (Some(server_at), None) if pending && local.last_modified > server_at => {
            Tombstone::Resurrect
        }
        (Some(server_at), Some(local_at)) if pending && local_at > server_at => {
            Tombstone::Redeclare
        }
        (None, Some(_)) if pending => Tombstone::Redeclare,
        _ => Tombstone::Adopt,
    }
}

/// Copies authoritative identities into a locally newer subtree without
/// touching its content.
fn graft(node: &mut Node, snapshot: &NodeSnapshot) -> Result<(), ReplicaError> {
    if let Some(id) = snapshot.server_id {
        node.assign_server_id(id)?;
    }
    if snapshot.parent_server_id.is_some() {
        node.parent_server_id = snapshot.parent_server_id;
    }
    if node.disposition == Disposition::New && node.server_id().is_some() {
        // Accepted once; further pushes update instead of create.
        node.disposition = Disposition::Modified;
    }
    for incoming in &snapshot.children {
        let matched = node.children.iter_mut().find(|c| {
            (incoming.server_id.is_some() && c.server_id() == incoming.server_id)
                || incoming.client_id == Some(c.client_id)
        });
        if let Some(child) = matched {
            graft(child, incoming)?;
        }
    }
    Ok(())
}
