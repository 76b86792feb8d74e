#![forbid(unsafe_code)]

//! The client-side replica of one tree.
//!
//! Every local operation addresses its target through an explicit
//! [`NodePath`]. Operations stamp one timestamp that is strictly newer than
//! every node on the path and bubble it to each ancestor, so a push from the
//! root always carries the edit. [`Replica::prepare_push`] re-derives the same
//! bubble lazily before anything is sent.

use crate::authority::validate_payload;
use crate::cascade;
use crate::clock::Clock;
use crate::disposition::{Disposition, DispositionError};
use crate::draft::{Draft, DraftOutcome, SchemaValidator};
use crate::error::{InvariantViolation, ReplicaError};
use crate::hierarchy::{Hierarchy, Level};
use crate::ids::ClientId;
use crate::node::{Fields, Node, NodeSnapshot};
use crate::order::{OrderError, OrderValueManager};
use crate::paths::NodePath;
use crate::timestamp::Timestamp;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;

mod merge;

pub use merge::ReplicaMergeReport;

pub struct Replica {
    hierarchy: Hierarchy,
    orders: OrderValueManager,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    root: Node,
}

impl Replica {
    /// Starts a replica around a root created locally.
    pub fn new(
        hierarchy: Hierarchy,
        orders: OrderValueManager,
        clock: Arc<dyn Clock>,
        fields: Fields,
    ) -> Self {
        let order = hierarchy
            .is_orderable(Level::ROOT)
            .then_some(orders.policy().base_value);
        let root = Node::new_local(Level::ROOT, None, fields, order, clock.now());
        Self {
            hierarchy,
            orders,
            clock,
            rng: StdRng::from_entropy(),
            root,
        }
    }

    /// Checks out an authoritative subtree. Hydrated nodes start `Initial`.
    pub fn from_snapshot(
        hierarchy: Hierarchy,
        orders: OrderValueManager,
        clock: Arc<dyn Clock>,
        snapshot: &NodeSnapshot,
    ) -> Result<Self, ReplicaError> {
        if snapshot.server_id.is_none() {
            return Err(ReplicaError::MissingServerId);
        }
        if !hierarchy.contains(snapshot.level) {
            return Err(ReplicaError::LevelMismatch {
                client_id: snapshot.client_id.unwrap_or_else(ClientId::mint),
                expected: Level::ROOT,
                found: snapshot.level,
            });
        }
        validate_payload(&hierarchy, snapshot, None)?;
        let root = Node::hydrate(snapshot, snapshot.parent_client_id, Disposition::Initial);
        Ok(Self {
            hierarchy,
            orders,
            clock,
            rng: StdRng::from_entropy(),
            root,
        })
    }

    /// Makes order jitter reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn root_path(&self) -> NodePath {
        NodePath::root(self.root.client_id)
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    pub fn order_manager(&self) -> &OrderValueManager {
        &self.orders
    }

    pub fn node(&self, path: &NodePath) -> Option<&Node> {
        self.locate(path).ok().and_then(|chain| chain.last().copied())
    }

    /// Overlays `partial` onto the node's fields.
    pub fn edit(&mut self, path: &NodePath, partial: Fields) -> Result<(), ReplicaError> {
        let chain = self.locate(path)?;
        let stamp = self.stamp(chain.iter().map(|n| n.last_modified));
        at_path(&mut self.root, path, stamp, |node| {
            node.disposition = node.disposition.on_local_edit()?;
            node.fields.extend(partial);
            node.last_modified = stamp;
            Ok(((), true))
        })?;
        tracing::debug!(target: "arbor::replica", path = %path, at = %stamp, "node edited");
        Ok(())
    }

    /// Tombstones the node and its whole subtree. Returns how many nodes were
    /// tombstoned.
    pub fn soft_delete(&mut self, path: &NodePath) -> Result<usize, ReplicaError> {
        let chain = self.locate(path)?;
        let mut floor: Vec<Timestamp> = chain.iter().map(|n| n.last_modified).collect();
        if let Some(target) = chain.last() {
            target.walk(&mut |n| {
                floor.push(n.last_modified);
                floor.push(n.created_at);
            });
        }
        let stamp = self.stamp(floor.into_iter());
        let count = at_path(&mut self.root, path, stamp, |node| {
            Ok((cascade::soft_delete(node, stamp)?, true))
        })?;
        tracing::debug!(target: "arbor::replica", path = %path, count, at = %stamp, "subtree soft-deleted");
        Ok(count)
    }

    /// Applies a user reorder of the children of `parent`.
    ///
    /// `sequence` lists every child's client id in the new order. Only siblings
    /// whose order value had to change are stamped and marked modified.
    pub fn reorder_children(
        &mut self,
        parent: &NodePath,
        sequence: &[ClientId],
    ) -> Result<Vec<ClientId>, ReplicaError> {
        let stamp = self.orderable_stamp(parent)?;
        {
            let chain = self.locate(parent)?;
            let children = chain.last().map(|n| n.children.as_slice()).unwrap_or_default();
            let mut expected: Vec<ClientId> = children.iter().map(|c| c.client_id).collect();
            let mut proposed = sequence.to_vec();
            expected.sort_unstable();
            proposed.sort_unstable();
            if expected != proposed {
                return Err(ReplicaError::BadSequence(parent.to_string()));
            }
        }

        let Self {
            root, orders, rng, ..
        } = self;
        let changed = at_path(root, parent, stamp, |node| {
            let mut pool = std::mem::take(&mut node.children);
            for id in sequence {
                if let Some(index) = pool.iter().position(|c| c.client_id == *id) {
                    node.children.push(pool.remove(index));
                }
            }
            let changed = respace(&mut node.children, stamp, |values| {
                let mut changed = orders.adjust_after_reorder(values, &mut *rng)?;
                changed.extend(orders.rebalance(values, false, &mut *rng)?);
                Ok(changed)
            })?;
            if !changed.is_empty() {
                node.disposition = node.disposition.on_local_edit()?;
                node.last_modified = stamp;
            }
            let touched = !changed.is_empty();
            Ok((changed, touched))
        })?;
        tracing::debug!(
            target: "arbor::replica",
            parent = %parent,
            changed = changed.len(),
            "children reordered"
        );
        Ok(changed)
    }

    /// Rebalances the children of `parent`; a no-op unless `forced` or the
    /// values drifted past the acceptable bound.
    pub fn rebalance_children(
        &mut self,
        parent: &NodePath,
        forced: bool,
    ) -> Result<Vec<ClientId>, ReplicaError> {
        let stamp = self.orderable_stamp(parent)?;
        let Self {
            root, orders, rng, ..
        } = self;
        let changed = at_path(root, parent, stamp, |node| {
            let changed = respace(&mut node.children, stamp, |values| {
                orders.rebalance(values, forced, &mut *rng)
            })?;
            if !changed.is_empty() {
                node.disposition = node.disposition.on_local_edit()?;
                node.last_modified = stamp;
            }
            let touched = !changed.is_empty();
            Ok((changed, touched))
        })?;
        tracing::debug!(
            target: "arbor::replica",
            parent = %parent,
            forced,
            changed = changed.len(),
            "children rebalanced"
        );
        Ok(changed)
    }

    /// Merges `partial` into the pending child draft of the node, creating the
    /// draft if there is none. No validation happens here.
    pub fn update_draft(&mut self, path: &NodePath, partial: Fields) -> Result<(), ReplicaError> {
        self.child_level(path)?;
        at_path(&mut self.root, path, Timestamp::EPOCH, |node| {
            node.draft.get_or_insert_with(Draft::default).merge(partial);
            Ok(((), false))
        })
    }

    pub fn discard_draft(&mut self, path: &NodePath) -> Result<Option<Draft>, ReplicaError> {
        at_path(&mut self.root, path, Timestamp::EPOCH, |node| {
            Ok((node.draft.take(), false))
        })
    }

    /// Validates the pending draft and materializes it as a new child.
    ///
    /// A rejection is returned as a value and leaves the draft in place.
    pub fn commit_draft(
        &mut self,
        path: &NodePath,
        validator: &dyn SchemaValidator,
    ) -> Result<DraftOutcome, ReplicaError> {
        let child_level = self.child_level(path)?;
        let chain = self.locate(path)?;
        let Some(draft) = chain.last().and_then(|n| n.draft.as_ref()) else {
            return Err(ReplicaError::NoDraft(path.to_string()));
        };
        let def = self
            .hierarchy
            .def(child_level)
            .ok_or_else(|| ReplicaError::LeafLevel(path.to_string()))?;
        if let Err(failure) = validator.validate(def, &draft.fields) {
            tracing::debug!(
                target: "arbor::replica",
                path = %path,
                errors = failure.errors.len(),
                "draft rejected"
            );
            return Ok(DraftOutcome::Rejected(failure));
        }
        let stamp = self.stamp(chain.iter().map(|n| n.last_modified));
        let orderable = self.hierarchy.is_orderable(child_level);

        let Self {
            root, orders, rng, ..
        } = self;
        let client_id = at_path(root, path, stamp, |node| {
            let next = node.disposition.on_local_edit()?;
            let draft = node
                .draft
                .take()
                .ok_or_else(|| ReplicaError::NoDraft(path.to_string()))?;
            let order = orderable.then(|| {
                let existing: Vec<f64> = node.children.iter().filter_map(|c| c.order).collect();
                orders.append_value(&existing, &mut *rng)
            });
            let child = Node::new_local(child_level, Some(&*node), draft.fields, order, stamp);
            let client_id = child.client_id;
            node.children.push(child);
            node.disposition = next;
            node.last_modified = stamp;
            Ok((client_id, true))
        })?;
        tracing::debug!(
            target: "arbor::replica",
            path = %path,
            child = %client_id,
            "draft committed"
        );
        Ok(DraftOutcome::Committed { client_id })
    }

    /// Bubbles pending timestamps to the root, checks the replica invariants
    /// and returns the subtree to submit.
    pub fn prepare_push(&mut self) -> Result<NodeSnapshot, ReplicaError> {
        let pruned = prune_unsent_tombstones(&mut self.root);
        if pruned > 0 {
            tracing::debug!(target: "arbor::replica", pruned, "dropped deleted nodes never sent");
        }
        bubble_pending(&mut self.root)?;
        self.check_invariants()?;
        Ok(self.root.to_snapshot())
    }

    /// Marks every modified node at or below `watermark` as synced. Used when
    /// the authority answered that it already holds the pushed state.
    pub fn settle(&mut self, watermark: Timestamp) -> Result<usize, ReplicaError> {
        Ok(settle(&mut self.root, watermark)?)
    }

    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        self.check_node(&self.root)
    }

    fn check_node(&self, node: &Node) -> Result<(), InvariantViolation> {
        if let Some(deleted_at) = node.deleted_at {
            if deleted_at < node.created_at {
                return Err(InvariantViolation::TombstoneBeforeCreation {
                    client_id: node.client_id,
                    created_at: node.created_at,
                    deleted_at,
                });
            }
        }
        let orderable = self
            .hierarchy
            .child_of(node.level)
            .is_some_and(|level| self.hierarchy.is_orderable(level));
        if orderable {
            let values: Vec<f64> = node
                .children
                .iter()
                .map(|c| c.order.unwrap_or(f64::NAN))
                .collect();
            self.orders
                .validate(&values)
                .map_err(|source| InvariantViolation::OrderSpacing {
                    parent: node.client_id,
                    source,
                })?;
        }
        for child in &node.children {
            if child.disposition.has_local_changes() && child.last_modified > node.last_modified {
                return Err(InvariantViolation::StaleAncestor {
                    parent: node.client_id,
                    parent_at: node.last_modified,
                    child: child.client_id,
                    child_at: child.last_modified,
                });
            }
            self.check_node(child)?;
        }
        Ok(())
    }

    fn locate(&self, path: &NodePath) -> Result<Vec<&Node>, ReplicaError> {
        let not_found = || ReplicaError::PathNotFound(path.to_string());
        let (first, rest) = path.ids().split_first().ok_or_else(not_found)?;
        if *first != self.root.client_id {
            return Err(not_found());
        }
        let mut current = &self.root;
        let mut chain = vec![current];
        for id in rest {
            current = current.child(*id).ok_or_else(not_found)?;
            chain.push(current);
        }
        Ok(chain)
    }

    fn child_level(&self, path: &NodePath) -> Result<Level, ReplicaError> {
        let chain = self.locate(path)?;
        let level = chain.last().map_or(Level::ROOT, |n| n.level);
        self.hierarchy
            .child_of(level)
            .ok_or_else(|| ReplicaError::LeafLevel(self.hierarchy.name(level).to_string()))
    }

    fn orderable_stamp(&self, parent: &NodePath) -> Result<Timestamp, ReplicaError> {
        let level = self.child_level(parent)?;
        if !self.hierarchy.is_orderable(level) {
            return Err(ReplicaError::NotOrderable(parent.to_string()));
        }
        let chain = self.locate(parent)?;
        let children = chain.last().map(|n| n.children.as_slice()).unwrap_or_default();
        let floor = chain
            .iter()
            .map(|n| n.last_modified)
            .chain(children.iter().map(|c| c.last_modified));
        Ok(self.stamp(floor))
    }

    /// Current time, but strictly after every timestamp in `floor`.
    fn stamp(&self, floor: impl Iterator<Item = Timestamp>) -> Timestamp {
        let now = self.clock.now();
        floor.fold(now, |acc, at| acc.max(at.plus_millis(1)))
    }
}

/// Runs `op` on the node at `path`. When it reports a change, every ancestor
/// on the path is stamped and takes the local-edit transition.
fn at_path<T, F>(root: &mut Node, path: &NodePath, stamp: Timestamp, op: F) -> Result<T, ReplicaError>
where
    F: FnOnce(&mut Node) -> Result<(T, bool), ReplicaError>,
{
    let Some((first, rest)) = path.ids().split_first() else {
        return Err(ReplicaError::PathNotFound(path.to_string()));
    };
    if *first != root.client_id {
        return Err(ReplicaError::PathNotFound(path.to_string()));
    }
    descend(root, rest, path, stamp, op).map(|(out, _)| out)
}

fn descend<T, F>(
    node: &mut Node,
    rest: &[ClientId],
    path: &NodePath,
    stamp: Timestamp,
    op: F,
) -> Result<(T, bool), ReplicaError>
where
    F: FnOnce(&mut Node) -> Result<(T, bool), ReplicaError>,
{
    let Some((next, tail)) = rest.split_first() else {
        return op(node);
    };
    let child = node
        .child_mut(*next)
        .ok_or_else(|| ReplicaError::PathNotFound(path.to_string()))?;
    let (out, touched) = descend(child, tail, path, stamp, op)?;
    if touched {
        node.disposition = node.disposition.on_local_edit()?;
        node.last_modified = node.last_modified.max(stamp);
    }
    Ok((out, touched))
}

/// Runs an order repair over the children's values and writes back the ones
/// that moved, stamping them as local edits.
pub(crate) fn respace(
    children: &mut [Node],
    stamp: Timestamp,
    repair: impl FnOnce(&mut [f64]) -> Result<Vec<usize>, OrderError>,
) -> Result<Vec<ClientId>, ReplicaError> {
    let mut values: Vec<f64> = children
        .iter()
        .map(|c| c.order.unwrap_or(f64::NAN))
        .collect();
    let mut changed = repair(&mut values)?;
    changed.sort_unstable();
    changed.dedup();
    let mut ids = Vec::with_capacity(changed.len());
    for index in changed {
        let Some(child) = children.get_mut(index) else {
            continue;
        };
        child.disposition = child.disposition.on_local_edit()?;
        child.order = Some(values[index]);
        child.last_modified = child.last_modified.max(stamp);
        ids.push(child.client_id);
    }
    Ok(ids)
}

/// Raises `node` to cover a pending descendant stamped at `at`.
pub(crate) fn cover_pending(node: &mut Node, at: Timestamp) -> Result<(), DispositionError> {
    if node.disposition.has_local_changes() {
        node.last_modified = node.last_modified.max(at);
    } else {
        node.disposition = node.disposition.on_local_edit()?;
        node.last_modified = at.max(node.last_modified.plus_millis(1));
    }
    Ok(())
}

/// Removes tombstoned nodes the authority has never seen; they carry nothing
/// worth sending.
fn prune_unsent_tombstones(node: &mut Node) -> usize {
    let before = node.children.len();
    node.children.retain(|c| {
        !(c.disposition == Disposition::New && c.server_id().is_none() && c.is_deleted())
    });
    let mut pruned = before - node.children.len();
    for child in &mut node.children {
        pruned += prune_unsent_tombstones(child);
    }
    pruned
}

fn bubble_pending(node: &mut Node) -> Result<bool, DispositionError> {
    let mut pending: Option<Timestamp> = None;
    for child in &mut node.children {
        if bubble_pending(child)? {
            pending = pending.max(Some(child.last_modified));
        }
    }
    if let Some(at) = pending {
        cover_pending(node, at)?;
    }
    Ok(node.disposition.has_local_changes())
}

pub(crate) fn settle(node: &mut Node, watermark: Timestamp) -> Result<usize, DispositionError> {
    let mut count = 0;
    if node.disposition.has_local_changes()
        && node.server_id().is_some()
        && node.last_modified <= watermark
    {
        node.disposition = node.disposition.on_merged()?;
        count += 1;
    }
    for child in &mut node.children {
        count += settle(child, watermark)?;
    }
    Ok(count)
}
