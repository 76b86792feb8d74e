#![forbid(unsafe_code)]

//! Server-side reconciliation of a submitted subtree into the authoritative
//! store.
//!
//! The caller owns the unit of work: `push` performs every read and write of one
//! submission through the given [`NodeStore`] and never commits on its own.
//!
//! Per node, the client wins only when its `last_modified` is strictly newer.
//! Children are then reconciled one by one and the parent's timestamp is
//! finalized: it keeps the client's value only when the client's view of the
//! child list was complete and current, otherwise it is pushed past the client's
//! value so the replica has to re-absorb the authoritative state.

use crate::cascade::soft_delete_subtree;
use crate::error::MergeError;
use crate::hierarchy::{Hierarchy, Level};
use crate::ids::{ClientId, ServerId};
use crate::node::NodeSnapshot;
use crate::persistence::{NodeRecord, NodeStore, StoredNode};
use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};


/// Per-push counters, summed over every reconciled node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub stale: usize,
    pub ghost: usize,
    pub unchanged: usize,
    /// Nodes whose timestamp was finalized past the client's value.
    pub forced: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum PushOutcome {
    /// Client and authority already agree on the root.
    NoUpdate,
    /// The client's root won; `subtree` is the canonical result.
    Merged {
        subtree: NodeSnapshot,
        stats: MergeStats,
    },
    /// The authority's root is newer; the submission was discarded.
    Superseded { subtree: NodeSnapshot },
    /// The submitted root no longer exists at the authority.
    Gone {
        #[serde(rename = "serverId")]
        server_id: ServerId,
    },
}

impl PushOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoUpdate => "no_update",
            Self::Merged { .. } => "merged",
            Self::Superseded { .. } => "superseded",
            Self::Gone { .. } => "gone",
        }
    }

    pub fn subtree(&self) -> Option<&NodeSnapshot> {
        match self {
            Self::Merged { subtree, .. } | Self::Superseded { subtree } => Some(subtree),
            Self::NoUpdate | Self::Gone { .. } => None,
        }
    }
}

/// Reconciles `submitted` into `store` at server time `now`.
pub fn push<S: NodeStore>(
    store: &mut S,
    hierarchy: &Hierarchy,
    now: Timestamp,
    submitted: &NodeSnapshot,
) -> Result<PushOutcome, S::Error> {
    validate_payload(hierarchy, submitted, None)?;

    let mut echo = HashMap::new();
    collect_echo(submitted, &mut echo);
    let mut merge = Merge {
        store,
        now,
        stats: MergeStats::default(),
        echo,
    };

    let root_id = match submitted.server_id {
        None => {
            let parent = merge.check_root_parent(submitted)?;
            let written = merge.write_node(None, parent, submitted)?;
            merge.stats.created += 1;
            written.id
        }
        Some(id) => {
            let Some(stored) = merge.store.find_by_id(id)? else {
                tracing::warn!(
                    target: "arbor::authority",
                    server_id = id.get(),
                    "pushed root no longer exists"
                );
                return Ok(PushOutcome::Gone { server_id: id });
            };
            if stored.record.level != submitted.level {
                return Err(MergeError::LevelMismatch {
                    parent: stored.record.level,
                    found: submitted.level,
                }
                .into());
            }
            let client_at = submitted.last_modified;
            let server_at = stored.record.last_modified;
            if client_at < server_at {
                tracing::info!(
                    target: "arbor::authority",
                    server_id = id.get(),
                    client = %client_at,
                    server = %server_at,
                    "push superseded by newer authoritative root"
                );
                let subtree = load_subtree(&*merge.store, id, &merge.echo)?;
                return Ok(subtree.map_or(PushOutcome::Gone { server_id: id }, |subtree| {
                    PushOutcome::Superseded { subtree }
                }));
            }
            if client_at == server_at {
                tracing::debug!(
                    target: "arbor::authority",
                    server_id = id.get(),
                    "push matches authoritative root"
                );
                return Ok(PushOutcome::NoUpdate);
            }
            merge.write_node(Some(&stored), stored.record.parent_id, submitted)?;
            merge.stats.updated += 1;
            id
        }
    };

    let stats = merge.stats;
    let subtree = load_subtree(&*merge.store, root_id, &merge.echo)?
        .ok_or(MergeError::InvalidPayload("merged root vanished"))?;
    tracing::info!(
        target: "arbor::authority",
        root = root_id.get(),
        created = stats.created,
        updated = stats.updated,
        deleted = stats.deleted,
        stale = stats.stale,
        ghost = stats.ghost,
        forced = stats.forced,
        "push merged"
    );
    Ok(PushOutcome::Merged { subtree, stats })
}

/// Canonical subtree rooted at `root`, tombstones included. Nodes listed in
/// `echo` carry the client id the replica submitted for them.
pub fn load_subtree<S: NodeStore>(
    store: &S,
    root: ServerId,
    echo: &HashMap<ServerId, ClientId>,
) -> Result<Option<NodeSnapshot>, S::Error> {
    let Some(node) = store.find_by_id(root)? else {
        return Ok(None);
    };
    let parent_client_id = node.record.parent_id.and_then(|p| echo.get(&p).copied());
    load_node(store, node, parent_client_id, echo).map(Some)
}

fn load_node<S: NodeStore>(
    store: &S,
    node: StoredNode,
    parent_client_id: Option<ClientId>,
    echo: &HashMap<ServerId, ClientId>,
) -> Result<NodeSnapshot, S::Error> {
    let client_id = echo.get(&node.id).copied();
    let children = store
        .find_many_by_parent(node.id)?
        .into_iter()
        .map(|child| load_node(store, child, client_id, echo))
        .collect::<Result<Vec<_>, _>>()?;
    let record = node.record;
    Ok(NodeSnapshot {
        server_id: Some(node.id),
        client_id,
        parent_server_id: record.parent_id,
        parent_client_id,
        level: record.level,
        created_at: record.created_at,
        last_modified: record.last_modified,
        deleted_at: record.deleted_at,
        order: record.order,
        fields: record.fields,
        children,
    })
}

/// Shape checks against the hierarchy, run before anything is written.
pub fn validate_payload(
    hierarchy: &Hierarchy,
    node: &NodeSnapshot,
    expected: Option<Level>,
) -> Result<(), MergeError> {
    if !hierarchy.contains(node.level) {
        return Err(MergeError::UnknownLevel(node.level));
    }
    if let Some(expected) = expected {
        if node.level != expected {
            return Err(MergeError::LevelMismatch {
                parent: expected.parent().unwrap_or(Level::ROOT),
                found: node.level,
            });
        }
    }
    match (hierarchy.is_orderable(node.level), node.order) {
        (true, None) => return Err(MergeError::InvalidPayload("orderable node without order")),
        (false, Some(_)) => {
            return Err(MergeError::InvalidPayload("order on a non-orderable level"));
        }
        (true, Some(order)) if !order.is_finite() => {
            return Err(MergeError::InvalidPayload("order must be finite"));
        }
        _ => {}
    }
    if node.deleted_at.is_some_and(|d| d < node.created_at) {
        return Err(MergeError::InvalidPayload("deleted_at precedes created_at"));
    }
    let child_level = hierarchy.child_of(node.level);
    if child_level.is_none() && !node.children.is_empty() {
        return Err(MergeError::InvalidPayload("leaf level cannot have children"));
    }
    for child in &node.children {
        validate_payload(hierarchy, child, child_level)?;
    }
    Ok(())
}

fn collect_echo(node: &NodeSnapshot, echo: &mut HashMap<ServerId, ClientId>) {
    if let (Some(server_id), Some(client_id)) = (node.server_id, node.client_id) {
        echo.insert(server_id, client_id);
    }
    for child in &node.children {
        collect_echo(child, echo);
    }
}

#[derive(Default)]
struct ChildCounts {
    created: usize,
    deleted: usize,
    stale: usize,
    ghost: usize,
    forced: usize,
}

impl ChildCounts {
    fn clean(&self) -> bool {
        self.created + self.deleted + self.stale + self.ghost + self.forced == 0
    }
}

struct Written {
    id: ServerId,
    forced: bool,
}

struct Merge<'a, S: NodeStore> {
    store: &'a mut S,
    now: Timestamp,
    stats: MergeStats,
    echo: HashMap<ServerId, ClientId>,
}

impl<S: NodeStore> Merge<'_, S> {
    /// Parent for a submitted root that the authority has not seen yet.
    fn check_root_parent(&self, node: &NodeSnapshot) -> Result<Option<ServerId>, S::Error> {
        let Some(expected) = node.level.parent() else {
            if node.parent_server_id.is_some() {
                return Err(MergeError::InvalidPayload("top-level node cannot have a parent").into());
            }
            return Ok(None);
        };
        let parent_id = node
            .parent_server_id
            .ok_or(MergeError::InvalidPayload("nested node requires a parent"))?;
        let parent = self
            .store
            .find_by_id(parent_id)?
            .ok_or(MergeError::UnknownParent(parent_id))?;
        if parent.record.level != expected {
            return Err(MergeError::LevelMismatch {
                parent: parent.record.level,
                found: node.level,
            }
            .into());
        }
        Ok(Some(parent_id))
    }

    /// Persists the client's version of one node, then reconciles its children
    /// and finalizes its timestamp.
    fn write_node(
        &mut self,
        existing: Option<&StoredNode>,
        parent: Option<ServerId>,
        node: &NodeSnapshot,
    ) -> Result<Written, S::Error> {
        let created_at = existing.map_or(node.created_at, |s| s.record.created_at);
        let record = NodeRecord {
            parent_id: parent,
            level: node.level,
            created_at,
            last_modified: node.last_modified,
            deleted_at: node.deleted_at.map(|d| d.max(created_at)),
            order: node.order,
            fields: node.fields.clone(),
        };
        let id = match existing {
            Some(stored) => {
                self.store.update(stored.id, &record)?;
                stored.id
            }
            None => {
                let id = self.store.create(&record)?;
                if let Some(client_id) = node.client_id {
                    self.echo.insert(id, client_id);
                }
                id
            }
        };

        let mut counts = ChildCounts::default();
        if node.declares_tombstone() {
            let at = record.deleted_at.unwrap_or(node.last_modified);
            soft_delete_subtree(&mut *self.store, id, at)?;
        } else {
            for child in &node.children {
                self.reconcile_child(id, child, &mut counts)?;
            }
        }

        let complete = counts.clean() && self.children_match(id, node)?;

        let finalized = if complete {
            node.last_modified
        } else {
            self.stats.forced += 1;
            self.now.max(node.last_modified.plus_millis(1))
        };
        self.store.set_last_modified(id, finalized)?;
        tracing::debug!(
            target: "arbor::authority",
            server_id = id.get(),
            level = %node.level,
            created = counts.created,
            deleted = counts.deleted,
            stale = counts.stale,
            ghost = counts.ghost,
            complete,
            finalized = %finalized,
            "node written"
        );
        Ok(Written {
            id,
            forced: !complete,
        })
    }

    /// Whether the stored children of `id` are exactly the ones `node` lists.
    fn children_match(&self, id: ServerId, node: &NodeSnapshot) -> Result<bool, S::Error> {
        let current: BTreeSet<ServerId> = self
            .store
            .find_many_by_parent(id)?
            .into_iter()
            .map(|c| c.id)
            .collect();
        let submitted: BTreeSet<ServerId> =
            node.children.iter().filter_map(|c| c.server_id).collect();
        Ok(current == submitted && node.children.iter().all(|c| c.server_id.is_some()))
    }

    fn reconcile_child(
        &mut self,
        parent: ServerId,
        child: &NodeSnapshot,
        counts: &mut ChildCounts,
    ) -> Result<(), S::Error> {
        let Some(id) = child.server_id else {
            let written = self.write_node(None, Some(parent), child)?;
            counts.created += 1;
            self.stats.created += 1;
            if written.forced {
                counts.forced += 1;
            }
            return Ok(());
        };

        let stored = self
            .store
            .find_by_id(id)?
            .filter(|s| s.record.parent_id == Some(parent));
        let Some(stored) = stored else {
            if child.declares_tombstone() {
                // Already gone; the deletion intent is satisfied.
                counts.deleted += 1;
                self.stats.deleted += 1;
            } else {
                tracing::warn!(
                    target: "arbor::authority",
                    server_id = id.get(),
                    parent = parent.get(),
                    "ignoring ghost child"
                );
                counts.ghost += 1;
                self.stats.ghost += 1;
            }
            return Ok(());
        };

        let client_at = child.last_modified;
        let server_at = stored.record.last_modified;
        if child.declares_tombstone() && client_at > server_at {
            let at = child
                .deleted_at
                .unwrap_or(client_at)
                .max(stored.record.created_at);
            soft_delete_subtree(&mut *self.store, id, at)?;
            let mut finalized = client_at.max(at);
            if !self.children_match(id, child)? {
                self.stats.forced += 1;
                finalized = self.now.max(finalized.plus_millis(1));
            }
            self.store.set_last_modified(id, finalized)?;
            counts.deleted += 1;
            self.stats.deleted += 1;
            return Ok(());
        }

        if client_at > server_at {
            let written = self.write_node(Some(&stored), Some(parent), child)?;
            self.stats.updated += 1;
            if written.forced {
                counts.forced += 1;
            }
        } else if client_at < server_at {
            tracing::warn!(
                target: "arbor::authority",
                server_id = id.get(),
                client = %client_at,
                server = %server_at,
                "ignoring stale child"
            );
            counts.stale += 1;
            self.stats.stale += 1;
        } else {
            self.stats.unchanged += 1;
        }
        Ok(())
    }
}
