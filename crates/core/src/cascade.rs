#![forbid(unsafe_code)]

//! Recursive soft deletion, on the replica tree and against a [`NodeStore`].

use crate::disposition::DispositionError;
use crate::ids::ServerId;
use crate::node::Node;
use crate::persistence::NodeStore;
use crate::timestamp::Timestamp;

/// Tombstones `node` and every descendant at `at`.
///
/// Each node gets `deleted_at = last_modified = at` and the local-edit
/// disposition transition. Nothing is touched unless every node in the
/// subtree accepts the transition. Returns the number of tombstoned nodes.
pub fn soft_delete(node: &mut Node, at: Timestamp) -> Result<usize, DispositionError> {
    check_editable(node)?;
    Ok(tombstone(node, at))
}

fn check_editable(node: &Node) -> Result<(), DispositionError> {
    node.disposition.on_local_edit()?;
    node.children.iter().try_for_each(check_editable)
}

fn tombstone(node: &mut Node, at: Timestamp) -> usize {
    node.deleted_at = Some(at);
    node.last_modified = at;
    // check_editable already proved the transition is valid.
    if let Ok(next) = node.disposition.on_local_edit() {
        node.disposition = next;
    }
    1 + node
        .children
        .iter_mut()
        .map(|child| tombstone(child, at))
        .sum::<usize>()
}

/// Tombstones the stored subtree rooted at `root`, root included.
///
/// Ids are collected first and deleted afterwards so the walk never observes
/// its own writes. A row created after `at` is tombstoned at its creation time
/// instead, keeping `deleted_at >= created_at`.
pub fn soft_delete_subtree<S: NodeStore>(
    store: &mut S,
    root: ServerId,
    at: Timestamp,
) -> Result<usize, S::Error> {
    let Some(root_node) = store.find_by_id(root)? else {
        return Ok(0);
    };
    let mut targets = vec![(root, root_node.record.created_at)];
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        for child in store.find_many_by_parent(id)? {
            targets.push((child.id, child.record.created_at));
            stack.push(child.id);
        }
    }
    for (id, created_at) in &targets {
        store.soft_delete_by_id(*id, at.max(*created_at))?;
    }
    tracing::debug!(
        target: "arbor::authority",
        root = root.get(),
        count = targets.len(),
        at = %at,
        "cascaded soft delete"
    );
    Ok(targets.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disposition::Disposition;
    use crate::hierarchy::Level;
    use crate::node::{Fields, NodeSnapshot};
    use crate::persistence::NodeRecord;
    use crate::persistence::memory::MemoryStore;

    fn ts(ms: i64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn synced_tree() -> Node {
        let snapshot = NodeSnapshot {
            server_id: ServerId::try_new(1).ok(),
            client_id: None,
            parent_server_id: None,
            parent_client_id: None,
            level: Level::ROOT,
            created_at: ts(10),
            last_modified: ts(20),
            deleted_at: None,
            order: None,
            fields: Fields::new(),
            children: vec![NodeSnapshot {
                server_id: ServerId::try_new(2).ok(),
                client_id: None,
                parent_server_id: ServerId::try_new(1).ok(),
                parent_client_id: None,
                level: Level::new(1),
                created_at: ts(10),
                last_modified: ts(15),
                deleted_at: None,
                order: None,
                fields: Fields::new(),
                children: Vec::new(),
            }],
        };
        Node::hydrate(&snapshot, None, Disposition::Synced)
    }

    #[test]
    fn replica_cascade_tombstones_the_whole_subtree() {
        let mut root = synced_tree();
        let local = Node::new_local(Level::new(1), Some(&root), Fields::new(), None, ts(30));
        root.children.push(local);

        let count = soft_delete(&mut root, ts(40)).unwrap();
        assert_eq!(count, 3);
        let mut seen = 0;
        root.walk(&mut |node| {
            seen += 1;
            assert_eq!(node.deleted_at, Some(ts(40)));
            assert_eq!(node.last_modified, ts(40));
        });
        assert_eq!(seen, 3);
        assert_eq!(root.disposition, Disposition::Modified);
        assert_eq!(root.children[1].disposition, Disposition::New);
    }

    #[test]
    fn replica_cascade_is_all_or_nothing() {
        let mut root = synced_tree();
        root.children[0].disposition = Disposition::Obsoleted;
        assert!(soft_delete(&mut root, ts(40)).is_err());
        assert_eq!(root.deleted_at, None);
        assert_eq!(root.disposition, Disposition::Synced);
    }

    #[test]
    fn store_cascade_keeps_rows_and_respects_creation_time() {
        let mut store = MemoryStore::default();
        let record = |parent, created| NodeRecord {
            parent_id: parent,
            level: Level::ROOT,
            created_at: ts(created),
            last_modified: ts(created),
            deleted_at: None,
            order: None,
            fields: Fields::new(),
        };
        let root = store.create(&record(None, 10)).unwrap();
        let a = store.create(&record(Some(root), 10)).unwrap();
        let late = store.create(&record(Some(a), 90)).unwrap();

        assert_eq!(soft_delete_subtree(&mut store, root, ts(50)).unwrap(), 3);
        assert_eq!(store.len(), 3);
        assert_eq!(store.get(root).unwrap().deleted_at, Some(ts(50)));
        assert_eq!(store.get(a).unwrap().last_modified, ts(50));
        assert_eq!(store.get(late).unwrap().deleted_at, Some(ts(90)));
        assert_eq!(store.get(late).unwrap().last_modified, ts(90));
    }
}
