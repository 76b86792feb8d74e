#![forbid(unsafe_code)]

use arbor_core::{
    ClientId, Fields, Hierarchy, Level, LevelDef, ManualClock, NodeSnapshot, PushOutcome,
    ServerId, Timestamp,
};
use arbor_storage::{SqliteStore, StoreError};
use rusqlite::Connection;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("arbor_storage_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn hierarchy() -> Hierarchy {
    Hierarchy::try_new(vec![
        LevelDef::new("owner", false),
        LevelDef::new("document", false),
        LevelDef::new("section", true),
    ])
    .expect("hierarchy")
}

fn ts(ms: i64) -> Timestamp {
    Timestamp::from_millis(ms)
}

fn open(dir: &Path, clock: &Arc<ManualClock>) -> SqliteStore {
    SqliteStore::with_clock(dir, hierarchy(), clock.clone()).expect("open store")
}

fn node(level: u8, at: i64, title: &str) -> NodeSnapshot {
    let mut fields = Fields::new();
    fields.insert("title".to_string(), json!(title));
    NodeSnapshot {
        server_id: None,
        client_id: Some(ClientId::mint()),
        parent_server_id: None,
        parent_client_id: None,
        level: Level::new(level),
        created_at: ts(at),
        last_modified: ts(at),
        deleted_at: None,
        order: (level == 2).then_some(0.0),
        fields,
        children: Vec::new(),
    }
}

fn merged(outcome: PushOutcome) -> NodeSnapshot {
    match outcome {
        PushOutcome::Merged { subtree, .. } => subtree,
        other => panic!("expected merged outcome, got {}", other.kind()),
    }
}

fn row_count(store: &SqliteStore) -> i64 {
    let conn = Connection::open(store.db_path()).expect("open db");
    conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))
        .expect("count rows")
}

#[test]
fn new_root_is_stored_with_the_client_timestamp() {
    let dir = temp_dir("new_root_is_stored_with_the_client_timestamp");
    let clock = Arc::new(ManualClock::new(ts(500)));
    let mut store = open(&dir, &clock);

    let root = node(0, 100, "me");
    let subtree = merged(store.push(&root).expect("push"));
    let root_id = subtree.server_id.expect("server id");
    assert_eq!(subtree.client_id, root.client_id);
    assert_eq!(subtree.last_modified, ts(100));

    let pulled = store.pull(root_id).expect("pull").expect("root exists");
    assert_eq!(pulled.last_modified, ts(100));
    assert_eq!(pulled.fields.get("title"), Some(&json!("me")));
    assert_eq!(pulled.client_id, None);
}

#[test]
fn resubmitting_the_canonical_subtree_is_a_no_op() {
    let dir = temp_dir("resubmitting_the_canonical_subtree_is_a_no_op");
    let clock = Arc::new(ManualClock::new(ts(500)));
    let mut store = open(&dir, &clock);

    let mut root = node(0, 100, "me");
    root.children = vec![node(1, 100, "a"), node(1, 100, "b")];
    let subtree = merged(store.push(&root).expect("push"));

    clock.set(ts(900));
    assert_eq!(store.push(&subtree).expect("push again"), PushOutcome::NoUpdate);
    assert_eq!(row_count(&store), 3);
}

#[test]
fn sibling_created_elsewhere_forces_a_fresh_timestamp() {
    let dir = temp_dir("sibling_created_elsewhere_forces_a_fresh_timestamp");
    let clock = Arc::new(ManualClock::new(ts(200)));
    let mut store = open(&dir, &clock);

    let mut root = node(0, 100, "me");
    root.children = vec![node(1, 100, "X")];
    let first = merged(store.push(&root).expect("push"));
    let root_id = first.server_id.expect("root id");

    // Another replica adds Z.
    let mut from_b = store.pull(root_id).expect("pull").expect("root");
    from_b.last_modified = ts(300);
    let mut z = node(1, 300, "Z");
    z.parent_server_id = Some(root_id);
    from_b.children.push(z);
    clock.set(ts(400));
    let after_b = merged(store.push(&from_b).expect("push from b"));
    assert_eq!(after_b.last_modified, ts(400));

    // This replica never pulled Z and submits [X, Y].
    let mut from_a = first.clone();
    from_a.last_modified = ts(450);
    let y = node(1, 450, "Y");
    from_a.children.push(y.clone());
    clock.set(ts(1_000));
    let after_a = merged(store.push(&from_a).expect("push from a"));

    assert_eq!(after_a.last_modified, ts(1_000));
    assert_eq!(after_a.children.len(), 3);
    let titles: Vec<_> = after_a
        .children
        .iter()
        .filter_map(|c| c.fields.get("title").and_then(|v| v.as_str()))
        .collect();
    assert!(titles.contains(&"X"));
    assert!(titles.contains(&"Y"));
    assert!(titles.contains(&"Z"));
    let echoed = after_a
        .children
        .iter()
        .find(|c| c.client_id == y.client_id)
        .expect("Y echoed");
    assert!(echoed.server_id.is_some());
}

#[test]
fn stored_trees_survive_reopen() {
    let dir = temp_dir("stored_trees_survive_reopen");
    let clock = Arc::new(ManualClock::new(ts(500)));
    let root_id = {
        let mut store = open(&dir, &clock);
        let mut root = node(0, 100, "me");
        let mut doc = node(1, 100, "doc");
        let mut second = node(2, 100, "second");
        second.order = Some(1.0);
        doc.children = vec![node(2, 100, "first"), second];
        root.children = vec![doc];
        merged(store.push(&root).expect("push"))
            .server_id
            .expect("root id")
    };

    let mut store = open(&dir, &clock);
    let pulled = store.pull(root_id).expect("pull").expect("root");
    let sections = &pulled.children[0].children;
    assert_eq!(sections.len(), 2);
    assert_eq!(sections[0].fields.get("title"), Some(&json!("first")));
    assert_eq!(sections[1].order, Some(1.0));
}

#[test]
fn reopening_with_a_different_hierarchy_is_refused() {
    let dir = temp_dir("reopening_with_a_different_hierarchy_is_refused");
    {
        let _store = SqliteStore::open(&dir, hierarchy()).expect("open store");
    }

    let other = Hierarchy::try_new(vec![LevelDef::new("board", false)]).expect("hierarchy");
    match SqliteStore::open(&dir, other) {
        Err(StoreError::HierarchyMismatch { stored, .. }) => {
            assert!(stored.contains("document"));
        }
        Err(other) => panic!("expected hierarchy mismatch, got {other:?}"),
        Ok(_) => panic!("expected hierarchy mismatch"),
    }
}

#[test]
fn missing_root_is_reported_gone() {
    let dir = temp_dir("missing_root_is_reported_gone");
    let clock = Arc::new(ManualClock::new(ts(500)));
    let mut store = open(&dir, &clock);

    let mut root = node(0, 100, "me");
    root.server_id = ServerId::try_new(77).ok();
    let id = ServerId::try_new(77).expect("id");
    assert_eq!(
        store.push(&root).expect("push"),
        PushOutcome::Gone { server_id: id }
    );
    assert!(store.pull(id).expect("pull").is_none());
}

#[test]
fn failed_push_rolls_back_every_write() {
    let dir = temp_dir("failed_push_rolls_back_every_write");
    let clock = Arc::new(ManualClock::new(ts(500)));
    let mut store = open(&dir, &clock);

    {
        let conn = Connection::open(store.db_path()).expect("open db");
        conn.execute_batch(
            "CREATE TRIGGER reject_boom BEFORE INSERT ON nodes \
             WHEN NEW.fields_json LIKE '%boom%' \
             BEGIN SELECT RAISE(ABORT, 'boom rejected'); END;",
        )
        .expect("install trigger");
    }

    let mut root = node(0, 100, "me");
    root.children = vec![node(1, 100, "fine"), node(1, 100, "boom")];
    let err = store.push(&root).expect_err("trigger must abort the push");
    assert!(matches!(err, StoreError::Sql(_)), "got {err:?}");
    assert_eq!(row_count(&store), 0);
}

#[test]
fn payload_rejections_write_nothing() {
    let dir = temp_dir("payload_rejections_write_nothing");
    let clock = Arc::new(ManualClock::new(ts(500)));
    let mut store = open(&dir, &clock);

    let mut root = node(0, 100, "me");
    root.children = vec![node(2, 100, "skips a level")];
    let err = store.push(&root).expect_err("level mismatch");
    assert!(matches!(err, StoreError::Merge(_)), "got {err:?}");

    let mut orphan = node(1, 100, "orphan");
    orphan.parent_server_id = ServerId::try_new(5).ok();
    let err = store.push(&orphan).expect_err("unknown parent");
    assert!(matches!(err, StoreError::Merge(_)), "got {err:?}");
    assert_eq!(row_count(&store), 0);
}
