#![forbid(unsafe_code)]

use arbor_core::{
    ClientId, Fields, Hierarchy, Level, LevelDef, ManualClock, NodeSnapshot, PushOutcome,
    ServerId, Timestamp,
};
use arbor_storage::{SqliteStore, StoreError};
use rusqlite::Connection;
use std::path::PathBuf;
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

fn ts(ms: i64) -> Timestamp {
    Timestamp::from_millis(ms)
}

fn node(level: u8, at: i64, order: Option<f64>) -> NodeSnapshot {
    NodeSnapshot {
        server_id: None,
        client_id: Some(ClientId::mint()),
        parent_server_id: None,
        parent_client_id: None,
        level: Level::new(level),
        created_at: ts(at),
        last_modified: ts(at),
        deleted_at: None,
        order,
        fields: Fields::new(),
        children: Vec::new(),
    }
}

/// owner -> [document -> 3 sections, document]
fn seed(store: &mut SqliteStore) -> NodeSnapshot {
    let mut doc = node(1, 100, None);
    doc.children = (0..3)
        .map(|i| node(2, 100, Some(f64::from(i))))
        .collect();
    let mut root = node(0, 100, None);
    root.children = vec![doc, node(1, 100, None)];
    match store.push(&root).expect("seed push") {
        PushOutcome::Merged { subtree, .. } => subtree,
        other => panic!("expected merged outcome, got {}", other.kind()),
    }
}

fn open(test_name: &str, clock: &Arc<ManualClock>) -> SqliteStore {
    let hierarchy = Hierarchy::try_new(vec![
        LevelDef::new("owner", false),
        LevelDef::new("document", false),
        LevelDef::new("section", true),
    ])
    .expect("hierarchy");
    SqliteStore::with_clock(temp_dir(test_name), hierarchy, clock.clone()).expect("open store")
}

fn tombstones(store: &SqliteStore) -> (i64, i64) {
    let conn = Connection::open(store.db_path()).expect("open db");
    conn.query_row(
        "SELECT COUNT(*), COUNT(deleted_at_ms) FROM nodes",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .expect("count rows")
}

#[test]
fn server_delete_tombstones_every_descendant_and_keeps_rows() {
    let clock = Arc::new(ManualClock::new(ts(200)));
    let mut store = open("server_delete_tombstones_every_descendant_and_keeps_rows", &clock);
    let seeded = seed(&mut store);
    let doc = seeded.children[0].server_id.expect("doc id");
    let root_id = seeded.server_id.expect("root id");

    clock.set(ts(900));
    assert_eq!(store.soft_delete(doc).expect("soft delete"), 4);
    assert_eq!(tombstones(&store), (6, 4));

    let pulled = store.pull(root_id).expect("pull").expect("root");
    let deleted = &pulled.children[0];
    assert_eq!(deleted.deleted_at, Some(ts(900)));
    assert!(deleted.children.iter().all(|s| s.deleted_at == Some(ts(900))));
    assert_eq!(pulled.children[1].deleted_at, None);
    assert_eq!(pulled.last_modified, ts(900));
    assert!(pulled.deleted_at.is_none());
}

#[test]
fn deleting_a_tombstone_again_changes_nothing() {
    let clock = Arc::new(ManualClock::new(ts(200)));
    let mut store = open("deleting_a_tombstone_again_changes_nothing", &clock);
    let seeded = seed(&mut store);
    let doc = seeded.children[0].server_id.expect("doc id");

    clock.set(ts(900));
    store.soft_delete(doc).expect("soft delete");
    clock.set(ts(1_500));
    assert_eq!(store.soft_delete(doc).expect("repeat"), 0);
    let stored = store.node(doc).expect("read").expect("row kept");
    assert_eq!(stored.record.deleted_at, Some(ts(900)));

    let missing = ServerId::try_new(4_242).expect("id");
    assert!(matches!(
        store.soft_delete(missing),
        Err(StoreError::UnknownId(id)) if id == missing
    ));
}

#[test]
fn pushed_tombstone_cascades_through_the_stored_subtree() {
    let clock = Arc::new(ManualClock::new(ts(200)));
    let mut store = open("pushed_tombstone_cascades_through_the_stored_subtree", &clock);
    let seeded = seed(&mut store);

    // The replica only declares the document; the authority finds the sections.
    let mut deletion = seeded.clone();
    deletion.last_modified = ts(400);
    deletion.children[0].last_modified = ts(400);
    deletion.children[0].deleted_at = Some(ts(400));
    deletion.children[0].children.clear();

    clock.set(ts(500));
    let PushOutcome::Merged { subtree, stats } = store.push(&deletion).expect("push") else {
        panic!("deletion must merge");
    };
    assert_eq!(stats.deleted, 1);
    assert_eq!(tombstones(&store), (6, 4));
    let doc = &subtree.children[0];
    assert_eq!(doc.children.len(), 3);
    assert!(doc.children.iter().all(|s| s.deleted_at == Some(ts(400))));
}
