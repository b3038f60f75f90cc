//! Integration tests for file watching through SyncEngine
//!
//! These run against the real filesystem notifier, so they poll with a generous deadline
//! instead of asserting on exact timing.

mod common;

use common::{init_logging, write_doc};
use roux_core::{
    config::RouxConfig, event::ChangeKind, nodeid::is_valid_id, properties::Node, RouxError,
    SyncEngine,
};
use std::{path::Path, sync::Arc, time::Duration};
use tempfile::TempDir;

const POLL: Duration = Duration::from_millis(100);
const ATTEMPTS: usize = 100;

async fn watched_engine(temp_dir: &TempDir) -> Arc<SyncEngine> {
    init_logging();
    let mut config = RouxConfig::new(temp_dir.path());
    config.debounce_ms = 100;
    let engine = Arc::new(SyncEngine::open(config).await.unwrap());
    engine.sync().await.unwrap();
    engine.start_watching().unwrap();
    engine
}

async fn cached(engine: &SyncEngine, path: &Path) -> Option<Node> {
    engine.cache().get_by_path(path).await.unwrap()
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_watcher_picks_up_new_and_removed_files() {
    let temp_dir = TempDir::new().unwrap();
    let engine = watched_engine(&temp_dir).await;
    assert!(engine.is_watching());

    let path = write_doc(engine.root(), "live.md", "# Live\n");
    let mut node = None;
    for _ in 0..ATTEMPTS {
        node = cached(&engine, &path).await;
        if node.as_ref().is_some_and(|n| is_valid_id(&n.id)) {
            break;
        }
        tokio::time::sleep(POLL).await;
    }
    let node = node.expect("live.md should be synced by the watcher");
    assert!(is_valid_id(&node.id));
    assert_eq!(node.title, "Live");
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains(&node.id));

    std::fs::remove_file(&path).unwrap();
    let mut gone = false;
    for _ in 0..ATTEMPTS {
        if cached(&engine, &path).await.is_none() {
            gone = true;
            break;
        }
        tokio::time::sleep(POLL).await;
    }
    assert!(gone, "removal should reach the cache");
    assert_eq!(engine.get_node(&node.id).await.unwrap(), None);

    engine.stop_watching().await;
    assert!(!engine.is_watching());
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_start_watching_twice_fails() {
    let temp_dir = TempDir::new().unwrap();
    let engine = watched_engine(&temp_dir).await;
    assert!(matches!(engine.start_watching(), Err(RouxError::Watch(_))));
    engine.stop_watching().await;
    engine.start_watching().unwrap();
    engine.stop_watching().await;
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_stop_watching_finishes_dispatched_batch() {
    let temp_dir = TempDir::new().unwrap();
    let engine = watched_engine(&temp_dir).await;
    let handle = engine.watch_handle().unwrap();

    let path = write_doc(engine.root(), "late.md", "# Late\n");
    assert!(handle.record(Path::new("late.md"), ChangeKind::Added));
    for _ in 0..ATTEMPTS {
        if handle.pending_len() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(handle.pending_len(), 0);

    // The batch has left the debouncer; stopping must still let it land.
    engine.stop_watching().await;
    assert!(!engine.is_watching());
    assert!(engine.watch_handle().is_none());
    let node = cached(&engine, &path).await.expect("late.md should be applied");
    assert_eq!(node.title, "Late");
    assert!(is_valid_id(&node.id));
    let stored = engine.get_node(&node.id).await.unwrap().unwrap();
    assert_eq!(stored.title, "Late");
}
